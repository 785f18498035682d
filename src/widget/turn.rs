//! # TURN Server Bridge
//!
//! Turns the client's push-style "TURN servers changed" events into a
//! pull-style sequence a widget can consume one server at a time.
//!
//! ```text
//!  client emitter ──event──▶ listener ──send_replace──▶ watch slot
//!                                                          │
//!  widget ◀──────── next() ◀── changed().await ◀───────────┘
//! ```
//!
//! The listener is registered on construction and removed by `cancel()`
//! (or on drop). Only the latest unseen event is kept: if several events
//! fire between two pulls, the next pull yields the most recent one.

use std::sync::Arc;

use futures::Stream;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::client::{ClientError, ClientEvent, ClientTurnServer, ListenerId, WidgetClient};

/// A TURN server in the shape the widget API expects.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TurnServer {
    pub uris: Vec<String>,
    pub username: String,
    pub password: String,
}

impl From<ClientTurnServer> for TurnServer {
    fn from(server: ClientTurnServer) -> Self {
        Self {
            uris: server.urls,
            username: server.username,
            password: server.credential,
        }
    }
}

/// Latest value published by the listener.
#[derive(Debug, Clone)]
enum Signal {
    Idle,
    Servers(Vec<ClientTurnServer>),
    Failed(ClientError),
}

pub struct TurnServerBridge {
    client: Arc<dyn WidgetClient>,
    subscription: Option<ListenerId>,
    /// None once the bridge is exhausted or cancelled.
    signal: Option<watch::Receiver<Signal>>,
    started: bool,
}

impl TurnServerBridge {
    /// Creates a bridge. If the client isn't polling TURN servers the bridge
    /// starts exhausted and no listener is registered.
    pub fn new(client: Arc<dyn WidgetClient>) -> Self {
        if !client.polling_turn_servers() {
            debug!("TURN discovery unsupported, bridge exhausted");
            return Self {
                client,
                subscription: None,
                signal: None,
                started: false,
            };
        }

        let (tx, rx) = watch::channel(Signal::Idle);
        let subscription = client.on_turn_servers(Arc::new(move |event: &ClientEvent| {
            match event {
                ClientEvent::TurnServers(servers) => {
                    tx.send_replace(Signal::Servers(servers.clone()));
                }
                ClientEvent::TurnServersError { error, fatal: true } => {
                    tx.send_replace(Signal::Failed(error.clone()));
                }
                ClientEvent::TurnServersError { error, fatal: false } => {
                    debug!("Ignoring non-fatal TURN error: {}", error);
                }
            }
        }));
        debug!("TURN bridge subscribed as {:?}", subscription);

        Self {
            client,
            subscription: Some(subscription),
            signal: Some(rx),
            started: false,
        }
    }

    /// Waits for the next TURN server.
    ///
    /// Returns `Ok(None)` once the bridge is exhausted or cancelled. The first
    /// pull yields the client's current server immediately if it has one;
    /// every later pull waits for the next change event.
    pub async fn next(&mut self) -> Result<Option<TurnServer>, ClientError> {
        let Some(signal) = self.signal.as_mut() else {
            return Ok(None);
        };

        if !self.started {
            // A fatal error can land before the first pull; servers published
            // before now are covered by the current list.
            let failed = match &*signal.borrow_and_update() {
                Signal::Failed(error) => Some(error.clone()),
                _ => None,
            };
            if let Some(error) = failed {
                warn!("TURN discovery failed before first pull: {}", error);
                self.cancel();
                return Err(error);
            }
            if !self.client.polling_turn_servers() {
                debug!("TURN discovery stopped before first pull, bridge exhausted");
                self.cancel();
                return Ok(None);
            }
            let current = self.client.turn_servers()?;
            self.started = true;
            if let Some(server) = current.into_iter().next() {
                debug!("Yielding current TURN server");
                return Ok(Some(server.into()));
            }
        }

        loop {
            if signal.changed().await.is_err() {
                // Listener dropped by the client; nothing more can arrive.
                debug!("TURN listener gone, bridge exhausted");
                self.signal = None;
                self.subscription = None;
                return Ok(None);
            }

            let latest = signal.borrow_and_update().clone();
            match latest {
                Signal::Servers(servers) => match servers.into_iter().next() {
                    Some(server) => {
                        debug!("Yielding updated TURN server");
                        return Ok(Some(server.into()));
                    }
                    None => continue,
                },
                Signal::Failed(error) => {
                    warn!("TURN discovery failed, closing bridge: {}", error);
                    self.cancel();
                    return Err(error);
                }
                Signal::Idle => continue,
            }
        }
    }

    /// Stops the sequence and removes the client listener. Safe to call repeatedly.
    pub fn cancel(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.client.off_turn_servers(id);
            debug!("TURN bridge unsubscribed {:?}", id);
        }
        self.signal = None;
    }

    pub fn is_exhausted(&self) -> bool {
        self.signal.is_none()
    }

    /// Adapts the bridge into a `Stream`. Dropping the stream cancels the bridge.
    pub fn into_stream(self) -> impl Stream<Item = Result<TurnServer, ClientError>> + Send {
        futures::stream::unfold(Some(self), |bridge| async move {
            let mut bridge = bridge?;
            match bridge.next().await {
                Ok(Some(server)) => Some((Ok(server), Some(bridge))),
                Ok(None) => None,
                Err(error) => Some((Err(error), None)),
            }
        })
    }
}

impl Drop for TurnServerBridge {
    fn drop(&mut self) {
        self.cancel();
    }
}
