//! # Local Client
//!
//! An in-process `WidgetClient`. It keeps TURN servers, devices and relation
//! pages in memory and records delivered to-device messages in an outbox
//! instead of talking to a homeserver.
//!
//! ```text
//! LocalClient
//! ├── polling: AtomicBool                    // TURN discovery active
//! ├── turn_servers: Vec<ClientTurnServer>    // current list
//! ├── listeners: Vec<(ListenerId, listener)> // TURN event subscribers
//! ├── devices: DeviceMap                     // known device keys
//! ├── relations: HashMap<(room, event), page>
//! └── outbox: Vec<OutboundToDevice>          // everything "sent"
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;

use super::interface::{ClientError, ClientEvent, ListenerId, TurnServersListener, WidgetClient};
use super::types::{
    ClientTurnServer, DeviceInfo, DeviceMap, DeviceTarget, Direction, RelationsOptions,
    RelationsResponse, ToDeviceBatch,
};

/// A to-device message the local client has delivered.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct OutboundToDevice {
    pub txn_id: String,
    pub sent_at: DateTime<Utc>,
    /// None for encrypted sends; the type travels inside the payload.
    pub event_type: Option<String>,
    pub user_id: String,
    pub device_id: String,
    pub payload: Value,
    pub encrypted: bool,
}

pub struct LocalClient {
    polling: AtomicBool,
    turn_servers: Mutex<Vec<ClientTurnServer>>,
    listeners: Mutex<Vec<(ListenerId, TurnServersListener)>>,
    next_listener_id: AtomicU64,
    devices: Mutex<DeviceMap>,
    relations: Mutex<HashMap<(String, String), RelationsResponse>>,
    outbox: Mutex<Vec<OutboundToDevice>>,
}

/// Locks a mutex, recovering the data if a listener panicked while holding it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for LocalClient {
    fn default() -> Self {
        Self::new(true)
    }
}

impl LocalClient {
    /// Creates an empty client. `polling` is the TURN discovery capability flag.
    pub fn new(polling: bool) -> Self {
        Self {
            polling: AtomicBool::new(polling),
            turn_servers: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            devices: Mutex::new(DeviceMap::new()),
            relations: Mutex::new(HashMap::new()),
            outbox: Mutex::new(Vec::new()),
        }
    }

    pub fn set_polling(&self, polling: bool) {
        self.polling.store(polling, Ordering::SeqCst);
    }

    /// Replaces the current TURN server list and notifies listeners.
    pub fn set_turn_servers(&self, servers: Vec<ClientTurnServer>) {
        info!("TURN servers updated: {} entries", servers.len());
        *lock(&self.turn_servers) = servers.clone();
        self.emit(&ClientEvent::TurnServers(servers));
    }

    /// Notifies listeners that fetching TURN servers failed.
    pub fn report_turn_server_error(&self, error: ClientError, fatal: bool) {
        warn!("TURN server error (fatal={}): {}", fatal, error);
        if fatal {
            self.set_polling(false);
        }
        self.emit(&ClientEvent::TurnServersError { error, fatal });
    }

    /// Number of live TURN server listeners.
    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    pub fn add_device(&self, user_id: impl Into<String>, device: DeviceInfo) {
        lock(&self.devices)
            .entry(user_id.into())
            .or_default()
            .insert(device.device_id.clone(), device);
    }

    /// Stores the relation page returned for `(room_id, event_id)`.
    pub fn insert_relations(
        &self,
        room_id: impl Into<String>,
        event_id: impl Into<String>,
        page: RelationsResponse,
    ) {
        lock(&self.relations).insert((room_id.into(), event_id.into()), page);
    }

    /// Snapshot of every message delivered so far, in delivery order.
    pub fn outbox(&self) -> Vec<OutboundToDevice> {
        lock(&self.outbox).clone()
    }

    fn emit(&self, event: &ClientEvent) {
        // Snapshot so listeners can (de)register without deadlocking.
        let listeners: Vec<TurnServersListener> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        debug!("Emitting TURN event to {} listeners", listeners.len());
        for listener in listeners {
            listener(event);
        }
    }

    fn deliver(&self, message: OutboundToDevice) {
        debug!(
            "Delivered to-device message {} to {}/{}",
            message.txn_id, message.user_id, message.device_id
        );
        lock(&self.outbox).push(message);
    }
}

#[async_trait]
impl WidgetClient for LocalClient {
    fn polling_turn_servers(&self) -> bool {
        self.polling.load(Ordering::SeqCst)
    }

    fn turn_servers(&self) -> Result<Vec<ClientTurnServer>, ClientError> {
        Ok(lock(&self.turn_servers).clone())
    }

    fn on_turn_servers(&self, listener: TurnServersListener) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.listeners).push((id, listener));
        debug!("Registered TURN listener {:?}", id);
        id
    }

    fn off_turn_servers(&self, id: ListenerId) {
        lock(&self.listeners).retain(|(existing, _)| *existing != id);
        debug!("Removed TURN listener {:?}", id);
    }

    async fn queue_to_device(&self, batch: ToDeviceBatch) -> Result<(), ClientError> {
        let sent_at = Utc::now();
        for message in batch.batch {
            self.deliver(OutboundToDevice {
                txn_id: uuid::Uuid::new_v4().to_string(),
                sent_at,
                event_type: Some(batch.event_type.clone()),
                user_id: message.user_id,
                device_id: message.device_id,
                payload: message.payload,
                encrypted: false,
            });
        }
        Ok(())
    }

    async fn download_keys(&self, user_ids: &[String]) -> Result<DeviceMap, ClientError> {
        let devices = lock(&self.devices);
        Ok(user_ids
            .iter()
            .map(|user_id| {
                let known = devices.get(user_id).cloned().unwrap_or_default();
                (user_id.clone(), known)
            })
            .collect())
    }

    async fn encrypt_and_send_to_devices(
        &self,
        targets: &[DeviceTarget],
        payload: &Value,
    ) -> Result<(), ClientError> {
        let sent_at = Utc::now();
        for target in targets {
            let known = lock(&self.devices)
                .get(&target.user_id)
                .is_some_and(|devices| devices.contains_key(&target.device.device_id));
            if !known {
                return Err(ClientError::Crypto(format!(
                    "no keys for {}/{}",
                    target.user_id, target.device.device_id
                )));
            }
            self.deliver(OutboundToDevice {
                txn_id: uuid::Uuid::new_v4().to_string(),
                sent_at,
                event_type: None,
                user_id: target.user_id.clone(),
                device_id: target.device.device_id.clone(),
                payload: payload.clone(),
                encrypted: true,
            });
        }
        Ok(())
    }

    async fn relations(
        &self,
        room_id: &str,
        event_id: &str,
        rel_type: Option<&str>,
        event_type: Option<&str>,
        options: &RelationsOptions,
    ) -> Result<RelationsResponse, ClientError> {
        let key = (room_id.to_string(), event_id.to_string());
        let Some(mut page) = lock(&self.relations).get(&key).cloned() else {
            return Err(ClientError::NotFound(format!("{event_id} in {room_id}")));
        };

        page.events.retain(|event| {
            let relation = &event["content"]["m.relates_to"];
            rel_type.is_none_or(|r| relation["rel_type"] == r)
                && event_type.is_none_or(|t| event["type"] == t)
        });
        // Stored pages are newest first.
        if options.direction == Some(Direction::Forward) {
            page.events.reverse();
        }
        if let Some(limit) = options.limit {
            page.events.truncate(limit as usize);
        }
        Ok(page)
    }
}
