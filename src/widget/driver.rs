//! # Widget Driver
//!
//! Serves the requests of one embedded widget by calling into the protocol
//! client. Encryption, key download and pagination all stay in the client;
//! the driver only reshapes arguments and results.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::try_join_all;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{Value, json};

use super::turn::TurnServerBridge;
use super::{Widget, WidgetKind};
use crate::client::{
    ClientError, DeviceMap, DeviceTarget, Direction, RelationsOptions, ToDeviceBatch,
    ToDeviceMessage, WidgetClient,
};

/// Device id that addresses every device of a user.
pub const ALL_DEVICES: &str = "*";

/// To-device contents keyed by user id, then device id (or `*`).
pub type ContentMap = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Debug, Clone, PartialEq)]
pub enum DriverError {
    /// No room was given and the driver isn't attached to one.
    NoRoom,
    Client(ClientError),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::NoRoom => write!(f, "error while reading the current room"),
            DriverError::Client(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DriverError {}

impl From<ClientError> for DriverError {
    fn from(e: ClientError) -> Self {
        DriverError::Client(e)
    }
}

/// Arguments of a widget's relation read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationsQuery {
    pub event_id: String,
    /// Falls back to the driver's room when unset.
    pub room_id: Option<String>,
    pub rel_type: Option<String>,
    pub event_type: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<u32>,
    pub direction: Option<Direction>,
}

impl RelationsQuery {
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            ..Default::default()
        }
    }

    pub fn in_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    fn options(&self) -> RelationsOptions {
        RelationsOptions {
            limit: self.limit,
            from: self.from.clone(),
            to: self.to.clone(),
            direction: self.direction,
        }
    }
}

/// Relation page as returned to the widget.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadEventRelationsResult {
    pub original_event: Option<Value>,
    pub chunk: Vec<Value>,
    pub next_batch: Option<String>,
    pub prev_batch: Option<String>,
}

pub struct WidgetDriver {
    client: Arc<dyn WidgetClient>,
    allowed_capabilities: Vec<String>,
    widget: Widget,
    kind: WidgetKind,
    in_room_id: Option<String>,
}

impl WidgetDriver {
    pub fn new(
        client: Arc<dyn WidgetClient>,
        allowed_capabilities: Vec<String>,
        widget: Widget,
        kind: WidgetKind,
        in_room_id: Option<String>,
    ) -> Self {
        info!(
            "Widget driver created for {} ({:?}, room={:?})",
            widget.id, kind, in_room_id
        );
        Self {
            client,
            allowed_capabilities,
            widget,
            kind,
            in_room_id,
        }
    }

    pub fn widget(&self) -> &Widget {
        &self.widget
    }

    pub fn kind(&self) -> WidgetKind {
        self.kind
    }

    /// Switches the room used when a request doesn't name one.
    pub fn set_room(&mut self, room_id: Option<String>) {
        self.in_room_id = room_id;
    }

    /// The requested capabilities that are pre-approved, in request order.
    pub fn approved_capabilities(&self, requested: &[String]) -> Vec<String> {
        let approved: Vec<String> = requested
            .iter()
            .filter(|cap| self.allowed_capabilities.contains(*cap))
            .cloned()
            .collect();
        if approved.len() < requested.len() {
            debug!(
                "Widget {} requested {} capabilities, {} pre-approved",
                self.widget.id,
                requested.len(),
                approved.len()
            );
        }
        approved
    }

    /// Sends `contents` as to-device messages of `event_type`.
    ///
    /// Unencrypted messages go out as a single queued batch. Encrypted ones
    /// are sent per (user, device) entry once keys are downloaded; `*`
    /// expands to every device the client knows for that user.
    pub async fn send_to_device(
        &self,
        event_type: &str,
        encrypted: bool,
        contents: &ContentMap,
    ) -> Result<(), DriverError> {
        if !encrypted {
            let batch = contents
                .iter()
                .flat_map(|(user_id, devices)| {
                    devices.iter().map(move |(device_id, payload)| ToDeviceMessage {
                        user_id: user_id.clone(),
                        device_id: device_id.clone(),
                        payload: payload.clone(),
                    })
                })
                .collect::<Vec<_>>();
            info!("Queueing {} {} to-device messages", batch.len(), event_type);
            self.client
                .queue_to_device(ToDeviceBatch {
                    event_type: event_type.to_string(),
                    batch,
                })
                .await?;
            return Ok(());
        }

        let user_ids: Vec<String> = contents.keys().cloned().collect();
        let known = self.client.download_keys(&user_ids).await?;

        let mut sends = Vec::new();
        for (user_id, devices) in contents {
            for (device_id, content) in devices {
                let targets = targets_for(&known, user_id, device_id);
                if targets.is_empty() {
                    warn!("No known devices for {}/{}, skipping", user_id, device_id);
                    continue;
                }
                sends.push((targets, json!({ "type": event_type, "content": content })));
            }
        }

        info!("Sending {} encrypted {} payloads", sends.len(), event_type);
        try_join_all(sends.iter().map(|(targets, payload)| {
            self.client.encrypt_and_send_to_devices(targets, payload)
        }))
        .await?;
        Ok(())
    }

    /// Lazy sequence of TURN servers for the widget.
    pub fn get_turn_servers(&self) -> TurnServerBridge {
        TurnServerBridge::new(Arc::clone(&self.client))
    }

    /// Reads events related to `query.event_id`.
    pub async fn read_event_relations(
        &self,
        query: &RelationsQuery,
    ) -> Result<ReadEventRelationsResult, DriverError> {
        let room_id = query
            .room_id
            .as_deref()
            .or(self.in_room_id.as_deref())
            .ok_or(DriverError::NoRoom)?;

        debug!("Reading relations of {} in {}", query.event_id, room_id);
        let page = self
            .client
            .relations(
                room_id,
                &query.event_id,
                query.rel_type.as_deref(),
                query.event_type.as_deref(),
                &query.options(),
            )
            .await?;

        Ok(ReadEventRelationsResult {
            original_event: page.original_event,
            chunk: page.events,
            next_batch: page.next_batch,
            prev_batch: page.prev_batch,
        })
    }
}

/// Resolves one content-map entry to concrete devices.
fn targets_for(known: &DeviceMap, user_id: &str, device_id: &str) -> Vec<DeviceTarget> {
    let Some(devices) = known.get(user_id) else {
        return Vec::new();
    };
    let target = |device: &crate::client::DeviceInfo| DeviceTarget {
        user_id: user_id.to_string(),
        device: device.clone(),
    };
    if device_id == ALL_DEVICES {
        devices.values().map(target).collect()
    } else {
        devices.get(device_id).map(target).into_iter().collect()
    }
}
