use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::types::{
    ClientTurnServer, DeviceMap, DeviceTarget, RelationsOptions, RelationsResponse, ToDeviceBatch,
};

/// Errors surfaced by the protocol client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Transport-level failure (timeout, DNS, connection refused).
    Network(String),
    /// Homeserver returned an error response.
    Api { status: u16, message: String },
    /// Encrypting or key handling failed.
    Crypto(String),
    /// The requested room, event or device is unknown to the client.
    NotFound(String),
    /// TURN server discovery failed.
    TurnServers(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Network(msg) => write!(f, "network error: {msg}"),
            ClientError::Api { status, message } => {
                write!(f, "API error (HTTP {status}): {message}")
            }
            ClientError::Crypto(msg) => write!(f, "crypto error: {msg}"),
            ClientError::NotFound(msg) => write!(f, "not found: {msg}"),
            ClientError::TurnServers(msg) => write!(f, "TURN server discovery failed: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

/// Events the client emits to TURN server listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The TURN server list changed; carries the new list.
    TurnServers(Vec<ClientTurnServer>),
    /// Fetching TURN servers failed. `fatal` means the client gave up polling.
    TurnServersError { error: ClientError, fatal: bool },
}

/// Handle returned by `on_turn_servers`, used to deregister the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

pub type TurnServersListener = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// The slice of the protocol client a widget driver depends on.
#[async_trait]
pub trait WidgetClient: Send + Sync {
    /// True if the homeserver provides TURN servers and the client polls them.
    fn polling_turn_servers(&self) -> bool;

    /// Current TURN server list. Empty until the first successful poll.
    fn turn_servers(&self) -> Result<Vec<ClientTurnServer>, ClientError>;

    /// Registers a listener for TURN server events.
    fn on_turn_servers(&self, listener: TurnServersListener) -> ListenerId;

    /// Removes a listener. Unknown ids are ignored.
    fn off_turn_servers(&self, id: ListenerId);

    /// Queues an unencrypted batch of to-device messages.
    async fn queue_to_device(&self, batch: ToDeviceBatch) -> Result<(), ClientError>;

    /// Downloads device keys for the given users.
    async fn download_keys(&self, user_ids: &[String]) -> Result<DeviceMap, ClientError>;

    /// Encrypts `payload` for each target device and sends it.
    async fn encrypt_and_send_to_devices(
        &self,
        targets: &[DeviceTarget],
        payload: &Value,
    ) -> Result<(), ClientError>;

    /// Fetches events related to `event_id` in `room_id`.
    async fn relations(
        &self,
        room_id: &str,
        event_id: &str,
        rel_type: Option<&str>,
        event_type: Option<&str>,
        options: &RelationsOptions,
    ) -> Result<RelationsResponse, ClientError>;
}
