use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A TURN server as the protocol client reports it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ClientTurnServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

/// A single to-device message addressed to one device (or `*` for all of a user's devices).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToDeviceMessage {
    pub user_id: String,
    pub device_id: String,
    pub payload: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToDeviceBatch {
    pub event_type: String,
    pub batch: Vec<ToDeviceMessage>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl DeviceInfo {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            display_name: None,
        }
    }
}

/// Known devices keyed by user id, then device id.
pub type DeviceMap = BTreeMap<String, BTreeMap<String, DeviceInfo>>;

/// One device an encrypted payload is addressed to.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceTarget {
    pub user_id: String,
    pub device: DeviceInfo,
}

/// Pagination direction for relation queries.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    #[serde(rename = "f")]
    Forward,
    #[serde(rename = "b")]
    Backward,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "f" => Ok(Direction::Forward),
            "b" => Ok(Direction::Backward),
            other => Err(format!("invalid direction {other:?}, expected \"f\" or \"b\"")),
        }
    }
}

/// Pagination options for `relations`. Unset fields are left out of the request.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationsOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
}

/// Relation page returned by the client. Events are raw event JSON.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RelationsResponse {
    /// Missing when the client could not fetch the related-to event.
    pub original_event: Option<Value>,
    pub events: Vec<Value>,
    pub next_batch: Option<String>,
    pub prev_batch: Option<String>,
}
