//! # Widgets
//!
//! The widget-facing side of the client. A [`WidgetDriver`] serves one
//! embedded widget, translating its API requests into `WidgetClient` calls.
//!
//! - [`driver`]: `WidgetDriver` — to-device messaging, relations, TURN servers
//! - [`turn`]: `TurnServerBridge` — lazy TURN server sequence

pub mod driver;
pub mod turn;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub use driver::{ContentMap, DriverError, ReadEventRelationsResult, RelationsQuery, WidgetDriver};
pub use turn::{TurnServer, TurnServerBridge};

/// Where a widget is mounted.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WidgetKind {
    #[default]
    Room,
    Account,
    Modal,
}

/// Identity of an embedded widget.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Widget {
    pub id: String,
    pub creator_user_id: String,
    #[serde(rename = "type")]
    pub widget_type: String,
    pub url: String,
}
