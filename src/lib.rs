//! Widget driver library exports.
//!
//! ```text
//!   widget ──request──▶ WidgetDriver ──call──▶ dyn WidgetClient
//!                           │                        │
//!                    TurnServerBridge ◀──events──────┘
//! ```

pub mod client;
pub mod core;
pub mod widget;

#[cfg(test)]
pub mod test_support;

pub use client::{LocalClient, WidgetClient};
pub use widget::{TurnServer, TurnServerBridge, WidgetDriver};
