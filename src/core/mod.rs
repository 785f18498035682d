//! # Core
//!
//! Settings shared by the binary and the library. The widget logic itself
//! lives in [`crate::widget`]; the client seam in [`crate::client`].
//!
//! ## Modules
//!
//! - [`config`]: layered configuration (defaults → file → env → CLI)

pub mod config;
