//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`formats`]: Format listing for a remote page
//! - [`downloads`]: Download registration, progress and streaming
//! - [`system`]: Health, capabilities, OpenAPI, events

mod downloads;
mod formats;
mod system;

// Re-export all handlers so `routes::function_name` continues to work
pub use downloads::*;
pub use formats::*;
pub use system::*;
