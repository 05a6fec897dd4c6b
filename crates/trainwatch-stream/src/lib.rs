//! Trainwatch Stream - reconnecting per-job metric subscriptions
//!
//! The asynchronous half of the live training monitor:
//! - Derives each job's stream address from the page origin
//! - Runs one reconnecting session per selected job over a pluggable transport
//! - Applies transport and timer events one at a time from a single queue
//! - Guards every event with the generation of the attempt that produced it
//! - Publishes status, history and chart series to the presentation layer
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use trainwatch_stream::{SubscriptionController, WatchConfig, WebSocketConnector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = WatchConfig::new().with_origin("https://monitor.example.com");
//! let connector = Arc::new(WebSocketConnector::new(config.session.idle_timeout()));
//! let mut controller = SubscriptionController::new(connector, &config)?;
//!
//! controller.select_job("run-42");
//! loop {
//!     for update in controller.next_updates().await {
//!         println!("{update:?}");
//!     }
//! }
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod address;
pub mod config;
pub mod controller;
pub mod error;
pub mod session;
pub mod transport;
pub mod websocket;

// Re-exports for convenience
pub use address::{JobId, Origin};
pub use config::{SessionConfig, WatchConfig};
pub use controller::{ControllerCommand, SubscriptionController, ViewState};
pub use error::{ConfigError, TransportError};
pub use session::{ConnectionStatus, SessionState, SessionStats, SessionUpdate, StreamSession};
pub use transport::{
    Connector, EventReceiver, EventSender, EventSink, Generation, SessionEvent, TransportEvent,
    TransportHandle,
};
pub use websocket::WebSocketConnector;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving trainwatch subscriptions
    pub use crate::{
        ConnectionStatus, ControllerCommand, JobId, SessionState, SubscriptionController,
        ViewState, WatchConfig, WebSocketConnector,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
