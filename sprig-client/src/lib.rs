//! Part of [sprig](https://crates.io/crates/sprig), a general purpose [Sparkplug](https://sparkplug.eclipse.org/) development library.
//!
//! The client abstraction the rest of the workspace builds on: the [Client]
//! and [EventLoop] traits plus the decoded message and event types they
//! exchange.
//!
//! # Feature Flags
//!
//! - `channel-client`: An in-process [EventLoop] and [Client] pair backed by channels. Disabled by default.
//!

mod traits;
mod types;
mod utils;

pub use traits::{Client, DynClient, DynEventLoop, EventLoop};
pub use types::*;
pub use utils::topic_and_payload_to_event;

/// Channel backed [EventLoop] and [Client] implementations.
///
/// For tests that want to script broker traffic without a real MQTT
/// connection.
#[cfg(any(feature = "channel-client", doc))]
pub mod channel;
