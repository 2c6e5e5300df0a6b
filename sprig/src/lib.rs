//! A general purpose [Sparkplug](https://sparkplug.eclipse.org/) development library.
//!
//! `sprig` re-exports the workspace crates under one roof:
//!
//! - [`entity`]: edge node and device sessions
//! - [`app`]: host applications and the discovery registry
//! - [`client`]: client traits and types
//! - [`client_rumqtt`]: a [rumqttc](https://crates.io/crates/rumqttc) backed client
//! - [`types`]: payload, topic and value primitives

#[cfg(feature = "app")]
pub use sprig_app as app;
pub use sprig_client as client;
#[cfg(feature = "rumqtt-client")]
pub use sprig_client_rumqtt as client_rumqtt;
#[cfg(feature = "entity")]
pub use sprig_entity as entity;
pub use sprig_types as types;
