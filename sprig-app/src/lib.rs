//! Part of [sprig](https://crates.io/crates/sprig), a general purpose [Sparkplug](https://sparkplug.eclipse.org/) development library.
//!
//! This library implements Sparkplug host applications: a run loop that
//! publishes the host's STATE certificates and a registry of the edge nodes
//! and devices discovered from inbound traffic.

mod app;
mod config;
mod registry;

pub use app::{
    App, AppHandle, CommandError, DeviceDiscoveredCallback, DeviceLifecycleCallback,
    NodeDiscoveredCallback, NodeLifecycleCallback, OfflineCallback, OnlineCallback,
};
pub use config::{NamespaceSubConfig, SubscriptionConfig};
