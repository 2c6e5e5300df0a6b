//! Part of [sprig](https://crates.io/crates/sprig), a general purpose [Sparkplug](https://sparkplug.eclipse.org/) development library.
//!
//! This library provides a [sprig_client::Client] and [sprig_client::EventLoop] implementation using [rumqttc].

mod client;
mod options;

pub use client::{Client, EventLoop};
pub use options::{ConnectionProperties, MqttOptions, Transport};
