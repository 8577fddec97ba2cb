#![warn(clippy::pedantic, clippy::nursery, clippy::cargo)]
#![deny(clippy::use_self, rust_2018_idioms)]
#![allow(clippy::multiple_crate_versions, clippy::module_name_repetitions)]

//! One-shot alarms that ring on time even when the process is throttled,
//! suspended or backgrounded.
//!
//! The host talks to an [`AlarmPlugin`], which forwards every call onto a
//! single serial work queue ([`engine`]). Audio, the audio session,
//! notifications and background refresh grants are ports; [`rodio_backend`]
//! and the desktop adapters in [`session`], [`notification`] and
//! [`background`] implement them for a desktop process.

pub mod alarm;
pub mod background;
pub mod bridge;
pub mod communication;
pub mod config;
pub mod engine;
pub mod error;
pub mod keep_alive;
pub mod notification;
pub mod playback;
pub mod plugin;
pub mod registry;
pub mod rodio_backend;
pub mod scheduler;
pub mod session;
pub mod shutdown;

#[cfg(test)]
mod testing;

pub use alarm::{AlarmId, AlarmPhase, AlarmSpec};
pub use communication::{BridgeReply, MethodCall, Snapshot};
pub use config::Config;
pub use engine::Ports;
pub use error::{AlarmError, Result};
pub use plugin::AlarmPlugin;
