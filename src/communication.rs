//! Messages of the serial work queue and of the host bridge.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::{sync::oneshot, time::Instant};

use crate::{
    alarm::{AlarmId, AlarmPhase, AlarmSpec, DeferredFire},
    error::AlarmError,
    session::InterruptionPhase,
};

/// One unit of work for the engine. Every alarm mutation goes through here so
/// they are applied one at a time.
#[derive(Debug)]
pub enum Message {
    SetAlarm {
        spec: AlarmSpec,
        reply: oneshot::Sender<Result<(), AlarmError>>,
    },
    StopAlarm {
        id: AlarmId,
        cancel_notification: bool,
        reply: oneshot::Sender<bool>,
    },
    /// sent by a foreground timer once its countdown has elapsed
    Fire(DeferredFire),
    /// end of a non-looping alarm's audio
    AutoStop { id: AlarmId, trigger: Instant },
    Position {
        id: AlarmId,
        reply: oneshot::Sender<Duration>,
    },
    BackgroundRefresh { reply: oneshot::Sender<usize> },
    Interruption(InterruptionPhase),
    Terminating { reply: oneshot::Sender<bool> },
    Snapshot { reply: oneshot::Sender<Snapshot> },
    Shutdown,
}

/// A call coming in over the host bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl MethodCall {
    #[must_use]
    pub fn new(method: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }
}

/// The single answer produced for every [`MethodCall`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BridgeReply {
    Success(serde_json::Value),
    Error { code: String, message: String },
    NotImplemented,
}

impl From<AlarmError> for BridgeReply {
    fn from(err: AlarmError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlarmSummary {
    pub id: AlarmId,
    #[serde(serialize_with = "serialize_phase")]
    pub phase: AlarmPhase,
    pub due_at: chrono::DateTime<chrono::Local>,
    /// a vibration loop is running for this alarm
    pub vibrating: bool,
}

fn serialize_phase<S: serde::Serializer>(phase: &AlarmPhase, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(phase)
}

/// What the engine looks like at one observation point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub alarms: Vec<AlarmSummary>,
    pub keep_alive_participants: usize,
    pub keep_alive_running: bool,
    pub background_pending: bool,
    pub kill_notice_armed: bool,
}
