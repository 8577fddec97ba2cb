//! The host-facing surface.
//!
//! [`AlarmPlugin`] is a cheap handle onto the engine's work queue. Every call
//! is answered on the engine task, never on the caller's, and every
//! [`MethodCall`] gets exactly one [`BridgeReply`].

use std::time::Duration;

use serde_json::json;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    alarm::{AlarmId, AlarmSpec, IdArgs, SetAlarmArgs},
    communication::{BridgeReply, Message, MethodCall, Snapshot},
    config::Config,
    engine::{Engine, Ports},
    error::{AlarmError, Result},
    session::InterruptionPhase,
};

#[derive(Debug, Clone)]
pub struct AlarmPlugin {
    queue: mpsc::UnboundedSender<Message>,
}

impl AlarmPlugin {
    /// Wires the engine to `ports` and spawns it on the current runtime.
    #[must_use]
    pub fn start(ports: Ports, config: &Config) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Engine::new(ports, config, tx.clone(), rx);
        let task = tokio::spawn(engine.run());
        log::info!("alarm engine started");
        (Self { queue: tx }, task)
    }

    /// Answers one bridge call.
    pub async fn handle(&self, call: MethodCall) -> BridgeReply {
        let reply = match call.method.as_str() {
            "setAlarm" => self.handle_set_alarm(call.arguments).await,
            "stopAlarm" => match serde_json::from_value::<IdArgs>(call.arguments) {
                Ok(args) => Ok(json!(self.stop_alarm(args.id).await)),
                Err(e) => Err(e.into()),
            },
            "audioCurrentTime" => match serde_json::from_value::<IdArgs>(call.arguments) {
                Ok(args) => {
                    let position = self.current_playback_position(args.id).await;
                    Ok(json!(position.as_secs_f64()))
                }
                Err(e) => Err(e.into()),
            },
            other => {
                log::debug!("method {other} not implemented");
                return BridgeReply::NotImplemented;
            }
        };
        reply.map_or_else(BridgeReply::from, BridgeReply::Success)
    }

    /// Answers `call` on a spawned task and hands the reply to `respond`,
    /// exactly once, so the calling thread never waits on the engine.
    pub fn dispatch<F>(&self, call: MethodCall, respond: F) -> JoinHandle<()>
    where
        F: FnOnce(BridgeReply) + Send + 'static,
    {
        let plugin = self.clone();
        tokio::spawn(async move { respond(plugin.handle(call).await) })
    }

    async fn handle_set_alarm(&self, arguments: serde_json::Value) -> Result<serde_json::Value> {
        let args: SetAlarmArgs = serde_json::from_value(arguments)?;
        let spec = AlarmSpec::try_from(args)?;
        let id = spec.id;
        let set = self
            .set_alarm(spec)
            .await
            .inspect_err(|e| log::error!("could not set alarm {id}: {e}"))?;
        Ok(json!(set))
    }

    pub async fn set_alarm(&self, spec: AlarmSpec) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Message::SetAlarm { spec, reply })?;
        rx.await.map_err(|_| AlarmError::EngineStopped)??;
        Ok(true)
    }

    /// True if an alarm was registered under `id` and has been torn down.
    pub async fn stop_alarm(&self, id: AlarmId) -> bool {
        let (reply, rx) = oneshot::channel();
        let message = Message::StopAlarm {
            id,
            cancel_notification: true,
            reply,
        };
        if self.send(message).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Zero for an unknown id: not playing is a normal state.
    pub async fn current_playback_position(&self, id: AlarmId) -> Duration {
        let (reply, rx) = oneshot::channel();
        if self.send(Message::Position { id, reply }).is_err() {
            return Duration::ZERO;
        }
        rx.await.unwrap_or(Duration::ZERO)
    }

    /// Runs one background refresh grant to completion. Returns how many
    /// alarms were re-armed.
    pub async fn background_refresh(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.send(Message::BackgroundRefresh { reply }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub fn interruption(&self, phase: InterruptionPhase) {
        let _ = self.send(Message::Interruption(phase));
    }

    /// Delivers the kill notice, if one is armed. Returns whether it was
    /// delivered.
    pub async fn terminating(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.send(Message::Terminating { reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Message::Snapshot { reply })?;
        rx.await.map_err(|_| AlarmError::EngineStopped)
    }

    /// Stops every alarm and ends the engine task.
    pub fn shutdown(&self) {
        let _ = self.send(Message::Shutdown);
    }

    fn send(&self, message: Message) -> Result<()> {
        self.queue
            .send(message)
            .map_err(|_| AlarmError::EngineStopped)
    }
}
