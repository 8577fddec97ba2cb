//! The serial work queue.
//!
//! One task owns the registry and every component that mutates it, and
//! applies [`Message`]s strictly one after another. Per id this totally
//! orders schedule, fire and stop; different ids interleave freely.

use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;

use crate::{
    alarm::Notice,
    background::{BackgroundRefreshCoordinator, BackgroundTaskScheduler},
    communication::{AlarmSummary, Message, Snapshot},
    config::Config,
    keep_alive::KeepAliveLoop,
    notification::NotificationGateway,
    playback::AudioAssetResolver,
    registry::AlarmRegistry,
    scheduler::TriggerScheduler,
    session::AudioSession,
};

/// The external collaborators the engine is wired to.
#[derive(Clone)]
pub struct Ports {
    pub resolver: Arc<dyn AudioAssetResolver>,
    pub session: Arc<dyn AudioSession>,
    pub notifications: Arc<dyn NotificationGateway>,
    pub background: Arc<dyn BackgroundTaskScheduler>,
}

pub struct Engine {
    registry: AlarmRegistry,
    scheduler: TriggerScheduler,
    keep_alive: KeepAliveLoop,
    background: BackgroundRefreshCoordinator,
    notifications: Arc<dyn NotificationGateway>,
    /// delivered if the process is terminated while alarms are pending
    kill_notice: Option<Notice>,
    kill_delay: Duration,
    queue: mpsc::UnboundedReceiver<Message>,
}

impl Engine {
    #[must_use]
    pub fn new(
        ports: Ports,
        config: &Config,
        sender: mpsc::UnboundedSender<Message>,
        queue: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        Self {
            registry: AlarmRegistry::new(),
            scheduler: TriggerScheduler::new(
                ports.resolver.clone(),
                ports.session,
                ports.notifications.clone(),
                sender,
                config.timing.clone(),
            ),
            keep_alive: KeepAliveLoop::new(ports.resolver, config.keep_alive.volume),
            background: BackgroundRefreshCoordinator::new(
                ports.background,
                config.background.task_identifier.clone(),
                config.background.interval(),
            ),
            notifications: ports.notifications,
            kill_notice: None,
            kill_delay: config.notifications.kill_delay(),
            queue,
        }
    }

    /// Drains the queue until shutdown, then stops whatever is left.
    pub async fn run(mut self) {
        while let Some(message) = self.queue.recv().await {
            if matches!(message, Message::Shutdown) {
                break;
            }
            self.handle(message);
        }
        for id in self.registry.ids() {
            self.scheduler.stop(&mut self.registry, id, false);
        }
        self.after_mutation();
        log::info!("alarm engine stopped");
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::SetAlarm { spec, reply } => {
                let kill_notice = spec.kill_notice.clone();
                let result = self.scheduler.schedule(&mut self.registry, spec);
                if result.is_ok() {
                    if let Some(notice) = kill_notice {
                        self.kill_notice = Some(notice);
                    }
                }
                self.after_mutation();
                let _ = reply.send(result);
            }
            Message::StopAlarm {
                id,
                cancel_notification,
                reply,
            } => {
                let stopped = self.scheduler.stop(&mut self.registry, id, cancel_notification);
                self.after_mutation();
                let _ = reply.send(stopped);
            }
            Message::Fire(fire) => {
                self.scheduler.fire(&mut self.registry, fire);
            }
            Message::AutoStop { id, trigger } => {
                if self.scheduler.auto_stop(&mut self.registry, id, trigger) {
                    self.after_mutation();
                }
            }
            Message::Position { id, reply } => {
                let position = self
                    .registry
                    .get(id)
                    .map_or(Duration::ZERO, |state| state.playback.position());
                let _ = reply.send(position);
            }
            Message::BackgroundRefresh { reply } => {
                let rearmed =
                    self.background
                        .refresh(&mut self.registry, &self.scheduler, &self.keep_alive);
                let _ = reply.send(rearmed);
            }
            Message::Interruption(phase) => self.keep_alive.on_interruption(phase),
            Message::Terminating { reply } => {
                let _ = reply.send(self.notify_on_termination());
            }
            Message::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Message::Shutdown => {}
        }
    }

    /// Registry size transitions drive the keep-alive, the background
    /// request and the termination observer.
    fn after_mutation(&mut self) {
        self.keep_alive.sync(&self.registry);
        self.background.sync(&self.registry);
        if self.registry.is_empty() && self.kill_notice.take().is_some() {
            log::debug!("termination observer removed");
        }
    }

    fn notify_on_termination(&mut self) -> bool {
        let Some(notice) = self.kill_notice.take() else {
            return false;
        };
        match self
            .notifications
            .notify_on_termination(&notice.title, &notice.body, self.kill_delay)
        {
            Ok(()) => {
                log::info!("trigger notification on app kill");
                true
            }
            Err(e) => {
                log::warn!("failed to show notification on kill service: {e}");
                false
            }
        }
    }

    fn snapshot(&self) -> Snapshot {
        let mut alarms: Vec<AlarmSummary> = self
            .registry
            .values()
            .map(|state| AlarmSummary {
                id: state.spec.id,
                phase: state.phase,
                due_at: state.due_at,
                vibrating: state.vibrating,
            })
            .collect();
        alarms.sort_by_key(|summary| summary.id);
        Snapshot {
            alarms,
            keep_alive_participants: self.keep_alive.participants(),
            keep_alive_running: self.keep_alive.is_running(),
            background_pending: self.background.is_pending(),
            kill_notice_armed: self.kill_notice.is_some(),
        }
    }
}
