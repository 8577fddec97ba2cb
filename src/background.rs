//! Cooperation with the OS's periodic background execution grants.
//!
//! Foreground timers do not run while the process is suspended. Each grant
//! re-arms every pending alarm from its stored trigger instant, so the fire
//! that eventually happens still carries the token the registry expects.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    error::{AlarmError, Result},
    keep_alive::KeepAliveLoop,
    registry::AlarmRegistry,
    scheduler::TriggerScheduler,
};

/// The OS facility that grants background refresh windows.
pub trait BackgroundTaskScheduler: Send + Sync {
    /// False on platforms or OS versions without background refresh.
    fn is_available(&self) -> bool;

    /// Requests the next grant, no earlier than `earliest_begin` from now.
    /// Replaces a request already pending under `identifier`.
    fn submit(&self, identifier: &str, earliest_begin: Duration) -> Result<()>;

    fn cancel(&self, identifier: &str);
}

pub struct BackgroundRefreshCoordinator {
    tasks: Arc<dyn BackgroundTaskScheduler>,
    identifier: String,
    interval: Duration,
    pending: bool,
}

impl BackgroundRefreshCoordinator {
    #[must_use]
    pub fn new(
        tasks: Arc<dyn BackgroundTaskScheduler>,
        identifier: impl Into<String>,
        interval: Duration,
    ) -> Self {
        let identifier = identifier.into();
        if !tasks.is_available() {
            log::warn!("background refresh not available, alarms rely on foreground timers only");
        }
        Self {
            tasks,
            identifier,
            interval,
            pending: false,
        }
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending
    }

    /// Holds a standing request while alarms are registered and drops it
    /// once none are.
    pub fn sync(&mut self, registry: &AlarmRegistry) {
        if registry.is_empty() {
            self.cancel();
        } else if !self.pending {
            self.request_next();
        }
    }

    /// Handles one grant. Returns how many alarms were re-armed.
    pub fn refresh(
        &mut self,
        registry: &mut AlarmRegistry,
        scheduler: &TriggerScheduler,
        keep_alive: &KeepAliveLoop,
    ) -> usize {
        // the grant consumed the standing request
        self.pending = false;
        if registry.is_empty() {
            self.cancel();
            return 0;
        }
        scheduler.duck_others();
        keep_alive.resume();
        let rearmed = scheduler.rearm(registry);
        self.request_next();
        rearmed
    }

    fn request_next(&mut self) {
        if !self.tasks.is_available() {
            log::debug!("background refresh not available, not scheduling app refresh");
            return;
        }
        match self.tasks.submit(&self.identifier, self.interval) {
            Ok(()) => self.pending = true,
            Err(e) => log::warn!("{e}"),
        }
    }

    fn cancel(&mut self) {
        if self.tasks.is_available() {
            self.tasks.cancel(&self.identifier);
        }
        self.pending = false;
    }
}

/// A refresh window handed out by [`TokioBackgroundTasks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundGrant {
    pub identifier: String,
}

/// Desktop stand-in for the OS task scheduler: grants arrive on a channel
/// once the requested delay has passed. Whoever owns the receiver forwards
/// them to [`crate::plugin::AlarmPlugin::background_refresh`].
#[derive(Debug)]
pub struct TokioBackgroundTasks {
    grants: mpsc::UnboundedSender<BackgroundGrant>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl TokioBackgroundTasks {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BackgroundGrant>) {
        let (grants, rx) = mpsc::unbounded_channel();
        (
            Self {
                grants,
                pending: Mutex::new(None),
            },
            rx,
        )
    }

    fn replace(&self, task: Option<JoinHandle<()>>) {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(previous) = std::mem::replace(&mut *pending, task) {
            previous.abort();
        }
    }
}

impl BackgroundTaskScheduler for TokioBackgroundTasks {
    fn is_available(&self) -> bool {
        true
    }

    fn submit(&self, identifier: &str, earliest_begin: Duration) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AlarmError::Background(e.to_string()))?;
        let grants = self.grants.clone();
        let grant = BackgroundGrant {
            identifier: identifier.to_string(),
        };
        self.replace(Some(runtime.spawn(async move {
            tokio::time::sleep(earliest_begin).await;
            let _ = grants.send(grant);
        })));
        Ok(())
    }

    fn cancel(&self, _identifier: &str) {
        self.replace(None);
    }
}
