//! Local notification port.

use std::{collections::HashMap, sync::Mutex, time::Duration};

use tokio::task::JoinHandle;

use crate::{
    alarm::AlarmId,
    error::{AlarmError, Result},
};

/// A live-alert notification that passed the gateway contract: a delay of at
/// least one whole second and both a title and a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    pub id: AlarmId,
    pub delay: Duration,
    pub title: String,
    pub body: String,
}

impl NotificationRequest {
    #[must_use]
    pub fn new(
        id: AlarmId,
        delay: Duration,
        title: Option<&str>,
        body: Option<&str>,
    ) -> Option<Self> {
        let (Some(title), Some(body)) = (title, body) else {
            return None;
        };
        if delay < Duration::from_secs(1) {
            return None;
        }
        Some(Self {
            id,
            delay: Duration::from_secs(delay.as_secs()),
            title: title.to_string(),
            body: body.to_string(),
        })
    }

    /// Identifier the platform notification is filed under.
    #[must_use]
    pub fn identifier(&self) -> String {
        identifier(self.id)
    }
}

#[must_use]
pub fn identifier(id: AlarmId) -> String {
    format!("alarm-{id}")
}

pub trait NotificationGateway: Send + Sync {
    fn schedule(&self, request: NotificationRequest) -> Result<()>;

    fn cancel(&self, id: AlarmId);

    /// Best-effort fallback shown after the process is gone.
    fn notify_on_termination(&self, title: &str, body: &str, delay: Duration) -> Result<()>;
}

/// Desktop stand-in for the platform notification center: delivers each
/// notification to the log once its delay has elapsed.
#[derive(Debug, Default)]
pub struct DesktopNotifications {
    pending: Mutex<HashMap<AlarmId, JoinHandle<()>>>,
}

impl DesktopNotifications {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationGateway for DesktopNotifications {
    fn schedule(&self, request: NotificationRequest) -> Result<()> {
        let id = request.id;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AlarmError::Notification(e.to_string()))?;
        let task = runtime.spawn(async move {
            tokio::time::sleep(request.delay).await;
            log::info!(
                "notification {}: {}: {}",
                request.identifier(),
                request.title,
                request.body
            );
        });
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(previous) = pending.insert(id, task) {
            previous.abort();
        }
        Ok(())
    }

    fn cancel(&self, id: AlarmId) {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(task) = pending.remove(&id) {
            task.abort();
        }
    }

    fn notify_on_termination(&self, title: &str, body: &str, delay: Duration) -> Result<()> {
        log::warn!("notification on app kill in {delay:?}: {title}: {body}");
        Ok(())
    }
}
