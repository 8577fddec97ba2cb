use std::{fmt, sync::Arc, time::Duration};

use serde::Deserialize;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{error::AlarmError, playback::PlaybackHandle};

/// Caller chosen alarm identity.
pub type AlarmId = i64;

/// Title and body of a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub body: String,
}

/// Everything needed to schedule one alarm, validated once at the bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmSpec {
    pub id: AlarmId,
    pub delay: Duration,
    pub loop_audio: bool,
    pub fade_duration: Duration,
    pub vibrate: bool,
    /// system volume to force while the alarm sounds
    pub volume: Option<f32>,
    pub audio: String,
    pub notification_title: Option<String>,
    pub notification_body: Option<String>,
    /// shown if the process is killed while this alarm is pending
    pub kill_notice: Option<Notice>,
}

impl AlarmSpec {
    #[must_use]
    pub fn new(id: AlarmId, delay: Duration, audio: impl Into<String>) -> Self {
        Self {
            id,
            delay,
            loop_audio: false,
            fade_duration: Duration::ZERO,
            vibrate: false,
            volume: None,
            audio: audio.into(),
            notification_title: None,
            notification_body: None,
            kill_notice: None,
        }
    }

    #[must_use]
    pub const fn looping(mut self, loop_audio: bool) -> Self {
        self.loop_audio = loop_audio;
        self
    }

    #[must_use]
    pub const fn fade(mut self, fade_duration: Duration) -> Self {
        self.fade_duration = fade_duration;
        self
    }

    #[must_use]
    pub const fn vibrating(mut self, vibrate: bool) -> Self {
        self.vibrate = vibrate;
        self
    }

    #[must_use]
    pub const fn with_volume(mut self, volume: f32) -> Self {
        self.volume = Some(volume);
        self
    }

    #[must_use]
    pub fn with_notification(mut self, title: impl Into<String>, body: impl Into<String>) -> Self {
        self.notification_title = Some(title.into());
        self.notification_body = Some(body.into());
        self
    }

    #[must_use]
    pub fn with_kill_notice(mut self, title: impl Into<String>, body: impl Into<String>) -> Self {
        self.kill_notice = Some(Notice {
            title: title.into(),
            body: body.into(),
        });
        self
    }
}

/// Arguments of the `setAlarm` bridge call, as the host sends them.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAlarmArgs {
    pub id: AlarmId,
    pub delay_in_seconds: f64,
    pub notif_on_kill_enabled: bool,
    pub notif_title_on_app_kill: String,
    pub notif_description_on_app_kill: String,
    pub loop_audio: bool,
    pub fade_duration: f64,
    pub vibrate: bool,
    pub asset_audio: String,
    #[serde(default)]
    pub notification_title: Option<String>,
    #[serde(default)]
    pub notification_body: Option<String>,
    #[serde(default)]
    pub volume: Option<f64>,
}

/// Arguments of the bridge calls that only name an alarm.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct IdArgs {
    pub id: AlarmId,
}

fn seconds(name: &str, value: f64) -> Result<Duration, AlarmError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| AlarmError::MalformedArguments(format!("{name} must be >= 0, got {value}")))
}

impl TryFrom<SetAlarmArgs> for AlarmSpec {
    type Error = AlarmError;

    fn try_from(args: SetAlarmArgs) -> Result<Self, Self::Error> {
        let delay = seconds("delayInSeconds", args.delay_in_seconds)?;
        let fade_duration = seconds("fadeDuration", args.fade_duration)?;
        let volume = match args.volume {
            Some(v) if (0.0..=1.0).contains(&v) => {
                #[allow(clippy::cast_possible_truncation)]
                Some(v as f32)
            }
            Some(v) => {
                return Err(AlarmError::MalformedArguments(format!(
                    "volume must be within [0, 1], got {v}"
                )))
            }
            None => None,
        };
        if args.asset_audio.is_empty() {
            return Err(AlarmError::MalformedArguments(
                "assetAudio must not be empty".to_string(),
            ));
        }
        Ok(Self {
            id: args.id,
            delay,
            loop_audio: args.loop_audio,
            fade_duration,
            vibrate: args.vibrate,
            volume,
            audio: args.asset_audio,
            notification_title: args.notification_title,
            notification_body: args.notification_body,
            kill_notice: args.notif_on_kill_enabled.then(|| Notice {
                title: args.notif_title_on_app_kill,
                body: args.notif_description_on_app_kill,
            }),
        })
    }
}

/// Where an alarm is in its life.
///
/// ```text
/// Scheduled -> Armed -> Fired --(auto stop / stop)--> Stopped
///                    \-> Looping --(stop)-----------> Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmPhase {
    Scheduled,
    Armed,
    Fired,
    Looping,
    Stopped,
}

impl AlarmPhase {
    /// Fired or looping: the alarm's side effects are live.
    #[must_use]
    pub const fn is_sounding(self) -> bool {
        matches!(self, Self::Fired | Self::Looping)
    }
}

impl fmt::Display for AlarmPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Scheduled => stringify!(Scheduled),
                Self::Armed => stringify!(Armed),
                Self::Fired => stringify!(Fired),
                Self::Looping => stringify!(Looping),
                Self::Stopped => stringify!(Stopped),
            }
        )
    }
}

/// The fire action of one arming, captured when the alarm was scheduled.
///
/// It only has an effect while `token` is live and `trigger` still equals
/// the trigger instant recorded for `id`.
#[derive(Debug, Clone)]
pub struct DeferredFire {
    pub id: AlarmId,
    pub trigger: Instant,
    pub token: CancellationToken,
}

/// Live bookkeeping for one registered alarm.
pub struct AlarmState {
    pub spec: AlarmSpec,
    /// recorded once at schedule time, never recomputed
    pub trigger: Instant,
    pub due_at: chrono::DateTime<chrono::Local>,
    pub phase: AlarmPhase,
    pub playback: Arc<dyn PlaybackHandle>,
    pub audio_duration: Duration,
    pub pending_timer: Option<JoinHandle<()>>,
    /// parent of every task acting for this alarm
    pub deferred: CancellationToken,
    pub vibrating: bool,
    pub overrides_volume: bool,
}

impl AlarmState {
    #[must_use]
    pub fn deferred_fire(&self) -> DeferredFire {
        DeferredFire {
            id: self.spec.id,
            trigger: self.trigger,
            token: self.deferred.clone(),
        }
    }

    /// Always true while the entry exists.
    #[must_use]
    pub const fn keep_alive_participant(&self) -> bool {
        true
    }

    /// Cancels every pending action. Consumed timers and tokens make this a
    /// no-op.
    pub fn retire(&mut self) {
        self.deferred.cancel();
        if let Some(timer) = self.pending_timer.take() {
            timer.abort();
        }
        self.vibrating = false;
    }
}

impl fmt::Debug for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlarmState")
            .field("id", &self.spec.id)
            .field("phase", &self.phase)
            .field("due_at", &self.due_at)
            .field("vibrating", &self.vibrating)
            .field("overrides_volume", &self.overrides_volume)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: serde_json::Value) -> Result<AlarmSpec, AlarmError> {
        AlarmSpec::try_from(serde_json::from_value::<SetAlarmArgs>(value)?)
    }

    fn valid() -> serde_json::Value {
        json!({
            "id": 42,
            "delayInSeconds": 5,
            "notifOnKillEnabled": true,
            "notifTitleOnAppKill": "Closed",
            "notifDescriptionOnAppKill": "Reopen to keep your alarms",
            "loopAudio": true,
            "fadeDuration": 2.5,
            "vibrate": false,
            "assetAudio": "assets/marimba.mp3",
            "notificationTitle": "Alarm",
            "volume": 0.8
        })
    }

    #[test]
    fn decodes_host_arguments() {
        let spec = args(valid()).unwrap();
        assert_eq!(spec.id, 42);
        assert_eq!(spec.delay, Duration::from_secs(5));
        assert_eq!(spec.fade_duration, Duration::from_millis(2500));
        assert!(spec.loop_audio);
        assert_eq!(spec.notification_title.as_deref(), Some("Alarm"));
        assert_eq!(spec.notification_body, None);
        assert_eq!(
            spec.kill_notice,
            Some(Notice {
                title: "Closed".to_string(),
                body: "Reopen to keep your alarms".to_string()
            })
        );
        assert!((spec.volume.unwrap() - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn kill_notice_only_when_enabled() {
        let mut value = valid();
        value["notifOnKillEnabled"] = json!(false);
        assert_eq!(args(value).unwrap().kill_notice, None);
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let mut value = valid();
        value.as_object_mut().unwrap().remove("assetAudio");
        assert!(matches!(args(value), Err(AlarmError::MalformedArguments(_))));
    }

    #[test]
    fn mistyped_field_is_malformed() {
        let mut value = valid();
        value["loopAudio"] = json!("yes");
        assert!(matches!(args(value), Err(AlarmError::MalformedArguments(_))));
    }

    #[test]
    fn out_of_range_values_are_malformed() {
        for (field, bad) in [
            ("delayInSeconds", json!(-1.0)),
            ("fadeDuration", json!(-0.5)),
            ("volume", json!(1.5)),
        ] {
            let mut value = valid();
            value[field] = bad;
            assert!(
                matches!(args(value), Err(AlarmError::MalformedArguments(_))),
                "{field}"
            );
        }
    }
}
