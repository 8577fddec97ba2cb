//! Trigger scheduler: the per-alarm state machine.
//!
//! Every alarm is armed twice. The playback handle is told to start at a
//! device clock time, which keeps working through short stalls, and a
//! foreground timer posts a [`DeferredFire`] back onto the work queue. Only
//! the timer path drives side effects (ducking, vibration, fade, volume
//! override, auto-stop); audio starting is left to the device clock.
//!
//! A fire only proceeds if its captured trigger instant still matches the
//! registry entry, so an action armed before a stop-then-reschedule of the
//! same id can never ring the new alarm.

use std::{sync::Arc, time::Duration};

use chrono::Local;
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    alarm::{AlarmId, AlarmPhase, AlarmSpec, AlarmState, DeferredFire},
    communication::Message,
    config::Timing,
    error::{AlarmError, Result},
    notification::{NotificationGateway, NotificationRequest},
    playback::{fade_volume, AudioAssetResolver, ResolvedAudio},
    registry::AlarmRegistry,
    session::{AudioSession, SessionMode},
};

pub struct TriggerScheduler {
    resolver: Arc<dyn AudioAssetResolver>,
    session: Arc<dyn AudioSession>,
    notifications: Arc<dyn NotificationGateway>,
    queue: mpsc::UnboundedSender<Message>,
    timing: Timing,
    /// system volume from before the first live override
    previous_volume: Option<f32>,
}

impl TriggerScheduler {
    #[must_use]
    pub fn new(
        resolver: Arc<dyn AudioAssetResolver>,
        session: Arc<dyn AudioSession>,
        notifications: Arc<dyn NotificationGateway>,
        queue: mpsc::UnboundedSender<Message>,
        timing: Timing,
    ) -> Self {
        Self {
            resolver,
            session,
            notifications,
            queue,
            timing,
            previous_volume: None,
        }
    }

    #[must_use]
    pub const fn previous_volume(&self) -> Option<f32> {
        self.previous_volume
    }

    /// Registers and arms `spec`. An alarm already registered under the same
    /// id is stopped first, but only once the new audio has resolved, so a
    /// failed replacement leaves the old alarm untouched.
    pub fn schedule(&mut self, registry: &mut AlarmRegistry, spec: AlarmSpec) -> Result<()> {
        self.set_mode(SessionMode::MixWithOthers);

        let id = spec.id;
        let now = Instant::now();
        let trigger = now.checked_add(spec.delay).ok_or_else(|| {
            AlarmError::MalformedArguments(format!("delay of {:?} is too far out", spec.delay))
        })?;
        let ResolvedAudio { handle, duration } = self.resolver.resolve(&spec.audio)?;

        if registry.contains(id) {
            log::info!("alarm {id} is already set, replacing it");
            self.stop(registry, id, true);
        }

        let wall_now = Local::now();
        let due_at = chrono::Duration::from_std(spec.delay)
            .ok()
            .and_then(|delay| wall_now.checked_add_signed(delay))
            .unwrap_or(wall_now);

        handle.set_looping(spec.loop_audio);
        handle.set_volume(if spec.fade_duration.is_zero() {
            1.0
        } else {
            self.timing.fade_floor
        });
        handle.play_at(handle.device_now() + spec.delay + self.timing.fixed_slop());

        let notification = NotificationRequest::new(
            id,
            spec.delay,
            spec.notification_title.as_deref(),
            spec.notification_body.as_deref(),
        );

        let mut state = AlarmState {
            spec,
            trigger,
            due_at,
            phase: AlarmPhase::Scheduled,
            playback: handle,
            audio_duration: duration,
            pending_timer: None,
            deferred: CancellationToken::new(),
            vibrating: false,
            overrides_volume: false,
        };
        state.pending_timer = Some(self.arm_timer(state.deferred_fire()));
        state.phase = AlarmPhase::Armed;
        registry.insert(id, state);

        if let Some(request) = notification {
            if let Err(e) = self.notifications.schedule(request) {
                log::warn!("error scheduling notification for alarm {id}: {e}");
            }
        }

        log::info!(
            "alarm {id} armed for {}",
            due_at.format("%Y-%m-%d %H:%M:%S%.3f")
        );
        Ok(())
    }

    /// Spawns the foreground countdown for `fire`.
    pub fn arm_timer(&self, fire: DeferredFire) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let token = fire.token.clone();
        let trigger = fire.trigger;
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep_until(trigger) => {
                    // the engine is gone if this fails, nothing left to ring
                    let _ = queue.send(Message::Fire(fire));
                }
            }
        })
    }

    /// Runs the side effects of a due alarm. Returns false when the action is
    /// stale or the alarm already fired.
    pub fn fire(&mut self, registry: &mut AlarmRegistry, fire: DeferredFire) -> bool {
        let id = fire.id;
        if fire.token.is_cancelled() {
            log::debug!("cancelled fire for alarm {id} ignored");
            return false;
        }
        let Some(state) = registry.get_mut(id) else {
            log::debug!("fire for unknown alarm {id} ignored");
            return false;
        };
        if state.trigger != fire.trigger {
            log::debug!("stale fire for alarm {id} ignored");
            return false;
        }
        if state.phase != AlarmPhase::Armed {
            log::debug!("alarm {id} already {}, fire ignored", state.phase);
            return false;
        }
        if let Some(timer) = state.pending_timer.take() {
            timer.abort();
        }

        self.set_mode(SessionMode::DuckOthers);

        // the device clock start may have been lost to a suspension
        if !state.playback.is_playing() || state.playback.position().is_zero() {
            state.playback.play();
        }

        let effects = state.deferred.child_token();

        if state.spec.vibrate && self.session.vibration_supported() {
            state.vibrating = true;
            self.spawn_vibration(effects.clone());
        }

        let fade = state.spec.fade_duration;
        log::info!(
            "alarm {id} ringing, fade duration is {fade:?} and volume is {:?}",
            state.spec.volume
        );
        if !fade.is_zero() {
            tokio::spawn(fade_volume(
                state.playback.clone(),
                1.0,
                fade,
                self.timing.fade_step(),
                effects.clone(),
            ));
        }

        if let Some(volume) = state.spec.volume {
            state.overrides_volume = self.override_volume(volume);
        }

        if state.spec.loop_audio {
            state.phase = AlarmPhase::Looping;
        } else {
            state.phase = AlarmPhase::Fired;
            self.spawn_auto_stop(id, state.trigger, state.audio_duration, effects);
        }
        true
    }

    /// Stops a non-looping alarm at the end of its audio, unless `id` has
    /// been re-armed since.
    pub fn auto_stop(
        &mut self,
        registry: &mut AlarmRegistry,
        id: AlarmId,
        trigger: Instant,
    ) -> bool {
        if registry.get(id).is_some_and(|state| state.trigger == trigger) {
            self.stop(registry, id, false)
        } else {
            log::debug!("stale auto stop for alarm {id} ignored");
            false
        }
    }

    /// Tears down everything `id` owns. Returns false, with no side effects,
    /// if `id` is unknown.
    pub fn stop(
        &mut self,
        registry: &mut AlarmRegistry,
        id: AlarmId,
        cancel_notification: bool,
    ) -> bool {
        let Some(mut state) = registry.remove(id) else {
            log::debug!("no alarm {id} to stop");
            return false;
        };
        if cancel_notification {
            self.notifications.cancel(id);
        }
        state.retire();
        state.playback.stop();
        state.phase = AlarmPhase::Stopped;

        if !registry.values().any(|other| other.phase.is_sounding()) {
            self.set_mode(SessionMode::MixWithOthers);
        }
        if state.overrides_volume && !registry.values().any(|other| other.overrides_volume) {
            self.restore_volume();
        }
        log::info!("alarm {id} stopped");
        true
    }

    /// Re-issues the device clock start and a fresh foreground timer for every
    /// alarm still waiting to fire, keeping its original trigger instant.
    pub fn rearm(&self, registry: &mut AlarmRegistry) -> usize {
        let now = Instant::now();
        let mut rearmed = 0;
        for state in registry.values_mut() {
            if state.phase != AlarmPhase::Armed {
                continue;
            }
            let remaining = state.trigger.saturating_duration_since(now);
            log::info!("background check alarm {}, due in {remaining:?}", state.spec.id);
            state.playback.play_at(state.playback.device_now() + remaining);
            if let Some(timer) = state.pending_timer.take() {
                timer.abort();
            }
            state.pending_timer = Some(self.arm_timer(state.deferred_fire()));
            rearmed += 1;
        }
        rearmed
    }

    pub fn duck_others(&self) {
        self.set_mode(SessionMode::DuckOthers);
    }

    fn set_mode(&self, mode: SessionMode) {
        if let Err(e) = self.session.set_mode(mode) {
            log::warn!("error setting up audio session with option {mode:?}: {e}");
        }
    }

    fn override_volume(&mut self, volume: f32) -> bool {
        let previous = match self.previous_volume {
            Some(previous) => previous,
            None => match self.session.system_volume() {
                Ok(current) => current,
                Err(e) => {
                    log::warn!("{e}");
                    return false;
                }
            },
        };
        if let Err(e) = self.session.set_system_volume(volume) {
            log::warn!("{e}");
            return false;
        }
        self.previous_volume = Some(previous);
        true
    }

    fn restore_volume(&mut self) {
        if let Some(previous) = self.previous_volume.take() {
            if let Err(e) = self.session.set_system_volume(previous) {
                log::warn!("{e}");
            }
        }
    }

    fn spawn_vibration(&self, cancel: CancellationToken) {
        let session = self.session.clone();
        let mut ticker = tokio::time::interval(self.timing.vibration_interval());
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => session.vibrate(),
                }
            }
        });
    }

    fn spawn_auto_stop(
        &self,
        id: AlarmId,
        trigger: Instant,
        after: Duration,
        cancel: CancellationToken,
    ) {
        let queue = self.queue.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(after) => {
                    let _ = queue.send(Message::AutoStop { id, trigger });
                }
            }
        });
    }
}
