//! Inaudible looping playback held while any alarm is pending.
//!
//! An active audio session makes the OS defer suspending the process, which
//! gives pending alarms a chance to reach their device clock start.

use std::sync::Arc;

use crate::{
    playback::{AudioAssetResolver, PlaybackHandle},
    registry::AlarmRegistry,
    session::InterruptionPhase,
};

pub struct KeepAliveLoop {
    resolver: Arc<dyn AudioAssetResolver>,
    volume: f32,
    player: Option<Arc<dyn PlaybackHandle>>,
    participants: usize,
}

impl KeepAliveLoop {
    #[must_use]
    pub fn new(resolver: Arc<dyn AudioAssetResolver>, volume: f32) -> Self {
        Self {
            resolver,
            volume,
            player: None,
            participants: 0,
        }
    }

    /// Matches the loop to the registry: running iff at least one alarm is
    /// registered.
    pub fn sync(&mut self, registry: &AlarmRegistry) {
        self.participants = registry.values().filter(|s| s.keep_alive_participant()).count();
        if self.participants == 0 {
            self.stop();
        } else if self.player.is_none() {
            self.start();
        }
    }

    #[must_use]
    pub const fn participants(&self) -> usize {
        self.participants
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.player.is_some()
    }

    /// Restarts the loop if something paused it.
    pub fn resume(&self) {
        if let Some(player) = &self.player {
            player.play();
        }
    }

    /// Both edges resume: pausing on `Began` could let the OS suspend the
    /// process before an alarm is due.
    pub fn on_interruption(&self, phase: InterruptionPhase) {
        log::info!("interruption {phase:?}, resuming keep-alive");
        self.resume();
    }

    fn start(&mut self) {
        match self.resolver.open_silence() {
            Ok(player) => {
                player.set_looping(true);
                player.set_volume(self.volume);
                player.play();
                self.player = Some(player);
                log::info!("keep-alive started");
            }
            Err(e) => log::error!("could not create and play keep-alive audio: {e}"),
        }
    }

    fn stop(&mut self) {
        if let Some(player) = self.player.take() {
            player.stop();
            log::info!("keep-alive stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{alarm_state, Event, MockResolver, Recorder, SILENCE};

    #[tokio::test]
    async fn follows_registry_size() {
        let recorder = Recorder::default();
        let resolver = Arc::new(MockResolver::new(recorder.clone(), Duration::from_secs(1)));
        let mut keep_alive = KeepAliveLoop::new(resolver, 0.1);
        let mut registry = AlarmRegistry::new();

        keep_alive.sync(&registry);
        assert!(!keep_alive.is_running());

        registry.insert(1, alarm_state(1, &recorder));
        registry.insert(2, alarm_state(2, &recorder));
        keep_alive.sync(&registry);
        assert!(keep_alive.is_running());
        assert_eq!(keep_alive.participants(), 2);

        registry.remove(1);
        keep_alive.sync(&registry);
        assert!(keep_alive.is_running());
        assert_eq!(keep_alive.participants(), 1);

        registry.remove(2);
        keep_alive.sync(&registry);
        assert!(!keep_alive.is_running());
        assert_eq!(keep_alive.participants(), 0);

        let silence = recorder.events_for(SILENCE);
        assert_eq!(
            silence,
            vec![
                Event::Looping(SILENCE.to_string(), true),
                Event::Volume(SILENCE.to_string(), 0.1),
                Event::Play(SILENCE.to_string()),
                Event::Stop(SILENCE.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn interruptions_resume_on_both_edges() {
        let recorder = Recorder::default();
        let resolver = Arc::new(MockResolver::new(recorder.clone(), Duration::from_secs(1)));
        let mut keep_alive = KeepAliveLoop::new(resolver, 0.1);
        let mut registry = AlarmRegistry::new();
        registry.insert(1, alarm_state(1, &recorder));
        keep_alive.sync(&registry);

        keep_alive.on_interruption(InterruptionPhase::Began);
        keep_alive.on_interruption(InterruptionPhase::Ended);

        let plays = recorder
            .events_for(SILENCE)
            .into_iter()
            .filter(|e| matches!(e, Event::Play(_)))
            .count();
        assert_eq!(plays, 3);
    }
}
