//! Audio output ports.
//!
//! A [`PlaybackHandle`] is one output unit tied to the audio device clock.
//! The scheduler asks it to start at a device time so playback survives
//! short stalls of the task that runs the foreground timers.

use std::{sync::Arc, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub trait PlaybackHandle: Send + Sync {
    /// Current time on the device clock, measured from an arbitrary origin.
    fn device_now(&self) -> Duration;

    /// Starts playback once the device clock reaches `at`.
    fn play_at(&self, at: Duration);

    /// Starts sounding now if not already sounding.
    fn play(&self);

    fn stop(&self);

    fn set_looping(&self, looping: bool);

    fn set_volume(&self, volume: f32);

    fn volume(&self) -> f32;

    fn is_playing(&self) -> bool;

    /// Position inside the audio, zero until the first sample has played.
    fn position(&self) -> Duration;
}

/// A playable handle plus the decoded length of its audio.
#[derive(Clone)]
pub struct ResolvedAudio {
    pub handle: Arc<dyn PlaybackHandle>,
    pub duration: Duration,
}

impl std::fmt::Debug for ResolvedAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedAudio")
            .field("duration", &self.duration)
            .finish_non_exhaustive()
    }
}

pub trait AudioAssetResolver: Send + Sync {
    /// Maps an alarm's audio reference to a paused, ready handle.
    fn resolve(&self, reference: &str) -> Result<ResolvedAudio>;

    /// An inaudible endless stream, used to keep the process alive.
    fn open_silence(&self) -> Result<Arc<dyn PlaybackHandle>>;
}

/// Ramps `handle` linearly from its current volume to `target` over `fade`.
///
/// Every step writes a volume that is at least the previous one when ramping
/// up, and the last write is exactly `target`. Returns early, without the
/// final write, if `cancel` fires.
pub async fn fade_volume(
    handle: Arc<dyn PlaybackHandle>,
    target: f32,
    fade: Duration,
    step: Duration,
    cancel: CancellationToken,
) {
    let start_volume = handle.volume();
    let started = Instant::now();
    let mut ticker = tokio::time::interval(step);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let elapsed = started.elapsed();
        if elapsed >= fade {
            break;
        }
        let progress = elapsed.as_secs_f32() / fade.as_secs_f32();
        handle.set_volume((target - start_volume).mul_add(progress, start_volume));
    }
    handle.set_volume(target);
}
