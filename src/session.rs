//! Audio session and device actuation port.

use std::sync::Mutex;

use crate::error::{AlarmError, Result};

/// How alarm audio coexists with other applications' audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Play alongside other audio untouched.
    #[default]
    MixWithOthers,
    /// Attenuate, not silence, other audio while we sound.
    DuckOthers,
}

/// Phases of an audio session interruption (a phone call, another app
/// grabbing the output).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionPhase {
    Began,
    Ended,
}

pub trait AudioSession: Send + Sync {
    fn set_mode(&self, mode: SessionMode) -> Result<()>;

    /// The device output volume in `[0, 1]`.
    fn system_volume(&self) -> Result<f32>;

    fn set_system_volume(&self, volume: f32) -> Result<()>;

    fn vibration_supported(&self) -> bool;

    /// One vibration pulse.
    fn vibrate(&self);
}

/// Session for desktop hosts: there is no shared session to configure and no
/// vibration motor, so mode switches are logged and the output volume is
/// tracked in process.
#[derive(Debug)]
pub struct DesktopSession {
    mode: Mutex<SessionMode>,
    volume: Mutex<f32>,
}

impl DesktopSession {
    #[must_use]
    pub const fn new(volume: f32) -> Self {
        Self {
            mode: Mutex::new(SessionMode::MixWithOthers),
            volume: Mutex::new(volume),
        }
    }

    #[must_use]
    pub fn mode(&self) -> SessionMode {
        *self.mode.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for DesktopSession {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl AudioSession for DesktopSession {
    fn set_mode(&self, mode: SessionMode) -> Result<()> {
        let mut current = self.mode.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if *current != mode {
            log::debug!("audio session mode {:?} -> {mode:?}", *current);
            *current = mode;
        }
        Ok(())
    }

    fn system_volume(&self) -> Result<f32> {
        Ok(*self.volume.lock().unwrap_or_else(std::sync::PoisonError::into_inner))
    }

    fn set_system_volume(&self, volume: f32) -> Result<()> {
        if !volume.is_finite() {
            return Err(AlarmError::Volume(format!("{volume} is not a volume level")));
        }
        let volume = volume.clamp(0.0, 1.0);
        log::info!("system volume set to {volume}");
        *self.volume.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = volume;
        Ok(())
    }

    fn vibration_supported(&self) -> bool {
        false
    }

    fn vibrate(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desktop_session_tracks_volume_and_mode() {
        let session = DesktopSession::new(0.4);
        assert!((session.system_volume().unwrap() - 0.4).abs() < f32::EPSILON);
        session.set_system_volume(1.5).unwrap();
        assert!((session.system_volume().unwrap() - 1.0).abs() < f32::EPSILON);

        session.set_mode(SessionMode::DuckOthers).unwrap();
        assert_eq!(session.mode(), SessionMode::DuckOthers);
        assert!(!session.vibration_supported());
    }

    #[test]
    fn non_finite_volume_is_rejected() {
        let session = DesktopSession::new(0.4);
        assert!(matches!(
            session.set_system_volume(f32::NAN),
            Err(AlarmError::Volume(_))
        ));
        assert!((session.system_volume().unwrap() - 0.4).abs() < f32::EPSILON);
    }
}
