//! Playback lifecycle state and capability traits
//!
//! Every mixing node (sound, layer, master) carries a [`PlaybackStatus`] and
//! exposes the same guarded play/pause/stop surface through the [`Playback`]
//! trait. Transition rules live here so the three implementations cannot
//! drift apart.

use crate::error::{PlaybackError, Result};

/// Lifecycle state of a mixing node.
///
/// Initial state is `Stopped`. `Error` is terminal for a sound; a failed
/// voice emits silence and is reaped by its layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Stopped,
    Playing,
    Paused,
    Error,
}

impl PlaybackStatus {
    /// Validate a `play()` request.
    ///
    /// Returns `Ok(true)` when the transition should proceed, `Ok(false)`
    /// for an idempotent no-op, and an error for an illegal transition.
    pub(crate) fn check_play(self) -> Result<bool> {
        match self {
            PlaybackStatus::Playing => Ok(false),
            PlaybackStatus::Stopped | PlaybackStatus::Paused => Ok(true),
            PlaybackStatus::Error => Err(PlaybackError::InvalidStateTransition {
                from: self,
                to: PlaybackStatus::Playing,
            }
            .into()),
        }
    }

    /// Validate a `pause()` request.
    pub(crate) fn check_pause(self) -> Result<bool> {
        match self {
            PlaybackStatus::Paused => Ok(false),
            PlaybackStatus::Playing => Ok(true),
            PlaybackStatus::Stopped | PlaybackStatus::Error => {
                Err(PlaybackError::InvalidStateTransition {
                    from: self,
                    to: PlaybackStatus::Paused,
                }
                .into())
            }
        }
    }

    /// Validate a `stop()` request.
    pub(crate) fn check_stop(self) -> Result<bool> {
        match self {
            PlaybackStatus::Stopped => Ok(false),
            PlaybackStatus::Playing | PlaybackStatus::Paused => Ok(true),
            PlaybackStatus::Error => Err(PlaybackError::InvalidStateTransition {
                from: self,
                to: PlaybackStatus::Stopped,
            }
            .into()),
        }
    }
}

/// Guarded lifecycle control shared by sounds, layers, and the master.
///
/// Idempotent transitions succeed silently; illegal ones fail with
/// `InvalidStateTransition` and leave the state unchanged. Control
/// operations may be called from any thread and take effect on the next
/// chunk boundary.
pub trait Playback {
    /// Current lifecycle state.
    fn status(&self) -> PlaybackStatus;

    /// Begin or resume playback.
    fn play(&self) -> Result<()>;

    /// Suspend playback, keeping position.
    fn pause(&self) -> Result<()>;

    /// Stop playback and release per-episode resources.
    fn stop(&self) -> Result<()>;
}

/// Clamped volume control shared by sounds, layers, and the master.
pub trait Gain {
    /// Current volume in [0, 1].
    fn volume(&self) -> f32;

    /// Set volume; values are clamped to [0, 1].
    fn set_volume(&self, volume: f32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_transitions() {
        assert_eq!(PlaybackStatus::Stopped.check_play().unwrap(), true);
        assert_eq!(PlaybackStatus::Paused.check_play().unwrap(), true);
        assert_eq!(PlaybackStatus::Playing.check_play().unwrap(), false);
        assert!(PlaybackStatus::Error.check_play().is_err());
    }

    #[test]
    fn test_pause_transitions() {
        assert_eq!(PlaybackStatus::Playing.check_pause().unwrap(), true);
        assert_eq!(PlaybackStatus::Paused.check_pause().unwrap(), false);
        assert!(PlaybackStatus::Stopped.check_pause().is_err());
        assert!(PlaybackStatus::Error.check_pause().is_err());
    }

    #[test]
    fn test_stop_transitions() {
        assert_eq!(PlaybackStatus::Playing.check_stop().unwrap(), true);
        assert_eq!(PlaybackStatus::Paused.check_stop().unwrap(), true);
        assert_eq!(PlaybackStatus::Stopped.check_stop().unwrap(), false);
        assert!(PlaybackStatus::Error.check_stop().is_err());
    }
}
