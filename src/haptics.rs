//! Haptic output backends
//!
//! The game engine never talks to a vibration motor directly; it drives the
//! [`Haptics`] trait. Backends are swapped at startup, so the same engine runs
//! against real hardware, a logging stub, or a recorder in tests.

use tracing::info;

/// Haptic effect sink used by the game engine and the pattern player.
///
/// Implementations must be cheap and non-blocking; the engine calls these from
/// its event loop and from the playback task.
pub trait Haptics: Send + Sync {
    /// Single short click pulse.
    fn pulse(&self);

    /// Two quick clicks, used as success feedback.
    fn double_click(&self);

    /// Sustained buzz of the given length and strength (0-255).
    fn buzz(&self, duration_ms: u64, intensity: u8);
}

/// Logging backend for headless runs.
///
/// Emits each effect through tracing instead of driving a motor.
pub struct LogHaptics;

impl Haptics for LogHaptics {
    fn pulse(&self) {
        info!("Haptic effect: pulse");
    }

    fn double_click(&self) {
        info!("Haptic effect: double click");
    }

    fn buzz(&self, duration_ms: u64, intensity: u8) {
        info!(
            "Haptic effect: buzz {}ms at intensity {}/255",
            duration_ms, intensity
        );
    }
}

#[cfg(test)]
pub use recording::{HapticEffect, RecordingHaptics};
