//! Game subsystem for the tap-rhythm memory game
//!
//! Implements one round of play end to end:
//!
//! 1. [`pattern`] - Random pattern generation and tolerance comparison
//! 2. [`player`] - Haptic playback of the target pattern
//! 3. [`engine`] - The state machine actor and its public handle
//!
//! # Architecture
//!
//! ```text
//! TapDown ──► GameEngine ──► Haptics
//!   (mpsc)        │  ▲
//!                 ▼  │ PlaybackComplete / FeedbackDue / ResetDue
//!            PatternPlayer + one-shot timers
//! ```
//!
//! The engine task is the single owner of all round state; playback and the
//! delayed feedback/reset callbacks report back over the same event channel
//! that carries taps.

pub mod engine;
pub mod pattern;
pub mod player;

pub use engine::{GameError, GameEvent, GameHandle, GameMode};
pub use pattern::Pattern;
pub use player::{PlayerError, PlayerHandle};
