//! Pattern playback worker
//!
//! Plays one round's target pattern through the haptic backend: wait each
//! element's delay, fire a pulse, and after the full sequence wait the settle
//! delay before reporting completion to the engine. Runs in its own tokio
//! task so tap handling never blocks on playback.
//!
//! # State Machine
//!
//! ```text
//! Armed ──► Pulsing ──► Done
//! (pre-roll) (delay+pulse per element, settle)
//! ```
//!
//! Cancellation is fatal to the round: the task stops between delays, sends
//! nothing, and the round is silently abandoned.

use crate::game::engine::GameEvent;
use crate::game::pattern::Pattern;
use crate::haptics::Haptics;
use statum::{machine, state};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Playback errors
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    /// Playback was cancelled mid-sequence; the round is abandoned
    #[error("Playback interrupted: {0}")]
    Interrupted(String),

    /// The engine's event channel went away
    #[error("Channel error: {0}")]
    ChannelError(String),
}

/// States for the playback lifecycle using statum
#[state]
#[derive(Debug, Clone)]
pub enum PlaybackState {
    Armed,   // Created, waiting out the pre-roll
    Pulsing, // Emitting the delay/pulse sequence
    Done,    // Sequence and settle delay finished
}

/// Per-round playback machine with compile-time state safety.
#[machine]
pub struct PatternPlayer<S: PlaybackState> {
    pattern: Pattern,
    haptics: Arc<dyn Haptics>,
    events_tx: mpsc::Sender<GameEvent>,
    round: u64,
    preroll_ms: u64,
    settle_ms: u64,
    cancel: CancellationToken,
}

impl<S: PlaybackState> PatternPlayer<S> {
    /// Sleeps for `delay_ms` unless cancelled first.
    async fn wait(&self, delay_ms: u64) -> Result<(), PlayerError> {
        tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(PlayerError::Interrupted(format!(
                    "round {} cancelled during a {}ms delay",
                    self.round, delay_ms
                )))
            }
            _ = sleep(Duration::from_millis(delay_ms)) => Ok(()),
        }
    }
}

impl PatternPlayer<Armed> {
    pub fn create(
        pattern: Pattern,
        haptics: Arc<dyn Haptics>,
        events_tx: mpsc::Sender<GameEvent>,
        round: u64,
        preroll_ms: u64,
        settle_ms: u64,
        cancel: CancellationToken,
    ) -> Self {
        debug!(
            "Creating pattern player for round {} ({} pulses)",
            round,
            pattern.len()
        );
        Self::new(
            pattern, haptics, events_tx, round, preroll_ms, settle_ms, cancel,
        )
    }

    /// Waits out the pre-roll and transitions to Pulsing.
    pub async fn preroll(self) -> Result<PatternPlayer<Pulsing>, PlayerError> {
        debug!("Round {}: {}ms pre-roll", self.round, self.preroll_ms);
        self.wait(self.preroll_ms).await?;
        Ok(self.transition())
    }
}

impl PatternPlayer<Pulsing> {
    /// Runs the delay/pulse sequence plus the settle delay.
    ///
    /// The first element is always 0, so the first pulse fires immediately
    /// after the pre-roll.
    pub async fn play(self) -> Result<PatternPlayer<Done>, PlayerError> {
        info!(
            "Round {}: playing pattern {:?}",
            self.round,
            self.pattern.delays()
        );

        for &delay_ms in self.pattern.delays() {
            self.wait(delay_ms).await?;
            self.haptics.pulse();
        }

        debug!("Round {}: {}ms settle delay", self.round, self.settle_ms);
        self.wait(self.settle_ms).await?;

        Ok(self.transition())
    }
}

impl PatternPlayer<Done> {
    /// Reports completion back to the engine.
    pub async fn complete(self) -> Result<(), PlayerError> {
        self.events_tx
            .send(GameEvent::PlaybackComplete { round: self.round })
            .await
            .map_err(|e| {
                PlayerError::ChannelError(format!(
                    "Failed to report playback completion for round {}: {}",
                    self.round, e
                ))
            })
    }
}

/// Handle for a playback task running in the background.
///
/// Dropping the handle leaves the task running; `cancel()` stops it between
/// delays without waiting.
pub struct PlayerHandle {
    cancel: CancellationToken,
    task_handle: JoinHandle<()>,
}

impl PlayerHandle {
    /// Spawns the full Armed → Pulsing → Done lifecycle in a tokio task.
    pub fn spawn(
        pattern: Pattern,
        haptics: Arc<dyn Haptics>,
        events_tx: mpsc::Sender<GameEvent>,
        round: u64,
        preroll_ms: u64,
        settle_ms: u64,
    ) -> Self {
        let cancel = CancellationToken::new();
        let player = PatternPlayer::create(
            pattern,
            haptics,
            events_tx,
            round,
            preroll_ms,
            settle_ms,
            cancel.clone(),
        );

        let task_handle = tokio::spawn(async move {
            let result = async {
                let pulsing = player.preroll().await?;
                let done = pulsing.play().await?;
                done.complete().await
            }
            .await;

            match result {
                Ok(()) => info!("Round {} playback complete", round),
                Err(PlayerError::Interrupted(reason)) => {
                    // Round abandoned, nothing to recover
                    warn!("Playback abandoned: {}", reason);
                }
                Err(e) => error!("Playback failed: {}", e),
            }
        });

        Self {
            cancel,
            task_handle,
        }
    }

    /// Stops playback at the next delay boundary.
    pub fn cancel(&self) {
        debug!("Cancelling playback task");
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task_handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::haptics::RecordingHaptics;
    use tokio::time::timeout;

    #[tokio::test(start_paused = true)]
    async fn plays_every_pulse_then_reports_completion() {
        let haptics = Arc::new(RecordingHaptics::default());
        let (events_tx, mut events_rx) = mpsc::channel(16);

        let _handle = PlayerHandle::spawn(
            Pattern::from_delays(vec![0, 250, 1000]),
            haptics.clone(),
            events_tx,
            3,
            500,
            500,
        );

        let event = timeout(Duration::from_secs(10), events_rx.recv())
            .await
            .expect("playback did not complete")
            .expect("channel closed");

        assert!(matches!(event, GameEvent::PlaybackComplete { round: 3 }));
        assert_eq!(haptics.pulse_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_playback_sends_nothing() {
        let haptics = Arc::new(RecordingHaptics::default());
        let (events_tx, mut events_rx) = mpsc::channel(16);

        let handle = PlayerHandle::spawn(
            Pattern::from_delays(vec![0, 500]),
            haptics.clone(),
            events_tx,
            1,
            500,
            500,
        );
        handle.cancel();

        // A cancelled round reports nothing, even after all delays elapse
        let waited = timeout(Duration::from_secs(10), events_rx.recv()).await;
        assert!(waited.is_err() || waited.unwrap().is_none());
    }
}
