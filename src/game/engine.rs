//! Game engine actor
//!
//! Single owner of all mutable game state. Every stimulus arrives as a
//! [`GameEvent`] on one mpsc channel: tap-downs from the input side, playback
//! completion from the pattern player, and the delayed feedback/reset timers.
//! Because the engine task is the only writer, no locks are needed on the
//! round state.
//!
//! Each round carries an id; playback completions and timer events are tagged
//! with it and dropped when stale, so a callback from an old round can never
//! mutate a newer one.

use crate::config::GameConfig;
use crate::game::pattern::Pattern;
use crate::game::player::PlayerHandle;
use crate::haptics::Haptics;
use chrono::{DateTime, Local};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

/// Current phase of the game.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum GameMode {
    /// Ready; the next tap starts a round
    #[default]
    Idle,
    /// Target pattern is being played back; taps are ignored
    Playing,
    /// Playback done; the next tap starts recording
    AwaitingFirstInput,
    /// Taps are being recorded against the target pattern
    RecordingInput,
}

/// Stimuli the engine reacts to.
#[derive(Debug, Clone)]
pub enum GameEvent {
    /// Finger-down on the play surface (all other pointer events are ignored
    /// upstream)
    TapDown { at: DateTime<Local> },
    /// The pattern player finished its sequence and settle delay
    PlaybackComplete { round: u64 },
    /// Feedback delay elapsed after evaluation
    FeedbackDue { round: u64, success: bool },
    /// Reset delay elapsed after evaluation
    ResetDue { round: u64 },
}

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Thread error: {0}")]
    ThreadError(String),
}

/// The state machine itself. Owned exclusively by the engine task; tests may
/// drive it directly through [`GameEngine::handle_event`].
pub(crate) struct GameEngine {
    config: GameConfig,
    haptics: Arc<dyn Haptics>,
    /// Clone of the engine's own inbox, handed to playback and timer tasks
    events_tx: mpsc::Sender<GameEvent>,
    mode_tx: watch::Sender<GameMode>,
    mode: GameMode,
    round: u64,
    target: Option<Pattern>,
    user: Vec<u64>,
    touch_index: usize,
    last_touch: Option<DateTime<Local>>,
    playback: Option<PlayerHandle>,
}

impl GameEngine {
    pub(crate) fn new(
        config: GameConfig,
        haptics: Arc<dyn Haptics>,
        events_tx: mpsc::Sender<GameEvent>,
        mode_tx: watch::Sender<GameMode>,
    ) -> Self {
        Self {
            config,
            haptics,
            events_tx,
            mode_tx,
            mode: GameMode::Idle,
            round: 0,
            target: None,
            user: Vec::new(),
            touch_index: 0,
            last_touch: None,
            playback: None,
        }
    }

    pub(crate) fn handle_event(&mut self, event: GameEvent) {
        match event {
            GameEvent::TapDown { at } => self.on_tap_down(at),
            GameEvent::PlaybackComplete { round } => self.on_playback_complete(round),
            GameEvent::FeedbackDue { round, success } => self.on_feedback_due(round, success),
            GameEvent::ResetDue { round } => self.on_reset_due(round),
        }
    }

    fn set_mode(&mut self, mode: GameMode) {
        debug!("Mode transition: {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        self.mode_tx.send_replace(mode);
    }

    fn on_tap_down(&mut self, at: DateTime<Local>) {
        match self.mode {
            GameMode::Idle => self.start_round(),
            GameMode::Playing => {
                debug!("Tap during playback ignored");
            }
            GameMode::AwaitingFirstInput => self.begin_recording(at),
            GameMode::RecordingInput => self.record_tap(at),
        }
    }

    /// Idle tap: new round id, fresh target, playback task.
    fn start_round(&mut self) {
        self.round += 1;

        // A live player from an earlier round would feed us stale pulses
        if let Some(playback) = self.playback.take() {
            if !playback.is_finished() {
                warn!("Round {}: cancelling leftover playback task", self.round);
            }
            playback.cancel();
        }

        let mut rng = rand::thread_rng();
        let target = Pattern::generate(
            &self.config.pattern.sizes,
            &self.config.pattern.gaps_ms,
            &mut rng,
        );
        info!(
            "Round {}: starting with a {}-pulse pattern",
            self.round,
            target.len()
        );

        self.target = Some(target.clone());
        self.set_mode(GameMode::Playing);

        self.playback = Some(PlayerHandle::spawn(
            target,
            self.haptics.clone(),
            self.events_tx.clone(),
            self.round,
            self.config.timing.preroll_ms,
            self.config.timing.settle_ms,
        ));
    }

    fn on_playback_complete(&mut self, round: u64) {
        if round != self.round {
            debug!(
                "Dropping stale playback completion for round {} (current {})",
                round, self.round
            );
            return;
        }
        if self.mode != GameMode::Playing {
            warn!(
                "Playback completion in mode {:?} ignored for round {}",
                self.mode, round
            );
            return;
        }

        info!("Round {}: playback done, awaiting input", round);
        self.set_mode(GameMode::AwaitingFirstInput);
    }

    /// First tap after playback: open slot 0 and start the clock.
    fn begin_recording(&mut self, at: DateTime<Local>) {
        let len = match &self.target {
            Some(target) => target.len(),
            None => {
                error!("Awaiting input without a target pattern, resetting");
                self.reset_round_state();
                return;
            }
        };

        self.haptics.pulse();
        self.user = vec![0; len];
        self.touch_index = 0;
        self.last_touch = Some(at);
        self.set_mode(GameMode::RecordingInput);
        debug!("Round {}: recording started ({} slots)", self.round, len);
    }

    /// Every tap after the first while recording.
    fn record_tap(&mut self, at: DateTime<Local>) {
        let len = match &self.target {
            Some(target) => target.len(),
            None => {
                error!("Recording without a target pattern, resetting");
                self.reset_round_state();
                return;
            }
        };

        // Taps past the last slot are a no-op, including the whole
        // post-evaluation window until the reset timer fires
        if self.touch_index + 1 >= len {
            debug!("Round {}: tap past pattern length ignored", self.round);
            return;
        }

        self.haptics.pulse();
        self.touch_index += 1;

        let delta_ms = match self.last_touch {
            // Clock skew can make the delta negative; clamp to 0
            Some(prev) => (at - prev).num_milliseconds().max(0) as u64,
            None => 0,
        };
        self.user[self.touch_index] = delta_ms;
        self.last_touch = Some(at);
        debug!(
            "Round {}: slot {} recorded at {}ms",
            self.round, self.touch_index, delta_ms
        );

        if self.touch_index == len - 1 {
            self.evaluate();
        }
    }

    /// Compares the filled user pattern against the target and schedules the
    /// feedback and reset timers.
    fn evaluate(&mut self) {
        let target = match &self.target {
            Some(target) => target,
            None => {
                error!("Evaluation without a target pattern, resetting");
                self.reset_round_state();
                return;
            }
        };

        let success = target.matches_within(&self.user, self.config.pattern.tolerance_ms);
        info!(
            "Round {}: {} (target {:?}, input {:?})",
            self.round,
            if success { "matched" } else { "missed" },
            target.delays(),
            self.user
        );

        let round = self.round;
        self.schedule_after(
            self.config.timing.feedback_delay_ms,
            GameEvent::FeedbackDue { round, success },
        );
        self.schedule_after(
            self.config.timing.reset_delay_ms,
            GameEvent::ResetDue { round },
        );
    }

    fn on_feedback_due(&mut self, round: u64, success: bool) {
        if round != self.round {
            debug!(
                "Dropping stale feedback for round {} (current {})",
                round, self.round
            );
            return;
        }

        if success {
            self.haptics.double_click();
        } else {
            self.haptics.buzz(
                self.config.feedback.fail_buzz_ms,
                self.config.feedback.fail_buzz_intensity,
            );
        }
    }

    fn on_reset_due(&mut self, round: u64) {
        if round != self.round {
            debug!(
                "Dropping stale reset for round {} (current {})",
                round, self.round
            );
            return;
        }

        info!("Round {}: over, ready for the next tap", round);
        self.reset_round_state();
    }

    fn reset_round_state(&mut self) {
        self.target = None;
        self.user.clear();
        self.touch_index = 0;
        self.last_touch = None;
        self.playback = None;
        self.set_mode(GameMode::Idle);
    }

    /// One-shot timer: sleep, then send the event back into the inbox.
    fn schedule_after(&self, delay_ms: u64, event: GameEvent) {
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(delay_ms)).await;
            if events_tx.send(event).await.is_err() {
                debug!("Engine gone before a delayed event could fire");
            }
        });
    }

    pub(crate) fn abort_playback(&mut self) {
        if let Some(playback) = self.playback.take() {
            playback.cancel();
        }
    }
}

/// Public handle for the game engine task.
///
/// Spawns the engine, feeds it taps, exposes the current mode through a watch
/// channel, and shuts it down gracefully.
pub struct GameHandle {
    events_tx: mpsc::Sender<GameEvent>,
    mode_rx: watch::Receiver<GameMode>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<JoinHandle<Result<(), GameError>>>,
}

impl GameHandle {
    /// Validates the config and spawns the engine task.
    pub fn spawn(config: GameConfig, haptics: Arc<dyn Haptics>) -> Result<Self, GameError> {
        info!("Initializing game engine");
        config
            .validate()
            .map_err(|e| GameError::InitializationError(e.to_string()))?;

        let (events_tx, events_rx) = mpsc::channel(100);
        let (mode_tx, mode_rx) = watch::channel(GameMode::Idle);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let engine = GameEngine::new(config, haptics, events_tx.clone(), mode_tx);

        let task_handle = tokio::spawn(async move {
            info!("Game engine task started");
            let result = run_engine_loop(engine, events_rx, shutdown_rx).await;
            if let Err(ref e) = result {
                error!("Game engine task terminated with error: {}", e);
            }
            result
        });

        info!("Game engine spawned successfully");
        Ok(Self {
            events_tx,
            mode_rx,
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(task_handle),
        })
    }

    /// Tap-down stamped with the current wall clock.
    pub async fn tap_down(&self) -> Result<(), GameError> {
        self.tap_down_at(Local::now()).await
    }

    /// Tap-down with an explicit timestamp (input sources stamp events at the
    /// moment they observe them).
    pub async fn tap_down_at(&self, at: DateTime<Local>) -> Result<(), GameError> {
        self.events_tx
            .send(GameEvent::TapDown { at })
            .await
            .map_err(|e| GameError::ChannelError(format!("Failed to send tap: {}", e)))
    }

    /// Receiver for mode transitions.
    pub fn subscribe(&self) -> watch::Receiver<GameMode> {
        self.mode_rx.clone()
    }

    /// Gracefully shuts down the engine and waits for task completion.
    pub async fn shutdown(&mut self) -> Result<(), GameError> {
        debug!("Sending shutdown signal to game engine");

        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(()).is_err() {
                warn!("Engine task already terminated");
            }
        }

        if let Some(handle) = self.task_handle.take() {
            match handle.await {
                Ok(result) => {
                    debug!("Engine task completed");
                    result
                }
                Err(e) => {
                    error!("Engine task panicked: {}", e);
                    Err(GameError::ThreadError(format!(
                        "Engine task panicked: {}",
                        e
                    )))
                }
            }
        } else {
            debug!("Engine already shut down");
            Ok(())
        }
    }
}

async fn run_engine_loop(
    mut engine: GameEngine,
    mut events_rx: mpsc::Receiver<GameEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> Result<(), GameError> {
    info!("Entering game engine loop");

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                info!("Shutdown signal received");
                engine.abort_playback();
                return Ok(());
            }

            event = events_rx.recv() => match event {
                Some(event) => {
                    debug!("Engine event: {:?}", event);
                    engine.handle_event(event);
                }
                None => {
                    error!("Event channel closed unexpectedly");
                    return Err(GameError::ChannelError(
                        "Event channel closed".to_string(),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::haptics::{HapticEffect, RecordingHaptics};
    use tokio::time::timeout;

    fn test_config(sizes: Vec<usize>, gaps_ms: Vec<u64>) -> GameConfig {
        let mut config = GameConfig::default();
        config.pattern.sizes = sizes;
        config.pattern.gaps_ms = gaps_ms;
        config
    }

    /// Engine wired to channels for direct, synchronous event injection.
    fn bare_engine(
        config: GameConfig,
    ) -> (GameEngine, mpsc::Receiver<GameEvent>, Arc<RecordingHaptics>) {
        let haptics = Arc::new(RecordingHaptics::default());
        let (events_tx, events_rx) = mpsc::channel(100);
        let (mode_tx, _) = watch::channel(GameMode::Idle);
        let engine = GameEngine::new(config, haptics.clone(), events_tx, mode_tx);
        (engine, events_rx, haptics)
    }

    async fn wait_for_mode(rx: &mut watch::Receiver<GameMode>, want: GameMode) {
        timeout(Duration::from_secs(30), async {
            loop {
                if *rx.borrow_and_update() == want {
                    return;
                }
                rx.changed().await.expect("mode channel closed");
            }
        })
        .await
        .unwrap_or_else(|_| panic!("never reached mode {:?}", want));
    }

    #[test]
    fn stale_playback_completion_is_dropped() {
        let (mut engine, _events_rx, _haptics) = bare_engine(GameConfig::default());

        engine.handle_event(GameEvent::PlaybackComplete { round: 7 });

        assert_eq!(engine.mode, GameMode::Idle);
    }

    #[test]
    fn stale_feedback_and_reset_are_dropped() {
        let (mut engine, _events_rx, haptics) = bare_engine(GameConfig::default());
        engine.round = 3;
        engine.mode = GameMode::RecordingInput;

        engine.handle_event(GameEvent::FeedbackDue {
            round: 2,
            success: true,
        });
        engine.handle_event(GameEvent::ResetDue { round: 2 });

        assert!(haptics.effects().is_empty());
        assert_eq!(engine.mode, GameMode::RecordingInput);
    }

    #[test]
    fn taps_during_playback_change_nothing() {
        let (mut engine, _events_rx, haptics) = bare_engine(GameConfig::default());
        engine.round = 1;
        engine.mode = GameMode::Playing;
        engine.target = Some(Pattern::from_delays(vec![0, 500]));

        engine.handle_event(GameEvent::TapDown { at: Local::now() });
        engine.handle_event(GameEvent::TapDown { at: Local::now() });

        assert_eq!(engine.mode, GameMode::Playing);
        assert!(engine.user.is_empty());
        assert!(haptics.effects().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn records_tap_deltas_against_the_target() {
        let (mut engine, _events_rx, haptics) = bare_engine(GameConfig::default());
        engine.round = 1;
        engine.mode = GameMode::AwaitingFirstInput;
        engine.target = Some(Pattern::from_delays(vec![0, 500, 750]));

        let t0 = Local::now();
        engine.handle_event(GameEvent::TapDown { at: t0 });
        engine.handle_event(GameEvent::TapDown {
            at: t0 + chrono::Duration::milliseconds(480),
        });
        engine.handle_event(GameEvent::TapDown {
            at: t0 + chrono::Duration::milliseconds(480 + 820),
        });

        assert_eq!(engine.user, vec![0, 480, 820]);
        assert_eq!(engine.touch_index, 2);
        assert_eq!(haptics.pulse_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn extra_taps_past_the_last_slot_are_ignored() {
        let (mut engine, _events_rx, haptics) = bare_engine(GameConfig::default());
        engine.round = 1;
        engine.mode = GameMode::AwaitingFirstInput;
        engine.target = Some(Pattern::from_delays(vec![0, 250]));

        let t0 = Local::now();
        engine.handle_event(GameEvent::TapDown { at: t0 });
        engine.handle_event(GameEvent::TapDown {
            at: t0 + chrono::Duration::milliseconds(250),
        });
        let recorded = engine.user.clone();

        // Still RecordingInput until the reset timer fires; these must no-op
        for extra in 1..=3 {
            engine.handle_event(GameEvent::TapDown {
                at: t0 + chrono::Duration::milliseconds(250 + extra * 100),
            });
        }

        assert_eq!(engine.mode, GameMode::RecordingInput);
        assert_eq!(engine.user, recorded);
        assert_eq!(haptics.pulse_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn negative_clock_skew_clamps_to_zero() {
        let (mut engine, _events_rx, _haptics) = bare_engine(GameConfig::default());
        engine.round = 1;
        engine.mode = GameMode::AwaitingFirstInput;
        engine.target = Some(Pattern::from_delays(vec![0, 250]));

        let t0 = Local::now();
        engine.handle_event(GameEvent::TapDown { at: t0 });
        engine.handle_event(GameEvent::TapDown {
            at: t0 - chrono::Duration::milliseconds(50),
        });

        assert_eq!(engine.user, vec![0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn full_round_trip_success() {
        // One possible pattern only: [0, 250]
        let config = test_config(vec![2], vec![250]);
        let haptics = Arc::new(RecordingHaptics::default());
        let mut game = GameHandle::spawn(config, haptics.clone()).unwrap();
        let mut mode_rx = game.subscribe();

        game.tap_down().await.unwrap();
        wait_for_mode(&mut mode_rx, GameMode::Playing).await;
        wait_for_mode(&mut mode_rx, GameMode::AwaitingFirstInput).await;
        // Playback fired exactly the pattern's pulses
        assert_eq!(haptics.pulse_count(), 2);

        let t0 = Local::now();
        game.tap_down_at(t0).await.unwrap();
        wait_for_mode(&mut mode_rx, GameMode::RecordingInput).await;
        game.tap_down_at(t0 + chrono::Duration::milliseconds(250))
            .await
            .unwrap();

        wait_for_mode(&mut mode_rx, GameMode::Idle).await;

        let effects = haptics.effects();
        assert!(effects.contains(&HapticEffect::DoubleClick));
        assert!(!effects
            .iter()
            .any(|e| matches!(e, HapticEffect::Buzz { .. })));

        game.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn full_round_trip_failure_buzzes() {
        let config = test_config(vec![2], vec![250]);
        let haptics = Arc::new(RecordingHaptics::default());
        let mut game = GameHandle::spawn(config, haptics.clone()).unwrap();
        let mut mode_rx = game.subscribe();

        game.tap_down().await.unwrap();
        wait_for_mode(&mut mode_rx, GameMode::AwaitingFirstInput).await;

        // 600ms off a 250ms gap is far outside the 100ms tolerance
        let t0 = Local::now();
        game.tap_down_at(t0).await.unwrap();
        game.tap_down_at(t0 + chrono::Duration::milliseconds(850))
            .await
            .unwrap();

        wait_for_mode(&mut mode_rx, GameMode::Idle).await;

        let effects = haptics.effects();
        assert!(effects.contains(&HapticEffect::Buzz {
            duration_ms: 750,
            intensity: 25
        }));
        assert!(!effects.contains(&HapticEffect::DoubleClick));

        game.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn second_round_starts_clean_after_reset() {
        let config = test_config(vec![2], vec![250]);
        let haptics = Arc::new(RecordingHaptics::default());
        let mut game = GameHandle::spawn(config, haptics.clone()).unwrap();
        let mut mode_rx = game.subscribe();

        for _ in 0..2 {
            game.tap_down().await.unwrap();
            wait_for_mode(&mut mode_rx, GameMode::AwaitingFirstInput).await;

            let t0 = Local::now();
            game.tap_down_at(t0).await.unwrap();
            game.tap_down_at(t0 + chrono::Duration::milliseconds(250))
                .await
                .unwrap();
            wait_for_mode(&mut mode_rx, GameMode::Idle).await;
        }

        // Two full rounds: 2 playback + 2 input pulses each, one success
        // double-click each
        assert_eq!(haptics.pulse_count(), 8);
        assert_eq!(
            haptics
                .effects()
                .iter()
                .filter(|e| **e == HapticEffect::DoubleClick)
                .count(),
            2
        );

        game.shutdown().await.unwrap();
    }
}
