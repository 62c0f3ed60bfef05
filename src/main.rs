pub mod config;
pub mod game;
pub mod haptics;

use crate::config::GameConfig;
use crate::game::GameHandle;
use crate::haptics::{Haptics, LogHaptics};
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = GameConfig::load_or_default();
    config
        .validate()
        .map_err(|e| eyre!("Refusing to start: {}", e))?;

    let haptics: Arc<dyn Haptics> = Arc::new(LogHaptics);

    info!("Starting game engine");
    let mut game = GameHandle::spawn(config, haptics)
        .map_err(|e| eyre!("Failed to spawn game engine: {}", e))?;

    // Log every mode transition so a terminal run is observable
    let mut mode_rx = game.subscribe();
    tokio::spawn(async move {
        while mode_rx.changed().await.is_ok() {
            info!("Game mode: {:?}", *mode_rx.borrow());
        }
    });

    info!("Press Enter to tap, Ctrl-D to quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(_line) = lines.next_line().await? {
        game.tap_down().await?;
    }

    info!("Input closed, shutting down");
    game.shutdown().await?;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
