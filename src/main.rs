//! peakshave - Main entry point
//!
//! Reads JSON-line power and capacity messages from stdin and writes one
//! battery setpoint per power sample to stdout.

use anyhow::Context;
use peakshave_lib::core::Config;
use peakshave_lib::daemon::{self, Daemon};
use peakshave_lib::refinement::trainer::TrainerClient;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting peakshave v{}", env!("CARGO_PKG_VERSION"));

    // Defaults only when no config file exists yet
    let config = Config::load().context("loading config")?;

    let store = daemon::open_store(&config);

    let (job_id, training_started) = match &store {
        Some(store) => (
            store.training_job_id().context("reading training job id")?,
            store.training_started().context("reading training flag")?,
        ),
        None => (None, false),
    };
    let controller =
        daemon::restore_controller(&config, store.as_ref()).context("restoring controller")?;

    // Training runs beside the sample loop and only ever reports back
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut training_trigger = None;
    if config.trainer.enabled {
        match TrainerClient::new(&config.trainer) {
            Ok(client) => {
                let (trigger_tx, trigger_rx) = oneshot::channel();
                if job_id.is_none() && !training_started {
                    training_trigger = Some(trigger_tx);
                }
                tokio::spawn(client.run(job_id, trigger_rx, events_tx));
            }
            Err(e) => log::warn!("Training disabled, client setup failed: {}", e),
        }
    } else {
        drop(events_tx);
    }

    let mut daemon = Daemon::new(controller, store, training_trigger);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    log::info!("Input closed");
                    break;
                };
                if let Some(json) = daemon.handle_line(&line) {
                    stdout.write_all(json.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                    stdout.flush().await?;
                }
            }
            Some(event) = events_rx.recv() => daemon.handle_event(event),
            _ = &mut shutdown => {
                log::info!("Interrupted");
                break;
            }
        }
    }

    daemon.save_state();
    log::info!("Processed {} samples", daemon.samples_seen());
    Ok(())
}
