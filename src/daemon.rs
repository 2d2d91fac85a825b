//! Glue between the input stream, the controller and the history store
//!
//! The binary owns the I/O; this module owns what happens to each line and
//! each training event so the behaviour can be exercised without stdin.

use crate::control::{Controller, ControllerState};
use crate::core::{Config, InputMessage, Result};
use crate::db::HistoryStore;
use crate::refinement::trainer::TrainingEvent;
use chrono::Utc;
use tokio::sync::oneshot;

/// Snapshot the controller state every this many samples
pub const SNAPSHOT_EVERY: u64 = 100;

/// Sample loop state shared by the message handlers
pub struct Daemon {
    controller: Controller,
    store: Option<HistoryStore>,
    training_trigger: Option<oneshot::Sender<()>>,
    samples_seen: u64,
}

impl Daemon {
    pub fn new(
        controller: Controller,
        store: Option<HistoryStore>,
        training_trigger: Option<oneshot::Sender<()>>,
    ) -> Self {
        Self {
            controller,
            store,
            training_trigger,
            samples_seen: 0,
        }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn store(&self) -> Option<&HistoryStore> {
        self.store.as_ref()
    }

    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }

    /// Process one input line, returning the serialized setpoint if any
    pub fn handle_line(&mut self, line: &str) -> Option<String> {
        if line.trim().is_empty() {
            return None;
        }

        let message = match InputMessage::parse(line) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Skipping message: {}", e);
                return None;
            }
        };

        let InputMessage::Power(sample) = message else {
            self.controller.handle(&message);
            return None;
        };

        // Historical data means the trainer has something to fit on
        if sample.timestamp < Utc::now() {
            if let Some(trigger) = self.training_trigger.take() {
                log::info!("Historical data available, starting training");
                let _ = trigger.send(());
                self.persist(|store| store.mark_training_started());
            }
        }

        let had_first_sample = self.controller.first_sample_time().is_some();
        let setpoint = self.controller.process_power(&sample);
        self.samples_seen += 1;

        if !had_first_sample {
            if let Some(first) = self.controller.first_sample_time() {
                self.persist(|store| store.save_first_sample_time(first));
            }
        }
        self.persist(|store| store.insert_sample(sample.power, &setpoint));
        if self.samples_seen % SNAPSHOT_EVERY == 0 {
            self.save_state();
        }

        match serde_json::to_string(&setpoint) {
            Ok(json) => Some(json),
            Err(e) => {
                log::error!("Could not encode setpoint: {}", e);
                None
            }
        }
    }

    pub fn handle_event(&mut self, event: TrainingEvent) {
        match event {
            TrainingEvent::Submitted(job_id) => {
                self.persist(|store| store.save_training_job_id(&job_id));
            }
            TrainingEvent::Ready(boundaries) => self.controller.apply_refinement(&boundaries),
        }
    }

    pub fn save_state(&self) {
        self.persist(|store| store.save_state(self.controller.state()));
    }

    /// Run a store operation, logging instead of failing the sample
    fn persist<F>(&self, op: F)
    where
        F: FnOnce(&HistoryStore) -> Result<()>,
    {
        if let Some(store) = &self.store {
            if let Err(e) = op(store) {
                log::warn!("History store write failed: {}", e);
            }
        }
    }
}

/// Open the configured history store, or run without one
pub fn open_store(config: &Config) -> Option<HistoryStore> {
    if !config.storage.enabled {
        log::info!("History persistence disabled");
        return None;
    }

    let path = match &config.storage.path {
        Some(path) => path.clone(),
        None => match HistoryStore::default_path() {
            Ok(path) => path,
            Err(e) => {
                log::warn!("No location for history store: {}", e);
                return None;
            }
        },
    };

    match HistoryStore::open(&path) {
        Ok(store) => {
            log::info!("History store at {}", path.display());
            Some(store)
        }
        Err(e) => {
            log::warn!("Could not open history store {}: {}, continuing without persistence", path.display(), e);
            None
        }
    }
}

/// Build a controller from the saved state and warm-up start, if any
pub fn restore_controller(config: &Config, store: Option<&HistoryStore>) -> Result<Controller> {
    let (state, first_sample_time) = match store {
        Some(store) => (store.load_state()?, store.first_sample_time()?),
        None => (None, None),
    };

    let state = match state {
        Some(state) => {
            log::info!(
                "Resuming: running max {:.1}, ceiling {:.1}",
                state.tracker.running_max(),
                state.tracker.corrected_max()
            );
            state
        }
        None => ControllerState::new(&config.battery),
    };

    Controller::restore(config, state, first_sample_time)
}
