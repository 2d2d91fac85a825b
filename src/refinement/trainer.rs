//! Client for the remote training service
//!
//! The service fits a clustering model over the device's historical load.
//! Submitting, polling and downloading run in a background task so the
//! sample loop never waits on the network; every failure degrades to "no
//! refinement".

use crate::core::{Error, Result, TrainerConfig};
use crate::refinement::ClusterBoundaries;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Body of a job submission
#[derive(Debug, Clone, Serialize)]
pub struct JobRequest {
    pub task: String,
    pub data_settings: DataSettings,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSettings {
    pub filter_type: String,
    pub filter_value: String,
    #[serde(rename = "time_range_value")]
    pub time_range_value: String,
    #[serde(rename = "time_range_level")]
    pub time_range_level: String,
}

impl JobRequest {
    pub fn peak_shaving(config: &TrainerConfig) -> Self {
        Self {
            task: "peak_shaving".to_string(),
            data_settings: DataSettings {
                filter_type: "device_id".to_string(),
                filter_value: config.device_id.clone(),
                time_range_value: config.time_range_value.clone(),
                time_range_level: config.time_range_level.clone(),
            },
            user_id: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    success: String,
    #[serde(default)]
    response: Option<serde_json::Value>,
}

/// State of a submitted job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Done,
    Failed(String),
    Pending(String),
}

impl From<StatusResponse> for JobStatus {
    fn from(status: StatusResponse) -> Self {
        match status.success.as_str() {
            "done" => JobStatus::Done,
            "error" => JobStatus::Failed(
                status
                    .response
                    .map(|r| match r {
                        serde_json::Value::String(message) => message,
                        other => other.to_string(),
                    })
                    .unwrap_or_else(|| "unknown error".to_string()),
            ),
            other => JobStatus::Pending(other.to_string()),
        }
    }
}

/// Events the background task reports back to the sample loop
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingEvent {
    /// A job was accepted; its id should be persisted
    Submitted(String),
    /// Boundaries of the finished model
    Ready(ClusterBoundaries),
}

/// HTTP client for the training service
pub struct TrainerClient {
    http: reqwest::Client,
    config: TrainerConfig,
}

impl TrainerClient {
    pub fn new(config: &TrainerConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    /// Start a training job and return its id
    pub async fn submit_job(&self) -> Result<String> {
        log::debug!("Submitting training job for device '{}'", self.config.device_id);

        let response = self
            .http
            .post(self.endpoint("job"))
            .json(&JobRequest::peak_shaving(&self.config))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Trainer(format!("job submission rejected ({}): {}", status, body)));
        }

        let submitted: SubmitResponse = response.json().await?;
        log::info!("Created training job {}", submitted.task_id);
        Ok(submitted.task_id)
    }

    pub async fn job_status(&self, job_id: &str) -> Result<JobStatus> {
        let status: StatusResponse = self
            .http
            .get(self.endpoint(&format!("job/{}", job_id)))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(status.into())
    }

    /// Download the cluster boundaries of a finished job
    pub async fn fetch_boundaries(&self, job_id: &str) -> Result<ClusterBoundaries> {
        let boundaries: ClusterBoundaries = self
            .http
            .get(self.endpoint(&format!("job/{}/boundaries", job_id)))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !boundaries.is_consistent() {
            return Err(Error::Trainer(format!("job {} returned malformed boundaries", job_id)));
        }
        Ok(boundaries)
    }

    /// Drive one job from submission to downloaded boundaries
    ///
    /// With `existing_job` set (restored after a restart) the job is only
    /// polled. Otherwise submission waits for `trigger`, which the sample
    /// loop fires once historical data has been seen.
    pub async fn run(
        self,
        existing_job: Option<String>,
        trigger: oneshot::Receiver<()>,
        events: mpsc::UnboundedSender<TrainingEvent>,
    ) {
        let job_id = match existing_job {
            Some(id) => id,
            None => {
                if trigger.await.is_err() {
                    return;
                }
                match self.submit_job().await {
                    Ok(id) => {
                        let _ = events.send(TrainingEvent::Submitted(id.clone()));
                        id
                    }
                    Err(e) => {
                        log::error!("Could not start training job: {}", e);
                        return;
                    }
                }
            }
        };

        let mut interval = tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));

        loop {
            interval.tick().await;

            match self.job_status(&job_id).await {
                Ok(JobStatus::Done) => match self.fetch_boundaries(&job_id).await {
                    Ok(boundaries) => {
                        log::info!(
                            "Training job {} finished: min boundaries {:?}, max boundaries {:?}",
                            job_id, boundaries.min_boundaries, boundaries.max_boundaries
                        );
                        let _ = events.send(TrainingEvent::Ready(boundaries));
                        return;
                    }
                    Err(e) => log::warn!("Downloading model for job {} failed: {}", job_id, e),
                },
                Ok(JobStatus::Failed(reason)) => {
                    log::error!("Training job {} failed: {}", job_id, reason);
                    return;
                }
                Ok(JobStatus::Pending(state)) => {
                    log::debug!("Training job {} status: {}", job_id, state);
                }
                Err(e) => log::warn!("Polling training job {} failed: {}", job_id, e),
            }

            if events.is_closed() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(json: &str) -> JobStatus {
        serde_json::from_str::<StatusResponse>(json).unwrap().into()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status(r#"{"success": "done"}"#), JobStatus::Done);
        assert_eq!(
            status(r#"{"success": "running", "response": null}"#),
            JobStatus::Pending("running".to_string())
        );
        assert_eq!(
            status(r#"{"success": "error", "response": "out of memory"}"#),
            JobStatus::Failed("out of memory".to_string())
        );
    }

    #[test]
    fn test_job_request_shape() {
        let config = TrainerConfig {
            device_id: "meter-7".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(JobRequest::peak_shaving(&config)).unwrap();
        assert_eq!(json["task"], "peak_shaving");
        assert_eq!(json["data_settings"]["filterType"], "device_id");
        assert_eq!(json["data_settings"]["filterValue"], "meter-7");
        assert_eq!(json["data_settings"]["time_range_value"], "2");
        assert_eq!(json["data_settings"]["time_range_level"], "d");
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let config = TrainerConfig {
            url: "http://trainer:5000/".to_string(),
            ..Default::default()
        };
        let client = TrainerClient::new(&config).unwrap();
        assert_eq!(client.endpoint("job/abc"), "http://trainer:5000/job/abc");
    }

    #[tokio::test]
    async fn test_run_without_trigger_exits_quietly() {
        let client = TrainerClient::new(&TrainerConfig::default()).unwrap();
        let (trigger_tx, trigger_rx) = oneshot::channel();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        drop(trigger_tx);
        client.run(None, trigger_rx, events_tx).await;
        assert!(events_rx.recv().await.is_none());
    }
}
