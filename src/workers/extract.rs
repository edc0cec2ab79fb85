use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    insights::pipeline::{run_extraction, ExtractionError, ExtractionJob},
    jobs::JOB_EXTRACT_INSIGHTS,
    models::Job,
    state::AppState,
};

use super::{JobExecution, JobHandler};

/// Batch extraction queued every few ingested segments.
pub struct ExtractInsightsJob;

impl ExtractInsightsJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ExtractInsightsJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for ExtractInsightsJob {
    fn job_type(&self) -> &'static str {
        JOB_EXTRACT_INSIGHTS
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let payload: ExtractionJob = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid extraction payload: {err}"),
                }
            }
        };

        match run_extraction(&state, payload.event_id).await {
            Ok(saved) => {
                info!(job_id = %job.id, event_id = payload.event_id, insights = saved.len(), "extraction finished");
                JobExecution::Success
            }
            Err(ExtractionError::NotConfigured) => {
                warn!(job_id = %job.id, "language model missing; skipping extraction");
                JobExecution::Success
            }
            Err(ExtractionError::Store(err)) => {
                warn!(job_id = %job.id, error = %err, "extraction job will retry");
                JobExecution::Retry {
                    delay: Duration::from_secs(30),
                    error: err.to_string(),
                }
            }
        }
    }
}
