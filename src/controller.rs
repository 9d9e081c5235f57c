use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};
use crate::mappings::{MappingRequest, MappingResult, MappingService};

/// Display-only stages shown while a request is in flight. They never carry
/// data from the backend; real pipeline output lives in
/// `MappingResult::processing_steps`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Extraction,
    Classification,
    Mapping,
}

pub const PROGRESS_STAGES: &[PipelineStage] = &[
    PipelineStage::Extraction,
    PipelineStage::Classification,
    PipelineStage::Mapping,
];

impl PipelineStage {
    pub fn agent_label(self) -> &'static str {
        match self {
            PipelineStage::Extraction => "Extraction Agent",
            PipelineStage::Classification => "Classification Agent",
            PipelineStage::Mapping => "Mapping Agent",
        }
    }

    /// The first stage renders as active, the rest as waiting.
    pub fn status_line(self) -> String {
        let activity = match self {
            PipelineStage::Extraction => "Analyzing key terms...",
            PipelineStage::Classification | PipelineStage::Mapping => "Waiting...",
        };
        format!("{}: {activity}", self.agent_label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFailure {
    pub message: String,
    pub session_ended: bool,
}

impl From<&AppError> for RequestFailure {
    fn from(err: &AppError) -> Self {
        Self {
            message: err.user_message(),
            session_ended: err.ends_session(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestState {
    #[default]
    Idle,
    Submitting {
        term: String,
        generation: u64,
    },
    Succeeded(MappingResult),
    Failed(RequestFailure),
}

impl RequestState {
    pub fn is_submitting(&self) -> bool {
        matches!(self, RequestState::Submitting { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Succeeded(_) | RequestState::Failed(_))
    }

    pub fn progress(&self) -> Option<&'static [PipelineStage]> {
        self.is_submitting().then_some(PROGRESS_STAGES)
    }

    pub fn result(&self) -> Option<&MappingResult> {
        match self {
            RequestState::Succeeded(result) => Some(result),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&RequestFailure> {
        match self {
            RequestState::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Applied(RequestState),
    /// A later submission or reset took over before this response arrived.
    Superseded { generation: u64 },
}

/// Drives a single mapping request from submission to its terminal state.
pub struct MappingRequestController {
    service: Arc<dyn MappingService>,
    latest: AtomicU64,
    state: watch::Sender<RequestState>,
}

impl MappingRequestController {
    pub fn new(service: Arc<dyn MappingService>) -> Self {
        let (state, _) = watch::channel(RequestState::Idle);
        Self {
            service,
            latest: AtomicU64::new(0),
            state,
        }
    }

    pub fn current(&self) -> RequestState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RequestState> {
        self.state.subscribe()
    }

    pub async fn submit(&self, term: &str) -> AppResult<SubmitOutcome> {
        let request = MappingRequest::new(term)?;

        let mut generation = 0;
        self.state.send_modify(|state| {
            generation = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
            *state = RequestState::Submitting {
                term: request.term().to_string(),
                generation,
            };
        });
        debug!(target: "mapping_controller", generation, term = request.term(), "submitting");

        let next = match self.service.submit_mapping(request.term()).await {
            Ok(result) => RequestState::Succeeded(result),
            Err(err) => {
                info!(
                    target: "mapping_controller",
                    generation,
                    error = %err,
                    "mapping request failed"
                );
                RequestState::Failed(RequestFailure::from(&err))
            }
        };

        let applied = self.state.send_if_modified(|state| {
            if self.latest.load(Ordering::SeqCst) != generation {
                return false;
            }
            *state = next.clone();
            true
        });
        if applied {
            Ok(SubmitOutcome::Applied(next))
        } else {
            debug!(target: "mapping_controller", generation, "discarding stale response");
            Ok(SubmitOutcome::Superseded { generation })
        }
    }

    /// Returns to `Idle`; responses still in flight are discarded.
    pub fn reset(&self) {
        self.state.send_modify(|state| {
            self.latest.fetch_add(1, Ordering::SeqCst);
            *state = RequestState::Idle;
        });
    }
}
