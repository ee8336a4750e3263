//! Submission pipeline and the approval step it drives

mod approval;
mod engine;

pub use approval::{ApprovalOrchestrator, ApprovalOutcome};
pub use engine::{
    PipelineError, PipelineState, SubmissionPipeline, SubmissionReceipt, SubmissionRequest,
    ValidationPolicy,
};
