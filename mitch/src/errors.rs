use mitch_core::identifier::CompositeId;
use thiserror::Error;


/// Failures of a command against the recorded application state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("migration {} has been applied with a different script", .id)]
    AppliedWithDifferentScript { id: CompositeId },

    #[error("declined to re-apply idempotent migration {}", .id)]
    ReapplyDeclined { id: CompositeId },
}
