//! Process exit codes.
//!
//! `2` is left to clap for usage errors.

use crate::errors::{OrchestratorError, ValidationError};

pub const SUCCESS: u8 = 0;
pub const FAILURE: u8 = 1;
/// The quality gate ran out of attempts and the artifact was not accepted.
pub const QUALITY_EXHAUSTED: u8 = 3;
/// The feature identifier failed validation.
pub const VALIDATION_REJECTED: u8 = 4;

/// Exit code for an error that ended a command.
pub fn for_error(error: &anyhow::Error) -> u8 {
    for cause in error.chain() {
        if let Some(err) = cause.downcast_ref::<OrchestratorError>() {
            return for_orchestrator_error(err);
        }
        if cause.is::<ValidationError>() {
            return VALIDATION_REJECTED;
        }
    }
    FAILURE
}

pub fn for_orchestrator_error(error: &OrchestratorError) -> u8 {
    match error {
        OrchestratorError::Validation(_) => VALIDATION_REJECTED,
        OrchestratorError::QualityExhausted { .. } => QUALITY_EXHAUSTED,
        _ => FAILURE,
    }
}
