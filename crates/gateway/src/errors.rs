use thiserror::Error;

use crate::budget::BudgetExceeded;
use crate::capabilities::RequirementError;

/// Errors raised while admitting a chat request, before any event is streamed
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error(transparent)]
    Requirement(#[from] RequirementError),

    #[error(transparent)]
    Budget(#[from] BudgetExceeded),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
