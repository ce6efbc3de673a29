//! Transport-layer errors

use crate::types::ResultCode;
use thiserror::Error;

/// Failure of one collaborator call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("endpoint unreachable")]
    Unreachable,
    #[error("request timed out")]
    Timeout,
    #[error("request failed with result code {0:?}")]
    RequestFailed(ResultCode),
    #[error("request rejected: {0}")]
    Rejected(String),
}
