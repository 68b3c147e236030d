// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The error surface of the intent database.

use thiserror::Error;

/// The reasons an intent operation may be rejected. The variants map one to
/// one onto the wire status codes of the management API.
#[derive(Debug, Error, PartialEq)]
pub enum ApiError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("'{0}' not found")]
    NotFound(String),

    #[error("'{0}' already exists")]
    AlreadyExists(String),

    #[error("precondition failed: {0}")]
    FailedPrecondition(String),

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("unimplemented: {0}")]
    Unimplemented(&'static str),

    #[error("internal failure: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;
