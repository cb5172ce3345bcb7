// SPDX-FileCopyrightText: Copyright (c) 2026 Flowgate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error surface returned to the upstream proxy.
//!
//! Each kind maps to a distinct HTTP-class response on the proxy side; this
//! core only classifies, it never chooses status codes.

/// Classification of a [`GatewayError`] for the proxy's response mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    ServiceUnavailable,
    InferencePoolResourceExhausted,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Malformed body, missing model, or invalid pool configuration.
    #[error("{0}")]
    BadRequest(String),

    /// No candidate pods to serve the request.
    #[error("{0}")]
    ServiceUnavailable(String),

    /// Admission shed or scheduler failure.
    #[error("{0}")]
    InferencePoolResourceExhausted(String),

    /// Broken internal contract; unreachable when collaborators behave.
    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            Self::InferencePoolResourceExhausted(_) => ErrorKind::InferencePoolResourceExhausted,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            GatewayError::BadRequest("bad".into()).kind(),
            ErrorKind::BadRequest
        );
        assert_eq!(
            GatewayError::InferencePoolResourceExhausted("shed".into()).kind(),
            ErrorKind::InferencePoolResourceExhausted
        );
    }

    #[test]
    fn test_message_passthrough() {
        let err = GatewayError::ServiceUnavailable("no pods".into());
        assert_eq!(err.to_string(), "no pods");
    }
}
