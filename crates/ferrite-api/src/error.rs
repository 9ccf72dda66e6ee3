//! # API Error Types
//!
//! JSON-RPC 2.0 error codes: -32700 parse, -32600 invalid request,
//! -32601 method not found, -32602 invalid params, -32603 internal.

use serde_json::{json, Value};
use thiserror::Error;

/// A structured JSON-RPC error.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Body is not valid JSON.
    #[error("Parse error")]
    Parse,

    /// Envelope is not a valid JSON-RPC request.
    #[error("Invalid request")]
    InvalidRequest,

    /// Unknown method.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Parameters malformed for the method.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Anything the core failed at.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// The JSON-RPC error code.
    pub fn code(&self) -> i64 {
        match self {
            ApiError::Parse => -32700,
            ApiError::InvalidRequest => -32600,
            ApiError::MethodNotFound(_) => -32601,
            ApiError::InvalidParams(_) => -32602,
            ApiError::Internal(_) => -32603,
        }
    }

    /// The `{code, message}` error object.
    pub fn to_json(&self) -> Value {
        json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(ApiError::Parse.code(), -32700);
        assert_eq!(ApiError::InvalidRequest.code(), -32600);
        assert_eq!(ApiError::MethodNotFound("x".into()).code(), -32601);
        assert_eq!(ApiError::InvalidParams("x".into()).code(), -32602);
        assert_eq!(ApiError::Internal("x".into()).code(), -32603);
    }
}
