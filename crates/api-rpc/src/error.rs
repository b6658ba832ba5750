//! RPC Error Mapping
//!
//! Numeric codes come from `ErrorCode::rpc_code`; the stable string code
//! travels in `data.code` so clients never have to parse messages.

use jsonrpsee::types::ErrorObjectOwned;
use serde::Serialize;
use turnstile_core::domain::ErrorCode;
use turnstile_core::error::AppError;

#[derive(Debug, Serialize)]
struct ErrorData {
    code: ErrorCode,
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    let code = err.code();
    if code.rpc_code() >= 5000 {
        tracing::error!(error = %err, code = %code, "RPC call failed");
    }
    ErrorObjectOwned::owned(code.rpc_code(), err.public_message(), Some(ErrorData { code }))
}

pub fn rate_limited() -> ErrorObjectOwned {
    to_rpc_error(AppError::RateLimited(
        "Rate limit exceeded. Please slow down.".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_keeps_message_and_code() {
        let err = to_rpc_error(AppError::NotFound("Request r1 not found".into()));
        assert_eq!(err.code(), 4004);
        assert_eq!(err.message(), "Request r1 not found");
        let data: serde_json::Value = serde_json::from_str(err.data().unwrap().get()).unwrap();
        assert_eq!(data["code"], "NOT_FOUND");
    }

    #[test]
    fn test_server_error_hides_details() {
        let err = to_rpc_error(AppError::Store("READONLY replica at 10.1.2.3".into()));
        assert_eq!(err.code(), 5003);
        assert!(!err.message().contains("10.1.2.3"));
    }

    #[test]
    fn test_rate_limited_code() {
        let err = rate_limited();
        assert_eq!(err.code(), 4029);
    }
}
