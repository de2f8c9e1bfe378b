//! JSON-RPC 2.0 seam to the monitoring server's HTTP API.
//!
//! The library does not ship an HTTP client. Callers provide one through
//! [`ApiCall`]; the envelope types here build requests and decode replies.

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, ProtocolError, Result};
use crate::version::Version;

pub const JSONRPC_VERSION: &str = "2.0";
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// Method that reports the server version; callable without auth.
pub const VERSION_METHOD: &str = "apiinfo.version";

/// Error object returned by the API, passed through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code}){}", .data.as_ref().map(|d| format!(": {d}")).unwrap_or_default())]
pub struct ApiError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ApiError {
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// JSON-RPC 2.0 request envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
}

impl ApiRequest {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
            auth: None,
        }
    }

    #[must_use]
    pub fn with_auth(mut self, auth: Option<String>) -> Self {
        self.auth = auth;
        self
    }
}

/// JSON-RPC 2.0 response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    pub id: Option<u64>,
}

impl ApiResponse {
    #[must_use]
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id: Some(id),
        }
    }

    #[must_use]
    pub fn error(id: Option<u64>, error: ApiError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// The result, or the server's error. A reply with neither is an
    /// `INVALID_REQUEST` error.
    ///
    /// # Errors
    ///
    /// Returns the `ApiError` carried by the reply.
    pub fn into_result(self) -> std::result::Result<Value, ApiError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        self.result.ok_or_else(|| {
            ApiError::new(INVALID_REQUEST, "response has neither result nor error")
        })
    }
}

/// A JSON-RPC call against the server API.
pub trait ApiCall {
    fn call(
        &self,
        method: &str,
        params: Value,
        auth: Option<&str>,
    ) -> impl Future<Output = std::result::Result<Value, ApiError>> + Send;
}

/// Ask the server for its version.
///
/// # Errors
///
/// Returns `Error::Api` if the call fails, or `Error::Protocol` if the reply
/// is not a version string.
pub async fn fetch_version<A: ApiCall + Sync>(api: &A) -> Result<Version> {
    let result = api.call(VERSION_METHOD, Value::Array(vec![]), None).await?;

    let text = result.as_str().ok_or_else(|| {
        Error::Protocol(ProtocolError::BadVersion(format!(
            "{VERSION_METHOD} returned {result}"
        )))
    })?;

    let version = Version::parse(text)?;
    tracing::debug!("Server API reports version {}", version);
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedApi(std::result::Result<Value, ApiError>);

    impl ApiCall for FixedApi {
        async fn call(
            &self,
            method: &str,
            _params: Value,
            auth: Option<&str>,
        ) -> std::result::Result<Value, ApiError> {
            assert_eq!(method, VERSION_METHOD);
            assert!(auth.is_none());
            self.0.clone()
        }
    }

    #[test]
    fn test_request_serialization() {
        let request = ApiRequest::new("host.get", json!({"output": "extend"}), 1);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["method"], "host.get");
        assert_eq!(json["id"], 1);
        assert!(json.get("auth").is_none());

        let request = request.with_auth(Some("token".to_string()));
        assert_eq!(serde_json::to_value(&request).unwrap()["auth"], "token");
    }

    #[test]
    fn test_response_into_result() {
        let ok: ApiResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","result":"7.0.0","id":1}"#).unwrap();
        assert_eq!(ok.into_result().unwrap(), json!("7.0.0"));

        let err: ApiResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","error":{"code":-32602,"message":"Invalid params.","data":"Not authorized."},"id":1}"#,
        )
        .unwrap();
        let err = err.into_result().unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
        assert_eq!(err.data, Some(json!("Not authorized.")));
    }

    #[test]
    fn test_response_without_result_or_error() {
        let empty = ApiResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: None,
            id: Some(3),
        };
        assert_eq!(empty.into_result().unwrap_err().code, INVALID_REQUEST);
    }

    #[test]
    fn test_api_error_display() {
        let err = ApiError::new(INVALID_PARAMS, "Invalid params.").with_data(json!("No permissions."));
        assert_eq!(
            err.to_string(),
            "Invalid params. (code -32602): \"No permissions.\""
        );
        assert_eq!(ApiError::new(1, "x").to_string(), "x (code 1)");
    }

    #[tokio::test]
    async fn test_fetch_version() {
        let api = FixedApi(Ok(json!("6.4.12")));
        let version = fetch_version(&api).await.unwrap();
        assert_eq!(version, Version::new(6, 4, 12));
    }

    #[tokio::test]
    async fn test_fetch_version_passes_api_error_through() {
        let api = FixedApi(Err(ApiError::new(INTERNAL_ERROR, "Internal error.")));
        let err = fetch_version(&api).await.unwrap_err();
        assert!(matches!(err, Error::Api(ref e) if e.code == INTERNAL_ERROR));
    }

    #[tokio::test]
    async fn test_fetch_version_rejects_non_string() {
        let api = FixedApi(Ok(json!({"version": 7})));
        let err = fetch_version(&api).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::BadVersion(_))));
    }
}
