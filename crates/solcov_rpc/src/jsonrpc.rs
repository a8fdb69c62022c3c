//! Types specific to JSON-RPC 2.0.

use serde::{Deserialize, Serialize};

/// The JSON-RPC protocol version tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Version {
    V2_0,
}

impl Serialize for Version {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let version = String::deserialize(deserializer)?;
        if version == "2.0" {
            Ok(Version::V2_0)
        } else {
            Err(serde::de::Error::custom(format!(
                "unsupported JSON-RPC version `{version}`"
            )))
        }
    }
}

/// A request id.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Id {
    Num(u64),
    Str(String),
    Null,
}

/// An outbound request.
#[derive(Debug, Serialize)]
pub struct Request<'a> {
    pub jsonrpc: Version,
    pub id: Id,
    pub method: &'a str,
    pub params: serde_json::Value,
}

/// An inbound response; either a `result` or an `error` payload.
#[derive(Debug, Deserialize)]
pub struct Response<T> {
    pub id: Option<Id>,
    #[serde(flatten)]
    pub data: ResponseData<T>,
}

/// The payload of a [`Response`].
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ResponseData<T> {
    Error { error: Error },
    Success { result: T },
}

impl<T> ResponseData<T> {
    /// Converts the payload into a `Result`.
    pub fn into_result(self) -> Result<T, Error> {
        match self {
            ResponseData::Success { result } => Ok(result),
            ResponseData::Error { error } => Err(error),
        }
    }
}

/// A JSON-RPC level error.
#[derive(Clone, Debug, Deserialize, Serialize, thiserror::Error)]
#[error("JSON-RPC error {code}: {message}")]
pub struct Error {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}
