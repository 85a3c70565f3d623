//! Wire types of the HTTP transactional endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TxRequest {
    pub statements: Vec<TxStatement>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TxStatement {
    pub statement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct TxResponse {
    #[serde(default)]
    pub results: Vec<TxResult>,
    #[serde(default)]
    pub errors: Vec<TxError>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct TxResult {
    pub columns: Vec<String>,
    #[serde(default)]
    pub data: Vec<TxRow>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TxRow {
    pub row: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TxError {
    pub code: String,
    pub message: String,
}
