//! Cross-thread message protocol
//!
//! These messages are the only things that travel between the script runtime
//! and the host. They are plain data and serialize to JSON, which is also how
//! arguments leave the script side.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::value::{ArgMap, ConfigMap, ResultValue};
use crate::core::CallError;

/// Host-assigned binding identifier, unique for the registry's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BindingId(pub u64);

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runtime-assigned call identifier, unique among outstanding calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Script to host: invoke `method` on a binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMessage {
    pub call_id: CallId,
    pub binding_id: BindingId,
    pub method: String,
    #[serde(default)]
    pub args: ArgMap,
}

/// Script to host: construct a binding of `type_tag`.
///
/// A successful reply carries the new binding id as an `Int` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub call_id: CallId,
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default)]
    pub config: ConfigMap,
}

/// Host to script: the outcome of a call or create request.
///
/// `error` is empty on success; otherwise `result` is `Null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyMessage {
    pub call_id: CallId,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub result: ResultValue,
}

impl ReplyMessage {
    pub fn success(call_id: CallId, result: ResultValue) -> Self {
        Self {
            call_id,
            error: String::new(),
            result,
        }
    }

    pub fn failure(call_id: CallId, error: &CallError) -> Self {
        Self {
            call_id,
            error: error.to_string(),
            result: ResultValue::Null,
        }
    }

    pub fn from_result(call_id: CallId, outcome: Result<ResultValue, CallError>) -> Self {
        match outcome {
            Ok(result) => Self::success(call_id, result),
            Err(err) => Self::failure(call_id, &err),
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}
