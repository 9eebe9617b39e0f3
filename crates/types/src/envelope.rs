// Path: crates/types/src/envelope.rs
//! The structured response envelope used across the signing-proxy boundary.
//!
//! Nothing crosses that boundary as a free-form exception: every response is
//! `{data, meta: {ok, code?, message?}}`, and the agent side maps `code`
//! back to local result types.

use serde::{Deserialize, Serialize};

/// Status metadata attached to every proxy response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Meta {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A `{data, meta}` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default = "none", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub meta: Meta,
}

fn none<T>() -> Option<T> {
    None
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            meta: Meta {
                ok: true,
                code: None,
                message: None,
            },
        }
    }

    pub fn err(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            data: None,
            meta: Meta {
                ok: false,
                code: Some(code.into()),
                message: Some(message.into()),
            },
        }
    }
}
