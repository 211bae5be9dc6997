use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{GiaphaError, StoreError};
use crate::models::{Person, PersonField};

pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Requests accepted on the Unix socket, one msgpack frame each.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GiaphaRequest {
    Ping,
    Health,
    Branches,
    SelectBranch {
        branch: String,
    },
    People {
        #[serde(default)]
        merged: bool,
    },
    Get {
        id: String,
    },
    Relations {
        id: String,
    },
    Search {
        query: String,
        limit: Option<usize>,
    },
    Save {
        person: Person,
    },
    AddPerson {
        person: Person,
    },
    AddChild {
        parent_id: String,
        name: String,
        #[serde(default)]
        position: Option<String>,
    },
    CheckIn {
        id: String,
        image: String,
        #[serde(default)]
        date: Option<String>,
    },
    ClearFields {
        id: String,
        fields: Vec<PersonField>,
    },
    Delete {
        id: String,
    },
    Cleanup {
        /// Collapse same-name duplicates instead of wrong-branch copies.
        #[serde(default)]
        name: Option<String>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GiaphaResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Machine-readable failure code, see [`StoreError::code`].
    #[serde(default)]
    pub code: Option<String>,
    pub version: String,
}

impl GiaphaResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            code: None,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            code: None,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn from_store_error(err: &StoreError) -> Self {
        Self {
            code: Some(err.code().to_string()),
            ..Self::err(err.to_string())
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

pub fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>, GiaphaError> {
    rmp_serde::to_vec_named(value).map_err(|e| GiaphaError::Ipc(e.to_string()))
}

pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, GiaphaError> {
    rmp_serde::from_slice(bytes).map_err(|e| GiaphaError::Ipc(e.to_string()))
}
