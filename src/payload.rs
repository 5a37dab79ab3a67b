//! Wire representation of stored and published results.
//!
//! The payload explicitly tags success versus failure so that a published
//! error marker can never be confused with an ordinary falsy result.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Tagged result envelope written to the data key and published on the
/// notification channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Envelope {
    /// The work succeeded; `value` is the serialized result.
    Ok { value: Value },
    /// The work failed in the process that held the lease.
    Error { message: String },
}

impl Envelope {
    /// Wrap a successful result value.
    pub fn ok<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::Ok {
            value: serde_json::to_value(value)?,
        })
    }

    /// Wrap a failure marker.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Serialize for storage / publication.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize stored or published bytes.
    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Unwrap into the caller's result type, turning an error marker into
    /// [`Error::Remote`].
    pub fn into_value<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            Self::Ok { value } => Ok(serde_json::from_value(value)?),
            Self::Error { message } => Err(Error::Remote(message)),
        }
    }
}
