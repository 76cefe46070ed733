//! Allow-list sanitization of the provider's user profile.
//!
//! The profile endpoint returns an open-ended JSON document (images, external URLs,
//! explicit-content settings, ...). Only the fields below are ever retained.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Error;

/// Sanitized subset of the provider profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    /// Subscription tier (`premium`, `free`, ...).
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub followers: Option<u64>,
}

impl UserProfile {
    /// Create a profile with only the required `id`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            email: None,
            country: None,
            product: None,
            followers: None,
        }
    }

    /// Build a profile from the raw provider document, dropping everything not allow-listed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`] if the document has no string `id`.
    pub fn from_provider(raw: &JsonValue) -> Result<Self, Error> {
        let id = raw
            .get("id")
            .and_then(JsonValue::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::Provider {
                operation: "profile request",
                status: None,
                detail: "profile has no id".into(),
            })?;

        let text = |key: &str| {
            raw.get(key)
                .and_then(JsonValue::as_str)
                .map(ToOwned::to_owned)
        };

        // `followers` is either `{ "total": n, ... }` or a bare count.
        let followers = raw.get("followers").and_then(|f| {
            f.get("total")
                .and_then(JsonValue::as_u64)
                .or_else(|| f.as_u64())
        });

        Ok(Self {
            id: id.to_owned(),
            display_name: text("display_name"),
            email: text("email"),
            country: text("country"),
            product: text("product"),
            followers,
        })
    }
}
