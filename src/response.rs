//! Tagged result envelope handed to callers

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Success flag plus either data or a displayable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ActionResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Wrap an operation result
    ///
    /// Failures are logged in full. Errors the user can act on keep their own
    /// message; store and I/O failures are replaced by `fallback`.
    pub fn from_result(result: Result<T, SyncError>, fallback: &str) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(err) => {
                log::error!("{}: {} (path: {:?})", fallback, err, err.path);
                if err.is_user_facing() {
                    Self::failure(err.message)
                } else {
                    Self::failure(fallback)
                }
            }
        }
    }

    pub fn into_result(self) -> Result<T, String> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            _ => Err(self.error.unwrap_or_else(|| "Unknown error".to_string())),
        }
    }
}
