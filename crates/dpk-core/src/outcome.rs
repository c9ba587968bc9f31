use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::DpkError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: CommandStatus,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

impl ExecutionOutcome {
    pub fn success(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Ok,
            message: message.into(),
            details,
        }
    }

    pub fn failure(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Failure,
            message: message.into(),
            details,
        }
    }

    pub fn user_error(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::UserError,
            message: message.into(),
            details,
        }
    }

    /// Converts an error into an outcome, classified by [`DpkError::is_user_error`].
    #[must_use]
    pub fn from_error(err: &DpkError) -> Self {
        let mut details = json!({ "code": err.code() });
        if let Some(hint) = err.hint() {
            details["hint"] = json!(hint);
        }
        if err.is_user_error() {
            Self::user_error(err.to_string(), details)
        } else {
            Self::failure(err.to_string(), details)
        }
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.status {
            CommandStatus::Ok => 0,
            CommandStatus::UserError => 1,
            CommandStatus::Failure => 2,
        }
    }

    /// The `{status, message, details}` envelope printed by `--json`.
    #[must_use]
    pub fn to_json_response(&self) -> Value {
        let status = match self.status {
            CommandStatus::Ok => "ok",
            CommandStatus::UserError => "user-error",
            CommandStatus::Failure => "error",
        };
        let details = match &self.details {
            Value::Object(_) => self.details.clone(),
            Value::Null => json!({}),
            other => json!({ "value": other }),
        };
        json!({
            "status": status,
            "message": self.message,
            "details": details,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CommandStatus {
    Ok,
    UserError,
    Failure,
}
