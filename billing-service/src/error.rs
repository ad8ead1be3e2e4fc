use std::{collections::BTreeMap, fmt};

use serde::Serialize;
use serde_json::Value;

/// Per-field validation messages, keyed by form field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    fields: BTreeMap<String, String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    /// Record a message for `field`; the first message per field wins.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields.entry(field.into()).or_insert_with(|| message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn into_result(self) -> Result<(), BillingError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(BillingError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in &self.fields {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{field}: {message}")?;
        }
        Ok(())
    }
}

/// Every failure the billing core reports to its callers.
#[derive(thiserror::Error, Debug, Clone)]
pub enum BillingError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),
    #[error("authorization failed: {0}")]
    Authorization(String),
    #[error("backend unavailable: {0}")]
    Transient(String),
    #[error("{0}")]
    Invariant(String),
}

impl BillingError {
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Authorization(_) => "authorization",
            Self::Transient(_) => "transient",
            Self::Invariant(_) => "invariant",
        }
    }
}

/// Raw failure shapes returned by the identity and storage collaborators.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BackendFailure {
    /// Structured error object (`{code, status, message}`), possibly nested
    /// under `result.error` or `error` in the raw payload.
    #[error("api error (code {code:?}, status {status:?}): {message}")]
    Api {
        code: Option<u16>,
        status: Option<String>,
        message: String,
    },
    /// Bare textual error payload.
    #[error("{0}")]
    Text(String),
    /// Connection or IO failure with no payload.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl BackendFailure {
    /// The shape the spreadsheet API uses for an expired or revoked token.
    pub fn unauthenticated() -> Self {
        Self::Api {
            code: Some(401),
            status: Some("UNAUTHENTICATED".to_string()),
            message: "Request had invalid authentication credentials.".to_string(),
        }
    }

    pub fn transport(message: impl fmt::Display) -> Self {
        Self::Transport(message.to_string())
    }

    /// Normalize a JSON error payload of any of the shapes seen in practice:
    /// a bare string, `{status, message}`, `{result: {error: {...}}}` or
    /// `{error: {...}}`. Outer fields take precedence over nested ones.
    pub fn from_payload(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::Text(s.clone()),
            Value::Object(_) => {
                let mut code = None;
                let mut status = None;
                let mut message = None;
                let mut layer = Some(value);
                while let Some(obj) = layer {
                    if code.is_none() {
                        code = obj
                            .get("code")
                            .and_then(Value::as_u64)
                            .or_else(|| obj.get("status").and_then(Value::as_u64))
                            .and_then(|c| u16::try_from(c).ok());
                    }
                    if status.is_none() {
                        status = obj.get("status").and_then(Value::as_str).map(str::to_string);
                    }
                    if message.is_none() {
                        message = obj.get("message").and_then(Value::as_str).map(str::to_string);
                    }
                    layer = obj
                        .get("result")
                        .and_then(|r| r.get("error"))
                        .or_else(|| obj.get("error"))
                        .filter(|e| e.is_object());
                }
                if code.is_none() && status.is_none() && message.is_none() {
                    if let Some(text) = value.get("error").and_then(Value::as_str) {
                        return Self::Text(text.to_string());
                    }
                }
                Self::Api {
                    code,
                    status,
                    message: message.unwrap_or_default(),
                }
            }
            other => Self::Transport(other.to_string()),
        }
    }

    /// True when the failure means the session token is no longer accepted.
    pub fn is_authorization(&self) -> bool {
        match self {
            Self::Api {
                code,
                status,
                message,
            } => {
                *code == Some(401)
                    || status.as_deref() == Some("UNAUTHENTICATED")
                    || message.contains("authentication credentials")
            }
            Self::Text(text) => text.contains("authentication"),
            Self::Transport(_) => false,
        }
    }
}

/// Map a collaborator failure into the billing error taxonomy.
pub fn classify(failure: BackendFailure) -> BillingError {
    if failure.is_authorization() {
        BillingError::Authorization(failure.to_string())
    } else {
        BillingError::Transient(failure.to_string())
    }
}
