//! Input validation for identifiers that end up in filesystem paths and URLs

/// Maximum stream key length
pub const STREAM_KEY_MAX: usize = 128;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid {field}: {message}")]
    Field { field: String, message: String },
}

impl ValidationError {
    fn field(field: &str, message: impl Into<String>) -> Self {
        Self::Field {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Validation result
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Filesystem-safe token validator
///
/// Stream keys are used as registry keys, process table keys, file name stems
/// and URL path segments, so they are restricted to ASCII letters, digits,
/// `_`, `-` and `.`, may not start with `.` and may not contain `..`.
pub struct StreamKeyValidator {
    field: &'static str,
    max_length: usize,
}

impl Default for StreamKeyValidator {
    fn default() -> Self {
        Self {
            field: "stream_key",
            max_length: STREAM_KEY_MAX,
        }
    }
}

impl StreamKeyValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Same character rules, reported under a different field name
    #[must_use]
    pub const fn for_field(mut self, field: &'static str) -> Self {
        self.field = field;
        self
    }

    #[must_use]
    pub const fn with_max_length(mut self, max: usize) -> Self {
        self.max_length = max;
        self
    }

    pub fn validate(&self, value: &str) -> ValidationResult<()> {
        if value.is_empty() {
            return Err(ValidationError::field(self.field, "must not be empty"));
        }

        if value.len() > self.max_length {
            return Err(ValidationError::field(
                self.field,
                format!("must be at most {} characters", self.max_length),
            ));
        }

        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(ValidationError::field(
                self.field,
                "can only contain letters, numbers, '_', '-' and '.'",
            ));
        }

        if value.starts_with('.') || value.contains("..") {
            return Err(ValidationError::field(
                self.field,
                "cannot start with '.' or contain '..'",
            ));
        }

        Ok(())
    }
}
