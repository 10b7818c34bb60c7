//! Error types and handling for Monet

/// Result type alias for Monet operations
pub type Result<T> = std::result::Result<T, MonetError>;

/// Stable numeric codes surfaced on the wire and to embedders.
///
/// The numbering is inherited from the legacy allocator interface and must
/// stay stable for wire compatibility: success is 0, and the gaps at 4 and
/// 6 are intentional.
pub const ERROR_CODE_NONE: i32 = 0;
pub const ERROR_CODE_BAD_DESCRIPTOR: i32 = 1;
pub const ERROR_CODE_BAD_BUFFER: i32 = 2;
pub const ERROR_CODE_BAD_VALUE: i32 = 3;
pub const ERROR_CODE_NO_RESOURCES: i32 = 5;
pub const ERROR_CODE_UNSUPPORTED: i32 = 7;

/// Error taxonomy for the Monet buffer allocator and mapper
#[derive(Debug, thiserror::Error)]
pub enum MonetError {
    /// Malformed descriptor wire data
    #[error("Bad descriptor: {message}")]
    BadDescriptor { message: String },

    /// Invalid, corrupted or unregistered buffer handle
    #[error("Bad buffer: {message}")]
    BadBuffer { message: String },

    /// Semantically invalid field value
    #[error("Bad value: {parameter} - {message}")]
    BadValue { parameter: String, message: String },

    /// Transient resource exhaustion
    #[error("No resources: {message}")]
    NoResources { message: String },

    /// Metadata type or feature not implemented for the given handle
    #[error("Unsupported: {message}")]
    Unsupported { message: String },
}

impl MonetError {
    /// Create a bad descriptor error
    pub fn bad_descriptor(message: impl Into<String>) -> Self {
        Self::BadDescriptor {
            message: message.into(),
        }
    }

    /// Create a bad buffer error
    pub fn bad_buffer(message: impl Into<String>) -> Self {
        Self::BadBuffer {
            message: message.into(),
        }
    }

    /// Create a bad value error
    pub fn bad_value(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadValue {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a no resources error
    pub fn no_resources(message: impl Into<String>) -> Self {
        Self::NoResources {
            message: message.into(),
        }
    }

    /// Create an unsupported error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Stable numeric code for this error.
    ///
    /// 0 (success) is never returned here; the absence of an error is the
    /// success case.
    pub fn code(&self) -> i32 {
        match self {
            Self::BadDescriptor { .. } => ERROR_CODE_BAD_DESCRIPTOR,
            Self::BadBuffer { .. } => ERROR_CODE_BAD_BUFFER,
            Self::BadValue { .. } => ERROR_CODE_BAD_VALUE,
            Self::NoResources { .. } => ERROR_CODE_NO_RESOURCES,
            Self::Unsupported { .. } => ERROR_CODE_UNSUPPORTED,
        }
    }
}

// I/O failures on the allocation path mean the backing resource could not
// be produced.
impl From<std::io::Error> for MonetError {
    fn from(err: std::io::Error) -> Self {
        Self::no_resources(format!("I/O failure: {}", err))
    }
}

impl From<nix::errno::Errno> for MonetError {
    fn from(err: nix::errno::Errno) -> Self {
        Self::no_resources(format!("System call failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = MonetError::bad_descriptor("truncated");
        assert!(matches!(err, MonetError::BadDescriptor { .. }));

        let err = MonetError::bad_value("width", "must be non-zero");
        assert!(matches!(err, MonetError::BadValue { .. }));
    }

    #[test]
    fn test_stable_codes() {
        assert_eq!(MonetError::bad_descriptor("x").code(), 1);
        assert_eq!(MonetError::bad_buffer("x").code(), 2);
        assert_eq!(MonetError::bad_value("p", "x").code(), 3);
        assert_eq!(MonetError::no_resources("x").code(), 5);
        assert_eq!(MonetError::unsupported("x").code(), 7);
    }

    #[test]
    fn test_error_display() {
        let err = MonetError::bad_buffer("handle 42 not registered");
        let display = format!("{}", err);
        assert!(display.contains("Bad buffer"));
        assert!(display.contains("handle 42 not registered"));
    }
}
