//! Custom error types for `GeoLink` operations.
//!
//! This module provides structured error handling using `thiserror`. Geocoding
//! failures are kept apart from caller-contract violations so that callers can
//! decide which failures are worth retrying.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for `GeoLink` operations.
///
/// This is the root error type that encompasses all domain-specific errors.
/// It uses `#[error(transparent)]` to delegate display formatting to the
/// underlying error variants.
#[derive(Debug, Error)]
pub enum GeoLinkError {
    /// Errors raised by a geocoding provider
    #[error(transparent)]
    Geocode(#[from] GeocodeError),

    /// I/O errors (file read/write, path issues, permissions)
    #[error(transparent)]
    Io(#[from] IoError),

    /// Format parsing and validation errors
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Coordinate reference system errors
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    /// Configuration and caller-contract errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic errors from dependencies
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors returned by a geocoding provider for a single query.
///
/// A query that completes but matches nothing is *not* an error; see
/// [`crate::types::GeocodeOutcome::NotFound`].
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// The request could not be sent or the connection failed
    #[error("Geocoding request for '{query}' failed: {message}")]
    Transport {
        /// The free-text query
        query: String,
        /// Description of the transport failure
        message: String,
    },

    /// The request did not complete within the configured timeout
    #[error("Geocoding request for '{query}' timed out after {seconds}s")]
    Timeout {
        /// The free-text query
        query: String,
        /// The timeout that was exceeded
        seconds: u64,
    },

    /// The service answered with a non-success HTTP status
    #[error("Geocoding service returned HTTP {status} for '{query}'")]
    Service {
        /// The free-text query
        query: String,
        /// The HTTP status code
        status: u16,
    },

    /// The service answered but the payload could not be understood
    #[error("Could not parse geocoding response for '{query}': {message}")]
    InvalidResponse {
        /// The free-text query
        query: String,
        /// Description of the parse problem
        message: String,
    },
}

/// I/O related errors.
///
/// These errors occur during file operations, including reading, writing,
/// and path validation.
#[derive(Debug, Error)]
pub enum IoError {
    /// Failed to read from a file
    #[error("Failed to read {format} file '{path}': {source}")]
    Read {
        /// The format being read (e.g., "CSV", "`GeoJSON`")
        format: String,
        /// The file path
        path: PathBuf,
        /// The underlying error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Failed to write to a file
    #[error("Failed to write {format} file '{path}': {source}")]
    Write {
        /// The format being written
        format: String,
        /// The file path
        path: PathBuf,
        /// The underlying error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// File was not found
    #[error("File not found: '{path}'")]
    FileNotFound {
        /// The missing file path
        path: PathBuf,
    },
}

/// Format parsing and validation errors.
#[derive(Debug, Error)]
pub enum FormatError {
    /// Failed to parse a format
    #[error("Failed to parse {format} at line {line}: {message}", line = line.map(|l| l.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    Parse {
        /// The format being parsed
        format: String,
        /// The line number where parsing failed (if available)
        line: Option<usize>,
        /// Description of the parse error
        message: String,
    },

    /// Invalid geometry
    #[error("Invalid geometry in {format}: {message}{}", feature_id.as_ref().map(|id| format!(" (feature {id})")).unwrap_or_default())]
    InvalidGeometry {
        /// The format
        format: String,
        /// Description of the geometry problem
        message: String,
        /// Optional feature index where the error occurred
        feature_id: Option<String>,
    },

    /// A column named by the caller does not exist
    #[error("Column '{column}' not found in {format} input")]
    MissingColumn {
        /// The requested column
        column: String,
        /// The format being read
        format: String,
    },
}

/// Coordinate reference system errors.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// No transform is known between the two systems
    #[error("Reprojection from {from} to {to} is not supported")]
    Unsupported {
        /// Source CRS identifier
        from: String,
        /// Target CRS identifier
        to: String,
    },

    /// A coordinate could not be transformed
    #[error("Reprojection from {from} to {to} failed: {message}")]
    Failed {
        /// Source CRS identifier
        from: String,
        /// Target CRS identifier
        to: String,
        /// Description of the failure
        message: String,
    },
}

/// Configuration errors.
///
/// These errors occur when options are invalid or when a caller breaks the
/// contract of an operation (for example a table input without a location column).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid option value
    #[error("Invalid {option} option: {message}")]
    InvalidOption {
        /// The option name
        option: String,
        /// Why it's invalid
        message: String,
    },

    /// Required option is missing
    #[error("Missing required option: {option}")]
    MissingRequired {
        /// The missing option name
        option: String,
    },
}

/// Type alias for Results using `GeoLinkError`.
pub type Result<T> = std::result::Result<T, GeoLinkError>;

impl GeoLinkError {
    /// Get a user-friendly error message.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Geocode(e) => format!("Geocoding error: {e}"),
            Self::Io(e) => e.user_message(),
            Self::Format(e) => format!("Format error: {e}"),
            Self::Projection(e) => format!("Projection error: {e}"),
            Self::Config(e) => format!("Configuration error: {e}"),
            Self::Other(e) => format!("Error: {e}"),
        }
    }

    /// Get recovery suggestions if available.
    #[must_use]
    pub fn recovery_suggestion(&self) -> Option<String> {
        match self {
            Self::Geocode(e) => e.recovery_suggestion(),
            Self::Io(e) => e.recovery_suggestion(),
            Self::Format(FormatError::MissingColumn { .. }) => {
                Some("Check the column name against the input header.".to_string())
            },
            Self::Projection(ProjectionError::Unsupported { .. }) => Some(
                "Reproject the polygon file to an EPSG coordinate system with a GIS tool before joining."
                    .to_string(),
            ),
            Self::Config(ConfigError::MissingRequired { option }) => {
                Some(format!("Pass a value for '{option}'."))
            },
            _ => None,
        }
    }

    /// Check if this error is potentially recoverable by retrying.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Geocode(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl GeocodeError {
    /// The free-text query this error belongs to.
    #[must_use]
    pub fn query(&self) -> &str {
        match self {
            Self::Transport { query, .. }
            | Self::Timeout { query, .. }
            | Self::Service { query, .. }
            | Self::InvalidResponse { query, .. } => query,
        }
    }

    /// Returns `true` when repeating the same request later may succeed.
    ///
    /// Transport failures, timeouts, rate limiting (HTTP 429) and server-side
    /// errors (HTTP 5xx) are retryable. Client errors and unparseable payloads are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } => true,
            Self::Service { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidResponse { .. } => false,
        }
    }

    fn recovery_suggestion(&self) -> Option<String> {
        match self {
            Self::Service { status: 429, .. } => {
                Some("The service is rate limiting requests; slow down and retry.".to_string())
            },
            Self::Service { status: 403, .. } => {
                Some("Set a descriptive user agent identifying your application.".to_string())
            },
            Self::Transport { .. } | Self::Timeout { .. } => {
                Some("Check network connectivity and retry.".to_string())
            },
            _ => None,
        }
    }
}

impl IoError {
    fn user_message(&self) -> String {
        match self {
            Self::Read { format, path, .. } => {
                format!("Failed to read {} file: {}", format, path.display())
            },
            Self::Write { format, path, .. } => {
                format!("Failed to write {} file: {}", format, path.display())
            },
            Self::FileNotFound { path } => {
                format!("File not found: {}", path.display())
            },
        }
    }

    fn recovery_suggestion(&self) -> Option<String> {
        match self {
            Self::FileNotFound { .. } => {
                Some("Check that the file path is correct and the file exists.".to_string())
            },
            _ => None,
        }
    }
}

/// Extension trait for adding I/O context to errors.
///
/// This trait provides convenient methods to wrap errors with file and format
/// context, creating more informative error messages.
pub trait IoErrorExt<T> {
    /// Add read context to an error.
    ///
    /// # Errors
    ///
    /// Returns an [`IoError::Read`] if the underlying operation fails.
    fn with_read_context(self, format: &str, path: impl Into<PathBuf>) -> Result<T>;

    /// Add write context to an error.
    ///
    /// # Errors
    ///
    /// Returns an [`IoError::Write`] if the underlying operation fails.
    fn with_write_context(self, format: &str, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T, E> IoErrorExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn with_read_context(self, format: &str, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| {
            GeoLinkError::Io(IoError::Read {
                format: format.to_string(),
                path: path.into(),
                source: Box::new(e),
            })
        })
    }

    fn with_write_context(self, format: &str, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| {
            GeoLinkError::Io(IoError::Write {
                format: format.to_string(),
                path: path.into(),
                source: Box::new(e),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_required_message() {
        let err: GeoLinkError = ConfigError::MissingRequired {
            option: "location_field".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "Missing required option: location_field");
        assert!(!err.is_recoverable());
        assert_eq!(
            err.recovery_suggestion().as_deref(),
            Some("Pass a value for 'location_field'.")
        );
    }

    #[test]
    fn test_geocode_retryable_classification() {
        let timeout = GeocodeError::Timeout {
            query: "Jakarta".to_string(),
            seconds: 10,
        };
        assert!(timeout.is_retryable());
        assert_eq!(timeout.query(), "Jakarta");

        let throttled = GeocodeError::Service {
            query: "Jakarta".to_string(),
            status: 429,
        };
        assert!(throttled.is_retryable());

        let forbidden = GeocodeError::Service {
            query: "Jakarta".to_string(),
            status: 403,
        };
        assert!(!forbidden.is_retryable());

        let garbage = GeocodeError::InvalidResponse {
            query: "Jakarta".to_string(),
            message: "expected value".to_string(),
        };
        assert!(!GeoLinkError::from(garbage).is_recoverable());
    }

    #[test]
    fn test_parse_error_without_line() {
        let err = FormatError::Parse {
            format: "GeoJSON".to_string(),
            line: None,
            message: "unexpected token".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to parse GeoJSON at line unknown: unexpected token"
        );
    }

    #[test]
    fn test_invalid_geometry_with_feature_id() {
        let err = FormatError::InvalidGeometry {
            format: "GeoJSON".to_string(),
            message: "ring not closed".to_string(),
            feature_id: Some("3".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Invalid geometry in GeoJSON: ring not closed (feature 3)"
        );
    }

    #[test]
    fn test_read_context_wraps_source() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "bad bytes",
        ));
        let err = result
            .with_read_context("GeoJSON", "regions.geojson")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to read GeoJSON file 'regions.geojson': bad bytes"
        );
        assert_eq!(
            err.user_message(),
            "Failed to read GeoJSON file: regions.geojson"
        );
    }
}
