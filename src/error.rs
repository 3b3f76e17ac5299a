use std::error::Error;
use std::fmt;

/// Errors raised while turning variant annotations into a rewritten structure.
///
/// `MalformedRecord` is recovered row by row by the parser; the others end the
/// run for one protein without touching the rest of a batch.
#[derive(Debug)]
pub enum PipelineError {
    /// A variant table row could not be decoded (1-based line in the table).
    MalformedRecord { line: usize, reason: String },
    /// A structure line does not fit the fixed-column layout, or a formatted
    /// value does not fit its column.
    FormatViolation { line: usize, reason: String },
    /// The data source produced nothing usable for this identifier.
    SourceUnavailable { identifier: String, reason: String },
    Io(std::io::Error),
    Csv(csv::Error),
    Http(reqwest::Error),
    Json(serde_json::Error),
}

impl PipelineError {
    pub fn malformed(line: usize, reason: impl Into<String>) -> Self {
        PipelineError::MalformedRecord {
            line,
            reason: reason.into(),
        }
    }

    pub fn format_violation(line: usize, reason: impl Into<String>) -> Self {
        PipelineError::FormatViolation {
            line,
            reason: reason.into(),
        }
    }

    pub fn unavailable(identifier: &str, reason: impl Into<String>) -> Self {
        PipelineError::SourceUnavailable {
            identifier: identifier.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::MalformedRecord { line, reason } => {
                write!(f, "Malformed variant record at line {line}: {reason}")
            }
            PipelineError::FormatViolation { line, reason } => {
                write!(f, "Structure format violation at line {line}: {reason}")
            }
            PipelineError::SourceUnavailable { identifier, reason } => {
                write!(f, "No usable data for {identifier}: {reason}")
            }
            PipelineError::Io(e) => write!(f, "IO error: {e}"),
            PipelineError::Csv(e) => write!(f, "CSV error: {e}"),
            PipelineError::Http(e) => write!(f, "Reqwest error: {e}"),
            PipelineError::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PipelineError::Io(e) => Some(e),
            PipelineError::Csv(e) => Some(e),
            PipelineError::Http(e) => Some(e),
            PipelineError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Io(e)
    }
}

impl From<csv::Error> for PipelineError {
    fn from(e: csv::Error) -> Self {
        PipelineError::Csv(e)
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        PipelineError::Http(e)
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Json(e)
    }
}
