use formats::{FormatError, GeometryType};

/// Job-fatal failures of a vector processing run.
#[derive(Debug)]
pub enum ProcessError {
    /// A geometry kind the job cannot handle. `index` is the input feature,
    /// when known.
    UnsupportedGeometryType {
        index: Option<usize>,
        kind: GeometryType,
    },
    SourceReadFailure(FormatError),
    SinkWriteFailure(FormatError),
    /// `max_nodes` below what one output part of this kind needs.
    BudgetTooSmall { max_nodes: usize, min: usize },
}

impl ProcessError {
    pub fn unsupported(kind: GeometryType) -> Self {
        ProcessError::UnsupportedGeometryType { index: None, kind }
    }

    /// Attaches the input feature index to an unsupported-geometry error.
    pub fn at_feature(self, index: usize) -> Self {
        match self {
            ProcessError::UnsupportedGeometryType { kind, .. } => {
                ProcessError::UnsupportedGeometryType {
                    index: Some(index),
                    kind,
                }
            }
            other => other,
        }
    }
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessError::UnsupportedGeometryType {
                index: Some(i),
                kind,
            } => write!(f, "unsupported geometry type {kind} at feature {i}"),
            ProcessError::UnsupportedGeometryType { index: None, kind } => {
                write!(f, "unsupported geometry type {kind}")
            }
            ProcessError::SourceReadFailure(e) => write!(f, "failed to read source: {e}"),
            ProcessError::SinkWriteFailure(e) => write!(f, "failed to write output: {e}"),
            ProcessError::BudgetTooSmall { max_nodes, min } => {
                write!(f, "max nodes {max_nodes} is below the minimum of {min}")
            }
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcessError::SourceReadFailure(e) | ProcessError::SinkWriteFailure(e) => Some(e),
            _ => None,
        }
    }
}

/// A part that collapsed during normalization or splitting. Recoverable: the
/// part is dropped and processing continues.
#[derive(Debug, Clone, PartialEq)]
pub struct DegenerateGeometry {
    pub reason: &'static str,
}

impl std::fmt::Display for DegenerateGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "degenerate geometry: {}", self.reason)
    }
}

impl std::error::Error for DegenerateGeometry {}
