use crate::feature::GeometryType;

#[derive(Debug)]
pub enum FormatError {
    Io(std::io::Error),
    NotAFeatureCollection,
    /// A line of a newline-delimited stream could not be decoded (1-based).
    Parse { line: usize, reason: String },
    InvalidFeature { index: usize, reason: String },
    SchemaMismatch {
        expected: GeometryType,
        found: GeometryType,
    },
    /// A sink was written to before `open` or after `close`.
    NotOpen,
}

impl std::fmt::Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatError::Io(e) => write!(f, "i/o error: {e}"),
            FormatError::NotAFeatureCollection => {
                write!(f, "expected GeoJSON FeatureCollection")
            }
            FormatError::Parse { line, reason } => write!(f, "line {line}: {reason}"),
            FormatError::InvalidFeature { index, reason } => {
                write!(f, "invalid feature at index {index}: {reason}")
            }
            FormatError::SchemaMismatch { expected, found } => {
                write!(f, "sink declared {expected} geometries but got {found}")
            }
            FormatError::NotOpen => write!(f, "sink is not open"),
        }
    }
}

impl std::error::Error for FormatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FormatError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FormatError {
    fn from(e: std::io::Error) -> Self {
        FormatError::Io(e)
    }
}
