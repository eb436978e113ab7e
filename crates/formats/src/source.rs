use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::FormatError;
use crate::feature::{Feature, parse_feature_collection};
use crate::schema::Schema;

pub type FeatureIter<'a> = Box<dyn Iterator<Item = Result<Feature, FormatError>> + 'a>;

/// A readable, re-iterable collection of features.
///
/// `features` may be called more than once; each call starts a fresh pass.
pub trait FeatureSource {
    fn schema(&self) -> &Schema;

    /// Total number of features, used as the progress denominator.
    fn feature_count(&mut self) -> Result<u64, FormatError>;

    fn features(&mut self) -> Result<FeatureIter<'_>, FormatError>;
}

/// Features held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    schema: Schema,
    features: Vec<Feature>,
}

impl MemorySource {
    pub fn new(features: Vec<Feature>) -> Self {
        let schema = Schema::infer(&features);
        Self { schema, features }
    }

    pub fn into_features(self) -> Vec<Feature> {
        self.features
    }
}

impl FeatureSource for MemorySource {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn feature_count(&mut self) -> Result<u64, FormatError> {
        Ok(self.features.len() as u64)
    }

    fn features(&mut self) -> Result<FeatureIter<'_>, FormatError> {
        Ok(Box::new(self.features.iter().cloned().map(Ok)))
    }
}

/// Newline-delimited GeoJSON (one Feature per line) read from disk.
///
/// Blank lines and RFC 8142 record separators are skipped.
#[derive(Debug)]
pub struct GeoJsonSeqSource {
    path: PathBuf,
    schema: Schema,
    count: Option<u64>,
}

/// Number of leading features used for schema inference.
const SCHEMA_SAMPLE: usize = 256;

impl GeoJsonSeqSource {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, FormatError> {
        let path = path.into();
        let sample: Vec<Feature> = SeqLines::open(&path)?
            .take(SCHEMA_SAMPLE)
            .collect::<Result<_, _>>()?;
        let schema = Schema::infer(&sample);
        Ok(Self {
            path,
            schema,
            count: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FeatureSource for GeoJsonSeqSource {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn feature_count(&mut self) -> Result<u64, FormatError> {
        if let Some(n) = self.count {
            return Ok(n);
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut n = 0u64;
        for line in reader.lines() {
            if !is_blank(&line?) {
                n += 1;
            }
        }
        self.count = Some(n);
        Ok(n)
    }

    fn features(&mut self) -> Result<FeatureIter<'_>, FormatError> {
        Ok(Box::new(SeqLines::open(&self.path)?))
    }
}

fn is_blank(line: &str) -> bool {
    line.trim_matches(|c: char| c.is_whitespace() || c == '\u{1e}')
        .is_empty()
}

struct SeqLines {
    lines: std::io::Lines<BufReader<File>>,
    line_no: usize,
    index: usize,
}

impl SeqLines {
    fn open(path: &Path) -> Result<Self, FormatError> {
        Ok(Self {
            lines: BufReader::new(File::open(path)?).lines(),
            line_no: 0,
            index: 0,
        })
    }
}

impl Iterator for SeqLines {
    type Item = Result<Feature, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(l) => l,
                Err(e) => return Some(Err(FormatError::Io(e))),
            };
            self.line_no += 1;
            if is_blank(&line) {
                continue;
            }
            let text = line.trim_start_matches('\u{1e}');
            let value: Value = match serde_json::from_str(text) {
                Ok(v) => v,
                Err(e) => {
                    return Some(Err(FormatError::Parse {
                        line: self.line_no,
                        reason: e.to_string(),
                    }));
                }
            };
            let index = self.index;
            self.index += 1;
            return Some(Feature::from_geojson_value(&value, index).map_err(|e| match e {
                FormatError::InvalidFeature { reason, .. } => FormatError::Parse {
                    line: self.line_no,
                    reason,
                },
                other => other,
            }));
        }
    }
}

/// Opens `path` as either a FeatureCollection document or a GeoJSONSeq file,
/// deciding by the first non-blank byte sequence.
pub fn open_source(path: &Path) -> Result<Box<dyn FeatureSource>, FormatError> {
    let mut head = Vec::with_capacity(4096);
    File::open(path)?.take(4096).read_to_end(&mut head)?;
    if looks_like_collection(&String::from_utf8_lossy(&head)) {
        let mut payload = String::new();
        File::open(path)?.read_to_string(&mut payload)?;
        let features = parse_feature_collection(&payload)?;
        tracing::debug!(
            path = %path.display(),
            features = features.len(),
            "loaded feature collection"
        );
        return Ok(Box::new(MemorySource::new(features)));
    }
    Ok(Box::new(GeoJsonSeqSource::open(path)?))
}

fn looks_like_collection(head: &str) -> bool {
    // A FeatureCollection spans lines or at least mentions its type in the
    // first object; a seq file starts with a complete Feature per line.
    let first_line = head.lines().find(|l| !is_blank(l)).unwrap_or("");
    if serde_json::from_str::<Value>(first_line.trim_start_matches('\u{1e}'))
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|t| t == "Feature"))
        .unwrap_or(false)
    {
        return false;
    }
    head.contains("FeatureCollection")
}
