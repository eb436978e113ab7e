use compute::VectorKind;
use serde::Deserialize;

use crate::error::JobError;
use crate::storage::validate_key;

/// A number that may arrive as a JSON number or as a query-string text.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Lenient {
    Int(u64),
    Text(String),
}

impl Lenient {
    fn as_usize(&self) -> Option<usize> {
        match self {
            Lenient::Int(n) => usize::try_from(*n).ok(),
            Lenient::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Job parameters as sent, from either the query string or a JSON body.
/// Legacy spellings are accepted as aliases.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRequest {
    #[serde(rename = "sourceUrl", alias = "url")]
    pub source_url: Option<String>,
    #[serde(rename = "outputKey", alias = "key")]
    pub output_key: Option<String>,
    #[serde(rename = "maxNodes", alias = "max_nodes")]
    pub max_nodes: Option<Lenient>,
    #[serde(rename = "jobId", alias = "jobKey")]
    pub job_id: Option<String>,
    #[serde(rename = "notifyQueue", alias = "queueUrl")]
    pub notify_queue: Option<String>,
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// `None` detects the vector kind from the downloaded source.
    Vector(Option<VectorKind>),
    Raster,
}

/// A validated job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub source_url: String,
    pub output_key: Option<String>,
    pub max_nodes: Option<usize>,
    pub job_id: Option<String>,
    pub notify_queue: Option<String>,
    pub kind: JobKind,
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

impl JobRequest {
    /// Merges query parameters over body fields and validates the result.
    pub fn from_parts(query: RawRequest, body: RawRequest) -> Result<Self, JobError> {
        let source_url = non_empty(query.source_url)
            .or_else(|| non_empty(body.source_url))
            .ok_or(JobError::MissingParameter("url"))?;

        let kind = match non_empty(query.kind).or_else(|| non_empty(body.kind)) {
            None => JobKind::Vector(None),
            Some(k) if k == "auto" => JobKind::Vector(None),
            Some(k) if k == "raster" => JobKind::Raster,
            Some(k) => match VectorKind::from_name(&k) {
                Some(v) => JobKind::Vector(Some(v)),
                None => return Err(JobError::InvalidParameter(format!("unknown kind {k:?}"))),
            },
        };

        let max_nodes = match query.max_nodes.or(body.max_nodes) {
            None => None,
            Some(raw) => match raw.as_usize() {
                Some(n) if n > 0 => Some(n),
                _ => {
                    return Err(JobError::InvalidParameter(format!(
                        "maxNodes must be a positive integer, got {raw:?}"
                    )))
                }
            },
        };
        // auto-detected kinds are checked once the source is open
        if let (Some(n), JobKind::Vector(Some(k))) = (max_nodes, kind) {
            if n < k.min_budget() {
                return Err(JobError::InvalidParameter(format!(
                    "maxNodes {n} is below the minimum of {} for {}",
                    k.min_budget(),
                    k.as_str()
                )));
            }
        }

        let output_key = match non_empty(query.output_key).or_else(|| non_empty(body.output_key)) {
            Some(key) => Some(validate_key(&key)?),
            None => None,
        };

        Ok(Self {
            source_url,
            output_key,
            max_nodes,
            job_id: non_empty(query.job_id).or_else(|| non_empty(body.job_id)),
            notify_queue: non_empty(query.notify_queue).or_else(|| non_empty(body.notify_queue)),
            kind,
        })
    }

    /// Only http(s) sources are fetched, plus `file://` when the worker is
    /// configured to read local files.
    pub fn check_source(&self, allow_local: bool) -> Result<(), JobError> {
        let scheme = self
            .source_url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase());
        match scheme.as_deref() {
            Some("http") | Some("https") => Ok(()),
            Some("file") if allow_local => Ok(()),
            Some("file") => Err(JobError::InvalidParameter(
                "local file sources are disabled".to_string(),
            )),
            _ => Err(JobError::InvalidParameter(format!(
                "unsupported source url {:?}",
                self.source_url
            ))),
        }
    }
}
