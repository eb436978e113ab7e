use std::path::Path;
use std::sync::Arc;

use compute::{summary_value, JobSummary, ProcessError, SubdivideOptions, VectorKind};
use formats::{open_source, GeoJsonFileSink};
use foundation::Clock;
use runtime::{EtaConfig, JobProgress, PhaseBands, ProgressCallback, ProgressNotifier};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::download::download;
use crate::error::JobError;
use crate::notify::{spawn_poster, ClientCache};
use crate::raster::GdalEngine;
use crate::request::{JobKind, JobRequest};
use crate::storage::{ObjectStore, StoredObject};

const ORIGIN: &str = "subdivision";

/// Shared state of the worker process.
#[derive(Clone)]
pub struct WorkerContext {
    pub config: Arc<WorkerConfig>,
    pub http: reqwest::Client,
    pub clients: Arc<ClientCache>,
    pub store: ObjectStore,
    pub raster: GdalEngine,
    pub clock: Arc<dyn Clock>,
}

impl WorkerContext {
    pub fn new(config: WorkerConfig, clock: Arc<dyn Clock>) -> Self {
        let http = reqwest::Client::new();
        Self {
            clients: Arc::new(ClientCache::new(config.default_region.clone())),
            store: ObjectStore::new(
                config.store.clone(),
                config.public_base_url.clone(),
                http.clone(),
            ),
            raster: GdalEngine::new(config.raster.clone()),
            config: Arc::new(config),
            http,
            clock,
        }
    }
}

/// Body returned to the invoker of a successful job.
#[derive(Debug, Clone, Serialize)]
pub struct JobResponse {
    pub ok: bool,
    pub uploaded: bool,
    pub object: Option<StoredObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
}

struct Outcome {
    object: Option<StoredObject>,
    summary: Option<JobSummary>,
}

impl Outcome {
    /// Payload of the `result` event.
    fn result_object(&self) -> Value {
        match (&self.object, &self.summary) {
            (Some(object), _) => serde_json::to_value(object).unwrap_or(Value::Null),
            (None, Some(summary)) => summary_value(summary),
            (None, None) => json!({}),
        }
    }
}

/// Runs one job end to end. Events go to the notify queue when the request
/// names both a job id and a queue.
pub async fn run_job(ctx: &WorkerContext, req: JobRequest) -> Result<JobResponse, JobError> {
    req.check_source(ctx.config.allow_local_sources)?;
    let job_id = req
        .job_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let mut progress = job_progress(ctx, req.kind);

    let mut poster = None;
    if let (Some(_), Some(queue)) = (&req.job_id, &req.notify_queue) {
        let (sink, handle) = spawn_poster(&ctx.clients, queue.clone());
        let notifier = ProgressNotifier::new(
            job_id.clone(),
            Arc::new(sink),
            ctx.clock.clone(),
            ctx.config.notify.clone(),
        )
        .with_queue_url(queue.clone())
        .with_origin(ORIGIN);
        progress = progress.with_notifier(notifier);
        poster = Some(handle);
    }

    let span = info_span!("job", job = %job_id);
    let result = drive(ctx, &req, &mut progress).instrument(span).await;
    drop(progress);

    if let Some(handle) = poster {
        match handle.await {
            Ok(delivered) => info!(job = %job_id, delivered, "notifications flushed"),
            Err(e) => error!(job = %job_id, "notify poster panicked: {e}"),
        }
    }
    result
}

fn job_progress(ctx: &WorkerContext, kind: JobKind) -> JobProgress {
    let bands = match kind {
        JobKind::Vector(_) => PhaseBands::VECTOR,
        JobKind::Raster => PhaseBands::SCANNED,
    };
    JobProgress::new(bands, EtaConfig::default(), ctx.clock.clone())
}

/// begin, execute, then finish or fail on `progress`.
async fn drive(
    ctx: &WorkerContext,
    req: &JobRequest,
    progress: &mut JobProgress,
) -> Result<JobResponse, JobError> {
    progress.begin();
    match execute(ctx, req, progress).await {
        Ok(outcome) => {
            progress.finish(outcome.result_object());
            Ok(JobResponse {
                ok: true,
                uploaded: outcome.object.is_some(),
                summary: outcome.summary.as_ref().map(summary_value),
                object: outcome.object,
            })
        }
        Err(e) => {
            error!("job failed: {e}");
            progress.fail(&e.to_string());
            Err(e)
        }
    }
}

async fn execute(
    ctx: &WorkerContext,
    req: &JobRequest,
    progress: &mut (dyn ProgressCallback + Send),
) -> Result<Outcome, JobError> {
    tokio::fs::create_dir_all(&ctx.config.work_dir).await?;
    let work = tempfile::TempDir::new_in(&ctx.config.work_dir)?;
    let input = work.path().join("input");
    let bytes = download(&ctx.http, &req.source_url, &input, progress).await?;
    info!(url = %req.source_url, bytes, "source downloaded");

    let (output, summary) = match req.kind {
        JobKind::Vector(kind) => {
            let output = work.path().join("output.geojsonl");
            let opts = ctx.config.subdivide_options(req.max_nodes);
            let summary = tokio::task::block_in_place(|| {
                process_vector(&input, &output, kind, &opts, progress)
            })?;
            (output, Some(summary))
        }
        JobKind::Raster => {
            let output = work.path().join("output.tif");
            ctx.raster.process(&input, &output, progress).await?;
            (output, None)
        }
    };

    let object = match &req.output_key {
        Some(key) => Some(ctx.store.put(&output, key, progress).await?),
        None => {
            info!("no output key; skipping upload");
            None
        }
    };
    Ok(Outcome { object, summary })
}

fn process_vector(
    input: &Path,
    output: &Path,
    kind: Option<VectorKind>,
    opts: &SubdivideOptions,
    progress: &mut (dyn ProgressCallback + Send),
) -> Result<JobSummary, JobError> {
    let mut source = open_source(input).map_err(ProcessError::SourceReadFailure)?;
    let kind = match kind.or_else(|| VectorKind::detect(source.schema())) {
        Some(kind) => kind,
        None => {
            return Err(match source.schema().geometry_type {
                Some(t) => ProcessError::unsupported(t).into(),
                None => JobError::InvalidParameter(
                    "mixed geometry types; pass kind explicitly".to_string(),
                ),
            })
        }
    };
    let mut sink = GeoJsonFileSink::new(output);
    Ok(compute::run(kind, source.as_mut(), &mut sink, opts, progress)?)
}

#[cfg(test)]
mod tests {
    use super::{drive, job_progress, WorkerContext};
    use crate::config::test_config;
    use crate::error::JobError;
    use crate::notify::capture;
    use crate::request::{JobKind, JobRequest};
    use compute::VectorKind;
    use foundation::ManualClock;
    use runtime::{JobEvent, JobMessage, NotifyPolicy, ProgressNotifier};
    use serde_json::json;
    use std::path::Path;
    use std::sync::Arc;

    fn context(root: &Path) -> WorkerContext {
        WorkerContext::new(test_config(root), Arc::new(ManualClock::new(1_700_000_000_000)))
    }

    fn request(url: String, key: Option<&str>, kind: JobKind) -> JobRequest {
        JobRequest {
            source_url: url,
            output_key: key.map(str::to_string),
            max_nodes: Some(4),
            job_id: Some("job-1".to_string()),
            notify_queue: None,
            kind,
        }
    }

    fn write_lines(path: &Path) {
        let collection = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {"name": "road"},
                "geometry": {
                    "type": "LineString",
                    "coordinates": [[0, 0], [0.1, 0], [0.2, 0], [0.3, 0], [0.4, 0], [0.5, 0], [0.6, 0]],
                },
            }],
        });
        std::fs::write(path, collection.to_string()).unwrap();
    }

    async fn drive_captured(
        ctx: &WorkerContext,
        req: &JobRequest,
    ) -> (Result<super::JobResponse, JobError>, Vec<JobMessage>) {
        let (sink, mut rx) = capture();
        let notifier = ProgressNotifier::new(
            "job-1",
            Arc::new(sink),
            ctx.clock.clone(),
            NotifyPolicy::default(),
        );
        let mut progress = job_progress(ctx, req.kind).with_notifier(notifier);
        let result = drive(ctx, req, &mut progress).await;
        drop(progress);
        let mut messages = Vec::new();
        while let Ok(m) = rx.try_recv() {
            messages.push(m);
        }
        (result, messages)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn vector_job_uploads_and_reports_completion() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("roads.geojson");
        write_lines(&src);
        let ctx = context(dir.path());
        let req = request(
            format!("file://{}", src.display()),
            Some("jobs/1/roads.geojsonl"),
            JobKind::Vector(None),
        );

        let (result, messages) = drive_captured(&ctx, &req).await;
        let response = result.unwrap();
        assert!(response.ok);
        assert!(response.uploaded);
        assert_eq!(response.summary.as_ref().unwrap()["parts"], json!(2));

        let stored = std::fs::read_to_string(dir.path().join("store/jobs/1/roads.geojsonl")).unwrap();
        assert_eq!(stored.lines().count(), 2);

        let kinds: Vec<_> = messages.iter().map(|m| m.event.kind()).collect();
        assert_eq!(kinds.first(), Some(&"begin"));
        assert_eq!(&kinds[kinds.len() - 2..], &["progress", "result"]);
        match &messages[messages.len() - 2].event {
            JobEvent::Progress { percent, message, .. } => {
                assert_eq!(*percent, 100);
                assert_eq!(message.as_deref(), Some("Complete"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        match &messages[messages.len() - 1].event {
            JobEvent::Result { object } => {
                assert_eq!(object["key"], json!("jobs/1/roads.geojsonl"));
                assert_eq!(
                    object["publicUrl"],
                    json!("https://tiles.example.com/jobs/1/roads.geojsonl")
                );
            }
            other => panic!("unexpected event {other:?}"),
        }

        let percents: Vec<u8> = messages
            .iter()
            .filter_map(|m| match m.event {
                JobEvent::Progress { percent, .. } => Some(percent),
                _ => None,
            })
            .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn without_a_key_the_summary_is_the_result() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("roads.geojson");
        write_lines(&src);
        let ctx = context(dir.path());
        let req = request(
            format!("file://{}", src.display()),
            None,
            JobKind::Vector(Some(VectorKind::Lines)),
        );

        let (result, messages) = drive_captured(&ctx, &req).await;
        let response = result.unwrap();
        assert!(!response.uploaded);
        assert!(response.object.is_none());
        match &messages.last().unwrap().event {
            JobEvent::Result { object } => assert_eq!(object["features"], json!(1)),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(!dir.path().join("store").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failures_emit_an_error_event() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let req = request(
            "file:///no/such/source.geojson".to_string(),
            Some("out.geojsonl"),
            JobKind::Vector(None),
        );

        let (result, messages) = drive_captured(&ctx, &req).await;
        assert!(matches!(result, Err(JobError::Download(_))));
        let kinds: Vec<_> = messages.iter().map(|m| m.event.kind()).collect();
        assert_eq!(kinds, vec!["begin", "error"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn points_in_a_polygon_job_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("pts.geojson");
        let collection = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {},
                "geometry": {"type": "Point", "coordinates": [1, 2]},
            }],
        });
        std::fs::write(&src, collection.to_string()).unwrap();
        let ctx = context(dir.path());
        let req = request(
            format!("file://{}", src.display()),
            None,
            JobKind::Vector(Some(VectorKind::Polygons)),
        );

        let (result, _) = drive_captured(&ctx, &req).await;
        let err = result.unwrap_err();
        assert!(matches!(err, JobError::Process(_)));
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
