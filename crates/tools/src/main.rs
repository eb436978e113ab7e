use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use compute::{DEFAULT_MAX_NODES, JobSummary, SubdivideOptions, VectorKind, node_count};
use formats::{FeatureSource, GeoJsonFileSink, Schema, open_source};
use foundation::{Clock, SystemClock};
use runtime::{
    EtaConfig, JobProgress, NotifyPolicy, PhaseBands, ProgressCallback, ProgressNotifier,
    TracingSink,
};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Split large vector datasets into bounded-size features")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subdivide a GeoJSON or GeoJSONSeq file into newline-delimited GeoJSON
    Subdivide {
        /// Input file (FeatureCollection or one Feature per line)
        input: PathBuf,

        /// Output GeoJSONSeq file
        output: PathBuf,

        #[arg(long, value_enum, default_value_t = KindArg::Auto)]
        kind: KindArg,

        /// Maximum nodes per output part
        #[arg(long, default_value_t = DEFAULT_MAX_NODES)]
        max_nodes: usize,

        /// Features per sink write (default: SUBDIVIDE_BATCH_SIZE or 10000)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Job id used in progress logs
        #[arg(long, default_value = "local")]
        job_id: String,
    },

    /// Print schema, feature count and node total of a file
    Inspect {
        input: PathBuf,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum KindArg {
    Auto,
    Polygons,
    Lines,
    Points,
}

impl KindArg {
    fn resolve(self, schema: &Schema) -> Result<VectorKind, String> {
        match self {
            KindArg::Polygons => Ok(VectorKind::Polygons),
            KindArg::Lines => Ok(VectorKind::Lines),
            KindArg::Points => Ok(VectorKind::Points),
            KindArg::Auto => VectorKind::detect(schema).ok_or_else(|| {
                match schema.geometry_type {
                    Some(t) => format!("cannot subdivide {t} datasets"),
                    None => "mixed geometry types; pass --kind explicitly".to_string(),
                }
            }),
        }
    }
}

#[derive(Serialize)]
struct Inspection {
    path: String,
    features: u64,
    nodes: u64,
    kind: Option<&'static str>,
    schema: Schema,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Args::parse().command {
        Command::Subdivide {
            input,
            output,
            kind,
            max_nodes,
            batch_size,
            job_id,
        } => {
            let mut opts = SubdivideOptions::from_env().with_max_nodes(max_nodes);
            if let Some(n) = batch_size {
                opts.batch_size = n.max(1);
            }
            subdivide(&input, &output, kind, &opts, job_id)
        }
        Command::Inspect { input } => inspect(&input),
    }
}

fn subdivide(
    input: &Path,
    output: &Path,
    kind: KindArg,
    opts: &SubdivideOptions,
    job_id: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let notifier = ProgressNotifier::new(job_id, Arc::new(TracingSink), clock.clone(), NotifyPolicy::default())
        .with_origin("atlas-subdivide");
    let mut progress =
        JobProgress::new(PhaseBands::SCANNED, EtaConfig::default(), clock).with_notifier(notifier);
    progress.begin();

    let result = run_job(input, output, kind, opts, &mut progress);
    match result {
        Ok((summary, size)) => {
            progress.finish(json!({
                "path": output.display().to_string(),
                "size": size,
                "features": summary.features,
                "parts": summary.parts_written,
            }));
            info!(
                output = %output.display(),
                bytes = size,
                parts = summary.parts_written,
                "done"
            );
            Ok(())
        }
        Err(e) => {
            error!(input = %input.display(), "subdivision failed: {e}");
            progress.fail(&e.to_string());
            Err(e)
        }
    }
}

fn run_job(
    input: &Path,
    output: &Path,
    kind: KindArg,
    opts: &SubdivideOptions,
    progress: &mut dyn ProgressCallback,
) -> Result<(JobSummary, u64), Box<dyn std::error::Error>> {
    let mut source = open_source(input)?;
    let kind = kind.resolve(source.schema())?;
    let mut sink = GeoJsonFileSink::new(output);
    let summary = compute::run(kind, source.as_mut(), &mut sink, opts, progress)?;
    let size = std::fs::metadata(output)?.len();
    Ok((summary, size))
}

fn inspect(input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut source = open_source(input)?;
    let features = source.feature_count()?;
    let mut nodes = 0u64;
    for feature in source.features()? {
        nodes += node_count(&feature?.geometry) as u64;
    }
    let schema = source.schema().clone();
    let report = Inspection {
        path: input.display().to_string(),
        features,
        nodes,
        kind: VectorKind::detect(&schema).map(|k| k.as_str()),
        schema,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
