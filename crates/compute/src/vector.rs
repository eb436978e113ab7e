use std::env;

use foundation::math::{line_length_km, polygon_area_km2};
use formats::{
    Feature, FeatureSink, FeatureSource, GeometryType, PropertyType, Schema, output_schema,
};
use geo::{Geometry, Point};
use runtime::{Phase, ProgressCallback};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::antimeridian::{normalize_line, normalize_polygon};
use crate::error::ProcessError;
use crate::flatten::{flatten_lines, flatten_points, flatten_polygons};
use crate::line::{MIN_LINE_BUDGET, subdivide_line};
use crate::nodes::node_count;
use crate::polygon::{MIN_POLYGON_BUDGET, PolygonPart, PolygonSubdivider, clean_rings};

/// Input feature index carried by every output part.
pub const ORIGIN_INDEX: &str = "__oidx";
/// Geodesic area in km², polygons only.
pub const AREA_KM2: &str = "__area";
/// Geodesic length in km, lines only.
pub const LENGTH_KM: &str = "__lengthKm";

pub const DEFAULT_MAX_NODES: usize = 256;
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubdivideOptions {
    /// Node budget per output part.
    pub max_nodes: usize,
    /// Features buffered before a sink write.
    pub batch_size: usize,
}

impl Default for SubdivideOptions {
    fn default() -> Self {
        Self {
            max_nodes: DEFAULT_MAX_NODES,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl SubdivideOptions {
    /// Defaults with `SUBDIVIDE_BATCH_SIZE` applied.
    pub fn from_env() -> Self {
        let batch_size = env::var("SUBDIVIDE_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_BATCH_SIZE);
        Self {
            batch_size,
            ..Self::default()
        }
    }

    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    /// Rejects budgets a `kind` part cannot satisfy.
    pub fn check(&self, kind: VectorKind) -> Result<(), ProcessError> {
        let min = kind.min_budget();
        if self.max_nodes < min {
            return Err(ProcessError::BudgetTooSmall {
                max_nodes: self.max_nodes,
                min,
            });
        }
        Ok(())
    }
}

/// Which driver handles a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorKind {
    Polygons,
    Lines,
    Points,
}

impl VectorKind {
    /// Picks the driver from a source schema. Mixed or unknown geometry types
    /// yield `None`.
    pub fn detect(schema: &Schema) -> Option<Self> {
        let ty = schema.geometry_type?;
        if ty.is_polygonal() {
            Some(VectorKind::Polygons)
        } else if ty.is_lineal() {
            Some(VectorKind::Lines)
        } else if ty.is_puntal() {
            Some(VectorKind::Points)
        } else {
            None
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "polygons" | "polygon" => Some(VectorKind::Polygons),
            "lines" | "line" => Some(VectorKind::Lines),
            "points" | "point" => Some(VectorKind::Points),
            _ => None,
        }
    }

    /// Smallest node budget one output part can meet: a closed ring for
    /// polygons, two coordinates for lines.
    pub fn min_budget(&self) -> usize {
        match self {
            VectorKind::Polygons => MIN_POLYGON_BUDGET,
            VectorKind::Lines => MIN_LINE_BUDGET,
            VectorKind::Points => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VectorKind::Polygons => "polygons",
            VectorKind::Lines => "lines",
            VectorKind::Points => "points",
        }
    }
}

/// Counters of one finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSummary {
    pub features: u64,
    /// Features written without subdivision.
    pub small_features: u64,
    /// Features with at least one part over budget.
    pub big_features: u64,
    pub parts_written: u64,
    pub degenerate_parts: u64,
    pub nodes_scanned: u64,
    pub nodes_processed: u64,
}

impl JobSummary {
    fn log(&self, kind: VectorKind) {
        info!(
            kind = kind.as_str(),
            features = self.features,
            small = self.small_features,
            big = self.big_features,
            parts = self.parts_written,
            degenerate = self.degenerate_parts,
            nodes = self.nodes_scanned,
            "subdivision finished"
        );
    }
}

/// Buffers output features and hands them to the sink in fixed-size
/// batches.
struct BatchWriter<'a> {
    sink: &'a mut dyn FeatureSink,
    buffer: Vec<Feature>,
    batch_size: usize,
    written: u64,
}

impl<'a> BatchWriter<'a> {
    fn new(sink: &'a mut dyn FeatureSink, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            sink,
            buffer: Vec::with_capacity(batch_size.min(DEFAULT_BATCH_SIZE)),
            batch_size,
            written: 0,
        }
    }

    fn push(&mut self, feature: Feature) -> Result<(), ProcessError> {
        self.buffer.push(feature);
        self.written += 1;
        if self.buffer.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ProcessError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.sink
            .write_batch(&self.buffer)
            .map_err(ProcessError::SinkWriteFailure)?;
        debug!(features = self.buffer.len(), "batch flushed");
        self.buffer.clear();
        Ok(())
    }

    /// Flushes whatever is buffered. On success the sink is closed; on
    /// failure the partial output stays unclosed and the pass error wins.
    fn finish(mut self, outcome: Result<(), ProcessError>) -> Result<u64, ProcessError> {
        match outcome {
            Ok(()) => {
                self.flush()?;
                self.sink.close().map_err(ProcessError::SinkWriteFailure)?;
                Ok(self.written)
            }
            Err(e) => {
                if let Err(flush) = self.flush() {
                    warn!(error = %flush, "failed to flush partial batch");
                }
                Err(e)
            }
        }
    }
}

/// First pass: counts nodes for the progress denominator.
fn scan(
    source: &mut dyn FeatureSource,
    progress: &mut dyn ProgressCallback,
) -> Result<u64, ProcessError> {
    let total = source
        .feature_count()
        .map_err(ProcessError::SourceReadFailure)?;
    let mut nodes = 0u64;
    let features = source.features().map_err(ProcessError::SourceReadFailure)?;
    for (index, item) in features.enumerate() {
        let feature = item.map_err(ProcessError::SourceReadFailure)?;
        nodes += node_count(&feature.geometry) as u64;
        progress.on_progress(Phase::Scanning, index as u64 + 1, Some(total));
    }
    debug!(features = total, nodes, "scan finished");
    Ok(nodes)
}

fn output_part(source: &Feature, geometry: Geometry<f64>, index: usize) -> Feature {
    let mut properties = source.properties.clone();
    properties.insert(ORIGIN_INDEX.to_string(), json!(index));
    Feature {
        id: source.id.clone(),
        properties,
        geometry,
    }
}

fn sink_schema(source: &dyn FeatureSource, geometry: GeometryType, metric: Option<&str>) -> Schema {
    let schema = output_schema(source.schema(), geometry).with_property(ORIGIN_INDEX, PropertyType::Int);
    match metric {
        Some(name) => schema.with_property(name, PropertyType::Float),
        None => schema,
    }
}

/// Splits every polygon of `source` into parts of at most
/// `opts.max_nodes` exterior vertices, cutting at the antimeridian first.
///
/// Parts carry `__oidx` and `__area` (km²); an `__area` already present on
/// the input is kept.
pub fn subdivide_polygons(
    source: &mut dyn FeatureSource,
    sink: &mut dyn FeatureSink,
    opts: &SubdivideOptions,
    progress: &mut dyn ProgressCallback,
) -> Result<JobSummary, ProcessError> {
    opts.check(VectorKind::Polygons)?;
    let nodes = scan(source, progress)?;
    let total_nodes = nodes.max(1);
    progress.on_progress(Phase::ProcessingStart, 0, Some(total_nodes));

    let schema = sink_schema(source, GeometryType::Polygon, Some(AREA_KM2));
    sink.open(&schema).map_err(ProcessError::SinkWriteFailure)?;

    let mut summary = JobSummary {
        nodes_scanned: nodes,
        ..JobSummary::default()
    };
    let mut writer = BatchWriter::new(sink, opts.batch_size);
    let subdivider = PolygonSubdivider::new(opts.max_nodes);
    let outcome = polygon_pass(source, &mut writer, &subdivider, &mut summary, total_nodes, progress);
    writer.finish(outcome)?;

    summary.small_features = summary.features - summary.big_features;
    summary.log(VectorKind::Polygons);
    Ok(summary)
}

fn polygon_pass(
    source: &mut dyn FeatureSource,
    writer: &mut BatchWriter<'_>,
    subdivider: &PolygonSubdivider,
    summary: &mut JobSummary,
    total_nodes: u64,
    progress: &mut dyn ProgressCallback,
) -> Result<(), ProcessError> {
    let features = source.features().map_err(ProcessError::SourceReadFailure)?;
    for (index, item) in features.enumerate() {
        let feature = item.map_err(ProcessError::SourceReadFailure)?;
        let polygons = flatten_polygons(&feature.geometry).map_err(|e| e.at_feature(index))?;
        let keep_area = feature.properties.contains_key(AREA_KM2);
        let mut big = false;

        for polygon in &polygons {
            for piece in normalize_polygon(polygon).iter() {
                let piece = match clean_rings(piece) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(index, reason = e.reason, "dropping degenerate polygon");
                        summary.degenerate_parts += 1;
                        continue;
                    }
                };
                let mut parts = Vec::new();
                if piece.exterior().0.len() > subdivider.max_nodes() {
                    big = true;
                    subdivider.subdivide(piece, |r| parts.push(r));
                } else {
                    parts.push(Ok(PolygonPart {
                        nodes: piece.exterior().0.len(),
                        polygon: piece,
                        split: false,
                    }));
                }

                for part in parts {
                    let part = match part {
                        Ok(p) => p,
                        Err(e) => {
                            debug!(index, reason = e.reason, "dropping degenerate part");
                            summary.degenerate_parts += 1;
                            continue;
                        }
                    };
                    // split parts share one vertex with a sibling
                    summary.nodes_processed += if part.split {
                        part.nodes.saturating_sub(1) as u64
                    } else {
                        part.nodes as u64
                    };
                    let area = polygon_area_km2(&part.polygon);
                    let mut out = output_part(&feature, Geometry::Polygon(part.polygon), index);
                    if !keep_area {
                        out.properties.insert(AREA_KM2.to_string(), json!(area));
                    }
                    writer.push(out)?;
                    summary.parts_written += 1;
                    progress.on_progress(Phase::Processing, summary.nodes_processed, Some(total_nodes));
                }
            }
        }

        summary.features += 1;
        if big {
            summary.big_features += 1;
        }
    }
    Ok(())
}

/// Splits every line of `source` into pieces of at most `opts.max_nodes`
/// coordinates. Pieces carry `__oidx` and `__lengthKm`.
pub fn subdivide_lines(
    source: &mut dyn FeatureSource,
    sink: &mut dyn FeatureSink,
    opts: &SubdivideOptions,
    progress: &mut dyn ProgressCallback,
) -> Result<JobSummary, ProcessError> {
    opts.check(VectorKind::Lines)?;
    let nodes = scan(source, progress)?;
    let total_nodes = nodes.max(1);
    progress.on_progress(Phase::ProcessingStart, 0, Some(total_nodes));

    let schema = sink_schema(source, GeometryType::LineString, Some(LENGTH_KM));
    sink.open(&schema).map_err(ProcessError::SinkWriteFailure)?;

    let mut summary = JobSummary {
        nodes_scanned: nodes,
        ..JobSummary::default()
    };
    let mut writer = BatchWriter::new(sink, opts.batch_size);
    let outcome = line_pass(source, &mut writer, opts.max_nodes, &mut summary, total_nodes, progress);
    writer.finish(outcome)?;

    summary.small_features = summary.features - summary.big_features;
    summary.log(VectorKind::Lines);
    Ok(summary)
}

fn line_pass(
    source: &mut dyn FeatureSource,
    writer: &mut BatchWriter<'_>,
    max_nodes: usize,
    summary: &mut JobSummary,
    total_nodes: u64,
    progress: &mut dyn ProgressCallback,
) -> Result<(), ProcessError> {
    let features = source.features().map_err(ProcessError::SourceReadFailure)?;
    for (index, item) in features.enumerate() {
        let feature = item.map_err(ProcessError::SourceReadFailure)?;
        let lines = flatten_lines(&feature.geometry).map_err(|e| e.at_feature(index))?;
        let mut big = false;

        for line in &lines {
            for piece in normalize_line(line).iter() {
                big |= piece.0.len() > max_nodes;
                for part in subdivide_line(piece, max_nodes) {
                    summary.nodes_processed += part.0.len() as u64;
                    let length = line_length_km(&part);
                    let mut out = output_part(&feature, Geometry::LineString(part), index);
                    out.properties.insert(LENGTH_KM.to_string(), json!(length));
                    writer.push(out)?;
                    summary.parts_written += 1;
                    progress.on_progress(Phase::Processing, summary.nodes_processed, Some(total_nodes));
                }
            }
        }

        summary.features += 1;
        if big {
            summary.big_features += 1;
        }
    }
    Ok(())
}

/// Explodes multipoints so every output feature is a single Point with
/// `__oidx`. Progress is measured in points.
pub fn explode_points(
    source: &mut dyn FeatureSource,
    sink: &mut dyn FeatureSink,
    opts: &SubdivideOptions,
    progress: &mut dyn ProgressCallback,
) -> Result<JobSummary, ProcessError> {
    opts.check(VectorKind::Points)?;
    let points = scan(source, progress)?;
    let total_points = points.max(1);
    progress.on_progress(Phase::ProcessingStart, 0, Some(total_points));

    let schema = sink_schema(source, GeometryType::Point, None);
    sink.open(&schema).map_err(ProcessError::SinkWriteFailure)?;

    let mut summary = JobSummary {
        nodes_scanned: points,
        ..JobSummary::default()
    };
    let mut writer = BatchWriter::new(sink, opts.batch_size);
    let outcome = point_pass(source, &mut writer, &mut summary, total_points, progress);
    writer.finish(outcome)?;

    summary.small_features = summary.features - summary.big_features;
    summary.log(VectorKind::Points);
    Ok(summary)
}

fn point_pass(
    source: &mut dyn FeatureSource,
    writer: &mut BatchWriter<'_>,
    summary: &mut JobSummary,
    total_points: u64,
    progress: &mut dyn ProgressCallback,
) -> Result<(), ProcessError> {
    let features = source.features().map_err(ProcessError::SourceReadFailure)?;
    for (index, item) in features.enumerate() {
        let feature = item.map_err(ProcessError::SourceReadFailure)?;
        let points: Vec<Point<f64>> =
            flatten_points(&feature.geometry).map_err(|e| e.at_feature(index))?;
        if points.len() > 1 {
            summary.big_features += 1;
        }
        for point in points {
            writer.push(output_part(&feature, Geometry::Point(point), index))?;
            summary.parts_written += 1;
            summary.nodes_processed += 1;
            progress.on_progress(Phase::Processing, summary.nodes_processed, Some(total_points));
        }
        summary.features += 1;
    }
    Ok(())
}

/// Runs the driver for `kind`.
pub fn run(
    kind: VectorKind,
    source: &mut dyn FeatureSource,
    sink: &mut dyn FeatureSink,
    opts: &SubdivideOptions,
    progress: &mut dyn ProgressCallback,
) -> Result<JobSummary, ProcessError> {
    info!(
        kind = kind.as_str(),
        max_nodes = opts.max_nodes,
        batch_size = opts.batch_size,
        "starting vector job"
    );
    match kind {
        VectorKind::Polygons => subdivide_polygons(source, sink, opts, progress),
        VectorKind::Lines => subdivide_lines(source, sink, opts, progress),
        VectorKind::Points => explode_points(source, sink, opts, progress),
    }
}

/// Summary as a JSON object, for job results.
pub fn summary_value(summary: &JobSummary) -> Value {
    json!({
        "features": summary.features,
        "smallFeatures": summary.small_features,
        "bigFeatures": summary.big_features,
        "parts": summary.parts_written,
        "degenerateParts": summary.degenerate_parts,
        "nodes": summary.nodes_scanned,
    })
}

#[cfg(test)]
mod tests {
    use super::{
        AREA_KM2, JobSummary, LENGTH_KM, ORIGIN_INDEX, SubdivideOptions, VectorKind,
        explode_points, run, subdivide_lines, subdivide_polygons,
    };
    use crate::error::ProcessError;
    use foundation::math::polygon_area_km2;
    use formats::{
        Feature, FeatureSource, GeometryType, MemorySink, MemorySource, PropertyType, Properties,
    };
    use geo::{
        Coord, Geometry, LineString, MultiPoint, Polygon, coord, line_string, point, polygon,
    };
    use runtime::{NoProgress, Phase, PhaseBands, ProgressTracker};
    use serde_json::json;

    fn props(pairs: &[(&str, serde_json::Value)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn ring(n: usize, x0: f64) -> Polygon<f64> {
        // n vertices on a circle, avoiding vertices on the bisecting lines
        let mut coords: Vec<Coord<f64>> = (0..n)
            .map(|i| {
                let a = (i as f64 + 0.37) / n as f64 * std::f64::consts::TAU;
                coord! { x: x0 + a.cos(), y: a.sin() }
            })
            .collect();
        coords.push(coords[0]);
        Polygon::new(LineString(coords), vec![])
    }

    fn oidx(f: &Feature) -> u64 {
        f.properties[ORIGIN_INDEX].as_u64().unwrap_or(u64::MAX)
    }

    fn no_adjacent_jump(coords: &[Coord<f64>]) -> bool {
        coords.windows(2).all(|w| (w[1].x - w[0].x).abs() <= 180.0)
    }

    #[test]
    fn polygons_respect_budget_and_track_origin() {
        let mut source = MemorySource::new(vec![
            Feature::new(ring(10, 0.0), props(&[("name", json!("small"))])),
            Feature::new(ring(1000, 5.0), props(&[("name", json!("big"))])),
        ]);
        let mut sink = MemorySink::new();
        let opts = SubdivideOptions::default();
        let summary = subdivide_polygons(&mut source, &mut sink, &opts, &mut NoProgress).unwrap();

        assert_eq!(summary.features, 2);
        assert_eq!(summary.small_features, 1);
        assert_eq!(summary.big_features, 1);
        assert_eq!(summary.parts_written, sink.features.len() as u64);
        assert!(sink.features.len() >= 5);
        assert!(sink.closed);

        for f in &sink.features {
            let Geometry::Polygon(p) = &f.geometry else {
                panic!("expected polygon, got {}", f.geometry_type());
            };
            assert!(p.exterior().0.len() <= 256);
            assert!(f.properties[AREA_KM2].as_f64().unwrap() > 0.0);
        }
        assert_eq!(oidx(&sink.features[0]), 0);
        assert_eq!(sink.features[0].properties["name"], json!("small"));
        assert!(sink.features[1..].iter().all(|f| oidx(f) == 1));

        let schema = sink.schema().unwrap();
        assert_eq!(schema.geometry_type, Some(GeometryType::Polygon));
        assert_eq!(schema.property(ORIGIN_INDEX), Some(PropertyType::Int));
        assert_eq!(schema.property(AREA_KM2), Some(PropertyType::Float));
    }

    #[test]
    fn existing_area_is_kept() {
        let mut source = MemorySource::new(vec![Feature::new(
            ring(8, 0.0),
            props(&[(AREA_KM2, json!(42.0))]),
        )]);
        let mut sink = MemorySink::new();
        subdivide_polygons(&mut source, &mut sink, &SubdivideOptions::default(), &mut NoProgress)
            .unwrap();
        assert_eq!(sink.features[0].properties[AREA_KM2], json!(42.0));
    }

    #[test]
    fn dateline_polygons_come_out_split() {
        let p = polygon![
            (x: 170.0, y: 0.0), (x: -170.0, y: 0.0), (x: -170.0, y: 10.0),
            (x: 170.0, y: 10.0), (x: 170.0, y: 0.0)
        ];
        let mut source = MemorySource::new(vec![Feature::new(p, Properties::new())]);
        let mut sink = MemorySink::new();
        let summary =
            subdivide_polygons(&mut source, &mut sink, &SubdivideOptions::default(), &mut NoProgress)
                .unwrap();
        assert_eq!(summary.parts_written, 2);
        for f in &sink.features {
            let Geometry::Polygon(p) = &f.geometry else {
                panic!("expected polygon");
            };
            assert!(no_adjacent_jump(&p.exterior().0));
            assert_eq!(oidx(f), 0);
        }
    }

    #[test]
    fn batches_flush_at_size_and_at_the_end() {
        let features = (0..5)
            .map(|i| Feature::new(ring(6, i as f64 * 3.0), Properties::new()))
            .collect();
        let mut source = MemorySource::new(features);
        let mut sink = MemorySink::new();
        let opts = SubdivideOptions {
            batch_size: 2,
            ..SubdivideOptions::default()
        };
        subdivide_polygons(&mut source, &mut sink, &opts, &mut NoProgress).unwrap();
        assert_eq!(sink.batch_sizes, vec![2, 2, 1]);
    }

    #[test]
    fn unsupported_geometry_flushes_partial_output_and_fails() {
        let mut features: Vec<Feature> = (0..3)
            .map(|i| Feature::new(ring(6, i as f64 * 3.0), Properties::new()))
            .collect();
        features.push(Feature::new(
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)],
            Properties::new(),
        ));
        let mut source = MemorySource::new(features);
        let mut sink = MemorySink::new();
        let opts = SubdivideOptions {
            batch_size: 2,
            ..SubdivideOptions::default()
        };
        let err = subdivide_polygons(&mut source, &mut sink, &opts, &mut NoProgress).unwrap_err();
        assert!(matches!(
            err,
            ProcessError::UnsupportedGeometryType {
                index: Some(3),
                kind: GeometryType::LineString,
            }
        ));
        assert_eq!(sink.batch_sizes, vec![2, 1]);
        assert!(!sink.closed);
    }

    #[test]
    fn polygon_progress_is_monotonic_and_reaches_the_processing_end() {
        let features = (0..4)
            .map(|i| Feature::new(ring(300, i as f64 * 3.0), Properties::new()))
            .collect();
        let mut source = MemorySource::new(features);
        let mut sink = MemorySink::new();
        let mut tracker = ProgressTracker::new(PhaseBands::SCANNED);
        let mut seen = Vec::new();
        let mut phases = Vec::new();
        let mut record = |phase: Phase, current: u64, total: Option<u64>| {
            phases.push(phase);
            seen.push(tracker.observe(phase, current, total));
        };
        subdivide_polygons(&mut source, &mut sink, &SubdivideOptions::default(), &mut record)
            .unwrap();

        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert_eq!(phases.first(), Some(&Phase::Scanning));
        assert!(phases.contains(&Phase::ProcessingStart));
        let last = *seen.last().unwrap();
        assert!(last > 80.0 && last <= 85.0, "{last}");
    }

    #[test]
    fn lines_are_cut_at_the_dateline_and_by_budget() {
        let coords: Vec<Coord<f64>> = (0..10)
            .map(|i| {
                let x = 179.55 + i as f64 * 0.1;
                coord! { x: if x > 180.0 { x - 360.0 } else { x }, y: i as f64 * 0.1 }
            })
            .collect();
        let mut source = MemorySource::new(vec![Feature::new(LineString(coords), Properties::new())]);
        let mut sink = MemorySink::new();
        let opts = SubdivideOptions::default().with_max_nodes(4);
        let summary = subdivide_lines(&mut source, &mut sink, &opts, &mut NoProgress).unwrap();

        assert_eq!(summary.big_features, 1);
        assert!(sink.features.len() >= 3);
        for f in &sink.features {
            let Geometry::LineString(l) = &f.geometry else {
                panic!("expected line");
            };
            assert!(l.0.len() <= 4 && l.0.len() >= 2);
            assert!(no_adjacent_jump(&l.0));
            assert!(f.properties[LENGTH_KM].as_f64().unwrap() >= 0.0);
            assert_eq!(oidx(f), 0);
        }
    }

    #[test]
    fn multipoints_explode_with_origin() {
        let mp = MultiPoint(vec![point!(x: 1.0, y: 1.0), point!(x: 2.0, y: 2.0)]);
        let mut source = MemorySource::new(vec![
            Feature::new(point!(x: 0.0, y: 0.0), Properties::new()),
            Feature::new(Geometry::MultiPoint(mp), Properties::new()),
        ]);
        let mut sink = MemorySink::new();
        let summary =
            explode_points(&mut source, &mut sink, &SubdivideOptions::default(), &mut NoProgress)
                .unwrap();
        assert_eq!(
            summary,
            JobSummary {
                features: 2,
                small_features: 1,
                big_features: 1,
                parts_written: 3,
                degenerate_parts: 0,
                nodes_scanned: 3,
                nodes_processed: 3,
            }
        );
        let origins: Vec<u64> = sink.features.iter().map(oidx).collect();
        assert_eq!(origins, vec![0, 1, 1]);
    }

    #[test]
    fn kind_is_detected_from_the_schema() {
        let source = MemorySource::new(vec![Feature::new(ring(5, 0.0), Properties::new())]);
        assert_eq!(VectorKind::detect(source.schema()), Some(VectorKind::Polygons));
        assert_eq!(VectorKind::from_name("lines"), Some(VectorKind::Lines));
        assert_eq!(VectorKind::from_name("raster"), None);

        let mixed = MemorySource::new(vec![
            Feature::new(ring(5, 0.0), Properties::new()),
            Feature::new(point!(x: 0.0, y: 0.0), Properties::new()),
        ]);
        assert_eq!(VectorKind::detect(mixed.schema()), None);
    }

    #[test]
    fn run_dispatches_by_kind() {
        let mut source = MemorySource::new(vec![Feature::new(
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)],
            Properties::new(),
        )]);
        let mut sink = MemorySink::new();
        let summary = run(
            VectorKind::Lines,
            &mut source,
            &mut sink,
            &SubdivideOptions::default(),
            &mut NoProgress,
        )
        .unwrap();
        assert_eq!(summary.parts_written, 1);
        let length = sink.features[0].properties[LENGTH_KM].as_f64().unwrap();
        assert!((length - 111.319).abs() < 0.01, "{length}");
    }

    fn circle(cx: f64, cy: f64, r: f64, n: usize) -> LineString<f64> {
        let mut coords: Vec<Coord<f64>> = (0..n)
            .map(|i| {
                let a = i as f64 / n as f64 * std::f64::consts::TAU;
                coord! { x: cx + r * a.cos(), y: cy + r * a.sin() }
            })
            .collect();
        coords.push(coords[0]);
        LineString(coords)
    }

    #[test]
    fn large_polygons_report_progress_per_part() {
        let mut source = MemorySource::new(vec![Feature::new(ring(5000, 0.0), Properties::new())]);
        let mut sink = MemorySink::new();
        let mut processing = 0usize;
        let mut record = |phase: Phase, _: u64, _: Option<u64>| {
            if phase == Phase::Processing {
                processing += 1;
            }
        };
        let opts = SubdivideOptions::default().with_max_nodes(64);
        let summary = subdivide_polygons(&mut source, &mut sink, &opts, &mut record).unwrap();

        assert!(summary.parts_written > 1);
        assert_eq!(processing as u64, summary.parts_written);
    }

    #[test]
    fn degenerate_small_polygons_are_dropped() {
        let collapsed = polygon![
            (x: 1.0, y: 1.0), (x: 1.0, y: 1.0), (x: 2.0, y: 2.0), (x: 1.0, y: 1.0)
        ];
        let mut source = MemorySource::new(vec![
            Feature::new(collapsed, Properties::new()),
            Feature::new(ring(8, 5.0), Properties::new()),
        ]);
        let mut sink = MemorySink::new();
        let summary =
            subdivide_polygons(&mut source, &mut sink, &SubdivideOptions::default(), &mut NoProgress)
                .unwrap();

        assert_eq!(summary.features, 2);
        assert_eq!(summary.degenerate_parts, 1);
        assert_eq!(summary.parts_written, 1);
        assert_eq!(oidx(&sink.features[0]), 1);
    }

    #[test]
    fn degenerate_holes_are_dropped_and_the_polygon_kept() {
        let outer = LineString::from(vec![(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (0.0, 0.0)]);
        let sliver = LineString::from(vec![(1.0, 1.0), (2.0, 2.0), (1.0, 1.0)]);
        let good = circle(3.0, 3.0, 0.5, 12);
        let mut source = MemorySource::new(vec![Feature::new(
            Polygon::new(outer, vec![sliver, good.clone()]),
            Properties::new(),
        )]);
        let mut sink = MemorySink::new();
        subdivide_polygons(&mut source, &mut sink, &SubdivideOptions::default(), &mut NoProgress)
            .unwrap();

        let Geometry::Polygon(p) = &sink.features[0].geometry else {
            panic!("expected polygon");
        };
        assert_eq!(p.interiors(), &[good][..]);
    }

    #[test]
    fn holes_ride_along_when_the_exterior_is_within_budget() {
        // 5 exterior coordinates, 500 hole coordinates, budget 64: the
        // trigger counts the exterior only, so the feature is written whole
        let exterior =
            LineString::from(vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (0.0, 0.0)]);
        let holes: Vec<LineString<f64>> = [(2.0, 2.0), (5.0, 5.0), (8.0, 8.0), (2.0, 8.0), (8.0, 2.0)]
            .iter()
            .map(|&(cx, cy)| circle(cx, cy, 0.5, 99))
            .collect();
        assert_eq!(holes.iter().map(|h| h.0.len()).sum::<usize>(), 500);
        let input = Polygon::new(exterior.clone(), holes);
        let mut source = MemorySource::new(vec![Feature::new(input.clone(), Properties::new())]);
        let mut sink = MemorySink::new();
        let opts = SubdivideOptions::default().with_max_nodes(64);
        let summary = subdivide_polygons(&mut source, &mut sink, &opts, &mut NoProgress).unwrap();

        assert_eq!(summary.parts_written, 1);
        assert_eq!(summary.big_features, 0);
        assert_eq!(summary.small_features, 1);
        let Geometry::Polygon(p) = &sink.features[0].geometry else {
            panic!("expected polygon");
        };
        assert_eq!(p.interiors().len(), 5);

        let area = sink.features[0].properties[AREA_KM2].as_f64().unwrap();
        let solid = polygon_area_km2(&Polygon::new(exterior, vec![]));
        assert!((area - polygon_area_km2(&input)).abs() < 1e-6, "{area}");
        assert!(area < solid);
    }

    #[test]
    fn budgets_below_one_part_are_rejected() {
        let mut source = MemorySource::new(vec![Feature::new(ring(8, 0.0), Properties::new())]);
        let mut sink = MemorySink::new();
        let opts = SubdivideOptions::default().with_max_nodes(3);
        let err = subdivide_polygons(&mut source, &mut sink, &opts, &mut NoProgress).unwrap_err();
        assert!(matches!(err, ProcessError::BudgetTooSmall { max_nodes: 3, min: 4 }));
        assert!(sink.schema().is_none());

        assert!(opts.check(VectorKind::Lines).is_ok());
        assert!(opts.with_max_nodes(1).check(VectorKind::Lines).is_err());
        assert!(opts.with_max_nodes(1).check(VectorKind::Points).is_ok());
    }
}
