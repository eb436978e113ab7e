use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::FormatError;
use crate::feature::{Feature, GeometryType};
use crate::schema::Schema;

/// A writable collection of features, opened with a declared schema and
/// written in batches.
pub trait FeatureSink {
    fn open(&mut self, schema: &Schema) -> Result<(), FormatError>;

    /// Writes all features of `batch`, in order.
    fn write_batch(&mut self, batch: &[Feature]) -> Result<(), FormatError>;

    fn close(&mut self) -> Result<(), FormatError>;
}

impl<S: FeatureSink + ?Sized> FeatureSink for Box<S> {
    fn open(&mut self, schema: &Schema) -> Result<(), FormatError> {
        (**self).open(schema)
    }

    fn write_batch(&mut self, batch: &[Feature]) -> Result<(), FormatError> {
        (**self).write_batch(batch)
    }

    fn close(&mut self) -> Result<(), FormatError> {
        (**self).close()
    }
}

fn check_geometry(schema: &Schema, feature: &Feature) -> Result<(), FormatError> {
    match schema.geometry_type {
        Some(expected) if expected != feature.geometry_type() => {
            Err(FormatError::SchemaMismatch {
                expected,
                found: feature.geometry_type(),
            })
        }
        _ => Ok(()),
    }
}

/// Collects written features in memory. Records every batch boundary, which
/// makes it useful for asserting flush behaviour.
#[derive(Debug, Default)]
pub struct MemorySink {
    schema: Option<Schema>,
    pub features: Vec<Feature>,
    pub batch_sizes: Vec<usize>,
    pub closed: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }
}

impl FeatureSink for MemorySink {
    fn open(&mut self, schema: &Schema) -> Result<(), FormatError> {
        self.schema = Some(schema.clone());
        self.closed = false;
        Ok(())
    }

    fn write_batch(&mut self, batch: &[Feature]) -> Result<(), FormatError> {
        let schema = match (&self.schema, self.closed) {
            (Some(s), false) => s,
            _ => return Err(FormatError::NotOpen),
        };
        for f in batch {
            check_geometry(schema, f)?;
        }
        self.features.extend_from_slice(batch);
        self.batch_sizes.push(batch.len());
        Ok(())
    }

    fn close(&mut self) -> Result<(), FormatError> {
        self.closed = true;
        Ok(())
    }
}

/// Writes newline-delimited GeoJSON to any writer. Each batch is encoded into
/// one buffer and written with a single call.
pub struct GeoJsonSeqSink<W: Write> {
    writer: W,
    schema: Option<Schema>,
    buf: Vec<u8>,
    written: u64,
}

impl<W: Write> GeoJsonSeqSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            schema: None,
            buf: Vec::new(),
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> FeatureSink for GeoJsonSeqSink<W> {
    fn open(&mut self, schema: &Schema) -> Result<(), FormatError> {
        self.schema = Some(schema.clone());
        Ok(())
    }

    fn write_batch(&mut self, batch: &[Feature]) -> Result<(), FormatError> {
        let schema = self.schema.as_ref().ok_or(FormatError::NotOpen)?;
        self.buf.clear();
        for f in batch {
            check_geometry(schema, f)?;
            serde_json::to_writer(&mut self.buf, &f.to_geojson_value())
                .map_err(|e| FormatError::Io(e.into()))?;
            self.buf.push(b'\n');
        }
        self.writer.write_all(&self.buf)?;
        self.writer.flush()?;
        self.written += batch.len() as u64;
        Ok(())
    }

    fn close(&mut self) -> Result<(), FormatError> {
        self.writer.flush()?;
        self.schema = None;
        Ok(())
    }
}

/// GeoJSONSeq file sink that writes to `<path>.partial` and renames into
/// place on `close`, so readers never observe a half-written output.
pub struct GeoJsonFileSink {
    path: PathBuf,
    partial: PathBuf,
    inner: Option<GeoJsonSeqSink<BufWriter<File>>>,
}

impl GeoJsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut partial = path.clone().into_os_string();
        partial.push(".partial");
        Self {
            path,
            partial: PathBuf::from(partial),
            inner: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.inner.as_ref().map(|s| s.written()).unwrap_or(0)
    }
}

impl FeatureSink for GeoJsonFileSink {
    fn open(&mut self, schema: &Schema) -> Result<(), FormatError> {
        if let Some(parent) = self.partial.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&self.partial)?;
        let mut sink = GeoJsonSeqSink::new(BufWriter::new(file));
        sink.open(schema)?;
        self.inner = Some(sink);
        Ok(())
    }

    fn write_batch(&mut self, batch: &[Feature]) -> Result<(), FormatError> {
        self.inner
            .as_mut()
            .ok_or(FormatError::NotOpen)?
            .write_batch(batch)
    }

    fn close(&mut self) -> Result<(), FormatError> {
        let Some(mut sink) = self.inner.take() else {
            return Err(FormatError::NotOpen);
        };
        sink.close()?;
        let written = sink.written();
        let file = sink
            .into_inner()
            .into_inner()
            .map_err(|e| FormatError::Io(e.into_error()))?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&self.partial, &self.path)?;
        tracing::debug!(path = %self.path.display(), features = written, "sink closed");
        Ok(())
    }
}

/// Schema for an output sink: the input columns with a fixed geometry type.
pub fn output_schema(input: &Schema, geometry_type: GeometryType) -> Schema {
    input.clone().with_geometry(Some(geometry_type))
}

#[cfg(test)]
mod tests {
    use super::{FeatureSink, GeoJsonFileSink, GeoJsonSeqSink, MemorySink};
    use crate::error::FormatError;
    use crate::feature::{Feature, GeometryType};
    use crate::schema::Schema;
    use crate::source::{FeatureSource, GeoJsonSeqSource};
    use geo::point;
    use serde_json::Map;

    fn pt(x: f64) -> Feature {
        Feature::new(point!(x: x, y: 0.0), Map::new())
    }

    #[test]
    fn memory_sink_records_batches_and_rejects_wrong_geometry() {
        let mut sink = MemorySink::new();
        assert!(matches!(sink.write_batch(&[pt(0.0)]), Err(FormatError::NotOpen)));

        let schema = Schema::default().with_geometry(Some(GeometryType::Point));
        sink.open(&schema).unwrap();
        sink.write_batch(&[pt(0.0), pt(1.0)]).unwrap();
        sink.write_batch(&[pt(2.0)]).unwrap();
        assert_eq!(sink.batch_sizes, vec![2, 1]);

        let line = Feature::new(
            geo::LineString::from(vec![(0.0, 0.0), (1.0, 0.0)]),
            Map::new(),
        );
        let err = sink.write_batch(&[line]).unwrap_err();
        assert!(matches!(err, FormatError::SchemaMismatch { .. }));
    }

    #[test]
    fn seq_sink_writes_one_line_per_feature() {
        let mut sink = GeoJsonSeqSink::new(Vec::new());
        sink.open(&Schema::default()).unwrap();
        sink.write_batch(&[pt(0.0), pt(1.0)]).unwrap();
        sink.close().unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out.lines().count(), 2);
        assert!(out.lines().all(|l| l.starts_with(r#"{"type":"Feature""#)));
    }

    #[test]
    fn file_sink_renames_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("parts.geojsonl");
        let mut sink = GeoJsonFileSink::new(&path);
        sink.open(&Schema::default()).unwrap();
        sink.write_batch(&[pt(0.0), pt(1.0), pt(2.0)]).unwrap();
        assert!(!path.exists());
        sink.close().unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("out").join("parts.geojsonl.partial").exists());

        let mut src = GeoJsonSeqSource::open(&path).unwrap();
        assert_eq!(src.feature_count().unwrap(), 3);
    }
}
