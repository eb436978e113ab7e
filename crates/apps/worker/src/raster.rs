//! Raster jobs: reprojection and COG encoding through the GDAL command line
//! tools. Neither tool reports progress, so both steps run under a
//! time-based heartbeat that fills the processing band by pixel rows.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use runtime::{HeartbeatCurve, Phase, ProgressCallback};
use serde_json::Value;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::RasterConfig;
use crate::error::JobError;

#[derive(Debug, Clone, PartialEq)]
pub struct RasterInfo {
    pub width: u64,
    pub height: u64,
    /// `AUTHORITY:CODE`, when gdalinfo reports one.
    pub crs: Option<String>,
}

/// Reads size and CRS out of `gdalinfo -json` output.
pub fn parse_gdalinfo(info: &Value) -> Result<RasterInfo, JobError> {
    let size = info
        .get("size")
        .and_then(|s| s.as_array())
        .filter(|s| s.len() == 2)
        .ok_or_else(|| JobError::Raster("gdalinfo output has no size".to_string()))?;
    let dim = |i: usize| size[i].as_u64().unwrap_or(0);

    let from_projjson = info
        .pointer("/coordinateSystem/projjson/id")
        .and_then(|id| {
            let authority = id.get("authority")?.as_str()?;
            let code = id.get("code")?;
            let code = code
                .as_u64()
                .map(|c| c.to_string())
                .or_else(|| code.as_str().map(str::to_string))?;
            Some(format!("{authority}:{code}"))
        });
    let from_stac = || {
        info.pointer("/stac/proj:epsg")
            .and_then(|c| c.as_u64())
            .map(|c| format!("EPSG:{c}"))
    };

    Ok(RasterInfo {
        width: dim(0),
        height: dim(1),
        crs: from_projjson.or_else(from_stac),
    })
}

/// Drives `task` to completion while emitting heartbeat samples every
/// `every`. Ticking stops as soon as the task finishes.
pub async fn run_with_heartbeat<F, T>(
    task: F,
    mut curve: HeartbeatCurve,
    total: u64,
    every: Duration,
    progress: &mut (dyn ProgressCallback + Send),
) -> T
where
    F: Future<Output = T>,
{
    tokio::pin!(task);
    let every = every.max(Duration::from_millis(1));
    let start = Instant::now();
    let mut ticker = tokio::time::interval_at(start + every, every);
    loop {
        tokio::select! {
            biased;
            out = &mut task => return out,
            _ = ticker.tick() => {
                let elapsed = start.elapsed().as_millis() as u64;
                progress.on_progress(Phase::Processing, curve.sample(elapsed), Some(total));
            }
        }
    }
}

/// Reprojects to the configured CRS (when needed) and writes a COG.
#[derive(Debug, Clone)]
pub struct GdalEngine {
    cfg: RasterConfig,
}

impl GdalEngine {
    pub fn new(cfg: RasterConfig) -> Self {
        Self { cfg }
    }

    pub async fn process(
        &self,
        input: &Path,
        output: &Path,
        progress: &mut (dyn ProgressCallback + Send),
    ) -> Result<(), JobError> {
        progress.on_progress(Phase::Scanning, 0, Some(1));
        let stdout = run_command("gdalinfo", &["-json", path_str(input)?]).await?;
        let value: Value = serde_json::from_slice(&stdout)
            .map_err(|e| JobError::Raster(format!("gdalinfo json: {e}")))?;
        let info = parse_gdalinfo(&value)?;
        let rows = info.height.max(1);
        let needs_reprojection = info.crs.as_deref() != Some(self.cfg.target_crs.as_str());
        info!(
            width = info.width,
            height = info.height,
            crs = info.crs.as_deref().unwrap_or("unknown"),
            target = %self.cfg.target_crs,
            needs_reprojection,
            "raster probed"
        );

        let assumed_ms = self.cfg.assumed.as_millis() as u64;
        let every = self.cfg.heartbeat_interval;
        let tmp = sibling(output, ".tmp");
        progress.on_progress(Phase::ProcessingStart, 0, Some(rows));

        let (cog_source, cog_curve) = if needs_reprojection {
            let warped = sibling(output, ".reprojected.tif");
            let warp_args = [
                "-t_srs",
                self.cfg.target_crs.as_str(),
                "-r",
                "bilinear",
                "-multi",
                "-wo",
                "NUM_THREADS=ALL_CPUS",
                "-overwrite",
                path_str(input)?,
                path_str(&warped)?,
            ];
            let warp = run_command("gdalwarp", &warp_args);
            run_with_heartbeat(warp, HeartbeatCurve::first_half(rows, assumed_ms), rows, every, progress)
                .await?;
            progress.on_progress(Phase::Processing, rows / 2, Some(rows));
            (warped, HeartbeatCurve::second_half(rows, assumed_ms))
        } else {
            progress.on_progress(Phase::Processing, 0, Some(rows));
            (input.to_path_buf(), HeartbeatCurve::new(0, rows, assumed_ms))
        };

        let translate_args = [
            "-of",
            "COG",
            "-co",
            "COMPRESS=DEFLATE",
            "-co",
            "OVERVIEWS=AUTO",
            path_str(&cog_source)?,
            path_str(&tmp)?,
        ];
        let translate = run_command("gdal_translate", &translate_args);
        run_with_heartbeat(translate, cog_curve, rows, every, progress).await?;
        progress.on_progress(Phase::Processing, rows, Some(rows));

        tokio::fs::rename(&tmp, output).await?;
        debug!(output = %output.display(), "cog written");
        Ok(())
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn path_str(path: &Path) -> Result<&str, JobError> {
    path.to_str()
        .ok_or_else(|| JobError::Raster(format!("path is not utf-8: {}", path.display())))
}

async fn run_command(command: &str, args: &[&str]) -> Result<Vec<u8>, JobError> {
    let output = Command::new(command)
        .args(args)
        .output()
        .await
        .map_err(|e| JobError::Raster(format!("{command} failed to start: {e}")))?;

    if output.status.success() {
        return Ok(output.stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(JobError::Raster(format!("{command} failed: {stderr}")))
}

#[cfg(test)]
mod tests {
    use super::{parse_gdalinfo, run_with_heartbeat, RasterInfo};
    use runtime::{HeartbeatCurve, Phase};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn heartbeat_ticks_until_the_task_finishes() {
        let mut samples = Vec::new();
        let mut record = |phase: Phase, current: u64, total: Option<u64>| {
            assert_eq!(phase, Phase::Processing);
            assert_eq!(total, Some(1_000));
            samples.push(current);
        };
        let task = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            7
        };
        let out = run_with_heartbeat(
            task,
            HeartbeatCurve::first_half(1_000, 30_000),
            1_000,
            Duration::from_secs(3),
            &mut record,
        )
        .await;

        assert_eq!(out, 7);
        assert_eq!(samples, vec![50, 100, 150]);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_never_passes_its_segment() {
        let mut samples = Vec::new();
        let mut record = |_: Phase, current: u64, _: Option<u64>| samples.push(current);
        run_with_heartbeat(
            tokio::time::sleep(Duration::from_secs(20)),
            HeartbeatCurve::second_half(100, 6_000),
            100,
            Duration::from_secs(3),
            &mut record,
        )
        .await;
        assert_eq!(samples.first(), Some(&75));
        assert!(samples.iter().skip(1).all(|s| *s == 100));
        assert!(samples.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn gdalinfo_size_and_crs() {
        let info = json!({
            "size": [4000, 2000],
            "coordinateSystem": {"projjson": {"id": {"authority": "EPSG", "code": 4326}}},
        });
        assert_eq!(
            parse_gdalinfo(&info).unwrap(),
            RasterInfo {
                width: 4000,
                height: 2000,
                crs: Some("EPSG:4326".to_string()),
            }
        );

        let stac_only = json!({"size": [1, 2], "stac": {"proj:epsg": 6933}});
        assert_eq!(parse_gdalinfo(&stac_only).unwrap().crs.as_deref(), Some("EPSG:6933"));
        assert!(parse_gdalinfo(&json!({})).is_err());
    }
}
