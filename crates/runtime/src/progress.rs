use serde::{Deserialize, Serialize};

/// Pipeline phase a progress sample belongs to.
///
/// `Done` and `Error` are terminal; once observed, the tracker ignores all
/// further samples.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Download,
    Scanning,
    ProcessingStart,
    Processing,
    Upload,
    Done,
    Error,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Error)
    }
}

/// Overall-percentage range `[start, end]` owned by one phase.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Band {
    pub start: f64,
    pub end: f64,
}

impl Band {
    pub const fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn span(&self) -> f64 {
        self.end - self.start
    }

    /// Linear position of `ratio` (clamped to `[0, 1]`) inside the band.
    pub fn at(&self, ratio: f64) -> f64 {
        self.start + self.span() * ratio.clamp(0.0, 1.0)
    }
}

/// Per-job-kind band table. Phases mapped to `None` do not move the overall
/// percentage.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PhaseBands {
    pub download: Option<Band>,
    pub scanning: Option<Band>,
    pub processing: Band,
    pub upload: Band,
}

impl PhaseBands {
    /// download 0–15, processing 15–85, upload 85–100.
    pub const VECTOR: PhaseBands = PhaseBands {
        download: Some(Band::new(0.0, 15.0)),
        scanning: None,
        processing: Band::new(15.0, 85.0),
        upload: Band::new(85.0, 100.0),
    };

    /// download 0–7, scanning 7–15, processing 15–85, upload 85–100.
    pub const SCANNED: PhaseBands = PhaseBands {
        download: Some(Band::new(0.0, 7.0)),
        scanning: Some(Band::new(7.0, 15.0)),
        processing: Band::new(15.0, 85.0),
        upload: Band::new(85.0, 100.0),
    };

    pub fn band(&self, phase: Phase) -> Option<Band> {
        match phase {
            Phase::Download => self.download,
            Phase::Scanning => self.scanning,
            Phase::ProcessingStart | Phase::Processing => Some(self.processing),
            Phase::Upload => Some(self.upload),
            Phase::Done | Phase::Error => None,
        }
    }
}

impl Default for PhaseBands {
    fn default() -> Self {
        PhaseBands::VECTOR
    }
}

/// Percentage added per sample when a phase cannot report its total.
pub const UNKNOWN_TOTAL_STEP: f64 = 0.5;

/// Maps phase-local `(current, total)` samples onto one overall percentage.
///
/// The reported value is clamped to `[0, 100]` and never decreases, even when
/// the phase-local counters move backwards.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    bands: PhaseBands,
    percent: f64,
    phase: Option<Phase>,
}

impl ProgressTracker {
    pub fn new(bands: PhaseBands) -> Self {
        Self {
            bands,
            percent: 0.0,
            phase: None,
        }
    }

    pub fn bands(&self) -> &PhaseBands {
        &self.bands
    }

    pub fn percent(&self) -> f64 {
        self.percent
    }

    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        self.phase.is_some_and(|p| p.is_terminal())
    }

    /// Feeds one sample and returns the overall percentage after it.
    ///
    /// `current` counts completed units of the phase.
    pub fn observe(&mut self, phase: Phase, current: u64, total: Option<u64>) -> f64 {
        if self.is_finished() {
            return self.percent;
        }
        self.phase = Some(phase);

        let candidate = match phase {
            Phase::Done => 100.0,
            Phase::Error => self.percent,
            Phase::ProcessingStart => self.bands.processing.start,
            _ => match self.bands.band(phase) {
                None => self.percent,
                Some(band) => match total {
                    Some(t) if t > 0 => band.at(current as f64 / t as f64),
                    _ => (self.percent.max(band.start) + UNKNOWN_TOTAL_STEP).min(band.end),
                },
            },
        };

        self.percent = self.percent.max(candidate.clamp(0.0, 100.0));
        self.percent
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(PhaseBands::default())
    }
}
