use std::sync::Arc;

use foundation::Clock;
use serde_json::Value;

use crate::eta::{EtaConfig, EtaEstimator, EtaState};
use crate::notify::ProgressNotifier;
use crate::progress::{Phase, PhaseBands, ProgressTracker};

/// Receiver of phase-local progress samples.
///
/// `current` is the number of completed units in `phase`; `total` is `None`
/// when the phase cannot size its work up front.
pub trait ProgressCallback {
    fn on_progress(&mut self, phase: Phase, current: u64, total: Option<u64>);
}

impl<F> ProgressCallback for F
where
    F: FnMut(Phase, u64, Option<u64>),
{
    fn on_progress(&mut self, phase: Phase, current: u64, total: Option<u64>) {
        self(phase, current, total)
    }
}

/// Discards every sample.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_progress(&mut self, _: Phase, _: u64, _: Option<u64>) {}
}

/// ETA resolution: overall progress is tracked in basis points.
const ETA_UNITS: u64 = 10_000;

/// Per-job progress state: overall percentage, ETA and (optionally) the
/// notifier that publishes both.
///
/// Owned by exactly one job execution. The ETA ignores everything before the
/// processing band so download throughput does not skew the rate.
#[derive(Debug)]
pub struct JobProgress {
    tracker: ProgressTracker,
    eta: EtaEstimator,
    notifier: Option<ProgressNotifier>,
}

impl JobProgress {
    pub fn new(bands: PhaseBands, eta: EtaConfig, clock: Arc<dyn Clock>) -> Self {
        let baseline = (bands.processing.start * (ETA_UNITS as f64 / 100.0)).round() as u64;
        Self {
            tracker: ProgressTracker::new(bands),
            eta: EtaEstimator::new(ETA_UNITS, eta, clock).with_baseline(baseline),
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: ProgressNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn percent(&self) -> f64 {
        self.tracker.percent()
    }

    pub fn eta(&self) -> EtaState {
        self.eta.state()
    }

    pub fn notifier(&self) -> Option<&ProgressNotifier> {
        self.notifier.as_ref()
    }

    pub fn begin(&mut self) {
        if let Some(n) = self.notifier.as_mut() {
            n.begin();
        }
    }

    /// Marks the job failed and publishes `message`.
    pub fn fail(&mut self, message: &str) {
        self.tracker.observe(Phase::Error, 0, None);
        if let Some(n) = self.notifier.as_mut() {
            n.error(message);
        }
    }

    /// Marks the job complete: publishes 100% then the result object.
    pub fn finish(&mut self, object: Value) {
        self.tracker.observe(Phase::Done, 0, None);
        self.eta.update(ETA_UNITS);
        if let Some(n) = self.notifier.as_mut() {
            n.force_progress(100.0, None, Some("Complete"));
            n.result(object);
        }
    }
}

impl ProgressCallback for JobProgress {
    fn on_progress(&mut self, phase: Phase, current: u64, total: Option<u64>) {
        let percent = self.tracker.observe(phase, current, total);
        let state = self
            .eta
            .update((percent * (ETA_UNITS as f64 / 100.0)).round() as u64);
        tracing::trace!(?phase, current, ?total, percent, "progress sample");
        if let Some(n) = self.notifier.as_mut() {
            n.progress(percent, state.eta_iso(), None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{JobProgress, ProgressCallback};
    use crate::eta::EtaConfig;
    use crate::notify::{EventLog, JobEvent, NotifyPolicy, ProgressNotifier};
    use crate::progress::{Phase, PhaseBands};
    use foundation::ManualClock;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn job() -> (Arc<ManualClock>, Arc<EventLog>, JobProgress) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let log = Arc::new(EventLog::new());
        let notifier =
            ProgressNotifier::new("job-7", log.clone(), clock.clone(), NotifyPolicy::default());
        let progress = JobProgress::new(PhaseBands::VECTOR, EtaConfig::default(), clock.clone())
            .with_notifier(notifier);
        (clock, log, progress)
    }

    fn percents(log: &EventLog) -> Vec<u8> {
        log.messages()
            .into_iter()
            .filter_map(|m| match m.event {
                JobEvent::Progress { percent, .. } => Some(percent),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn full_run_emits_monotonic_progress_and_completion() {
        let (clock, log, mut p) = job();
        p.begin();
        for i in 0..=10 {
            clock.advance_ms(200);
            p.on_progress(Phase::Download, i * 100, Some(1_000));
        }
        p.on_progress(Phase::ProcessingStart, 0, None);
        for i in 0..=1_000 {
            clock.advance_ms(50);
            p.on_progress(Phase::Processing, i, Some(1_000));
            // a stale sample must not move anything backwards
            p.on_progress(Phase::Processing, i / 2, Some(1_000));
        }
        for i in 0..=4 {
            clock.advance_ms(300);
            p.on_progress(Phase::Upload, i, Some(4));
        }
        p.finish(json!({"key": "out"}));

        let seq = percents(&log);
        assert!(seq.windows(2).all(|w| w[0] <= w[1]), "{seq:?}");
        assert_eq!(seq.last(), Some(&100));
        let kinds = log.kinds();
        assert_eq!(kinds.first(), Some(&"begin"));
        assert_eq!(&kinds[kinds.len() - 2..], &["progress", "result"]);
    }

    #[test]
    fn eta_appears_once_processing_is_under_way() {
        let (clock, log, mut p) = job();
        p.on_progress(Phase::Download, 1, Some(1));
        p.on_progress(Phase::ProcessingStart, 0, None);
        for i in 1..=500 {
            clock.advance_ms(100);
            p.on_progress(Phase::Processing, i, Some(1_000));
        }
        assert!(p.eta().remaining_ms.is_some());
        let with_eta = log
            .messages()
            .into_iter()
            .filter(|m| matches!(&m.event, JobEvent::Progress { eta: Some(_), .. }))
            .count();
        assert!(with_eta > 0);
    }

    #[test]
    fn failure_publishes_error_and_freezes_percent() {
        let (_clock, log, mut p) = job();
        p.on_progress(Phase::Processing, 1, Some(2));
        p.fail("source read failed");
        p.on_progress(Phase::Upload, 1, Some(1));
        assert_eq!(p.percent(), 50.0);
        let last = log.messages().pop().unwrap();
        assert_eq!(
            last.event,
            JobEvent::Error {
                message: "source read failed".into()
            }
        );
    }

    #[test]
    fn closures_are_progress_callbacks() {
        let mut seen = Vec::new();
        let mut cb = |phase: Phase, current: u64, _total: Option<u64>| seen.push((phase, current));
        cb.on_progress(Phase::Scanning, 3, None);
        assert_eq!(seen, vec![(Phase::Scanning, 3)]);
    }
}
