//! Composes the bench, processes and kernel into one pass/fail run

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use crate::bench::{Bench, Clock, ResetSequencer, RunReport, Watchdog};
use crate::config::TbConfig;
use crate::error::{FailureKind, Mismatch, TbError};
use crate::sched::Kernel;
use crate::scoreboard::{RandomStimulus, Scoreboard, Stimulus};
use crate::slice::{PipelineStage, RegisterSlice};

#[derive(Debug)]
pub enum Verdict {
    Pass,
    Fail(TbError),
}

/// Result of one run. Built once when the run ends.
#[derive(Debug)]
pub struct TestOutcome {
    verdict: Verdict,
    report: RunReport,
}

impl TestOutcome {
    fn new(result: Result<(), TbError>, report: RunReport) -> Self {
        let verdict = match result {
            Ok(()) => Verdict::Pass,
            Err(e) => Verdict::Fail(e),
        };
        Self { verdict, report }
    }

    pub fn passed(&self) -> bool {
        matches!(self.verdict, Verdict::Pass)
    }

    pub fn verdict(&self) -> &Verdict {
        &self.verdict
    }

    pub fn error(&self) -> Option<&TbError> {
        match &self.verdict {
            Verdict::Pass => None,
            Verdict::Fail(e) => Some(e),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error().map(TbError::kind)
    }

    /// Read-back disagreements; at most one since the run stops on the first.
    pub fn mismatches(&self) -> Vec<&Mismatch> {
        match &self.verdict {
            Verdict::Fail(TbError::DataIntegrity(m)) => vec![m],
            _ => Vec::new(),
        }
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn into_result(self) -> Result<RunReport, TbError> {
        match self.verdict {
            Verdict::Pass => Ok(self.report),
            Verdict::Fail(e) => Err(e),
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.verdict {
            Verdict::Pass => write!(
                f,
                "PASS: {} transactions checked in {} cycles",
                self.report.transactions_checked, self.report.cycles
            ),
            Verdict::Fail(e) => write!(
                f,
                "FAIL ({:?}) after {} transactions: {e}",
                e.kind(),
                self.report.transactions_checked
            ),
        }
    }
}

/// Runs the write/read-back test against `dut` with the given stimulus.
pub fn run<'a>(
    config: &'a TbConfig,
    dut: Box<dyn PipelineStage + 'a>,
    stimulus: Box<dyn Stimulus + 'a>,
) -> TestOutcome {
    execute(config, dut, stimulus, None)
}

/// Like [`run`], but stops with `Timeout` as soon as `cancel` is set.
pub fn run_cancellable<'a>(
    config: &'a TbConfig,
    dut: Box<dyn PipelineStage + 'a>,
    stimulus: Box<dyn Stimulus + 'a>,
    cancel: Arc<AtomicBool>,
) -> TestOutcome {
    execute(config, dut, stimulus, Some(cancel))
}

fn execute<'a>(
    config: &'a TbConfig,
    dut: Box<dyn PipelineStage + 'a>,
    stimulus: Box<dyn Stimulus + 'a>,
    cancel: Option<Arc<AtomicBool>>,
) -> TestOutcome {
    if let Err(e) = config.validate() {
        error!("{e}");
        return TestOutcome::new(Err(e), RunReport::default());
    }
    info!(
        "running {} against {} ({} iterations, seed {:#x})",
        config.dut,
        dut.name(),
        config.iterations,
        config.seed
    );

    let mut bench = Bench::new(config, dut);
    let mut kernel = match cancel {
        Some(flag) => Kernel::new().with_cancel(flag),
        None => Kernel::new(),
    };
    kernel.spawn_background(Clock::new(config));
    kernel.spawn_background(Watchdog::new(config));
    kernel.spawn(ResetSequencer::new(config));
    kernel.spawn(Scoreboard::new(config, stimulus));

    let result = kernel.run(&mut bench, config.run_limit()).map(|_| ());
    let outcome = TestOutcome::new(result, bench.report(kernel.now()));
    match outcome.error() {
        None => info!("{outcome}"),
        Some(_) => error!("{outcome}"),
    }
    outcome
}

/// The default run: seeded random traffic through the behavioral slice.
pub fn run_behavioral(config: &TbConfig) -> TestOutcome {
    run(
        config,
        Box::new(RegisterSlice::new()),
        Box::new(RandomStimulus::new(config)),
    )
}

/// Runs the behavioral test on a blocking task, failing with `Timeout` if
/// it takes longer than `limit` of wall-clock time. The simulation itself is
/// stopped, so the task is finished when this returns.
pub async fn run_with_wall_clock_limit(config: TbConfig, limit: Duration) -> eyre::Result<TestOutcome> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    let mut task = tokio::task::spawn_blocking(move || {
        run_cancellable(
            &config,
            Box::new(RegisterSlice::new()),
            Box::new(RandomStimulus::new(&config)),
            flag,
        )
    });
    match tokio::time::timeout(limit, &mut task).await {
        Ok(joined) => Ok(joined?),
        Err(_) => {
            warn!("wall-clock limit of {limit:?} reached, stopping the run");
            cancel.store(true, Ordering::Relaxed);
            Ok(task.await?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_fails_before_time_advances() {
        let config = TbConfig::default().bus_bytes(3);
        let outcome = run_behavioral(&config);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Configuration));
        assert_eq!(outcome.report().cycles, 0);
    }

    #[test]
    fn test_short_random_run_passes() {
        let config = TbConfig::default().iterations(20);
        let outcome = run_behavioral(&config);
        assert!(outcome.passed(), "{outcome}");
        assert_eq!(outcome.report().transactions_checked, 20);
        assert_eq!(outcome.report().writes, 20);
        assert_eq!(outcome.report().reads, 20);
    }

    #[tokio::test]
    async fn test_wall_clock_limit_stops_the_simulation() {
        let config = TbConfig::default().iterations(3_000_000);
        let started = std::time::Instant::now();
        let outcome = run_with_wall_clock_limit(config, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Timeout));
        assert!(outcome.report().cycles > 0);
        match outcome.error() {
            Some(TbError::Timeout { at, cycles, waiting }) => {
                assert!(at.steps() > 0);
                assert_eq!(*cycles, outcome.report().cycles);
                assert!(waiting.contains("wall-clock"), "{waiting}");
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wall_clock_wrapper_returns_outcome() {
        let config = TbConfig::default().iterations(5);
        let outcome = run_with_wall_clock_limit(config, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(outcome.passed(), "{outcome}");
    }
}
