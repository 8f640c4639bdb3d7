//! Periodic sampling of the energy counters.
//!
//! The [`Sampler`] waits on two events, a periodic timer and a cancellation request,
//! in a single task. Both are awaited in the same `select!` loop, so a tick is always
//! fully processed before the next event is handled, and the samples are recorded
//! in order without any lock. Signals are delivered to the loop by the tokio runtime:
//! nothing is done in a signal handler.

use std::{io, num::NonZeroU32, time::Duration, time::SystemTime};

use crate::{
    collector::{Energy, EnergySource},
    domains::DomainKind,
    error::{ConfigError, TickError},
    report::OutputSink,
    stats::{Summary, summarize},
};

pub const DEFAULT_INTERVAL_MS: u64 = 1000;
pub const MIN_INTERVAL_MS: u64 = 1;
pub const MAX_INTERVAL_MS: u64 = 3_600_000;
pub const MAX_SAMPLE_COUNT: u64 = 1_000_000;

/// Below this interval, the measurements are likely to be inaccurate.
pub const UNRELIABLE_INTERVAL_MS: u64 = 50;

/// Validated sampling options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingConfig {
    interval: Duration,
    /// 0 means unlimited.
    sample_count: u32,
}

impl SamplingConfig {
    pub fn new(interval_ms: u64, sample_count: u64) -> Result<Self, ConfigError> {
        if !(MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&interval_ms) {
            return Err(ConfigError::IntervalOutOfRange(interval_ms));
        }
        let sample_count = match u32::try_from(sample_count) {
            Ok(n) if u64::from(n) <= MAX_SAMPLE_COUNT => n,
            _ => return Err(ConfigError::CountOutOfRange(sample_count)),
        };
        Ok(Self {
            interval: Duration::from_millis(interval_ms),
            sample_count,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn interval_secs(&self) -> f64 {
        self.interval.as_secs_f64()
    }

    /// Maximum number of samples, `None` if unlimited.
    pub fn limit(&self) -> Option<NonZeroU32> {
        NonZeroU32::new(self.sample_count)
    }

    pub fn is_unreliable(&self) -> bool {
        self.interval < Duration::from_millis(UNRELIABLE_INTERVAL_MS)
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            sample_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    /// Terminal: no sample is taken anymore.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Finished,
}

/// The measurements of one tick, in Joules.
///
/// `pkg`, `other_j` and `total_j` are always available. The other domains
/// keep their unsupported marker so that they can be displayed as such.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Starts at 1.
    pub index: usize,
    pub timestamp: SystemTime,
    pub interval_secs: f64,
    pub pkg_j: f64,
    pub cores: Energy,
    pub gpu: Energy,
    pub ram: Energy,
    /// `pkg - cores - gpu`, with unsupported domains counting as 0.
    pub other_j: f64,
    /// `pkg + ram`, with unsupported domains counting as 0.
    pub total_j: f64,
}

/// Everything that remains after a run.
#[derive(Debug)]
pub struct RunReport<S, O> {
    pub summary: Summary,
    /// Number of ticks where `pkg < cores + gpu`.
    pub anomalies: usize,
    pub source: S,
    pub sink: O,
}

/// Takes one sample per timer tick until the count limit is reached or the run is cancelled.
pub struct Sampler<S: EnergySource, O: OutputSink> {
    source: S,
    sink: O,
    config: SamplingConfig,
    state: State,
    /// Total energy of each tick, in Joules.
    samples: Vec<f64>,
    anomalies: usize,
}

impl<S: EnergySource, O: OutputSink> Sampler<S, O> {
    pub fn new(source: S, sink: O, config: SamplingConfig) -> Self {
        let capacity = config.limit().map(|n| n.get() as usize).unwrap_or(0);
        Self {
            source,
            sink,
            config,
            state: State::Running,
            samples: Vec::with_capacity(capacity),
            anomalies: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Reads the counters, records the total energy and outputs the sample.
    pub fn on_tick(&mut self) -> Result<TickOutcome, TickError> {
        if self.state == State::Finished {
            return Ok(TickOutcome::Finished);
        }

        let reading = self.source.sample()?;
        let pkg = reading
            .get(DomainKind::Package)
            .joules()
            .ok_or(TickError::PackageUnsupported)?;
        let cores = reading.get(DomainKind::Cores);
        let gpu = reading.get(DomainKind::Gpu);
        let ram = reading.get(DomainKind::Ram);

        let sub_domains = cores.normalized() + gpu.normalized();
        if pkg < sub_domains {
            self.anomalies += 1;
            log::warn!("Inconsistent RAPL counters: pkg ({pkg} J) < cores ({cores:?}) + gpu ({gpu:?})");
        }
        let other_j = pkg - sub_domains;
        let total_j = pkg + ram.normalized();

        self.samples.push(total_j);
        let sample = Sample {
            index: self.samples.len(),
            timestamp: SystemTime::now(),
            interval_secs: self.config.interval_secs(),
            pkg_j: pkg,
            cores,
            gpu,
            ram,
            other_j,
            total_j,
        };
        self.sink.sample(&sample).map_err(TickError::Output)?;

        match self.config.limit() {
            Some(limit) if self.samples.len() >= limit.get() as usize => {
                log::info!("{} samples taken, stopping.", self.samples.len());
                self.state = State::Finished;
                Ok(TickOutcome::Finished)
            }
            _ => Ok(TickOutcome::Continue),
        }
    }

    pub fn cancel(&mut self) {
        self.state = State::Finished;
    }

    /// Outputs the header, then samples on each tick of `ticker` until the end of the run.
    ///
    /// The run ends when the count limit is reached or when `cancel` completes.
    /// An error returned by `cancel` is fatal.
    pub async fn run<C>(&mut self, ticker: &mut Ticker, cancel: C) -> Result<(), TickError>
    where
        C: Future<Output = io::Result<()>>,
    {
        self.sink.header().map_err(TickError::Output)?;
        log::info!("Sampling every {:?}.", self.config.interval());

        tokio::pin!(cancel);
        while self.state == State::Running {
            tokio::select! {
                biased;

                res = &mut cancel => {
                    res.map_err(TickError::Signal)?;
                    log::info!("Cancellation requested, stopping.");
                    self.cancel();
                }
                res = ticker.tick() => {
                    res.map_err(TickError::Timer)?;
                    self.on_tick()?;
                }
            }
        }
        Ok(())
    }

    /// Computes the statistics of the run and outputs them.
    pub fn finish(mut self) -> Result<RunReport<S, O>, TickError> {
        self.state = State::Finished;
        let summary = summarize(&self.samples, self.config.interval_secs());
        self.sink.summary(&summary).map_err(TickError::Output)?;
        if self.anomalies > 0 {
            log::warn!(
                "{} sample(s) out of {} had a package energy lower than cores + gpu.",
                self.anomalies,
                self.samples.len()
            );
        }
        Ok(RunReport {
            summary,
            anomalies: self.anomalies,
            source: self.source,
            sink: self.sink,
        })
    }
}

/// A periodic timer. The first tick happens one period after the creation of the timer.
pub enum Ticker {
    /// Accurate timer based on a timerfd, only available on Linux.
    #[cfg(target_os = "linux")]
    Timerfd(tokio_timerfd::Interval),
    /// Timer of the tokio runtime, which follows the paused clock in tests.
    Interval(tokio::time::Interval),
}

impl Ticker {
    /// Creates the most accurate timer available on this platform.
    pub fn periodic(period: Duration) -> io::Result<Ticker> {
        #[cfg(target_os = "linux")]
        {
            let start = std::time::Instant::now() + period;
            Ok(Ticker::Timerfd(tokio_timerfd::Interval::new(start, period)?))
        }

        #[cfg(not(target_os = "linux"))]
        {
            Ok(Ticker::interval_based(period))
        }
    }

    /// Creates a timer based on [`tokio::time::Interval`]. Must be called within a tokio runtime.
    pub fn interval_based(period: Duration) -> Ticker {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        Ticker::Interval(interval)
    }

    pub async fn tick(&mut self) -> io::Result<()> {
        use tokio_stream::StreamExt;

        match self {
            #[cfg(target_os = "linux")]
            Ticker::Timerfd(interval) => match interval.next().await {
                Some(res) => res,
                None => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "the timerfd stream has ended")),
            },
            Ticker::Interval(interval) => {
                interval.tick().await;
                Ok(())
            }
        }
    }
}

/// Completes when the process receives SIGINT (Ctrl+C) or SIGTERM.
pub async fn shutdown_signal() -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = sigterm.recv() => log::debug!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::future::pending;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{collector::Reading, error::ReadError};

    /// Returns the scripted readings in order, then fails.
    struct ScriptedSource {
        readings: VecDeque<Reading>,
    }

    impl ScriptedSource {
        fn new(readings: impl IntoIterator<Item = Reading>) -> Self {
            Self {
                readings: readings.into_iter().collect(),
            }
        }

        fn repeat(reading: Reading, n: usize) -> Self {
            Self::new(std::iter::repeat_n(reading, n))
        }
    }

    impl EnergySource for ScriptedSource {
        fn sample(&mut self) -> Result<Reading, ReadError> {
            self.readings.pop_front().ok_or(ReadError::ShortRead {
                domain: DomainKind::Package,
                len: 0,
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        headers: usize,
        samples: Vec<Sample>,
        summaries: Vec<Summary>,
    }

    impl OutputSink for RecordingSink {
        fn header(&mut self) -> io::Result<()> {
            self.headers += 1;
            Ok(())
        }

        fn sample(&mut self, sample: &Sample) -> io::Result<()> {
            self.samples.push(sample.clone());
            Ok(())
        }

        fn summary(&mut self, summary: &Summary) -> io::Result<()> {
            self.summaries.push(summary.clone());
            Ok(())
        }
    }

    fn reading(pkg: f64, cores: f64, ram: f64) -> Reading {
        Reading::default()
            .with(DomainKind::Package, Energy::Joules(pkg))
            .with(DomainKind::Cores, Energy::Joules(cores))
            .with(DomainKind::Ram, Energy::Joules(ram))
    }

    fn init_logger() {
        // Ignore errors because the logger can only be initialized once, and we run multiple tests.
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).try_init();
    }

    fn config(interval_ms: u64, count: u64) -> SamplingConfig {
        SamplingConfig::new(interval_ms, count).unwrap()
    }

    #[test]
    fn config_validation() {
        assert_eq!(SamplingConfig::new(0, 0), Err(ConfigError::IntervalOutOfRange(0)));
        assert_eq!(
            SamplingConfig::new(3_600_001, 0),
            Err(ConfigError::IntervalOutOfRange(3_600_001))
        );
        assert_eq!(
            SamplingConfig::new(1000, 1_000_001),
            Err(ConfigError::CountOutOfRange(1_000_001))
        );
        assert_eq!(
            SamplingConfig::new(1000, u64::MAX),
            Err(ConfigError::CountOutOfRange(u64::MAX))
        );

        let unlimited = config(1, 0);
        assert_eq!(unlimited.limit(), None);
        assert!(unlimited.is_unreliable());

        let bounded = config(3_600_000, 1_000_000);
        assert_eq!(bounded.limit().map(NonZeroU32::get), Some(1_000_000));
        assert!(!bounded.is_unreliable());
        assert!(!config(50, 0).is_unreliable());
        assert!(config(49, 0).is_unreliable());

        assert_eq!(SamplingConfig::default(), config(1000, 0));
        assert_eq!(config(250, 0).interval_secs(), 0.25);
    }

    #[test]
    fn unsupported_domains_count_as_zero() -> anyhow::Result<()> {
        let reading = Reading::default()
            .with(DomainKind::Package, Energy::Joules(20.0))
            .with(DomainKind::Cores, Energy::Joules(5.0));
        let mut sampler = Sampler::new(ScriptedSource::new([reading]), RecordingSink::default(), config(1000, 0));

        assert_eq!(sampler.on_tick()?, TickOutcome::Continue);
        let sample = &sampler.sink.samples[0];
        assert_eq!(sample.index, 1);
        assert_eq!(sample.pkg_j, 20.0);
        assert_eq!(sample.cores, Energy::Joules(5.0));
        assert_eq!(sample.gpu, Energy::Unsupported);
        assert_eq!(sample.ram, Energy::Unsupported);
        assert_eq!(sample.other_j, 15.0);
        assert_eq!(sample.total_j, 20.0);
        assert_eq!(sampler.samples(), &[20.0]);
        assert_eq!(sampler.anomalies, 0);
        Ok(())
    }

    #[test]
    fn total_includes_ram() -> anyhow::Result<()> {
        let source = ScriptedSource::new([reading(10.0, 4.0, 2.0), reading(12.0, 5.0, 3.0)]);
        let mut sampler = Sampler::new(source, RecordingSink::default(), config(500, 0));
        sampler.on_tick()?;
        sampler.on_tick()?;
        assert_eq!(sampler.samples(), &[12.0, 15.0]);

        let indices: Vec<usize> = sampler.sink.samples.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![1, 2]);
        assert_eq!(sampler.sink.samples[1].other_j, 7.0);
        Ok(())
    }

    #[test]
    fn inconsistent_counters_are_flagged() -> anyhow::Result<()> {
        init_logger();
        let source = ScriptedSource::new([reading(3.0, 5.0, 0.0)]);
        let mut sampler = Sampler::new(source, RecordingSink::default(), config(1000, 0));
        sampler.on_tick()?;
        assert_eq!(sampler.sink.samples[0].other_j, -2.0);

        let report = sampler.finish()?;
        assert_eq!(report.anomalies, 1);
        Ok(())
    }

    #[test]
    fn package_is_required() {
        let reading = Reading::default().with(DomainKind::Cores, Energy::Joules(1.0));
        let mut sampler = Sampler::new(ScriptedSource::new([reading]), RecordingSink::default(), config(1000, 0));
        let err = sampler.on_tick().unwrap_err();
        assert!(matches!(err, TickError::PackageUnsupported), "unexpected error {err:?}");
        assert!(sampler.samples().is_empty());
    }

    #[test]
    fn read_errors_are_fatal() {
        let mut sampler = Sampler::new(ScriptedSource::new([]), RecordingSink::default(), config(1000, 0));
        let err = sampler.on_tick().unwrap_err();
        assert!(matches!(err, TickError::Read(_)), "unexpected error {err:?}");
        assert!(sampler.sink.samples.is_empty());
    }

    #[test]
    fn no_sample_after_cancel() -> anyhow::Result<()> {
        let source = ScriptedSource::repeat(reading(1.0, 0.5, 0.0), 5);
        let mut sampler = Sampler::new(source, RecordingSink::default(), config(1000, 0));
        sampler.on_tick()?;
        sampler.cancel();
        assert_eq!(sampler.state(), State::Finished);
        assert_eq!(sampler.on_tick()?, TickOutcome::Finished);
        assert_eq!(sampler.samples().len(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_after_three_ticks() -> anyhow::Result<()> {
        init_logger();
        let config = config(1000, 0);
        let source = ScriptedSource::repeat(reading(10.0, 4.0, 1.0), 10);
        let mut sampler = Sampler::new(source, RecordingSink::default(), config);

        let mut ticker = Ticker::interval_based(config.interval());
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(3500)).await;
            Ok(())
        };
        sampler.run(&mut ticker, cancel).await?;
        assert_eq!(sampler.state(), State::Finished);

        let report = sampler.finish()?;
        assert_eq!(report.summary.sample_count, 3);
        assert_eq!(report.summary.elapsed_secs, 3.0);
        assert_eq!(report.sink.headers, 1);
        assert_eq!(report.sink.samples.len(), 3);
        assert_eq!(report.sink.summaries, vec![report.summary.clone()]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_the_count_limit() -> anyhow::Result<()> {
        let config = config(10, 4);
        let source = ScriptedSource::repeat(reading(2.0, 1.0, 0.5), 10);
        let mut sampler = Sampler::new(source, RecordingSink::default(), config);

        let mut ticker = Ticker::interval_based(config.interval());
        sampler.run(&mut ticker, pending()).await?;

        let report = sampler.finish()?;
        assert_eq!(report.summary.sample_count, 4);
        assert_eq!(report.sink.samples.last().map(|s| s.index), Some(4));
        // 6 readings left
        assert_eq!(report.source.readings.len(), 6);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn failed_tick_ends_the_run() {
        let config = config(100, 0);
        let source = ScriptedSource::repeat(reading(2.0, 1.0, 0.5), 2);
        let mut sampler = Sampler::new(source, RecordingSink::default(), config);

        let mut ticker = Ticker::interval_based(config.interval());
        let err = sampler.run(&mut ticker, pending()).await.unwrap_err();
        assert!(matches!(err, TickError::Read(_)), "unexpected error {err:?}");
        assert_eq!(sampler.samples().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn signal_error_is_fatal() {
        let config = config(100, 0);
        let mut sampler = Sampler::new(ScriptedSource::new([]), RecordingSink::default(), config);
        let mut ticker = Ticker::interval_based(config.interval());
        let cancel = async { Err(io::Error::other("no signal handler")) };
        let err = sampler.run(&mut ticker, cancel).await.unwrap_err();
        assert!(matches!(err, TickError::Signal(_)), "unexpected error {err:?}");
        assert!(sampler.samples().is_empty());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timerfd_ticks() -> anyhow::Result<()> {
        let mut ticker = Ticker::periodic(Duration::from_millis(5))?;
        let start = std::time::Instant::now();
        ticker.tick().await?;
        ticker.tick().await?;
        assert!(start.elapsed() >= Duration::from_millis(5));
        Ok(())
    }
}
