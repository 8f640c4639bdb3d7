//! Periodic sampling of the RAPL energy counters of Intel and AMD processors.
//!
//! The counters are read through the `power` PMU of perf_events. Each sampling tick
//! reads the energy consumed since the previous tick by the package, cores, gpu and
//! ram domains, and the end of the run produces statistics on the total power.
//!
//! ```no_run
//! use rapl_sampler::{
//!     collector::EnergyCollector,
//!     domains::DomainSpec,
//!     perf_event::EventSource,
//!     report::TextReport,
//!     sampling::{Sampler, SamplingConfig, Ticker, shutdown_signal},
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let collector = EnergyCollector::initialize(&EventSource::default(), &DomainSpec::defaults())?;
//! let config = SamplingConfig::new(1000, 10)?;
//! let mut sampler = Sampler::new(collector, TextReport::stdout(), config);
//! let mut ticker = Ticker::periodic(config.interval())?;
//! sampler.run(&mut ticker, shutdown_signal()).await?;
//! let report = sampler.finish()?;
//! report.source.release();
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod counter;
pub mod cpus;
pub mod csv;
pub mod domains;
pub mod error;
pub mod perf_event;
pub mod report;
pub mod sampling;
pub mod stats;

#[cfg(test)]
mod tests_mock;
