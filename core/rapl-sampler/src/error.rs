//! Errors of the sampling engine.
//!
//! None of these errors is retried: each one reflects a problem in the configuration
//! or in the environment (kernel, driver, privileges) that the sampler cannot fix.

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::domains::DomainKind;

pub(crate) const PERMISSION_ADVICE: &str = "Try to set kernel.perf_event_paranoid to 0 or -1, or to give CAP_PERFMON to the application's binary (CAP_SYS_ADMIN before Linux 5.8).";

/// Invalid sampling options.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("sample interval must be in the range 1..3600000 ms, got {0}")]
    IntervalOutOfRange(u64),
    #[error("sample count must be in the range 0..1000000, got {0}")]
    CountOutOfRange(u64),
}

/// Failure to discover the RAPL domains in the perf_events registry.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("could not read the type of the RAPL PMU from {path:?}, is your Linux kernel 3.14 or later? {advice}", advice = PERMISSION_ADVICE)]
    PmuType {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(
        "failed to open file {path:?} for non-optional domain '{domain}'. Is your kernel version 3.14 or later, as required? Run `uname -r` to see."
    )]
    MissingDomain { domain: DomainKind, path: PathBuf },
    #[error("unexpected unit '{unit}' in {path:?}, expected 'Joules'")]
    UnexpectedUnit { unit: String, path: PathBuf },
    #[error("failed to parse {path:?}: '{content}'")]
    Malformed { path: PathBuf, content: String },
    #[error("could not read {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failure to open a perf_event counter for a discovered domain.
#[derive(Debug, Error)]
#[error("perf_event_open() failed for RAPL domain '{domain}' on cpu {cpu}: {source}. {advice}", advice = PERMISSION_ADVICE)]
pub struct OpenError {
    pub domain: DomainKind,
    pub cpu: i32,
    #[source]
    pub source: io::Error,
}

/// Failure to read a perf_event counter.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to read the perf_event counter of RAPL domain '{domain}'")]
    Io {
        domain: DomainKind,
        #[source]
        source: io::Error,
    },
    #[error("short read on the perf_event counter of RAPL domain '{domain}': got {len} bytes instead of 8")]
    ShortRead { domain: DomainKind, len: usize },
}

/// Failure to build an [`EnergyCollector`](crate::collector::EnergyCollector).
#[derive(Debug, Error)]
pub enum InitError {
    #[error("RAPL domain discovery failed")]
    Discovery(#[from] DiscoveryError),
    #[error("could not determine which cpus to monitor from {path:?}")]
    Cpus {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Open(#[from] OpenError),
}

/// Fatal error during a sampling tick.
#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error("the package energy is unsupported, but it is required to compute the total")]
    PackageUnsupported,
    #[error("failed to write the measurements")]
    Output(#[source] io::Error),
    #[error("the sampling timer failed")]
    Timer(#[source] io::Error),
    #[error("failed to listen for the termination signals")]
    Signal(#[source] io::Error),
}
