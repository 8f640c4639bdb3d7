use std::{fmt, str::FromStr};

use enum_map::Enum;

/// A known RAPL domain, as exposed by the `power` PMU of perf_events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Enum)]
pub enum DomainKind {
    /// entire socket
    Package,
    /// power plane 0: cores
    Cores,
    /// power plane 1: integrated GPU
    Gpu,
    /// memory controller
    Ram,
}

impl fmt::Display for DomainKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

impl FromStr for DomainKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "package" | "pkg" => Ok(DomainKind::Package),
            "pp0" | "core" | "cores" => Ok(DomainKind::Cores),
            "pp1" | "uncore" | "gpu" => Ok(DomainKind::Gpu),
            "dram" | "ram" => Ok(DomainKind::Ram),
            _ => Err(s.to_owned()),
        }
    }
}

impl DomainKind {
    pub const ALL: [DomainKind; 4] = [DomainKind::Package, DomainKind::Cores, DomainKind::Gpu, DomainKind::Ram];

    /// The name of the domain in the perf_events registry, i.e. the suffix of `events/energy-<name>`.
    pub fn event_name(&self) -> &'static str {
        match self {
            DomainKind::Package => "pkg",
            DomainKind::Cores => "cores",
            DomainKind::Gpu => "gpu",
            DomainKind::Ram => "ram",
        }
    }
}

/// Describes a domain that the collector should discover and open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DomainSpec {
    pub kind: DomainKind,
    /// If `true`, a missing descriptor leaves the domain unsupported instead of failing.
    pub optional: bool,
}

impl DomainSpec {
    pub const fn mandatory(kind: DomainKind) -> Self {
        Self { kind, optional: false }
    }

    pub const fn optional(kind: DomainKind) -> Self {
        Self { kind, optional: true }
    }

    /// The default domains, in reading order.
    ///
    /// Only the package is mandatory. Some processors do not expose the cores domain
    /// even though they expose the package, so it is optional like gpu and ram.
    pub fn defaults() -> Vec<DomainSpec> {
        vec![
            DomainSpec::mandatory(DomainKind::Package),
            DomainSpec::optional(DomainKind::Cores),
            DomainSpec::optional(DomainKind::Gpu),
            DomainSpec::optional(DomainKind::Ram),
        ]
    }
}
