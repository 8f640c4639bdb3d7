use enum_map::{EnumMap, enum_map};

use crate::{
    cpus::CpuId,
    domains::{DomainKind, DomainSpec},
    error::{DiscoveryError, InitError, ReadError},
    perf_event::{EnergyDomain, EventSource, PowerEvent},
};

/// Energy consumed by a domain during one sampling interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Energy {
    /// The domain is not supported by the processor.
    Unsupported,
    Joules(f64),
}

impl Energy {
    /// Returns the energy in Joules, with zero for an unsupported domain,
    /// so that the value can be used in additive expressions.
    pub fn normalized(self) -> f64 {
        match self {
            Energy::Unsupported => 0.0,
            Energy::Joules(j) => j,
        }
    }

    pub fn joules(self) -> Option<f64> {
        match self {
            Energy::Unsupported => None,
            Energy::Joules(j) => Some(j),
        }
    }

    pub fn is_supported(self) -> bool {
        matches!(self, Energy::Joules(_))
    }
}

/// One combined reading of all the domains.
///
/// Domains that have not been configured read as [`Energy::Unsupported`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    per_domain: EnumMap<DomainKind, Energy>,
}

impl Default for Reading {
    fn default() -> Self {
        Self {
            per_domain: enum_map! { _ => Energy::Unsupported },
        }
    }
}

impl Reading {
    pub fn get(&self, domain: DomainKind) -> Energy {
        self.per_domain[domain]
    }

    pub fn set(&mut self, domain: DomainKind, energy: Energy) {
        self.per_domain[domain] = energy;
    }

    /// Builder-style version of [`set`](Self::set).
    pub fn with(mut self, domain: DomainKind, energy: Energy) -> Self {
        self.set(domain, energy);
        self
    }
}

/// Something that produces one reading per sampling tick.
pub trait EnergySource {
    fn sample(&mut self) -> Result<Reading, ReadError>;
}

/// Owns the RAPL domains and reads them together.
#[derive(Debug)]
pub struct EnergyCollector {
    domains: Vec<EnergyDomain>,
}

/// Result of the discovery of the RAPL domains, without opening any counter.
#[derive(Debug)]
pub struct Discovery {
    pub pmu_type: u32,
    /// One cpu per socket, or `None` if the PMU does not provide a cpumask.
    pub cpus: Option<Vec<CpuId>>,
    /// The discovered domains in the requested order, `None` for the unsupported ones.
    pub domains: Vec<(DomainSpec, Option<PowerEvent>)>,
}

impl Discovery {
    /// Finds the PMU type, the cpus to monitor and the descriptor of each domain.
    ///
    /// Fails if the PMU type is unreadable or if a mandatory domain is missing.
    pub fn run(registry: &EventSource, specs: &[DomainSpec]) -> Result<Discovery, InitError> {
        let pmu_type = registry.pmu_type()?;
        let domains = specs
            .iter()
            .map(|spec| Ok((*spec, registry.discover(spec)?)))
            .collect::<Result<Vec<_>, DiscoveryError>>()?;
        let cpus = registry.monitored_cpus().map_err(|source| InitError::Cpus {
            path: registry.cpumask_path(),
            source,
        })?;
        Ok(Discovery {
            pmu_type,
            cpus,
            domains,
        })
    }
}

impl EnergyCollector {
    /// Discovers the domains described by `specs` and opens their counters, in order.
    ///
    /// Every error is fatal: no collector is returned if a mandatory domain is missing
    /// or if a counter cannot be opened.
    pub fn initialize(registry: &EventSource, specs: &[DomainSpec]) -> Result<EnergyCollector, InitError> {
        let discovery = Discovery::run(registry, specs)?;
        match &discovery.cpus {
            Some(cpus) => log::debug!("{} socket(s) to monitor: {cpus:?}", cpus.len()),
            None => log::warn!(
                "{:?} not found, the RAPL counters will be opened without a specific cpu.",
                registry.cpumask_path()
            ),
        }

        let mut domains = Vec::with_capacity(discovery.domains.len());
        for (spec, event) in &discovery.domains {
            let domain = match event {
                Some(event) => event.open(discovery.pmu_type, discovery.cpus.as_deref())?,
                None => {
                    log::warn!("RAPL domain '{}' is not supported by this processor.", spec.kind);
                    EnergyDomain::unsupported(spec.kind)
                }
            };
            domains.push(domain);
        }

        let collector = EnergyCollector::from_domains(domains);
        log::info!("Available RAPL domains: {}", collector.supported_domains().join(", "));
        Ok(collector)
    }

    pub fn from_domains(domains: Vec<EnergyDomain>) -> Self {
        Self { domains }
    }

    pub fn domains(&self) -> &[EnergyDomain] {
        &self.domains
    }

    fn supported_domains(&self) -> Vec<&'static str> {
        self.domains
            .iter()
            .filter(|d| d.is_supported())
            .map(|d| d.kind().event_name())
            .collect()
    }

    /// Reads every domain, in order.
    pub fn sample(&mut self) -> Result<Reading, ReadError> {
        let mut reading = Reading::default();
        for domain in &mut self.domains {
            reading.set(domain.kind(), domain.read()?);
        }
        Ok(reading)
    }

    /// Closes all the counters.
    pub fn release(self) {
        for domain in self.domains {
            domain.release();
        }
    }
}

impl EnergySource for EnergyCollector {
    fn sample(&mut self) -> Result<Reading, ReadError> {
        EnergyCollector::sample(self)
    }
}
