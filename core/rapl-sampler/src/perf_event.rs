use perf_event_open_sys as sys;
use std::{
    fs::{self, File},
    io::{self, Read},
    os::fd::FromRawFd,
    path::{Path, PathBuf},
};

use crate::{
    collector::Energy,
    counter::{CounterDiff, CounterDiffUpdate},
    cpus::{self, CpuId},
    domains::{DomainKind, DomainSpec},
    error::{DiscoveryError, OpenError, ReadError},
};

// See https://github.com/torvalds/linux/commit/4788e5b4b2338f85fa42a712a182d8afd65d7c58
// for an explanation of the RAPL PMU driver.

pub(crate) const PERF_MAX_ENERGY: u64 = u64::MAX;

/// Root of the perf_events registry entry of the RAPL PMU.
pub const DEFAULT_EVENT_SOURCE_DIR: &str = "/sys/bus/event_source/devices/power";

/// Read-only view of the perf_events registry of the RAPL PMU.
///
/// The registry contains:
/// - `type`: the PMU type to give to `perf_event_open`
/// - `cpumask`: one cpu per socket (optional)
/// - `events/energy-<name>`, `events/energy-<name>.scale` and `events/energy-<name>.unit`
///   for each RAPL domain supported by the processor
#[derive(Debug, Clone)]
pub struct EventSource {
    root: PathBuf,
}

/// Describes a RAPL domain found in the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerEvent {
    pub domain: DomainKind,
    /// The event code to use as a "config" field for perf_event_open
    pub code: u64,
    /// should be "Joules"
    pub unit: String,
    /// The scale to apply in order to get joules (`energy_j = count * scale`).
    /// Usually "2.3283064365386962890625e-10", that is 2^-32.
    pub scale: f64,
}

/// One hardware energy channel, with its perf_event counters.
///
/// An unsupported domain has no counter and always reads as [`Energy::Unsupported`].
/// The counters are closed when the domain is dropped or [released](EnergyDomain::release).
#[derive(Debug)]
pub struct EnergyDomain {
    kind: DomainKind,
    counters: Option<DomainCounters>,
}

#[derive(Debug)]
struct DomainCounters {
    joules_per_tick: f64,
    /// One handle per monitored socket.
    handles: Vec<CounterHandle>,
}

#[derive(Debug)]
struct CounterHandle {
    fd: File,
    cpu: i32,
    counter: CounterDiff,
}

impl Default for EventSource {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_SOURCE_DIR)
    }
}

impl EventSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Retrieves the type of the RAPL PMU (Power Monitoring Unit) in the Linux kernel.
    pub fn pmu_type(&self) -> Result<u32, DiscoveryError> {
        let path = self.root.join("type");
        let read = fs::read_to_string(&path).map_err(|source| DiscoveryError::PmuType {
            path: path.clone(),
            source,
        })?;
        read.trim_end().parse().map_err(|_| DiscoveryError::Malformed {
            path,
            content: read.clone(),
        })
    }

    pub fn cpumask_path(&self) -> PathBuf {
        self.root.join("cpumask")
    }

    /// Retrieves the CPUs to monitor, one per socket, or `None` if the PMU has no cpumask.
    pub fn monitored_cpus(&self) -> io::Result<Option<Vec<CpuId>>> {
        cpus::cpus_to_monitor(&self.cpumask_path())
    }

    /// Looks for the descriptor of a RAPL domain.
    ///
    /// Returns `Ok(None)` if the domain is optional and not supported by the processor.
    pub fn discover(&self, spec: &DomainSpec) -> Result<Option<PowerEvent>, DiscoveryError> {
        let event_path = self.event_path(spec.kind);
        let code = match fs::read_to_string(&event_path) {
            Ok(content) => parse_event_code(&event_path, &content)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if spec.optional {
                    log::debug!("Optional RAPL domain '{}' is not supported: {event_path:?} not found", spec.kind);
                    return Ok(None);
                }
                return Err(DiscoveryError::MissingDomain {
                    domain: spec.kind,
                    path: event_path,
                });
            }
            Err(source) => return Err(DiscoveryError::Io { path: event_path, source }),
        };

        let scale_path = event_path.with_extension("scale");
        let read = read_descriptor(&scale_path)?;
        let scale: f64 = read.trim_end().parse().map_err(|_| DiscoveryError::Malformed {
            path: scale_path.clone(),
            content: read.clone(),
        })?;

        let unit_path = event_path.with_extension("unit");
        let unit = read_descriptor(&unit_path)?.trim_end().to_owned();
        if unit != "Joules" {
            return Err(DiscoveryError::UnexpectedUnit { unit, path: unit_path });
        }

        let event = PowerEvent {
            domain: spec.kind,
            code,
            unit,
            scale,
        };
        log::debug!("Found RAPL domain '{}': {event:?}", spec.kind);
        Ok(Some(event))
    }

    fn event_path(&self, kind: DomainKind) -> PathBuf {
        self.root.join("events").join(format!("energy-{}", kind.event_name()))
    }
}

fn read_descriptor(path: &Path) -> Result<String, DiscoveryError> {
    fs::read_to_string(path).map_err(|source| DiscoveryError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses the content of `events/energy-<name>`, for instance `event=0x02`.
fn parse_event_code(path: &Path, content: &str) -> Result<u64, DiscoveryError> {
    let malformed = || DiscoveryError::Malformed {
        path: path.to_path_buf(),
        content: content.to_owned(),
    };
    let value = content.trim_end().strip_prefix("event=").ok_or_else(malformed)?;
    let hex = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(hex, 16).map_err(|_| malformed())
}

impl PowerEvent {
    /// Make a system call to [perf_event_open](https://www.man7.org/linux/man-pages/man2/perf_event_open.2.html)
    /// with `attr.config = self.code` and `attr.type = pmu_type`.
    ///
    /// # Arguments
    /// * `pmu_type` - The type of the RAPL PMU, given by [`EventSource::pmu_type()`].
    /// * `cpu` - The cpu that represents the socket to monitor, or -1.
    pub fn perf_event_open(&self, pmu_type: u32, cpu: i32) -> io::Result<File> {
        // For RAPL PMU events, we use (-1, cpu) which means "all processes, one cpu".
        let pid = -1;

        let mut attr = sys::bindings::perf_event_attr::default();
        attr.config = self.code;
        attr.type_ = pmu_type;
        attr.size = core::mem::size_of_val(&attr) as u32;
        log::trace!("perf_event_open {attr:?}");

        let result = unsafe { sys::perf_event_open(&mut attr, pid, cpu, -1, 0) };
        if result == -1 {
            Err(io::Error::last_os_error())
        } else {
            // SAFETY: the fd has just been returned by the kernel and nobody else owns it
            Ok(unsafe { File::from_raw_fd(result) })
        }
    }

    /// Opens the counters of this domain: one per socket, or a single one with an unspecified cpu
    /// if the PMU does not tell which cpus to use.
    pub fn open(&self, pmu_type: u32, cpus: Option<&[CpuId]>) -> Result<EnergyDomain, OpenError> {
        let targets: Vec<i32> = match cpus {
            Some(cpus) => cpus.iter().map(|c| c.cpu as i32).collect(),
            None => vec![-1],
        };
        let mut handles = Vec::with_capacity(targets.len());
        for cpu in targets {
            match self.perf_event_open(pmu_type, cpu) {
                Ok(fd) => handles.push((fd, cpu)),
                Err(source) => {
                    if matches!(source.raw_os_error(), Some(libc::EACCES | libc::EPERM)) {
                        log_insufficient_privileges(&source);
                    }
                    // the handles that have already been opened are closed on drop
                    return Err(OpenError {
                        domain: self.domain,
                        cpu,
                        source,
                    });
                }
            }
        }
        Ok(EnergyDomain::supported(self.domain, self.scale, handles))
    }
}

fn log_insufficient_privileges(e: &io::Error) {
    fn resolve_application_path() -> io::Result<PathBuf> {
        std::env::current_exe()?.canonicalize()
    }
    let app_path = resolve_application_path()
        .ok()
        .and_then(|p| p.to_str().map(|s| s.to_owned()))
        .unwrap_or(String::from("path/to/rapl-sampler"));
    let msg = indoc::formatdoc! {"
        I could not use perf_events to read RAPL energy counters: {e}.
        This error is probably caused by insufficient privileges.
        To fix this, you have 3 possibilities:
        1. Grant the CAP_PERFMON (CAP_SYS_ADMIN on Linux < 5.8) capability to the binary.
            sudo setcap cap_perfmon=ep \"{app_path}\"

        2. Change a kernel setting to allow every process to read the perf_events.
            sudo sysctl -w kernel.perf_event_paranoid=0

        3. Run the sampler as root, for instance with sudo."};
    log::error!("{msg}");
}

impl EnergyDomain {
    /// Creates a domain that is not supported by the processor.
    pub fn unsupported(kind: DomainKind) -> Self {
        Self { kind, counters: None }
    }

    /// Creates a supported domain from opened counters, `(fd, cpu)`.
    ///
    /// perf_event counters start at zero when opened, hence the previous value of each counter is zero.
    pub(crate) fn supported(kind: DomainKind, joules_per_tick: f64, handles: Vec<(File, i32)>) -> Self {
        let handles = handles
            .into_iter()
            .map(|(fd, cpu)| CounterHandle {
                fd,
                cpu,
                counter: CounterDiff::starting_at(0, PERF_MAX_ENERGY),
            })
            .collect();
        Self {
            kind,
            counters: Some(DomainCounters {
                joules_per_tick,
                handles,
            }),
        }
    }

    pub fn kind(&self) -> DomainKind {
        self.kind
    }

    pub fn is_supported(&self) -> bool {
        self.counters.is_some()
    }

    pub fn joules_per_tick(&self) -> Option<f64> {
        self.counters.as_ref().map(|c| c.joules_per_tick)
    }

    /// Returns the energy consumed since the previous read, summed over all the sockets.
    pub fn read(&mut self) -> Result<Energy, ReadError> {
        let Some(counters) = &mut self.counters else {
            return Ok(Energy::Unsupported);
        };
        let mut joules = 0.0;
        for handle in &mut counters.handles {
            let ticks = handle.read_counter_diff(self.kind)?;
            // NOTE: the energy can be a floating-point number in Joules,
            // without any loss of precision, because the scale is a power of two.
            // An f64 is needed to hold the raw counter values, an f32 is not enough.
            joules += (ticks as f64) * counters.joules_per_tick;
        }
        Ok(Energy::Joules(joules))
    }

    /// Closes the counters of the domain.
    pub fn release(self) {
        if let Some(counters) = &self.counters {
            let cpus: Vec<i32> = counters.handles.iter().map(|h| h.cpu).collect();
            log::debug!("Closing perf_event counters of RAPL domain '{}' (cpus {cpus:?})", self.kind);
        }
        drop(self);
    }
}

impl CounterHandle {
    fn read_counter_diff(&mut self, domain: DomainKind) -> Result<u64, ReadError> {
        let counter_value = self.read_counter_value(domain)?;
        let diff = self.counter.update(counter_value);
        if let CounterDiffUpdate::CorrectedDifference(_) = diff {
            log::debug!("Overflow on perf_event counter for RAPL domain {domain} (cpu {})", self.cpu);
        }
        Ok(diff.ticks())
    }

    fn read_counter_value(&mut self, domain: DomainKind) -> Result<u64, ReadError> {
        let mut buf = [0u8; 8];
        // rewind() is INVALID for perf events, we must read "at the cursor" every time
        let len = self.fd.read(&mut buf).map_err(|source| ReadError::Io { domain, source })?;
        if len != buf.len() {
            return Err(ReadError::ShortRead { domain, len });
        }
        Ok(u64::from_ne_bytes(buf))
    }
}
