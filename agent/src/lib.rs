use std::io::Write;

use anyhow::Context;
use env_logger::Env;
use rapl_sampler::{collector::Discovery, domains::DomainSpec, perf_event::EventSource};

pub fn init_logger() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    // Print a warning if we are running in debug mode.
    #[cfg(debug_assertions)]
    {
        log::warn!("DEBUG assertions are enabled, this build of the sampler is fine for debugging, but not for measurements.");
    }
}

/// Discovers the RAPL domains without opening any counter, and describes them.
///
/// Fails if the registry cannot be read or if a mandatory domain is missing.
pub fn write_check_report(registry: &EventSource, specs: &[DomainSpec], out: &mut impl Write) -> anyhow::Result<()> {
    let discovery = Discovery::run(registry, specs)
        .with_context(|| format!("RAPL discovery failed in {:?}", registry.root()))?;

    writeln!(out, "RAPL event source: {}", registry.root().display())?;
    writeln!(out, "PMU type: {}", discovery.pmu_type)?;
    match &discovery.cpus {
        Some(cpus) => {
            let cpus: Vec<String> = cpus
                .iter()
                .map(|id| format!("{} (socket {})", id.cpu, id.socket))
                .collect();
            writeln!(out, "Monitored cpus: {}", cpus.join(", "))?;
        }
        None => writeln!(out, "Monitored cpus: any (no cpumask)")?,
    }
    writeln!(out, "Domains:")?;
    for (spec, event) in &discovery.domains {
        match event {
            Some(event) => writeln!(
                out,
                "- {}: supported, event 0x{:02x}, {:e} {}/tick",
                spec.kind, event.code, event.scale, event.unit
            )?,
            None => writeln!(out, "- {}: unsupported", spec.kind)?,
        }
    }
    out.flush()?;
    Ok(())
}
