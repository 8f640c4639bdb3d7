use anyhow::Context;
use clap::Parser;
use rapl_sampler::{
    collector::EnergyCollector,
    csv::CsvTrace,
    domains::DomainSpec,
    perf_event::EventSource,
    report::TextReport,
    sampling::{Sampler, SamplingConfig, Ticker, UNRELIABLE_INTERVAL_MS, shutdown_signal},
};
use rapl_sampler_agent::{init_logger, write_check_report};

const BINARY: &str = env!("CARGO_BIN_NAME");

/// Main function of the sampler.
///
/// The steps are:
/// - parse the CLI
/// - discover the RAPL domains and open their counters
/// - sample until the count limit is reached or until Ctrl+C (or SIGTERM)
/// - print the statistics of the run
///
/// About errors: we use `anyhow::Result` and `context` instead of `expect` to get
/// nicer error messages (`expect` prints errors with `Debug`).
/// Returning an error from `main` exits with code 1.
fn main() -> anyhow::Result<()> {
    let args = parse_args();
    init_logger();
    print_welcome();

    let registry = EventSource::new(args.event_source_dir);
    let specs = DomainSpec::defaults();

    if args.check {
        let mut stdout = std::io::stdout().lock();
        return write_check_report(&registry, &specs, &mut stdout);
    }

    let config = SamplingConfig::new(args.sample_interval, args.sample_count).context("invalid sampling options")?;
    if config.is_unreliable() {
        log::warn!("Sample interval below {UNRELIABLE_INTERVAL_MS} ms: the measurements are likely to be inaccurate.");
    }

    // Every counter is opened before the timer starts: a missing domain aborts without sampling.
    let collector = EnergyCollector::initialize(&registry, &specs).context("could not set up the RAPL counters")?;

    let trace = match &args.output_file {
        Some(path) => Some(CsvTrace::create(path).with_context(|| format!("could not create the output file {path:?}"))?),
        None => None,
    };
    let mut sampler = Sampler::new(collector, (TextReport::stdout(), trace), config);

    // Single-threaded: the timer and the signals are handled by the same task.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("could not build the tokio runtime")?;
    rt.block_on(async {
        let mut ticker = Ticker::periodic(config.interval()).context("could not create the sampling timer")?;
        sampler
            .run(&mut ticker, shutdown_signal())
            .await
            .context("sampling failed")
    })?;

    let report = sampler.finish().context("could not write the statistics")?;
    report.source.release();
    log::info!("Stopped.");
    Ok(())
}

/// Parses the command line.
///
/// Usage errors exit with code 1, `--help` and `--version` exit with code 0.
fn parse_args() -> cli::Cli {
    match cli::Cli::try_parse() {
        Ok(args) => args,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    }
}

/// Prints a short welcome message.
fn print_welcome() {
    log::info!("Starting '{BINARY}' v{}", env!("CARGO_PKG_VERSION"));
}

mod cli {
    use std::path::PathBuf;

    use clap::{Parser, value_parser};
    use rapl_sampler::{
        perf_event::DEFAULT_EVENT_SOURCE_DIR,
        sampling::{DEFAULT_INTERVAL_MS, MAX_INTERVAL_MS, MAX_SAMPLE_COUNT, MIN_INTERVAL_MS},
    };

    // NOTE: the doc comment attached to `Cli` is used by clap as the description of
    // the application. It is displayed at the start of the help message.

    /// Samples the RAPL energy counters and prints the power draw of the processor.
    ///
    /// Each line shows the total power and its breakdown:
    /// `total = pkg (cores + gpu + other) + ram`, in Watts.
    /// Press Ctrl+C to stop sampling and print the statistics of the run.
    #[derive(Parser)]
    #[command(version)]
    pub struct Cli {
        /// Sample interval, in milliseconds.
        ///
        /// Values below 50 ms are likely to give inaccurate results.
        #[arg(
            short = 'i',
            long,
            env = "RAPL_SAMPLE_INTERVAL",
            default_value_t = DEFAULT_INTERVAL_MS,
            value_parser = value_parser!(u64).range(MIN_INTERVAL_MS..=MAX_INTERVAL_MS),
        )]
        pub sample_interval: u64,

        /// Number of samples to take, 0 for unlimited.
        #[arg(
            short = 'n',
            long,
            env = "RAPL_SAMPLE_COUNT",
            default_value_t = 0,
            value_parser = value_parser!(u64).range(0..=MAX_SAMPLE_COUNT),
        )]
        pub sample_count: u64,

        /// Directory of the RAPL PMU in the perf_events registry.
        #[arg(long, env = "RAPL_EVENT_SOURCE_DIR", default_value = DEFAULT_EVENT_SOURCE_DIR)]
        pub event_source_dir: PathBuf,

        /// Also write the energy of each sample to this CSV file.
        #[arg(long)]
        pub output_file: Option<PathBuf>,

        /// Only check which RAPL domains are available, then exit.
        #[arg(long, default_value_t = false)]
        pub check: bool,
    }
}
