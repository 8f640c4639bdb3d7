//! Human-readable output of the measurements.

use std::io::{self, Write};

use crate::{
    collector::Energy,
    sampling::Sample,
    stats::{REPORTED_PERCENTILES, Summary},
};

/// Receives the results of the sampler: a header, one sample per tick, and the final summary.
pub trait OutputSink {
    fn header(&mut self) -> io::Result<()>;
    fn sample(&mut self, sample: &Sample) -> io::Result<()>;
    fn summary(&mut self, summary: &Summary) -> io::Result<()>;
}

pub const HEADER: &str = "    total W = _pkg_ (cores + _gpu_ + other) + _ram_ W";

/// Placeholder for an unsupported domain, as wide as a formatted value.
const NOT_AVAILABLE: &str = " n/a ";

/// Writes the results as text lines, flushed immediately so that the output
/// appears even when redirected through `tee` or a pipe.
pub struct TextReport<W: Write> {
    out: W,
}

impl TextReport<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TextReport<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Converts an energy to the mean power over the interval and formats it with two decimals.
pub fn format_watts(energy: Energy, interval_secs: f64) -> String {
    match energy {
        Energy::Unsupported => NOT_AVAILABLE.to_owned(),
        Energy::Joules(j) => format!("{:5.2}", j / interval_secs),
    }
}

/// Formats one sample line, e.g. `#01 20.00 W = 20.00 ( 5.00 +  n/a  + 15.00) +  n/a  W`.
pub fn format_sample(sample: &Sample) -> String {
    let w = |energy| format_watts(energy, sample.interval_secs);
    format!(
        "#{:02} {} W = {} ({} + {} + {}) + {} W",
        sample.index,
        w(Energy::Joules(sample.total_j)),
        w(Energy::Joules(sample.pkg_j)),
        w(sample.cores),
        w(sample.gpu),
        w(Energy::Joules(sample.other_j)),
        w(sample.ram),
    )
}

impl<W: Write> OutputSink for TextReport<W> {
    fn header(&mut self) -> io::Result<()> {
        writeln!(self.out, "{HEADER}")?;
        self.out.flush()
    }

    fn sample(&mut self, sample: &Sample) -> io::Result<()> {
        writeln!(self.out, "{}", format_sample(sample))?;
        self.out.flush()
    }

    fn summary(&mut self, summary: &Summary) -> io::Result<()> {
        let n = summary.sample_count;
        writeln!(self.out)?;
        writeln!(
            self.out,
            "{n} sample{} taken over a period of {:.3} second{}",
            if n == 1 { "" } else { "s" },
            summary.elapsed_secs,
            if summary.elapsed_secs == 1.0 { "" } else { "s" },
        )?;

        if let Some(dist) = &summary.distribution {
            writeln!(self.out, "Total energy: {:.6} Joules", dist.total_energy_j)?;
            writeln!(self.out)?;
            writeln!(self.out, "Distribution of 'total' values:")?;
            writeln!(self.out, "            mean = {:5.2} W", dist.mean_w)?;
            writeln!(self.out, "         std dev = {:5.2} W", dist.std_dev_w)?;
            for p in &dist.percentiles {
                let suffix = match p.rank {
                    0 => " (min)",
                    100 => " (max)",
                    _ => "",
                };
                writeln!(self.out, "{:>3}th percentile = {:5.2} W{suffix}", p.rank, p.watts)?;
            }
            debug_assert_eq!(dist.percentiles.len(), REPORTED_PERCENTILES.len());
        }
        self.out.flush()
    }
}

impl<A: OutputSink, B: OutputSink> OutputSink for (A, B) {
    fn header(&mut self) -> io::Result<()> {
        self.0.header()?;
        self.1.header()
    }

    fn sample(&mut self, sample: &Sample) -> io::Result<()> {
        self.0.sample(sample)?;
        self.1.sample(sample)
    }

    fn summary(&mut self, summary: &Summary) -> io::Result<()> {
        self.0.summary(summary)?;
        self.1.summary(summary)
    }
}

impl<S: OutputSink> OutputSink for Option<S> {
    fn header(&mut self) -> io::Result<()> {
        self.as_mut().map_or(Ok(()), S::header)
    }

    fn sample(&mut self, sample: &Sample) -> io::Result<()> {
        self.as_mut().map_or(Ok(()), |s| s.sample(sample))
    }

    fn summary(&mut self, summary: &Summary) -> io::Result<()> {
        self.as_mut().map_or(Ok(()), |s| s.summary(summary))
    }
}
