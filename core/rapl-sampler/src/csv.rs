use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::{collector::Energy, report::OutputSink, sampling::Sample, stats::Summary};

const COLUMNS: [&str; 8] = [
    "timestamp",
    "sample",
    "total_J",
    "pkg_J",
    "cores_J",
    "gpu_J",
    "other_J",
    "ram_J",
];

/// Writes one CSV row per sample, with the energy of each domain in Joules.
///
/// Unsupported domains are written as empty cells.
pub struct CsvTrace<W: Write> {
    out: W,
    delimiter: char,
}

impl CsvTrace<BufWriter<File>> {
    /// Creates (or truncates) the file at `path`.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> CsvTrace<W> {
    pub fn new(out: W) -> Self {
        Self { out, delimiter: ';' }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_row<I: IntoIterator<Item = String>>(&mut self, values: I) -> io::Result<()> {
        let mut first = true;
        for value in values {
            if !first {
                write!(self.out, "{}", self.delimiter)?;
            }
            write!(self.out, "{value}")?;
            first = false;
        }
        writeln!(self.out)?;
        self.out.flush()
    }
}

fn cell(energy: Energy) -> String {
    energy.joules().map(|j| j.to_string()).unwrap_or_default()
}

impl<W: Write> OutputSink for CsvTrace<W> {
    fn header(&mut self) -> io::Result<()> {
        self.write_row(COLUMNS.map(String::from))
    }

    fn sample(&mut self, sample: &Sample) -> io::Result<()> {
        let timestamp = OffsetDateTime::from(sample.timestamp)
            .format(&Rfc3339)
            .map_err(io::Error::other)?;
        self.write_row([
            timestamp,
            sample.index.to_string(),
            sample.total_j.to_string(),
            sample.pkg_j.to_string(),
            cell(sample.cores),
            cell(sample.gpu),
            sample.other_j.to_string(),
            cell(sample.ram),
        ])
    }

    fn summary(&mut self, _summary: &Summary) -> io::Result<()> {
        self.out.flush()
    }
}
