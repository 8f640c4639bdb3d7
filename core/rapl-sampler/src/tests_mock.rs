use std::fs::{self, File};
use std::os::fd::{IntoRawFd, OwnedFd};
use std::os::unix::io::FromRawFd;
use std::{io::Write, path::Path};
use tempfile::{TempDir, tempdir};

use crate::domains::DomainKind;
use crate::perf_event::EnergyDomain;

/// Entry to be created in the mock filesystem
pub enum EntryType<'a> {
    File(&'a str), // File with content
    Dir,           // Directory
}

/// Single entry specification
pub struct Entry<'a> {
    pub path: &'a str,
    pub entry_type: EntryType<'a>,
}

/// Create all specified entries under the given base path
pub fn create_mock_layout(base_path: &Path, entries: &[Entry]) -> std::io::Result<()> {
    for entry in entries {
        let full_path = base_path.join(entry.path);
        match &entry.entry_type {
            EntryType::Dir => fs::create_dir_all(&full_path)?,
            EntryType::File(content) => {
                if let Some(parent) = full_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut file = File::create(full_path)?;
                file.write_all(content.as_bytes())?;
            }
        }
    }
    Ok(())
}

/// Creates a perf_events registry with a two-socket PMU that supports pkg, cores and ram (but not gpu).
pub fn create_valid_registry_mock() -> anyhow::Result<TempDir> {
    let tmp = tempdir()?;

    use EntryType::*;

    let entries = [
        Entry {
            path: "type",
            entry_type: File("32\n"),
        },
        Entry {
            path: "cpumask",
            entry_type: File("0,8\n"),
        },
        Entry {
            path: "events",
            entry_type: Dir,
        },
        Entry {
            path: "events/energy-cores",
            entry_type: File("event=0x01\n"),
        },
        Entry {
            path: "events/energy-cores.scale",
            entry_type: File("2.3283064365386962890625e-10\n"),
        },
        Entry {
            path: "events/energy-cores.unit",
            entry_type: File("Joules\n"),
        },
        Entry {
            path: "events/energy-pkg",
            entry_type: File("event=0x02\n"),
        },
        Entry {
            path: "events/energy-pkg.scale",
            entry_type: File("2.3283064365386962890625e-10\n"),
        },
        Entry {
            path: "events/energy-pkg.unit",
            entry_type: File("Joules\n"),
        },
        Entry {
            path: "events/energy-ram",
            entry_type: File("event=0x03\n"),
        },
        Entry {
            path: "events/energy-ram.scale",
            entry_type: File("2.3283064365386962890625e-10\n"),
        },
        Entry {
            path: "events/energy-ram.unit",
            entry_type: File("Joules\n"),
        },
    ];

    create_mock_layout(tmp.path(), &entries)?;
    Ok(tmp)
}

/// Creates a supported domain whose counters are pipes, one per socket.
///
/// Write the raw counter values (8 bytes each) to the returned fds, then call `read()` on the domain.
pub fn fake_energy_domain(kind: DomainKind, scale: f64, n_sockets: usize) -> (EnergyDomain, Vec<OwnedFd>) {
    use nix::unistd::pipe;

    let mut handles = Vec::with_capacity(n_sockets);
    let mut writers = Vec::with_capacity(n_sockets);
    for cpu in 0..n_sockets {
        let (read_fd, write_fd) = pipe().unwrap();
        let file = unsafe { File::from_raw_fd(read_fd.into_raw_fd()) };
        handles.push((file, cpu as i32));
        writers.push(write_fd);
    }
    (EnergyDomain::supported(kind, scale, handles), writers)
}
