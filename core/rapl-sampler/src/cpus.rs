use std::{fs, io, num::ParseIntError, path::Path};

use thiserror::Error;

/// Cpu id and socket (package) id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuId {
    pub cpu: u32,
    pub socket: u32,
}

#[derive(Debug, Error)]
#[error("invalid cpu list '{list}'")]
pub struct InvalidCpuList {
    list: String,
    #[source]
    source: Option<ParseIntError>,
}

/// Parses a cpu list like "0,64", "0-1" or "1-3,5-6".
pub fn parse_cpu_list(cpulist: &str) -> Result<Vec<u32>, InvalidCpuList> {
    let invalid = |source| InvalidCpuList {
        list: cpulist.trim_end().to_owned(),
        source,
    };

    let mut cpus = Vec::new();
    for item in cpulist.trim_end().split(',') {
        let bounds = item
            .split('-')
            .map(str::parse)
            .collect::<Result<Vec<u32>, ParseIntError>>()
            .map_err(|e| invalid(Some(e)))?;

        match *bounds.as_slice() {
            [start, end] if start <= end => cpus.extend(start..=end),
            [n] => cpus.push(n),
            _ => return Err(invalid(None)),
        }
    }
    Ok(cpus)
}

/// Parses the `cpumask` of the power PMU, which contains one cpu per socket.
pub fn parse_cpu_and_socket_list(cpulist: &str) -> Result<Vec<CpuId>, InvalidCpuList> {
    let cpus = parse_cpu_list(cpulist)?
        .into_iter()
        .enumerate()
        .map(|(i, cpu)| CpuId { cpu, socket: i as u32 })
        .collect();
    Ok(cpus)
}

/// Retrieves the CPUs to monitor (one per socket) from a `cpumask` file.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn cpus_to_monitor(cpumask: &Path) -> io::Result<Option<Vec<CpuId>>> {
    let cpulist = match fs::read_to_string(cpumask) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let cpus = parse_cpu_and_socket_list(&cpulist).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(cpus))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_cpu_and_socket_list() -> anyhow::Result<()> {
        let single = "0";
        assert_eq!(parse_cpu_and_socket_list(single)?, vec![CpuId { cpu: 0, socket: 0 }]);

        let comma = "0,64";
        assert_eq!(
            parse_cpu_and_socket_list(comma)?,
            vec![CpuId { cpu: 0, socket: 0 }, CpuId { cpu: 64, socket: 1 }]
        );

        let combined = "1-3,5-6\n";
        assert_eq!(
            parse_cpu_and_socket_list(combined)?,
            vec![
                CpuId { cpu: 1, socket: 0 },
                CpuId { cpu: 2, socket: 1 },
                CpuId { cpu: 3, socket: 2 },
                CpuId { cpu: 5, socket: 3 },
                CpuId { cpu: 6, socket: 4 },
            ]
        );
        Ok(())
    }

    #[test]
    fn test_parse_cpulist_invalid_item() {
        let err = parse_cpu_list("1-2-3").unwrap_err();
        assert!(err.to_string().contains("invalid cpu list"));
        assert!(parse_cpu_list("4-2").is_err());
        assert!(parse_cpu_list("a").is_err());
    }

    #[test]
    fn test_cpus_to_monitor() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "0,8")?;

        let result = cpus_to_monitor(file.path())?;
        assert_eq!(
            result,
            Some(vec![CpuId { cpu: 0, socket: 0 }, CpuId { cpu: 8, socket: 1 }])
        );
        Ok(())
    }

    #[test]
    fn test_cpus_to_monitor_missing_file() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        assert_eq!(cpus_to_monitor(&tmp.path().join("cpumask"))?, None);
        Ok(())
    }
}
