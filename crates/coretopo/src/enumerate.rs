use std::path::Path;

use crate::{Error, Result};

const CPU_ROOT: &str = "/sys/devices/system/cpu";

/// Determine the number of logical processors the kernel knows about,
/// online or not, from the highest-numbered `cpu<N>` directory.
pub fn max_core_count() -> Result<usize> {
    max_core_count_in(CPU_ROOT)
}

fn max_core_count_in(root: impl AsRef<Path>) -> Result<usize> {
    let root = root.as_ref();
    let entries = std::fs::read_dir(root).map_err(|e| Error::unreadable(e, root))?;

    let mut highest: Option<usize> = None;

    for entry in entries {
        let entry = entry.map_err(|e| Error::unreadable(e, root))?;
        let name = entry.file_name();

        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(suffix) = name.strip_prefix("cpu") else {
            continue;
        };
        // only entries of the exact form cpu<decimal> count; cpufreq,
        // cpuidle and friends share the prefix
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }

        if let Ok(cpu) = suffix.parse::<usize>() {
            highest = Some(highest.map_or(cpu, |h| h.max(cpu)));
        }
    }

    match highest {
        Some(cpu) => Ok(cpu + 1),
        None => Err(Error::no_cpus(root)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_root(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        dir
    }

    #[test]
    fn counts_past_gaps() {
        let root = synthetic_root(&["cpu0", "cpu1", "cpu2", "cpu10", "cpufreq"]);
        assert_eq!(max_core_count_in(root.path()).unwrap(), 11);
    }

    #[test]
    fn dense_set() {
        let root = synthetic_root(&["cpu0", "cpu1", "cpu2", "cpu3"]);
        assert_eq!(max_core_count_in(root.path()).unwrap(), 4);
    }

    #[test]
    fn single_cpu() {
        let root = synthetic_root(&["cpu0", "cpuidle", "isolated"]);
        assert_eq!(max_core_count_in(root.path()).unwrap(), 1);
    }

    #[test]
    fn no_matching_entries() {
        let root = synthetic_root(&["cpufreq", "cpuidle", "power"]);
        assert!(max_core_count_in(root.path()).is_err());
    }

    #[test]
    fn unreadable_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent");
        assert!(max_core_count_in(&missing).is_err());
    }
}
