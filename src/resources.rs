use std::io;
use std::path::{Path, PathBuf};

/// Upper bound on concurrent cuts; each one is a separate ffmpeg process.
pub const MAX_CONCURRENT_CUTS: usize = 4;

/// Below this share of available memory the worker pool is halved.
const LOW_MEMORY_PERCENT: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub total_kib: u64,
    pub available_kib: u64,
}

impl MemoryInfo {
    pub fn under_pressure(&self) -> bool {
        self.total_kib > 0 && self.available_kib * 100 < self.total_kib * LOW_MEMORY_PERCENT
    }
}

pub fn parse_meminfo(contents: &str) -> Option<MemoryInfo> {
    let mut total_kib = None;
    let mut available_kib = None;
    for line in contents.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let value = rest.split_whitespace().next().and_then(|v| v.parse().ok());
        match key.trim() {
            "MemTotal" => total_kib = value,
            "MemAvailable" => available_kib = value,
            _ => {}
        }
    }
    Some(MemoryInfo {
        total_kib: total_kib?,
        available_kib: available_kib?,
    })
}

pub fn memory_info() -> Option<MemoryInfo> {
    let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo(&contents)
}

pub fn concurrency_width(cpus: usize, memory: Option<MemoryInfo>) -> usize {
    let mut width = cpus.max(1);
    if memory.is_some_and(|m| m.under_pressure()) {
        width /= 2;
    }
    width.clamp(1, MAX_CONCURRENT_CUTS)
}

/// Worker pool width for this host.
pub fn default_concurrency() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let memory = memory_info();
    let width = concurrency_width(cpus, memory);
    tracing::debug!(cpus, ?memory, width, "derived cut concurrency");
    width
}

/// Stream-copy output is about the size of the input; keep 10% headroom for container overhead.
pub fn estimate_required_space(input_size: u64) -> u64 {
    input_size.saturating_add(input_size / 10)
}

/// The output directory may not exist yet, so free space is measured on its nearest existing
/// ancestor.
pub fn nearest_existing_ancestor(path: &Path) -> PathBuf {
    let mut current = path;
    loop {
        if current.exists() {
            return current.to_path_buf();
        }
        match current.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => current = parent,
            _ => return PathBuf::from("."),
        }
    }
}

pub fn available_space(path: &Path) -> io::Result<u64> {
    fs2::available_space(nearest_existing_ancestor(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal:       16000000 kB\nMemFree:          500000 kB\nMemAvailable:    2000000 kB\n";

    #[test]
    fn meminfo_parses_total_and_available() {
        let info = parse_meminfo(MEMINFO).expect("meminfo");
        assert_eq!(info.total_kib, 16_000_000);
        assert_eq!(info.available_kib, 2_000_000);
        assert!(info.under_pressure());
        assert_eq!(parse_meminfo("MemTotal: 1 kB\n"), None);
    }

    #[test]
    fn width_is_halved_under_pressure_and_capped() {
        let pressured = parse_meminfo(MEMINFO);
        let relaxed = Some(MemoryInfo {
            total_kib: 100,
            available_kib: 80,
        });
        assert_eq!(concurrency_width(16, relaxed), MAX_CONCURRENT_CUTS);
        assert_eq!(concurrency_width(6, pressured), 3);
        assert_eq!(concurrency_width(1, pressured), 1);
        assert_eq!(concurrency_width(0, None), 1);
    }

    #[test]
    fn required_space_adds_ten_percent() {
        assert_eq!(estimate_required_space(1_000), 1_100);
        assert_eq!(estimate_required_space(u64::MAX), u64::MAX);
    }

    #[test]
    fn ancestor_walks_up_to_existing_dir() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let missing = temp.path().join("a").join("b");
        assert_eq!(nearest_existing_ancestor(&missing), temp.path());
        assert!(available_space(&missing)? > 0);
        Ok(())
    }
}
