use log::debug;

/// Which perf features the running kernel offers. Populated once at
/// startup by probing the kernel, then passed by value into the group
/// configurer; nothing mutates it afterwards.
#[derive(Copy, Clone, Debug)]
pub struct PerfCapabilities {
    /// Counting the whole system rather than one process tree.
    pub is_system_wide: bool,
    pub has_sample_identifier: bool,
    pub has_attr_clockid_support: bool,
    pub has_attr_comm_exec: bool,
    pub has_attr_context_switch: bool,
    pub has_count_sw_dummy: bool,
    pub has_exclude_callchain_kernel: bool,
    pub can_access_tracepoints: bool,
    pub use_64bit_register_set: bool,
    pub supports_register_unwinding: bool,
    /// Kernel-mode samples must be filtered out (paranoid setting or an
    /// explicit request).
    pub exclude_kernel: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct KernelVersion {
    major: u32,
    minor: u32,
}

impl KernelVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parse a release string such as `5.15.0-101-generic`.
    pub fn parse(release: &str) -> Option<Self> {
        let mut parts = release.split(|c: char| !c.is_ascii_digit());
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;

        Some(Self { major, minor })
    }
}

impl PerfCapabilities {
    pub fn detect(is_system_wide: bool) -> Self {
        let release = std::fs::read_to_string("/proc/sys/kernel/osrelease").unwrap_or_default();
        let version = KernelVersion::parse(release.trim()).unwrap_or(KernelVersion::new(0, 0));

        // missing or unreadable counts as the most restrictive setting
        let paranoid = std::fs::read_to_string("/proc/sys/kernel/perf_event_paranoid")
            .ok()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .unwrap_or(2);

        let is_root = unsafe { libc::geteuid() } == 0;

        let caps = Self::from_probes(is_system_wide, version, paranoid, is_root);
        debug!("kernel {}.{} perf capabilities: {caps:?}", version.major, version.minor);
        caps
    }

    fn from_probes(
        is_system_wide: bool,
        version: KernelVersion,
        paranoid: i64,
        is_root: bool,
    ) -> Self {
        Self {
            is_system_wide,
            has_sample_identifier: version >= KernelVersion::new(3, 12),
            has_count_sw_dummy: version >= KernelVersion::new(3, 12),
            has_attr_comm_exec: version >= KernelVersion::new(3, 16),
            has_attr_clockid_support: version >= KernelVersion::new(4, 1),
            has_attr_context_switch: version >= KernelVersion::new(4, 3),
            has_exclude_callchain_kernel: version >= KernelVersion::new(3, 7),
            can_access_tracepoints: is_root || paranoid <= -1,
            exclude_kernel: !is_root && paranoid >= 2,
            use_64bit_register_set: cfg!(target_pointer_width = "64"),
            supports_register_unwinding: cfg!(any(
                target_arch = "aarch64",
                target_arch = "arm",
                target_arch = "x86_64"
            )),
        }
    }
}

/// The id of the `sched/sched_switch` tracepoint, if tracefs is mounted
/// and readable.
pub fn sched_switch_tracepoint_id() -> Option<u64> {
    const CANDIDATES: &[&str] = &[
        "/sys/kernel/tracing/events/sched/sched_switch/id",
        "/sys/kernel/debug/tracing/events/sched/sched_switch/id",
    ];

    for path in CANDIDATES {
        if let Ok(raw) = std::fs::read_to_string(path) {
            if let Ok(id) = raw.trim().parse() {
                return Some(id);
            }
        }
    }

    debug!("unable to read sched_switch id");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_parsing() {
        assert_eq!(
            KernelVersion::parse("5.15.0-101-generic"),
            Some(KernelVersion::new(5, 15))
        );
        assert_eq!(KernelVersion::parse("4.4.38+"), Some(KernelVersion::new(4, 4)));
        assert_eq!(KernelVersion::parse("6.8"), Some(KernelVersion::new(6, 8)));
        assert_eq!(KernelVersion::parse("junk"), None);
    }

    #[test]
    fn version_ordering() {
        assert!(KernelVersion::new(4, 3) > KernelVersion::new(3, 12));
        assert!(KernelVersion::new(3, 12) > KernelVersion::new(3, 7));
        assert!(KernelVersion::new(4, 1) < KernelVersion::new(4, 3));
    }

    #[test]
    fn feature_thresholds() {
        let old = PerfCapabilities::from_probes(true, KernelVersion::new(3, 4), 2, true);
        assert!(!old.has_sample_identifier);
        assert!(!old.has_attr_context_switch);
        assert!(!old.has_count_sw_dummy);
        assert!(!old.has_exclude_callchain_kernel);

        let modern = PerfCapabilities::from_probes(true, KernelVersion::new(5, 15), 2, true);
        assert!(modern.has_sample_identifier);
        assert!(modern.has_attr_clockid_support);
        assert!(modern.has_attr_comm_exec);
        assert!(modern.has_attr_context_switch);
        assert!(modern.has_count_sw_dummy);
        assert!(modern.has_exclude_callchain_kernel);
    }

    #[test]
    fn paranoid_gating() {
        let unprivileged = PerfCapabilities::from_probes(true, KernelVersion::new(5, 15), 2, false);
        assert!(unprivileged.exclude_kernel);
        assert!(!unprivileged.can_access_tracepoints);

        let root = PerfCapabilities::from_probes(true, KernelVersion::new(5, 15), 2, true);
        assert!(!root.exclude_kernel);
        assert!(root.can_access_tracepoints);

        let relaxed = PerfCapabilities::from_probes(true, KernelVersion::new(5, 15), -1, false);
        assert!(!relaxed.exclude_kernel);
        assert!(relaxed.can_access_tracepoints);
    }
}
