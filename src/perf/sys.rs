//! The kernel perf ABI: the `perf_event_attr` record layout and the
//! constants that populate it. The record is handed verbatim to
//! `perf_event_open` by the caller and written as raw bytes into the
//! attributes stream, so the layout must match the kernel bit for bit.

use bitflags::bitflags;

pub const PERF_TYPE_HARDWARE: u32 = 0;
pub const PERF_TYPE_SOFTWARE: u32 = 1;
pub const PERF_TYPE_TRACEPOINT: u32 = 2;
pub const PERF_TYPE_HW_CACHE: u32 = 3;
pub const PERF_TYPE_RAW: u32 = 4;
pub const PERF_TYPE_BREAKPOINT: u32 = 5;

pub const PERF_COUNT_SW_CPU_CLOCK: u64 = 0;
pub const PERF_COUNT_SW_TASK_CLOCK: u64 = 1;
pub const PERF_COUNT_SW_PAGE_FAULTS: u64 = 2;
pub const PERF_COUNT_SW_CONTEXT_SWITCHES: u64 = 3;
pub const PERF_COUNT_SW_CPU_MIGRATIONS: u64 = 4;
pub const PERF_COUNT_SW_DUMMY: u64 = 9;

/// `perf_event_attr::size` for the layout below (through `aux_watermark`
/// and `sample_max_stack`).
pub const PERF_ATTR_SIZE_VER5: u32 = 112;

bitflags! {
    /// `perf_event_attr::sample_type`
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
    pub struct SampleFormat: u64 {
        const IP = 1 << 0;
        const TID = 1 << 1;
        const TIME = 1 << 2;
        const ADDR = 1 << 3;
        const READ = 1 << 4;
        const CALLCHAIN = 1 << 5;
        const ID = 1 << 6;
        const CPU = 1 << 7;
        const PERIOD = 1 << 8;
        const STREAM_ID = 1 << 9;
        const RAW = 1 << 10;
        const BRANCH_STACK = 1 << 11;
        const REGS_USER = 1 << 12;
        const STACK_USER = 1 << 13;
        const WEIGHT = 1 << 14;
        const DATA_SRC = 1 << 15;
        const IDENTIFIER = 1 << 16;
        const TRANSACTION = 1 << 17;
        const REGS_INTR = 1 << 18;
        const PHYS_ADDR = 1 << 19;
    }
}

bitflags! {
    /// `perf_event_attr::read_format`
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
    pub struct ReadFormat: u64 {
        const TOTAL_TIME_ENABLED = 1 << 0;
        const TOTAL_TIME_RUNNING = 1 << 1;
        const ID = 1 << 2;
        const GROUP = 1 << 3;
    }
}

bitflags! {
    /// The packed bitfield word of `perf_event_attr` (`disabled` through
    /// `context_switch` and beyond). Bit positions follow the kernel
    /// header; `precise_ip` occupies bits 15-16 and is never set here.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
    pub struct AttrFlags: u64 {
        const DISABLED = 1 << 0;
        const INHERIT = 1 << 1;
        const PINNED = 1 << 2;
        const EXCLUSIVE = 1 << 3;
        const EXCLUDE_USER = 1 << 4;
        const EXCLUDE_KERNEL = 1 << 5;
        const EXCLUDE_HV = 1 << 6;
        const EXCLUDE_IDLE = 1 << 7;
        const MMAP = 1 << 8;
        const COMM = 1 << 9;
        const FREQ = 1 << 10;
        const INHERIT_STAT = 1 << 11;
        const ENABLE_ON_EXEC = 1 << 12;
        const TASK = 1 << 13;
        const WATERMARK = 1 << 14;
        const MMAP_DATA = 1 << 17;
        const SAMPLE_ID_ALL = 1 << 18;
        const EXCLUDE_HOST = 1 << 19;
        const EXCLUDE_GUEST = 1 << 20;
        const EXCLUDE_CALLCHAIN_KERNEL = 1 << 21;
        const EXCLUDE_CALLCHAIN_USER = 1 << 22;
        const MMAP2 = 1 << 23;
        const COMM_EXEC = 1 << 24;
        const USE_CLOCKID = 1 << 25;
        const CONTEXT_SWITCH = 1 << 26;
        const WRITE_BACKWARD = 1 << 27;
        const NAMESPACES = 1 << 28;
    }
}

/// `struct perf_event_attr`, fixed at the VER5 length.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct PerfEventAttr {
    pub type_: u32,
    pub size: u32,
    pub config: u64,
    pub sample_period_or_freq: u64,
    pub sample_type: u64,
    pub read_format: u64,
    pub flags: u64,
    pub wakeup_events_or_watermark: u32,
    pub bp_type: u32,
    pub config1: u64,
    pub config2: u64,
    pub branch_sample_type: u64,
    pub sample_regs_user: u64,
    pub sample_stack_user: u32,
    pub clockid: i32,
    pub sample_regs_intr: u64,
    pub aux_watermark: u32,
    pub sample_max_stack: u16,
    pub reserved_2: u16,
}

impl Default for PerfEventAttr {
    fn default() -> Self {
        let mut attr: PerfEventAttr = unsafe { std::mem::zeroed() };
        attr.size = std::mem::size_of::<PerfEventAttr>() as u32;
        attr
    }
}

impl PerfEventAttr {
    pub fn sample_format(&self) -> SampleFormat {
        SampleFormat::from_bits_truncate(self.sample_type)
    }

    pub fn read_format(&self) -> ReadFormat {
        ReadFormat::from_bits_truncate(self.read_format)
    }

    pub fn attr_flags(&self) -> AttrFlags {
        AttrFlags::from_bits_truncate(self.flags)
    }

    pub fn has_flag(&self, flag: AttrFlags) -> bool {
        self.attr_flags().contains(flag)
    }

    /// The record exactly as the kernel and the attributes stream see it.
    pub fn as_bytes(&self) -> &[u8] {
        debug_assert_eq!(self.size as usize, std::mem::size_of::<PerfEventAttr>());

        unsafe {
            std::slice::from_raw_parts(
                self as *const PerfEventAttr as *const u8,
                std::mem::size_of::<PerfEventAttr>(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_ver5() {
        assert_eq!(std::mem::size_of::<PerfEventAttr>(), 112);
        assert_eq!(PerfEventAttr::default().size, PERF_ATTR_SIZE_VER5);
    }

    #[test]
    fn size_field_sits_after_type() {
        let attr = PerfEventAttr {
            type_: PERF_TYPE_TRACEPOINT,
            ..Default::default()
        };
        let bytes = attr.as_bytes();

        assert_eq!(bytes.len(), 112);
        assert_eq!(
            u32::from_ne_bytes(bytes[0..4].try_into().unwrap()),
            PERF_TYPE_TRACEPOINT
        );
        assert_eq!(
            u32::from_ne_bytes(bytes[4..8].try_into().unwrap()),
            PERF_ATTR_SIZE_VER5
        );
    }

    #[test]
    fn flag_bits_match_the_kernel_header() {
        assert_eq!(AttrFlags::DISABLED.bits(), 1);
        assert_eq!(AttrFlags::WATERMARK.bits(), 1 << 14);
        assert_eq!(AttrFlags::SAMPLE_ID_ALL.bits(), 1 << 18);
        assert_eq!(AttrFlags::USE_CLOCKID.bits(), 1 << 25);
        assert_eq!(AttrFlags::CONTEXT_SWITCH.bits(), 1 << 26);
        assert_eq!(SampleFormat::IDENTIFIER.bits(), 1 << 16);
        assert_eq!(ReadFormat::GROUP.bits(), 1 << 3);
    }
}
