//! Arranges counters into perf event groups: one leader/follower sequence
//! per group kind, with pinning, inheritance, read-format, sampling,
//! exclusion, and aux watermark policy applied to every attribute record.
//! The configurer only builds the records; opening them is the caller's
//! job.

use std::collections::BTreeMap;

use log::{debug, error};

use coretopo::CpuTopology;

use super::capability::PerfCapabilities;
use super::keys::AttrKeyTracker;
use super::sys::*;

const NANOS_PER_SECOND: u64 = 1_000_000_000;
const NANOS_PER_100_MS: u64 = 100_000_000;

const MAX_AUX_WATERMARK: u64 = 2048 * 1024;
const MIN_AUX_WATERMARK: u64 = 4096;

/// Size the aux ring wake threshold from the mmap size and the sample
/// period so the ring is drained roughly ten times a second, without
/// letting a large buffer and a high rate push the threshold past what
/// the host side can digest in one go.
pub fn calculate_aux_watermark(mmap_size: usize, period: u64) -> u32 {
    const FRACTION_OF_SECOND: u64 = 10;

    let frequency = (NANOS_PER_SECOND / period.max(1)).max(1);
    let bytes_per_second = 24 * frequency; // assume an average of 24 bytes per sample

    // ~1/10s of data, or half the buffer, whichever is less
    let preferred = (mmap_size as u64 / 2).min(bytes_per_second / FRACTION_OF_SECOND);

    preferred.clamp(MIN_AUX_WATERMARK, MAX_AUX_WATERMARK) as u32
}

/// Whether `exclude_kernel` (and friends) should be set for this event.
/// The software context-switch counter is exempt: it only counts, and
/// filtering it would lose the switch records entirely.
fn should_exclude_kernel(type_: u32, config: u64, exclude_requested: bool) -> bool {
    if !exclude_requested {
        return false;
    }

    if type_ == PERF_TYPE_SOFTWARE {
        return config != PERF_COUNT_SW_CONTEXT_SWITCHES;
    }

    true
}

/// Logical description of one counter before kernel policy is applied.
#[derive(Copy, Clone, Debug, Default)]
pub struct EventRequest {
    pub type_: u32,
    pub config: u64,
    pub config1: u64,
    pub config2: u64,
    pub period_or_freq: u64,
    pub sample_type: SampleFormat,
    pub mmap: bool,
    pub comm: bool,
    pub freq: bool,
    pub task: bool,
    pub context_switch: bool,
}

/// One fully-populated event: the attribute record and the key the caller
/// will find its data under.
#[derive(Copy, Clone, Debug)]
pub struct PerfEvent {
    pub attr: PerfEventAttr,
    pub key: i32,
}

/// Identifies one event group and dictates whether it takes a constructed
/// leader and how its events fan out across cpus.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum GroupIdentifier {
    /// One group per cpu cluster, replicated onto each member cpu.
    PerClusterCpu(u32),
    /// A non-cpu pmu such as a memory controller or interconnect.
    UncorePmu { pmu: String, instance: Option<u32> },
    /// Events tied to one specific cpu.
    SpecificCpu(usize),
    /// Standalone events replicated across every cpu.
    Global,
    /// Statistical profiling on one cpu, producing aux data.
    Spe(usize),
}

/// How the open caller replicates a group's events across cpus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CpuFanOut {
    EveryCpu,
    FirstOnline,
    Cpus(Vec<usize>),
}

impl GroupIdentifier {
    /// Group kinds whose events are read as one unit need a real
    /// perf_event_open group, and so a leader.
    pub fn requires_leader(&self) -> bool {
        matches!(
            self,
            GroupIdentifier::PerClusterCpu(_) | GroupIdentifier::UncorePmu { .. }
        )
    }

    pub fn target_cpus(&self, topology: &CpuTopology) -> CpuFanOut {
        match self {
            GroupIdentifier::PerClusterCpu(cluster) => {
                CpuFanOut::Cpus(topology.cpus_in_cluster(*cluster))
            }
            GroupIdentifier::UncorePmu { .. } => CpuFanOut::FirstOnline,
            GroupIdentifier::SpecificCpu(cpu) | GroupIdentifier::Spe(cpu) => {
                CpuFanOut::Cpus(vec![*cpu])
            }
            GroupIdentifier::Global => CpuFanOut::EveryCpu,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct RingBufferConfig {
    pub data_buffer_size: usize,
    pub aux_buffer_size: usize,
}

/// Everything the configurer needs to decide event policy, fixed for the
/// lifetime of the capture apart from the dummy key counter.
#[derive(Clone, Debug)]
pub struct GroupsConfig {
    pub caps: PerfCapabilities,
    pub ring: RingBufferConfig,
    pub exclude_kernel_events: bool,
    pub backtrace_depth: u32,
    /// Samples per second; zero disables periodic sampling.
    pub sample_rate: u64,
    pub enable_periodic_sampling: bool,
    pub sched_switch_id: Option<u64>,
    pub sched_switch_key: i32,
    /// Negative and strictly decreasing, so synthetic keys never collide
    /// with the caller's non-negative ones.
    pub dummy_key_counter: i32,
}

impl GroupsConfig {
    fn next_dummy_key(&mut self) -> i32 {
        let key = self.dummy_key_counter;
        self.dummy_key_counter -= 1;
        key
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigureError {
    #[error("statistical profiling requires context switch information")]
    SpeNeedsContextSwitch,
    #[error("sched_switch tracepoint id is not known")]
    UnknownSchedSwitchId,
    #[error("a group leader may only be added to an empty group")]
    LeaderNotFirst,
    #[error("group event limit reached")]
    TooManyEvents,
    #[error("group kind does not take a constructed leader")]
    LeaderNotApplicable,
}

/// Owns every event group being configured. Groups are created lazily the
/// first time an event is added under their identifier; within a group,
/// caller ordering is preserved and the leader is always first.
pub struct EventGroups {
    config: GroupsConfig,
    groups: BTreeMap<GroupIdentifier, Vec<PerfEvent>>,
}

impl EventGroups {
    pub fn new(config: GroupsConfig) -> Self {
        Self {
            config,
            groups: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &GroupsConfig {
        &self.config
    }

    pub fn group(&self, identifier: &GroupIdentifier) -> &[PerfEvent] {
        self.groups.get(identifier).map_or(&[], Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GroupIdentifier, &[PerfEvent])> {
        self.groups.iter().map(|(id, events)| (id, events.as_slice()))
    }

    pub fn event_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// Append one event to `identifier`'s group and populate its
    /// attribute record. A failed event is not retained.
    pub fn add_event(
        &mut self,
        identifier: &GroupIdentifier,
        leader: bool,
        tracker: &mut dyn AttrKeyTracker,
        key: i32,
        request: &EventRequest,
        has_aux_data: bool,
    ) -> Result<(), ConfigureError> {
        self.add_event_inner(identifier, false, leader, tracker, key, request, has_aux_data)
    }

    /// Append a standalone header event (process-context tracking such as
    /// mmap/comm records); header events are always their own group.
    pub fn add_header_event(
        &mut self,
        identifier: &GroupIdentifier,
        tracker: &mut dyn AttrKeyTracker,
        key: i32,
        request: &EventRequest,
    ) -> Result<(), ConfigureError> {
        self.add_event_inner(identifier, true, false, tracker, key, request, false)
    }

    fn add_event_inner(
        &mut self,
        identifier: &GroupIdentifier,
        is_header: bool,
        leader: bool,
        tracker: &mut dyn AttrKeyTracker,
        key: i32,
        request: &EventRequest,
        has_aux_data: bool,
    ) -> Result<(), ConfigureError> {
        let events = self.groups.entry(identifier.clone()).or_default();

        if leader && !events.is_empty() {
            error!("cannot set leader for non-empty group {identifier:?}");
            return Err(ConfigureError::LeaderNotFirst);
        }
        if events.len() >= i32::MAX as usize {
            return Err(ConfigureError::TooManyEvents);
        }

        let event = init_event(
            &self.config,
            is_header,
            identifier.requires_leader(),
            identifier,
            leader,
            tracker,
            key,
            request,
            has_aux_data,
        );

        match event {
            Ok(event) => {
                events.push(event);
                Ok(())
            }
            Err(e) => {
                // no partial group is retained
                if events.is_empty() {
                    self.groups.remove(identifier);
                }
                Err(e)
            }
        }
    }

    /// Construct the leader event for group kinds that take one.
    pub fn create_group_leader(
        &mut self,
        identifier: &GroupIdentifier,
        tracker: &mut dyn AttrKeyTracker,
    ) -> Result<(), ConfigureError> {
        match identifier {
            GroupIdentifier::PerClusterCpu(_) => self.create_cpu_group_leader(identifier, tracker),
            GroupIdentifier::UncorePmu { .. } => {
                self.create_uncore_group_leader(identifier, tracker)
            }
            GroupIdentifier::SpecificCpu(_) | GroupIdentifier::Global | GroupIdentifier::Spe(_) => {
                error!("group kind {identifier:?} does not take a constructed leader");
                Err(ConfigureError::LeaderNotApplicable)
            }
        }
    }

    /// Pick the leader for a per-cluster cpu group. The leader's job is to
    /// drive context-switch attribution, so the choice walks down the
    /// capability tiers: the sched_switch tracepoint, a software dummy
    /// with switch records, a sampling cpu-clock with switch records, the
    /// software switch counter, and finally a bare sampling cpu-clock.
    fn create_cpu_group_leader(
        &mut self,
        identifier: &GroupIdentifier,
        tracker: &mut dyn AttrKeyTracker,
    ) -> Result<(), ConfigureError> {
        let caps = self.config.caps;
        let enable_call_chain = self.config.backtrace_depth > 0;
        let call_chain = if enable_call_chain {
            SampleFormat::CALLCHAIN
        } else {
            SampleFormat::empty()
        };
        let sample_period = if self.config.sample_rate > 0 && self.config.enable_periodic_sampling {
            NANOS_PER_SECOND / self.config.sample_rate
        } else {
            0
        };

        let mut request = EventRequest {
            sample_type: SampleFormat::TID | SampleFormat::READ,
            mmap: true,
            comm: true,
            task: true,
            ..Default::default()
        };
        let mut enable_task_clock = false;

        // sched_switch only fires on switch-out when tracing a single
        // application, so the tracepoint path is reserved for system-wide
        // capture
        if caps.can_access_tracepoints && caps.is_system_wide {
            let Some(id) = self.config.sched_switch_id else {
                debug!("unable to read sched_switch id");
                return Err(ConfigureError::UnknownSchedSwitchId);
            };
            request.type_ = PERF_TYPE_TRACEPOINT;
            request.config = id;
            request.period_or_freq = 1;
            request.sample_type |= SampleFormat::RAW;
        } else {
            request.type_ = PERF_TYPE_SOFTWARE;

            if caps.has_attr_context_switch {
                request.context_switch = true;

                if caps.has_count_sw_dummy {
                    request.config = PERF_COUNT_SW_DUMMY;
                    request.period_or_freq = 0;
                } else {
                    request.config = PERF_COUNT_SW_CPU_CLOCK;
                    request.period_or_freq = sample_period;
                    request.sample_type |=
                        SampleFormat::TID | SampleFormat::IP | SampleFormat::READ | call_chain;
                }
            } else if !caps.exclude_kernel {
                // the software switch counter reports switch-out only; a
                // fast task clock below approximates the switch-in side
                request.config = PERF_COUNT_SW_CONTEXT_SWITCHES;
                request.period_or_freq = 1;
                request.sample_type |= SampleFormat::TID;
                enable_task_clock = true;
            } else {
                // no context switch information at all
                request.config = PERF_COUNT_SW_CPU_CLOCK;
                request.period_or_freq = sample_period;
                request.sample_type |=
                    SampleFormat::TID | SampleFormat::IP | SampleFormat::READ | call_chain;
            }
        }

        let leader_config = request.config;
        self.add_event(
            identifier,
            true,
            tracker,
            self.config.sched_switch_key,
            &request,
            false,
        )?;

        // periodic pc sampling rides along unless the leader is already a
        // cpu-clock sampler
        if leader_config != PERF_COUNT_SW_CPU_CLOCK
            && self.config.sample_rate > 0
            && self.config.enable_periodic_sampling
        {
            let pc_request = EventRequest {
                type_: PERF_TYPE_SOFTWARE,
                config: PERF_COUNT_SW_CPU_CLOCK,
                period_or_freq: NANOS_PER_SECOND / self.config.sample_rate,
                sample_type: SampleFormat::TID
                    | SampleFormat::IP
                    | SampleFormat::READ
                    | call_chain,
                ..Default::default()
            };
            let key = self.config.next_dummy_key();
            self.add_event(identifier, false, tracker, key, &pc_request, false)?;
        }

        if enable_task_clock {
            let task_clock_request = EventRequest {
                type_: PERF_TYPE_SOFTWARE,
                config: PERF_COUNT_SW_TASK_CLOCK,
                period_or_freq: 100_000, // 100us
                sample_type: SampleFormat::TID,
                ..Default::default()
            };
            let key = self.config.next_dummy_key();
            self.add_event(identifier, false, tracker, key, &task_clock_request, false)?;
        }

        Ok(())
    }

    fn create_uncore_group_leader(
        &mut self,
        identifier: &GroupIdentifier,
        tracker: &mut dyn AttrKeyTracker,
    ) -> Result<(), ConfigureError> {
        let request = EventRequest {
            type_: PERF_TYPE_SOFTWARE,
            config: PERF_COUNT_SW_CPU_CLOCK,
            sample_type: SampleFormat::READ,
            // without a configured rate, non-cpu pmus are read every 100ms
            // so they are sampled at all
            period_or_freq: if self.config.sample_rate > 0 {
                NANOS_PER_SECOND / self.config.sample_rate
            } else {
                NANOS_PER_100_MS
            },
            ..Default::default()
        };

        let key = self.config.next_dummy_key();
        self.add_event(identifier, true, tracker, key, &request, false)
    }
}

/// Populate one attribute record from the logical request and the group
/// policy, then report the key mapping.
#[allow(clippy::too_many_arguments)]
fn init_event(
    config: &GroupsConfig,
    is_header: bool,
    requires_leader: bool,
    identifier: &GroupIdentifier,
    leader: bool,
    tracker: &mut dyn AttrKeyTracker,
    key: i32,
    request: &EventRequest,
    has_aux_data: bool,
) -> Result<PerfEvent, ConfigureError> {
    let caps = &config.caps;

    let mut attr = PerfEventAttr::default();

    // PERF_SAMPLE_READ is not allowed together with inherit, and inherit
    // is always set outside system-wide mode
    let sample_read_mask = if caps.is_system_wide {
        SampleFormat::empty()
    } else {
        SampleFormat::READ
    };

    let mut sample_type = SampleFormat::TIME
        | (request.sample_type - sample_read_mask)
        // the fields required to read back the event id
        | if caps.has_sample_identifier {
            SampleFormat::IDENTIFIER
        } else {
            SampleFormat::TID | SampleFormat::IP | SampleFormat::ID
        }
        | if request.type_ == PERF_TYPE_TRACEPOINT {
            SampleFormat::PERIOD
        } else {
            SampleFormat::empty()
        }
        // TID attributes counter values to processes outside system-wide
        // mode, and frames switch records when they are captured
        | if caps.is_system_wide && !request.context_switch {
            SampleFormat::empty()
        } else {
            SampleFormat::TID
        }
        // frequency-based events must sample PERIOD to recover the actual
        // period value
        | if request.freq {
            SampleFormat::PERIOD
        } else {
            SampleFormat::empty()
        };

    // user-mode registers ride along with the call chain
    if caps.supports_register_unwinding && sample_type.contains(SampleFormat::CALLCHAIN) {
        sample_type |= SampleFormat::REGS_USER;
        attr.sample_regs_user = if caps.use_64bit_register_set {
            // x0-x30, sp, pc
            0x1_ffff_ffff
        } else {
            // r0-r15
            0xffff
        };
    }

    let use_inherit = !(caps.is_system_wide || is_header);
    // stand-alone events are their own leader
    let every_attribute_in_own_group = use_inherit || !requires_leader || is_header;
    // PERF_FORMAT_GROUP is not allowed with inherit either
    let use_read_format_group = leader && !use_inherit && !every_attribute_in_own_group && !is_header;

    let exclude_kernel =
        should_exclude_kernel(request.type_, request.config, config.exclude_kernel_events);

    let pinned = leader || every_attribute_in_own_group || is_header;

    let mut context_switch = request.context_switch;

    // SPE data has no reliable stream boundaries between processes sampled
    // by the same attribute, so switch records are mandatory
    if matches!(identifier, GroupIdentifier::Spe(_)) {
        if !caps.has_attr_context_switch {
            error!("statistical profiling requires context switch information");
            return Err(ConfigureError::SpeNeedsContextSwitch);
        }
        context_switch = true;
    }

    let mut flags = AttrFlags::empty();
    flags.set(AttrFlags::INHERIT, use_inherit);
    flags.set(AttrFlags::INHERIT_STAT, use_inherit);
    flags.set(AttrFlags::PINNED, pinned);
    // the leader starts disabled and gates the whole group; followers
    // start enabled behind it
    flags.set(AttrFlags::DISABLED, pinned);
    flags.set(AttrFlags::WATERMARK, true);
    flags.set(AttrFlags::USE_CLOCKID, caps.has_attr_clockid_support);
    flags.set(AttrFlags::MMAP, request.mmap);
    flags.set(AttrFlags::COMM, request.comm);
    flags.set(AttrFlags::COMM_EXEC, request.comm && caps.has_attr_comm_exec);
    flags.set(AttrFlags::FREQ, request.freq);
    flags.set(AttrFlags::TASK, request.task);
    flags.set(AttrFlags::SAMPLE_ID_ALL, true);
    flags.set(AttrFlags::CONTEXT_SWITCH, context_switch);
    flags.set(AttrFlags::EXCLUDE_KERNEL, exclude_kernel);
    flags.set(AttrFlags::EXCLUDE_HV, exclude_kernel);
    flags.set(AttrFlags::EXCLUDE_IDLE, exclude_kernel);
    flags.set(
        AttrFlags::EXCLUDE_CALLCHAIN_KERNEL,
        config.exclude_kernel_events && caps.has_exclude_callchain_kernel,
    );

    attr.type_ = request.type_;
    attr.config = request.config;
    attr.config1 = request.config1;
    attr.config2 = request.config2;
    attr.sample_period_or_freq = request.period_or_freq;
    attr.sample_type = sample_type.bits();
    attr.read_format = if use_read_format_group {
        ReadFormat::ID | ReadFormat::GROUP
    } else {
        ReadFormat::ID
    }
    .bits();
    attr.flags = flags.bits();
    attr.wakeup_events_or_watermark = (config.ring.data_buffer_size / 2) as u32;
    attr.clockid = if caps.has_attr_clockid_support {
        libc::CLOCK_MONOTONIC_RAW
    } else {
        0
    };
    attr.aux_watermark = if has_aux_data {
        calculate_aux_watermark(config.ring.aux_buffer_size, attr.sample_period_or_freq)
    } else {
        0
    };

    let event = PerfEvent { attr, key };
    tracker.track(key, &event.attr);

    Ok(event)
}
