pub mod attrs_buffer;
pub mod capability;
pub mod groups;
pub mod keys;
pub mod sys;

pub use attrs_buffer::AttrsBuffer;
pub use capability::{sched_switch_tracepoint_id, PerfCapabilities};
pub use groups::{
    calculate_aux_watermark, ConfigureError, CpuFanOut, EventGroups, EventRequest,
    GroupIdentifier, GroupsConfig, PerfEvent, RingBufferConfig,
};
pub use keys::{AttrKeyTracker, KeyMappings};
pub use sys::{AttrFlags, PerfEventAttr, ReadFormat, SampleFormat};
