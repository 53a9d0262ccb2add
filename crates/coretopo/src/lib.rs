//! Discover and identify every logical cpu on the target.
//!
//! Multi-cluster Arm systems mix core types, and the kernel only reports
//! identification registers for cores that are online. The collector here
//! momentarily forces every core online by pinning a thread to it, reads
//! each core's MIDR and cluster membership, and fuses the results with the
//! `/proc/cpuinfo` fallback into one dense identity vector.

#[macro_use]
extern crate serde;

mod cpuid;
mod cpuinfo;
mod enumerate;
mod error;
mod identify;
mod topology;
mod util;

pub use crate::cpuid::CpuId;
pub use crate::enumerate::max_core_count;
pub use crate::error::{Error, Result};
pub use crate::identify::{CoreProperties, CoreWorker};
pub use crate::topology::CpuTopology;

/// Read the [`CpuTopology`] for the current system.
///
/// With `coerce_online` set, every core is briefly forced online so its
/// identification registers can be read; otherwise offline cores are
/// skipped and filled in by cluster majority or the cpuinfo fallback.
pub fn identify(coerce_online: bool, want_hardware_name: bool) -> Result<CpuTopology> {
    let cores = max_core_count()?;
    let mut cpu_ids = vec![CpuId::UNKNOWN; cores];

    let (hardware_name, clusters) =
        topology::collect(coerce_online, want_hardware_name, &mut cpu_ids)?;

    Ok(CpuTopology {
        cpu_ids,
        clusters,
        hardware_name: if hardware_name.is_empty() {
            None
        } else {
            Some(hardware_name)
        },
    })
}
