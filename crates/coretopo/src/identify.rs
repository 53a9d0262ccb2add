use std::io;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;

use log::debug;

use crate::util::{read_cpu_list, read_hex_u64, read_usize};

/// What one core reports about itself. All fields are best-effort: an
/// offline core, or one without the identification registers exposed,
/// simply leaves them empty.
#[derive(Clone, Debug, Default)]
pub struct CoreProperties {
    pub midr: Option<u64>,
    pub package_id: Option<u32>,
    pub core_siblings: Vec<usize>,
}

/// A worker pinned to one logical cpu. Spawning it forces the cpu online;
/// after delivering its [`CoreProperties`] the thread blocks so the cpu
/// stays online until the worker is dropped.
pub struct CoreWorker {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CoreWorker {
    pub fn spawn<F>(cpu: usize, deliver: F) -> io::Result<Self>
    where
        F: FnOnce(usize, CoreProperties) + Send + 'static,
    {
        let (shutdown, wait) = mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name(format!("coreid{cpu}"))
            .spawn(move || {
                if let Err(e) = pin_to(cpu) {
                    debug!("could not pin identification thread to cpu{cpu}: {e}");
                }

                deliver(cpu, Self::detect(cpu));

                // hold the cpu online until the collector has finished with
                // /proc/cpuinfo; the sender side hanging up releases us
                let _ = wait.recv();
            })?;

        Ok(Self {
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    /// Synchronous probe for the offline-tolerant path. Reads whatever the
    /// kernel exposes for `cpu` without forcing it online.
    pub fn detect(cpu: usize) -> CoreProperties {
        let midr = read_hex_u64(format!(
            "/sys/devices/system/cpu/cpu{cpu}/regs/identification/midr_el1"
        ))
        .ok();
        let package_id = read_usize(format!(
            "/sys/devices/system/cpu/cpu{cpu}/topology/physical_package_id"
        ))
        .ok()
        .map(|v| v as u32);
        let core_siblings = read_cpu_list(format!(
            "/sys/devices/system/cpu/cpu{cpu}/topology/core_siblings_list"
        ))
        .unwrap_or_default();

        CoreProperties {
            midr,
            package_id,
            core_siblings,
        }
    }
}

impl Drop for CoreWorker {
    fn drop(&mut self) {
        drop(self.shutdown.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn pin_to(cpu: usize) -> io::Result<()> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);

        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn worker_delivers_then_blocks_until_dropped() {
        let (tx, rx) = mpsc::channel();

        let worker = CoreWorker::spawn(0, move |cpu, properties| {
            tx.send((cpu, properties)).unwrap();
        })
        .unwrap();

        let (cpu, _properties) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(cpu, 0);

        // dropping joins the thread; this must not hang
        drop(worker);
    }

    #[test]
    fn detect_is_infallible() {
        // cpu numbers far beyond the machine produce empty properties
        let properties = CoreWorker::detect(4096);
        assert!(properties.midr.is_none());
        assert!(properties.package_id.is_none());
        assert!(properties.core_siblings.is_empty());
    }
}
