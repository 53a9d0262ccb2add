use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use log::debug;

use crate::cpuid::CpuId;
use crate::cpuinfo::parse_cpuinfo;
use crate::identify::{CoreProperties, CoreWorker};
use crate::Result;

/// How long the collector waits for every identification thread to report
/// before proceeding with whatever was gathered.
const IDENTIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

/// The per-CPU identity vector, cluster membership, and hardware name for
/// the machine. `cpu_ids` and `clusters` are dense, indexed by logical cpu
/// number, and keep their length for the lifetime of the capture.
#[non_exhaustive]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CpuTopology {
    pub cpu_ids: Vec<CpuId>,
    pub clusters: Vec<Option<u32>>,
    pub hardware_name: Option<String>,
}

impl CpuTopology {
    pub fn new(
        cpu_ids: Vec<CpuId>,
        clusters: Vec<Option<u32>>,
        hardware_name: Option<String>,
    ) -> Self {
        Self {
            cpu_ids,
            clusters,
            hardware_name,
        }
    }

    pub fn cpu_count(&self) -> usize {
        self.cpu_ids.len()
    }

    pub fn cpus_in_cluster(&self, cluster: u32) -> Vec<usize> {
        self.clusters
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == Some(cluster))
            .map(|(cpu, _)| cpu)
            .collect()
    }

    pub fn cluster_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.clusters.iter().flatten().copied().collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

#[derive(Default)]
struct Collected {
    properties: BTreeMap<usize, CoreProperties>,
    delivered: usize,
}

/// Identify every logical cpu, filling `cpu_ids` in place, and return the
/// hardware name and per-cpu cluster ids.
///
/// With `coerce_online` set, one worker thread is spawned per cpu; each
/// pins itself to its cpu (forcing it online), reports its properties, and
/// then parks so the cpu stays online while `/proc/cpuinfo` is read. The
/// collector waits up to ten seconds for all workers; a timeout is logged
/// and the capture proceeds with the cores that did report. Cores that
/// never reported may still be offline when events are later opened on
/// them; those opens fail softly and are skipped.
///
/// Without `coerce_online`, each cpu is probed synchronously and offline
/// cpus simply yield empty properties.
pub(crate) fn collect(
    coerce_online: bool,
    want_hardware_name: bool,
    cpu_ids: &mut [CpuId],
) -> Result<(String, Vec<Option<u32>>)> {
    let mut cpu_to_cluster: BTreeMap<usize, u32> = BTreeMap::new();
    let mut cluster_identities: BTreeMap<u32, BTreeSet<CpuId>> = BTreeMap::new();
    let mut cpu_identities: BTreeMap<usize, CpuId> = BTreeMap::new();

    let state = Arc::new((Mutex::new(Collected::default()), Condvar::new()));

    // the workers must outlive the cpuinfo read below; they are joined when
    // this vector drops at the end of the function
    let mut workers = Vec::new();

    if coerce_online {
        for cpu in 0..cpu_ids.len() {
            let state = state.clone();

            match CoreWorker::spawn(cpu, move |c, properties| {
                let (lock, condvar) = &*state;
                let mut collected = lock.lock().unwrap();

                collected.properties.insert(c, properties);
                collected.delivered += 1;
                condvar.notify_one();
            }) {
                Ok(worker) => workers.push(worker),
                Err(e) => debug!("failed to spawn identification thread for cpu{cpu}: {e}"),
            }
        }

        let expected = workers.len();
        let (lock, condvar) = &*state;
        let guard = lock.lock().unwrap();
        let (guard, timeout) = condvar
            .wait_timeout_while(guard, IDENTIFICATION_TIMEOUT, |collected| {
                collected.delivered < expected
            })
            .unwrap();

        if timeout.timed_out() {
            debug!(
                "could not identify all cpu cores within the timeout period; activated {} of {}",
                guard.delivered,
                cpu_ids.len()
            );
        }
    } else {
        let (lock, _) = &*state;
        let mut collected = lock.lock().unwrap();

        for cpu in 0..cpu_ids.len() {
            collected.properties.insert(cpu, CoreWorker::detect(cpu));
        }
    }

    {
        let (lock, _) = &*state;
        let collected = lock.lock().unwrap();

        for (&cpu, properties) in &collected.properties {
            let identity = properties.midr.map(CpuId::from_midr);

            if let Some(cluster) = properties.package_id {
                cpu_to_cluster.insert(cpu, cluster);

                if let Some(id) = identity {
                    cluster_identities.entry(cluster).or_default().insert(id);
                }

                // siblings inherit the cluster unless they reported their own
                for &sibling in &properties.core_siblings {
                    cpu_to_cluster.entry(sibling).or_insert(cluster);
                }
            }

            if let Some(id) = identity {
                cpu_identities.insert(cpu, id);
            }
        }
    }

    for (cpu, id) in &cpu_identities {
        debug!("read cpu {cpu} identity from midr -> {id}");
    }
    for (cpu, cluster) in &cpu_to_cluster {
        debug!("read cpu {cpu} cluster {cluster}");
    }

    let know_all_identities = cpu_identities.len() == cpu_ids.len();

    let hardware_name = if want_hardware_name || !know_all_identities {
        parse_cpuinfo(know_all_identities, cpu_ids)?
    } else {
        String::new()
    };

    // register-derived identities override anything parsed from cpuinfo
    synthesise(cpu_ids, &cpu_identities, &cpu_to_cluster, &cluster_identities);

    let clusters = (0..cpu_ids.len())
        .map(|cpu| cpu_to_cluster.get(&cpu).copied())
        .collect();

    drop(workers);

    Ok((hardware_name, clusters))
}

/// Fuse the collected maps into the identity vector: identities read from
/// the cores win outright; a core with a known cluster but no identity
/// takes the cluster's identity when exactly one was observed there.
fn synthesise(
    cpu_ids: &mut [CpuId],
    cpu_identities: &BTreeMap<usize, CpuId>,
    cpu_to_cluster: &BTreeMap<usize, u32>,
    cluster_identities: &BTreeMap<u32, BTreeSet<CpuId>>,
) {
    for (&cpu, &id) in cpu_identities {
        if cpu < cpu_ids.len() {
            cpu_ids[cpu] = id;
        }
    }

    for (&cpu, cluster) in cpu_to_cluster {
        if cpu >= cpu_ids.len() || cpu_ids[cpu].is_known() {
            continue;
        }

        if let Some(identities) = cluster_identities.get(cluster) {
            if identities.len() == 1 {
                if let Some(&id) = identities.iter().next() {
                    debug!("assuming cpu {cpu} identity {id} from cluster {cluster}");
                    cpu_ids[cpu] = id;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unknown(count: usize) -> Vec<CpuId> {
        vec![CpuId::UNKNOWN; count]
    }

    #[test]
    fn register_identities_override_parsed_values() {
        let mut ids = unknown(2);
        ids[0] = CpuId::from_raw(0x12345);

        let identities = BTreeMap::from([(0, CpuId::from_raw(0x41d03))]);

        synthesise(&mut ids, &identities, &BTreeMap::new(), &BTreeMap::new());

        assert_eq!(ids[0], CpuId::from_raw(0x41d03));
        assert_eq!(ids[1], CpuId::UNKNOWN);
    }

    #[test]
    fn homogeneous_cluster_fills_unread_core() {
        let mut ids = unknown(4);

        let identities = BTreeMap::from([
            (0, CpuId::from_raw(0x41d03)),
            (2, CpuId::from_raw(0x41d09)),
            (3, CpuId::from_raw(0x41d09)),
        ]);
        let clusters = BTreeMap::from([(0, 0), (1, 0), (2, 1), (3, 1)]);
        let cluster_identities = BTreeMap::from([
            (0, BTreeSet::from([CpuId::from_raw(0x41d03)])),
            (1, BTreeSet::from([CpuId::from_raw(0x41d09)])),
        ]);

        synthesise(&mut ids, &identities, &clusters, &cluster_identities);

        assert_eq!(
            ids,
            vec![
                CpuId::from_raw(0x41d03),
                CpuId::from_raw(0x41d03),
                CpuId::from_raw(0x41d09),
                CpuId::from_raw(0x41d09),
            ]
        );
    }

    #[test]
    fn mixed_cluster_leaves_unread_core_unknown() {
        let mut ids = unknown(3);

        let identities = BTreeMap::from([
            (0, CpuId::from_raw(0x41d03)),
            (1, CpuId::from_raw(0x41d09)),
        ]);
        let clusters = BTreeMap::from([(0, 0), (1, 0), (2, 0)]);
        let cluster_identities = BTreeMap::from([(
            0,
            BTreeSet::from([CpuId::from_raw(0x41d03), CpuId::from_raw(0x41d09)]),
        )]);

        synthesise(&mut ids, &identities, &clusters, &cluster_identities);

        assert_eq!(ids[2], CpuId::UNKNOWN);
    }

    #[test]
    fn cluster_queries() {
        let topology = CpuTopology {
            cpu_ids: unknown(4),
            clusters: vec![Some(0), Some(0), Some(1), None],
            hardware_name: None,
        };

        assert_eq!(topology.cpus_in_cluster(0), vec![0, 1]);
        assert_eq!(topology.cpus_in_cluster(1), vec![2]);
        assert!(topology.cpus_in_cluster(7).is_empty());
        assert_eq!(topology.cluster_ids(), vec![0, 1]);
    }
}
