use super::*;

/// Which group a configured counter is placed in.
#[derive(Copy, Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    Cluster,
    Uncore,
    Cpu,
    Global,
    Spe,
}

/// One declaratively-configured counter.
#[derive(Clone, Debug, Deserialize)]
pub struct Counter {
    pub group: GroupKind,

    // group-kind specific targets
    #[serde(default)]
    pub cluster: Option<u32>,
    #[serde(default)]
    pub cpu: Option<usize>,
    #[serde(default)]
    pub pmu: Option<String>,
    #[serde(default)]
    pub instance: Option<u32>,

    pub event_type: u32,
    pub event_config: u64,
    #[serde(default)]
    pub config1: u64,
    #[serde(default)]
    pub config2: u64,

    // sample period in event units (or Hz when freq is set); zero counts
    // without sampling
    #[serde(default)]
    pub period: u64,
    #[serde(default)]
    pub freq: bool,

    // the key this counter's data is reported under
    pub key: i32,

    // the event produces an aux stream (SPE)
    #[serde(default)]
    pub aux: bool,
}

impl Counter {
    pub fn check(&self, index: usize) {
        if self.key < 0 {
            eprintln!("counters[{index}]: key must be non-negative: {}", self.key);
            std::process::exit(1);
        }

        let target_ok = match self.group {
            GroupKind::Cluster => self.cluster.is_some(),
            GroupKind::Uncore => self.pmu.is_some(),
            GroupKind::Cpu | GroupKind::Spe => self.cpu.is_some(),
            GroupKind::Global => true,
        };

        if !target_ok {
            eprintln!(
                "counters[{index}]: group kind {:?} is missing its target (cluster/cpu/pmu)",
                self.group
            );
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_deserialize_from_toml() {
        let raw = r#"
            [[counters]]
            group = "cluster"
            cluster = 0
            event_type = 4
            event_config = 0x11
            period = 100000
            key = 3

            [[counters]]
            group = "spe"
            cpu = 2
            event_type = 8
            event_config = 1
            period = 4096
            key = 4
            aux = true
        "#;

        let config: Config = toml::from_str(raw).unwrap();
        let counters = config.counters();

        assert_eq!(counters.len(), 2);
        assert_eq!(counters[0].group, GroupKind::Cluster);
        assert_eq!(counters[0].cluster, Some(0));
        assert_eq!(counters[0].event_config, 0x11);
        assert!(!counters[0].aux);
        assert_eq!(counters[1].group, GroupKind::Spe);
        assert!(counters[1].aux);
    }

    #[test]
    fn defaults_cover_missing_sections() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.general().sample_rate(), 999);
        assert!(config.general().periodic_sampling());
        assert!(config.general().system_wide());
        assert_eq!(config.perf().data_buffer_size(), 4 * 1024 * 1024);
        assert!(config.counters().is_empty());
    }
}
