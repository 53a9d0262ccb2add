use super::*;

fn sample_rate() -> u64 {
    999
}

fn periodic_sampling() -> bool {
    true
}

fn backtrace_depth() -> u32 {
    16
}

fn system_wide() -> bool {
    true
}

#[derive(Deserialize)]
pub struct General {
    // samples per second; zero disables periodic sampling entirely
    #[serde(default = "sample_rate")]
    sample_rate: u64,

    #[serde(default = "periodic_sampling")]
    periodic_sampling: bool,

    #[serde(default = "backtrace_depth")]
    backtrace_depth: u32,

    #[serde(default = "system_wide")]
    system_wide: bool,

    #[serde(default)]
    exclude_kernel_events: bool,

    // skip the online-coercion pass and probe cores where they are;
    // offline cores then fall back to cluster or cpuinfo identities
    #[serde(default)]
    tolerate_offline_cores: bool,
}

impl Default for General {
    fn default() -> Self {
        Self {
            sample_rate: sample_rate(),
            periodic_sampling: periodic_sampling(),
            backtrace_depth: backtrace_depth(),
            system_wide: system_wide(),
            exclude_kernel_events: false,
            tolerate_offline_cores: false,
        }
    }
}

impl General {
    pub fn sample_rate(&self) -> u64 {
        self.sample_rate
    }

    pub fn periodic_sampling(&self) -> bool {
        self.periodic_sampling
    }

    pub fn backtrace_depth(&self) -> u32 {
        self.backtrace_depth
    }

    pub fn system_wide(&self) -> bool {
        self.system_wide
    }

    pub fn exclude_kernel_events(&self) -> bool {
        self.exclude_kernel_events
    }

    pub fn tolerate_offline_cores(&self) -> bool {
        self.tolerate_offline_cores
    }
}
