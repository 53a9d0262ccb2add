use super::*;

fn data_buffer_size() -> usize {
    4 * 1024 * 1024
}

fn aux_buffer_size() -> usize {
    16 * 1024 * 1024
}

#[derive(Deserialize)]
pub struct Perf {
    // bytes; must be a power-of-two multiple of the page size because the
    // kernel mmaps the ring directly
    #[serde(default = "data_buffer_size")]
    data_buffer_size: usize,

    #[serde(default = "aux_buffer_size")]
    aux_buffer_size: usize,
}

impl Default for Perf {
    fn default() -> Self {
        Self {
            data_buffer_size: data_buffer_size(),
            aux_buffer_size: aux_buffer_size(),
        }
    }
}

impl Perf {
    pub fn check(&self) {
        for (name, size) in [
            ("data_buffer_size", self.data_buffer_size),
            ("aux_buffer_size", self.aux_buffer_size),
        ] {
            if size < 4096 || !size.is_power_of_two() {
                eprintln!("{name} must be a power of two and at least 4096: {size}");
                std::process::exit(1);
            }
        }
    }

    pub fn data_buffer_size(&self) -> usize {
        self.data_buffer_size
    }

    pub fn aux_buffer_size(&self) -> usize {
        self.aux_buffer_size
    }
}
