use super::*;
use ringlog::Level;

fn level() -> String {
    "info".into()
}

#[derive(Deserialize)]
pub struct Log {
    #[serde(default = "level")]
    level: String,
}

impl Default for Log {
    fn default() -> Self {
        Self { level: level() }
    }
}

impl Log {
    pub fn check(&self) {
        if self.parse().is_none() {
            eprintln!("bad log level: {}", self.level);
            std::process::exit(1);
        }
    }

    fn parse(&self) -> Option<Level> {
        match self.level.to_ascii_lowercase().as_str() {
            "error" => Some(Level::Error),
            "warn" => Some(Level::Warn),
            "info" => Some(Level::Info),
            "debug" => Some(Level::Debug),
            "trace" => Some(Level::Trace),
            _ => None,
        }
    }

    pub fn level(&self) -> Level {
        self.parse().unwrap_or(Level::Info)
    }
}
