use super::sys::PerfEventAttr;

/// Write-only sink for the mapping from a counter key to the attribute
/// record actually programmed for it.
pub trait AttrKeyTracker {
    fn track(&mut self, key: i32, attr: &PerfEventAttr);
}

/// Retains every key to attribute mapping in arrival order. Caller keys
/// are non-negative; synthetic follower keys are negative, so the two
/// never collide.
#[derive(Default)]
pub struct KeyMappings {
    entries: Vec<(i32, PerfEventAttr)>,
}

impl KeyMappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: i32) -> Option<&PerfEventAttr> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, attr)| attr)
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, &PerfEventAttr)> {
        self.entries.iter().map(|(key, attr)| (*key, attr))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl AttrKeyTracker for KeyMappings {
    fn track(&mut self, key: i32, attr: &PerfEventAttr) {
        self.entries.push((key, *attr));
    }
}
