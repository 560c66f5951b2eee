use indexmap::IndexMap;

/// Highest issued checkpoint version per session.
///
/// Holds at most `capacity` sessions; when full, the session that was first
/// tracked is forgotten. A forgotten session is rebuilt from storage by the
/// caller on its next save.
#[derive(Debug, Clone)]
pub struct VersionCursor {
    versions: IndexMap<String, u64>,
    capacity: usize,
}

impl VersionCursor {
    pub fn new(capacity: usize) -> Self {
        Self {
            versions: IndexMap::new(),
            capacity,
        }
    }

    pub fn get(&self, session_id: &str) -> Option<u64> {
        self.versions.get(session_id).copied()
    }

    /// Record `version` for `session_id`. Existing entries keep their place.
    pub fn set(&mut self, session_id: &str, version: u64) {
        if let Some(current) = self.versions.get_mut(session_id) {
            *current = version;
            return;
        }
        while !self.versions.is_empty() && self.versions.len() >= self.capacity {
            self.versions.shift_remove_index(0);
        }
        self.versions.insert(session_id.to_string(), version);
    }

    pub fn remove(&mut self, session_id: &str) {
        self.versions.shift_remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
