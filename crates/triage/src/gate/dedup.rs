//! Time- and size-bounded table of recently seen resource ids.

use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::DedupSettings;

#[derive(Default)]
struct Entries {
    first_seen: HashMap<String, Instant>,
    /// Same keys as `first_seen`, oldest first
    order: VecDeque<(String, Instant)>,
}

impl Entries {
    fn remove_oldest(&mut self) {
        if let Some((id, _)) = self.order.pop_front() {
            self.first_seen.remove(&id);
        }
    }
}

pub struct DedupTable {
    settings: DedupSettings,
    entries: Mutex<Entries>,
}

impl DedupTable {
    pub fn new(settings: DedupSettings) -> Self {
        Self {
            settings,
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Record `id` and return true if it has no live entry yet.
    ///
    /// Expiry, lookup and insertion happen under one lock, so concurrent
    /// callers with the same id see exactly one `true`.
    pub async fn first_sighting(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let ttl = self.settings.ttl;
        while entries
            .order
            .front()
            .is_some_and(|(_, seen_at)| now.duration_since(*seen_at) >= ttl)
        {
            entries.remove_oldest();
        }

        if entries.first_seen.contains_key(id) {
            return false;
        }

        while !entries.order.is_empty() && entries.first_seen.len() >= self.settings.max_entries {
            entries.remove_oldest();
        }

        entries.first_seen.insert(id.to_string(), now);
        entries.order.push_back((id.to_string(), now));
        true
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.first_seen.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
