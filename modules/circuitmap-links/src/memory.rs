//! In-memory link store. Used by tests across the workspace and for offline runs
//! over a link list loaded from elsewhere.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use circuitmap_common::{CircuitMapError, LinkRole, Result, SynapticLink};

use crate::store::LinkStore;

/// Thread-safe link store over a fixed list of links. Records every
/// `links_for` call so tests can assert fetch counts.
#[derive(Default)]
pub struct MemoryLinkStore {
    links: Vec<SynapticLink>,
    fetches: Mutex<Vec<(i64, LinkRole)>>,
    unavailable: bool,
}

impl MemoryLinkStore {
    pub fn new(links: Vec<SynapticLink>) -> Self {
        Self {
            links,
            fetches: Mutex::new(Vec::new()),
            unavailable: false,
        }
    }

    /// A store whose every call fails with `StoreUnavailable`.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Every `(segment, role)` fetched so far, in call order.
    pub fn fetches(&self) -> Vec<(i64, LinkRole)> {
        self.fetches.lock().unwrap().clone()
    }

    /// Number of `links_for` calls made for `segment_id` (any role).
    pub fn fetch_count(&self, segment_id: i64) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == segment_id)
            .count()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(CircuitMapError::unavailable("memory link store offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl LinkStore for MemoryLinkStore {
    async fn links_for(&self, segment_id: i64, role: LinkRole) -> Result<Vec<SynapticLink>> {
        self.check_available()?;
        self.fetches.lock().unwrap().push((segment_id, role));

        let mut links: Vec<SynapticLink> = self
            .links
            .iter()
            .filter(|l| l.segment(role) == segment_id)
            .cloned()
            .collect();
        links.sort_by_key(|l| l.id);
        Ok(links)
    }

    async fn representative_links_for(
        &self,
        offsets: &BTreeSet<i32>,
    ) -> Result<HashMap<i32, SynapticLink>> {
        self.check_available()?;

        let mut by_offset = HashMap::new();
        for link in &self.links {
            if offsets.contains(&link.offset) {
                by_offset.entry(link.offset).or_insert_with(|| link.clone());
            }
        }
        Ok(by_offset)
    }
}
