use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::transport::message::RumorParams;
use crate::utils::{HubError, HubResult};

/// Default lifetime of a buffered rumor.
pub const BUFFER_TTL: Duration = Duration::from_secs(3);

/// A rumor that arrived ahead of its predecessor.
#[derive(Debug, Clone)]
pub struct BufferedRumor {
    pub params: RumorParams,
    /// Socket it arrived on, banned when it is propagated.
    pub origin: Option<String>,
}

#[derive(Debug, Default)]
struct Entries {
    rumors: HashMap<String, (u64, BufferedRumor)>,
    generation: u64,
}

/// Short-lived store of out-of-order rumors keyed `"sender:rumor_id"`.
///
/// Each insertion schedules its own eviction. The generation tag keeps a
/// stale eviction from removing a newer entry under the same key.
#[derive(Debug, Clone)]
pub struct RumorBuffer {
    entries: Arc<Mutex<Entries>>,
    ttl: Duration,
}

impl Default for RumorBuffer {
    fn default() -> Self {
        Self::new(BUFFER_TTL)
    }
}

pub fn buffer_key(sender_id: &str, rumor_id: u64) -> String {
    format!("{sender_id}:{rumor_id}")
}

impl RumorBuffer {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries::default())),
            ttl,
        }
    }

    pub fn insert(&self, params: RumorParams, origin: Option<String>) -> HubResult<()> {
        let key = buffer_key(&params.sender_id, params.rumor_id);

        let generation = {
            let mut entries = self.entries.lock();
            if entries.rumors.contains_key(&key) {
                return Err(HubError::DuplicateResource(format!(
                    "rumor {key} is already buffered"
                )));
            }
            entries.generation += 1;
            let generation = entries.generation;
            entries
                .rumors
                .insert(key.clone(), (generation, BufferedRumor { params, origin }));
            generation
        };
        debug!(rumor = %key, "rumor buffered");

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(rumor = %key, "no runtime to schedule buffer eviction");
            return Ok(());
        };
        let entries = self.entries.clone();
        let ttl = self.ttl;
        runtime.spawn(async move {
            tokio::time::sleep(ttl).await;
            let mut entries = entries.lock();
            if matches!(entries.rumors.get(&key), Some((g, _)) if *g == generation) {
                entries.rumors.remove(&key);
                debug!(rumor = %key, "buffered rumor expired");
            }
        });
        Ok(())
    }

    pub fn take(&self, sender_id: &str, rumor_id: u64) -> Option<BufferedRumor> {
        self.entries
            .lock()
            .rumors
            .remove(&buffer_key(sender_id, rumor_id))
            .map(|(_, rumor)| rumor)
    }

    pub fn contains(&self, sender_id: &str, rumor_id: u64) -> bool {
        self.entries
            .lock()
            .rumors
            .contains_key(&buffer_key(sender_id, rumor_id))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().rumors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
