use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::transport::message::RumorParams;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryKind {
    GetMessagesById,
    RumorState,
    /// Keeps the rumor so propagation can continue once the peer answers.
    Rumor(RumorParams),
}

#[derive(Debug, Clone)]
pub struct PendingQuery {
    pub kind: QueryKind,
    pub created_at: Instant,
}

#[derive(Debug, Default)]
pub struct QueryTracker {
    next_id: AtomicI64,
    pending: Mutex<HashMap<i64, PendingQuery>>,
}

impl QueryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn add_get_messages_by_id(&self, id: i64) {
        self.add(id, QueryKind::GetMessagesById);
    }

    pub fn add_rumor_state(&self, id: i64) {
        self.add(id, QueryKind::RumorState);
    }

    pub fn add_rumor(&self, id: i64, params: RumorParams) {
        self.add(id, QueryKind::Rumor(params));
    }

    fn add(&self, id: i64, kind: QueryKind) {
        self.pending.lock().insert(
            id,
            PendingQuery {
                kind,
                created_at: Instant::now(),
            },
        );
    }

    /// Resolve a query, removing it.
    pub fn take(&self, id: i64) -> Option<QueryKind> {
        self.pending.lock().remove(&id).map(|q| q.kind)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop queries older than `timeout` and return their ids.
    pub fn sweep_expired(&self, timeout: Duration) -> Vec<i64> {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.pending.lock().retain(|id, q| {
            let keep = now.duration_since(q.created_at) < timeout;
            if !keep {
                expired.push(*id);
            }
            keep
        });
        expired.sort_unstable();
        expired
    }
}
