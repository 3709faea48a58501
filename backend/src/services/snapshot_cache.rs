use crate::models::StreamerSnapshot;
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

pub type Snapshot = Arc<Vec<StreamerSnapshot>>;

/// Produces a fresh snapshot. Must not fail; degraded data is still a snapshot.
#[rocket::async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn resolve(&self) -> Vec<StreamerSnapshot>;
}

struct CachedSnapshot {
    snapshot: Snapshot,
    expires_at: Instant,
}

/// Last resolver output with an adaptive time-to-live.
///
/// At most one resolution runs at a time; callers arriving while it runs
/// wait for it and share its result.
pub struct SnapshotCache {
    source: Arc<dyn SnapshotSource>,
    fast_ttl: Duration,
    normal_ttl: Duration,
    slot: RwLock<Option<CachedSnapshot>>,
    flight: Mutex<()>,
    generation: AtomicU64,
}

impl SnapshotCache {
    pub fn new(source: Arc<dyn SnapshotSource>, fast_ttl: Duration, normal_ttl: Duration) -> Self {
        SnapshotCache {
            source,
            fast_ttl,
            normal_ttl,
            slot: RwLock::new(None),
            flight: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn ttl_for(&self, snapshot: &[StreamerSnapshot]) -> Duration {
        if snapshot.iter().any(|s| s.status.is_volatile()) {
            self.fast_ttl
        } else {
            self.normal_ttl
        }
    }

    async fn fresh(&self) -> Option<Snapshot> {
        let slot = self.slot.read().await;
        slot.as_ref()
            .filter(|cached| Instant::now() < cached.expires_at)
            .map(|cached| cached.snapshot.clone())
    }

    pub async fn get_snapshot(&self) -> Snapshot {
        if let Some(snapshot) = self.fresh().await {
            return snapshot;
        }

        let _flight = self.flight.lock().await;
        // Whoever held the lock before us may already have refreshed the slot.
        if let Some(snapshot) = self.fresh().await {
            return snapshot;
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let snapshot: Snapshot = Arc::new(self.source.resolve().await);
        let ttl = self.ttl_for(&snapshot);

        let mut slot = self.slot.write().await;
        // An invalidation during the pass means it may have read an outdated roster.
        if self.generation.load(Ordering::SeqCst) == generation {
            debug!("Caching snapshot of {} channels for {ttl:?}", snapshot.len());
            *slot = Some(CachedSnapshot {
                snapshot: snapshot.clone(),
                expires_at: Instant::now() + ttl,
            });
        } else {
            debug!("Discarding snapshot invalidated while resolving");
        }
        snapshot
    }

    /// Forces the next `get_snapshot` to resolve again, including when a pass
    /// is already running.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        *slot = None;
    }
}
