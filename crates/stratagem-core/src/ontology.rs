//! Ontology context caching.
//!
//! The assembled ontology context is expensive to build and changes
//! slowly, so it is cached inside the session metadata blob and reused
//! across turns. An entry is usable only when its cache key matches the
//! key computed for the current request AND it is younger than the
//! class TTL. Key mismatch covers every scope change, including a
//! cleared focus: the unfocused key differs from the focused one, so a
//! stale focused context is never served to an unfocused turn.

use tracing::debug;

use stratagem_types::context::ContextScope;
use stratagem_types::error::ContextLoadError;
use stratagem_types::ontology::OntologyContext;
use stratagem_types::session::{AgentSessionMetadata, CacheEntry, SnapshotSlot};

use std::time::Duration;

use crate::context::{generate_cache_key, is_cache_fresh};

/// Lifetime of the ontology context cache.
pub const ONTOLOGY_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Lifetime of the snapshot-class caches (location context, linked
/// entities, document structure).
pub const SNAPSHOT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// Assembles a prompt-ready ontology context for a scope.
///
/// Implementations live in stratagem-infra (e.g., `SqliteContextLoader`)
/// and may keep their own short-lived cache; the two tiers are
/// deliberately uncoordinated.
pub trait ContextLoader: Send + Sync {
    fn load(
        &self,
        scope: &ContextScope,
    ) -> impl std::future::Future<Output = Result<OntologyContext, ContextLoadError>> + Send;
}

/// Hands a project off to the out-of-band snapshot job.
///
/// Must never block or fail the calling turn.
pub trait SnapshotScheduler: Send + Sync {
    fn schedule_project_snapshot(&self, project_id: &str);
}

/// Result of a cache-aware context load.
pub struct ContextOutcome {
    pub context: OntologyContext,
    /// Replacement cache entry, present only on a miss. The caller
    /// folds it into the end-of-turn consolidated write; this service
    /// never writes.
    pub patch: Option<CacheEntry<OntologyContext>>,
    pub cache_hit: bool,
}

/// Session-tier ontology cache in front of a [`ContextLoader`].
pub struct OntologyCacheService<L> {
    loader: L,
    ttl: Duration,
}

impl<L> OntologyCacheService<L>
where
    L: ContextLoader,
{
    pub fn new(loader: L) -> Self {
        Self::with_ttl(loader, ONTOLOGY_CACHE_TTL)
    }

    pub fn with_ttl(loader: L, ttl: Duration) -> Self {
        Self { loader, ttl }
    }

    /// Serve the cached context when usable, otherwise load and return
    /// a patch for the caller to persist. Loader failures propagate.
    pub async fn load_or_get(
        &self,
        scope: &ContextScope,
        metadata: &AgentSessionMetadata,
        now_ms: i64,
    ) -> Result<ContextOutcome, ContextLoadError> {
        let key = generate_cache_key("ontology", scope);

        if let Some(entry) = &metadata.ontology_cache {
            if entry.cache_key == key && is_cache_fresh(entry.loaded_at, self.ttl, now_ms) {
                debug!(cache_key = %key, "ontology cache hit");
                return Ok(ContextOutcome {
                    context: entry.payload.clone(),
                    patch: None,
                    cache_hit: true,
                });
            }
        }

        debug!(cache_key = %key, "ontology cache miss, assembling context");
        let context = self.loader.load(scope).await?;
        let patch = CacheEntry::new(key, now_ms, context.clone());
        Ok(ContextOutcome {
            context,
            patch: Some(patch),
            cache_hit: false,
        })
    }
}

/// Drop snapshot-class entries older than [`SNAPSHOT_CACHE_TTL`].
///
/// Returns the slots that were cleared so the caller can log them.
/// Fresh entries pass through the consolidated write untouched; they
/// are populated by the out-of-band snapshot job, not by turns.
pub fn prune_stale_snapshots(
    metadata: &mut AgentSessionMetadata,
    now_ms: i64,
) -> Vec<SnapshotSlot> {
    let mut cleared = Vec::new();
    for slot in SnapshotSlot::ALL {
        let stale = slot
            .get(metadata)
            .is_some_and(|entry| !is_cache_fresh(entry.loaded_at, SNAPSHOT_CACHE_TTL, now_ms));
        if stale {
            slot.set(metadata, None);
            cleared.push(slot);
        }
    }
    cleared
}
