//! Authority response caching
//!
//! In-memory TTL cache for idempotent authority reads. Concurrent misses for
//! the same key share a single fetch, writes invalidate affected keys before
//! they return, and an invalidation racing a fetch keeps the stale result out.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use cron::Schedule;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::authority::AuthorityClient;
use super::orchestrator::NetworkWriter;
use super::wapi::ClientError;
use crate::config::CacheConfig;
use crate::models::{
    AttributeDefinition, AttributeSchema, AuthorityNetwork, NetworkView, WriteOperation,
};

/// Cache entry with expiration tracking
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub inserted_at: Instant,
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, ttl: Duration) -> Self {
        Self {
            data,
            inserted_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }

    pub fn remaining_ttl(&self) -> Duration {
        self.ttl.saturating_sub(self.inserted_at.elapsed())
    }
}

/// Generic cache storage with TTL support and single-flight fetches
#[derive(Debug)]
pub struct Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    gates: Mutex<HashMap<K, Arc<Mutex<()>>>>,
    generation: AtomicU64,
    max_entries: usize,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            max_entries: max_entries.max(1),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    /// Get a value from cache if it exists and is not expired
    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.data.clone())
    }

    /// Get entry with metadata (including TTL info)
    pub async fn get_entry(&self, key: &K) -> Option<CacheEntry<V>> {
        let entries = self.entries.read().await;
        entries.get(key).filter(|entry| !entry.is_expired()).cloned()
    }

    /// Return the cached value, or run `fetch` once for all concurrent callers
    ///
    /// `force_refresh` ignores any entry stored before this call started.
    /// Errors are returned to every caller that ran the fetch and are never
    /// cached.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: K,
        ttl: Duration,
        force_refresh: bool,
        fetch: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let requested_at = Instant::now();

        if !force_refresh {
            if let Some(value) = self.get(&key).await {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(value);
            }
        }

        let gate = self.gate(&key).await;
        let guard = gate.lock().await;

        // Another caller may have populated the entry while we waited
        if let Some(entry) = self.get_entry(&key).await {
            if !force_refresh || entry.inserted_at >= requested_at {
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                drop(guard);
                self.release_gate(&key, &gate).await;
                return Ok(entry.data);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let generation = self.generation.load(Ordering::SeqCst);
        let result = fetch().await;

        if let Ok(ref value) = result {
            if self.generation.load(Ordering::SeqCst) == generation {
                self.set_with_ttl(key.clone(), value.clone(), ttl).await;
            } else {
                debug!("Discarding fetch result invalidated while in flight");
            }
        }

        drop(guard);
        self.release_gate(&key, &gate).await;
        result
    }

    async fn gate(&self, key: &K) -> Arc<Mutex<()>> {
        let mut gates = self.gates.lock().await;
        gates
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn release_gate(&self, key: &K, gate: &Arc<Mutex<()>>) {
        let mut gates = self.gates.lock().await;
        // Only the map and this caller hold the gate: nobody else is waiting
        if Arc::strong_count(gate) <= 2 {
            gates.remove(key);
        }
    }

    /// Set a value in cache with default TTL
    pub async fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.default_ttl).await;
    }

    /// Set a value in cache with custom TTL
    pub async fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let mut entries = self.entries.write().await;

        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            Self::evict_expired_locked(&mut entries);
        }

        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            if let Some(oldest_key) = Self::find_oldest_key(&entries) {
                entries.remove(&oldest_key);
            }
        }

        entries.insert(key, CacheEntry::new(value, ttl));
    }

    /// Remove a value from cache
    pub async fn remove(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        entries.remove(key).map(|e| e.data)
    }

    /// Remove every entry whose key matches `predicate`
    pub async fn invalidate_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&K) -> bool,
    {
        let mut entries = self.entries.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        let before = entries.len();
        entries.retain(|key, _| !predicate(key));
        before - entries.len()
    }

    /// Clear all entries from cache
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        entries.clear();
    }

    /// Remove all expired entries
    pub async fn evict_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        Self::evict_expired_locked(&mut entries)
    }

    fn evict_expired_locked(entries: &mut HashMap<K, CacheEntry<V>>) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        before - entries.len()
    }

    fn find_oldest_key(entries: &HashMap<K, CacheEntry<V>>) -> Option<K> {
        entries
            .iter()
            .min_by_key(|(_, entry)| entry.inserted_at)
            .map(|(k, _)| k.clone())
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        let total = entries.len();
        let expired = entries.values().filter(|e| e.is_expired()).count();

        CacheStats {
            total_entries: total,
            expired_entries: expired,
            valid_entries: total - expired,
            max_entries: self.max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }

    /// Check if cache contains a non-expired entry for key
    pub async fn contains(&self, key: &K) -> bool {
        self.get(key).await.is_some()
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub valid_entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    /// Lookups that ran the underlying fetch
    pub misses: u64,
    /// Lookups served by a fetch another caller ran
    pub coalesced: u64,
}

pub const NETWORK_VIEWS_KEY: &str = "network_views";
pub const ATTRIBUTE_DEFINITIONS_KEY: &str = "attribute_definitions";
pub const NETWORKS_KEY: &str = "networks";

/// Cache key for a network listing, all views when `view` is `None`
pub fn networks_key(view: Option<&str>) -> String {
    match view {
        Some(view) => format!("{}:{}", NETWORKS_KEY, view),
        None => NETWORKS_KEY.to_string(),
    }
}

/// Key matcher for invalidation: `*` matches everything, a trailing `*`
/// matches a prefix, anything else matches one key exactly
fn key_matcher(pattern: &str) -> impl Fn(&String) -> bool + '_ {
    move |key: &String| match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

type ViewCache = Cache<String, Vec<NetworkView>>;
type AttributeCache = Cache<String, Vec<AttributeDefinition>>;
type NetworkCache = Cache<String, Vec<AuthorityNetwork>>;

/// Authority operations with a read-through cache
#[derive(Clone)]
pub struct CachedAuthorityService {
    client: AuthorityClient,
    config: CacheConfig,
    views: Arc<ViewCache>,
    attributes: Arc<AttributeCache>,
    networks: Arc<NetworkCache>,
}

impl CachedAuthorityService {
    pub fn new(client: AuthorityClient, config: CacheConfig) -> Self {
        let schema_ttl = Duration::from_secs(config.schema_ttl_secs);
        let inventory_ttl = Duration::from_secs(config.inventory_ttl_secs);

        Self {
            client,
            views: Arc::new(Cache::new(4, schema_ttl)),
            attributes: Arc::new(Cache::new(4, schema_ttl)),
            networks: Arc::new(Cache::new(config.max_entries, inventory_ttl)),
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Get access to the uncached client
    pub fn client(&self) -> &AuthorityClient {
        &self.client
    }

    fn schema_ttl(&self) -> Duration {
        Duration::from_secs(self.config.schema_ttl_secs)
    }

    fn inventory_ttl(&self) -> Duration {
        Duration::from_secs(self.config.inventory_ttl_secs)
    }

    pub async fn ping(&self) -> Result<(), ClientError> {
        self.client.ping().await
    }

    pub async fn network_views(&self, force_refresh: bool) -> Result<Vec<NetworkView>, ClientError> {
        if !self.config.enabled {
            return self.client.list_network_views().await;
        }
        self.views
            .get_or_fetch(
                NETWORK_VIEWS_KEY.to_string(),
                self.schema_ttl(),
                force_refresh,
                || self.client.list_network_views(),
            )
            .await
    }

    pub async fn attribute_definitions(
        &self,
        force_refresh: bool,
    ) -> Result<Vec<AttributeDefinition>, ClientError> {
        if !self.config.enabled {
            return self.client.list_attribute_definitions().await;
        }
        self.attributes
            .get_or_fetch(
                ATTRIBUTE_DEFINITIONS_KEY.to_string(),
                self.schema_ttl(),
                force_refresh,
                || self.client.list_attribute_definitions(),
            )
            .await
    }

    pub async fn attribute_schema(&self, force_refresh: bool) -> Result<AttributeSchema, ClientError> {
        self.attribute_definitions(force_refresh)
            .await
            .map(AttributeSchema::from)
    }

    pub async fn networks(
        &self,
        view: Option<&str>,
        force_refresh: bool,
    ) -> Result<Vec<AuthorityNetwork>, ClientError> {
        if !self.config.enabled {
            return self.client.list_networks(view).await;
        }
        self.networks
            .get_or_fetch(
                networks_key(view),
                self.inventory_ttl(),
                force_refresh,
                || self.client.list_networks(view),
            )
            .await
    }

    pub async fn create_attribute_definition(
        &self,
        definition: &AttributeDefinition,
    ) -> Result<String, ClientError> {
        let result = self.client.create_attribute_definition(definition).await;
        self.invalidate(ATTRIBUTE_DEFINITIONS_KEY).await;
        result
    }

    pub async fn create_attribute_definitions(
        &self,
        definitions: &[AttributeDefinition],
    ) -> Vec<Result<String, ClientError>> {
        let results = self.client.create_attribute_definitions(definitions).await;
        self.invalidate(ATTRIBUTE_DEFINITIONS_KEY).await;
        results
    }

    /// Apply a write and drop every cached network listing
    pub async fn apply(&self, operation: &WriteOperation) -> Result<String, ClientError> {
        let result = self.client.apply(operation).await;
        self.invalidate(&format!("{}*", NETWORKS_KEY)).await;
        result
    }

    /// Invalidate a key, a `prefix*`, or `*` for everything
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let matcher = key_matcher(pattern);
        let removed = self.views.invalidate_where(&matcher).await
            + self.attributes.invalidate_where(&matcher).await
            + self.networks.invalidate_where(&matcher).await;
        debug!(pattern, removed, "Invalidated cache entries");
        removed
    }

    pub async fn invalidate_all(&self) {
        info!("Invalidating all cached authority data");
        self.views.clear().await;
        self.attributes.clear().await;
        self.networks.clear().await;
    }

    /// Evict expired entries from all caches
    pub async fn evict_expired(&self) -> usize {
        let total = self.views.evict_expired().await
            + self.attributes.evict_expired().await
            + self.networks.evict_expired().await;
        if total > 0 {
            debug!("Evicted {} expired cache entries", total);
        }
        total
    }

    /// Re-read views and attribute definitions from the authority
    pub async fn refresh_schema(&self) -> Result<(usize, usize), ClientError> {
        let views = self.network_views(true).await?;
        let attributes = self.attribute_definitions(true).await?;
        Ok((views.len(), attributes.len()))
    }

    pub async fn stats(&self) -> CacheServiceStats {
        CacheServiceStats {
            enabled: self.config.enabled,
            network_views: self.views.stats().await,
            attribute_definitions: self.attributes.stats().await,
            networks: self.networks.stats().await,
        }
    }
}

#[async_trait]
impl NetworkWriter for CachedAuthorityService {
    async fn apply(&self, operation: &WriteOperation) -> Result<(), ClientError> {
        CachedAuthorityService::apply(self, operation).await.map(|_| ())
    }
}

/// Overall cache service statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheServiceStats {
    pub enabled: bool,
    pub network_views: CacheStats,
    pub attribute_definitions: CacheStats,
    pub networks: CacheStats,
}

/// Background job that evicts expired entries and refreshes schema data
pub struct CacheSyncJob {
    service: CachedAuthorityService,
    schedule: Schedule,
}

impl CacheSyncJob {
    pub fn new(service: CachedAuthorityService, cron_expr: &str) -> anyhow::Result<Self> {
        let schedule = Schedule::from_str(cron_expr)
            .map_err(|e| anyhow::anyhow!("Invalid cron expression '{}': {}", cron_expr, e))?;
        Ok(Self { service, schedule })
    }

    /// Start the background sync job
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("Starting cache sync job");

            loop {
                let Some(next) = self.schedule.upcoming(Utc).next() else {
                    warn!("Cache sync schedule has no upcoming runs, stopping");
                    return;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;

                self.service.evict_expired().await;

                match self.service.refresh_schema().await {
                    Ok((views, attributes)) => {
                        debug!(views, attributes, "Cache sync: refreshed schema");
                    }
                    Err(e) => {
                        warn!("Cache sync: failed to refresh schema: {}", e);
                    }
                }
            }
        })
    }
}
