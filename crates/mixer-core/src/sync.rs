//! bring a cache key up to chain head
//!
//! The indexer is tried first when one answers its smoke query. Any indexer
//! failure switches the call to direct log queries, resuming from whatever
//! the indexer managed to append. A failed log window ends the call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::client::{ChainReader, GraphQuery, LogFilter};
use crate::error::{MixerError, Result};
use crate::events::{BlockFilter, PoolEvent, GRAPH_PAGE_SIZE};
use crate::store::{CacheKey, EventStore};

/// blocks per eth_getLogs window
pub const LOG_WINDOW: u64 = 1000;

/// what to sync and where it starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub key: CacheKey,
    /// contract emitting the events
    pub contract: String,
    /// deployment block, used when nothing is cached
    pub start_block: u64,
    /// (currency, amount) for pool events
    pub scope: Option<(String, String)>,
}

impl SyncTarget {
    fn scope(&self) -> Option<(&str, &str)> {
        self.scope.as_ref().map(|(c, a)| (c.as_str(), a.as_str()))
    }
}

/// append-only view of one cache key handed to sources
pub struct EventSink<'a> {
    store: &'a EventStore,
    target: &'a SyncTarget,
}

impl<'a> EventSink<'a> {
    pub fn new(store: &'a EventStore, target: &'a SyncTarget) -> Self {
        Self { store, target }
    }

    /// last cached block + 1, or the deployment block
    pub fn resume_point<E: PoolEvent>(&self) -> u64 {
        self.store
            .last_block::<E>(&self.target.key)
            .map(|b| b + 1)
            .unwrap_or(self.target.start_block)
    }

    pub fn append<E: PoolEvent>(&self, batch: Vec<E>) -> Result<usize> {
        self.store.append(&self.target.key, batch)
    }

    pub fn target(&self) -> &SyncTarget {
        self.target
    }
}

/// one way of fetching events from `from_block` onward into a sink
#[async_trait]
pub trait EventSource: Send + Sync {
    fn name(&self) -> String;

    async fn fetch<E: PoolEvent>(&self, sink: &EventSink<'_>, from_block: u64) -> Result<()>;
}

pub struct IndexerSource {
    client: Arc<dyn GraphQuery>,
}

impl IndexerSource {
    pub fn new(client: Arc<dyn GraphQuery>) -> Self {
        Self { client }
    }

    async fn page<E: PoolEvent>(
        &self,
        target: &SyncTarget,
        block: u64,
        filter: BlockFilter,
    ) -> Result<Vec<E>> {
        let data = self
            .client
            .query(&E::graph_query(filter), E::graph_variables(block, target.scope()))
            .await?;
        let records = data
            .get(E::GRAPH_ENTITY)
            .and_then(|v| v.as_array())
            .ok_or_else(|| MixerError::Indexer(format!("response has no {}", E::GRAPH_ENTITY)))?;
        records.iter().map(E::from_graph).collect()
    }
}

#[async_trait]
impl EventSource for IndexerSource {
    fn name(&self) -> String {
        format!("indexer {}", self.client.endpoint())
    }

    async fn fetch<E: PoolEvent>(&self, sink: &EventSink<'_>, from_block: u64) -> Result<()> {
        let target = sink.target();
        // strictly-after filter, so start one below the first wanted block
        let mut cursor = from_block.saturating_sub(1);

        loop {
            let mut page = self.page::<E>(target, cursor, BlockFilter::After).await?;
            let Some(last_block) = page.last().map(|e| e.block_number()) else {
                break;
            };
            let full = page.len() >= GRAPH_PAGE_SIZE;

            if full {
                // the page may have cut the last block short; refetch it whole
                page.retain(|e| e.block_number() != last_block);
                page.extend(self.page::<E>(target, last_block, BlockFilter::At).await?);
            }

            sink.append(page)?;
            info!("fetched {} events to block {}", E::KIND, last_block);

            if !full {
                break;
            }
            cursor = last_block;
        }
        Ok(())
    }
}

pub struct ChainSource {
    chain: Arc<dyn ChainReader>,
}

impl ChainSource {
    pub fn new(chain: Arc<dyn ChainReader>) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl EventSource for ChainSource {
    fn name(&self) -> String {
        "chain logs".to_string()
    }

    async fn fetch<E: PoolEvent>(&self, sink: &EventSink<'_>, from_block: u64) -> Result<()> {
        let target = sink.target();
        let head = self.chain.block_number().await?;
        let topic0 = E::topic();

        let mut start = from_block;
        while start <= head {
            let end = (start + LOG_WINDOW - 1).min(head);
            let filter = LogFilter {
                address: target.contract.clone(),
                topic0: topic0.clone(),
                from_block: start,
                to_block: end,
            };
            let logs = self.chain.get_logs(&filter).await.map_err(|e| {
                MixerError::Network(format!(
                    "failed fetching {} events for blocks {}..={}: {}",
                    E::KIND, start, end, e
                ))
            })?;

            let events = logs.iter().map(E::from_log).collect::<Result<Vec<E>>>()?;
            if !events.is_empty() {
                sink.append(events)?;
            }
            debug!("fetched {} events to block {}", E::KIND, end);
            start = end + 1;
        }
        Ok(())
    }
}

/// primary source when present, chain fallback otherwise or on any primary error
pub struct OrderedFallback<P, F> {
    primary: Option<P>,
    fallback: F,
}

impl<P: EventSource, F: EventSource> OrderedFallback<P, F> {
    pub fn new(primary: Option<P>, fallback: F) -> Self {
        Self { primary, fallback }
    }

    pub async fn run<E: PoolEvent>(&self, sink: &EventSink<'_>) -> Result<()> {
        if let Some(primary) = &self.primary {
            let from = sink.resume_point::<E>();
            info!("syncing {} events from block {} via {}", E::KIND, from, primary.name());
            match primary.fetch::<E>(sink, from).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!("{} failed, falling back to {}: {}", primary.name(), self.fallback.name(), e),
            }
        }

        // whatever the primary appended before failing stays; resume after it
        let from = sink.resume_point::<E>();
        info!("syncing {} events from block {} via {}", E::KIND, from, self.fallback.name());
        self.fallback.fetch::<E>(sink, from).await
    }
}

pub struct SyncEngine {
    store: EventStore,
    chain: Arc<dyn ChainReader>,
    indexers: Vec<Arc<dyn GraphQuery>>,
    smoke_timeout: Duration,
}

impl SyncEngine {
    pub fn new(store: EventStore, chain: Arc<dyn ChainReader>) -> Self {
        Self {
            store,
            chain,
            indexers: Vec::new(),
            smoke_timeout: Duration::from_secs(10),
        }
    }

    /// candidates tried in order; an empty list means chain-only
    pub fn with_indexers(mut self, indexers: Vec<Arc<dyn GraphQuery>>, smoke_timeout: Duration) -> Self {
        self.indexers = indexers;
        self.smoke_timeout = smoke_timeout;
        self
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn chain(&self) -> &Arc<dyn ChainReader> {
        &self.chain
    }

    /// first indexer that answers the smoke query for `E` within the timeout
    pub async fn select_indexer<E: PoolEvent>(&self) -> Option<Arc<dyn GraphQuery>> {
        for candidate in &self.indexers {
            let probe = candidate.query(E::smoke_query(), serde_json::json!({}));
            match tokio::time::timeout(self.smoke_timeout, probe).await {
                Ok(Ok(data)) if data.get(E::GRAPH_ENTITY).map_or(false, |v| v.is_array()) => {
                    info!("selected indexer {}", candidate.endpoint());
                    return Some(candidate.clone());
                }
                Ok(Ok(_)) => debug!("indexer {} returned no {}", candidate.endpoint(), E::GRAPH_ENTITY),
                Ok(Err(e)) => debug!("indexer {} unavailable: {}", candidate.endpoint(), e),
                Err(_) => debug!("indexer {} timed out", candidate.endpoint()),
            }
        }
        None
    }

    /// sync `target` to head and return every cached event for it
    pub async fn sync<E: PoolEvent>(&self, target: &SyncTarget) -> Result<Vec<E>> {
        let sink = EventSink::new(&self.store, target);
        let primary = self.select_indexer::<E>().await.map(IndexerSource::new);
        if primary.is_none() && !self.indexers.is_empty() {
            warn!("no indexer available, using chain logs only");
        }

        OrderedFallback::new(primary, ChainSource::new(self.chain.clone()))
            .run::<E>(&sink)
            .await?;

        let events = self.store.load::<E>(&target.key);
        info!(
            "{} cache at block {} with {} events",
            E::KIND,
            events.last().map(|e| e.block_number()).unwrap_or(target.start_block),
            events.len()
        );
        Ok(events)
    }
}
