mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{assert_contiguous, deposit_log, word, FakeChain, FakeIndexer};
use mixer_core::client::GraphQuery;
use mixer_core::events::EventKind;
use mixer_core::{CacheKey, DepositEvent, EventStore, MixerError, SyncEngine, SyncTarget};
use tempfile::tempdir;

const POOL: &str = "0x12D66f87A04A9E220743712cE6d9bB1B5616B8Fc";

fn target(start_block: u64) -> SyncTarget {
    SyncTarget {
        key: CacheKey::pool("mainnet", EventKind::Deposit, "eth", "0.1"),
        contract: POOL.to_string(),
        start_block,
        scope: Some(("eth".into(), "0.1".into())),
    }
}

#[tokio::test]
async fn test_chain_windows_cover_deployment_to_head() {
    let dir = tempdir().unwrap();
    let chain = Arc::new(FakeChain::new(1, 2500));
    chain.push_log(deposit_log(POOL, 150, 0, &word(1)));
    chain.push_log(deposit_log(POOL, 2400, 1, &word(2)));

    let engine = SyncEngine::new(EventStore::open(dir.path()), chain.clone());
    let events = engine.sync::<DepositEvent>(&target(100)).await.unwrap();

    assert_eq!(chain.windows(), vec![(100, 1099), (1100, 2099), (2100, 2500)]);
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].timestamp, Some(1_600_002_400));
}

#[tokio::test]
async fn test_resync_is_idempotent() {
    let dir = tempdir().unwrap();
    let chain = Arc::new(FakeChain::new(1, 1500));
    for leaf in 0..5u32 {
        chain.push_log(deposit_log(POOL, 200 + leaf as u64 * 100, leaf, &word(leaf as u64 + 1)));
    }

    let engine = SyncEngine::new(EventStore::open(dir.path()), chain.clone());
    let first = engine.sync::<DepositEvent>(&target(100)).await.unwrap();
    let second = engine.sync::<DepositEvent>(&target(100)).await.unwrap();

    assert_eq!(first, second);
    assert_contiguous(&second);
    // resumes after the last cached block
    assert_eq!(chain.windows().last(), Some(&(601, 1500)));
}

#[tokio::test]
async fn test_chain_window_failure_is_fatal() {
    let dir = tempdir().unwrap();
    let chain = Arc::new(FakeChain::new(1, 2500));
    chain.push_log(deposit_log(POOL, 150, 0, &word(1)));
    chain.push_log(deposit_log(POOL, 1500, 1, &word(2)));
    *chain.fail_from.lock().unwrap() = Some(1100);

    let store = EventStore::open(dir.path());
    let engine = SyncEngine::new(store.clone(), chain.clone());
    let err = engine.sync::<DepositEvent>(&target(100)).await.unwrap_err();

    assert!(matches!(err, MixerError::Network(_)), "{}", err);
    // the first window was applied before the failure
    assert_eq!(store.load::<DepositEvent>(&target(100).key).len(), 1);
}

fn spread_deposits(count: u32) -> (Vec<serde_json::Value>, Vec<(u64, u32)>) {
    // three deposits per block, so page boundaries cut blocks in half
    let mut records = Vec::new();
    let mut layout = Vec::new();
    for leaf in 0..count {
        let block = 100 + (leaf / 3) as u64;
        records.push(FakeIndexer::deposit_record(block, leaf, &word(leaf as u64 + 1)));
        layout.push((block, leaf));
    }
    (records, layout)
}

#[tokio::test]
async fn test_indexer_pages_refetch_split_block() {
    let dir = tempdir().unwrap();
    let (records, layout) = spread_deposits(1500);
    let head = layout.last().unwrap().0;
    let chain = Arc::new(FakeChain::new(1, head));
    let indexer: Arc<dyn GraphQuery> = Arc::new(FakeIndexer::deposits(records));

    let engine = SyncEngine::new(EventStore::open(dir.path()), chain.clone())
        .with_indexers(vec![indexer], Duration::from_secs(1));
    let events = engine.sync::<DepositEvent>(&target(100)).await.unwrap();

    assert_eq!(events.len(), 1500);
    assert_contiguous(&events);
    assert!(chain.windows().is_empty(), "chain should not be touched");
}

#[tokio::test]
async fn test_indexer_failure_falls_back_and_resumes() {
    let dir = tempdir().unwrap();
    let (records, layout) = spread_deposits(1500);
    let head = layout.last().unwrap().0;
    let chain = Arc::new(FakeChain::new(1, head));
    for (block, leaf) in &layout {
        chain.push_log(deposit_log(POOL, *block, *leaf, &word(*leaf as u64 + 1)));
    }
    // first page and its split-block refetch succeed, the next page fails
    let indexer: Arc<dyn GraphQuery> = Arc::new(FakeIndexer::deposits(records).failing_after(2));

    let engine = SyncEngine::new(EventStore::open(dir.path()), chain.clone())
        .with_indexers(vec![indexer], Duration::from_secs(1));
    let events = engine.sync::<DepositEvent>(&target(100)).await.unwrap();

    assert_eq!(events.len(), 1500);
    assert_contiguous(&events);
    // leaves 0..=1001 end at block 433, chain picks up right after
    assert_eq!(chain.windows().first(), Some(&(434, head)));
}

#[tokio::test]
async fn test_unresponsive_indexer_uses_chain() {
    struct Down;

    #[async_trait::async_trait]
    impl GraphQuery for Down {
        fn endpoint(&self) -> &str {
            "down"
        }

        async fn query(&self, _q: &str, _v: serde_json::Value) -> mixer_core::Result<serde_json::Value> {
            Err(MixerError::Indexer("connection refused".into()))
        }
    }

    let dir = tempdir().unwrap();
    let chain = Arc::new(FakeChain::new(1, 300));
    chain.push_log(deposit_log(POOL, 120, 0, &word(1)));

    let down: Arc<dyn GraphQuery> = Arc::new(Down);
    let engine = SyncEngine::new(EventStore::open(dir.path()), chain.clone())
        .with_indexers(vec![down], Duration::from_secs(1));
    let events = engine.sync::<DepositEvent>(&target(100)).await.unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(chain.windows(), vec![(100, 300)]);
}
