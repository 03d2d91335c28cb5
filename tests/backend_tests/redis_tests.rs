//! Redis Backend Tests
//!
//! Need a reachable server: run with
//! `REDIS_URL=redis://127.0.0.1:6379/ cargo test --test redis_tests -- --ignored`
//!
//! Tests verify:
//! - The session lifecycle scenarios against a real server
//! - WATCH/MULTI/EXEC commits, and reports a conflict after a concurrent write
//! - Pooled connections survive the server dropping them
//! - Basic mode opens a connection per operation

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use harbour_session::backend::{Mutation, TxOutcome};
use harbour_session::record::{encode, timestamp_now, BincodeItemCodec, Fields};
use harbour_session::{
    BackendConfig, BackendHandle, ClientMode, Engine, HashBackend, ItemLookup, RedisBackend,
    SessionFlags, SessionItems, SessionRecord, SessionStore, StoreConfig, StoreOptions,
};

// =============================================================================
// Helper Functions
// =============================================================================

const SESSION: &str = "1234";

fn redis_url() -> Option<String> {
    match std::env::var("REDIS_URL") {
        Ok(url) if !url.is_empty() => Some(url),
        _ => {
            eprintln!("REDIS_URL not set, skipping");
            None
        }
    }
}

fn backend_config(url: &str, mode: ClientMode) -> BackendConfig {
    BackendConfig::builder()
        .hosts([url])
        .client_mode(mode)
        .pool_size(4)
        .connect_timeout(Duration::from_secs(2))
        .build()
}

/// Application id unique to one test run, so tests never share keys
fn app_id(test: &str) -> String {
    format!("harbour-test-{}-{}", test, std::process::id())
}

fn setup(url: &str, test: &str, mode: ClientMode) -> (Engine, Arc<RedisBackend>) {
    let backend = Arc::new(RedisBackend::connect(&backend_config(url, mode)).unwrap());
    let config = StoreConfig::builder(app_id(test))
        .default_timeout_minutes(20)
        .lock_poll_interval(Duration::from_millis(5))
        .options(
            StoreOptions::new()
                .lock_acquisition_timeout_seconds(0)
                .lock_timeout_seconds(30),
        )
        .build();
    let engine = Engine::open(config, BackendHandle::shared(backend.clone())).unwrap();
    backend.delete(&engine.key(SESSION)).unwrap();
    (engine, backend)
}

fn put_record(engine: &Engine, backend: &RedisBackend, record: &SessionRecord) {
    let key = engine.key(SESSION);
    backend.delete(&key).unwrap();
    backend
        .set_fields(&key, encode(record, &BincodeItemCodec).unwrap())
        .unwrap();
}

fn locked_record(lock_id: u32) -> SessionRecord {
    let mut record = SessionRecord::new(20);
    record.locked = true;
    record.lock_id = lock_id;
    record.set_lock_date(timestamp_now());
    record
}

fn felix_items() -> SessionItems {
    let mut items = SessionItems::new();
    items.set_value("name", &"Felix".to_string()).unwrap();
    items.set_value("age", &1i32).unwrap();
    items
}

fn assert_ttl_minutes(engine: &Engine, minutes: u64) {
    let ttl = engine.time_to_live(SESSION).unwrap().expect("key should expire");
    let expected = Duration::from_secs(minutes * 60);
    assert!(ttl <= expected, "ttl {:?} above {:?}", ttl, expected);
    assert!(ttl > expected - Duration::from_secs(10), "ttl {:?} far below {:?}", ttl, expected);
}

// =============================================================================
// Lifecycle Scenario Tests
// =============================================================================

#[test]
#[ignore]
fn test_create_uninitialized_item() {
    let Some(url) = redis_url() else { return };
    let (engine, _backend) = setup(&url, "create", ClientMode::Pooled);

    engine.create_uninitialized_item(SESSION, 555).unwrap();

    let record = engine.inspect(SESSION).unwrap().unwrap();
    assert!(!record.locked);
    assert_eq!(record.lock_id, 0);
    assert_eq!(record.lock_date(), SessionRecord::NO_LOCK_DATE);
    assert_eq!(record.timeout_minutes, 555);
    assert_eq!(record.flags, SessionFlags::InitializeItem);
    assert_ttl_minutes(&engine, 555);
}

#[test]
#[ignore]
fn test_remove_item_requires_matching_lock() {
    let Some(url) = redis_url() else { return };
    let (engine, backend) = setup(&url, "remove", ClientMode::Pooled);
    let record = locked_record(999);
    put_record(&engine, &backend, &record);

    engine.remove_item(SESSION, 111).unwrap();
    assert_eq!(engine.inspect(SESSION).unwrap(), Some(record));

    engine.remove_item(SESSION, 999).unwrap();
    assert!(!backend.exists(&engine.key(SESSION)).unwrap());
}

#[test]
#[ignore]
fn test_release_item_exclusive() {
    let Some(url) = redis_url() else { return };
    let (engine, backend) = setup(&url, "release", ClientMode::Pooled);
    put_record(&engine, &backend, &locked_record(222));

    engine.release_item_exclusive(SESSION, 222).unwrap();

    let record = engine.inspect(SESSION).unwrap().unwrap();
    assert!(!record.locked);
    assert_eq!(record.lock_id, 0);
    assert_eq!(record.lock_date(), SessionRecord::NO_LOCK_DATE);
    assert_ttl_minutes(&engine, 20);
}

#[test]
#[ignore]
fn test_get_item_slides_expiration() {
    let Some(url) = redis_url() else { return };
    let (engine, backend) = setup(&url, "get", ClientMode::Pooled);
    put_record(&engine, &backend, &SessionRecord::with_items(felix_items(), 80));

    let lookup = engine.get_item(SESSION).unwrap();

    let data = lookup.data().unwrap();
    assert_eq!(data.items, felix_items());
    assert_eq!(data.timeout_minutes, 80);
    assert_ttl_minutes(&engine, 80);
}

#[test]
#[ignore]
fn test_exclusive_read_locks_once() {
    let Some(url) = redis_url() else { return };
    let (engine, backend) = setup(&url, "exclusive", ClientMode::Pooled);
    put_record(&engine, &backend, &SessionRecord::with_items(felix_items(), 80));

    let first = engine.get_item_exclusive(SESSION).unwrap();
    assert_eq!(first.data().unwrap().items, felix_items());
    assert_eq!(first.lock_id(), Some(1));
    let stored = engine.inspect(SESSION).unwrap().unwrap();
    assert!((timestamp_now() - stored.lock_date()) < ChronoDuration::seconds(5));

    match engine.get_item_exclusive(SESSION).unwrap() {
        ItemLookup::Locked { lock_id, lock_age } => {
            assert_eq!(lock_id, 1);
            assert!(lock_age < Duration::from_secs(5));
        }
        other => panic!("expected Locked, got {:?}", other),
    }
}

#[test]
#[ignore]
fn test_exclusive_access_is_mutually_exclusive() {
    const WORKERS: usize = 6;
    let Some(url) = redis_url() else { return };
    let (engine, backend) = setup(&url, "mutex", ClientMode::Pooled);
    put_record(&engine, &backend, &SessionRecord::new(20));
    let engine = Arc::new(engine);
    let barrier = Arc::new(Barrier::new(WORKERS));
    let winners = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            let winners = Arc::clone(&winners);
            thread::spawn(move || {
                barrier.wait();
                if engine.get_item_exclusive(SESSION).unwrap().is_found() {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(winners.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Transaction Tests
// =============================================================================

#[test]
#[ignore]
fn test_transaction_commits() {
    let Some(url) = redis_url() else { return };
    let (engine, backend) = setup(&url, "commit", ClientMode::Pooled);
    let key = engine.key(SESSION);

    let mut seen = None;
    let outcome = backend
        .transact(&key, &mut |fields| {
            seen = Some(fields.len());
            let mut update = Fields::new();
            update.insert("created".to_string(), vec![1]);
            Ok(vec![
                Mutation::SetFields(update),
                Mutation::Expire(Duration::from_secs(60)),
            ])
        })
        .unwrap();

    assert_eq!(outcome, TxOutcome::Committed);
    assert_eq!(seen, Some(0));
    assert_eq!(backend.get_all(&key).unwrap()["created"], vec![1]);
    assert!(backend.ttl(&key).unwrap().is_some());
}

#[test]
#[ignore]
fn test_concurrent_write_aborts_transaction() {
    let Some(url) = redis_url() else { return };
    let (engine, backend) = setup(&url, "conflict", ClientMode::Pooled);
    let key = engine.key(SESSION);
    put_record(&engine, &backend, &SessionRecord::new(20));
    let mut rival = redis::Client::open(url.as_str())
        .unwrap()
        .get_connection()
        .unwrap();

    let outcome = backend
        .transact(&key, &mut |_fields| {
            // Lands between WATCH and EXEC
            redis::cmd("HSET")
                .arg(&key)
                .arg("flags")
                .arg(&1u32.to_ne_bytes()[..])
                .query::<()>(&mut rival)?;
            Ok(vec![Mutation::Delete])
        })
        .unwrap();

    assert_eq!(outcome, TxOutcome::Conflict);
    let stored = engine.inspect(SESSION).unwrap().unwrap();
    assert_eq!(stored.flags, SessionFlags::InitializeItem);
}

#[test]
#[ignore]
fn test_empty_plan_leaves_connection_usable() {
    let Some(url) = redis_url() else { return };
    let (engine, backend) = setup(&url, "unwatch", ClientMode::Pooled);
    let key = engine.key(SESSION);

    let outcome = backend.transact(&key, &mut |_fields| Ok(Vec::new())).unwrap();
    assert_eq!(outcome, TxOutcome::Committed);

    // A stale WATCH would abort the next transaction after this write
    backend.set_fields(&key, Fields::from([("a".to_string(), vec![1])])).unwrap();
    let outcome = backend
        .transact(&key, &mut |_fields| Ok(vec![Mutation::Delete]))
        .unwrap();
    assert_eq!(outcome, TxOutcome::Committed);
}

// =============================================================================
// Connection Tests
// =============================================================================

#[test]
#[ignore]
fn test_pool_replaces_killed_connections() {
    let Some(url) = redis_url() else { return };
    let (engine, backend) = setup(&url, "recycle", ClientMode::Pooled);
    let key = engine.key(SESSION);

    backend.exists(&key).unwrap();
    assert!(backend.idle_connections() >= 1);

    let mut admin = redis::Client::open(url.as_str())
        .unwrap()
        .get_connection()
        .unwrap();
    redis::cmd("CLIENT")
        .arg("KILL")
        .arg("TYPE")
        .arg("normal")
        .arg("SKIPME")
        .arg("yes")
        .query::<()>(&mut admin)
        .unwrap();

    assert!(!backend.exists(&key).unwrap());
}

#[test]
#[ignore]
fn test_basic_mode_round_trip() {
    let Some(url) = redis_url() else { return };
    let (engine, _backend) = setup(&url, "basic", ClientMode::Basic);

    engine.create_uninitialized_item(SESSION, 5).unwrap();
    let lookup = engine.get_item_exclusive(SESSION).unwrap();
    engine
        .release_item_exclusive(SESSION, lookup.lock_id().unwrap())
        .unwrap();

    assert!(!engine.inspect(SESSION).unwrap().unwrap().locked);
}
