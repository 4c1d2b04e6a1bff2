//! Integration tests: the drive loop on its background thread
//!
//! Consumers poll `test` while the loop computes, the way a simulation analysis client
//! would.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use heatcache::prelude::*;

mod common;
use common::{cache_over, memory_cache, wait_for, FlakyStore};

const TIMEOUT: Duration = Duration::from_secs(20);

#[test]
fn test_polling_sees_keys_appear() {
    let cache = memory_cache(10, 10);
    cache.start().unwrap();
    assert!(cache.scheduler().is_running());

    let _ = cache.request_range(&RangeRequest::iterations(0, 30, 5)).unwrap();
    wait_for(&cache, 30, TIMEOUT);
    cache.stop().unwrap();

    for key in (0..=30).step_by(5) {
        assert_eq!(cache.test(key), JobStatus::Exists);
        assert_eq!(cache.read(key).unwrap().iteration(), key);
    }
    assert_eq!(cache.scheduler().current_iteration(), 30);
    assert_eq!(cache.status(), CacheStatus::Ok);
}

#[test]
fn test_requests_while_running_extend_the_run() {
    let cache = memory_cache(6, 6);
    cache.start().unwrap();

    let _ = cache.request_range(&RangeRequest::iterations(0, 5, 1)).unwrap();
    wait_for(&cache, 5, TIMEOUT);
    let _ = cache.request_range(&RangeRequest::iterations(6, 12, 2)).unwrap();
    wait_for(&cache, 12, TIMEOUT);

    cache.stop().unwrap();
    assert_eq!(cache.stats().steps, 12);
}

#[test]
fn test_status_never_moves_backwards() {
    let cache = Arc::new(memory_cache(12, 12));
    let keys = [3u64, 17, 40];

    let observer = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            let mut seen = vec![JobStatus::NotScheduled; keys.len()];
            while seen.iter().any(|&status| status != JobStatus::Exists) {
                for (last, &key) in seen.iter_mut().zip(&keys) {
                    let now = cache.test(key);
                    assert!(now >= *last, "iteration {} went from {:?} to {:?}", key, last, now);
                    *last = now;
                }
            }
        })
    };

    cache.start().unwrap();
    let _ = cache.request_range(&RangeRequest::iterations(0, 40, 1)).unwrap();
    observer.join().unwrap();
    cache.stop().unwrap();
}

#[test]
fn test_concurrent_requests_schedule_each_key_once() {
    let cache = Arc::new(memory_cache(6, 6));

    let handles = (0..4u64)
        .map(|n| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let request = RangeRequest::iterations((n*5) as i64, (n*5 + 19) as i64, 1);
                cache.request_range(&request).unwrap()
            })
        })
        .collect::<Vec<_>>();

    let scheduled: usize = handles
        .into_iter()
        .map(|handle| match handle.join().unwrap() {
            Admission::Accepted { scheduled, .. } => scheduled,
            overloaded => panic!("unexpected {:?}", overloaded),
        })
        .sum();

    // keys 0..=34
    assert_eq!(scheduled, 35);
    assert_eq!(cache.load().pending, 35);
    assert_eq!(cache.stats().requests, 4);

    cache.start().unwrap();
    wait_for(&cache, 34, TIMEOUT);
    cache.stop().unwrap();
    assert_eq!(cache.load().pending, 0);
}

#[test]
fn test_loop_survives_store_outage() {
    let store = Arc::new(FlakyStore::new(6, 6));
    let cache = cache_over(Arc::clone(&store), CacheDescriptor::default());
    store.fail_next(25);

    cache.start().unwrap();
    let _ = cache.request_range(&RangeRequest::iterations(0, 8, 1)).unwrap();
    wait_for(&cache, 8, TIMEOUT);
    cache.stop().unwrap();

    // refused grids are retried behind the ones written after them
    let mut written = store.written();
    written.sort_unstable();
    written.dedup();
    assert_eq!(written, (0..=8).collect::<Vec<_>>());
    assert!(cache.stats().failed_writes >= 25);
}

#[test]
fn test_drive_and_restart_while_running() {
    let store = Arc::new(MemoryStore::new(5, 5).unwrap());
    let cache = cache_over(Arc::clone(&store), CacheDescriptor::default());
    cache.start().unwrap();

    assert!(matches!(cache.drive(false), Err(heatcache::Error::LoopRunning)));

    let _ = cache.request_range(&RangeRequest::iterations(10, 10, 1)).unwrap();
    wait_for(&cache, 10, TIMEOUT);

    // restarting keeps the loop running
    cache.restart(10).unwrap();
    assert!(cache.scheduler().is_running());
    assert_eq!(store.restart_points(), vec![10]);
    let _ = cache.request_range(&RangeRequest::iterations(13, 13, 1)).unwrap();
    wait_for(&cache, 13, TIMEOUT);
    cache.stop().unwrap();
}

#[test]
fn test_dropping_a_running_cache_stops_the_loop() {
    let cache = memory_cache(8, 8);
    cache.start().unwrap();
    let _ = cache.request_range(&RangeRequest::iterations(0, 1_000_000, 1_000_000)).unwrap();
    thread::sleep(Duration::from_millis(20));
    drop(cache);
}
