use std::error::Error;

use stax::cache::HitCache;
use stax_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn least_recently_used_entry_is_evicted_first() -> TestResult {
    init_tracing();

    let mut cache: HitCache<&str, u32> = HitCache::new(2);
    cache.insert("a", 1);
    cache.insert("b", 2);

    // Touch "a" so "b" becomes the eviction candidate.
    assert_eq!(cache.get(&"a"), Some(1));
    cache.insert("c", 3);

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get(&"b"), None);
    assert_eq!(cache.get(&"a"), Some(1));
    assert_eq!(cache.get(&"c"), Some(3));
    Ok(())
}

#[test]
fn hits_are_counted_and_reset_on_replace() -> TestResult {
    init_tracing();

    let mut cache: HitCache<String, u32> = HitCache::new(4);
    let key = "expr".to_string();
    cache.insert(key.clone(), 1);
    cache.get(&key);
    cache.get(&key);
    assert_eq!(cache.hits(&key), 2);

    cache.insert(key.clone(), 2);
    assert_eq!(cache.hits(&key), 0);
    assert_eq!(cache.get(&key), Some(2));
    assert_eq!(cache.hits(&"missing".to_string()), 0);
    Ok(())
}

#[test]
fn failed_fill_leaves_no_entry() -> TestResult {
    init_tracing();

    let mut cache: HitCache<&str, u32> = HitCache::new(4);
    let failed: Result<u32, &str> = cache.get_or_try_insert_with(&"k", || Err("boom"));
    assert_eq!(failed, Err("boom"));
    assert!(cache.is_empty());

    let filled: Result<u32, &str> = cache.get_or_try_insert_with(&"k", || Ok(7));
    assert_eq!(filled, Ok(7));
    let cached: Result<u32, &str> = cache.get_or_try_insert_with(&"k", || Err("not called"));
    assert_eq!(cached, Ok(7));
    assert_eq!(cache.hits(&"k"), 1);
    Ok(())
}

#[test]
fn zero_capacity_holds_one_entry_and_invalidate_drops_it() -> TestResult {
    init_tracing();

    let mut cache: HitCache<&str, u32> = HitCache::new(0);
    assert_eq!(cache.capacity(), 1);
    cache.insert("a", 1);
    cache.insert("b", 2);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get(&"b"), Some(2));

    cache.invalidate(&"b");
    assert!(cache.is_empty());
    Ok(())
}
