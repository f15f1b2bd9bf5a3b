// Buffer cache tests

use super::*;
use crate::device::MemDevice;
use crate::types::BLOCK_SIZE;

fn mem_cache(pool_size: usize, bucket_count: usize) -> (Arc<MemDevice>, BufCache) {
    let device = Arc::new(MemDevice::new(BLOCK_SIZE));
    let cache = BufCache::init(CacheConfig::new(pool_size, bucket_count), device.clone()).unwrap();
    (device, cache)
}

fn touch(cache: &BufCache, dev: DeviceId, blockno: BlockNo) {
    let buf = cache.read_through(dev, blockno).unwrap();
    cache.release(buf);
}

/// Every slot appears in exactly one bucket
fn assert_pool_intact(cache: &BufCache) {
    let mut seen = vec![0usize; cache.pool_size()];
    for index in 0..cache.table.len() {
        for meta in cache.table.lock(index).entries() {
            seen[meta.slot] += 1;
        }
    }
    assert!(seen.iter().all(|&count| count == 1), "slots: {:?}", seen);
}

#[test]
fn test_init_distributes_round_robin() {
    let (_, cache) = mem_cache(5, 3);
    let lens: Vec<usize> = (0..3).map(|i| cache.table.lock(i).entries().len()).collect();
    assert_eq!(lens, vec![2, 2, 1]);
    assert_eq!(cache.table.lock(0).entries()[1].slot, 3);
    assert!(cache.resident_blocks().is_empty());
    assert_pool_intact(&cache);
}

#[test]
fn test_bucket_reservation_tracks_pool_size() {
    let device = Arc::new(MemDevice::new(64));
    let config = CacheConfig::new(20_000, 4_099).with_block_size(64);
    let cache = BufCache::init(config, device).unwrap();

    let reserved: usize = (0..cache.bucket_count())
        .map(|i| cache.table.lock(i).reserved())
        .sum();
    assert!(reserved >= cache.pool_size());
    assert!(reserved <= 2 * (cache.pool_size() + cache.bucket_count()));
    assert_pool_intact(&cache);
}

#[test]
fn test_rehoming_grows_bucket_past_its_share() {
    let (_, cache) = mem_cache(4, 2);
    // Blocks 10, 12, 14, 16 on device 1 all hash to bucket 1
    for blockno in [10, 12, 14, 16] {
        assert_eq!(cache.bucket_of(1, blockno), 1);
        touch(&cache, 1, blockno);
    }
    assert_eq!(cache.table.lock(0).entries().len(), 0);
    assert_eq!(cache.table.lock(1).entries().len(), 4);
    assert_eq!(cache.resident_blocks().len(), 4);
    assert_pool_intact(&cache);
}

#[test]
fn test_init_rejects_bad_config() {
    let device = Arc::new(MemDevice::new(512));
    let err = BufCache::init(CacheConfig::new(4, 2), device.clone()).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue(_)));

    let err = BufCache::init(CacheConfig::new(0, 2).with_block_size(512), device).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue(_)));
}

#[test]
fn test_read_through_loads_block() {
    let (device, cache) = mem_cache(4, 3);
    let mut content = vec![0u8; BLOCK_SIZE];
    content[..4].copy_from_slice(b"bio!");
    device.poke(1, 10, &content).unwrap();

    let buf = cache.read_through(1, 10).unwrap();
    assert!(buf.is_valid());
    assert_eq!(buf.device(), 1);
    assert_eq!(buf.block_no(), 10);
    assert_eq!(&buf.data()[..4], b"bio!");
    assert_eq!(cache.ref_count(1, 10), Some(1));
    cache.release(buf);

    assert_eq!(cache.ref_count(1, 10), Some(0));
    assert_eq!(device.reads_of(1, 10), 1);
}

#[test]
fn test_hit_skips_device() {
    let (device, cache) = mem_cache(4, 3);
    touch(&cache, 1, 10);
    touch(&cache, 1, 10);
    touch(&cache, 1, 10);

    assert_eq!(device.reads_of(1, 10), 1);
    let stats = cache.stats();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.device_reads, 1);
    assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
}

#[test]
fn test_evicts_least_recently_used() {
    let (device, cache) = mem_cache(3, 2);
    touch(&cache, 1, 10);
    touch(&cache, 1, 11);
    touch(&cache, 1, 12);

    touch(&cache, 1, 20);
    assert!(!cache.is_cached(1, 10));
    assert!(cache.is_cached(1, 11));
    assert!(cache.is_cached(1, 12));
    assert!(cache.is_cached(1, 20));

    // Block 10 comes back from the device, not from the cache
    let buf = cache.read_through(1, 10).unwrap();
    assert!(buf.is_valid());
    cache.release(buf);
    assert_eq!(device.reads_of(1, 10), 2);
    assert!(!cache.is_cached(1, 11));
    assert_eq!(cache.stats().recycles, 5);
    assert_pool_intact(&cache);
}

/// Stamps every buffer in bucket `index` with `tick`
fn stamp_bucket(cache: &BufCache, index: usize, tick: Tick) {
    let mut bucket = cache.table.lock(index);
    for pos in 0..bucket.entries().len() {
        bucket.get_mut(pos).last_used = tick;
    }
}

#[test]
fn test_lru_tie_goes_to_first_in_scan_order() {
    let (_, cache) = mem_cache(4, 2);
    // Bucket 0 holds slots 0 and 2, bucket 1 holds slots 1 and 3
    stamp_bucket(&cache, 0, 7);
    stamp_bucket(&cache, 1, 7);

    // Equal stamps across buckets: the lowest bucket index wins
    let buf = cache.read_through(1, 10).unwrap();
    assert_eq!(buf.slot(), 0);
    cache.release(buf);
    assert_eq!(
        cache.table.lock(1).entries().iter().map(|m| m.slot).collect::<Vec<_>>(),
        vec![1, 3, 0]
    );

    // Equal stamps within one bucket: list order wins
    stamp_bucket(&cache, 0, 9);
    stamp_bucket(&cache, 1, 8);
    let buf = cache.read_through(1, 12).unwrap();
    assert_eq!(buf.slot(), 1);
    cache.release(buf);
    assert!(cache.is_cached(1, 10));
}

#[test]
fn test_last_used_follows_release_order() {
    let (_, cache) = mem_cache(4, 1);
    let a = cache.read_through(1, 1).unwrap();
    let b = cache.read_through(1, 2).unwrap();
    cache.release(b);
    cache.release(a);

    let stamp_a = cache.last_used(1, 1).unwrap();
    let stamp_b = cache.last_used(1, 2).unwrap();
    assert!(stamp_b < stamp_a);

    // Block 2 was released first, so it goes first
    touch(&cache, 1, 3);
    touch(&cache, 1, 4);
    touch(&cache, 1, 5);
    assert!(!cache.is_cached(1, 2));
    assert!(cache.is_cached(1, 1));
}

#[test]
fn test_pinned_buffer_survives_eviction() {
    let (_, cache) = mem_cache(2, 1);
    let buf = cache.read_through(1, 1).unwrap();
    let block = buf.block_ref();
    cache.pin(block);
    cache.release(buf);
    assert_eq!(cache.ref_count(1, 1), Some(1));

    touch(&cache, 1, 2);
    touch(&cache, 1, 3);
    touch(&cache, 1, 4);
    assert!(cache.is_cached(1, 1));

    // Unpinning stamps block 1 after block 4, so block 4 goes first
    cache.unpin(block);
    assert_eq!(cache.ref_count(1, 1), Some(0));
    touch(&cache, 1, 5);
    assert!(cache.is_cached(1, 1));
    touch(&cache, 1, 6);
    assert!(!cache.is_cached(1, 1));
}

#[test]
fn test_unpin_stamps_last_used() {
    let (_, cache) = mem_cache(2, 1);
    let buf = cache.read_through(1, 1).unwrap();
    let block = buf.block_ref();
    cache.pin(block);
    cache.release(buf);
    let before = cache.last_used(1, 1).unwrap();

    touch(&cache, 1, 2);
    cache.unpin(block);
    let after = cache.last_used(1, 1).unwrap();
    assert!(after > before);
    assert!(after > cache.last_used(1, 2).unwrap());
}

#[test]
fn test_recycled_buffer_moves_to_new_bucket() {
    let (_, cache) = mem_cache(1, 2);
    let home_10 = cache.bucket_of(1, 10);
    let home_11 = cache.bucket_of(1, 11);
    assert_ne!(home_10, home_11);

    touch(&cache, 1, 10);
    assert_eq!(cache.buckets_holding(1, 10), vec![home_10]);

    touch(&cache, 1, 11);
    assert_eq!(cache.buckets_holding(1, 11), vec![home_11]);
    assert!(cache.buckets_holding(1, 10).is_empty());
    assert_eq!(cache.table.lock(home_10).entries().len(), 0);
    assert_eq!(cache.table.lock(home_11).entries().len(), 1);
    assert_pool_intact(&cache);
}

#[test]
fn test_recycle_in_place_keeps_bucket() {
    let (_, cache) = mem_cache(2, 1);
    touch(&cache, 1, 1);
    touch(&cache, 1, 2);
    touch(&cache, 1, 3);
    assert_eq!(cache.table.lock(0).entries().len(), 2);
    assert_eq!(cache.resident_blocks(), vec![(1, 2), (1, 3)]);
}

#[test]
fn test_persist_round_trip() {
    let (device, cache) = mem_cache(1, 1);
    let mut buf = cache.read_through(2, 5).unwrap();
    buf.data_mut()[..5].copy_from_slice(b"hello");
    cache.persist(&buf).unwrap();
    cache.release(buf);
    assert_eq!(&device.peek(2, 5).unwrap()[..5], b"hello");

    // Evict it, then read it back
    touch(&cache, 2, 6);
    assert!(!cache.is_cached(2, 5));
    let buf = cache.read_through(2, 5).unwrap();
    assert_eq!(&buf.data()[..5], b"hello");
    cache.release(buf);

    assert_eq!(device.reads_of(2, 5), 2);
    assert_eq!(cache.stats().device_writes, 1);
}

#[test]
fn test_same_block_different_devices() {
    let (_, cache) = mem_cache(4, 3);
    let mut a = cache.read_through(1, 7).unwrap();
    let b = cache.read_through(2, 7).unwrap();
    assert_ne!(a.slot(), b.slot());
    a.data_mut()[0] = 9;
    assert_eq!(b.data()[0], 0);
    cache.release(a);
    cache.release(b);
}

#[test]
fn test_read_failure_leaves_buffer_invalid() {
    let (device, cache) = mem_cache(2, 1);
    device.fail_reads(1, 4);

    let err = cache.read_through(1, 4).unwrap_err();
    assert!(matches!(err, BufferError::DeviceIo { dev: 1, blockno: 4, .. }));
    assert_eq!(cache.ref_count(1, 4), Some(0));
    assert_eq!(cache.stats().device_reads, 0);

    device.clear_failures();
    let buf = cache.read_through(1, 4).unwrap();
    assert!(buf.is_valid());
    cache.release(buf);
    assert_eq!(device.reads_of(1, 4), 1);
}

#[test]
fn test_persist_failure_keeps_buffer_held() {
    let (device, cache) = mem_cache(2, 1);
    device.fail_writes(1, 4);

    let buf = cache.read_through(1, 4).unwrap();
    let err = cache.persist(&buf).unwrap_err();
    assert!(err.to_string().contains("device 1 block 4"));
    assert_eq!(cache.ref_count(1, 4), Some(1));
    assert!(cache.slots[buf.slot()].content.holding());

    device.clear_failures();
    cache.persist(&buf).unwrap();
    cache.release(buf);
    assert_eq!(cache.stats().device_writes, 1);
}

#[test]
fn test_drop_releases_buffer() {
    let (_, cache) = mem_cache(2, 1);
    {
        let _buf = cache.read_through(1, 1).unwrap();
        assert_eq!(cache.ref_count(1, 1), Some(1));
    }
    assert_eq!(cache.ref_count(1, 1), Some(0));
    assert!(cache.last_used(1, 1).unwrap() > 0);
}

#[test]
#[should_panic(expected = "resource exhausted")]
fn test_exhausted_pool_panics() {
    let (_, cache) = mem_cache(1, 1);
    let _held = cache.read_through(1, 1).unwrap();
    let _ = cache.read_through(1, 2);
}

#[test]
#[should_panic(expected = "protocol violation")]
fn test_relock_panics() {
    let (_, cache) = mem_cache(2, 1);
    let _held = cache.read_through(1, 1).unwrap();
    let _ = cache.read_through(1, 1);
}

#[test]
#[should_panic(expected = "protocol violation")]
fn test_release_into_wrong_cache_panics() {
    let (_, first) = mem_cache(2, 1);
    let (_, second) = mem_cache(2, 1);
    let buf = first.read_through(1, 1).unwrap();
    second.release(buf);
}

#[test]
#[should_panic(expected = "protocol violation")]
fn test_persist_through_wrong_cache_panics() {
    let (_, first) = mem_cache(2, 1);
    let (_, second) = mem_cache(2, 1);
    let buf = first.read_through(1, 1).unwrap();
    let _ = second.persist(&buf);
}

#[test]
#[should_panic(expected = "no outstanding reference")]
fn test_unpin_underflow_panics() {
    let (_, cache) = mem_cache(2, 1);
    let buf = cache.read_through(1, 1).unwrap();
    let block = buf.block_ref();
    cache.release(buf);
    cache.unpin(block);
}

#[test]
#[should_panic(expected = "no longer cached")]
fn test_pin_stale_handle_panics() {
    let (_, cache) = mem_cache(1, 1);
    let buf = cache.read_through(1, 1).unwrap();
    let block = buf.block_ref();
    cache.release(buf);
    touch(&cache, 1, 2);
    cache.pin(block);
}

#[test]
fn test_fatal_error_display() {
    let err = FatalError::ResourceExhausted { dev: 1, blockno: 20 };
    assert_eq!(
        err.to_string(),
        "resource exhausted: no evictable buffer for device 1 block 20"
    );
    let err = FatalError::ProtocolViolation("release without lock".to_string());
    assert_eq!(err.to_string(), "protocol violation: release without lock");
}

#[test]
fn test_pool_stays_intact_under_churn() {
    let (_, cache) = mem_cache(7, 4);
    for round in 0..5u32 {
        for blockno in 0..20u32 {
            touch(&cache, round % 2, blockno * 3 + round);
        }
        assert_pool_intact(&cache);
        assert_eq!(cache.resident_blocks().len(), 7);
    }
}
