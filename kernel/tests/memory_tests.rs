//! Frame cache and MMU properties

mod common;

use common::{make_mmu, make_window, MemDisk};
use loam_kernel::layout::{CACHED_NFRAMES, PAGE_SIZE};
use loam_kernel::mm::FrameCache;
use loam_kernel::process::Pid;

fn page_of(byte: u8) -> [u8; PAGE_SIZE] {
    [byte; PAGE_SIZE]
}

#[test]
fn cache_round_trips_within_capacity() {
    let mut disk = MemDisk::new(512);
    let mut cache = FrameCache::new(make_window(4), 0x1234);

    for frame_id in 0..4u32 {
        cache
            .write(&mut disk, Pid(1), frame_id, &page_of(frame_id as u8))
            .unwrap();
    }
    for frame_id in 0..4u32 {
        let page = cache.read(&mut disk, Pid(1), frame_id, false).unwrap();
        assert!(page.0.iter().all(|&b| b == frame_id as u8));
    }
    // Everything resident: the backing store was never touched
    assert_eq!(disk.reads, 0);
}

#[test]
fn cache_round_trips_past_capacity() {
    // Two owners so eviction always has a victim, 3x the window size
    let mut disk = MemDisk::new(2048);
    let mut cache = FrameCache::new(make_window(8), 0x5EED);

    let frames: Vec<(Pid, u32)> = (0..24u32)
        .map(|i| (Pid(1 + (i % 2) as i32), i))
        .collect();

    for &(pid, frame_id) in &frames {
        cache
            .write(&mut disk, pid, frame_id, &page_of(frame_id as u8))
            .unwrap();
    }
    for &(pid, frame_id) in &frames {
        let page = cache.read(&mut disk, pid, frame_id, false).unwrap();
        assert!(
            page.0.iter().all(|&b| b == frame_id as u8),
            "frame {} lost its bytes across eviction",
            frame_id
        );
    }
    // Far more frames than slots: eviction must have written back
    assert!(disk.writes > 0);
}

#[test]
fn eviction_never_displaces_the_requesting_pid() {
    let mut disk = MemDisk::new(2048);
    let mut cache = FrameCache::new(make_window(6), 7);

    // pid 1 holds half the slots, pid 2 the other half
    for frame_id in 0..3u32 {
        cache.read(&mut disk, Pid(1), frame_id, true).unwrap();
    }
    for frame_id in 100..103u32 {
        cache.read(&mut disk, Pid(2), frame_id, true).unwrap();
    }

    for round in 3..20u32 {
        // pid 2 pulls one in so pid 1 always has a victim available
        cache.read(&mut disk, Pid(2), 200 + round, true).unwrap();

        // Whatever pid 1 owns right now must survive pid 1's own miss
        let owned: Vec<u32> = (0..250u32)
            .filter(|&f| cache.resident_owner(f) == Some(Pid(1)))
            .collect();

        cache.read(&mut disk, Pid(1), round, true).unwrap();
        for frame_id in owned {
            assert_eq!(
                cache.resident_owner(frame_id),
                Some(Pid(1)),
                "pid 1's miss displaced its own frame {}",
                frame_id
            );
        }
    }
}

#[test]
fn pinned_slots_survive_any_pressure() {
    let mut disk = MemDisk::new(2048);
    let mut cache = FrameCache::new(make_window(4), 99);

    cache.write(&mut disk, Pid(1), 7, &page_of(0x77)).unwrap();
    cache.pin(Pid(1), 7);

    // Two other pids churn the rest of the window between them
    for frame_id in 10..40u32 {
        let pid = Pid(2 + (frame_id % 2) as i32);
        cache.read(&mut disk, pid, frame_id, true).unwrap();
    }
    assert_eq!(cache.resident_owner(7), Some(Pid(1)));

    cache.unpin(Pid(1), 7);
    let page = cache.read(&mut disk, Pid(1), 7, false).unwrap();
    assert!(page.0.iter().all(|&b| b == 0x77));
}

#[test]
fn invalidate_frees_the_slot_without_writeback() {
    let mut disk = MemDisk::new(512);
    let mut cache = FrameCache::new(make_window(2), 3);

    cache.write(&mut disk, Pid(1), 5, &page_of(0xAA)).unwrap();
    let writes_before = disk.writes;
    cache.invalidate(5);

    assert_eq!(cache.resident_owner(5), None);
    assert_eq!(disk.writes, writes_before);
}

#[test]
fn default_window_size_matches_the_constrained_target() {
    // 28 slots * 4 KiB = 112 KiB
    assert_eq!(CACHED_NFRAMES * PAGE_SIZE, 112 * 1024);
}

#[test]
fn map_twice_returns_the_same_physical_page() {
    let mut mmu = make_mmu(16);
    let pid = Pid(5);

    let first = mmu.map(pid, 0x3000_2000).unwrap();
    let frames = mmu.core().in_use_count();
    let second = mmu.map(pid, 0x3000_2000).unwrap();

    assert_eq!(first, second);
    assert_eq!(mmu.core().in_use_count(), frames);
}

#[test]
fn find_is_map_without_side_effects_on_existing_mappings() {
    let mut mmu = make_mmu(16);
    let pid = Pid(1);

    let mapped = mmu.map(pid, 0x3000_0000).unwrap();
    assert_eq!(mmu.find(pid, 0x3000_0000).unwrap(), mapped);
    assert_eq!(mmu.find(pid, 0x3000_0ABC).unwrap(), mapped);
}

#[test]
fn free_then_realloc_sees_clean_page_tables() {
    let mut mmu = make_mmu(16);
    let pid = Pid(2);

    let paddr = mmu.map(pid, 0x3000_0000).unwrap();
    mmu.page_at(paddr).unwrap().fill(0xFF);
    mmu.free(pid);
    assert_eq!(mmu.core().in_use_count(), 0);

    let paddr = mmu.map(pid, 0x3000_0000).unwrap();
    assert!(mmu.page_at(paddr).unwrap().0.iter().all(|&b| b == 0));
}

#[test]
fn address_spaces_are_disjoint() {
    let mut mmu = make_mmu(16);
    let a = mmu.map(Pid(1), 0x3000_0000).unwrap();
    let b = mmu.map(Pid(2), 0x3000_0000).unwrap();
    assert_ne!(a, b);
}
