//! Direct-mapped cache of sector clusters.
//!
//! One process-wide table caches fixed-size cluster buffers keyed by
//! `(class_id, disk_id, cluster_sector)`. Each key hashes to exactly one
//! slot; a colliding store evicts whatever the slot held. There is no LRU
//! and no reference counting: a fetched buffer is borrowed only for the
//! duration of the copy, and the slot owns it otherwise.

use alloc::{boxed::Box, vec::Vec};
use spin::Mutex;

use crate::{DiskError, SECTOR_BITS};

/// Log2 of the cluster size in logical sectors.
pub const CACHE_BITS: u32 = 6;
/// Cluster size in logical sectors, the granularity of cache lookups.
pub const CACHE_CLUSTER_SECTORS: u64 = 1 << CACHE_BITS;
/// Cluster size in bytes, the unit of cache storage.
pub const CACHE_CLUSTER_BYTES: usize = 1 << (CACHE_BITS + SECTOR_BITS);
/// Number of cache slots. Prime, so the index mixing spreads keys well.
pub const CACHE_SLOTS: usize = 1021;

const CLASS_PRIME: u64 = 524287;
const DISK_PRIME: u64 = 2606459;

struct CacheEntry {
    class_id: u32,
    disk_id: u64,
    /// Cluster-aligned logical sector.
    sector: u64,
    /// Cluster buffer; the slot is occupied iff this is `Some`.
    data: Option<Box<[u8]>>,
}

impl CacheEntry {
    const EMPTY: CacheEntry = CacheEntry {
        class_id: 0,
        disk_id: 0,
        sector: 0,
        data: None,
    };

    fn matches(&self, class_id: u32, disk_id: u64, sector: u64) -> bool {
        self.class_id == class_id && self.disk_id == disk_id && self.sector == sector
    }
}

pub(crate) struct SectorCache {
    slots: [CacheEntry; CACHE_SLOTS],
    #[cfg(feature = "cache_stats")]
    hits: u64,
    #[cfg(feature = "cache_stats")]
    misses: u64,
}

/// The process-wide cache shared by all open disks. Entries outlive disk
/// handles; `Disk::open` purges the table when the device set may have
/// changed while no handle was live.
pub(crate) static SECTOR_CACHE: Mutex<SectorCache> = Mutex::new(SectorCache::new());

impl SectorCache {
    const fn new() -> Self {
        Self {
            slots: [CacheEntry::EMPTY; CACHE_SLOTS],
            #[cfg(feature = "cache_stats")]
            hits: 0,
            #[cfg(feature = "cache_stats")]
            misses: 0,
        }
    }

    /// Slot index for a key. The mixing constants are fixed so that tests
    /// can construct targeted collisions.
    fn index(class_id: u32, disk_id: u64, sector: u64) -> usize {
        let mix = (class_id as u64)
            .wrapping_mul(CLASS_PRIME)
            .wrapping_add(disk_id.wrapping_mul(DISK_PRIME))
            .wrapping_add(sector >> CACHE_BITS);
        (mix % CACHE_SLOTS as u64) as usize
    }

    /// Look up the cluster starting at `sector` (cluster-aligned).
    ///
    /// The returned borrow must end before any other cache call.
    pub(crate) fn fetch(&mut self, class_id: u32, disk_id: u64, sector: u64) -> Option<&[u8]> {
        let index = Self::index(class_id, disk_id, sector);
        let hit = {
            let entry = &self.slots[index];
            entry.data.is_some() && entry.matches(class_id, disk_id, sector)
        };
        #[cfg(feature = "cache_stats")]
        {
            if hit {
                self.hits += 1;
            } else {
                self.misses += 1;
            }
        }
        if hit {
            self.slots[index].data.as_deref()
        } else {
            None
        }
    }

    /// Insert a copy of `data` (one full cluster) under the given key.
    ///
    /// Whatever the slot held is evicted first. On allocation failure the
    /// slot is left empty; the caller's data was already delivered, so the
    /// cache simply does not warm.
    pub(crate) fn store(
        &mut self,
        class_id: u32,
        disk_id: u64,
        sector: u64,
        data: &[u8],
    ) -> Result<(), DiskError> {
        debug_assert_eq!(data.len(), CACHE_CLUSTER_BYTES);
        let entry = &mut self.slots[Self::index(class_id, disk_id, sector)];
        entry.data = None;

        let mut buf = Vec::new();
        buf.try_reserve_exact(CACHE_CLUSTER_BYTES)
            .map_err(|_| DiskError::OutOfMemory)?;
        buf.extend_from_slice(data);

        entry.class_id = class_id;
        entry.disk_id = disk_id;
        entry.sector = sector;
        entry.data = Some(buf.into_boxed_slice());
        Ok(())
    }

    /// Drop the cached cluster covering `sector` (any alignment).
    pub(crate) fn invalidate(&mut self, class_id: u32, disk_id: u64, sector: u64) {
        let sector = sector & !(CACHE_CLUSTER_SECTORS - 1);
        let entry = &mut self.slots[Self::index(class_id, disk_id, sector)];
        if entry.matches(class_id, disk_id, sector) {
            entry.data = None;
        }
    }

    /// Drop every cached cluster.
    pub(crate) fn invalidate_all(&mut self) {
        for entry in self.slots.iter_mut() {
            entry.data = None;
        }
    }

    #[cfg(feature = "cache_stats")]
    fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

/// Drop every cached cluster.
pub fn cache_invalidate_all() {
    SECTOR_CACHE.lock().invalidate_all();
}

/// Cumulative cache `(hits, misses)` since startup.
#[cfg(feature = "cache_stats")]
pub fn cache_stats() -> (u64, u64) {
    SECTOR_CACHE.lock().stats()
}
