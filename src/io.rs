//! Byte-granular read and write engines over the sector cache.
//!
//! A read is split into a leading partial cluster, a body of whole
//! clusters, and a trailing partial cluster. The body probes the cache
//! cluster by cluster and agglomerates consecutive misses into a single
//! device request. Writes are native-sector aligned; unaligned head and
//! tail bytes go through a read-modify-write of one native sector.

use alloc::vec::Vec;
use core::cmp::min;

use crate::{
    cache::SECTOR_CACHE, Disk, DiskError, CACHE_BITS, CACHE_CLUSTER_BYTES, CACHE_CLUSTER_SECTORS,
    SECTOR_BITS, SECTOR_SIZE,
};

/// Allocate a zero-filled buffer, reporting allocation failure instead of
/// aborting.
fn alloc_buf(len: usize) -> Result<Vec<u8>, DiskError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| DiskError::OutOfMemory)?;
    buf.resize(len, 0);
    Ok(buf)
}

impl Disk {
    /// Native sector index covering logical `sector`.
    fn to_native(&self, sector: u64) -> u64 {
        sector >> (self.log_sector_size - SECTOR_BITS)
    }

    /// Read `buf.len()` bytes starting `offset` bytes into the
    /// partition-relative logical `sector`.
    pub fn read(&mut self, mut sector: u64, mut offset: u64, buf: &mut [u8]) -> Result<(), DiskError> {
        if let Err(err) = self.adjust_range(&mut sector, &mut offset, buf.len()) {
            log::debug!(
                "read on `{}` out of range: sector {:#x}",
                self.name,
                sector
            );
            return Err(err);
        }
        self.read_adjusted(sector, offset, buf)
    }

    /// Read with device-absolute addressing, skipping the partition walk.
    /// Still bounds-checked against the whole device and cache-consulting;
    /// the write engine uses this for its read-modify-write cycles.
    pub(crate) fn read_absolute(
        &mut self,
        mut sector: u64,
        mut offset: u64,
        buf: &mut [u8],
    ) -> Result<(), DiskError> {
        sector = sector
            .checked_add(offset >> SECTOR_BITS)
            .ok_or(DiskError::OutOfRange)?;
        offset &= SECTOR_SIZE - 1;
        let need = (offset + buf.len() as u64 + SECTOR_SIZE - 1) >> SECTOR_BITS;
        self.check_disk_bounds(sector, need)?;
        self.read_adjusted(sector, offset, buf)
    }

    /// The three-phase data path. `sector` and `offset` are
    /// device-absolute with `offset < 512`.
    fn read_adjusted(&mut self, mut sector: u64, offset: u64, buf: &mut [u8]) -> Result<(), DiskError> {
        let real_sector = sector;
        let real_offset = offset;
        let real_size = buf.len();

        let mut pos = 0usize;
        let mut size = buf.len();

        // Leading partial cluster. Consumes up to the next cluster
        // boundary, leaving `sector` cluster-aligned for the body.
        if offset != 0 || sector & (CACHE_CLUSTER_SECTORS - 1) != 0 {
            let start_sector = sector & !(CACHE_CLUSTER_SECTORS - 1);
            let in_cluster = ((sector - start_sector) << SECTOR_BITS) as usize;
            let len = min(CACHE_CLUSTER_BYTES - in_cluster - offset as usize, size);
            self.read_small(start_sector, in_cluster as u64 + offset, &mut buf[..len])?;
            pos += len;
            size -= len;
            sector += (offset + len as u64) >> SECTOR_BITS;
        }

        // Body of whole clusters.
        while size >= CACHE_CLUSTER_BYTES {
            let clusters_avail = (size >> (SECTOR_BITS + CACHE_BITS)) as u64;
            let mut agglomerate = 0u64;
            let mut hit = false;
            {
                // Coalesce consecutive misses until the first cached
                // cluster; a hit is copied out right here.
                let mut cache = SECTOR_CACHE.lock();
                while agglomerate < clusters_avail {
                    let cluster = sector + (agglomerate << CACHE_BITS);
                    if let Some(data) = cache.fetch(self.class_id, self.id, cluster) {
                        let at = pos + ((agglomerate as usize) << (CACHE_BITS + SECTOR_BITS));
                        buf[at..at + CACHE_CLUSTER_BYTES].copy_from_slice(data);
                        hit = true;
                        break;
                    }
                    agglomerate += 1;
                }
            }

            if agglomerate > 0 {
                let byte_len = (agglomerate as usize) << (CACHE_BITS + SECTOR_BITS);
                let native_count =
                    agglomerate << (CACHE_BITS + SECTOR_BITS - self.log_sector_size);
                let driver = self.driver.clone();
                driver.read(
                    &*self,
                    self.to_native(sector),
                    native_count,
                    &mut buf[pos..pos + byte_len],
                )?;

                let mut cache = SECTOR_CACHE.lock();
                for i in 0..agglomerate {
                    let at = pos + ((i as usize) << (CACHE_BITS + SECTOR_BITS));
                    // A failed store only means the cache does not warm.
                    let _ = cache.store(
                        self.class_id,
                        self.id,
                        sector + (i << CACHE_BITS),
                        &buf[at..at + CACHE_CLUSTER_BYTES],
                    );
                }
                sector += agglomerate << CACHE_BITS;
                pos += byte_len;
                size -= byte_len;
            }

            if hit {
                sector += CACHE_CLUSTER_SECTORS;
                pos += CACHE_CLUSTER_BYTES;
                size -= CACHE_CLUSTER_BYTES;
            }
        }

        // Trailing partial cluster; `sector` is cluster-aligned here.
        if size > 0 {
            self.read_small(sector, 0, &mut buf[pos..])?;
        }

        if let Some(hook) = self.read_hook.as_mut() {
            let mut s = real_sector;
            let mut o = real_offset;
            let mut l = real_size;
            while l > 0 {
                let cl = min((SECTOR_SIZE - o) as usize, l);
                hook(s, o, cl);
                s += 1;
                l -= cl;
                o = 0;
            }
        }

        Ok(())
    }

    /// Service a read confined to a single cluster. `sector` is
    /// cluster-aligned and `offset` is the byte position within the
    /// cluster, with `offset + buf.len() <= CACHE_CLUSTER_BYTES`.
    fn read_small(&mut self, sector: u64, offset: u64, buf: &mut [u8]) -> Result<(), DiskError> {
        {
            let mut cache = SECTOR_CACHE.lock();
            if let Some(data) = cache.fetch(self.class_id, self.id, sector) {
                let at = offset as usize;
                buf.copy_from_slice(&data[at..at + buf.len()]);
                return Ok(());
            }
        }

        // Fill the whole cluster in one device read and keep it, unless
        // the cluster would run past the end of the device.
        let cluster_in_bounds = match self.total_sectors {
            Some(total) => {
                sector + CACHE_CLUSTER_SECTORS < (total << (self.log_sector_size - SECTOR_BITS))
            }
            None => true,
        };
        if cluster_in_bounds {
            let mut cluster = alloc_buf(CACHE_CLUSTER_BYTES)?;
            let native_count = 1u64 << (CACHE_BITS + SECTOR_BITS - self.log_sector_size);
            let driver = self.driver.clone();
            if driver
                .read(&*self, self.to_native(sector), native_count, &mut cluster)
                .is_ok()
            {
                let at = offset as usize;
                buf.copy_from_slice(&cluster[at..at + buf.len()]);
                let _ = SECTOR_CACHE
                    .lock()
                    .store(self.class_id, self.id, sector, &cluster);
                return Ok(());
            }
        }

        // The cluster fill failed or was skipped; read only the native
        // sectors covering the requested range, uncached.
        let sector = sector + (offset >> SECTOR_BITS);
        let mut offset = offset & (SECTOR_SIZE - 1);
        let native_mask = (1u64 << (self.log_sector_size - SECTOR_BITS)) - 1;
        let aligned_sector = sector & !native_mask;
        offset += (sector - aligned_sector) << SECTOR_BITS;
        let num = (buf.len() as u64 + offset + (1 << self.log_sector_size) - 1)
            >> self.log_sector_size;

        let mut tmp = alloc_buf((num as usize) << self.log_sector_size)?;
        let driver = self.driver.clone();
        if let Err(err) = driver.read(&*self, self.to_native(aligned_sector), num, &mut tmp) {
            log::debug!("`{}` read failed", self.name);
            return Err(err);
        }
        let at = offset as usize;
        buf.copy_from_slice(&tmp[at..at + buf.len()]);
        Ok(())
    }

    /// Write `buf.len()` bytes starting `offset` bytes into the
    /// partition-relative logical `sector`.
    ///
    /// Unaligned head and tail bytes are merged into their native sector
    /// by a read-modify-write; the aligned body is issued as one
    /// multi-sector device write. Cache entries covering written bytes are
    /// invalidated before each device write.
    pub fn write(&mut self, mut sector: u64, mut offset: u64, buf: &[u8]) -> Result<(), DiskError> {
        log::debug!("writing `{}`", self.name);
        self.adjust_range(&mut sector, &mut offset, buf.len())?;

        let native_size = 1usize << self.log_sector_size;
        let native_step = 1u64 << (self.log_sector_size - SECTOR_BITS);

        // Align down to a native sector, folding the displacement into the
        // byte offset.
        let aligned = sector & !(native_step - 1);
        let mut in_sector = (offset + ((sector - aligned) << SECTOR_BITS)) as usize;
        let mut sector = aligned;

        let mut pos = 0usize;
        let mut size = buf.len();
        while size > 0 {
            if in_sector != 0 || size < native_size {
                // Read-modify-write of one native sector. Addressing is
                // absolute at this point, so the partition walk is
                // skipped.
                let mut tmp = alloc_buf(native_size)?;
                self.read_absolute(sector, 0, &mut tmp)?;

                let len = min(native_size - in_sector, size);
                tmp[in_sector..in_sector + len].copy_from_slice(&buf[pos..pos + len]);

                SECTOR_CACHE
                    .lock()
                    .invalidate(self.class_id, self.id, sector);
                let driver = self.driver.clone();
                driver.write(&*self, self.to_native(sector), 1, &tmp)?;

                sector += native_step;
                pos += len;
                size -= len;
                in_sector = 0;
            } else {
                let n = (size >> self.log_sector_size) as u64;
                let len = size & !(native_size - 1);

                {
                    let mut cache = SECTOR_CACHE.lock();
                    for i in 0..n {
                        cache.invalidate(self.class_id, self.id, sector + i * native_step);
                    }
                }
                let driver = self.driver.clone();
                driver.write(&*self, self.to_native(sector), n, &buf[pos..pos + len])?;

                sector += n * native_step;
                pos += len;
                size -= len;
            }
        }

        Ok(())
    }
}
