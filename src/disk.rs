//! Disk handles: name resolution, lifecycle, and addressing.

use alloc::{boxed::Box, string::String, sync::Arc};
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::{
    cache::SECTOR_CACHE, driver, partition, DiskDriver, DiskError, Partition, CACHE_BITS,
    SECTOR_BITS, SECTOR_SIZE,
};

/// Reopening a disk within this window of a close keeps the cache warm.
/// Past it, the whole cache is purged on open: while no handle was live the
/// device may have been swapped.
pub const CLOSE_REUSE_WINDOW_MS: u64 = 2000;

/// Read hook: called once per logical sector touched by a completed read,
/// as `(sector, offset_within_sector, length)`.
pub type ReadHook = Box<dyn FnMut(u64, u64, usize) + Send>;

/// Millisecond timestamp of the last open or close, for the reuse window.
static LAST_ACCESS_MS: AtomicU64 = AtomicU64::new(0);

/// Injected millisecond clock. The boot environment has no ambient time
/// source, so one is registered explicitly; until then the stale-reopen
/// purge stays inert.
static TIME_SOURCE: Mutex<Option<fn() -> u64>> = Mutex::new(None);

/// Install the millisecond clock used for the cache reuse window.
pub fn set_time_source(source: fn() -> u64) {
    *TIME_SOURCE.lock() = Some(source);
}

fn now_ms() -> u64 {
    match *TIME_SOURCE.lock() {
        Some(source) => source(),
        None => 0,
    }
}

/// An open handle to a block device or to one of its partitions.
///
/// Created by [`Disk::open`], destroyed by [`Disk::close`] or by dropping.
/// Addresses passed to [`Disk::read`]/[`Disk::write`] are relative to the
/// innermost partition, in 512-byte logical sectors.
pub struct Disk {
    pub(crate) name: String,
    pub(crate) driver: Arc<dyn DiskDriver>,
    pub(crate) class_id: u32,
    pub(crate) id: u64,
    /// Log2 of the native sector size (`L`), `9 <= L <= 9 + CACHE_BITS`.
    pub(crate) log_sector_size: u32,
    /// Device size in native sectors, `None` when the driver cannot tell.
    pub(crate) total_sectors: Option<u64>,
    /// Partition chain, innermost first.
    pub(crate) partition: Option<Box<Partition>>,
    pub(crate) read_hook: Option<ReadHook>,
}

impl Disk {
    /// Open `name`, which is `device` optionally followed by
    /// `,partition-spec`. A literal comma in the device part is escaped as
    /// `\,`.
    ///
    /// The device part is offered to every registered driver in turn; the
    /// first driver that claims it wins. With a partition specification,
    /// the installed [`crate::PartitionProber`] resolves the chain.
    pub fn open(name: &str) -> Result<Disk, DiskError> {
        log::debug!("opening `{name}`");
        Self::open_inner(name).map_err(|err| {
            log::debug!("opening `{name}` failed: {err}");
            err
        })
    }

    fn open_inner(name: &str) -> Result<Disk, DiskError> {
        let (raw, part_spec) = split_name(name)?;

        let mut claimed = None;
        for drv in driver::drivers() {
            match drv.open(&raw) {
                Ok(params) => {
                    claimed = Some((drv, params));
                    break;
                }
                // "Not mine": try the next driver.
                Err(DiskError::UnknownDevice(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        let Some((drv, params)) = claimed else {
            return Err(DiskError::UnknownDevice(String::from(name)));
        };

        let mut disk = Disk {
            name: raw,
            class_id: drv.class_id(),
            driver: drv,
            id: params.id,
            log_sector_size: params.log_sector_size,
            total_sectors: params.total_sectors,
            partition: None,
            read_hook: None,
        };

        // From here on, an early return drops `disk`, which runs the
        // driver's close and updates the access timestamp.
        if disk.log_sector_size < SECTOR_BITS || disk.log_sector_size > SECTOR_BITS + CACHE_BITS {
            return Err(DiskError::NotImplemented(
                1u64.checked_shl(disk.log_sector_size).unwrap_or(u64::MAX),
            ));
        }

        if let Some(spec) = part_spec {
            let prober = partition::prober().ok_or(DiskError::UnknownPartition)?;
            let part = prober
                .probe(&mut disk, spec)
                .map_err(|_| DiskError::UnknownPartition)?;
            disk.partition = Some(Box::new(part));
        }

        let current_time = now_ms();
        if current_time > LAST_ACCESS_MS.load(Ordering::Relaxed) + CLOSE_REUSE_WINDOW_MS {
            SECTOR_CACHE.lock().invalidate_all();
        }
        LAST_ACCESS_MS.store(current_time, Ordering::Relaxed);

        Ok(disk)
    }

    /// Close the disk. Equivalent to dropping the handle.
    pub fn close(self) {}

    /// The device name this handle was opened with, without the partition
    /// specification and with escapes resolved.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Driver-assigned instance id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Class id of the owning driver.
    pub fn class_id(&self) -> u32 {
        self.class_id
    }

    /// Log2 of the native sector size in bytes.
    pub fn log_sector_size(&self) -> u32 {
        self.log_sector_size
    }

    /// Device size in native sectors, if known.
    pub fn total_sectors(&self) -> Option<u64> {
        self.total_sectors
    }

    /// The partition chain this handle addresses, innermost first.
    pub fn partition(&self) -> Option<&Partition> {
        self.partition.as_deref()
    }

    /// Logical size in 512-byte sectors: the innermost partition's length
    /// if partitioned, else the whole device, else `None` when the driver
    /// does not know the device size.
    pub fn size(&self) -> Option<u64> {
        if let Some(part) = &self.partition {
            Some(part.len)
        } else {
            self.total_sectors
                .map(|total| total << (self.log_sector_size - SECTOR_BITS))
        }
    }

    /// Install (or clear) the read hook, called once per logical sector
    /// after each successful [`Disk::read`].
    pub fn set_read_hook(&mut self, hook: Option<ReadHook>) {
        self.read_hook = hook;
    }

    /// Translate a partition-relative `(sector, offset)` into
    /// device-absolute coordinates, normalizing `offset` below the logical
    /// sector size and verifying that the `size`-byte range stays inside
    /// every enclosing partition and inside the disk.
    pub(crate) fn adjust_range(
        &self,
        sector: &mut u64,
        offset: &mut u64,
        size: usize,
    ) -> Result<(), DiskError> {
        *sector = sector
            .checked_add(*offset >> SECTOR_BITS)
            .ok_or(DiskError::OutOfRange)?;
        *offset &= SECTOR_SIZE - 1;

        let need = (*offset + size as u64 + SECTOR_SIZE - 1) >> SECTOR_BITS;

        let mut part = self.partition.as_deref();
        while let Some(p) = part {
            // Test `sector < len` before forming `len - sector`.
            if *sector >= p.len || p.len - *sector < need {
                return Err(DiskError::OutOfRange);
            }
            *sector = sector.checked_add(p.start).ok_or(DiskError::OutOfRange)?;
            part = p.parent.as_deref();
        }

        self.check_disk_bounds(*sector, need)
    }

    /// Containment of `need` logical sectors at absolute `sector` within
    /// the device, when its size is known.
    pub(crate) fn check_disk_bounds(&self, sector: u64, need: u64) -> Result<(), DiskError> {
        if let Some(total) = self.total_sectors {
            let total = total << (self.log_sector_size - SECTOR_BITS);
            if total <= sector || need > total - sector {
                return Err(DiskError::OutOfRange);
            }
        }
        Ok(())
    }
}

impl Drop for Disk {
    fn drop(&mut self) {
        log::debug!("closing `{}`", self.name);
        let driver = self.driver.clone();
        driver.close(self);
        // Reset the reuse-window timer; a quick reopen keeps the cache.
        LAST_ACCESS_MS.store(now_ms(), Ordering::Relaxed);
    }
}

impl fmt::Debug for Disk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disk")
            .field("name", &self.name)
            .field("class_id", &self.class_id)
            .field("id", &self.id)
            .field("log_sector_size", &self.log_sector_size)
            .field("total_sectors", &self.total_sectors)
            .field("partition", &self.partition)
            .finish_non_exhaustive()
    }
}

/// Split `name` into the unescaped device part and the optional partition
/// specification. The first comma not escaped by a backslash separates the
/// two; `\,` in the device part denotes a literal comma. No other escape is
/// defined.
fn split_name(name: &str) -> Result<(String, Option<&str>), DiskError> {
    if name.is_empty() {
        return Err(DiskError::BadArgument(String::from("empty device name")));
    }
    let mut device = String::new();
    let mut chars = name.char_indices();
    while let Some((pos, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, ',')) => device.push(','),
                Some((_, other)) => {
                    device.push('\\');
                    device.push(other);
                }
                None => device.push('\\'),
            },
            ',' => {
                let spec = &name[pos + 1..];
                if spec.is_empty() {
                    return Err(DiskError::BadArgument(String::from(
                        "empty partition specification",
                    )));
                }
                return Ok((device, Some(spec)));
            }
            _ => device.push(c),
        }
    }
    Ok((device, None))
}
