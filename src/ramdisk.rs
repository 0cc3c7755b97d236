//! RAM-backed disk driver.
//!
//! The boot environment uses memory disks for embedded images and for
//! tests. Images are registered under a name and served through the
//! regular driver interface, so they are cached and partitioned like any
//! other device.

use alloc::{string::String, vec::Vec};
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::{Disk, DiskDriver, DiskError, DiskParams, SECTOR_BITS};

/// Class id advertised by [`RamDiskDriver`].
pub const RAMDISK_CLASS_ID: u32 = 0x524d; // "RM"

struct RamDisk {
    id: u64,
    name: String,
    log_sector_size: u32,
    data: Vec<u8>,
}

/// Driver serving in-memory disk images.
///
/// Construct one, add images with [`RamDiskDriver::insert`], and register
/// it through [`crate::register_driver`].
pub struct RamDiskDriver {
    disks: Mutex<Vec<RamDisk>>,
    next_id: AtomicU64,
}

impl RamDiskDriver {
    pub fn new() -> Self {
        Self {
            disks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Add `image` under `name`, with native sectors of
    /// `1 << log_sector_size` bytes. The image length must be a multiple
    /// of the native sector size.
    pub fn insert(
        &self,
        name: &str,
        image: Vec<u8>,
        log_sector_size: u32,
    ) -> Result<(), DiskError> {
        if log_sector_size < SECTOR_BITS {
            return Err(DiskError::BadArgument(String::from(
                "sector size below 512 bytes",
            )));
        }
        if image.len() & ((1usize << log_sector_size) - 1) != 0 {
            return Err(DiskError::BadArgument(String::from(
                "image length is not a multiple of the sector size",
            )));
        }
        let mut disks = self.disks.lock();
        if disks.iter().any(|d| d.name == name) {
            return Err(DiskError::BadArgument(String::from(
                "image name already in use",
            )));
        }
        disks.push(RamDisk {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            name: String::from(name),
            log_sector_size,
            data: image,
        });
        Ok(())
    }

    /// Remove the image registered under `name`, returning its contents.
    pub fn remove(&self, name: &str) -> Option<Vec<u8>> {
        let mut disks = self.disks.lock();
        let pos = disks.iter().position(|d| d.name == name)?;
        Some(disks.remove(pos).data)
    }

    fn with_disk<R>(
        &self,
        id: u64,
        f: impl FnOnce(&mut RamDisk) -> Result<R, DiskError>,
    ) -> Result<R, DiskError> {
        let mut disks = self.disks.lock();
        let disk = disks.iter_mut().find(|d| d.id == id).ok_or(DiskError::Io)?;
        f(disk)
    }
}

impl Default for RamDiskDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn byte_range(
    disk: &RamDisk,
    sector: u64,
    count: u64,
) -> Result<(usize, usize), DiskError> {
    let start = (sector << disk.log_sector_size) as usize;
    let len = (count << disk.log_sector_size) as usize;
    let end = start.checked_add(len).ok_or(DiskError::OutOfRange)?;
    if end > disk.data.len() {
        return Err(DiskError::OutOfRange);
    }
    Ok((start, end))
}

impl DiskDriver for RamDiskDriver {
    fn name(&self) -> &str {
        "ramdisk"
    }

    fn class_id(&self) -> u32 {
        RAMDISK_CLASS_ID
    }

    fn open(&self, name: &str) -> Result<DiskParams, DiskError> {
        let disks = self.disks.lock();
        let disk = disks
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| DiskError::UnknownDevice(String::from(name)))?;
        Ok(DiskParams {
            id: disk.id,
            total_sectors: Some((disk.data.len() >> disk.log_sector_size) as u64),
            log_sector_size: disk.log_sector_size,
        })
    }

    fn read(
        &self,
        disk: &Disk,
        sector: u64,
        count: u64,
        buf: &mut [u8],
    ) -> Result<(), DiskError> {
        self.with_disk(disk.id(), |rd| {
            let (start, end) = byte_range(rd, sector, count)?;
            buf[..end - start].copy_from_slice(&rd.data[start..end]);
            Ok(())
        })
    }

    fn write(
        &self,
        disk: &Disk,
        sector: u64,
        count: u64,
        buf: &[u8],
    ) -> Result<(), DiskError> {
        self.with_disk(disk.id(), |rd| {
            let (start, end) = byte_range(rd, sector, count)?;
            rd.data[start..end].copy_from_slice(&buf[..end - start]);
            Ok(())
        })
    }
}
