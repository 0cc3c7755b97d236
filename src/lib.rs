//! Generic disk access layer for the boot environment.
//!
//! This crate provides byte-granular, partition-relative, cached read/write
//! access on top of sector-granular block device drivers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────────┐     ┌────────────────┐
//! │ filesystem  │────▶│   disk layer    │────▶│  block drivers │
//! │ layer       │     │  (this crate)   │     │  (DiskDriver)  │
//! └─────────────┘     └────────┬────────┘     └────────────────┘
//!                              │
//!                              ▼
//!                     ┌─────────────────┐
//!                     │  sector cache   │
//!                     │ (direct-mapped) │
//!                     └─────────────────┘
//! ```
//!
//! Drivers register through [`register_driver`]. [`Disk::open`] resolves a
//! device name (optionally carrying a partition specification) against the
//! registry, and the resulting handle serves [`Disk::read`] and
//! [`Disk::write`] requests addressed in 512-byte logical sectors,
//! regardless of the device's native sector size. Every read is funneled
//! through a fixed-size direct-mapped cache of sector clusters shared by
//! all open disks; adjacent uncached clusters are agglomerated into a
//! single device request.
//!
//! The layer is single-threaded cooperative: there is one logical caller at
//! a time, and driver callbacks as well as read hooks run on the caller's
//! thread. Partition-table parsing is not part of this crate; a
//! [`PartitionProber`] is installed by whoever knows the on-disk formats.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod cache;
mod disk;
mod driver;
mod error;
mod io;
mod partition;
pub mod ramdisk;

#[cfg(feature = "cache_stats")]
pub use cache::cache_stats;
pub use cache::{
    cache_invalidate_all, CACHE_BITS, CACHE_CLUSTER_BYTES, CACHE_CLUSTER_SECTORS, CACHE_SLOTS,
};
pub use disk::{set_time_source, Disk, ReadHook, CLOSE_REUSE_WINDOW_MS};
pub use driver::{register_driver, unregister_driver, DiskDriver, DiskParams};
pub use error::DiskError;
pub use partition::{set_partition_prober, Partition, PartitionProber};

/// Log2 of the logical sector size. All addresses and sizes of the public
/// API are expressed in logical sectors of `1 << SECTOR_BITS` bytes.
pub const SECTOR_BITS: u32 = 9;

/// The logical sector size in bytes.
pub const SECTOR_SIZE: u64 = 1 << SECTOR_BITS;
