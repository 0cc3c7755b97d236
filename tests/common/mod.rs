//! Shared mock drivers, partition prober, and clock for the integration
//! tests.
//!
//! Each test registers its own driver instances under unique device names
//! and class ids, so cache keys never collide between tests. Tests that
//! touch the process-global registry, cache, or clock are `#[serial]`.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use nexa_diskio::{
    set_partition_prober, set_time_source, Disk, DiskDriver, DiskError, DiskParams, Partition,
    PartitionProber,
};

/// The low byte of an absolute byte index; what [`PatternDisk`] returns
/// for that byte.
pub fn pattern_byte(abs_byte: u64) -> u8 {
    abs_byte as u8
}

/// Read-only device whose byte `i` of native sector `s` reads as the low
/// byte of the absolute byte index `(s << L) + i`. Records every read as
/// `(sector, count)` in native sectors.
pub struct PatternDisk {
    pub class_id: u32,
    pub device: String,
    pub log_sector_size: u32,
    /// In native sectors; `None` simulates a device of unknown size.
    pub total_sectors: Option<u64>,
    pub reads: Mutex<Vec<(u64, u64)>>,
    pub opens: Mutex<Vec<String>>,
    pub closes: AtomicU64,
}

impl PatternDisk {
    pub fn new(class_id: u32, device: &str, log_sector_size: u32, total_sectors: Option<u64>) -> Self {
        Self {
            class_id,
            device: device.into(),
            log_sector_size,
            total_sectors,
            reads: Mutex::new(Vec::new()),
            opens: Mutex::new(Vec::new()),
            closes: AtomicU64::new(0),
        }
    }

    pub fn read_trace(&self) -> Vec<(u64, u64)> {
        self.reads.lock().unwrap().clone()
    }

    pub fn clear_trace(&self) {
        self.reads.lock().unwrap().clear();
    }
}

impl DiskDriver for PatternDisk {
    fn name(&self) -> &str {
        "pattern"
    }

    fn class_id(&self) -> u32 {
        self.class_id
    }

    fn open(&self, name: &str) -> Result<DiskParams, DiskError> {
        self.opens.lock().unwrap().push(name.into());
        if name != self.device {
            return Err(DiskError::UnknownDevice(name.into()));
        }
        Ok(DiskParams {
            id: 1,
            total_sectors: self.total_sectors,
            log_sector_size: self.log_sector_size,
        })
    }

    fn close(&self, _disk: &Disk) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn read(&self, _disk: &Disk, sector: u64, count: u64, buf: &mut [u8]) -> Result<(), DiskError> {
        if let Some(total) = self.total_sectors {
            if sector + count > total {
                return Err(DiskError::Io);
            }
        }
        self.reads.lock().unwrap().push((sector, count));
        let base = sector << self.log_sector_size;
        let len = (count << self.log_sector_size) as usize;
        for (i, byte) in buf[..len].iter_mut().enumerate() {
            *byte = pattern_byte(base + i as u64);
        }
        Ok(())
    }
}

/// Writable device backed by an in-memory image, recording reads and
/// writes as `(sector, count)` in native sectors.
pub struct MemDisk {
    pub class_id: u32,
    pub device: String,
    pub log_sector_size: u32,
    pub data: Mutex<Vec<u8>>,
    pub reads: Mutex<Vec<(u64, u64)>>,
    pub writes: Mutex<Vec<(u64, u64)>>,
    pub read_only: bool,
    /// When set, every write fails with this error after being recorded.
    pub write_error: Option<DiskError>,
}

impl MemDisk {
    pub fn new(class_id: u32, device: &str, log_sector_size: u32, data: Vec<u8>) -> Self {
        assert_eq!(data.len() & ((1 << log_sector_size) - 1), 0);
        Self {
            class_id,
            device: device.into(),
            log_sector_size,
            data: Mutex::new(data),
            reads: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            read_only: false,
            write_error: None,
        }
    }

    /// An image where every byte is the low byte of its index.
    pub fn patterned(class_id: u32, device: &str, log_sector_size: u32, bytes: usize) -> Self {
        let data = (0..bytes).map(|i| pattern_byte(i as u64)).collect();
        Self::new(class_id, device, log_sector_size, data)
    }

    pub fn total_sectors(&self) -> u64 {
        (self.data.lock().unwrap().len() >> self.log_sector_size) as u64
    }

    pub fn byte_at(&self, index: usize) -> u8 {
        self.data.lock().unwrap()[index]
    }

    pub fn read_trace(&self) -> Vec<(u64, u64)> {
        self.reads.lock().unwrap().clone()
    }

    pub fn write_trace(&self) -> Vec<(u64, u64)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn clear_traces(&self) {
        self.reads.lock().unwrap().clear();
        self.writes.lock().unwrap().clear();
    }
}

impl DiskDriver for MemDisk {
    fn name(&self) -> &str {
        "memdisk"
    }

    fn class_id(&self) -> u32 {
        self.class_id
    }

    fn open(&self, name: &str) -> Result<DiskParams, DiskError> {
        if name != self.device {
            return Err(DiskError::UnknownDevice(name.into()));
        }
        Ok(DiskParams {
            id: 1,
            total_sectors: Some(self.total_sectors()),
            log_sector_size: self.log_sector_size,
        })
    }

    fn read(&self, _disk: &Disk, sector: u64, count: u64, buf: &mut [u8]) -> Result<(), DiskError> {
        self.reads.lock().unwrap().push((sector, count));
        let data = self.data.lock().unwrap();
        let start = (sector << self.log_sector_size) as usize;
        let len = (count << self.log_sector_size) as usize;
        if start + len > data.len() {
            return Err(DiskError::Io);
        }
        buf[..len].copy_from_slice(&data[start..start + len]);
        Ok(())
    }

    fn write(&self, _disk: &Disk, sector: u64, count: u64, buf: &[u8]) -> Result<(), DiskError> {
        if self.read_only {
            return Err(DiskError::ReadOnly);
        }
        self.writes.lock().unwrap().push((sector, count));
        if let Some(err) = &self.write_error {
            return Err(err.clone());
        }
        let mut data = self.data.lock().unwrap();
        let start = (sector << self.log_sector_size) as usize;
        let len = (count << self.log_sector_size) as usize;
        if start + len > data.len() {
            return Err(DiskError::Io);
        }
        data[start..start + len].copy_from_slice(&buf[..len]);
        Ok(())
    }
}

/// Driver that claims every name but fails the open with an I/O error,
/// for short-circuit tests.
pub struct BrokenDriver {
    pub class_id: u32,
}

impl DiskDriver for BrokenDriver {
    fn name(&self) -> &str {
        "broken"
    }

    fn class_id(&self) -> u32 {
        self.class_id
    }

    fn open(&self, _name: &str) -> Result<DiskParams, DiskError> {
        Err(DiskError::Io)
    }

    fn read(&self, _disk: &Disk, _sector: u64, _count: u64, _buf: &mut [u8]) -> Result<(), DiskError> {
        Err(DiskError::Io)
    }
}

/// Prober resolving fixed specification strings to partition chains.
pub struct TableProber {
    pub parts: Vec<(String, Partition)>,
}

impl TableProber {
    /// Install a prober mapping each `(spec, partition)` pair.
    pub fn install(parts: Vec<(&str, Partition)>) {
        let parts = parts
            .into_iter()
            .map(|(spec, part)| (String::from(spec), part))
            .collect();
        set_partition_prober(Some(Arc::new(TableProber { parts })));
    }
}

impl PartitionProber for TableProber {
    fn probe(&self, _disk: &mut Disk, spec: &str) -> Result<Partition, DiskError> {
        self.parts
            .iter()
            .find(|(s, _)| s == spec)
            .map(|(_, p)| p.clone())
            .ok_or(DiskError::UnknownPartition)
    }
}

/// A flat (non-nested) partition.
pub fn flat_partition(start: u64, len: u64) -> Partition {
    Partition {
        start,
        len,
        parent: None,
    }
}

static CLOCK_MS: AtomicU64 = AtomicU64::new(0);

fn mock_clock() -> u64 {
    CLOCK_MS.load(Ordering::SeqCst)
}

/// Install the mock clock and set it to `ms`.
pub fn install_clock(ms: u64) {
    CLOCK_MS.store(ms, Ordering::SeqCst);
    set_time_source(mock_clock);
}

/// Advance the mock clock by `ms`.
pub fn advance_clock(ms: u64) {
    CLOCK_MS.fetch_add(ms, Ordering::SeqCst);
}
