//! The critical data store

use crate::extent::ExtentMap;
use crate::layout::{
    entry_footprint, signatures_intact, CdsLayout, RegistryRecord, Superblock, BEGIN_SIGNATURE,
    CRC_LEN, END_SIGNATURE, MAX_FULL_NAME_LEN, RECORD_LEN, SUPERBLOCK_LEN,
};
use crate::name::CdsName;
use core_types::{PlatformConfig, ResourceError, Result};
use hal::{crc32, NonVolatileMemory, ResetType};
use parking_lot::Mutex;
use resources::{ResourceId, ResourceKind, ResourceRegistry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Handle of a CDS block; a [`ResourceId`] of kind `CdsBlock`
pub type CdsHandle = ResourceId;

/// Outcome of [`CriticalDataStore::register`]
///
/// `Existing` means the block was already in the store, typically recovered
/// after a processor reset, and its payload is worth restoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdsRegistration {
    /// A new zero-filled block
    Created(CdsHandle),
    /// A block registered earlier under the same name and size
    Existing(CdsHandle),
}

impl CdsRegistration {
    pub fn handle(&self) -> CdsHandle {
        match *self {
            CdsRegistration::Created(handle) | CdsRegistration::Existing(handle) => handle,
        }
    }

    /// True if the block did not exist before this registration
    pub fn is_new(&self) -> bool {
        matches!(self, CdsRegistration::Created(_))
    }
}

/// What a CDS block holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CdsBlockKind {
    /// Application data
    Data,
    /// Backing store of a critical table
    CriticalTable,
}

/// One line of [`CriticalDataStore::registry_dump`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdsRegistryRecord {
    pub handle: CdsHandle,
    pub size: usize,
    pub critical_table: bool,
    pub name: CdsName,
}

/// What happened when the store was opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdsRecoveryReport {
    /// Reset the store was opened after
    pub reset: ResetType,
    /// Whether the region was (re)formatted
    pub formatted: bool,
    /// Why a processor reset still formatted the region
    pub format_reason: Option<String>,
    /// Entries restored from the registry table
    pub recovered_entries: usize,
    /// Registry records dropped as damaged or inconsistent
    pub discarded_records: usize,
    /// Recovered entries whose payload no longer matches its CRC
    pub payload_mismatches: usize,
}

#[derive(Debug, Clone)]
struct CdsEntry {
    handle: CdsHandle,
    name: CdsName,
    size: usize,
    offset: usize,
    kind: CdsBlockKind,
    /// Application that last registered the block; undefined after recovery
    owner: ResourceId,
}

impl CdsEntry {
    fn record(&self) -> RegistryRecord {
        RegistryRecord {
            handle: self.handle,
            size: self.size,
            offset: self.offset,
            critical_table: self.kind == CdsBlockKind::CriticalTable,
            name: self.name.to_string(),
        }
    }
}

struct CdsState<D> {
    nv: D,
    entries: Vec<Option<CdsEntry>>,
    extents: ExtentMap,
}

/// Named blocks in non-volatile memory that survive processor resets
///
/// Every block is written as `[payload][crc32]` in the data area; the names,
/// sizes and locations live in a separate registry table in the same region
/// so they can be rebuilt after a processor reset.
pub struct CriticalDataStore<D: NonVolatileMemory> {
    registry: Arc<ResourceRegistry>,
    config: PlatformConfig,
    layout: CdsLayout,
    state: Mutex<CdsState<D>>,
    recovery: CdsRecoveryReport,
}

impl<D: NonVolatileMemory> CriticalDataStore<D> {
    /// Opens the store on `nv`
    ///
    /// After a power-on reset the region is formatted. After a processor
    /// reset the signatures and superblock are checked and every intact
    /// registry record is restored with its original handle; if the region
    /// is not a valid store it is formatted instead.
    pub fn open(
        nv: D,
        registry: Arc<ResourceRegistry>,
        config: &PlatformConfig,
        reset: ResetType,
    ) -> Result<Self> {
        if nv.capacity() == 0 {
            return Err(ResourceError::NotSupported(
                "no non-volatile region for the CDS".to_string(),
            ));
        }
        if config.cds_max_full_name_len() > MAX_FULL_NAME_LEN {
            return Err(ResourceError::BadArgument(format!(
                "CDS names up to {} bytes do not fit the {} byte registry field",
                config.cds_max_full_name_len(),
                MAX_FULL_NAME_LEN
            )));
        }

        let max_entries = registry.capacity(ResourceKind::CdsBlock);
        let layout = CdsLayout::new(nv.capacity(), max_entries)?;
        let mut state = CdsState {
            nv,
            entries: (0..max_entries).map(|_| None).collect(),
            extents: ExtentMap::new(layout.data_start()..layout.data_end()),
        };

        let mut report = CdsRecoveryReport {
            reset,
            formatted: false,
            format_reason: None,
            recovered_entries: 0,
            discarded_records: 0,
            payload_mismatches: 0,
        };

        let format_reason = if reset.preserves_memory() {
            match state.check_region(&layout)? {
                Ok(()) => {
                    state.recover(&layout, &registry, config, &mut report)?;
                    None
                }
                Err(reason) => Some(reason),
            }
        } else {
            None
        };

        if !reset.preserves_memory() || format_reason.is_some() {
            state.format(&layout)?;
            report.formatted = true;
            report.format_reason = format_reason;
        }

        tracing::info!(
            %reset,
            formatted = report.formatted,
            reason = report.format_reason.as_deref().unwrap_or(""),
            recovered = report.recovered_entries,
            discarded = report.discarded_records,
            mismatched = report.payload_mismatches,
            "CDS opened"
        );

        Ok(Self {
            registry,
            config: config.clone(),
            layout,
            state: Mutex::new(state),
            recovery: report,
        })
    }

    /// Report produced by [`open`](Self::open)
    pub fn recovery_report(&self) -> &CdsRecoveryReport {
        &self.recovery
    }

    /// Registers a block, or finds the one registered earlier
    ///
    /// A block that already exists under `name` with the same size keeps its
    /// handle and payload and comes back as [`CdsRegistration::Existing`]. A
    /// new block starts zero-filled with a valid CRC.
    pub fn register(
        &self,
        owner: ResourceId,
        name: &str,
        size: usize,
        kind: CdsBlockKind,
    ) -> Result<CdsRegistration> {
        if !self.registry.validate(owner, ResourceKind::Application) {
            return Err(ResourceError::HandleInvalid {
                id: owner.to_integer(),
            });
        }
        let name = CdsName::parse(name, &self.config)?;
        if size == 0 || size > u32::MAX as usize {
            return Err(ResourceError::BadArgument(format!(
                "CDS block size {} out of range",
                size
            )));
        }

        let mut state = self.state.lock();

        if let Some(entry) = state.entries.iter_mut().flatten().find(|e| e.name == name) {
            if entry.size != size {
                return Err(ResourceError::NameConflict(format!(
                    "{} already registered with {} bytes, requested {}",
                    name, entry.size, size
                )));
            }
            if entry.owner != owner && self.registry.validate(entry.owner, ResourceKind::Application)
            {
                return Err(ResourceError::OwnerActive(format!(
                    "{} belongs to application {}",
                    name, entry.owner
                )));
            }
            entry.owner = owner;
            tracing::debug!(handle = %entry.handle, %name, size, "CDS block re-registered");
            return Ok(CdsRegistration::Existing(entry.handle));
        }

        let handle = self.registry.reserve(ResourceKind::CdsBlock)?;
        let footprint = entry_footprint(size);
        let Some(offset) = state.extents.allocate(footprint) else {
            self.registry.release(handle)?;
            tracing::warn!(
                %name,
                size,
                largest_free = state.extents.largest_free(),
                "CDS data area full"
            );
            return Err(ResourceError::CapacityExceeded(format!(
                "no room for {} bytes of CDS data for {}",
                size, name
            )));
        };
        self.registry.activate(handle)?;
        let index = self.registry.to_index(handle, ResourceKind::CdsBlock)?;

        let entry = CdsEntry {
            handle,
            name,
            size,
            offset,
            kind,
            owner,
        };
        if let Err(err) = state.write_new_entry(&self.layout, index, &entry) {
            state.extents.release(offset..offset + footprint);
            self.registry.release(handle)?;
            tracing::warn!(name = %entry.name, error = %err, "CDS registration not persisted");
            return Err(err);
        }

        tracing::debug!(%handle, name = %entry.name, size, offset, ?kind, "CDS block registered");
        state.entries[index] = Some(entry);
        Ok(CdsRegistration::Created(handle))
    }

    /// Stores `data` in a block; `data` must be exactly the registered size
    pub fn save(&self, handle: CdsHandle, data: &[u8]) -> Result<()> {
        let index = self.registry.to_index(handle, ResourceKind::CdsBlock)?;
        let mut state = self.state.lock();
        let (offset, size) = state.location(index, handle)?;
        check_len(size, data.len())?;

        state.nv.write(offset, data)?;
        state.nv.write(offset + size, &crc32(data, 0).to_le_bytes())?;
        state.nv.flush()?;
        Ok(())
    }

    /// Copies a block's stored bytes into `buffer`, then checks them
    ///
    /// On `IntegrityCheckFailed` the buffer still holds what was stored.
    pub fn restore(&self, handle: CdsHandle, buffer: &mut [u8]) -> Result<()> {
        let index = self.registry.to_index(handle, ResourceKind::CdsBlock)?;
        let mut state = self.state.lock();
        let (offset, size) = state.location(index, handle)?;
        check_len(size, buffer.len())?;

        state.nv.read(offset, buffer)?;
        let mut stored = [0u8; CRC_LEN];
        state.nv.read(offset + size, &mut stored)?;

        let expected = u32::from_le_bytes(stored);
        let actual = crc32(buffer, 0);
        if expected != actual {
            tracing::warn!(%handle, expected, actual, "CDS block failed integrity check");
            return Err(ResourceError::IntegrityCheckFailed(format!(
                "CDS block {}: stored CRC {:#010x}, computed {:#010x}",
                handle, expected, actual
            )));
        }
        Ok(())
    }

    /// Removes a block whose owner is no longer running
    pub fn delete(&self, name: &str) -> Result<()> {
        let name = CdsName::parse(name, &self.config)?;
        let mut state = self.state.lock();

        let Some((index, entry)) = state.find(&name).map(|(i, e)| (i, e.clone())) else {
            return Err(ResourceError::NotFound(format!("CDS block {}", name)));
        };
        if self.registry.validate(entry.owner, ResourceKind::Application) {
            return Err(ResourceError::OwnerActive(format!(
                "{} belongs to application {}",
                name, entry.owner
            )));
        }

        state.clear_record(&self.layout, index)?;
        state.nv.flush()?;
        state
            .extents
            .release(entry.offset..entry.offset + entry_footprint(entry.size));
        state.entries[index] = None;
        self.registry.release(entry.handle)?;

        tracing::debug!(handle = %entry.handle, %name, "CDS block deleted");
        Ok(())
    }

    /// Handle of the block registered under `name`
    pub fn lookup(&self, name: &str) -> Result<CdsHandle> {
        let name = CdsName::parse(name, &self.config)?;
        let state = self.state.lock();
        state
            .find(&name)
            .map(|(_, entry)| entry.handle)
            .ok_or_else(|| ResourceError::NotFound(format!("CDS block {}", name)))
    }

    /// Name a block was registered under
    pub fn name_of(&self, handle: CdsHandle) -> Result<CdsName> {
        let index = self.registry.to_index(handle, ResourceKind::CdsBlock)?;
        let state = self.state.lock();
        state.entry(index, handle).map(|entry| entry.name.clone())
    }

    /// Every registered block, in registry order
    pub fn registry_dump(&self) -> Vec<CdsRegistryRecord> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .flatten()
            .map(|entry| CdsRegistryRecord {
                handle: entry.handle,
                size: entry.size,
                critical_table: entry.kind == CdsBlockKind::CriticalTable,
                name: entry.name.clone(),
            })
            .collect()
    }

    /// Unused bytes in the data area
    pub fn free_bytes(&self) -> usize {
        self.state.lock().extents.free_bytes()
    }

    /// Closes the store and returns the device
    pub fn into_nv(self) -> D {
        self.state.into_inner().nv
    }
}

fn check_len(registered: usize, given: usize) -> Result<()> {
    if registered != given {
        return Err(ResourceError::BadArgument(format!(
            "CDS block holds {} bytes, got a {} byte buffer",
            registered, given
        )));
    }
    Ok(())
}

impl<D: NonVolatileMemory> CdsState<D> {
    fn find(&self, name: &CdsName) -> Option<(usize, &CdsEntry)> {
        self.entries
            .iter()
            .enumerate()
            .find_map(|(index, slot)| slot.as_ref().filter(|e| &e.name == name).map(|e| (index, e)))
    }

    fn entry(&self, index: usize, handle: CdsHandle) -> Result<&CdsEntry> {
        match self.entries.get(index).and_then(Option::as_ref) {
            Some(entry) if entry.handle == handle => Ok(entry),
            _ => Err(ResourceError::HandleInvalid {
                id: handle.to_integer(),
            }),
        }
    }

    fn location(&self, index: usize, handle: CdsHandle) -> Result<(usize, usize)> {
        self.entry(index, handle).map(|e| (e.offset, e.size))
    }

    /// Outer error for I/O failure, inner error for a region that is not a
    /// store laid out like `layout`
    fn check_region(&mut self, layout: &CdsLayout) -> Result<core::result::Result<(), String>> {
        let mut begin = [0u8; 8];
        let mut end = [0u8; 8];
        self.nv.read(0, &mut begin)?;
        self.nv.read(layout.end_signature_offset(), &mut end)?;
        if !signatures_intact(&begin, &end) {
            return Ok(Err("CDS signatures missing".to_string()));
        }

        let mut raw = [0u8; SUPERBLOCK_LEN];
        self.nv.read(layout.superblock_offset(), &mut raw)?;
        match Superblock::decode(&raw) {
            Some(superblock) if superblock.describes(layout) => Ok(Ok(())),
            Some(_) => Ok(Err("CDS geometry changed".to_string())),
            None => Ok(Err("CDS superblock unreadable".to_string())),
        }
    }

    fn format(&mut self, layout: &CdsLayout) -> Result<()> {
        self.nv.write(0, BEGIN_SIGNATURE)?;
        self.nv
            .write(layout.superblock_offset(), &Superblock::for_layout(layout).encode()?)?;
        self.nv.write(layout.record_offset(0), &vec![0u8; layout.table_len()])?;
        self.nv.write(layout.end_signature_offset(), END_SIGNATURE)?;
        self.nv.flush()?;

        self.entries.iter_mut().for_each(|slot| *slot = None);
        self.extents = ExtentMap::new(layout.data_start()..layout.data_end());
        Ok(())
    }

    /// Rebuilds the in-memory table from the stored registry records
    fn recover(
        &mut self,
        layout: &CdsLayout,
        registry: &ResourceRegistry,
        config: &PlatformConfig,
        report: &mut CdsRecoveryReport,
    ) -> Result<()> {
        for index in 0..layout.max_entries {
            let mut raw = [0u8; RECORD_LEN];
            self.nv.read(layout.record_offset(index), &mut raw)?;

            let record = match RegistryRecord::decode(&raw) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(fault) => {
                    tracing::warn!(index, ?fault, "Discarding damaged CDS registry record");
                    self.discard(layout, index, report)?;
                    continue;
                }
            };

            match self.adopt(layout, registry, config, index, &record) {
                Ok(entry) => {
                    if !self.payload_intact(&entry)? {
                        report.payload_mismatches += 1;
                    }
                    self.entries[index] = Some(entry);
                    report.recovered_entries += 1;
                }
                Err(reason) => {
                    tracing::warn!(index, name = %record.name, %reason, "Discarding CDS registry record");
                    self.discard(layout, index, report)?;
                }
            }
        }
        Ok(())
    }

    /// Validates a stored record against the layout and claims its handle
    /// and data extent
    fn adopt(
        &mut self,
        layout: &CdsLayout,
        registry: &ResourceRegistry,
        config: &PlatformConfig,
        index: usize,
        record: &RegistryRecord,
    ) -> core::result::Result<CdsEntry, String> {
        let name = CdsName::parse(&record.name, config).map_err(|e| e.to_string())?;
        if self.find(&name).is_some() {
            return Err("duplicate name".to_string());
        }

        let footprint = entry_footprint(record.size);
        let extent = record.offset..record.offset.saturating_add(footprint);
        if record.size == 0 || extent.start < layout.data_start() || extent.end > layout.data_end()
        {
            return Err("data extent outside the data area".to_string());
        }

        registry
            .reclaim(record.handle, ResourceKind::CdsBlock)
            .map_err(|e| e.to_string())?;
        if registry.to_index(record.handle, ResourceKind::CdsBlock) != Ok(index) {
            give_back(registry, record.handle);
            return Err("handle does not match its table slot".to_string());
        }
        if !self.extents.claim(extent) {
            give_back(registry, record.handle);
            return Err("data extent overlaps another block".to_string());
        }

        Ok(CdsEntry {
            handle: record.handle,
            name,
            size: record.size,
            offset: record.offset,
            kind: if record.critical_table {
                CdsBlockKind::CriticalTable
            } else {
                CdsBlockKind::Data
            },
            owner: ResourceId::UNDEFINED,
        })
    }

    fn payload_intact(&mut self, entry: &CdsEntry) -> Result<bool> {
        let mut payload = vec![0u8; entry.size];
        let mut stored = [0u8; CRC_LEN];
        self.nv.read(entry.offset, &mut payload)?;
        self.nv.read(entry.offset + entry.size, &mut stored)?;
        Ok(u32::from_le_bytes(stored) == crc32(&payload, 0))
    }

    fn discard(
        &mut self,
        layout: &CdsLayout,
        index: usize,
        report: &mut CdsRecoveryReport,
    ) -> Result<()> {
        report.discarded_records += 1;
        self.clear_record(layout, index)
    }

    fn clear_record(&mut self, layout: &CdsLayout, index: usize) -> Result<()> {
        self.nv.write(layout.record_offset(index), &[0u8; RECORD_LEN])?;
        Ok(())
    }

    fn write_new_entry(&mut self, layout: &CdsLayout, index: usize, entry: &CdsEntry) -> Result<()> {
        let zeros = vec![0u8; entry.size];
        self.nv.write(entry.offset, &zeros)?;
        self.nv
            .write(entry.offset + entry.size, &crc32(&zeros, 0).to_le_bytes())?;
        self.nv.write(layout.record_offset(index), &entry.record().encode())?;
        self.nv.flush()?;
        Ok(())
    }
}

/// Releases a handle reclaimed for a record that is then rejected
fn give_back(registry: &ResourceRegistry, handle: CdsHandle) {
    if let Err(err) = registry.release(handle) {
        tracing::warn!(%handle, error = %err, "Reclaimed CDS handle could not be released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hal::{FileNvMemory, RamNvMemory};

    struct Fixture {
        registry: Arc<ResourceRegistry>,
        config: PlatformConfig,
        app: ResourceId,
    }

    fn fixture() -> Fixture {
        let config = PlatformConfig::default().with_max_cds_entries(8);
        let registry = Arc::new(ResourceRegistry::new(&config).unwrap());
        let app = registry.allocate(ResourceKind::Application).unwrap();
        Fixture {
            registry,
            config,
            app,
        }
    }

    fn open(fx: &Fixture, nv: RamNvMemory, reset: ResetType) -> CriticalDataStore<RamNvMemory> {
        CriticalDataStore::open(nv, fx.registry.clone(), &fx.config, reset).unwrap()
    }

    #[test]
    fn test_register_save_restore() {
        let fx = fixture();
        let cds = open(&fx, RamNvMemory::new(4096), ResetType::PowerOn);
        assert!(cds.recovery_report().formatted);

        let handle = cds.register(fx.app, "App.Blk", 8, CdsBlockKind::Data).unwrap().handle();
        cds.save(handle, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        let mut out = [0u8; 8];
        cds.restore(handle, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_new_block_is_zeroed_and_valid() {
        let fx = fixture();
        let cds = open(&fx, RamNvMemory::new(4096), ResetType::PowerOn);
        let handle = cds.register(fx.app, "App.Fresh", 5, CdsBlockKind::Data).unwrap().handle();

        let mut out = [0xFFu8; 5];
        cds.restore(handle, &mut out).unwrap();
        assert_eq!(out, [0u8; 5]);
    }

    #[test]
    fn test_bit_flip_fails_integrity_but_copies() {
        let fx = fixture();
        let nv = RamNvMemory::new(4096);
        let cds = open(&fx, nv.clone(), ResetType::PowerOn);
        let handle = cds.register(fx.app, "App.Blk", 8, CdsBlockKind::Data).unwrap().handle();
        cds.save(handle, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        let offset = cds.state.lock().entries[0].as_ref().unwrap().offset;
        nv.flip_bit(offset + 2, 4);

        let mut out = [0u8; 8];
        assert!(matches!(
            cds.restore(handle, &mut out),
            Err(ResourceError::IntegrityCheckFailed(_))
        ));
        assert_eq!(out, [1, 2, 3 ^ 0x10, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_reregister_same_and_different_size() {
        let fx = fixture();
        let cds = open(&fx, RamNvMemory::new(4096), ResetType::PowerOn);
        let first = cds.register(fx.app, "App.Blk", 8, CdsBlockKind::Data).unwrap();
        assert!(first.is_new());
        let handle = first.handle();
        cds.save(handle, &[9; 8]).unwrap();

        assert_eq!(
            cds.register(fx.app, "App.Blk", 8, CdsBlockKind::Data),
            Ok(CdsRegistration::Existing(handle))
        );
        let mut out = [0u8; 8];
        cds.restore(handle, &mut out).unwrap();
        assert_eq!(out, [9; 8]);

        assert!(matches!(
            cds.register(fx.app, "App.Blk", 9, CdsBlockKind::Data),
            Err(ResourceError::NameConflict(_))
        ));
    }

    #[test]
    fn test_name_held_by_other_live_application() {
        let fx = fixture();
        let cds = open(&fx, RamNvMemory::new(4096), ResetType::PowerOn);
        let other = fx.registry.allocate(ResourceKind::Application).unwrap();
        cds.register(fx.app, "App.Blk", 8, CdsBlockKind::Data).unwrap();

        assert!(matches!(
            cds.register(other, "App.Blk", 8, CdsBlockKind::Data),
            Err(ResourceError::OwnerActive(_))
        ));

        // Once the first owner is gone the name can be taken over
        fx.registry.release(fx.app).unwrap();
        assert!(cds.register(other, "App.Blk", 8, CdsBlockKind::Data).is_ok());
    }

    #[test]
    fn test_argument_errors() {
        let fx = fixture();
        let cds = open(&fx, RamNvMemory::new(4096), ResetType::PowerOn);
        assert!(matches!(
            cds.register(fx.app, "App.Blk", 0, CdsBlockKind::Data),
            Err(ResourceError::BadArgument(_))
        ));
        assert!(matches!(
            cds.register(fx.app, "NoDot", 4, CdsBlockKind::Data),
            Err(ResourceError::BadArgument(_))
        ));
        assert!(matches!(
            cds.register(ResourceId::UNDEFINED, "App.Blk", 4, CdsBlockKind::Data),
            Err(ResourceError::HandleInvalid { .. })
        ));

        let handle = cds.register(fx.app, "App.Blk", 4, CdsBlockKind::Data).unwrap().handle();
        assert!(matches!(
            cds.save(handle, &[0; 3]),
            Err(ResourceError::BadArgument(_))
        ));
        assert!(matches!(
            cds.restore(handle, &mut [0; 5]),
            Err(ResourceError::BadArgument(_))
        ));
    }

    #[test]
    fn test_registry_full() {
        let fx = fixture();
        let cds = open(&fx, RamNvMemory::new(4096), ResetType::PowerOn);
        for i in 0..8 {
            cds.register(fx.app, &format!("App.B{}", i), 4, CdsBlockKind::Data)
                .unwrap();
        }
        assert!(matches!(
            cds.register(fx.app, "App.Extra", 4, CdsBlockKind::Data),
            Err(ResourceError::CapacityExceeded(_))
        ));
    }

    #[test]
    fn test_data_area_full_releases_handle() {
        let fx = fixture();
        let cds = open(&fx, RamNvMemory::new(1024), ResetType::PowerOn);
        let room = cds.free_bytes();
        assert!(matches!(
            cds.register(fx.app, "App.Huge", room, CdsBlockKind::Data),
            Err(ResourceError::CapacityExceeded(_))
        ));
        assert_eq!(fx.registry.in_use(ResourceKind::CdsBlock), 0);
        assert!(cds
            .register(fx.app, "App.Fits", room - CRC_LEN, CdsBlockKind::Data)
            .is_ok());
        assert_eq!(cds.free_bytes(), 0);
    }

    #[test]
    fn test_processor_reset_keeps_handles_and_data() {
        let fx = fixture();
        let nv = RamNvMemory::new(4096);
        let handle = {
            let cds = open(&fx, nv.clone(), ResetType::PowerOn);
            cds.register(fx.app, "App.Other", 16, CdsBlockKind::Data).unwrap();
            let handle = cds
                .register(fx.app, "App.Table", 12, CdsBlockKind::CriticalTable)
                .unwrap()
                .handle();
            cds.save(handle, b"table-image!").unwrap();
            handle
        };

        // Fresh registry, as after a restart
        let after = fixture();
        let cds = open(&after, nv, ResetType::Processor);
        let report = cds.recovery_report();
        assert!(!report.formatted);
        assert_eq!(report.recovered_entries, 2);
        assert_eq!(report.payload_mismatches, 0);

        assert_eq!(
            cds.register(after.app, "App.Table", 12, CdsBlockKind::CriticalTable),
            Ok(CdsRegistration::Existing(handle))
        );
        let mut out = [0u8; 12];
        cds.restore(handle, &mut out).unwrap();
        assert_eq!(&out, b"table-image!");

        let dump = cds.registry_dump();
        assert_eq!(dump.len(), 2);
        assert!(dump.iter().any(|r| r.handle == handle && r.critical_table));
    }

    #[test]
    fn test_power_on_reset_formats() {
        let fx = fixture();
        let nv = RamNvMemory::new(4096);
        {
            let cds = open(&fx, nv.clone(), ResetType::PowerOn);
            cds.register(fx.app, "App.Blk", 8, CdsBlockKind::Data).unwrap();
        }
        let after = fixture();
        let cds = open(&after, nv, ResetType::PowerOn);
        assert!(cds.recovery_report().formatted);
        assert!(cds.registry_dump().is_empty());
        assert!(matches!(cds.lookup("App.Blk"), Err(ResourceError::NotFound(_))));
    }

    #[test]
    fn test_processor_reset_on_blank_region_formats() {
        let fx = fixture();
        let cds = open(&fx, RamNvMemory::new(4096), ResetType::Processor);
        let report = cds.recovery_report();
        assert!(report.formatted);
        assert_eq!(report.format_reason.as_deref(), Some("CDS signatures missing"));
    }

    #[test]
    fn test_damaged_record_is_discarded() {
        let fx = fixture();
        let nv = RamNvMemory::new(4096);
        {
            let cds = open(&fx, nv.clone(), ResetType::PowerOn);
            cds.register(fx.app, "App.Keep", 8, CdsBlockKind::Data).unwrap();
            cds.register(fx.app, "App.Lose", 8, CdsBlockKind::Data).unwrap();
        }
        let layout = CdsLayout::new(4096, 8).unwrap();
        nv.flip_bit(layout.record_offset(1) + 20, 0);

        let after = fixture();
        let cds = open(&after, nv, ResetType::Processor);
        let report = cds.recovery_report();
        assert_eq!(report.recovered_entries, 1);
        assert_eq!(report.discarded_records, 1);
        assert!(cds.lookup("App.Keep").is_ok());
        assert!(cds.lookup("App.Lose").is_err());
    }

    #[test]
    fn test_overlapping_record_gives_its_handle_back() {
        let fx = fixture();
        let mut nv = RamNvMemory::new(4096);
        {
            let cds = open(&fx, nv.clone(), ResetType::PowerOn);
            cds.register(fx.app, "App.Keep", 8, CdsBlockKind::Data).unwrap();
            cds.register(fx.app, "App.Moved", 8, CdsBlockKind::Data).unwrap();
        }
        let layout = CdsLayout::new(4096, 8).unwrap();
        let mut bytes = [0u8; RECORD_LEN];
        nv.read(layout.record_offset(0), &mut bytes).unwrap();
        let keep = RegistryRecord::decode(&bytes).unwrap().unwrap();
        nv.read(layout.record_offset(1), &mut bytes).unwrap();
        let mut moved = RegistryRecord::decode(&bytes).unwrap().unwrap();
        moved.offset = keep.offset;
        nv.write(layout.record_offset(1), &moved.encode()).unwrap();

        let after = fixture();
        let cds = open(&after, nv, ResetType::Processor);
        assert_eq!(cds.recovery_report().discarded_records, 1);
        assert!(cds.lookup("App.Moved").is_err());
        assert_eq!(after.registry.in_use(ResourceKind::CdsBlock), 1);
        assert!(!after.registry.validate(moved.handle, ResourceKind::CdsBlock));
    }

    #[test]
    fn test_delete_requires_inactive_owner() {
        let fx = fixture();
        let cds = open(&fx, RamNvMemory::new(4096), ResetType::PowerOn);
        let free_before = cds.free_bytes();
        let handle = cds.register(fx.app, "App.Blk", 8, CdsBlockKind::Data).unwrap().handle();

        assert!(matches!(
            cds.delete("App.Blk"),
            Err(ResourceError::OwnerActive(_))
        ));

        fx.registry.release(fx.app).unwrap();
        cds.delete("App.Blk").unwrap();
        assert_eq!(cds.free_bytes(), free_before);
        assert!(!fx.registry.validate(handle, ResourceKind::CdsBlock));
        assert!(cds.save(handle, &[0; 8]).is_err());
        assert!(matches!(cds.delete("App.Blk"), Err(ResourceError::NotFound(_))));
    }

    #[test]
    fn test_lookup_and_name_of() {
        let fx = fixture();
        let cds = open(&fx, RamNvMemory::new(4096), ResetType::PowerOn);
        let handle = cds.register(fx.app, "App.Blk", 8, CdsBlockKind::Data).unwrap().handle();
        assert_eq!(cds.lookup("App.Blk"), Ok(handle));
        assert_eq!(cds.name_of(handle).unwrap().to_string(), "App.Blk");
    }

    #[test]
    fn test_file_region_reopens_as_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cds.img");
        let fx = fixture();
        let handle = {
            let nv = FileNvMemory::open(&path, 4096).unwrap();
            let cds = CriticalDataStore::open(nv, fx.registry.clone(), &fx.config, ResetType::PowerOn)
                .unwrap();
            let handle = cds.register(fx.app, "App.Log", 6, CdsBlockKind::Data).unwrap().handle();
            cds.save(handle, b"warm!!").unwrap();
            handle
        };

        let after = fixture();
        let nv = FileNvMemory::open(&path, 4096).unwrap();
        let cds = CriticalDataStore::open(nv, after.registry.clone(), &after.config, ResetType::Processor)
            .unwrap();
        assert_eq!(
            cds.register(after.app, "App.Log", 6, CdsBlockKind::Data),
            Ok(CdsRegistration::Existing(handle))
        );
        let mut out = [0u8; 6];
        cds.restore(handle, &mut out).unwrap();
        assert_eq!(&out, b"warm!!");
    }

    #[test]
    fn test_no_region_is_not_supported() {
        let fx = fixture();
        assert!(matches!(
            CriticalDataStore::open(RamNvMemory::new(0), fx.registry.clone(), &fx.config, ResetType::PowerOn),
            Err(ResourceError::NotSupported(_))
        ));
    }
}
