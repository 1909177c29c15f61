//! # Executive Core
//!
//! One object that owns every resource table of the flight executive and
//! hands out the operations applications call: memory pools, the critical
//! data store, generic counters, application/task/library ids and the
//! checksum service.
//!
//! Everything is sized once from a [`PlatformConfig`] at [`Executive::boot`]
//! and shares a single [`ResourceRegistry`], so an id issued by one service
//! is always rejected by the others.
//!
//! ```
//! use core_types::PlatformConfig;
//! use executive::Executive;
//! use hal::{RamNvMemory, ResetType};
//!
//! let nv = Box::new(RamNvMemory::with_capacity_kb(64));
//! let exec = Executive::boot(PlatformConfig::default(), Some(nv), ResetType::PowerOn).unwrap();
//!
//! let app = exec.register_application("NAV").unwrap();
//! let handle = exec.register_cds(app, "NAV.State", 8).unwrap().handle();
//! exec.save_cds(handle, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
//! ```

pub mod audit;
mod entities;

pub use audit::{ResourceAuditEntry, ResourceAuditLog, ResourceEvent};

use core_types::{PlatformConfig, ResourceError, Result};
use critical_data_store::{
    CdsBlockKind, CdsHandle, CdsName, CdsRecoveryReport, CdsRegistration, CdsRegistryRecord,
    CriticalDataStore,
};
use entities::EntityTable;
use generic_counters::{CounterInfo, CounterTable};
use hal::{CrcType, NonVolatileMemory, ResetType};
use memory_pool::{PoolBlock, PoolLocking, PoolManager, PoolStats};
use parking_lot::{Mutex, MutexGuard};
use resources::{ResourceId, ResourceKind, ResourceRegistry};
use std::sync::Arc;

/// Non-volatile device the CDS runs on
pub type NvDevice = Box<dyn NonVolatileMemory + Send>;

/// The executive core
pub struct Executive {
    config: PlatformConfig,
    reset: ResetType,
    registry: Arc<ResourceRegistry>,
    pools: PoolManager,
    cds: Option<CriticalDataStore<NvDevice>>,
    counters: CounterTable,
    entities: EntityTable,
    audit: Mutex<ResourceAuditLog>,
}

impl Executive {
    /// Builds every table and opens the CDS
    ///
    /// Without `nv` the executive still runs, but every CDS operation fails
    /// `NotSupported`.
    pub fn boot(config: PlatformConfig, nv: Option<NvDevice>, reset: ResetType) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(ResourceRegistry::new(&config)?);
        let pools = PoolManager::new(registry.clone(), &config.default_block_sizes)?;
        let counters = CounterTable::new(registry.clone(), &config);
        let entities = EntityTable::new(registry.clone(), config.max_api_name_len);
        let mut audit = ResourceAuditLog::new();

        let cds = match nv {
            Some(nv) => {
                let store = CriticalDataStore::open(nv, registry.clone(), &config, reset)?;
                let report = store.recovery_report();
                audit.record_event(ResourceEvent::CdsOpened {
                    reset,
                    formatted: report.formatted,
                    recovered: report.recovered_entries,
                    discarded: report.discarded_records,
                });
                Some(store)
            }
            None => {
                tracing::warn!("No non-volatile region; critical data store disabled");
                None
            }
        };

        tracing::info!(%reset, cds = cds.is_some(), "Executive core booted");

        Ok(Self {
            config,
            reset,
            registry,
            pools,
            cds,
            counters,
            entities,
            audit: Mutex::new(audit),
        })
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// Reset that preceded this boot
    pub fn reset_type(&self) -> ResetType {
        self.reset
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn audit_log(&self) -> MutexGuard<'_, ResourceAuditLog> {
        self.audit.lock()
    }

    /// Closes the executive and returns the CDS device
    pub fn shutdown(self) -> Option<NvDevice> {
        tracing::info!("Executive core shut down");
        self.cds.map(CriticalDataStore::into_nv)
    }

    // Applications, tasks and libraries

    pub fn register_application(&self, name: &str) -> Result<ResourceId> {
        self.register_entity(ResourceKind::Application, name, None)
    }

    /// Registers a task under a live application
    pub fn register_task(&self, app: ResourceId, name: &str) -> Result<ResourceId> {
        self.register_entity(ResourceKind::Task, name, Some(app))
    }

    pub fn register_library(&self, name: &str) -> Result<ResourceId> {
        self.register_entity(ResourceKind::Library, name, None)
    }

    /// Retires an application, task or library id
    ///
    /// Retiring an application retires its tasks as well. CDS blocks it
    /// owned stay registered and become deletable.
    pub fn unregister(&self, id: ResourceId) -> Result<()> {
        let retired = self.entities.unregister(id)?;
        let mut audit = self.audit.lock();
        for (kind, id) in retired {
            audit.record_event(ResourceEvent::IdReleased { kind, id });
        }
        Ok(())
    }

    /// Id of the application, task or library registered under `name`
    pub fn lookup_entity(&self, kind: ResourceKind, name: &str) -> Result<ResourceId> {
        self.entities.lookup(kind, name)
    }

    pub fn entity_name(&self, id: ResourceId) -> Result<String> {
        self.entities.name_of(id)
    }

    fn register_entity(
        &self,
        kind: ResourceKind,
        name: &str,
        parent: Option<ResourceId>,
    ) -> Result<ResourceId> {
        let result = self.entities.register(kind, name, parent);
        self.record_allocation(kind, "register", result.as_ref().map(|id| Some(*id)));
        result
    }

    // Memory pools

    /// Creates a pool with the default guarded locking
    pub fn create_pool(
        &self,
        buffer: impl Into<Box<[u8]>>,
        class_sizes: Option<&[usize]>,
    ) -> Result<ResourceId> {
        self.create_pool_with(buffer, class_sizes, PoolLocking::Guarded)
    }

    pub fn create_pool_guarded(
        &self,
        buffer: impl Into<Box<[u8]>>,
        class_sizes: Option<&[usize]>,
    ) -> Result<ResourceId> {
        self.create_pool_with(buffer, class_sizes, PoolLocking::Guarded)
    }

    pub fn create_pool_unguarded(
        &self,
        buffer: impl Into<Box<[u8]>>,
        class_sizes: Option<&[usize]>,
    ) -> Result<ResourceId> {
        self.create_pool_with(buffer, class_sizes, PoolLocking::Unguarded)
    }

    fn create_pool_with(
        &self,
        buffer: impl Into<Box<[u8]>>,
        class_sizes: Option<&[usize]>,
        locking: PoolLocking,
    ) -> Result<ResourceId> {
        let result = self.pools.create_pool(buffer, class_sizes, locking);
        self.record_allocation(
            ResourceKind::MemoryPool,
            "create_pool",
            result.as_ref().map(|id| Some(*id)),
        );
        result
    }

    /// Deletes a pool and returns its buffer
    pub fn delete_pool(&self, pool: ResourceId) -> Result<Box<[u8]>> {
        let buffer = self.pools.delete_pool(pool)?;
        self.audit.lock().record_event(ResourceEvent::IdReleased {
            kind: ResourceKind::MemoryPool,
            id: pool,
        });
        Ok(buffer)
    }

    pub fn allocate(&self, pool: ResourceId, size: usize) -> Result<PoolBlock> {
        self.pools.allocate(pool, size)
    }

    /// Returns a block to its pool
    pub fn free(&self, pool: ResourceId, block: PoolBlock) -> Result<usize> {
        let result = self.pools.free(pool, block);
        if matches!(result, Err(ResourceError::CorruptionDetected(_))) {
            self.audit.lock().record_event(ResourceEvent::PoolCorruption {
                pool,
                offset: block.offset(),
            });
        }
        result
    }

    pub fn buffer_info(&self, pool: ResourceId, block: PoolBlock) -> Result<usize> {
        self.pools.buffer_info(pool, block)
    }

    pub fn write_block(
        &self,
        pool: ResourceId,
        block: PoolBlock,
        offset: usize,
        data: &[u8],
    ) -> Result<()> {
        self.pools.write_block(pool, block, offset, data)
    }

    pub fn read_block(
        &self,
        pool: ResourceId,
        block: PoolBlock,
        offset: usize,
        out: &mut [u8],
    ) -> Result<()> {
        self.pools.read_block(pool, block, offset, out)
    }

    pub fn pool_stats(&self, pool: ResourceId) -> Result<PoolStats> {
        self.pools.stats(pool)
    }

    // Critical data store

    /// Registers a plain CDS block owned by `app`
    ///
    /// The application part of `name` must be the name `app` registered
    /// under, otherwise `BadArgument`. `Existing` means the block survived
    /// from an earlier registration and holds data worth restoring.
    pub fn register_cds(
        &self,
        app: ResourceId,
        name: &str,
        size: usize,
    ) -> Result<CdsRegistration> {
        self.register_cds_kind(app, name, size, CdsBlockKind::Data)
    }

    /// Registers a CDS block holding a critical table image
    pub fn register_cds_table(
        &self,
        app: ResourceId,
        name: &str,
        size: usize,
    ) -> Result<CdsRegistration> {
        self.register_cds_kind(app, name, size, CdsBlockKind::CriticalTable)
    }

    fn register_cds_kind(
        &self,
        app: ResourceId,
        name: &str,
        size: usize,
        kind: CdsBlockKind,
    ) -> Result<CdsRegistration> {
        let cds = self.cds()?;
        let parsed = CdsName::parse(name, &self.config)?;
        let owner = self.entities.name_of(app)?;
        if parsed.app() != owner {
            tracing::warn!(%app, owner = %owner, name, "CDS name belongs to another application");
            return Err(ResourceError::BadArgument(format!(
                "CDS name {} does not belong to application {}",
                name, owner
            )));
        }

        let result = cds.register(app, name, size, kind);
        self.record_allocation(
            ResourceKind::CdsBlock,
            "register_cds",
            result
                .as_ref()
                .map(|registration| registration.is_new().then(|| registration.handle())),
        );
        result
    }

    pub fn save_cds(&self, handle: CdsHandle, data: &[u8]) -> Result<()> {
        self.cds()?.save(handle, data)
    }

    /// Copies a block into `buffer`; the buffer is filled even on a CRC mismatch
    pub fn restore_cds(&self, handle: CdsHandle, buffer: &mut [u8]) -> Result<()> {
        let result = self.cds()?.restore(handle, buffer);
        if matches!(result, Err(ResourceError::IntegrityCheckFailed(_))) {
            self.audit
                .lock()
                .record_event(ResourceEvent::CdsIntegrityFailure { handle });
        }
        result
    }

    /// Deletes a CDS block whose owner is no longer registered
    pub fn delete_cds(&self, name: &str) -> Result<()> {
        let cds = self.cds()?;
        let handle = cds.lookup(name)?;
        cds.delete(name)?;
        self.audit.lock().record_event(ResourceEvent::IdReleased {
            kind: ResourceKind::CdsBlock,
            id: handle,
        });
        Ok(())
    }

    pub fn lookup_cds(&self, name: &str) -> Result<CdsHandle> {
        self.cds()?.lookup(name)
    }

    pub fn cds_registry_dump(&self) -> Result<Vec<CdsRegistryRecord>> {
        Ok(self.cds()?.registry_dump())
    }

    /// How the CDS came up at boot, if there is one
    pub fn cds_recovery_report(&self) -> Option<&CdsRecoveryReport> {
        self.cds.as_ref().map(CriticalDataStore::recovery_report)
    }

    fn cds(&self) -> Result<&CriticalDataStore<NvDevice>> {
        self.cds.as_ref().ok_or_else(|| {
            ResourceError::NotSupported("critical data store is not available".to_string())
        })
    }

    // Generic counters

    pub fn register_counter(&self, name: &str) -> Result<ResourceId> {
        let result = self.counters.register(name);
        self.record_allocation(
            ResourceKind::GenericCounter,
            "register_counter",
            result.as_ref().map(|id| Some(*id)),
        );
        result
    }

    pub fn delete_counter(&self, id: ResourceId) -> Result<()> {
        self.counters.delete(id)?;
        self.audit.lock().record_event(ResourceEvent::IdReleased {
            kind: ResourceKind::GenericCounter,
            id,
        });
        Ok(())
    }

    pub fn increment_counter(&self, id: ResourceId) -> Result<()> {
        self.counters.increment(id)
    }

    pub fn set_counter(&self, id: ResourceId, value: u32) -> Result<()> {
        self.counters.set(id, value)
    }

    pub fn get_counter(&self, id: ResourceId) -> Result<u32> {
        self.counters.get(id)
    }

    pub fn lookup_counter(&self, name: &str) -> Result<ResourceId> {
        self.counters.lookup_by_name(name)
    }

    pub fn counters(&self) -> Vec<CounterInfo> {
        self.counters.snapshot()
    }

    // Checksums

    /// CRC over `data`, continuing from `input_crc`
    pub fn calculate_crc(&self, data: &[u8], input_crc: u32, crc_type: CrcType) -> Result<u32> {
        hal::calculate_crc(data, input_crc, crc_type)
            .map_err(|e| ResourceError::NotSupported(e.to_string()))
    }

    /// Audits a registration; `Ok(None)` reused an id and records nothing
    fn record_allocation(
        &self,
        kind: ResourceKind,
        operation: &str,
        result: core::result::Result<Option<ResourceId>, &ResourceError>,
    ) {
        let event = match result {
            Ok(Some(id)) => ResourceEvent::IdAllocated { kind, id },
            Ok(None) => return,
            Err(ResourceError::CapacityExceeded(_)) => ResourceEvent::CapacityExhausted {
                kind,
                operation: operation.to_string(),
            },
            Err(_) => return,
        };
        self.audit.lock().record_event(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hal::RamNvMemory;

    fn boot_with(nv: &RamNvMemory, reset: ResetType) -> Executive {
        Executive::boot(PlatformConfig::default(), Some(Box::new(nv.clone())), reset).unwrap()
    }

    #[test]
    fn test_boot_without_nv() {
        let exec = Executive::boot(PlatformConfig::default(), None, ResetType::PowerOn).unwrap();
        let app = exec.register_application("NAV").unwrap();

        assert!(exec.cds_recovery_report().is_none());
        assert!(matches!(
            exec.register_cds(app, "NAV.State", 8),
            Err(ResourceError::NotSupported(_))
        ));
        assert!(exec.shutdown().is_none());
    }

    #[test]
    fn test_boot_rejects_bad_config() {
        let config = PlatformConfig::default().with_max_tasks(0);
        assert!(Executive::boot(config, None, ResetType::PowerOn).is_err());
    }

    #[test]
    fn test_cds_survives_processor_reset() {
        let nv = RamNvMemory::with_capacity_kb(64);

        let exec = boot_with(&nv, ResetType::PowerOn);
        let app = exec.register_application("GNC").unwrap();
        let handle = exec.register_cds(app, "GNC.Attitude", 4).unwrap().handle();
        exec.save_cds(handle, &[9, 8, 7, 6]).unwrap();
        exec.shutdown();

        let exec = boot_with(&nv, ResetType::Processor);
        assert_eq!(exec.reset_type(), ResetType::Processor);
        assert_eq!(exec.lookup_cds("GNC.Attitude"), Ok(handle));

        let app = exec.register_application("GNC").unwrap();
        assert_eq!(
            exec.register_cds(app, "GNC.Attitude", 4),
            Ok(CdsRegistration::Existing(handle))
        );
        let mut buffer = [0u8; 4];
        exec.restore_cds(handle, &mut buffer).unwrap();
        assert_eq!(buffer, [9, 8, 7, 6]);

        assert!(exec.audit_log().has_event(|e| matches!(
            e,
            ResourceEvent::CdsOpened {
                formatted: false,
                recovered: 1,
                ..
            }
        )));
    }

    #[test]
    fn test_restore_failure_is_audited() {
        let nv = RamNvMemory::with_capacity_kb(64);
        let exec = boot_with(&nv, ResetType::PowerOn);
        let app = exec.register_application("TLM").unwrap();
        let handle = exec.register_cds(app, "TLM.Seq", 4).unwrap().handle();
        exec.save_cds(handle, &[1, 1, 1, 1]).unwrap();

        let record = exec.cds_registry_dump().unwrap();
        assert_eq!(record.len(), 1);

        // Flip the low bit of the first payload byte
        let snapshot = nv.snapshot();
        let offset = snapshot
            .windows(4)
            .position(|w| w == [1, 1, 1, 1])
            .unwrap();
        nv.flip_bit(offset, 0);

        let mut buffer = [0u8; 4];
        assert!(matches!(
            exec.restore_cds(handle, &mut buffer),
            Err(ResourceError::IntegrityCheckFailed(_))
        ));
        assert_eq!(buffer, [0, 1, 1, 1]);
        assert_eq!(exec.audit_log().entries_for(handle).len(), 2);
    }

    #[test]
    fn test_cds_name_must_match_owner() {
        let nv = RamNvMemory::with_capacity_kb(64);
        let exec = boot_with(&nv, ResetType::PowerOn);
        let nav = exec.register_application("NAV").unwrap();
        let gnc = exec.register_application("GNC").unwrap();

        assert!(matches!(
            exec.register_cds(nav, "GNC.State", 16),
            Err(ResourceError::BadArgument(_))
        ));
        assert!(matches!(
            exec.lookup_cds("GNC.State"),
            Err(ResourceError::NotFound(_))
        ));

        let registration = exec.register_cds(gnc, "GNC.State", 16).unwrap();
        assert!(registration.is_new());
        assert_eq!(exec.lookup_cds("GNC.State"), Ok(registration.handle()));

        // A prefix of the owner's name is not the owner's name
        let na = exec.register_application("NA").unwrap();
        assert!(exec.register_cds(na, "NAV.Pos", 8).is_err());
        assert!(exec.register_cds(nav, "NA.Pos", 8).is_err());
    }

    #[test]
    fn test_cds_reregistration_is_audited_once() {
        let nv = RamNvMemory::with_capacity_kb(64);
        let exec = boot_with(&nv, ResetType::PowerOn);
        let app = exec.register_application("HK").unwrap();

        let first = exec.register_cds(app, "HK.Frame", 8).unwrap();
        let again = exec.register_cds(app, "HK.Frame", 8).unwrap();
        assert_eq!(first, CdsRegistration::Created(first.handle()));
        assert_eq!(again, CdsRegistration::Existing(first.handle()));

        let allocated = exec.audit_log().count_events(|e| {
            matches!(
                e,
                ResourceEvent::IdAllocated {
                    kind: ResourceKind::CdsBlock,
                    ..
                }
            )
        });
        assert_eq!(allocated, 1);
        assert_eq!(exec.audit_log().entries_for(first.handle()).len(), 1);
    }

    #[test]
    fn test_delete_cds_needs_retired_owner() {
        let nv = RamNvMemory::with_capacity_kb(64);
        let exec = boot_with(&nv, ResetType::PowerOn);
        let app = exec.register_application("SCH").unwrap();
        exec.register_cds(app, "SCH.Table", 32).unwrap();

        assert!(matches!(
            exec.delete_cds("SCH.Table"),
            Err(ResourceError::OwnerActive(_))
        ));
        exec.unregister(app).unwrap();
        exec.delete_cds("SCH.Table").unwrap();
        assert!(matches!(
            exec.lookup_cds("SCH.Table"),
            Err(ResourceError::NotFound(_))
        ));
    }

    #[test]
    fn test_pool_lifecycle_is_audited() {
        let exec = Executive::boot(PlatformConfig::default(), None, ResetType::PowerOn).unwrap();
        let pool = exec.create_pool(vec![0u8; 4096], None).unwrap();

        let block = exec.allocate(pool, 20).unwrap();
        assert_eq!(exec.buffer_info(pool, block), Ok(32));
        exec.write_block(pool, block, 0, b"telemetry").unwrap();
        let mut out = [0u8; 9];
        exec.read_block(pool, block, 0, &mut out).unwrap();
        assert_eq!(&out, b"telemetry");

        assert_eq!(exec.free(pool, block), Ok(32));
        assert_eq!(exec.pool_stats(pool).unwrap().blocks_in_use(), 0);

        let buffer = exec.delete_pool(pool).unwrap();
        assert_eq!(buffer.len(), 4096);

        let log = exec.audit_log();
        assert_eq!(log.entries_for(pool).len(), 2);
    }

    #[test]
    fn test_pool_table_full_is_audited() {
        let config = PlatformConfig::default().with_max_memory_pools(1);
        let exec = Executive::boot(config, None, ResetType::PowerOn).unwrap();
        exec.create_pool_unguarded(vec![0u8; 1024], None).unwrap();
        assert!(matches!(
            exec.create_pool_guarded(vec![0u8; 1024], None),
            Err(ResourceError::CapacityExceeded(_))
        ));
        assert!(exec.audit_log().has_event(|e| matches!(
            e,
            ResourceEvent::CapacityExhausted {
                kind: ResourceKind::MemoryPool,
                ..
            }
        )));
    }

    #[test]
    fn test_ids_are_not_interchangeable() {
        let exec = Executive::boot(PlatformConfig::default(), None, ResetType::PowerOn).unwrap();
        let counter = exec.register_counter("Cycles").unwrap();
        let pool = exec.create_pool(vec![0u8; 1024], None).unwrap();

        assert!(exec.allocate(counter, 8).is_err());
        assert!(exec.increment_counter(pool).is_err());
        assert!(exec.unregister(counter).is_err());
    }

    #[test]
    fn test_counters() {
        let exec = Executive::boot(PlatformConfig::default(), None, ResetType::PowerOn).unwrap();
        let id = exec.register_counter("Cycles").unwrap();
        exec.increment_counter(id).unwrap();
        exec.increment_counter(id).unwrap();
        assert_eq!(exec.get_counter(id), Ok(2));
        exec.set_counter(id, 10).unwrap();
        assert_eq!(exec.lookup_counter("Cycles"), Ok(id));
        assert_eq!(exec.counters()[0].value, 10);

        exec.delete_counter(id).unwrap();
        assert!(exec.get_counter(id).is_err());
    }

    #[test]
    fn test_tasks_follow_application() {
        let exec = Executive::boot(PlatformConfig::default(), None, ResetType::PowerOn).unwrap();
        let app = exec.register_application("CI").unwrap();
        let task = exec.register_task(app, "CI_RX").unwrap();
        let lib = exec.register_library("UTIL").unwrap();

        assert_eq!(exec.lookup_entity(ResourceKind::Task, "CI_RX"), Ok(task));
        assert_eq!(exec.entity_name(lib), Ok("UTIL".to_string()));

        exec.unregister(app).unwrap();
        assert!(!exec.registry().validate(task, ResourceKind::Task));
        assert!(exec.registry().validate(lib, ResourceKind::Library));
    }

    #[test]
    fn test_calculate_crc() {
        let exec = Executive::boot(PlatformConfig::default(), None, ResetType::PowerOn).unwrap();
        assert_eq!(exec.calculate_crc(b"123456789", 0, CrcType::Crc16), Ok(0xBB3D));
        assert_eq!(
            exec.calculate_crc(b"123456789", 0, CrcType::Crc32),
            Ok(0xCBF4_3926)
        );
        assert!(matches!(
            exec.calculate_crc(b"x", 0, CrcType::Crc8),
            Err(ResourceError::NotSupported(_))
        ));
    }
}
