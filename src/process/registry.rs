use crate::error::{DevwardenError, Result};
use crate::process::types::{ProcessId, ProcessRecord, ProcessStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory map of identity to record; the single source of truth for what
/// is currently supervised
///
/// One coarse lock guards the whole map. It is never held across an
/// `.await`, so the registry is safe to share between tasks behind an
/// `Arc`.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    records: RwLock<HashMap<ProcessId, ProcessRecord>>,
    /// Only flipped while the write lock is held
    closed: AtomicBool,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ProcessId, ProcessRecord>> {
        self.records.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ProcessId, ProcessRecord>> {
        self.records.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a new record
    ///
    /// # Returns
    /// * `Err(DevwardenError::Launch)` - the registry has been closed
    /// * `Err(DevwardenError::DuplicateIdentity)` - identity already present
    pub fn register(&self, record: ProcessRecord) -> Result<()> {
        let mut records = self.write();
        if self.closed.load(Ordering::SeqCst) {
            return Err(DevwardenError::Launch(format!(
                "refusing to register process {}: shutting down",
                record.identity
            )));
        }
        if records.contains_key(&record.identity) {
            tracing::error!(pid = %record.identity, "Refusing to register duplicate process identity");
            return Err(DevwardenError::DuplicateIdentity(record.identity.to_string()));
        }
        records.insert(record.identity, record);
        Ok(())
    }

    /// Snapshot of one record
    pub fn get(&self, identity: ProcessId) -> Option<ProcessRecord> {
        self.read().get(&identity).cloned()
    }

    pub fn contains(&self, identity: ProcessId) -> bool {
        self.read().contains_key(&identity)
    }

    /// Remove a record; a no-op when it is absent
    pub fn remove(&self, identity: ProcessId) -> Option<ProcessRecord> {
        self.write().remove(&identity)
    }

    /// Snapshot of every record
    pub fn list(&self) -> Vec<ProcessRecord> {
        self.read().values().cloned().collect()
    }

    pub fn identities(&self) -> Vec<ProcessId> {
        self.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Move a record to `next`, enforcing the lifecycle state machine
    ///
    /// Setting the current status again is a no-op.
    ///
    /// # Returns
    /// * `Ok(previous)` - the status before the call
    /// * `Err(DevwardenError::ProcessNotFound)` - no such record
    /// * `Err(DevwardenError::InvalidTransition)` - `next` not reachable
    pub fn set_status(&self, identity: ProcessId, next: ProcessStatus) -> Result<ProcessStatus> {
        let mut records = self.write();
        let record = records
            .get_mut(&identity)
            .ok_or_else(|| DevwardenError::ProcessNotFound(identity.to_string()))?;

        let previous = record.status;
        if previous == next {
            return Ok(previous);
        }

        if !previous.can_transition_to(next) {
            return Err(DevwardenError::InvalidTransition(
                identity.to_string(),
                previous.to_string(),
                next.to_string(),
            ));
        }

        record.status = next;
        tracing::debug!(pid = %identity, from = %previous, to = %next, "Process status changed");
        Ok(previous)
    }

    /// Flag a record as being stopped on request, so its exit is not a crash
    ///
    /// Returns false when the record does not exist.
    pub fn mark_stop_requested(&self, identity: ProcessId) -> bool {
        match self.write().get_mut(&identity) {
            Some(record) => {
                record.stop_requested = true;
                true
            }
            None => false,
        }
    }

    /// Refuse every later `register`
    ///
    /// A record registered before this call is visible to the next `list`;
    /// one registered after it never appears.
    pub fn close(&self) {
        let _records = self.write();
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Remove and return every record
    pub fn clear(&self) -> Vec<ProcessRecord> {
        self.write().drain().map(|(_, record)| record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LaunchConfig;
    use crate::process::output::OutputBuffer;
    use std::sync::Arc;
    use tokio::sync::watch;

    fn create_test_record(pid: u32) -> ProcessRecord {
        let (_tx, rx) = watch::channel(None);
        ProcessRecord::new(
            ProcessId::new(pid),
            LaunchConfig::new("main:app"),
            OutputBuffer::new(10),
            rx,
        )
    }

    #[test]
    fn test_register_and_get() {
        let registry = ProcessRegistry::new();
        registry.register(create_test_record(100)).unwrap();

        let record = registry.get(ProcessId::new(100)).unwrap();
        assert_eq!(record.identity, ProcessId::new(100));
        assert_eq!(record.status, ProcessStatus::Starting);
        assert!(registry.get(ProcessId::new(101)).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_duplicate() {
        let registry = ProcessRegistry::new();
        registry.register(create_test_record(100)).unwrap();

        let result = registry.register(create_test_record(100));
        assert!(matches!(result, Err(DevwardenError::DuplicateIdentity(_))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = ProcessRegistry::new();
        registry.register(create_test_record(100)).unwrap();

        assert!(registry.remove(ProcessId::new(100)).is_some());
        assert!(registry.remove(ProcessId::new(100)).is_none());
        assert!(registry.get(ProcessId::new(100)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_list_snapshot() {
        let registry = ProcessRegistry::new();
        registry.register(create_test_record(1)).unwrap();
        registry.register(create_test_record(2)).unwrap();

        let snapshot = registry.list();
        registry.remove(ProcessId::new(1));

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_set_status_follows_state_machine() {
        let registry = ProcessRegistry::new();
        let id = ProcessId::new(7);
        registry.register(create_test_record(7)).unwrap();

        assert_eq!(registry.set_status(id, ProcessStatus::Running).unwrap(), ProcessStatus::Starting);
        assert_eq!(registry.set_status(id, ProcessStatus::Running).unwrap(), ProcessStatus::Running);

        let result = registry.set_status(id, ProcessStatus::Starting);
        assert!(matches!(result, Err(DevwardenError::InvalidTransition(_, _, _))));

        registry.set_status(id, ProcessStatus::Failed).unwrap();
        assert!(registry.set_status(id, ProcessStatus::Running).is_err());
        assert_eq!(registry.get(id).unwrap().status, ProcessStatus::Failed);
    }

    #[test]
    fn test_set_status_missing() {
        let registry = ProcessRegistry::new();
        let result = registry.set_status(ProcessId::new(9), ProcessStatus::Running);
        assert!(matches!(result, Err(DevwardenError::ProcessNotFound(_))));
    }

    #[test]
    fn test_mark_stop_requested() {
        let registry = ProcessRegistry::new();
        registry.register(create_test_record(5)).unwrap();

        assert!(registry.mark_stop_requested(ProcessId::new(5)));
        assert!(registry.get(ProcessId::new(5)).unwrap().stop_requested);
        assert!(!registry.mark_stop_requested(ProcessId::new(6)));
    }

    #[test]
    fn test_clear() {
        let registry = ProcessRegistry::new();
        registry.register(create_test_record(1)).unwrap();
        registry.register(create_test_record(2)).unwrap();

        let drained = registry.clear();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_after_close_is_refused() {
        let registry = ProcessRegistry::new();
        registry.register(create_test_record(1)).unwrap();

        registry.close();
        assert!(registry.is_closed());

        let result = registry.register(create_test_record(2));
        assert!(matches!(result, Err(DevwardenError::Launch(_))));
        assert_eq!(registry.identities(), vec![ProcessId::new(1)]);
    }

    #[test]
    fn test_concurrent_register_remove() {
        let registry = Arc::new(ProcessRegistry::new());
        let mut handles = Vec::new();

        for worker in 0..8u32 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                for i in 0..200u32 {
                    let pid = worker * 1000 + i;
                    registry.register(create_test_record(pid)).unwrap();
                    assert!(registry.get(ProcessId::new(pid)).is_some());
                    if i % 2 == 0 {
                        registry.remove(ProcessId::new(pid));
                        assert!(registry.get(ProcessId::new(pid)).is_none());
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 8 * 100);
    }
}
