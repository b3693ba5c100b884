use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::app::error::AppError;
use crate::app::models::{FlashQueueEntry, FlashStatus};

/// Ordered (partition, image) pairs. Structural edits are only accepted while no batch is
/// running; during a run the engine is the single writer of row statuses.
#[derive(Debug, Default)]
pub struct FlashQueue {
    entries: Mutex<Vec<FlashQueueEntry>>,
    running: AtomicBool,
}

/// Partition guessed from an image file name: `Boot_A.img` -> `boot_a`.
pub fn partition_from_image_path(image_path: &str) -> String {
    let name = Path::new(image_path.trim())
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.strip_suffix(".img")
        .or_else(|| name.strip_suffix(".bin"))
        .unwrap_or(&name)
        .to_string()
}

impl FlashQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<FlashQueueEntry>> {
        // A panic while holding the lock leaves plain data behind; keep using it.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock for a structural edit, rejecting it while a batch owns the queue.
    fn lock_idle(&self, trace_id: &str) -> Result<MutexGuard<'_, Vec<FlashQueueEntry>>, AppError> {
        let guard = self.lock();
        if self.is_running() {
            return Err(AppError::busy(
                "Flash queue cannot be edited while a batch flash is running",
                trace_id,
            ));
        }
        Ok(guard)
    }

    pub fn add(&self, partition: &str, image_path: &str, trace_id: &str) -> Result<usize, AppError> {
        if partition.trim().is_empty() {
            return Err(AppError::validation("partition is required", trace_id));
        }
        if image_path.trim().is_empty() {
            return Err(AppError::validation("image path is required", trace_id));
        }
        let mut guard = self.lock_idle(trace_id)?;
        guard.push(FlashQueueEntry::new(partition.trim(), image_path.trim()));
        Ok(guard.len() - 1)
    }

    /// File picker / drag-drop entry point: partition comes from the file name.
    pub fn add_image(&self, image_path: &str, trace_id: &str) -> Result<usize, AppError> {
        let partition = partition_from_image_path(image_path);
        self.add(&partition, image_path, trace_id)
    }

    /// Inline edit of the partition cell. Blank names are accepted here and fail at flash
    /// time without invoking fastboot.
    pub fn set_partition(&self, index: usize, partition: &str, trace_id: &str) -> Result<(), AppError> {
        let mut guard = self.lock_idle(trace_id)?;
        let entry = guard
            .get_mut(index)
            .ok_or_else(|| AppError::validation(format!("no queue entry at index {index}"), trace_id))?;
        entry.partition = partition.trim().to_string();
        Ok(())
    }

    pub fn remove(&self, index: usize, trace_id: &str) -> Result<FlashQueueEntry, AppError> {
        let mut guard = self.lock_idle(trace_id)?;
        if index >= guard.len() {
            return Err(AppError::validation(
                format!("no queue entry at index {index}"),
                trace_id,
            ));
        }
        Ok(guard.remove(index))
    }

    pub fn clear(&self, trace_id: &str) -> Result<(), AppError> {
        let mut guard = self.lock_idle(trace_id)?;
        guard.clear();
        Ok(())
    }

    pub fn reset_statuses(&self, trace_id: &str) -> Result<(), AppError> {
        let mut guard = self.lock_idle(trace_id)?;
        for entry in guard.iter_mut() {
            entry.status = FlashStatus::Pending;
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<FlashQueueEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Idle -> Running. Fails when already running or when there is nothing to flash.
    /// Returns the number of rows the run will process.
    pub(crate) fn begin_run(&self, trace_id: &str) -> Result<usize, AppError> {
        let mut guard = self.lock();
        if guard.is_empty() {
            return Err(AppError::validation("Flash queue is empty", trace_id));
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::busy("A batch flash is already running", trace_id));
        }
        for entry in guard.iter_mut() {
            entry.status = FlashStatus::Pending;
        }
        Ok(guard.len())
    }

    /// Running -> Idle.
    pub(crate) fn end_run(&self) {
        let _guard = self.lock();
        self.running.store(false, Ordering::SeqCst);
    }

    pub(crate) fn entry(&self, index: usize) -> Option<FlashQueueEntry> {
        self.lock().get(index).cloned()
    }

    pub(crate) fn set_status(&self, index: usize, status: FlashStatus) {
        if let Some(entry) = self.lock().get_mut(index) {
            entry.status = status;
        }
    }
}
