//! Deferred destruction of GPU objects
//!
//! Shared resources ([`Material`](super::Material), [`Mesh`](super::Mesh),
//! render targets) may be dropped while commands that reference them are
//! still queued. Their `Drop` impls hand the device ids to the
//! [`ReleaseQueue`]; the renderer destroys them after its next completed
//! fence wait, when no submission can still read them.

use std::sync::{Arc, Mutex, PoisonError};

use crate::render::device::{BufferId, DeviceResult, ImageId, PipelineId, RenderDevice};

/// A device object waiting for a safe point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingRelease {
    /// Buffer
    Buffer(BufferId),
    /// Image
    Image(ImageId),
    /// Pipeline
    Pipeline(PipelineId),
}

/// Shared device handle plus the list of objects awaiting destruction
pub struct ReleaseQueue {
    device: Arc<dyn RenderDevice>,
    pending: Mutex<Vec<PendingRelease>>,
}

impl std::fmt::Debug for ReleaseQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseQueue")
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl ReleaseQueue {
    /// Create an empty queue for `device`
    pub fn new(device: Arc<dyn RenderDevice>) -> Self {
        Self {
            device,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Device the queued ids belong to
    pub fn device(&self) -> &Arc<dyn RenderDevice> {
        &self.device
    }

    /// Schedule an object for destruction
    pub fn defer(&self, item: PendingRelease) {
        log::trace!("Deferring release of {item:?}");
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).push(item);
    }

    /// Number of objects waiting
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Destroy everything queued so far
    ///
    /// Only call once every submission that could reference the queued
    /// objects has completed. Keeps going after a failure and reports the
    /// first error.
    pub fn flush(&self) -> DeviceResult<usize> {
        let items = std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        let count = items.len();
        let mut first_error = None;

        for item in items {
            let result = match item {
                PendingRelease::Buffer(id) => self.device.destroy_buffer(id),
                PendingRelease::Image(id) => self.device.destroy_image(id),
                PendingRelease::Pipeline(id) => self.device.destroy_pipeline(id),
            };
            if let Err(error) = result {
                log::error!("Failed to release {item:?}: {error}");
                first_error.get_or_insert(error);
            }
        }

        if count > 0 {
            log::debug!("Released {count} deferred GPU objects");
        }
        first_error.map_or(Ok(count), Err)
    }
}

impl Drop for ReleaseQueue {
    fn drop(&mut self) {
        if self.pending_count() == 0 {
            return;
        }
        if let Err(error) = self.device.wait_idle() {
            log::error!("wait_idle failed while dropping the release queue: {error}");
        }
        if let Err(error) = self.flush() {
            log::error!("Failed to flush deferred releases on drop: {error}");
        }
    }
}
