// Native buffer handler interface
//
// The buffer handler owns allocation and import of the underlying
// shared memory. We only borrow its buffers, and owe it a release and
// a destroy for every handle we copy.
use crate::descriptor::BufferRecord;
use crate::{HwcError, Result};
use utils::log;

use std::sync::{Arc, Weak};

/// An opaque native buffer handle.
///
/// Only the `BufferHandler` that produced it knows what it refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(pub u64);

/// The allocator side of a buffer.
pub trait BufferHandler: Send + Sync {
    /// Make our own copy of `handle` that we can release independently
    fn copy_handle(&self, handle: &NativeHandle) -> NativeHandle;
    /// Look up the buffer layout for a handle, taking a reference on
    /// the underlying buffer. `None` if the buffer can't be imported.
    fn import_buffer(&self, handle: &NativeHandle) -> Option<BufferRecord>;
    /// Drop the reference taken by `import_buffer`
    fn release_buffer(&self, handle: &NativeHandle);
    /// Destroy a handle created by `copy_handle`
    fn destroy_handle(&self, handle: &NativeHandle);
}

/// Our obligations to a `BufferHandler` for one copied handle.
///
/// Dropping this releases the imported buffer (if the import
/// succeeded) and then destroys the handle, exactly once. We only hold
/// a weak reference to the handler: if it has already gone away there
/// is nobody left to release to.
pub struct HandleGuard {
    hg_handler: Weak<dyn BufferHandler>,
    hg_handle: NativeHandle,
    /// Does the handler hold a buffer reference for us
    hg_imported: bool,
}

impl HandleGuard {
    /// Copy `handle` and take responsibility for destroying the copy
    pub fn copy(handle: &NativeHandle, handler: &Arc<dyn BufferHandler>) -> Self {
        Self {
            hg_handle: handler.copy_handle(handle),
            hg_handler: Arc::downgrade(handler),
            hg_imported: false,
        }
    }

    /// Import the copied handle.
    ///
    /// On success the guard also owes a `release_buffer` when dropped.
    pub fn import(&mut self) -> Result<BufferRecord> {
        let handler = self.hg_handler.upgrade().ok_or(HwcError::HANDLER_GONE)?;
        let record = handler
            .import_buffer(&self.hg_handle)
            .ok_or(HwcError::IMPORT_FAILED)?;
        self.hg_imported = true;
        Ok(record)
    }

    pub fn handle(&self) -> &NativeHandle {
        &self.hg_handle
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        let handler = match self.hg_handler.upgrade() {
            Some(h) => h,
            None => {
                log::error!(
                    "Buffer handler went away before handle {:?} was released",
                    self.hg_handle
                );
                return;
            }
        };

        if self.hg_imported {
            handler.release_buffer(&self.hg_handle);
        }
        handler.destroy_handle(&self.hg_handle);
    }
}
