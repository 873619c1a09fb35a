// Kernel framebuffer binding
//
// Registers a buffer descriptor with the display subsystem so it
// can be scanned out, and tears that registration down again.
pub mod drm_device;

use crate::descriptor::BufferDescriptor;
use crate::format::fourcc_code;
use crate::{HwcError, Result};
use utils::log;

use std::sync::Arc;

/// The kernel side of scanout.
///
/// `DrmDevice` implements this with drm-rs. Framebuffer ids are the
/// raw kernel ids, 0 is never a valid framebuffer.
pub trait KmsDevice: Send + Sync {
    /// Register `desc` as a (possibly multi-planar) framebuffer using
    /// its recommended framebuffer format. Returns the new fb id.
    fn add_framebuffer(&self, desc: &BufferDescriptor) -> std::io::Result<u32>;
    /// Remove a framebuffer previously returned by `add_framebuffer`
    fn remove_framebuffer(&self, fb_id: u32) -> std::io::Result<()>;
}

/// A buffer's registration with the kernel.
///
/// There is at most one live framebuffer per binding. Creating a new
/// one always removes the old one first, so changing the format or
/// geometry of a buffer never leaks kernel framebuffers.
///
/// This is not internally synchronized. Callers must serialize
/// create/release on the same binding.
pub struct FramebufferBinding {
    /// The device fb_id was registered on. Only set while bound.
    fb_dev: Option<Arc<dyn KmsDevice>>,
    /// 0 when unbound
    fb_id: u32,
}

impl FramebufferBinding {
    pub fn new() -> Self {
        Self {
            fb_dev: None,
            fb_id: 0,
        }
    }

    /// The current framebuffer id, 0 if unbound
    pub fn id(&self) -> u32 {
        self.fb_id
    }

    pub fn is_bound(&self) -> bool {
        self.fb_id != 0
    }

    /// Register `desc` with `dev`, replacing any existing framebuffer.
    ///
    /// A kernel rejection is logged and returned, and leaves the binding
    /// unbound. That only means this buffer can't be scanned out, the
    /// caller can still composite it.
    pub fn create(&mut self, dev: Arc<dyn KmsDevice>, desc: &BufferDescriptor) -> Result<u32> {
        // Errors from dropping the old framebuffer were already logged,
        // and the binding is clear either way
        let _ = self.release();

        match dev.add_framebuffer(desc) {
            Ok(id) => {
                log::debug!(
                    "Created framebuffer {} ({}x{}, {})",
                    id,
                    desc.width(),
                    desc.height(),
                    fourcc_code(desc.frame_buffer_format())
                );
                self.fb_id = id;
                self.fb_dev = Some(dev);
                Ok(id)
            }
            Err(e) => {
                log::error!(
                    "AddFB2 error ({}x{}, {}, handle {} pitch {}) ({})",
                    desc.width(),
                    desc.height(),
                    fourcc_code(desc.frame_buffer_format()),
                    desc.gem_handles()[0],
                    desc.pitches()[0],
                    e
                );
                self.fb_id = 0;
                Err(HwcError::ADD_FB_FAILED(e))
            }
        }
    }

    /// Remove our framebuffer from the kernel, if we have one.
    ///
    /// The binding is always unbound afterwards, even if the kernel
    /// refused the removal. Holding on to the id would only lead to a
    /// second removal attempt later. Unbound bindings never call into
    /// the kernel.
    pub fn release(&mut self) -> Result<()> {
        let id = std::mem::replace(&mut self.fb_id, 0);
        let dev = match self.fb_dev.take() {
            Some(dev) => dev,
            None => return Ok(()),
        };
        if id == 0 {
            return Ok(());
        }

        dev.remove_framebuffer(id).map_err(|e| {
            log::error!("Failed to remove fb {}: {}", id, e);
            HwcError::RM_FB_FAILED(id, e)
        })
    }
}

impl Drop for FramebufferBinding {
    fn drop(&mut self) {
        let _ = self.release();
    }
}
