// A display buffer shared by scanout, EGL and Vulkan
//
// This ties a buffer descriptor together with its kernel framebuffer
// and the handle we borrowed from the buffer handler.
use crate::descriptor::{BufferDescriptor, BufferRecord, LayerUsage, MAX_PLANES};
use crate::egl::{DmabufImageAttribs, EglImageImporter};
use crate::format::fourcc_code;
use crate::handler::{BufferHandler, HandleGuard, NativeHandle};
use crate::kms::{FramebufferBinding, KmsDevice};
use crate::vulkan::{import_external_image, VkImport, VkImportBackend, VkImportInfo};
use crate::Result;
use drm::buffer::DrmFourcc;
use khronos_egl as egl;
use utils::log;

use std::fmt;
use std::sync::Arc;

/// One shared buffer and everything needed to consume it.
///
/// The descriptor is fixed at creation, apart from the recommended
/// framebuffer format. GPU images imported from this buffer are owned
/// by whoever imported them, we keep no track of them. Kernel
/// framebuffers on the other hand are owned by us and removed when
/// the buffer is dropped.
///
/// Not internally synchronized: framebuffer create/release on one
/// buffer must be serialized by the caller. Imports only read the
/// descriptor and can run from any thread holding a reference.
pub struct DrmBuffer {
    b_desc: BufferDescriptor,
    b_fb: FramebufferBinding,
    /// Our copy of the native handle, if we were imported from one
    b_handle: Option<HandleGuard>,
}

impl DrmBuffer {
    /// Wrap an already described buffer. There is no handler to
    /// release anything to.
    pub fn from_descriptor(desc: BufferDescriptor) -> Self {
        Self {
            b_desc: desc,
            b_fb: FramebufferBinding::new(),
            b_handle: None,
        }
    }

    /// Describe and wrap a raw buffer record
    pub fn from_record(bo: &BufferRecord) -> Self {
        Self::from_descriptor(BufferDescriptor::from_record(bo))
    }

    /// Import a native handle through `handler`.
    ///
    /// We copy the handle and import the copy. The copy is destroyed
    /// again if the import fails, otherwise it is released and destroyed
    /// when this buffer is dropped.
    pub fn from_native_handle(
        handle: &NativeHandle,
        handler: &Arc<dyn BufferHandler>,
    ) -> Result<Self> {
        let mut guard = HandleGuard::copy(handle, handler);
        let bo = guard.import().map_err(|e| {
            log::error!("Failed to Import buffer {:?}: {}", handle, e);
            e
        })?;

        Ok(Self {
            b_desc: BufferDescriptor::from_record(&bo),
            b_fb: FramebufferBinding::new(),
            b_handle: Some(guard),
        })
    }

    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.b_desc
    }

    /// The true pixel format of the contents
    pub fn format(&self) -> DrmFourcc {
        self.b_desc.format()
    }

    pub fn frame_buffer_format(&self) -> DrmFourcc {
        self.b_desc.frame_buffer_format()
    }

    pub fn is_yuv(&self) -> bool {
        self.b_desc.is_yuv()
    }

    /// The kernel framebuffer id, 0 if we don't have one
    pub fn fb(&self) -> u32 {
        self.b_fb.id()
    }

    /// The native handle we imported from, if any
    pub fn native_handle(&self) -> Option<&NativeHandle> {
        self.b_handle.as_ref().map(|g| g.handle())
    }

    /// Change the format used for future framebuffers.
    ///
    /// An existing framebuffer keeps its format until it is recreated.
    pub fn set_recommended_format(&mut self, format: DrmFourcc) {
        self.b_desc.set_frame_buffer_format(format);
    }

    /// Register this buffer as a kernel framebuffer on `dev`.
    ///
    /// Any framebuffer we already had is removed first. On failure the
    /// buffer is left without a framebuffer.
    pub fn create_frame_buffer(&mut self, dev: Arc<dyn KmsDevice>) -> Result<u32> {
        self.b_fb.create(dev, &self.b_desc)
    }

    /// Remove our kernel framebuffer, if we have one.
    ///
    /// Afterwards `fb()` is 0 even if the kernel reported an error.
    pub fn release_frame_buffer(&mut self) -> Result<()> {
        self.b_fb.release()
    }

    /// Import this buffer into EGL.
    ///
    /// The returned image belongs to the caller.
    pub fn import_egl_image<I: EglImageImporter + ?Sized>(&self, importer: &I) -> Option<egl::Image> {
        importer.create_dmabuf_image(&DmabufImageAttribs::from_descriptor(&self.b_desc))
    }

    /// Import this buffer into Vulkan.
    ///
    /// Check the result before using the handles in it. The returned
    /// image and memory belong to the caller.
    pub fn import_vk_image<B: VkImportBackend + ?Sized>(
        &self,
        backend: &B,
        info: &VkImportInfo,
    ) -> VkImport {
        import_external_image(backend, &self.b_desc, info)
    }

    /// Get a printable description of this buffer
    pub fn dump_info(&self) -> BufferDump<'_> {
        BufferDump { bd_buffer: self }
    }

    /// Log everything we know about this buffer
    pub fn dump(&self) {
        for line in self.dump_info().to_string().lines() {
            log::info!("{}", line);
        }
    }
}

impl Drop for DrmBuffer {
    fn drop(&mut self) {
        // The framebuffer has to go before the handler releases the
        // memory backing it
        let _ = self.b_fb.release();
        self.b_handle.take();
    }
}

/// Debug dump of a `DrmBuffer`, see `DrmBuffer::dump_info`
pub struct BufferDump<'a> {
    bd_buffer: &'a DrmBuffer,
}

impl<'a> fmt::Display for BufferDump<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buffer = self.bd_buffer;
        let desc = buffer.descriptor();
        let usage = desc.usage();

        writeln!(f, "DrmBuffer Information Starts. -------------")?;
        for (flag, name) in [
            (LayerUsage::NORMAL, "Normal"),
            (LayerUsage::CURSOR, "Cursor"),
            (LayerUsage::PROTECTED, "Protected"),
            (LayerUsage::VIDEO, "Video"),
        ] {
            if usage.contains(flag) {
                writeln!(f, "BufferUsage: {}.", name)?;
            }
        }
        writeln!(f, "Width: {}", desc.width())?;
        writeln!(f, "Height: {}", desc.height())?;
        writeln!(f, "Fb: {}", buffer.fb())?;
        writeln!(f, "Prime Handle: {}", desc.prime_fd())?;
        writeln!(f, "Format: {}", fourcc_code(desc.format()))?;
        for i in 0..MAX_PLANES {
            writeln!(f, "Pitch:{} value:{}", i, desc.pitches()[i])?;
            writeln!(f, "Offset:{} value:{}", i, desc.offsets()[i])?;
            writeln!(f, "Gem Handles:{} value:{}", i, desc.gem_handles()[i])?;
        }
        write!(f, "DrmBuffer Information Ends. -------------")
    }
}
