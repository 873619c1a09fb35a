// Buffer descriptors
//
// The normalized geometry, plane layout and format of one shared
// buffer. This is the single source of truth that the framebuffer
// and both GPU import paths read from.
use crate::format::PlaneLayout;
use bitflags::bitflags;
use drm::buffer::DrmFourcc;

use std::os::unix::io::RawFd;

/// The most planes a DRM framebuffer can reference
pub const MAX_PLANES: usize = 4;

bitflags! {
    /// What the compositor intends to do with this buffer.
    ///
    /// These are not mutually exclusive, a protected video buffer
    /// will have both bits set.
    pub struct LayerUsage: u32 {
        const NORMAL = 1 << 0;
        const CURSOR = 1 << 1;
        const PROTECTED = 1 << 2;
        const VIDEO = 1 << 3;
    }
}

/// The raw buffer object layout handed to us by a `BufferHandler`
/// after it imports a native handle.
#[derive(Debug, Clone)]
pub struct BufferRecord {
    pub width: u32,
    pub height: u32,
    pub format: DrmFourcc,
    /// Bytes per row of each plane
    pub pitches: [u32; MAX_PLANES],
    /// Byte offset of each plane into the shared buffer
    pub offsets: [u32; MAX_PLANES],
    /// GEM handles for each plane, 0 for unused planes
    pub gem_handles: [u32; MAX_PLANES],
    /// The dmabuf fd. This is owned by the handler, not us.
    pub prime_fd: RawFd,
    pub usage: LayerUsage,
}

/// A normalized `BufferRecord`.
///
/// Values are copied as-is from the record. Bad geometry is the
/// allocator's problem and will be caught by the kernel or the GPU
/// driver when we try to import it.
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    bd_width: u32,
    bd_height: u32,
    bd_format: DrmFourcc,
    /// The format we will ask the kernel to scan out. This can differ
    /// from bd_format, see `from_record`.
    bd_frame_buffer_format: DrmFourcc,
    bd_pitches: [u32; MAX_PLANES],
    bd_offsets: [u32; MAX_PLANES],
    bd_gem_handles: [u32; MAX_PLANES],
    bd_prime_fd: RawFd,
    bd_usage: LayerUsage,
    /// Resolved from bd_format when the descriptor is created
    bd_layout: PlaneLayout,
}

impl BufferDescriptor {
    /// Normalize a raw buffer record.
    ///
    /// Cursor planes only accept ARGB8888, so cursor buffers always
    /// recommend ARGB8888 for scanout no matter what they really
    /// contain. The caller is responsible for the bytes actually
    /// matching that.
    pub fn from_record(bo: &BufferRecord) -> Self {
        let frame_buffer_format = match bo.usage.contains(LayerUsage::CURSOR) {
            true => DrmFourcc::Argb8888,
            false => bo.format,
        };

        Self {
            bd_width: bo.width,
            bd_height: bo.height,
            bd_format: bo.format,
            bd_frame_buffer_format: frame_buffer_format,
            bd_pitches: bo.pitches,
            bd_offsets: bo.offsets,
            bd_gem_handles: bo.gem_handles,
            bd_prime_fd: bo.prime_fd,
            bd_usage: bo.usage,
            bd_layout: PlaneLayout::from_format(bo.format),
        }
    }

    pub fn width(&self) -> u32 {
        self.bd_width
    }

    pub fn height(&self) -> u32 {
        self.bd_height
    }

    /// The true pixel format of the buffer contents
    pub fn format(&self) -> DrmFourcc {
        self.bd_format
    }

    /// The format used when registering a kernel framebuffer
    pub fn frame_buffer_format(&self) -> DrmFourcc {
        self.bd_frame_buffer_format
    }

    /// Override the scanout format, i.e. after the compositor
    /// renegotiated what the plane should display.
    pub fn set_frame_buffer_format(&mut self, format: DrmFourcc) {
        self.bd_frame_buffer_format = format;
    }

    pub fn pitches(&self) -> &[u32; MAX_PLANES] {
        &self.bd_pitches
    }

    pub fn offsets(&self) -> &[u32; MAX_PLANES] {
        &self.bd_offsets
    }

    pub fn gem_handles(&self) -> &[u32; MAX_PLANES] {
        &self.bd_gem_handles
    }

    pub fn prime_fd(&self) -> RawFd {
        self.bd_prime_fd
    }

    pub fn usage(&self) -> LayerUsage {
        self.bd_usage
    }

    pub fn layout(&self) -> PlaneLayout {
        self.bd_layout
    }

    pub fn is_yuv(&self) -> bool {
        self.bd_layout.is_yuv()
    }
}
