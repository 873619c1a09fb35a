// Pixel format classification
//
// Every import path branches on how many planes a format has. We
// resolve that once when the buffer is described instead of matching
// on the fourcc in every import call.
use ash::vk;
use drm::buffer::DrmFourcc;

/// How the pixel data of a buffer is split across planes.
///
/// All planes of a buffer live in the same allocation and share one
/// dmabuf fd. They only differ in pitch and offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneLayout {
    /// A single plane of packed pixels
    Packed,
    /// Luma plane followed by an interleaved chroma plane
    TwoPlane,
    /// Luma plane followed by two separate chroma planes
    ThreePlane,
}

impl PlaneLayout {
    /// Classify a format.
    ///
    /// This is a fixed table and not a guess based on the number of
    /// pitches the allocator filled in. Only NV12, YUV420, YVU420 and
    /// UYVY are treated as YUV, everything else is packed.
    pub fn from_format(format: DrmFourcc) -> Self {
        match format {
            DrmFourcc::Nv12 => PlaneLayout::TwoPlane,
            DrmFourcc::Yuv420 | DrmFourcc::Yvu420 | DrmFourcc::Uyvy => PlaneLayout::ThreePlane,
            _ => PlaneLayout::Packed,
        }
    }

    pub fn is_yuv(&self) -> bool {
        *self != PlaneLayout::Packed
    }

    /// The number of planes passed along during imports
    pub fn plane_count(&self) -> usize {
        match self {
            PlaneLayout::Packed => 1,
            PlaneLayout::TwoPlane => 2,
            PlaneLayout::ThreePlane => 3,
        }
    }
}

/// Is this one of the multi-planar YUV formats
pub fn is_multiplanar(format: DrmFourcc) -> bool {
    PlaneLayout::from_format(format).is_yuv()
}

/// Render the four character code of a format, i.e. "AR24"
///
/// Non printable bytes are replaced with '?'.
pub fn fourcc_code(format: DrmFourcc) -> String {
    (format as u32)
        .to_le_bytes()
        .iter()
        .map(|&b| match b.is_ascii_graphic() || b == b' ' {
            true => b as char,
            false => '?',
        })
        .collect()
}

/// Translate a DRM format into the matching Vulkan format.
///
/// Returns `vk::Format::UNDEFINED` if Vulkan has no equivalent.
pub fn vk_format_for(format: DrmFourcc) -> vk::Format {
    match format {
        DrmFourcc::R8 => vk::Format::R8_UNORM,
        DrmFourcc::Gr88 => vk::Format::R8G8_UNORM,
        DrmFourcc::Rgb565 => vk::Format::R5G6B5_UNORM_PACK16,
        DrmFourcc::Xbgr8888 | DrmFourcc::Abgr8888 => vk::Format::R8G8B8A8_UNORM,
        DrmFourcc::Xrgb8888 | DrmFourcc::Argb8888 => vk::Format::B8G8R8A8_UNORM,
        DrmFourcc::Abgr2101010 => vk::Format::A2B10G10R10_UNORM_PACK32,
        DrmFourcc::Argb2101010 => vk::Format::A2R10G10B10_UNORM_PACK32,
        DrmFourcc::Nv12 => vk::Format::G8_B8R8_2PLANE_420_UNORM,
        DrmFourcc::Yuv420 => vk::Format::G8_B8_R8_3PLANE_420_UNORM,
        _ => vk::Format::UNDEFINED,
    }
}
