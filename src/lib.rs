//! # Display buffers shared between scanout and the GPU
//!
//! A `DrmBuffer` wraps one shared memory buffer (a dmabuf) and makes it
//! consumable by three different users:
//! * The kernel display subsystem, by registering a DRM framebuffer
//!   for scanout (`create_frame_buffer`).
//! * EGL, by importing the dmabuf planes as an `EGLImageKHR`
//!   (`import_egl_image`).
//! * Vulkan, by importing the dmabuf fd as external memory and binding
//!   it to a new `VkImage` (`import_vk_image`).
//!
//! The buffer itself is allocated elsewhere. A `BufferHandler` hands us
//! the plane layout of the buffer, and we owe it a release once we are
//! done.
//!
//! ```ignore
//! use wsi::{DrmBuffer, DrmDevice, VkImportInfo};
//!
//! let buffer = DrmBuffer::from_native_handle(&handle, &handler)?;
//! let drm = Arc::new(DrmDevice::open("/dev/dri/card0")?);
//!
//! // Make it scannable, then hand it to the renderer
//! buffer.create_frame_buffer(drm)?;
//! let import = buffer.import_vk_image(&backend, &VkImportInfo::builder().build());
//! let (image, memory) = import.into_result()?;
//! ```
//!
//! ## Requirements
//!
//! The Vulkan path needs the following to be available:
//! * VK_KHR_get_physical_device_properties2
//! * VK_KHR_external_memory
//! * VK_KHR_external_memory_fd
//!
//! The EGL path needs EGL_EXT_image_dma_buf_import.

mod buffer;
mod descriptor;
mod egl;
mod format;
mod handler;
mod kms;
mod vulkan;

pub use buffer::{BufferDump, DrmBuffer};
pub use descriptor::{BufferDescriptor, BufferRecord, LayerUsage, MAX_PLANES};
pub use egl::{DmabufImageAttribs, DmabufPlaneAttrib, EglDmabufImporter, EglImageImporter};
pub use format::{fourcc_code, is_multiplanar, vk_format_for, PlaneLayout};
pub use handler::{BufferHandler, HandleGuard, NativeHandle};
pub use kms::drm_device::DrmDevice;
pub use kms::{FramebufferBinding, KmsDevice};
pub use vulkan::{
    import_external_image, AshImportBackend, ImportStage, VkImport, VkImportBackend, VkImportInfo,
    VkImportInfoBuilder,
};

pub use drm::buffer::DrmFourcc;
pub use khronos_egl;

use ash::vk;
use thiserror::Error;


/// Errors reported by this crate.
///
/// None of these are fatal. The caller decides whether to retry, skip
/// scanout for this buffer, or give up on the buffer entirely.
#[allow(non_camel_case_types)]
#[derive(Error, Debug)]
pub enum HwcError {
    #[error("The buffer handler could not import this buffer")]
    IMPORT_FAILED,
    #[error("The buffer handler is no longer alive")]
    HANDLER_GONE,
    #[error("The kernel rejected the framebuffer: {0}")]
    ADD_FB_FAILED(std::io::Error),
    #[error("The kernel failed to remove framebuffer {0}: {1}")]
    RM_FB_FAILED(u32, std::io::Error),
    #[error("Could not resolve the entry point {0}")]
    MISSING_ENTRY_POINT(&'static str),
    #[error("Vulkan import failed during {stage:?}: {res}")]
    VK_IMPORT_FAILED { stage: ImportStage, res: vk::Result },
}

pub type Result<T> = std::result::Result<T, HwcError>;
