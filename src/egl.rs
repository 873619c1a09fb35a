// EGL dmabuf import
//
// Imports the planes of a buffer as an EGLImageKHR using
// EGL_EXT_image_dma_buf_import. The image is handed to the caller,
// who owns it. If creation succeeds EGL takes its own reference to the
// dmabuf, so the image stays valid independently of us.
use crate::descriptor::BufferDescriptor;
use crate::format::{fourcc_code, PlaneLayout};
use crate::{HwcError, Result};
use drm::buffer::DrmFourcc;
use utils::log;

use khronos_egl as egl;

use std::ffi::c_void;
use std::os::unix::io::RawFd;
use std::ptr;

// EGL_EXT_image_dma_buf_import, not part of core EGL
const LINUX_DMA_BUF_EXT: egl::Enum = 0x3270;
const LINUX_DRM_FOURCC_EXT: egl::Int = 0x3271;

/// (fd, offset, pitch) attribute names for each plane
const DMA_BUF_PLANE_ATTRIBS: [(egl::Int, egl::Int, egl::Int); 3] = [
    (0x3272, 0x3273, 0x3274),
    (0x3275, 0x3276, 0x3277),
    (0x3278, 0x3279, 0x327A),
];

/// eglCreateImageKHR from EGL_KHR_image_base
pub(crate) type CreateImageKhrFn = unsafe extern "system" fn(
    dpy: *mut c_void,
    ctx: *mut c_void,
    target: egl::Enum,
    buffer: *mut c_void,
    attrib_list: *const egl::Int,
) -> *mut c_void;

/// One dmabuf plane as EGL sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmabufPlaneAttrib {
    pub fd: RawFd,
    pub pitch: u32,
    pub offset: u32,
}

/// Everything eglCreateImageKHR needs to know about a dmabuf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmabufImageAttribs {
    pub width: u32,
    pub height: u32,
    pub format: DrmFourcc,
    pub planes: Vec<DmabufPlaneAttrib>,
}

impl DmabufImageAttribs {
    /// Describe the planes of `desc`.
    ///
    /// All planes point at the same fd, since the buffer is a single
    /// allocation sliced up by offset. Packed buffers always use offset 0.
    pub fn from_descriptor(desc: &BufferDescriptor) -> Self {
        let layout = desc.layout();
        let planes = match layout {
            PlaneLayout::Packed => vec![DmabufPlaneAttrib {
                fd: desc.prime_fd(),
                pitch: desc.pitches()[0],
                offset: 0,
            }],
            PlaneLayout::TwoPlane | PlaneLayout::ThreePlane => (0..layout.plane_count())
                .map(|i| DmabufPlaneAttrib {
                    fd: desc.prime_fd(),
                    pitch: desc.pitches()[i],
                    offset: desc.offsets()[i],
                })
                .collect(),
        };

        Self {
            width: desc.width(),
            height: desc.height(),
            format: desc.format(),
            planes: planes,
        }
    }

    /// Flatten into an EGL_NONE terminated attribute list
    pub fn to_attrib_list(&self) -> Vec<egl::Int> {
        let mut list = vec![
            egl::WIDTH,
            self.width as egl::Int,
            egl::HEIGHT,
            self.height as egl::Int,
            LINUX_DRM_FOURCC_EXT,
            self.format as u32 as egl::Int,
        ];

        for (plane, &(fd_attr, offset_attr, pitch_attr)) in
            self.planes.iter().zip(DMA_BUF_PLANE_ATTRIBS.iter())
        {
            list.extend_from_slice(&[
                fd_attr,
                plane.fd as egl::Int,
                pitch_attr,
                plane.pitch as egl::Int,
                offset_attr,
                plane.offset as egl::Int,
            ]);
        }

        list.extend_from_slice(&[egl::NONE, 0]);
        list
    }
}

/// Something that can turn dmabuf planes into EGL images
pub trait EglImageImporter {
    /// Returns `None` if EGL refused the import
    fn create_dmabuf_image(&self, attribs: &DmabufImageAttribs) -> Option<egl::Image>;
}

/// The real EGL importer for one display.
///
/// eglCreateImageKHR is an extension function, so it is looked up
/// once by name when this is created. The returned images belong to
/// the caller, we never destroy them.
pub struct EglDmabufImporter {
    ei_display: egl::Display,
    ei_create_image: CreateImageKhrFn,
}

impl EglDmabufImporter {
    /// Resolve the entry points we need from `instance`.
    ///
    /// Fails with MISSING_ENTRY_POINT if eglCreateImageKHR is not
    /// available.
    ///
    /// # Safety
    ///
    /// `display` must be an initialized display of `instance` and must
    /// outlive this importer.
    pub unsafe fn load<T: egl::api::EGL1_0>(
        instance: &egl::Instance<T>,
        display: egl::Display,
    ) -> Result<Self> {
        let create_image = instance
            .get_proc_address("eglCreateImageKHR")
            .map(|f| std::mem::transmute::<extern "system" fn(), CreateImageKhrFn>(f));

        Self::with_entry_point(display, create_image)
    }

    pub(crate) fn with_entry_point(
        display: egl::Display,
        create_image: Option<CreateImageKhrFn>,
    ) -> Result<Self> {
        match create_image {
            Some(f) => Ok(Self {
                ei_display: display,
                ei_create_image: f,
            }),
            None => {
                log::error!("eglGetProcAddress(eglCreateImageKHR) failed");
                Err(HwcError::MISSING_ENTRY_POINT("eglCreateImageKHR"))
            }
        }
    }
}

impl EglImageImporter for EglDmabufImporter {
    fn create_dmabuf_image(&self, attribs: &DmabufImageAttribs) -> Option<egl::Image> {
        let list = attribs.to_attrib_list();
        let raw = unsafe {
            (self.ei_create_image)(
                self.ei_display.as_ptr(),
                egl::NO_CONTEXT,
                LINUX_DMA_BUF_EXT,
                ptr::null_mut(),
                list.as_ptr(),
            )
        };

        if raw.is_null() {
            log::error!(
                "eglCreateImageKHR failed for {}x{} {} dmabuf with {} planes",
                attribs.width,
                attribs.height,
                fourcc_code(attribs.format),
                attribs.planes.len()
            );
            return None;
        }
        Some(unsafe { egl::Image::from_ptr(raw) })
    }
}
