/// DRM Device
///
/// A DRM node that buffers can register their framebuffers with.
#[cfg(target_os = "linux")]
use nix::sys::stat::makedev;

use super::KmsDevice;
use crate::descriptor::{BufferDescriptor, MAX_PLANES};

use drm::buffer::{self, DrmFourcc, DrmModifier, PlanarBuffer};
use drm::control::{self, framebuffer, Device as ControlDevice};
use utils::{log, Context};

use std::num::NonZeroU32;
use std::path::Path;

// In FreeBSD types.h:
//
// #define makedev(M, m)   __makedev((M), (m))
// static __inline dev_t
// __makedev(int _Major, int _Minor)
// {
//     return (((dev_t)(_Major & 0xffffff00) << 32) | ((_Major & 0xff) << 8) |
//         ((dev_t)(_Minor & 0xff00) << 24) | (_Minor & 0xffff00ff));
// }
#[cfg(target_os = "freebsd")]
fn makedev(major: u64, minor: u64) -> u64 {
    (((major & 0xffffff00) as u64) << 32)
        | (((major & 0xff) as u64) << 8)
        | ((minor & 0xff00 as u64) << 24)
        | (minor & 0xffff00ff)
}

/// Our DRM node accessor helper
///
/// This provides drm-rs with access to the DRM fd
/// and gives us a place to make calls to DRM
pub struct DrmDevice {
    ds_drm_fd: std::fs::File,
}

/// Implementing `AsFd` is a prerequisite to implementing the drm-rs
/// device traits. Here, we are just calling `as_fd()` on the inner File.
impl std::os::unix::io::AsFd for DrmDevice {
    fn as_fd(&self) -> std::os::unix::io::BorrowedFd<'_> {
        self.ds_drm_fd.as_fd()
    }
}

impl drm::Device for DrmDevice {}
impl ControlDevice for DrmDevice {}

impl DrmDevice {
    /// Open the DRM node at `path`, i.e. /dev/dri/card0
    pub fn open<P: AsRef<Path>>(path: P) -> utils::Result<Self> {
        let path = path.as_ref();
        let mut options = std::fs::OpenOptions::new();
        options.read(true);
        options.write(true);
        let file = options
            .open(path)
            .with_context(|| format!("Could not open DRM Device path {}", path.display()))?;

        Ok(Self { ds_drm_fd: file })
    }

    /// Open the primary node for a device number, as reported by
    /// VK_EXT_physical_device_drm or udev.
    pub fn from_dev(major: i64, minor: i64) -> utils::Result<Self> {
        let dev_t = makedev(major as u64, minor as u64);
        #[cfg(target_os = "freebsd")]
        let dev_t = dev_t as u32;
        let path = drm::node::dev_path(dev_t.into(), drm::node::NodeType::Primary)
            .with_context(|| format!("Could not get DRM path from dev_t {}", dev_t))?;

        log::debug!("Opening DRM node {}", path.display());
        Self::open(&path)
    }
}

/// The view of a descriptor that we hand to AddFB2.
///
/// This reports the recommended framebuffer format instead of the
/// true format, which is how cursor buffers end up as ARGB8888.
struct ScanoutBuffer<'a>(&'a BufferDescriptor);

impl<'a> PlanarBuffer for ScanoutBuffer<'a> {
    fn size(&self) -> (u32, u32) {
        (self.0.width(), self.0.height())
    }

    fn format(&self) -> DrmFourcc {
        self.0.frame_buffer_format()
    }

    fn modifier(&self) -> Option<DrmModifier> {
        None
    }

    fn pitches(&self) -> [u32; MAX_PLANES] {
        *self.0.pitches()
    }

    fn handles(&self) -> [Option<buffer::Handle>; MAX_PLANES] {
        let handles = *self.0.gem_handles();
        handles.map(|h| NonZeroU32::new(h).map(buffer::Handle::from))
    }

    fn offsets(&self) -> [u32; MAX_PLANES] {
        *self.0.offsets()
    }
}

impl KmsDevice for DrmDevice {
    fn add_framebuffer(&self, desc: &BufferDescriptor) -> std::io::Result<u32> {
        let fb = self.add_planar_framebuffer(&ScanoutBuffer(desc), control::FbCmd2Flags::empty())?;
        Ok(fb.into())
    }

    fn remove_framebuffer(&self, fb_id: u32) -> std::io::Result<()> {
        let fb: framebuffer::Handle = control::from_u32(fb_id).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "framebuffer id 0")
        })?;
        self.destroy_framebuffer(fb)
    }
}
