// Vulkan external memory import
//
// Imports the dmabuf of a buffer as external memory and binds it to a
// new VkImage. This happens in four steps, each of which can fail:
// * Translate the DRM format into a Vulkan format.
// * Ask the physical device if that format can be imported.
// * Create an image flagged as externally backed.
// * Import the fd as device memory and bind it to the image.
//
// The image and memory belong to the caller. We never track or free
// them, the Vulkan device they were created on owns their lifetime.
use crate::descriptor::BufferDescriptor;
use crate::format::{fourcc_code, vk_format_for};
use crate::{HwcError, Result};
use utils::log;

use ash::prelude::VkResult;
use ash::vk;
use nix::fcntl::{fcntl, FcntlArg};
use nix::unistd::close;

use std::ffi::CStr;
use std::os::unix::io::RawFd;

const IMAGE_FORMAT_PROPERTIES2_NAME: &[u8] = b"vkGetPhysicalDeviceImageFormatProperties2KHR\0";

/// How far an import got
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStage {
    /// Checking that the extension entry points were resolved
    EntryPoints,
    /// DRM -> Vulkan format translation
    ResolveFormat,
    /// Querying if the format is importable as external memory
    CheckImportable,
    /// vkCreateImage
    CreateImage,
    /// Memory type selection, fd import and vkBindImageMemory
    BindMemory,
    /// Everything succeeded
    Done,
}

/// The result of a Vulkan import.
///
/// This carries whatever handles were created before a failure, so the
/// caller can clean them up. Always check `res` (or use `into_result`)
/// before touching the handles: a failure in an early stage means the
/// later handles were never created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VkImport {
    pub image: Option<vk::Image>,
    pub memory: Option<vk::DeviceMemory>,
    pub res: vk::Result,
    /// The stage that failed, or Done
    pub stage: ImportStage,
}

impl VkImport {
    fn new() -> Self {
        Self {
            image: None,
            memory: None,
            res: vk::Result::SUCCESS,
            stage: ImportStage::EntryPoints,
        }
    }

    fn fail(mut self, res: vk::Result) -> Self {
        self.res = res;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.res == vk::Result::SUCCESS && self.stage == ImportStage::Done
    }

    /// Get the image/memory pair of a successful import.
    ///
    /// On failure any partially created handles are dropped on the floor,
    /// use the fields directly if you need to destroy them.
    pub fn into_result(self) -> Result<(vk::Image, vk::DeviceMemory)> {
        match (self.is_ok(), self.image, self.memory) {
            (true, Some(image), Some(memory)) => Ok((image, memory)),
            _ => Err(HwcError::VK_IMPORT_FAILED {
                stage: self.stage,
                res: self.res,
            }),
        }
    }
}

/// Parameters for a Vulkan import
#[derive(Debug, Clone, Copy)]
pub struct VkImportInfo {
    /// How the caller will use the image
    pub usage: vk::ImageUsageFlags,
    /// The queue family the image is created exclusive to
    pub queue_family_index: u32,
    /// What kind of fd the shared memory is exported as
    pub handle_type: vk::ExternalMemoryHandleTypeFlags,
}

impl VkImportInfo {
    pub fn builder() -> VkImportInfoBuilder {
        VkImportInfoBuilder {
            ci: VkImportInfo {
                usage: vk::ImageUsageFlags::SAMPLED,
                queue_family_index: 0,
                handle_type: vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD,
            },
        }
    }
}

/// Implements the builder pattern for VkImportInfo
pub struct VkImportInfoBuilder {
    ci: VkImportInfo,
}

impl VkImportInfoBuilder {
    pub fn usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.ci.usage = usage;
        self
    }

    pub fn queue_family_index(mut self, index: u32) -> Self {
        self.ci.queue_family_index = index;
        self
    }

    pub fn handle_type(mut self, ty: vk::ExternalMemoryHandleTypeFlags) -> Self {
        self.ci.handle_type = ty;
        self
    }

    pub fn build(self) -> VkImportInfo {
        self.ci
    }
}

/// The Vulkan calls an import is made of.
///
/// `AshImportBackend` is the real thing, this is split out so the
/// import sequence doesn't care where the calls go.
pub trait VkImportBackend {
    /// Were all extension functions needed for an import found
    fn entry_points_loaded(&self) -> bool {
        true
    }

    /// Returns the external memory features the physical device
    /// advertises for this format/tiling/usage/handle type combo
    fn external_memory_features(
        &self,
        format: vk::Format,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
        handle_type: vk::ExternalMemoryHandleTypeFlags,
    ) -> VkResult<vk::ExternalMemoryFeatureFlags>;

    fn create_image(&self, info: &vk::ImageCreateInfo) -> VkResult<vk::Image>;

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;

    /// Number of memory types the physical device reports
    fn memory_type_count(&self) -> u32;

    /// Import `fd` as device memory. This must not take ownership of `fd`.
    fn import_memory(
        &self,
        fd: RawFd,
        size: vk::DeviceSize,
        memory_type_index: u32,
        handle_type: vk::ExternalMemoryHandleTypeFlags,
    ) -> VkResult<vk::DeviceMemory>;

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> VkResult<()>;
}

/// Pick the memory type to import into.
///
/// This is simply the lowest set bit. We don't look at whether the
/// type is device local or host visible.
fn first_memory_type(type_bits: u32) -> u32 {
    type_bits.trailing_zeros()
}

/// Is `index` a real memory type that `type_bits` allows
fn memory_type_compatible(type_bits: u32, index: u32, type_count: u32) -> bool {
    index < type_count && type_bits.checked_shr(index).map(|b| b & 1 == 1) == Some(true)
}

/// Import the shared memory of `desc` into a new VkImage.
///
/// Every failure returns immediately with the handles created so far
/// and the error code of the failing call. Missing entry points fail
/// with ERROR_INITIALIZATION_FAILED before anything else is looked at.
/// Unmappable and non-importable formats fail with
/// ERROR_FORMAT_NOT_SUPPORTED before any resource is created.
pub fn import_external_image<B: VkImportBackend + ?Sized>(
    backend: &B,
    desc: &BufferDescriptor,
    info: &VkImportInfo,
) -> VkImport {
    let mut import = VkImport::new();

    if !backend.entry_points_loaded() {
        log::error!("Vulkan import entry points are missing");
        return import.fail(vk::Result::ERROR_INITIALIZATION_FAILED);
    }

    // Resolve the format
    // -------------------------------------------------------
    import.stage = ImportStage::ResolveFormat;
    let format = vk_format_for(desc.format());
    if format == vk::Format::UNDEFINED {
        log::error!(
            "Failed DRM -> Vulkan format conversion for {}",
            fourcc_code(desc.format())
        );
        return import.fail(vk::Result::ERROR_FORMAT_NOT_SUPPORTED);
    }

    // Check that the device can import this format
    // -------------------------------------------------------
    import.stage = ImportStage::CheckImportable;
    match backend.external_memory_features(
        format,
        vk::ImageTiling::OPTIMAL,
        info.usage,
        info.handle_type,
    ) {
        Err(res) => {
            log::error!("vkGetPhysicalDeviceImageFormatProperties2KHR failed: {}", res);
            return import.fail(res);
        }
        Ok(features) if !features.contains(vk::ExternalMemoryFeatureFlags::IMPORTABLE) => {
            log::error!("Image format {:?} not supported for import to Vulkan", format);
            return import.fail(vk::Result::ERROR_FORMAT_NOT_SUPPORTED);
        }
        Ok(_) => {}
    }

    // Allocate an external image
    // -------------------------------------------------------
    // we create the image now, but will have to bind
    // some memory to it later.
    import.stage = ImportStage::CreateImage;
    let queue_families = [info.queue_family_index];
    let mut ext_mem_info = vk::ExternalMemoryImageCreateInfo::builder()
        .handle_types(info.handle_type)
        .build();
    let image_info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(vk::Extent3D {
            width: desc.width(),
            height: desc.height(),
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(info.usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .queue_family_indices(&queue_families)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .push_next(&mut ext_mem_info);

    let image = match backend.create_image(&image_info) {
        Ok(image) => image,
        Err(res) => {
            log::error!("vkCreateImage failed: {}", res);
            return import.fail(res);
        }
    };
    import.image = Some(image);

    // Import the fd and bind it
    // -------------------------------------------------------
    import.stage = ImportStage::BindMemory;
    let reqs = backend.image_memory_requirements(image);
    let type_index = first_memory_type(reqs.memory_type_bits);
    if !memory_type_compatible(reqs.memory_type_bits, type_index, backend.memory_type_count()) {
        log::error!(
            "VkImage and dma_buf have incompatible VkMemoryTypes (bits {:#x})",
            reqs.memory_type_bits
        );
        return import.fail(vk::Result::ERROR_FORMAT_NOT_SUPPORTED);
    }

    let memory =
        match backend.import_memory(desc.prime_fd(), reqs.size, type_index, info.handle_type) {
            Ok(memory) => memory,
            Err(res) => {
                log::error!("vkAllocateMemory failed: {}", res);
                return import.fail(res);
            }
        };
    import.memory = Some(memory);

    if let Err(res) = backend.bind_image_memory(image, memory) {
        log::error!("vkBindImageMemory failed: {}", res);
        return import.fail(res);
    }

    log::debug!(
        "Created Vulkan image {:?} from dmabuf {}",
        image,
        desc.prime_fd()
    );
    import.stage = ImportStage::Done;
    import
}

/// Extension entry points we look up by name.
///
/// These are resolved once when the backend is created. A missing one
/// fails the import that needs it instead of crashing.
struct ImportEntryPoints {
    get_image_format_properties2: Option<vk::PFN_vkGetPhysicalDeviceImageFormatProperties2>,
}

impl ImportEntryPoints {
    unsafe fn resolve(entry: &ash::Entry, inst: &ash::Instance) -> Self {
        let name = CStr::from_bytes_with_nul_unchecked(IMAGE_FORMAT_PROPERTIES2_NAME);
        let addr = entry.get_instance_proc_addr(inst.handle(), name.as_ptr());
        if addr.is_none() {
            log::error!("vkGetInstanceProcAddr({:?}) failed", name);
        }

        Self {
            get_image_format_properties2: addr.map(|f| {
                std::mem::transmute::<
                    unsafe extern "system" fn(),
                    vk::PFN_vkGetPhysicalDeviceImageFormatProperties2,
                >(f)
            }),
        }
    }
}

/// Imports through a real Vulkan device with ash
pub struct AshImportBackend {
    ab_dev: ash::Device,
    ab_pdev: vk::PhysicalDevice,
    ab_mem_props: vk::PhysicalDeviceMemoryProperties,
    ab_entry_points: ImportEntryPoints,
}

impl AshImportBackend {
    /// Create a backend for `dev`, which was created from `pdev`.
    ///
    /// # Safety
    ///
    /// All handles must be valid and belong together, and must outlive
    /// this backend.
    pub unsafe fn new(
        entry: &ash::Entry,
        inst: &ash::Instance,
        pdev: vk::PhysicalDevice,
        dev: &ash::Device,
    ) -> Self {
        Self {
            ab_dev: dev.clone(),
            ab_pdev: pdev,
            ab_mem_props: inst.get_physical_device_memory_properties(pdev),
            ab_entry_points: ImportEntryPoints::resolve(entry, inst),
        }
    }
}

impl VkImportBackend for AshImportBackend {
    fn entry_points_loaded(&self) -> bool {
        self.ab_entry_points.get_image_format_properties2.is_some()
    }

    fn external_memory_features(
        &self,
        format: vk::Format,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
        handle_type: vk::ExternalMemoryHandleTypeFlags,
    ) -> VkResult<vk::ExternalMemoryFeatureFlags> {
        let get_props = self
            .ab_entry_points
            .get_image_format_properties2
            .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)?;

        let mut ext_info = vk::PhysicalDeviceExternalImageFormatInfo::builder()
            .handle_type(handle_type)
            .build();
        let img_fmt_info = vk::PhysicalDeviceImageFormatInfo2::builder()
            .format(format)
            .ty(vk::ImageType::TYPE_2D)
            .tiling(tiling)
            .usage(usage)
            .push_next(&mut ext_info);

        let mut ext_props = vk::ExternalImageFormatProperties::default();
        let res = {
            let mut img_fmt_props =
                vk::ImageFormatProperties2::builder().push_next(&mut ext_props);
            unsafe { get_props(self.ab_pdev, &*img_fmt_info, &mut *img_fmt_props) }
        };
        res.result()?;

        Ok(ext_props
            .external_memory_properties
            .external_memory_features)
    }

    fn create_image(&self, info: &vk::ImageCreateInfo) -> VkResult<vk::Image> {
        unsafe { self.ab_dev.create_image(info, None) }
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.ab_dev.get_image_memory_requirements(image) }
    }

    fn memory_type_count(&self) -> u32 {
        self.ab_mem_props.memory_type_count
    }

    fn import_memory(
        &self,
        fd: RawFd,
        size: vk::DeviceSize,
        memory_type_index: u32,
        handle_type: vk::ExternalMemoryHandleTypeFlags,
    ) -> VkResult<vk::DeviceMemory> {
        // A successful import hands the fd over to the driver. The fd
        // belongs to the buffer handler, so give Vulkan its own copy.
        let fd = fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(0)).map_err(|e| {
            log::error!("could not dup fd {}: {}", fd, e);
            vk::Result::ERROR_INVALID_EXTERNAL_HANDLE
        })?;

        let mut import_fd_info = vk::ImportMemoryFdInfoKHR::builder()
            .handle_type(handle_type)
            .fd(fd)
            .build();
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type_index)
            .push_next(&mut import_fd_info);

        unsafe { self.ab_dev.allocate_memory(&alloc_info, None) }.map_err(|res| {
            // The driver only takes the fd on success
            let _ = close(fd);
            res
        })
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> VkResult<()> {
        unsafe { self.ab_dev.bind_image_memory(image, memory, 0) }
    }
}
