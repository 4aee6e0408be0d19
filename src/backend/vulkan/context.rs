// Vulkan context - instance, device, queue, allocator
//
// Responsibilities:
// - Instance creation with validation layers and surface extensions
// - Physical device selection (prefer discrete GPU)
// - Logical device + single graphics/compute queue
// - Memory allocator (gpu-allocator) and one-shot command submission
//
// Every native object holds an Arc to this, so the device outlives them all.

use crate::error::{RenderError, RenderResult};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Arc;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct VulkanContext {
    // Dropped by hand before the device
    allocator: ManuallyDrop<Mutex<Allocator>>,
    immediate_pool: Mutex<vk::CommandPool>,

    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    pub entry: Entry,

    pub queue: vk::Queue,
    pub queue_family: u32,

    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    pub properties: vk::PhysicalDeviceProperties,
}

impl VulkanContext {
    /// `display` selects the platform surface extension; `None` creates an
    /// offscreen-only context.
    pub fn new(app_name: &str, enable_validation: bool, display: Option<RawDisplayHandle>) -> RenderResult<Arc<Self>> {
        log::info!("Creating Vulkan context: {}", app_name);

        let entry = unsafe { Entry::load() }
            .map_err(|e| RenderError::Backend(format!("failed to load the Vulkan library: {e}")))?;

        let enable_validation = enable_validation && Self::has_validation_layer(&entry);
        let instance = Self::create_instance(&entry, app_name, enable_validation, display)?;

        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let (physical_device, queue_family) = Self::pick_physical_device(&instance)?;
        let (device, queue) = Self::create_logical_device(&instance, physical_device, queue_family, display.is_some())?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let immediate_pool = unsafe { device.create_command_pool(&pool_info, None)? };

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            immediate_pool: Mutex::new(immediate_pool),
            device,
            physical_device,
            instance,
            entry,
            queue,
            queue_family,
            debug_utils,
            properties,
        }))
    }

    fn has_validation_layer(entry: &Entry) -> bool {
        let available = entry.enumerate_instance_layer_properties().unwrap_or_default();
        let found = available
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);
        if !found {
            log::warn!("Validation requested but {:?} is not installed", VALIDATION_LAYER);
        }
        found
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
        display: Option<RawDisplayHandle>,
    ) -> RenderResult<ash::Instance> {
        let app_name_cstr = CString::new(app_name).map_err(|e| RenderError::Backend(e.to_string()))?;
        let engine_name = c"Topaz";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut extensions: Vec<*const c_char> = Vec::new();
        if enable_validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }
        if let Some(display) = display {
            extensions.extend(super::surface::required_extensions(display)?);
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
            log::error!("Failed to create Vulkan instance: {:?}", e);
            RenderError::from(e)
        })?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> RenderResult<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(instance: &ash::Instance) -> RenderResult<(vk::PhysicalDevice, u32)> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        if devices.is_empty() {
            return Err(RenderError::UnsupportedFeature("no Vulkan-capable GPU found".into()));
        }

        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };

            let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

            // One queue does graphics, compute and transfer.
            let family = queue_families
                .iter()
                .enumerate()
                .find(|(_, props)| {
                    props
                        .queue_flags
                        .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
                })
                .map(|(i, _)| i as u32);

            if let Some(family) = family {
                let score = match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                    _ => 1,
                };

                if score > best_score {
                    best_score = score;
                    best_device = Some((device, family));
                }
            }
        }

        best_device.ok_or_else(|| RenderError::UnsupportedFeature("no GPU with a graphics+compute queue".into()))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
        with_swapchain: bool,
    ) -> RenderResult<(ash::Device, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        let mut extensions = Vec::new();
        if with_swapchain {
            extensions.push(ash::extensions::khr::Swapchain::name().as_ptr());
        }

        let features = vk::PhysicalDeviceFeatures::default();
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        Ok((device, queue))
    }

    // ========================================================================
    // Memory
    // ========================================================================

    pub fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> RenderResult<Allocation> {
        let allocation = self.allocator.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;
        Ok(allocation)
    }

    pub fn free(&self, allocation: Allocation) {
        if let Err(e) = self.allocator.lock().free(allocation) {
            log::warn!("Failed to free allocation: {}", e);
        }
    }

    pub fn format_features(&self, format: vk::Format) -> vk::FormatFeatureFlags {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
                .optimal_tiling_features
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Record `record` into a throwaway command buffer, submit it and wait
    /// for it to finish.
    pub fn submit_immediate<F>(&self, record: F) -> RenderResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let pool = self.immediate_pool.lock();
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        unsafe {
            let cmd = self.device.allocate_command_buffers(&alloc_info)?[0];
            let fence = self.device.create_fence(&vk::FenceCreateInfo::default(), None)?;

            let result = (|| -> RenderResult<()> {
                let begin_info =
                    vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
                self.device.begin_command_buffer(cmd, &begin_info)?;
                record(&self.device, cmd);
                self.device.end_command_buffer(cmd)?;

                let command_buffers = [cmd];
                let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
                self.device.queue_submit(self.queue, &[submit_info.build()], fence)?;
                self.device.wait_for_fences(&[fence], true, u64::MAX)?;
                Ok(())
            })();

            self.device.destroy_fence(fence, None);
            self.device.free_command_buffers(*pool, &[cmd]);
            result
        }
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan context...");

        let _ = self.wait_idle();

        unsafe {
            self.device.destroy_command_pool(*self.immediate_pool.get_mut(), None);

            // Allocator frees its memory blocks against the device
            ManuallyDrop::drop(&mut self.allocator);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
