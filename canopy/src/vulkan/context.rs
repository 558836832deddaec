use crate::error::*;
use spark::{vk, Builder, Device, DeviceExtensions, Instance, InstanceExtensions, Loader};
use std::{ffi::CStr, os::raw::c_void, slice, sync::Arc};
use strum::{EnumString, EnumVariantNames};
use tracing::{debug, error, info, warn};

unsafe extern "system" fn debug_messenger(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _: *mut c_void,
) -> vk::Bool32 {
    if let Some(data) = p_callback_data.as_ref() {
        let message = CStr::from_ptr(data.p_message).to_string_lossy();
        if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            error!(types = %message_types, "{}", message);
        } else {
            warn!(types = %message_types, "{}", message);
        }
    }
    vk::FALSE
}

trait PhysicalDeviceMemoryPropertiesExt {
    fn types(&self) -> &[vk::MemoryType];
    fn heaps(&self) -> &[vk::MemoryHeap];
}

impl PhysicalDeviceMemoryPropertiesExt for vk::PhysicalDeviceMemoryProperties {
    fn types(&self) -> &[vk::MemoryType] {
        &self.memory_types[..self.memory_type_count as usize]
    }
    fn heaps(&self) -> &[vk::MemoryHeap] {
        &self.memory_heaps[..self.memory_heap_count as usize]
    }
}

/// How to treat an optional device capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, EnumVariantNames)]
#[strum(serialize_all = "kebab_case")]
pub enum ContextFeature {
    Disable,
    Optional,
    Require,
}

impl ContextFeature {
    fn enable_if(self, supported: bool, name: &'static str) -> Result<bool> {
        match self {
            Self::Disable => Ok(false),
            Self::Optional => Ok(supported),
            Self::Require if supported => Ok(true),
            Self::Require => Err(Error::Unsupported(name)),
        }
    }
}

pub struct ContextParams {
    pub version: vk::Version,
    pub is_debug: bool,
    pub ray_tracing: ContextFeature,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            version: vk::Version::from_raw_parts(1, 1, 0),
            is_debug: false,
            ray_tracing: ContextFeature::Optional,
        }
    }
}

/// A headless Vulkan instance and device with a single compute queue.
pub struct Context {
    pub instance: Instance,
    pub debug_utils_messenger: Option<vk::DebugUtilsMessengerEXT>,
    pub physical_device: vk::PhysicalDevice,
    pub physical_device_properties: vk::PhysicalDeviceProperties,
    pub physical_device_memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub enable_acceleration_structures: bool,
    pub queue_family_index: u32,
    pub queue: vk::Queue,
    pub device: Device,
}

pub type SharedContext = Arc<Context>;

impl Context {
    pub fn new(params: &ContextParams) -> Result<Self> {
        let loader = Loader::new().loader_context("vkGetInstanceProcAddr")?;
        let instance_version = unsafe { loader.enumerate_instance_version() }.vk_context("vkEnumerateInstanceVersion")?;
        info!("loading instance version {} ({} supported)", params.version, instance_version);
        if instance_version < params.version {
            return Err(Error::Unsupported("requested instance version"));
        }

        let instance = {
            let available_extensions = {
                let extension_properties = unsafe { loader.enumerate_instance_extension_properties_to_vec(None) }
                    .vk_context("vkEnumerateInstanceExtensionProperties")?;
                InstanceExtensions::from_properties(params.version, &extension_properties)
            };

            let mut extensions = InstanceExtensions::new(params.version);
            if params.is_debug {
                extensions.enable_ext_debug_utils();
            }
            if params.ray_tracing != ContextFeature::Disable
                && available_extensions.supports_khr_acceleration_structure()
            {
                extensions.enable_khr_acceleration_structure();
            }
            let extension_names = extensions.to_name_vec();
            for &name in extension_names.iter() {
                debug!("loading instance extension {:?}", name);
            }

            let app_info = vk::ApplicationInfo::builder()
                .p_application_name(Some(unsafe { CStr::from_bytes_with_nul_unchecked(b"canopy\0") }))
                .api_version(params.version);

            let extension_name_ptrs: Vec<_> = extension_names.iter().map(|s| s.as_ptr()).collect();
            let instance_create_info = vk::InstanceCreateInfo::builder()
                .p_application_info(Some(&app_info))
                .pp_enabled_extension_names(&extension_name_ptrs);
            unsafe { loader.create_instance(&instance_create_info, None) }.loader_context("vkCreateInstance")?
        };

        let debug_utils_messenger = if params.is_debug {
            let create_info = vk::DebugUtilsMessengerCreateInfoEXT {
                message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                pfn_user_callback: Some(debug_messenger),
                ..Default::default()
            };
            Some(
                unsafe { instance.create_debug_utils_messenger_ext(&create_info, None) }
                    .vk_context("vkCreateDebugUtilsMessengerEXT")?,
            )
        } else {
            None
        };

        let physical_device = {
            let physical_devices =
                unsafe { instance.enumerate_physical_devices_to_vec() }.vk_context("vkEnumeratePhysicalDevices")?;
            for physical_device in &physical_devices {
                let props = unsafe { instance.get_physical_device_properties(*physical_device) };
                info!("physical device ({}): {:?}", props.device_type, unsafe {
                    CStr::from_ptr(props.device_name.as_ptr())
                });
            }
            *physical_devices.first().ok_or(Error::Unsupported("a Vulkan physical device"))?
        };
        let physical_device_properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let device_version = physical_device_properties.api_version;

        let physical_device_memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        for (i, mt) in physical_device_memory_properties.types().iter().enumerate() {
            debug!("memory type {}: {}, heap {}", i, mt.property_flags, mt.heap_index);
        }
        for (i, mh) in physical_device_memory_properties.heaps().iter().enumerate() {
            debug!("heap {}: {} bytes {}", i, mh.size, mh.flags);
        }

        let queue_family_index = unsafe { instance.get_physical_device_queue_family_properties_to_vec(physical_device) }
            .iter()
            .position(|info| info.queue_flags.contains(vk::QueueFlags::COMPUTE))
            .ok_or(Error::Unsupported("a compute queue"))? as u32;

        info!("loading device version {} ({} supported)", params.version, device_version);
        if device_version < params.version {
            return Err(Error::Unsupported("requested device version"));
        }

        let available_extensions = {
            let extension_properties =
                unsafe { instance.enumerate_device_extension_properties_to_vec(physical_device, None) }
                    .vk_context("vkEnumerateDeviceExtensionProperties")?;
            DeviceExtensions::from_properties(params.version, &extension_properties)
        };
        if !available_extensions.supports_ext_scalar_block_layout() {
            return Err(Error::Unsupported("scalar block layout"));
        }
        let enable_acceleration_structures = params.ray_tracing.enable_if(
            available_extensions.supports_khr_acceleration_structure(),
            "acceleration structures",
        )?;

        let device = {
            let queue_priorities = [1.0];
            let device_queue_create_info = vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(queue_family_index)
                .p_queue_priorities(&queue_priorities);

            let mut extensions = DeviceExtensions::new(params.version);
            extensions.enable_ext_scalar_block_layout();
            if enable_acceleration_structures {
                extensions.enable_khr_acceleration_structure();
            }
            let extension_names = extensions.to_name_vec();
            for &name in extension_names.iter() {
                debug!("loading device extension {:?}", name);
            }

            let mut scalar_block_layout_features =
                vk::PhysicalDeviceScalarBlockLayoutFeaturesEXT::builder().scalar_block_layout(true);
            let mut buffer_device_address_features = vk::PhysicalDeviceBufferDeviceAddressFeaturesKHR::builder()
                .buffer_device_address(enable_acceleration_structures);
            let mut acceleration_structure_features = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::builder()
                .acceleration_structure(enable_acceleration_structures);

            let extension_name_ptrs: Vec<_> = extension_names.iter().map(|s| s.as_ptr()).collect();
            let device_create_info = vk::DeviceCreateInfo::builder()
                .p_queue_create_infos(slice::from_ref(&device_queue_create_info))
                .pp_enabled_extension_names(&extension_name_ptrs)
                .insert_next(&mut scalar_block_layout_features)
                .insert_next(&mut buffer_device_address_features)
                .insert_next(&mut acceleration_structure_features);

            unsafe { instance.create_device(physical_device, &device_create_info, None, params.version) }
                .loader_context("vkCreateDevice")?
        };

        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        Ok(Self {
            instance,
            debug_utils_messenger,
            physical_device,
            physical_device_properties,
            physical_device_memory_properties,
            enable_acceleration_structures,
            queue_family_index,
            queue,
            device,
        })
    }

    pub fn get_memory_type_index(&self, type_filter: u32, property_flags: vk::MemoryPropertyFlags) -> Result<u32> {
        self.physical_device_memory_properties
            .types()
            .iter()
            .enumerate()
            .find(|(i, mt)| (type_filter & (1 << i)) != 0 && mt.property_flags.contains(property_flags))
            .map(|(i, _)| i as u32)
            .ok_or(Error::MissingMemoryType { type_filter })
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
            if self.debug_utils_messenger.is_some() {
                self.instance
                    .destroy_debug_utils_messenger_ext(self.debug_utils_messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}
