//! Physical device enumeration, device/queue selection, and logical device setup.
//!
//! Selection is split into pure functions over [`DeviceDescriptor`]s
//! ([`select_device`], [`select_queue_family`]) so the policy can be exercised
//! without a GPU. [`ComputeContext::new`] applies them and opens the device.

use std::ffi::CString;
use std::fmt;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{vk_err, Result, VulkanError};
use crate::instance::Instance;
use crate::memory::MemoryTable;

/// Coarse physical nature of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Discrete,
    Integrated,
    Virtual,
    Cpu,
    Other,
}

impl From<vk::PhysicalDeviceType> for DeviceClass {
    fn from(ty: vk::PhysicalDeviceType) -> Self {
        match ty {
            vk::PhysicalDeviceType::DISCRETE_GPU => DeviceClass::Discrete,
            vk::PhysicalDeviceType::INTEGRATED_GPU => DeviceClass::Integrated,
            vk::PhysicalDeviceType::VIRTUAL_GPU => DeviceClass::Virtual,
            vk::PhysicalDeviceType::CPU => DeviceClass::Cpu,
            _ => DeviceClass::Other,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceClass::Discrete => "dGPU",
            DeviceClass::Integrated => "iGPU",
            DeviceClass::Virtual => "vGPU",
            DeviceClass::Cpu => "CPU",
            DeviceClass::Other => "OTHER",
        })
    }
}

/// One queue family of a physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyDescriptor {
    pub index: u32,
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    /// Meaningful bits in timestamps written on this family; 0 means no timestamps.
    pub timestamp_valid_bits: u32,
}

impl QueueFamilyDescriptor {
    pub fn supports_compute_and_transfer(&self) -> bool {
        self.flags.contains(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)
    }
}

/// Everything the selector needs to know about one enumerated device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    /// Position in the enumeration order.
    pub index: usize,
    /// Backend handle; null in descriptors built by hand.
    pub handle: vk::PhysicalDevice,
    pub vendor_id: u32,
    pub device_id: u32,
    pub name: String,
    pub class: DeviceClass,
    pub api_version: u32,
    pub supports_int8: bool,
    pub supports_int16: bool,
    pub supports_float16: bool,
    /// Nanoseconds per timestamp tick.
    pub timestamp_period: f32,
    /// Largest workgroup count accepted along X by a single dispatch.
    pub max_workgroup_count_x: u32,
    pub queue_families: Vec<QueueFamilyDescriptor>,
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x} {} {}", self.vendor_id, self.device_id, self.class, self.name)
    }
}

/// Which device class the user would rather run on.
///
/// Only one flag is meant to be set. Several set flags combine literally: a
/// class is skipped whenever some *other* present class is preferred, so
/// setting all of them can leave nothing but the first-device fallback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DevicePreferences {
    pub discrete: bool,
    pub integrated: bool,
    pub cpu: bool,
}

impl DevicePreferences {
    fn prefers(&self, class: DeviceClass) -> bool {
        match class {
            DeviceClass::Discrete => self.discrete,
            DeviceClass::Integrated => self.integrated,
            DeviceClass::Cpu => self.cpu,
            DeviceClass::Virtual | DeviceClass::Other => false,
        }
    }
}

const SELECTION_ORDER: [DeviceClass; 3] =
    [DeviceClass::Discrete, DeviceClass::Integrated, DeviceClass::Cpu];

/// Pick one device; returns its position in `devices`.
///
/// Discrete, then integrated, then CPU, each unless skipped by a preference for
/// another present class; within a class the first in enumeration order wins.
/// Falls back to the first device.
pub fn select_device(devices: &[DeviceDescriptor], prefs: &DevicePreferences) -> Result<usize> {
    if devices.is_empty() {
        return Err(VulkanError::NoDevices);
    }

    let present = |class: DeviceClass| devices.iter().any(|d| d.class == class);
    let skipped = |class: DeviceClass| {
        SELECTION_ORDER
            .iter()
            .any(|&other| other != class && present(other) && prefs.prefers(other))
    };

    for class in SELECTION_ORDER {
        let count = devices.iter().filter(|d| d.class == class).count();
        if count == 0 {
            continue;
        }
        if skipped(class) {
            debug!(%class, count, "class skipped by preference");
            continue;
        }
        if let Some(pos) = devices.iter().position(|d| d.class == class) {
            return Ok(pos);
        }
    }

    debug!("no preferred class available, falling back to the first device");
    Ok(0)
}

/// First queue family advertising both compute and transfer.
pub fn select_queue_family(device: &DeviceDescriptor) -> Result<QueueFamilyDescriptor> {
    device
        .queue_families
        .iter()
        .find(|f| f.supports_compute_and_transfer())
        .copied()
        .ok_or_else(|| VulkanError::NoComputeQueue { device: device.name.clone() })
}

/// List the physical devices visible through `instance`, in enumeration order.
///
/// Memory tables are not queried here; see [`ComputeContext::new`].
pub fn enumerate_devices(instance: &Instance) -> Result<Vec<DeviceDescriptor>> {
    let handles = unsafe { instance.handle.enumerate_physical_devices() }
        .map_err(vk_err("vkEnumeratePhysicalDevices"))?;
    info!("Found {} physical devices.", handles.len());
    if handles.is_empty() {
        return Err(VulkanError::NoDevices);
    }

    let devices: Vec<DeviceDescriptor> = handles
        .into_iter()
        .enumerate()
        .map(|(index, pd)| describe(&instance.handle, index, pd))
        .collect();
    for d in &devices {
        info!("{}", d);
    }
    Ok(devices)
}

fn describe(instance: &ash::Instance, index: usize, pd: vk::PhysicalDevice) -> DeviceDescriptor {
    let props = unsafe { instance.get_physical_device_properties(pd) };
    let name = props
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|_| String::from("<unnamed>"));

    // features2 is only valid on 1.1+ devices
    let (supports_int8, supports_int16, supports_float16) =
        if props.api_version >= vk::API_VERSION_1_1 {
            let mut float16_int8 = vk::PhysicalDeviceShaderFloat16Int8Features::default();
            let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut float16_int8);
            unsafe { instance.get_physical_device_features2(pd, &mut features2) };
            let int16 = features2.features.shader_int16 == vk::TRUE;
            (
                float16_int8.shader_int8 == vk::TRUE,
                int16,
                float16_int8.shader_float16 == vk::TRUE,
            )
        } else {
            let features = unsafe { instance.get_physical_device_features(pd) };
            (false, features.shader_int16 == vk::TRUE, false)
        };

    let queue_families = unsafe { instance.get_physical_device_queue_family_properties(pd) }
        .iter()
        .enumerate()
        .map(|(i, q)| QueueFamilyDescriptor {
            index: i as u32,
            flags: q.queue_flags,
            queue_count: q.queue_count,
            timestamp_valid_bits: q.timestamp_valid_bits,
        })
        .collect();

    DeviceDescriptor {
        index,
        handle: pd,
        vendor_id: props.vendor_id,
        device_id: props.device_id,
        name,
        class: props.device_type.into(),
        api_version: props.api_version,
        supports_int8,
        supports_int16,
        supports_float16,
        timestamp_period: props.limits.timestamp_period,
        max_workgroup_count_x: props.limits.max_compute_work_group_count[0],
        queue_families,
    }
}

/// The selected device, its single compute queue, and its memory table.
///
/// Created once by device selection and passed by reference to every later
/// stage. Objects created from it borrow it, so they are released first.
pub struct ComputeContext {
    pub(crate) device: ash::Device,
    pub(crate) queue: vk::Queue,
    queue_family: QueueFamilyDescriptor,
    descriptor: DeviceDescriptor,
    memory: MemoryTable,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    // Dropped after `device` is destroyed in `Drop`.
    instance: Instance,
}

impl ComputeContext {
    /// Select a device and queue family from `devices` and open the device.
    pub fn new(
        instance: Instance,
        devices: &[DeviceDescriptor],
        prefs: &DevicePreferences,
    ) -> Result<Self> {
        let selected = &devices[select_device(devices, prefs)?];
        let queue_family = select_queue_family(selected)?;
        info!(
            device = %selected,
            queue_family = queue_family.index,
            int8 = selected.supports_int8,
            int16 = selected.supports_int16,
            float16 = selected.supports_float16,
            "selected device"
        );

        let priorities = [1.0f32];
        let queue_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family.index)
            .queue_priorities(&priorities)];
        let device_info = vk::DeviceCreateInfo::default().queue_create_infos(&queue_infos);

        let device = unsafe {
            instance.handle.create_device(selected.handle, &device_info, None)
        }
        .map_err(vk_err("vkCreateDevice"))?;
        let queue = unsafe { device.get_device_queue(queue_family.index, 0) };

        let memory = MemoryTable::query(&instance.handle, selected.handle);
        memory.log();

        let debug_utils = instance
            .debug_utils
            .then(|| ash::ext::debug_utils::Device::new(&instance.handle, &device));

        Ok(Self {
            device,
            queue,
            queue_family,
            descriptor: selected.clone(),
            memory,
            debug_utils,
            instance,
        })
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn queue_family(&self) -> &QueueFamilyDescriptor {
        &self.queue_family
    }

    pub fn memory_table(&self) -> &MemoryTable {
        &self.memory
    }

    /// Attach a debug name to a Vulkan object. Silently does nothing when
    /// `VK_EXT_debug_utils` is unavailable.
    pub(crate) fn label<H: vk::Handle>(&self, handle: H, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);
        if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&info) } {
            warn!("failed to label object {:?}: {}", name, e);
        }
    }
}

impl Drop for ComputeContext {
    fn drop(&mut self) {
        unsafe {
            // Nothing may still be executing when the device goes away.
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
        debug!(instance_debug_utils = self.instance.debug_utils, "destroyed device");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(index: usize, class: DeviceClass) -> DeviceDescriptor {
        DeviceDescriptor {
            index,
            handle: vk::PhysicalDevice::null(),
            vendor_id: 0x10de,
            device_id: 0x2000 + index as u32,
            name: format!("device {}", index),
            class,
            api_version: vk::API_VERSION_1_2,
            supports_int8: false,
            supports_int16: false,
            supports_float16: false,
            timestamp_period: 1.0,
            max_workgroup_count_x: 65535,
            queue_families: vec![QueueFamilyDescriptor {
                index: 0,
                flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                queue_count: 1,
                timestamp_valid_bits: 64,
            }],
        }
    }

    fn devices(classes: &[DeviceClass]) -> Vec<DeviceDescriptor> {
        classes.iter().enumerate().map(|(i, &c)| device(i, c)).collect()
    }

    use DeviceClass::*;

    #[test]
    fn test_empty_list_is_enumeration_empty() {
        let err = select_device(&[], &DevicePreferences::default()).unwrap_err();
        assert!(matches!(err, VulkanError::NoDevices));
    }

    #[test]
    fn test_default_prefers_discrete() {
        let list = devices(&[Cpu, Integrated, Discrete, Discrete]);
        assert_eq!(select_device(&list, &DevicePreferences::default()).unwrap(), 2);
    }

    #[test]
    fn test_integrated_before_cpu() {
        let list = devices(&[Cpu, Other, Integrated]);
        assert_eq!(select_device(&list, &DevicePreferences::default()).unwrap(), 2);
    }

    #[test]
    fn test_cpu_before_fallback() {
        let list = devices(&[Virtual, Other, Cpu]);
        assert_eq!(select_device(&list, &DevicePreferences::default()).unwrap(), 2);
    }

    #[test]
    fn test_fallback_to_first() {
        let list = devices(&[Virtual, Other]);
        assert_eq!(select_device(&list, &DevicePreferences::default()).unwrap(), 0);
    }

    #[test]
    fn test_prefer_integrated_skips_discrete() {
        let list = devices(&[Discrete, Integrated]);
        let prefs = DevicePreferences { integrated: true, ..Default::default() };
        assert_eq!(select_device(&list, &prefs).unwrap(), 1);
    }

    #[test]
    fn test_prefer_cpu_skips_gpus() {
        let list = devices(&[Discrete, Integrated, Cpu]);
        let prefs = DevicePreferences { cpu: true, ..Default::default() };
        assert_eq!(select_device(&list, &prefs).unwrap(), 2);
    }

    #[test]
    fn test_preference_for_absent_class_is_ignored() {
        let list = devices(&[Integrated, Discrete]);
        let prefs = DevicePreferences { cpu: true, ..Default::default() };
        assert_eq!(select_device(&list, &prefs).unwrap(), 1);
    }

    #[test]
    fn test_all_preferences_fall_back_to_first() {
        let list = devices(&[Cpu, Integrated, Discrete]);
        let prefs = DevicePreferences { discrete: true, integrated: true, cpu: true };
        assert_eq!(select_device(&list, &prefs).unwrap(), 0);
    }

    #[test]
    fn test_two_preferences_combine_literally() {
        // discrete skipped by integrated, integrated skipped by discrete
        let list = devices(&[Virtual, Integrated, Discrete]);
        let prefs = DevicePreferences { discrete: true, integrated: true, cpu: false };
        assert_eq!(select_device(&list, &prefs).unwrap(), 0);
    }

    #[test]
    fn test_queue_family_needs_compute_and_transfer() {
        let mut d = device(0, Discrete);
        d.queue_families = vec![
            QueueFamilyDescriptor {
                index: 0,
                flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER,
                queue_count: 1,
                timestamp_valid_bits: 64,
            },
            QueueFamilyDescriptor {
                index: 1,
                flags: vk::QueueFlags::COMPUTE,
                queue_count: 4,
                timestamp_valid_bits: 64,
            },
            QueueFamilyDescriptor {
                index: 2,
                flags: vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                queue_count: 2,
                timestamp_valid_bits: 36,
            },
        ];
        assert_eq!(select_queue_family(&d).unwrap().index, 2);
    }

    #[test]
    fn test_no_queue_family_is_fatal() {
        let mut d = device(0, Discrete);
        d.queue_families[0].flags = vk::QueueFlags::GRAPHICS;
        let err = select_queue_family(&d).unwrap_err();
        assert!(matches!(err, VulkanError::NoComputeQueue { .. }));
    }

    #[test]
    fn test_descriptor_display() {
        let d = device(3, Integrated);
        assert_eq!(d.to_string(), "10de:2003 iGPU device 3");
    }
}
