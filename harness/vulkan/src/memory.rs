//! Memory type selection, buffer allocation/binding, and host mapping.

use std::ffi::c_void;
use std::fmt;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::ComputeContext;
use crate::error::{vk_err, Result, VulkanError};

/// One entry of the device's memory type table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryTypeDescriptor {
    pub index: u32,
    pub flags: vk::MemoryPropertyFlags,
    pub heap_index: u32,
}

/// One memory heap. Heap size bounds what can be allocated from it; the
/// allocator relies on allocation failure rather than tracking usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHeapDescriptor {
    pub index: u32,
    pub size: vk::DeviceSize,
    pub device_local: bool,
}

/// Memory types and heaps of the selected device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryTable {
    pub types: Vec<MemoryTypeDescriptor>,
    pub heaps: Vec<MemoryHeapDescriptor>,
}

impl MemoryTable {
    pub(crate) fn query(instance: &ash::Instance, pd: vk::PhysicalDevice) -> Self {
        let props = unsafe { instance.get_physical_device_memory_properties(pd) };
        let types = props
            .memory_types_as_slice()
            .iter()
            .enumerate()
            .map(|(i, t)| MemoryTypeDescriptor {
                index: i as u32,
                flags: t.property_flags,
                heap_index: t.heap_index,
            })
            .collect();
        let heaps = props
            .memory_heaps_as_slice()
            .iter()
            .enumerate()
            .map(|(i, h)| MemoryHeapDescriptor {
                index: i as u32,
                size: h.size,
                device_local: h.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL),
            })
            .collect();
        Self { types, heaps }
    }

    pub fn heap_of(&self, ty: &MemoryTypeDescriptor) -> Option<&MemoryHeapDescriptor> {
        self.heaps.get(ty.heap_index as usize)
    }

    pub(crate) fn log(&self) {
        info!("{} mem types. {} mem heaps.", self.types.len(), self.heaps.len());
        for ty in &self.types {
            info!("{}", TypeLine(self, ty));
        }
    }
}

/// `<size> bytes of <local|non-local> memory [ <flags> ]`
struct TypeLine<'a>(&'a MemoryTable, &'a MemoryTypeDescriptor);

impl fmt::Display for TypeLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let TypeLine(table, ty) = self;
        let (size, local) = table.heap_of(ty).map_or((0, false), |h| (h.size, h.device_local));
        write!(f, "{} bytes of {} memory [ ", size, if local { "local" } else { "non-local" })?;
        for (bit, name) in [
            (vk::MemoryPropertyFlags::DEVICE_LOCAL, "device-local"),
            (vk::MemoryPropertyFlags::HOST_VISIBLE, "host-visible"),
            (vk::MemoryPropertyFlags::HOST_COHERENT, "host-coherent"),
            (vk::MemoryPropertyFlags::HOST_CACHED, "host-cached"),
        ] {
            if ty.flags.contains(bit) {
                write!(f, "{} ", name)?;
            }
        }
        f.write_str("]")
    }
}

/// Lowest-index memory type whose flags include every bit of `required`.
///
/// The backend's legal-type bitmask is deliberately not consulted here;
/// [`StorageBuffer::new`] only warns when the two disagree.
pub fn find_memory_type(table: &MemoryTable, required: vk::MemoryPropertyFlags) -> Result<u32> {
    table
        .types
        .iter()
        .find(|t| t.flags.contains(required))
        .map(|t| t.index)
        .ok_or(VulkanError::NoMemoryType { required })
}

/// A storage buffer bound to its own dedicated allocation.
///
/// Construction creates, allocates and binds in one step, so an unbound
/// buffer is never observable and there is no way to rebind it.
pub struct StorageBuffer<'ctx> {
    ctx: &'ctx ComputeContext,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    allocation_size: vk::DeviceSize,
    memory_type: u32,
}

impl<'ctx> StorageBuffer<'ctx> {
    pub fn new(
        ctx: &'ctx ComputeContext,
        size: vk::DeviceSize,
        required: vk::MemoryPropertyFlags,
        label: &str,
    ) -> Result<Self> {
        let device = &ctx.device;
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(vk::BufferUsageFlags::STORAGE_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&buffer_info, None) }
            .map_err(vk_err("vkCreateBuffer"))?;

        let reqs = unsafe { device.get_buffer_memory_requirements(buffer) };
        info!(
            buffer = label,
            size = reqs.size,
            alignment = reqs.alignment,
            type_bits = format_args!("{:#x}", reqs.memory_type_bits),
            "memory requirements"
        );

        let memory_type = match find_memory_type(ctx.memory_table(), required) {
            Ok(i) => i,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        if reqs.memory_type_bits & (1 << memory_type) == 0 {
            warn!(
                buffer = label,
                memory_type,
                type_bits = format_args!("{:#x}", reqs.memory_type_bits),
                "selected memory type is not in the buffer's legal type set"
            );
        }
        info!(buffer = label, memory_type, flags = ?required, "selected memory type");

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(reqs.size)
            .memory_type_index(memory_type);
        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(m) => m,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(vk_err("vkAllocateMemory")(e));
            }
        };

        // From here on Drop releases both handles.
        let this = Self {
            ctx,
            buffer,
            memory,
            size,
            allocation_size: reqs.size,
            memory_type,
        };
        unsafe { device.bind_buffer_memory(buffer, memory, 0) }
            .map_err(vk_err("vkBindBufferMemory"))?;

        ctx.label(buffer, label);
        ctx.label(memory, &format!("{} memory", label));
        Ok(this)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Logical size requested by the caller.
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Size of the backing allocation; never smaller than [`Self::size`].
    pub fn allocation_size(&self) -> vk::DeviceSize {
        self.allocation_size
    }

    pub fn memory_type(&self) -> u32 {
        self.memory_type
    }

    /// Map the logical range for host access. Unmapped when the guard drops.
    pub fn map(&mut self) -> Result<Mapped<'_>> {
        let ptr = unsafe {
            self.ctx.device.map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
        }
        .map_err(vk_err("vkMapMemory"))?;
        debug!(buffer = ?self.buffer, bytes = self.size, "mapped");
        Ok(Mapped { device: &self.ctx.device, memory: self.memory, ptr, len: self.size as usize })
    }

    /// Overwrite every byte of the logical range with `byte`.
    pub fn fill(&mut self, byte: u8) -> Result<()> {
        self.map()?.bytes_mut().fill(byte);
        Ok(())
    }
}

impl Drop for StorageBuffer<'_> {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_buffer(self.buffer, None);
            self.ctx.device.free_memory(self.memory, None);
        }
    }
}

/// Host mapping of a [`StorageBuffer`].
pub struct Mapped<'a> {
    device: &'a ash::Device,
    memory: vk::DeviceMemory,
    ptr: *mut c_void,
    len: usize,
}

impl Mapped<'_> {
    pub fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr as *mut u8, self.len) }
    }

    /// View as 32-bit words. Trailing bytes that do not form a word are ignored.
    pub fn words(&self) -> Result<&[u32]> {
        let bytes = self.bytes();
        let whole = bytes.len() - bytes.len() % 4;
        bytemuck::try_cast_slice(&bytes[..whole])
            .map_err(|e| VulkanError::Dispatch(format!("mapped memory is not word aligned: {}", e)))
    }
}

impl Drop for Mapped<'_> {
    fn drop(&mut self) {
        unsafe { self.device.unmap_memory(self.memory) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type F = vk::MemoryPropertyFlags;

    /// Layout typical of a discrete GPU: device-local, then host types.
    fn discrete_table() -> MemoryTable {
        let flags = [
            F::DEVICE_LOCAL,
            F::HOST_VISIBLE | F::HOST_COHERENT,
            F::HOST_VISIBLE | F::HOST_COHERENT | F::HOST_CACHED,
            F::DEVICE_LOCAL | F::HOST_VISIBLE | F::HOST_COHERENT,
        ];
        MemoryTable {
            types: flags
                .iter()
                .enumerate()
                .map(|(i, &flags)| MemoryTypeDescriptor {
                    index: i as u32,
                    flags,
                    heap_index: if flags.contains(F::DEVICE_LOCAL) { 0 } else { 1 },
                })
                .collect(),
            heaps: vec![
                MemoryHeapDescriptor { index: 0, size: 8 << 30, device_local: true },
                MemoryHeapDescriptor { index: 1, size: 16 << 30, device_local: false },
            ],
        }
    }

    #[test]
    fn test_superset_not_exact_match() {
        let table = discrete_table();
        assert_eq!(find_memory_type(&table, F::HOST_VISIBLE).unwrap(), 1);
        assert_eq!(find_memory_type(&table, F::HOST_CACHED).unwrap(), 2);
    }

    #[test]
    fn test_lowest_index_wins() {
        let table = discrete_table();
        assert_eq!(find_memory_type(&table, F::DEVICE_LOCAL).unwrap(), 0);
        assert_eq!(find_memory_type(&table, F::empty()).unwrap(), 0);
        assert_eq!(
            find_memory_type(&table, F::DEVICE_LOCAL | F::HOST_VISIBLE).unwrap(),
            3
        );
    }

    #[test]
    fn test_unsatisfiable_mask_fails() {
        let table = discrete_table();
        let err = find_memory_type(&table, F::DEVICE_LOCAL | F::HOST_CACHED).unwrap_err();
        assert!(matches!(err, VulkanError::NoMemoryType { .. }));
        assert!(find_memory_type(&MemoryTable::default(), F::empty()).is_err());
    }

    #[test]
    fn test_scan_is_repeatable() {
        let table = discrete_table();
        let mask = F::HOST_VISIBLE | F::HOST_COHERENT;
        assert_eq!(
            find_memory_type(&table, mask).unwrap(),
            find_memory_type(&table, mask).unwrap()
        );
    }

    #[test]
    fn test_type_line() {
        let table = discrete_table();
        assert_eq!(
            TypeLine(&table, &table.types[3]).to_string(),
            "8589934592 bytes of local memory [ device-local host-visible host-coherent ]"
        );
        assert_eq!(
            TypeLine(&table, &table.types[1]).to_string(),
            "17179869184 bytes of non-local memory [ host-visible host-coherent ]"
        );
    }
}
