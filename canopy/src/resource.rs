use crate::{device::*, error::*};
use bytemuck::{Contiguous, Pod};
use slotmap::new_key_type;
use std::{
    fmt, mem,
    ops::{BitOr, BitOrAssign},
};

new_key_type! {
    pub struct BufferId;
    pub struct AccelerationStructureId;
    pub struct ComputePipelineId;
}

pub type DeviceAddress = u64;

macro_rules! buffer_usage_impl {
    ($($name:ident),+ $(,)?) => {
        #[repr(u32)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Contiguous)]
        #[allow(non_camel_case_types)]
        pub(crate) enum BufferUsageBit {
            $($name),+
        }

        #[derive(Clone, Copy, PartialEq, Eq, Default)]
        pub struct BufferUsage(u32);

        impl BufferUsage {
            $(pub const $name: BufferUsage = BufferUsage(1 << (BufferUsageBit::$name as u32));)+

            pub fn empty() -> Self {
                Self(0)
            }

            pub fn contains(self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }

            pub(crate) fn iter_set_bits(self) -> BufferUsageBitIterator {
                BufferUsageBitIterator(self)
            }
        }

        impl fmt::Debug for BufferUsage {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_set().entries(self.iter_set_bits()).finish()
            }
        }
    };
}

buffer_usage_impl! {
    STORAGE,
    VERTEX_BUFFER,
    INDEX_BUFFER,
    ACCELERATION_STRUCTURE_BUILD_INPUT,
    ACCELERATION_STRUCTURE_STORAGE,
    ACCELERATION_STRUCTURE_BUILD_SCRATCH,
    SHADER_DEVICE_ADDRESS,
}

impl BitOr for BufferUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for BufferUsage {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

pub(crate) struct BufferUsageBitIterator(BufferUsage);

impl Iterator for BufferUsageBitIterator {
    type Item = BufferUsageBit;

    fn next(&mut self) -> Option<Self::Item> {
        let pos = self.0 .0.trailing_zeros();
        if pos < 32 {
            self.0 .0 &= !(1 << pos);
            BufferUsageBit::from_integer(pos)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: usize,
    pub usage: BufferUsage,
    pub host_visible: bool,
    pub name: String,
}

impl BufferDesc {
    pub const MIN_SIZE: usize = 4;

    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(Self::MIN_SIZE),
            usage: BufferUsage::empty(),
            host_visible: false,
            name: String::new(),
        }
    }

    pub fn usage(mut self, usage: BufferUsage) -> Self {
        self.usage |= usage;
        self
    }

    pub fn host_visible(mut self) -> Self {
        self.host_visible = true;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// A device buffer that is destroyed when dropped.
pub struct Buffer {
    device: SharedDevice,
    id: BufferId,
    address: DeviceAddress,
    desc: BufferDesc,
}

impl Buffer {
    pub fn new(device: &SharedDevice, desc: BufferDesc) -> Result<Self> {
        let (id, address) = device.create_buffer(&desc)?;
        Ok(Self {
            device: SharedDevice::clone(device),
            id,
            address,
            desc,
        })
    }

    /// Creates a host visible buffer sized to fit `data` and uploads it.
    pub fn with_data<T: Pod>(device: &SharedDevice, desc: BufferDesc, data: &[T]) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let desc = BufferDesc {
            size: bytes.len().max(BufferDesc::MIN_SIZE),
            ..desc
        }
        .host_visible();
        let buffer = Self::new(device, desc)?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn device_address(&self) -> DeviceAddress {
        self.address
    }

    pub fn size(&self) -> usize {
        self.desc.size
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    /// Writes `data` at a byte offset.
    pub fn write<T: Pod>(&self, offset: usize, data: &[T]) -> Result<()> {
        self.device.write_buffer(self.id, offset, bytemuck::cast_slice(data))
    }

    /// Reads back as many whole elements as fit in the buffer.
    pub fn read<T: Pod>(&self) -> Result<Vec<T>> {
        let count = self.desc.size / mem::size_of::<T>().max(1);
        self.read_elements(count)
    }

    pub fn read_elements<T: Pod>(&self, count: usize) -> Result<Vec<T>> {
        let mut data = vec![T::zeroed(); count];
        self.device
            .read_buffer(self.id, 0, bytemuck::cast_slice_mut(&mut data))?;
        Ok(data)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.device.destroy_buffer(self.id);
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("name", &self.desc.name)
            .field("size", &self.desc.size)
            .field("address", &format_args!("{:#x}", self.address))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelerationStructureLevel {
    BottomLevel,
    TopLevel,
}

/// A handle together with the buffer that backs its storage.
pub struct AccelerationStructure {
    device: SharedDevice,
    id: AccelerationStructureId,
    address: DeviceAddress,
    level: AccelerationStructureLevel,
    primitive_count: u32,
    buffer: Buffer,
}

impl AccelerationStructure {
    pub(crate) fn new(
        device: &SharedDevice,
        level: AccelerationStructureLevel,
        size: usize,
        primitive_count: u32,
        name: &str,
    ) -> Result<Self> {
        let buffer = Buffer::new(
            device,
            BufferDesc::new(size)
                .usage(BufferUsage::ACCELERATION_STRUCTURE_STORAGE | BufferUsage::SHADER_DEVICE_ADDRESS)
                .name(name),
        )?;
        let id = device.create_acceleration_structure(level, buffer.id(), buffer.size())?;
        let address = match device.acceleration_structure_device_address(id) {
            Ok(address) => address,
            Err(err) => {
                device.destroy_acceleration_structure(id);
                return Err(err);
            }
        };
        Ok(Self {
            device: SharedDevice::clone(device),
            id,
            address,
            level,
            primitive_count,
            buffer,
        })
    }

    pub fn id(&self) -> AccelerationStructureId {
        self.id
    }

    pub fn device_address(&self) -> DeviceAddress {
        self.address
    }

    pub fn level(&self) -> AccelerationStructureLevel {
        self.level
    }

    pub fn primitive_count(&self) -> u32 {
        self.primitive_count
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }
}

impl Drop for AccelerationStructure {
    fn drop(&mut self) {
        // storage buffer is dropped after this, once the handle is gone
        self.device.destroy_acceleration_structure(self.id);
    }
}

impl fmt::Debug for AccelerationStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccelerationStructure")
            .field("level", &self.level)
            .field("primitive_count", &self.primitive_count)
            .field("address", &format_args!("{:#x}", self.address))
            .finish()
    }
}
