/*
Copyright 2025  The Lumen Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use bitflags::bitflags;

pub const PAGE_SHIFT: u64 = 12;
pub const PAGE_SIZE: u64 = 1 << 12;
pub const PAGE_SIZE_USIZE: usize = 1 << 12;

bitflags! {
    /// Memory permissions as the guest kernel encodes them
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct MemoryPermission: u32 {
        /// no permissions
        const NONE = 0;
        /// readable
        const READ = 1;
        /// writable
        const WRITE = 2;
        /// executable
        const EXECUTE = 4;
        /// readable and writable
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl MemoryPermission {
    /// Whether the memory is readable
    pub fn r(&self) -> bool {
        self.contains(MemoryPermission::READ)
    }

    /// Whether the memory is writable
    pub fn w(&self) -> bool {
        self.contains(MemoryPermission::WRITE)
    }

    /// Whether the memory is executable
    pub fn x(&self) -> bool {
        self.contains(MemoryPermission::EXECUTE)
    }
}

impl core::fmt::Display for MemoryPermission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let r = if self.r() { 'R' } else { '-' };
        let w = if self.w() { 'W' } else { '-' };
        let x = if self.x() { 'X' } else { '-' };
        write!(f, "{r}{w}{x}")
    }
}

bitflags! {
    /// Attribute bits reported alongside a memory region
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
    pub struct MemoryAttribute: u32 {
        /// The region is borrowed by another mapping
        const IS_BORROWED = 1;
        /// The region is locked by an in-flight IPC transfer
        const IS_IPC_LOCKED = 2;
        /// The region is shared with a device
        const IS_DEVICE_SHARED = 4;
        /// The region is mapped uncached
        const IS_UNCACHED = 8;
    }
}

/// The type of a memory region as reported by memory queries.
///
/// Values match the guest kernel's memory type table and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MemoryType {
    Unmapped = 0x00,
    Io = 0x01,
    Normal = 0x02,
    CodeStatic = 0x03,
    CodeMutable = 0x04,
    Heap = 0x05,
    SharedMemory = 0x06,
    Alias = 0x07,
    ModuleCodeStatic = 0x08,
    ModuleCodeMutable = 0x09,
    Ipc = 0x0A,
    Stack = 0x0B,
    ThreadLocal = 0x0C,
    TransferMemoryIsolated = 0x0D,
    TransferMemory = 0x0E,
    ProcessMemory = 0x0F,
    Reserved = 0x10,
    NonSecureIpc = 0x11,
    NonDeviceIpc = 0x12,
    KernelStack = 0x13,
    CodeReadOnly = 0x14,
    CodeWritable = 0x15,
}

impl TryFrom<u32> for MemoryType {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        let ty = match value {
            0x00 => MemoryType::Unmapped,
            0x01 => MemoryType::Io,
            0x02 => MemoryType::Normal,
            0x03 => MemoryType::CodeStatic,
            0x04 => MemoryType::CodeMutable,
            0x05 => MemoryType::Heap,
            0x06 => MemoryType::SharedMemory,
            0x07 => MemoryType::Alias,
            0x08 => MemoryType::ModuleCodeStatic,
            0x09 => MemoryType::ModuleCodeMutable,
            0x0A => MemoryType::Ipc,
            0x0B => MemoryType::Stack,
            0x0C => MemoryType::ThreadLocal,
            0x0D => MemoryType::TransferMemoryIsolated,
            0x0E => MemoryType::TransferMemory,
            0x0F => MemoryType::ProcessMemory,
            0x10 => MemoryType::Reserved,
            0x11 => MemoryType::NonSecureIpc,
            0x12 => MemoryType::NonDeviceIpc,
            0x13 => MemoryType::KernelStack,
            0x14 => MemoryType::CodeReadOnly,
            0x15 => MemoryType::CodeWritable,
            other => return Err(other),
        };
        Ok(ty)
    }
}

/// The descriptor returned to the guest by a memory query.
///
/// The layout is fixed: 40 bytes, little-endian, in field order. The
/// query layer copies `to_bytes()` straight into guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct MemoryInfo {
    pub base_address: u64,
    pub size: u64,
    pub memory_type: u32,
    pub attribute: u32,
    pub permission: u32,
    pub ipc_ref_count: u32,
    pub device_ref_count: u32,
    pub padding: u32,
}

impl MemoryInfo {
    /// Size of the encoded descriptor in bytes
    pub const SIZE: usize = core::mem::size_of::<MemoryInfo>();

    /// The memory attribute bits of this descriptor
    pub fn attributes(&self) -> MemoryAttribute {
        MemoryAttribute::from_bits_truncate(self.attribute)
    }

    /// The memory permission bits of this descriptor
    pub fn permissions(&self) -> MemoryPermission {
        MemoryPermission::from_bits_truncate(self.permission)
    }

    /// Whether the region is locked by IPC
    pub fn is_ipc_locked(&self) -> bool {
        self.attributes().contains(MemoryAttribute::IS_IPC_LOCKED)
    }

    /// Whether the region is shared with a device
    pub fn is_device_shared(&self) -> bool {
        self.attributes().contains(MemoryAttribute::IS_DEVICE_SHARED)
    }

    /// Encode the descriptor in its guest-visible layout
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..8].copy_from_slice(&self.base_address.to_le_bytes());
        out[8..16].copy_from_slice(&self.size.to_le_bytes());
        out[16..20].copy_from_slice(&self.memory_type.to_le_bytes());
        out[20..24].copy_from_slice(&self.attribute.to_le_bytes());
        out[24..28].copy_from_slice(&self.permission.to_le_bytes());
        out[28..32].copy_from_slice(&self.ipc_ref_count.to_le_bytes());
        out[32..36].copy_from_slice(&self.device_ref_count.to_le_bytes());
        out[36..40].copy_from_slice(&self.padding.to_le_bytes());
        out
    }

    /// Decode a descriptor from its guest-visible layout. Returns `None`
    /// if `bytes` is shorter than [`MemoryInfo::SIZE`].
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let u64_at = |at: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(buf)
        };
        let u32_at = |at: usize| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&bytes[at..at + 4]);
            u32::from_le_bytes(buf)
        };
        Some(Self {
            base_address: u64_at(0),
            size: u64_at(8),
            memory_type: u32_at(16),
            attribute: u32_at(20),
            permission: u32_at(24),
            ipc_ref_count: u32_at(28),
            device_ref_count: u32_at(32),
            padding: u32_at(36),
        })
    }
}
