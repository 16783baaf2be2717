//! The EFI PCI I/O protocol, which gives a UEFI application access
//! to one PCI function's configuration space, BARs and DMA services
//!
//! # References
//!
//! * UEFI Spec, version 2.7, chapter 14, section 4

use core::ffi::c_void;
use core::ptr;
use crate::uefi::{check, EFIAllocateType, EFIError, EFIMemoryType, Guid, Status};

pub const EFI_PCI_IO_PROTOCOL_GUID: Guid = Guid {
    first: 0x4cf5b200,
    second: 0x68b8,
    third: 0x4ca5,
    fourth: [0x9e, 0xec, 0xb2, 0x3e, 0x3f, 0x50, 0x02, 0x9a]
};

/// Size of the pages handed out by `allocate_buffer`
pub const PAGE_SIZE: usize = 4096;

/// Attribute bit that lets the function respond to memory space accesses
pub const ATTRIBUTE_MEMORY: u64 = 0x0200;
/// Attribute bit that lets the function master the bus for DMA
pub const ATTRIBUTE_BUS_MASTER: u64 = 0x0400;

#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u32)]
pub enum EFIPciIoWidth {
    Uint8   = 0,
    Uint16  = 1,
    Uint32  = 2
}

#[derive(Debug, Clone, Copy)]
#[repr(u32)]
pub enum EFIPciIoOperation {
    /// Memory both the processor and the bus master read and write
    /// while the mapping is live
    BusMasterCommonBuffer   = 2
}

#[derive(Debug, Clone, Copy)]
#[repr(u32)]
pub enum EFIPciIoAttributeOperation {
    Get         = 0,
    Set         = 1,
    Enable      = 2,
    Disable     = 3,
    Supported   = 4
}

type AccessFn = unsafe extern "efiapi" fn(
    this: *const EFIPciIoProtocol,
    width: EFIPciIoWidth,
    bar_index: u8,
    offset: u64,
    count: usize,
    buffer: *mut c_void
) -> Status;

type ConfigFn = unsafe extern "efiapi" fn(
    this: *const EFIPciIoProtocol,
    width: EFIPciIoWidth,
    offset: u32,
    count: usize,
    buffer: *mut c_void
) -> Status;

#[repr(C)]
struct EFIPciIoAccess {
    read: AccessFn,
    write: AccessFn
}

#[repr(C)]
struct EFIPciIoConfigAccess {
    read: ConfigFn,
    write: ConfigFn
}

#[repr(C)]
pub struct EFIPciIoProtocol {
    /// PollMem and PollIo
    unneeded0: [usize; 2],
    /// Accesses to the memory BARs
    mem: EFIPciIoAccess,
    /// Accesses to the I/O BARs
    unneeded1: [usize; 2],
    /// Accesses to configuration space
    pci: EFIPciIoConfigAccess,
    /// CopyMem
    unneeded2: usize,
    /// Provides the device address the bus master uses to reach host memory
    map: unsafe extern "efiapi" fn(
        this: *const EFIPciIoProtocol,
        operation: EFIPciIoOperation,
        host_address: *mut c_void,
        number_of_bytes: *mut usize,
        device_address: *mut u64,
        mapping: *mut *mut c_void
    ) -> Status,
    /// Completes a `map` operation and releases its resources
    unmap: unsafe extern "efiapi" fn(this: *const EFIPciIoProtocol, mapping: *mut c_void) -> Status,
    /// Allocates pages suitable for a common buffer mapping
    allocate_buffer: unsafe extern "efiapi" fn(
        this: *const EFIPciIoProtocol,
        alloc_type: EFIAllocateType,
        mem_type: EFIMemoryType,
        pages: usize,
        host_address: *mut *mut c_void,
        attributes: u64
    ) -> Status,
    /// Frees pages allocated with `allocate_buffer`
    free_buffer: unsafe extern "efiapi" fn(
        this: *const EFIPciIoProtocol,
        pages: usize,
        host_address: *mut c_void
    ) -> Status,
    /// Flush and GetLocation
    unneeded3: [usize; 2],
    /// Gets, sets, enables or disables the attributes of the function
    attributes: unsafe extern "efiapi" fn(
        this: *const EFIPciIoProtocol,
        operation: EFIPciIoAttributeOperation,
        attributes: u64,
        result: *mut u64
    ) -> Status,
    /// GetBarAttributes and SetBarAttributes
    unneeded4: [usize; 2],
    rom_size: u64,
    rom_image: *const c_void
}

/// A live bus master mapping of host memory
#[derive(Debug, Clone, Copy)]
pub struct Mapping {
    /// The address the device uses to reach the memory
    pub device_addr: u64,
    /// Number of bytes the firmware actually mapped
    pub len: usize,
    token: *mut c_void
}

impl Mapping {
    pub fn token(&self) -> usize {
        self.token as usize
    }
}

impl EFIPciIoProtocol {
    /// Reads one unit of `width` from a memory BAR
    pub fn mem_read(&self, width: EFIPciIoWidth, bar: u8, offset: u64) -> Result<u32, EFIError> {
        let mut val = 0u32;
        let status = unsafe { (self.mem.read)(
            self,
            width,
            bar,
            offset,
            1,
            (&mut val as *mut u32).cast()
        ) };
        check("PciIo.Mem.Read", status)?;
        Ok(val)
    }

    /// Writes one unit of `width` to a memory BAR
    ///
    /// Only the low `width` bytes of `val` reach the device
    pub fn mem_write(&self, width: EFIPciIoWidth, bar: u8, offset: u64, val: u32) -> Result<(), EFIError> {
        let mut val = val;
        let status = unsafe { (self.mem.write)(
            self,
            width,
            bar,
            offset,
            1,
            (&mut val as *mut u32).cast()
        ) };
        check("PciIo.Mem.Write", status)
    }

    /// Reads one unit of `width` from the function's configuration space
    pub fn config_read(&self, width: EFIPciIoWidth, offset: u32) -> Result<u32, EFIError> {
        let mut val = 0u32;
        let status = unsafe { (self.pci.read)(
            self,
            width,
            offset,
            1,
            (&mut val as *mut u32).cast()
        ) };
        check("PciIo.Pci.Read", status)?;
        Ok(val)
    }

    pub fn enable_attributes(&self, attributes: u64) -> Result<(), EFIError> {
        let status = unsafe { (self.attributes)(
            self,
            EFIPciIoAttributeOperation::Enable,
            attributes,
            ptr::null_mut()
        ) };
        check("PciIo.Attributes", status)
    }

    pub fn allocate_buffer(&self, pages: usize) -> Result<*mut u8, EFIError> {
        let mut host: *mut c_void = ptr::null_mut();
        let status = unsafe { (self.allocate_buffer)(
            self,
            EFIAllocateType::AnyPages,
            EFIMemoryType::BootServicesData,
            pages,
            &mut host,
            0
        ) };
        check("PciIo.AllocateBuffer", status)?;
        Ok(host.cast())
    }

    /// # Safety
    ///
    /// `host` must have come from `allocate_buffer` with the same page count
    /// and must no longer be mapped
    pub unsafe fn free_buffer(&self, pages: usize, host: *mut u8) -> Result<(), EFIError> {
        check("PciIo.FreeBuffer", (self.free_buffer)(self, pages, host.cast()))
    }

    /// Maps `len` bytes at `host` as a common buffer
    pub fn map_common_buffer(&self, host: *mut u8, len: usize) -> Result<Mapping, EFIError> {
        let mut mapped_len = len;
        let mut device_addr = 0u64;
        let mut token: *mut c_void = ptr::null_mut();
        let status = unsafe { (self.map)(
            self,
            EFIPciIoOperation::BusMasterCommonBuffer,
            host.cast(),
            &mut mapped_len,
            &mut device_addr,
            &mut token
        ) };
        check("PciIo.Map", status)?;
        Ok(Mapping { device_addr, len: mapped_len, token })
    }

    /// # Safety
    ///
    /// `token` must come from a `Mapping` that has not been unmapped yet
    pub unsafe fn unmap(&self, token: usize) -> Result<(), EFIError> {
        check("PciIo.Unmap", (self.unmap)(self, token as *mut c_void))
    }
}
