//! What the bring-up sequence needs from the firmware it runs on
//!
//! Every hardware and firmware interaction goes through these traits. The
//! firmware application implements them over boot services and the PCI I/O
//! protocol; the tests implement them over a simulated controller.

use core::ptr::{self, NonNull};

use crate::error::Result;

/// Width of one register access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Byte,
    Word,
    Dword
}

impl Width {
    pub fn bytes(&self) -> usize {
        match self {
            Width::Byte => 1,
            Width::Word => 2,
            Width::Dword => 4
        }
    }

    /// Keeps the bits of `val` an access of this width carries
    pub fn truncate(&self, val: u32) -> u32 {
        match self {
            Width::Byte => val & 0xff,
            Width::Word => val & 0xffff,
            Width::Dword => val
        }
    }
}

/// Register accesses to the controller's BAR 0
pub trait RegisterIo {
    fn read(&mut self, width: Width, offset: u32) -> Result<u32>;
    /// Only the low `width` bytes of `val` are written
    fn write(&mut self, width: Width, offset: u32, val: u32) -> Result<()>;
}

/// Memory the controller reaches by bus mastering
///
/// The host side is accessed with volatile operations since the device
/// reads and writes it behind the compiler's back.
#[derive(Debug)]
pub struct DmaRegion {
    host: NonNull<u8>,
    device_addr: u64,
    len: usize,
    token: usize
}

impl DmaRegion {
    /// # Safety
    ///
    /// `host` must be valid for reads and writes of `len` bytes until the
    /// region is handed back to `Dma::free_dma`, and the device must reach
    /// the same memory at `device_addr`
    pub unsafe fn new(host: NonNull<u8>, device_addr: u64, len: usize, token: usize) -> Self {
        Self { host, device_addr, len, token }
    }

    pub fn device_addr(&self) -> u64 {
        self.device_addr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whatever the allocator needs to find its mapping again
    pub fn token(&self) -> usize {
        self.token
    }

    pub fn host_ptr(&self) -> *mut u8 {
        self.host.as_ptr()
    }

    fn at<T>(&self, offset: usize) -> *mut T {
        assert!(offset + core::mem::size_of::<T>() <= self.len, "DMA access out of bounds");
        assert!(offset % core::mem::align_of::<T>() == 0, "misaligned DMA access");
        unsafe { self.host.as_ptr().add(offset).cast() }
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        unsafe { ptr::read_volatile(self.at::<u32>(offset)) }
    }

    pub fn write_u32(&mut self, offset: usize, val: u32) {
        unsafe { ptr::write_volatile(self.at::<u32>(offset), val) }
    }

    pub fn read_u64(&self, offset: usize) -> u64 {
        unsafe { ptr::read_volatile(self.at::<u64>(offset)) }
    }

    pub fn write_u64(&mut self, offset: usize, val: u64) {
        unsafe { ptr::write_volatile(self.at::<u64>(offset), val) }
    }

    /// Copies `bytes` in starting at `offset`
    pub fn fill_from(&mut self, offset: usize, bytes: &[u8]) {
        assert!(offset + bytes.len() <= self.len, "DMA access out of bounds");
        for (i, b) in bytes.iter().enumerate() {
            unsafe { ptr::write_volatile(self.host.as_ptr().add(offset + i), *b) }
        }
    }

    pub fn zero(&mut self) {
        unsafe { ptr::write_bytes(self.host.as_ptr(), 0, self.len) }
    }
}

/// Bus master common buffers
pub trait Dma {
    /// Allocates and maps at least `len` bytes, aligned to at least 128 bytes.
    /// The contents are unspecified
    fn allocate_dma(&mut self, len: usize) -> Result<DmaRegion>;
    /// Unmaps and frees a region from `allocate_dma`
    fn free_dma(&mut self, region: DmaRegion) -> Result<()>;
}

/// Time
pub trait Clock {
    fn stall(&mut self, microseconds: usize) -> Result<()>;
    /// Arms a one-shot timer that expires after `hundreds_of_ns`
    fn arm_timer(&mut self, hundreds_of_ns: u64) -> Result<()>;
    /// Whether the armed timer has expired
    fn timer_expired(&mut self) -> Result<bool>;
    fn cancel_timer(&mut self) -> Result<()>;
}

/// One bound HDA PCI function and the firmware services around it
pub trait Platform: RegisterIo + Dma + Clock {}

impl<T: RegisterIo + Dma + Clock> Platform for T {}
