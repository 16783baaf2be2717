//! Abstractions for dealing with UEFI firmware
//!
//! Only the pieces of the system table and boot services that a
//! pre-boot device bring-up application needs are given real types.
//! The rest of each table is kept as opaque padding so that the
//! offsets of the used entries match the specification.

use core::ffi::c_void;
use core::fmt;
use core::ptr;
use core::slice;
use num::Integer;

#[macro_export]
macro_rules! efi_entry_point {
    ($f:expr) => {
        /// The main entry point of a UEFI executable as described in specification version 2.7
        ///
        /// # Arguments
        ///
        /// * image_handle: This is the firmware allocated handle used to identify the UEFI image
        /// * system_table: This is a pointer to the EFI System Table
        ///
        /// # References
        ///
        /// * UEFI Spec, version 2.7, page 103, chapter 4: EFI System Table, section 4.1
        #[no_mangle]
        pub extern "efiapi" fn efi_main(
            image_handle: $crate::uefi::EFIHandle,
            systable: *const $crate::uefi::EFISystemTable
        ) -> $crate::uefi::Status {
            // The firmware keeps the table alive until boot services are exited,
            // which this application never does
            let systable: &'static $crate::uefi::EFISystemTable = unsafe { &*systable };
            let func: fn($crate::uefi::EFIHandle, &'static $crate::uefi::EFISystemTable) -> $crate::uefi::Status = $f;
            func(image_handle, systable)
        }
    }
}

/// The status code returned by UEFI services
pub type Status = usize;

pub struct StatusCode;

impl StatusCode {
    pub const SUCCESS: Status = 0;
    pub const INVALID_PARAMETER: Status = 2 | Self::ERROR_BIT;
    pub const UNSUPPORTED: Status = 3 | Self::ERROR_BIT;
    pub const NOT_READY: Status = 6 | Self::ERROR_BIT;
    pub const DEVICE_ERROR: Status = 7 | Self::ERROR_BIT;
    pub const OUT_OF_RESOURCES: Status = 9 | Self::ERROR_BIT;
    pub const NOT_FOUND: Status = 14 | Self::ERROR_BIT;
    pub const ACCESS_DENIED: Status = 15 | Self::ERROR_BIT;
    pub const TIMEOUT: Status = 18 | Self::ERROR_BIT;

    /// This bit is set in all error status codes
    pub const ERROR_BIT: usize = 1 << (usize::BIT_LENGTH - 1);

    pub fn is_error(status: Status) -> bool {
        status.is_set(usize::BIT_LENGTH - 1)
    }
}

/// A failed boot service call, tagged with the operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EFIError {
    pub op: &'static str,
    pub status: Status
}

impl fmt::Display for EFIError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed with status {:#x}", self.op, self.status & !StatusCode::ERROR_BIT)
    }
}

pub(crate) fn check(op: &'static str, status: Status) -> Result<(), EFIError> {
    if StatusCode::is_error(status) {
        Err(EFIError { op, status })
    } else {
        Ok(())
    }
}

/// A firmware allocated handle that is used to identify the UEFI image
/// on various functions.
/// The handle also supports one or more protocols that the image can use
pub type EFIHandle = *const c_void;

pub type EFIEvent = *mut c_void;

/// A UEFI table which contains pointer to runtime and boot services
///
/// # References
///
/// * The UEFI spec, version 2.7, chapter 4, section 3
#[repr(C)]
pub struct EFISystemTable {
    /// The table header of the EFI System Table
    header: EFITableHeader,
    /// A string that identifies the system firmware for the platform
    firmware_vendor: *const u16,
    /// A firmware vendor specific value that identifies the
    /// revision of the system firmware for the platform
    firmware_revision: u32,
    /// The handle for the active console input device
    stdin_handle: EFIHandle,
    /// Not used by this application
    stdin: *const c_void,
    /// The handle for the active console output device
    stdout_handle: EFIHandle,
    /// A pointer to the EFISimpleTextOutputProtocol
    /// interface that is associated with `stdout_handle`
    stdout: *const EFISimpleTextOutputProtocol,
    /// The handle for the active standard error console device
    std_error_handle: EFIHandle,
    /// A pointer to the EFISimpleTextOutputProtocol
    /// interface that is associated with `std_error_handle`
    std_err: *const EFISimpleTextOutputProtocol,
    /// A pointer to the EFIRuntimeServicesTable
    runtime_services: *const c_void,
    /// A pointer to the EFIBootServicesTable
    boot_services: *const EFIBootServices,
    /// Number of system configuration tables
    no_of_table_entries: usize,
    /// A pointer to the system configuration tables
    configuration_table: *const c_void
}

impl EFISystemTable {
    pub fn boot_services(&self) -> &'static EFIBootServices {
        unsafe { &*self.boot_services }
    }

    pub fn stdout(&self) -> &'static EFISimpleTextOutputProtocol {
        unsafe { &*self.stdout }
    }
}

/// A structure that precedes all UEFI table structures
#[repr(C)]
struct EFITableHeader {
    signature: u64,
    revision: u32,
    header_size: u32,
    crc32: u32,
    reserved: u32
}

/// A UEFI protocol used to control text-based output devices
#[repr(C)]
pub struct EFISimpleTextOutputProtocol {
    /// Reset the console out device
    reset: unsafe extern "efiapi" fn(this: *const EFISimpleTextOutputProtocol, extended_verification: bool) -> Status,
    /// Displays a null terminated string on the device at the current cursor location
    output_string: unsafe extern "efiapi" fn(this: *const EFISimpleTextOutputProtocol, string: *const u16) -> Status,
    /// QueryMode through EnableCursor, and the mode pointer
    unneeded: [usize; 7]
}

impl EFISimpleTextOutputProtocol {
    /// Writes a null terminated UCS-2 string at the cursor
    ///
    /// # Safety
    ///
    /// `s` must point to a null terminated buffer of u16s
    pub unsafe fn output_string(&self, s: *const u16) -> Result<(), EFIError> {
        check("OutputString", (self.output_string)(self, s))
    }
}

/// The boot services in the EFISystemTable
#[repr(C)]
pub struct EFIBootServices {
    /// The table header
    header: EFITableHeader,
    /// RaiseTPL and RestoreTPL
    unneeded0: [usize; 2],
    /// AllocatePages, FreePages and GetMemoryMap
    unneeded1: [usize; 3],
    /// Allocates a pool of a particular memory type
    allocate_pool: unsafe extern "efiapi" fn(
        pool_type: EFIMemoryType,
        size: usize,
        buffer: *mut *mut u8
    ) -> Status,
    /// Returns pool memory to the system
    free_pool: unsafe extern "efiapi" fn(buffer: *mut c_void) -> Status,
    /// Creates an event
    create_event: unsafe extern "efiapi" fn(
        event_type: u32,
        notify_tpl: EFITpl,
        notify_fn: Option<unsafe extern "efiapi" fn(event: EFIEvent, context: *mut c_void)>,
        notify_context: *mut c_void,
        event: *mut EFIEvent
    ) -> Status,
    /// Sets the type of timer and the trigger time for a timer event
    set_timer: unsafe extern "efiapi" fn(event: EFIEvent, timer_type: EFITimerType, trigger_time: u64) -> Status,
    /// WaitForEvent and SignalEvent
    unneeded2: [usize; 2],
    /// Closes an event
    close_event: unsafe extern "efiapi" fn(event: EFIEvent) -> Status,
    /// Checks whether an event is in the signaled state
    check_event: unsafe extern "efiapi" fn(event: EFIEvent) -> Status,
    /// The protocol handler services, the image services and
    /// GetNextMonotonicCount
    unneeded3: [usize; 15],
    /// Induces a fine-grained stall
    stall: unsafe extern "efiapi" fn(microseconds: usize) -> Status,
    /// SetWatchdogTimer, ConnectController and DisconnectController
    unneeded4: [usize; 3],
    /// Queries a handle to determine if it supports a specified protocol
    /// and, if so, opens it on behalf of the calling agent
    open_protocol: unsafe extern "efiapi" fn(
        handle: EFIHandle,
        protocol: *const Guid,
        interface: *mut *mut c_void,
        agent_handle: EFIHandle,
        controller_handle: EFIHandle,
        attributes: u32
    ) -> Status,
    /// Closes a protocol on a handle that was opened using `open_protocol`
    close_protocol: unsafe extern "efiapi" fn(
        handle: EFIHandle,
        protocol: *const Guid,
        agent_handle: EFIHandle,
        controller_handle: EFIHandle
    ) -> Status,
    /// OpenProtocolInformation and ProtocolsPerHandle
    unneeded5: [usize; 2],
    /// Returns an array of handles that support the requested protocol
    /// in a buffer allocated from pool
    locate_handle_buffer: unsafe extern "efiapi" fn(
        search_type: EFILocateSearchType,
        protocol: *const Guid,
        search_key: *const c_void,
        no_handles: *mut usize,
        buffer: *mut *mut EFIHandle
    ) -> Status,
    /// LocateProtocol through CreateEventEx
    unneeded6: [usize; 7]
}

impl EFIBootServices {
    pub fn alloc_mem(&self, mem_type: EFIMemoryType, size: usize) -> Result<*mut u8, EFIError> {
        let mut mem: *mut u8 = ptr::null_mut();
        let status = unsafe { (self.allocate_pool)(
            mem_type,
            size,
            &mut mem
        ) };
        check("AllocatePool", status)?;
        Ok(mem)
    }

    /// # Safety
    ///
    /// `mem` must have been returned by the firmware's pool allocator
    pub unsafe fn free_mem(&self, mem: *mut c_void) -> Result<(), EFIError> {
        check("FreePool", (self.free_pool)(mem))
    }

    /// Creates a timer event with no notification function, to be
    /// polled with `check_event`
    pub fn create_timer_event(&self) -> Result<EFIEvent, EFIError> {
        let mut event: EFIEvent = ptr::null_mut();
        let status = unsafe { (self.create_event)(
            EFIEventType::Timer as u32,
            EFITpl::Application,
            None,
            ptr::null_mut(),
            &mut event
        ) };
        check("CreateEvent", status)?;
        Ok(event)
    }

    pub fn set_timer(
        &self,
        event: EFIEvent,
        timer_type: EFITimerType,
        hundreds_of_ns: u64
    ) -> Result<(), EFIError> {
        let status = unsafe { (self.set_timer)(
            event,
            timer_type,
            hundreds_of_ns
        ) };
        check("SetTimer", status)
    }

    /// Returns true if the event has been signaled
    pub fn check_event(&self, event: EFIEvent) -> Result<bool, EFIError> {
        let status = unsafe { (self.check_event)(event) };
        if status == StatusCode::NOT_READY {
            return Ok(false);
        }
        check("CheckEvent", status)?;
        Ok(true)
    }

    pub fn close_event(&self, event: EFIEvent) -> Result<(), EFIError> {
        check("CloseEvent", unsafe { (self.close_event)(event) })
    }

    pub fn stall(&self, microseconds: usize) -> Result<(), EFIError> {
        check("Stall", unsafe { (self.stall)(microseconds) })
    }

    /// Opens the protocol identified by `guid` on `handle`
    ///
    /// # Safety
    ///
    /// `T` must be the interface type the GUID identifies
    pub unsafe fn open_protocol<T>(
        &self,
        handle: EFIHandle,
        guid: &Guid,
        agent: EFIHandle,
        attributes: EFIOpenProtocolAttributes
    ) -> Result<&'static T, EFIError> {
        let mut interface: *mut c_void = ptr::null_mut();
        let status = (self.open_protocol)(
            handle,
            guid,
            &mut interface,
            agent,
            ptr::null(),
            attributes as u32
        );
        check("OpenProtocol", status)?;
        if interface.is_null() {
            return Err(EFIError { op: "OpenProtocol", status: StatusCode::UNSUPPORTED });
        }
        Ok(&*interface.cast::<T>())
    }

    pub fn close_protocol(&self, handle: EFIHandle, guid: &Guid, agent: EFIHandle) -> Result<(), EFIError> {
        let status = unsafe { (self.close_protocol)(
            handle,
            guid,
            agent,
            ptr::null()
        ) };
        check("CloseProtocol", status)
    }

    /// Returns every handle that supports the protocol identified by `guid`
    pub fn locate_handles(&'static self, guid: &Guid) -> Result<HandleBuffer, EFIError> {
        let mut count = 0usize;
        let mut handles: *mut EFIHandle = ptr::null_mut();
        let status = unsafe { (self.locate_handle_buffer)(
            EFILocateSearchType::ByProtocol,
            guid,
            ptr::null(),
            &mut count,
            &mut handles
        ) };
        if status == StatusCode::NOT_FOUND {
            return Ok(HandleBuffer { handles: ptr::null_mut(), count: 0, boot_services: self });
        }
        check("LocateHandleBuffer", status)?;
        Ok(HandleBuffer { handles, count, boot_services: self })
    }
}

/// A pool-allocated array of handles returned by `locate_handles`
///
/// The pool is returned to the firmware when this is dropped
pub struct HandleBuffer {
    handles: *mut EFIHandle,
    count: usize,
    boot_services: &'static EFIBootServices
}

impl HandleBuffer {
    pub fn as_slice(&self) -> &[EFIHandle] {
        if self.handles.is_null() {
            &[]
        } else {
            unsafe { slice::from_raw_parts(self.handles, self.count) }
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Drop for HandleBuffer {
    fn drop(&mut self) {
        if !self.handles.is_null() {
            // Nothing useful can be done about a pool that refuses to be freed
            let _ = unsafe { self.boot_services.free_mem(self.handles.cast()) };
        }
    }
}

#[repr(u32)]
pub enum EFIEventType {
    /// The event is a timer and may be passed to BootServices.set_timer
    Timer           = 0x80000000
}

#[repr(usize)]
pub enum EFITpl {
    Application     = 4
}

#[derive(Debug, Clone, Copy)]
#[repr(u32)]
pub enum EFITimerType {
    /// The timer setting is to be cancelled
    Cancel      = 0,
    /// The timer is to go off on every tick
    Periodic    = 1,
    /// The timer is to go off at the next tick
    Relative    = 2
}

#[derive(Debug, Clone, Copy)]
#[repr(u32)]
pub enum EFIAllocateType {
    AnyPages    = 0,
    MaxAddress  = 1,
    Address     = 2
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u32)]
pub enum EFIMemoryType {
    LoaderCode          = 1,
    LoaderData          = 2,
    BootServicesCode    = 3,
    BootServicesData    = 4
}

#[derive(Debug, Clone, Copy)]
#[repr(u32)]
pub enum EFILocateSearchType {
    AllHandles      = 0,
    ByRegisterNotify = 1,
    ByProtocol      = 2
}

#[derive(Debug, Clone, Copy)]
#[repr(u32)]
pub enum EFIOpenProtocolAttributes {
    ByHandleProtocol    = 0x01,
    GetProtocol         = 0x02,
    TestProtocol        = 0x04,
    ByChildController   = 0x08,
    ByDriver            = 0x10,
    /// The agent gets sole access; other non-exclusive openers are
    /// disconnected and later exclusive opens fail with ACCESS_DENIED
    Exclusive           = 0x20
}

/// A unique 64-bit aligned 128-bit value used to identify protocols
#[derive(Debug, PartialEq)]
#[repr(C)]
pub struct Guid {
    pub first: u32,
    pub second: u16,
    pub third: u16,
    pub fourth: [u8; 8]
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{offset_of, size_of};

    #[test]
    fn test_boot_services_entry_offsets() {
        assert_eq!(offset_of!(EFIBootServices, allocate_pool), 0x40);
        assert_eq!(offset_of!(EFIBootServices, free_pool), 0x48);
        assert_eq!(offset_of!(EFIBootServices, create_event), 0x50);
        assert_eq!(offset_of!(EFIBootServices, check_event), 0x78);
        assert_eq!(offset_of!(EFIBootServices, stall), 0xf8);
        assert_eq!(offset_of!(EFIBootServices, open_protocol), 0x118);
        assert_eq!(offset_of!(EFIBootServices, locate_handle_buffer), 0x138);
        assert_eq!(size_of::<EFIBootServices>(), 0x178);
    }

    #[test]
    fn test_system_table_layout() {
        assert_eq!(offset_of!(EFISystemTable, stdout), 0x40);
        assert_eq!(offset_of!(EFISystemTable, boot_services), 0x60);
    }

    #[test]
    fn test_error_statuses() {
        assert!(!StatusCode::is_error(StatusCode::SUCCESS));
        assert!(StatusCode::is_error(StatusCode::NOT_READY));
        assert!(check("Stall", StatusCode::SUCCESS).is_ok());
        let err = check("Stall", StatusCode::DEVICE_ERROR).unwrap_err();
        assert_eq!(err.op, "Stall");
        assert_eq!(err.status, StatusCode::DEVICE_ERROR);
    }
}
