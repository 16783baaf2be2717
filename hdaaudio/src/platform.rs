//! The `hda` platform traits over UEFI boot services and the PCI I/O protocol

use alloc::vec::Vec;
use core::ptr::{self, NonNull};
use hda::pci::{CLASSCODE_AND_SUBCLASS_OFFSET, DEVICE_AND_VENDOR_ID_OFFSET};
use hda::{Clock, Dma, DmaRegion, Error, PciBus, PciIdentity, RegisterIo, Result, Width};
use log::{debug, warn};
use machine::pci_io::{
    EFIPciIoProtocol, EFIPciIoWidth, ATTRIBUTE_BUS_MASTER, ATTRIBUTE_MEMORY,
    EFI_PCI_IO_PROTOCOL_GUID, PAGE_SIZE
};
use machine::uefi::{
    EFIBootServices, EFIError, EFIEvent, EFIHandle, EFIOpenProtocolAttributes, EFITimerType,
    StatusCode
};

/// The controller's registers live behind BAR 0
const HDA_BAR: u8 = 0;

fn device_error(e: EFIError) -> Error {
    if e.status == StatusCode::OUT_OF_RESOURCES {
        Error::OutOfResources
    } else {
        Error::DeviceIo { op: e.op, status: e.status }
    }
}

fn pages_for(len: usize) -> usize {
    (len + PAGE_SIZE - 1) / PAGE_SIZE
}

/// Every handle that carries the PCI I/O protocol
pub struct UefiPciBus {
    boot_services: &'static EFIBootServices,
    /// The agent protocol opens are made on behalf of
    image: EFIHandle
}

impl UefiPciBus {
    pub fn new(boot_services: &'static EFIBootServices, image: EFIHandle) -> Self {
        Self { boot_services, image }
    }

    fn open(&self, handle: EFIHandle, attributes: EFIOpenProtocolAttributes) -> Result<&'static EFIPciIoProtocol> {
        let io = unsafe {
            self.boot_services.open_protocol::<EFIPciIoProtocol>(
                handle,
                &EFI_PCI_IO_PROTOCOL_GUID,
                self.image,
                attributes
            )
        };
        io.map_err(device_error)
    }

    fn close(&self, handle: EFIHandle) -> Result<()> {
        self.boot_services
            .close_protocol(handle, &EFI_PCI_IO_PROTOCOL_GUID, self.image)
            .map_err(device_error)
    }
}

impl PciBus for UefiPciBus {
    type Candidate = EFIHandle;
    type Function = UefiFunction;

    fn candidates(&mut self) -> Result<Vec<EFIHandle>> {
        let handles = self.boot_services
            .locate_handles(&EFI_PCI_IO_PROTOCOL_GUID)
            .map_err(device_error)?;
        Ok(handles.as_slice().to_vec())
    }

    fn identify(&mut self, handle: EFIHandle) -> Result<PciIdentity> {
        let io = self.open(handle, EFIOpenProtocolAttributes::GetProtocol)?;
        let ids = io.config_read(EFIPciIoWidth::Uint32, DEVICE_AND_VENDOR_ID_OFFSET);
        let class = io.config_read(EFIPciIoWidth::Uint32, CLASSCODE_AND_SUBCLASS_OFFSET);
        self.close(handle)?;
        Ok(PciIdentity::from_config(
            ids.map_err(device_error)?,
            class.map_err(device_error)?
        ))
    }

    fn bind_exclusive(&mut self, handle: EFIHandle) -> Result<UefiFunction> {
        let io = self.open(handle, EFIOpenProtocolAttributes::Exclusive)?;
        if let Err(e) = io.enable_attributes(ATTRIBUTE_MEMORY | ATTRIBUTE_BUS_MASTER) {
            let _ = self.close(handle);
            return Err(device_error(e));
        }
        debug!("bound {:?} exclusively", handle);
        Ok(UefiFunction {
            boot_services: self.boot_services,
            io,
            handle,
            timer: None
        })
    }

    fn release(&mut self, function: UefiFunction) -> Result<()> {
        let handle = function.handle;
        // The timer event goes with the function
        drop(function);
        self.close(handle)
    }
}

/// An HDA controller opened exclusively through PCI I/O
pub struct UefiFunction {
    boot_services: &'static EFIBootServices,
    io: &'static EFIPciIoProtocol,
    handle: EFIHandle,
    /// Created the first time a timer is armed
    timer: Option<EFIEvent>
}

impl UefiFunction {
    fn timer(&mut self) -> Result<EFIEvent> {
        match self.timer {
            Some(event) => Ok(event),
            None => {
                let event = self.boot_services.create_timer_event().map_err(device_error)?;
                self.timer = Some(event);
                Ok(event)
            }
        }
    }
}

impl Drop for UefiFunction {
    fn drop(&mut self) {
        if let Some(event) = self.timer.take() {
            if let Err(e) = self.boot_services.close_event(event) {
                warn!("{}", e);
            }
        }
    }
}

impl RegisterIo for UefiFunction {
    fn read(&mut self, width: Width, offset: u32) -> Result<u32> {
        let val = self.io.mem_read(pci_width(width), HDA_BAR, offset as u64).map_err(device_error)?;
        Ok(width.truncate(val))
    }

    fn write(&mut self, width: Width, offset: u32, val: u32) -> Result<()> {
        self.io
            .mem_write(pci_width(width), HDA_BAR, offset as u64, width.truncate(val))
            .map_err(device_error)
    }
}

fn pci_width(width: Width) -> EFIPciIoWidth {
    match width {
        Width::Byte => EFIPciIoWidth::Uint8,
        Width::Word => EFIPciIoWidth::Uint16,
        Width::Dword => EFIPciIoWidth::Uint32
    }
}

impl Dma for UefiFunction {
    /// Whole pages are allocated and mapped, so the region starts page aligned
    fn allocate_dma(&mut self, len: usize) -> Result<DmaRegion> {
        let pages = pages_for(len);
        let host = self.io.allocate_buffer(pages).map_err(device_error)?;
        let host = match NonNull::new(host) {
            Some(host) => host,
            None => return Err(Error::OutOfResources)
        };
        let mapping = match self.io.map_common_buffer(host.as_ptr(), pages * PAGE_SIZE) {
            Ok(mapping) => mapping,
            Err(e) => {
                let _ = unsafe { self.io.free_buffer(pages, host.as_ptr()) };
                return Err(device_error(e));
            }
        };
        if mapping.len < len {
            // The firmware could not map it contiguously
            unsafe {
                let _ = self.io.unmap(mapping.token());
                let _ = self.io.free_buffer(pages, host.as_ptr());
            }
            return Err(Error::OutOfResources);
        }
        unsafe { ptr::write_bytes(host.as_ptr(), 0, len) };
        Ok(unsafe { DmaRegion::new(host, mapping.device_addr, len, mapping.token()) })
    }

    fn free_dma(&mut self, region: DmaRegion) -> Result<()> {
        unsafe {
            self.io.unmap(region.token()).map_err(device_error)?;
            self.io.free_buffer(pages_for(region.len()), region.host_ptr()).map_err(device_error)
        }
    }
}

impl Clock for UefiFunction {
    fn stall(&mut self, microseconds: usize) -> Result<()> {
        self.boot_services.stall(microseconds).map_err(device_error)
    }

    fn arm_timer(&mut self, hundreds_of_ns: u64) -> Result<()> {
        let event = self.timer()?;
        self.boot_services
            .set_timer(event, EFITimerType::Relative, hundreds_of_ns)
            .map_err(device_error)
    }

    fn timer_expired(&mut self) -> Result<bool> {
        let event = self.timer()?;
        self.boot_services.check_event(event).map_err(device_error)
    }

    fn cancel_timer(&mut self) -> Result<()> {
        match self.timer {
            Some(event) => self.boot_services
                .set_timer(event, EFITimerType::Cancel, 0)
                .map_err(device_error),
            None => Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pages_for_rounds_up() {
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(PAGE_SIZE), 1);
        assert_eq!(pages_for(PAGE_SIZE + 1), 2);
        assert_eq!(pages_for(3 * PAGE_SIZE), 3);
    }

    #[test]
    fn test_out_of_resources_keeps_its_meaning() {
        let e = EFIError { op: "PciIo.AllocateBuffer", status: StatusCode::OUT_OF_RESOURCES };
        assert_eq!(device_error(e), Error::OutOfResources);
        let e = EFIError { op: "PciIo.Mem.Read", status: StatusCode::DEVICE_ERROR };
        assert_eq!(device_error(e), Error::DeviceIo { op: "PciIo.Mem.Read", status: StatusCode::DEVICE_ERROR });
    }
}
