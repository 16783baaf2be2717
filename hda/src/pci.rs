//! Finding the HD audio function on the PCI bus
//!
//! # References
//!
//! * The OSDev wiki <https://wiki.osdev.org/PCI>
//! * <https://wiki.osdev.org/Intel_High_Definition_Audio#Identifying_HDA_on_a_machine>

use alloc::vec::Vec;
use core::fmt::Debug;
use log::{debug, info};
use num::Integer;
use crate::error::{Error, Result};
use crate::platform::Platform;

/// Configuration space offset of the device and vendor ids
pub const DEVICE_AND_VENDOR_ID_OFFSET: u32 = 0x00;
/// Configuration space offset of the revision, prog if, subclass and class code
pub const CLASSCODE_AND_SUBCLASS_OFFSET: u32 = 0x08;

/// Class code of multimedia controllers
pub const CLASS_MULTIMEDIA: u8 = 0x04;
/// Subclass of HD audio controllers
pub const SUBCLASS_HD_AUDIO: u8 = 0x03;

pub const VENDOR_INTEL: u16 = 0x8086;
pub const VENDOR_AMD: u16 = 0x1022;

/// Functions known to be HD audio controllers
pub const HDA_DEVICES: &[(u16, u16)] = &[
    (VENDOR_INTEL, 0x2668), // ICH6
    (VENDOR_INTEL, 0x27d8), // ICH7
    (VENDOR_INTEL, 0x269a), // ESB2
    (VENDOR_INTEL, 0x284b), // ICH8
    (VENDOR_INTEL, 0x293e), // ICH9
    (VENDOR_INTEL, 0x3a3e), // ICH10
    (VENDOR_INTEL, 0x1c20), // 6 Series
    (VENDOR_INTEL, 0x1e20), // 7 Series
    (VENDOR_INTEL, 0x8c20), // 8 Series
    (VENDOR_INTEL, 0x9c20), // Lynx Point LP
    (VENDOR_INTEL, 0xa170), // 100 Series
    (VENDOR_INTEL, 0x9d70), // Sunrise Point LP
    (VENDOR_INTEL, 0xa348), // Cannon Lake
    (VENDOR_AMD, 0x1457)    // Family 17h
];

/// What a PCI function says it is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciIdentity {
    pub vendor_id: u16,
    pub device_id: u16,
    pub class: u8,
    pub subclass: u8
}

impl PciIdentity {
    /// Builds the identity from the dwords at configuration space
    /// offsets 0x00 and 0x08
    pub fn from_config(id_dword: u32, class_dword: u32) -> Self {
        Self {
            vendor_id: id_dword.get_bits(0..16).as_u16(),
            device_id: id_dword.get_bits(16..32).as_u16(),
            class: class_dword.get_bits(24..32).as_u8(),
            subclass: class_dword.get_bits(16..24).as_u8()
        }
    }

    pub fn allow_listed(&self) -> bool {
        HDA_DEVICES.contains(&(self.vendor_id, self.device_id))
    }

    pub fn is_hd_audio_class(&self) -> bool {
        self.class == CLASS_MULTIMEDIA && self.subclass == SUBCLASS_HD_AUDIO
    }

    pub fn is_hda(&self) -> bool {
        self.allow_listed() || self.is_hd_audio_class()
    }
}

/// The PCI functions the firmware can hand out
pub trait PciBus {
    /// Names a function without owning it
    type Candidate: Copy + Debug;
    /// A function bound for exclusive use
    type Function: Platform;

    /// Every function that implements PCI I/O, in firmware order
    fn candidates(&mut self) -> Result<Vec<Self::Candidate>>;
    /// Reads a candidate's identity without claiming it
    fn identify(&mut self, candidate: Self::Candidate) -> Result<PciIdentity>;
    /// Claims a candidate so nothing else drives it, with memory decoding
    /// and bus mastering enabled
    fn bind_exclusive(&mut self, candidate: Self::Candidate) -> Result<Self::Function>;
    /// Gives up a function claimed with `bind_exclusive`
    fn release(&mut self, function: Self::Function) -> Result<()>;
}

/// Returns the first candidate that is an HD audio controller
pub fn discover<B: PciBus + ?Sized>(bus: &mut B) -> Result<(B::Candidate, PciIdentity)> {
    let candidates = bus.candidates()?;
    debug!("{} PCI I/O handles", candidates.len());
    for candidate in candidates {
        let identity = bus.identify(candidate)?;
        debug!(
            "{:?}: {:04x}:{:04x} class {:02x}:{:02x}",
            candidate, identity.vendor_id, identity.device_id, identity.class, identity.subclass
        );
        if identity.is_hda() {
            info!("found HD audio controller {:04x}:{:04x}", identity.vendor_id, identity.device_id);
            return Ok((candidate, identity));
        }
    }
    Err(Error::NoController)
}
