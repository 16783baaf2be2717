//! The HDA controller's memory mapped register map
//!
//! Offsets are in bytes from the start of BAR 0. Each register that carries
//! more than one field gets a newtype with shift/mask accessors, as
//! specified in section 3.3 of the HDA spec, revision 1.0a.

use core::hint;
use log::warn;
use num::Integer;
use crate::config::WaitLimit;
use crate::error::{Error, Result, WaitSite};
use crate::platform::{RegisterIo, Width};

/// Global Capabilities
pub const GCAP: u32 = 0x00;
/// Global Control
pub const GCTL: u32 = 0x08;
/// Wake Enable
pub const WAKEEN: u32 = 0x0c;
/// State Change Status
pub const STATESTS: u32 = 0x0e;
/// Interrupt Control
pub const INTCTL: u32 = 0x20;
/// Stream Synchronization
pub const SSYNC: u32 = 0x38;
/// CORB Lower Base Address
pub const CORBLBASE: u32 = 0x40;
/// CORB Upper Base Address
pub const CORBUBASE: u32 = 0x44;
/// CORB Write Pointer
pub const CORBWP: u32 = 0x48;
/// CORB Read Pointer
pub const CORBRP: u32 = 0x4a;
/// CORB Control
pub const CORBCTL: u32 = 0x4c;
/// CORB Size
pub const CORBSIZE: u32 = 0x4e;
/// RIRB Lower Base Address
pub const RIRBLBASE: u32 = 0x50;
/// RIRB Upper Base Address
pub const RIRBUBASE: u32 = 0x54;
/// RIRB Write Pointer
pub const RIRBWP: u32 = 0x58;
/// Response Interrupt Count
pub const RINTCNT: u32 = 0x5a;
/// RIRB Control
pub const RIRBCTL: u32 = 0x5c;
/// RIRB Status
pub const RIRBSTS: u32 = 0x5d;
/// RIRB Size
pub const RIRBSIZE: u32 = 0x5e;
/// Immediate Command Output Interface
pub const ICOI: u32 = 0x60;
/// Immediate Command Input Interface
pub const ICII: u32 = 0x64;
/// Immediate Command Status
pub const ICIS: u32 = 0x68;
/// DMA Position Lower Base Address
pub const DPLBASE: u32 = 0x70;
/// DMA Position Upper Base Address
pub const DPUBASE: u32 = 0x74;

/// Offset of the first stream descriptor. Input streams come first,
/// then output streams, then bidirectional ones
pub const STREAM_DESCRIPTORS: u32 = 0x80;
/// Size of one stream descriptor register block
pub const STREAM_DESCRIPTOR_LEN: u32 = 0x20;

/// Field offsets within a stream descriptor
pub mod sd {
    /// Control, bits 0..16
    pub const CTL: u32 = 0x00;
    /// Control, bits 16..24
    pub const CTL_HI: u32 = 0x02;
    /// Cyclic Buffer Length
    pub const CBL: u32 = 0x08;
    /// Last Valid Index
    pub const LVI: u32 = 0x0c;
    pub const FMT: u32 = 0x12;
    /// Buffer Descriptor List Pointer, lower half
    pub const BDPL: u32 = 0x18;
    /// Buffer Descriptor List Pointer, upper half
    pub const BDPU: u32 = 0x1c;
}

/// Byte offset of the register block of the stream descriptor with
/// global index `n`
pub fn stream_descriptor(n: u8) -> u32 {
    STREAM_DESCRIPTORS + n as u32 * STREAM_DESCRIPTOR_LEN
}

/// Width-named accessors over a `RegisterIo`
pub(crate) trait Mmio: RegisterIo {
    fn read8(&mut self, offset: u32) -> Result<u8> {
        Ok(self.read(Width::Byte, offset)?.as_u8())
    }

    fn read16(&mut self, offset: u32) -> Result<u16> {
        Ok(self.read(Width::Word, offset)?.as_u16())
    }

    fn read32(&mut self, offset: u32) -> Result<u32> {
        self.read(Width::Dword, offset)
    }

    fn write8(&mut self, offset: u32, val: u8) -> Result<()> {
        self.write(Width::Byte, offset, val as u32)
    }

    fn write16(&mut self, offset: u32, val: u16) -> Result<()> {
        self.write(Width::Word, offset, val as u32)
    }

    fn write32(&mut self, offset: u32, val: u32) -> Result<()> {
        self.write(Width::Dword, offset, val)
    }

    /// Writes a 64-bit device address into a lower/upper register pair
    fn write_addr(&mut self, lower: u32, upper: u32, addr: u64) -> Result<()> {
        self.write32(lower, addr.get_bits(0..32).as_u32())?;
        self.write32(upper, addr.get_bits(32..64).as_u32())
    }
}

impl<T: RegisterIo + ?Sized> Mmio for T {}

/// Spins until `done` returns true, giving up after `limit` checks
pub(crate) fn poll_until<T: ?Sized, F>(io: &mut T, site: WaitSite, limit: WaitLimit, mut done: F) -> Result<()>
where
    F: FnMut(&mut T) -> Result<bool>
{
    let mut checks = 0u32;
    loop {
        if done(io)? {
            return Ok(());
        }
        if let WaitLimit::Iterations(max) = limit {
            checks += 1;
            if checks >= max {
                warn!("gave up on {:?} after {} checks", site, checks);
                return Err(Error::WaitTimedOut(site));
            }
        }
        hint::spin_loop();
    }
}

/// Indicates the capabilities of the HDA controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct GlobalCaps(u16);

impl GlobalCaps {
    /// A value of 0 indicates that no output streams
    /// are supported. The max value is 15
    pub fn output_streams(&self) -> u8 {
        self.0.get_bits(12..16).as_u8()
    }

    /// The max value is 15
    pub fn input_streams(&self) -> u8 {
        self.0.get_bits(8..12).as_u8()
    }

    /// The max value is 30
    pub fn bidirectional_streams(&self) -> u8 {
        self.0.get_bits(3..8).as_u8()
    }

    pub fn addr_64bit_supported(&self) -> bool {
        self.0.is_set(0)
    }

    pub fn total_streams(&self) -> usize {
        self.input_streams() as usize
            + self.output_streams() as usize
            + self.bidirectional_streams() as usize
    }
}

impl From<u16> for GlobalCaps {
    fn from(val: u16) -> Self {
        Self(val)
    }
}

/// Provides global level control over the controller and link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct GlobalControl(u32);

impl GlobalControl {
    /// The CRST bit. It reads as 1 once the controller has left reset
    pub fn controller_reset(&self) -> bool {
        self.0.is_set(0)
    }

    pub fn with_controller_reset(self, set: bool) -> Self {
        Self(self.0.with_bit(0, set))
    }
}

impl From<u32> for GlobalControl {
    fn from(val: u32) -> Self {
        Self(val)
    }
}

impl From<GlobalControl> for u32 {
    fn from(reg: GlobalControl) -> u32 {
        reg.0
    }
}

/// STATESTS: bit n is set when the codec at address n signalled a
/// state change. Write 1 to clear
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct StateChangeStatus(u16);

impl StateChangeStatus {
    /// The codec addresses that reported in, one bit per address
    pub fn codecs(&self) -> u16 {
        self.0.get_bits(0..15)
    }
}

impl From<u16> for StateChangeStatus {
    fn from(val: u16) -> Self {
        Self(val)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct CorbReadPointer(u16);

impl CorbReadPointer {
    /// Setting this field resets the CORB read pointer to 0.
    /// The hardware reports the reset done by reading the bit back as set,
    /// and the bit must then be cleared and read back as clear
    pub fn reset(&self) -> bool {
        self.0.is_set(15)
    }

    pub fn with_reset(self, set: bool) -> Self {
        Self(self.0.with_bit(15, set))
    }

    /// The offset of the last command the controller has fetched
    pub fn read_pointer(&self) -> u8 {
        self.0.get_bits(0..8).as_u8()
    }
}

impl From<u16> for CorbReadPointer {
    fn from(val: u16) -> Self {
        Self(val)
    }
}

impl From<CorbReadPointer> for u16 {
    fn from(reg: CorbReadPointer) -> u16 {
        reg.0
    }
}

/// CORBCTL and RIRBCTL share the DMA run bit position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct RingControl(u8);

impl RingControl {
    /// Runs the ring's DMA engine. The value must be read back to
    /// verify the engine changed state
    pub fn dma_run(&self) -> bool {
        self.0.is_set(1)
    }

    pub fn with_dma_run(self, run: bool) -> Self {
        Self(self.0.with_bit(1, run))
    }
}

impl From<u8> for RingControl {
    fn from(val: u8) -> Self {
        Self(val)
    }
}

impl From<RingControl> for u8 {
    fn from(reg: RingControl) -> u8 {
        reg.0
    }
}

/// Number of entries a ring buffer holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RingEntries {
    Two         = 0b00,
    Sixteen     = 0b01,
    TwoFiftySix = 0b10
}

impl RingEntries {
    pub fn count(&self) -> u16 {
        match self {
            RingEntries::Two => 2,
            RingEntries::Sixteen => 16,
            RingEntries::TwoFiftySix => 256
        }
    }
}

/// CORBSIZE and RIRBSIZE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct RingSize(u8);

impl RingSize {
    /// One bit per supported size: bit 4 for 2 entries, 5 for 16, 6 for 256
    pub fn capability(&self) -> u8 {
        self.0.get_bits(4..8)
    }

    /// The largest entry count the capability field allows.
    /// An empty capability field is read as supporting 256 entries
    pub fn largest_supported(&self) -> RingEntries {
        let cap = self.capability();
        if cap.is_set(2) || cap == 0 {
            RingEntries::TwoFiftySix
        } else if cap.is_set(1) {
            RingEntries::Sixteen
        } else {
            RingEntries::Two
        }
    }

    pub fn with_entries(self, entries: RingEntries) -> Self {
        Self(self.0.with_bits(0..2, entries as u8))
    }
}

impl From<u8> for RingSize {
    fn from(val: u8) -> Self {
        Self(val)
    }
}

impl From<RingSize> for u8 {
    fn from(reg: RingSize) -> u8 {
        reg.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct RirbWritePointer(u16);

impl RirbWritePointer {
    /// Writing a 1 resets the write pointer to 0. Always reads as 0
    pub fn reset() -> Self {
        Self(0u16.with_bit(15, true))
    }

    /// The offset of the last response the controller has written
    pub fn write_pointer(&self) -> u8 {
        self.0.get_bits(0..8).as_u8()
    }
}

impl From<u16> for RirbWritePointer {
    fn from(val: u16) -> Self {
        Self(val)
    }
}

impl From<RirbWritePointer> for u16 {
    fn from(reg: RirbWritePointer) -> u16 {
        reg.0
    }
}

/// ICIS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct ImmediateStatus(u16);

impl ImmediateStatus {
    /// What the register reads as on controllers without the interface
    pub const ABSENT: u16 = 0xffff;

    /// ICB: setting it sends the verb in ICOI. The controller clears it
    /// once the response has been latched
    pub fn with_busy(self, set: bool) -> Self {
        Self(self.0.with_bit(0, set))
    }

    /// IRV: a response is waiting in ICII. Write 1 to clear
    pub fn result_valid(&self) -> bool {
        self.0.is_set(1)
    }

    pub fn with_result_valid(self, set: bool) -> Self {
        Self(self.0.with_bit(1, set))
    }
}

impl From<u16> for ImmediateStatus {
    fn from(val: u16) -> Self {
        Self(val)
    }
}

impl From<ImmediateStatus> for u16 {
    fn from(reg: ImmediateStatus) -> u16 {
        reg.0
    }
}

/// SDnCTL, the 24 bits that span the CTL and CTL_HI offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct StreamControl(u32);

impl StreamControl {
    pub fn stream_reset(&self) -> bool {
        self.0.is_set(0)
    }

    pub fn with_stream_reset(self, set: bool) -> Self {
        Self(self.0.with_bit(0, set))
    }

    pub fn run(&self) -> bool {
        self.0.is_set(1)
    }

    pub fn with_run(self, set: bool) -> Self {
        Self(self.0.with_bit(1, set))
    }

    pub fn with_traffic_priority(self, set: bool) -> Self {
        Self(self.0.with_bit(18, set))
    }

    /// The tag the stream's packets carry on the link. 0 is reserved
    pub fn with_stream_number(self, n: u8) -> Self {
        Self(self.0.with_bits(20..24, (n & 0xf) as u32))
    }

    /// The part of the register at the CTL offset
    pub fn low(&self) -> u16 {
        self.0.get_bits(0..16).as_u16()
    }

    /// The part of the register at the CTL_HI offset
    pub fn high(&self) -> u8 {
        self.0.get_bits(16..24).as_u8()
    }

    pub fn from_parts(low: u16, high: u8) -> Self {
        Self(0u32.with_bits(0..16, low as u32).with_bits(16..24, high as u32))
    }
}

impl From<u32> for StreamControl {
    fn from(val: u32) -> Self {
        Self(val & 0x00ff_ffff)
    }
}

impl From<StreamControl> for u32 {
    fn from(reg: StreamControl) -> u32 {
        reg.0
    }
}

/// Bits per sample, as encoded in the BITS field of a stream format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SampleBits {
    Bits8   = 0b000,
    Bits16  = 0b001,
    Bits20  = 0b010,
    Bits24  = 0b011,
    Bits32  = 0b100
}

/// Sample rates as base rate, multiplier and divisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRate {
    Hz8000,
    Hz11025,
    Hz16000,
    Hz22050,
    Hz32000,
    Hz44100,
    Hz48000,
    Hz88200,
    Hz96000,
    Hz176400,
    Hz192000
}

impl SampleRate {
    /// (BASE, MULT, DIV) field values
    fn fields(&self) -> (u16, u16, u16) {
        match self {
            SampleRate::Hz8000 => (0, 0, 5),
            SampleRate::Hz11025 => (1, 0, 3),
            SampleRate::Hz16000 => (0, 0, 2),
            SampleRate::Hz22050 => (1, 0, 1),
            SampleRate::Hz32000 => (0, 1, 2),
            SampleRate::Hz44100 => (1, 0, 0),
            SampleRate::Hz48000 => (0, 0, 0),
            SampleRate::Hz88200 => (1, 1, 0),
            SampleRate::Hz96000 => (0, 1, 0),
            SampleRate::Hz176400 => (1, 3, 0),
            SampleRate::Hz192000 => (0, 3, 0)
        }
    }
}

/// SDnFMT, and the payload of the SetStreamFormat verb
///
/// The same encoding is used in both places so that the
/// converter and the DMA engine agree on the layout of samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct StreamFormat(u16);

impl StreamFormat {
    /// A PCM format. `channels` is clamped to 1..=16
    pub fn pcm(rate: SampleRate, bits: SampleBits, channels: u8) -> Self {
        let (base, mult, div) = rate.fields();
        let channels = channels.clamp(1, 16) - 1;
        Self(0u16
            .with_bits(0..4, channels as u16)
            .with_bits(4..7, bits as u16)
            .with_bits(8..11, div)
            .with_bits(11..14, mult)
            .with_bits(14..15, base))
    }

    pub fn channels(&self) -> u8 {
        self.0.get_bits(0..4).as_u8() + 1
    }

    pub fn bits(&self) -> u8 {
        self.0.get_bits(4..7).as_u8()
    }

    pub fn divisor(&self) -> u8 {
        self.0.get_bits(8..11).as_u8() + 1
    }

    pub fn multiple(&self) -> u8 {
        self.0.get_bits(11..14).as_u8() + 1
    }

    /// Base rate of 44.1 kHz when set, 48 kHz otherwise
    pub fn base_44k1(&self) -> bool {
        self.0.is_set(14)
    }

    /// The sample rate in Hz
    pub fn rate(&self) -> u32 {
        let base = if self.base_44k1() { 44_100 } else { 48_000 };
        base * self.multiple() as u32 / self.divisor() as u32
    }
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self::pcm(SampleRate::Hz48000, SampleBits::Bits16, 2)
    }
}

impl From<u16> for StreamFormat {
    fn from(val: u16) -> Self {
        Self(val)
    }
}

impl From<StreamFormat> for u16 {
    fn from(fmt: StreamFormat) -> u16 {
        fmt.0
    }
}
