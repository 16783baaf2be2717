use log::{debug, trace};
use crate::config::{PollPolicy, WaitLimit};
use crate::error::{Result, WaitSite};
use crate::platform::{DmaRegion, Platform};
use crate::regs::{
    self, poll_until, CorbReadPointer, Mmio, RingControl, RingEntries, RingSize, RirbWritePointer
};
use super::{CommandTransport, TransportKind};

/// Bytes of one CORB entry
const CORB_ENTRY_LEN: usize = 4;
/// Bytes of one RIRB entry: the response and the extended response
const RIRB_ENTRY_LEN: usize = 8;
/// Enough for 256 entries
const CORB_LEN: usize = 256 * CORB_ENTRY_LEN;
const RIRB_LEN: usize = 256 * RIRB_ENTRY_LEN;
/// RIRBSTS: response interrupt and overrun status, both write 1 to clear
const RIRBSTS_CLEAR: u8 = 0b101;

/// The Command Outbound Ring Buffer and the Response Inbound Ring Buffer
///
/// The CORB is a ring of verbs the controller fetches by DMA, the RIRB a
/// ring of responses it writes back. The write cursor tracks the last
/// verb placed in the CORB, the read cursor the last response taken from
/// the RIRB. Both move by one per command, so they index the same
/// exchange modulo the ring sizes.
#[derive(Debug)]
pub struct RingTransport {
    corb: DmaRegion,
    rirb: DmaRegion,
    corb_entries: u16,
    rirb_entries: u16,
    write_cursor: u16,
    read_cursor: u16,
    ring_reset: WaitLimit,
    ring_drain: WaitLimit
}

impl RingTransport {
    /// Stops both rings, points them at fresh buffers, resets their
    /// pointers and starts them again
    pub fn setup<P: Platform + ?Sized>(platform: &mut P, poll: &PollPolicy) -> Result<Self> {
        let ring_reset = poll.limit(WaitSite::RingReset);
        stop_ring(platform, regs::CORBCTL, ring_reset)?;
        stop_ring(platform, regs::RIRBCTL, ring_reset)?;

        let mut corb = platform.allocate_dma(CORB_LEN)?;
        let mut rirb = match platform.allocate_dma(RIRB_LEN) {
            Ok(rirb) => rirb,
            Err(e) => {
                platform.free_dma(corb)?;
                return Err(e);
            }
        };
        corb.zero();
        rirb.zero();

        platform.write_addr(regs::CORBLBASE, regs::CORBUBASE, corb.device_addr())?;
        platform.write_addr(regs::RIRBLBASE, regs::RIRBUBASE, rirb.device_addr())?;

        let corb_entries = set_ring_size(platform, regs::CORBSIZE)?;
        let rirb_entries = set_ring_size(platform, regs::RIRBSIZE)?;
        debug!(
            "CORB at {:#x} with {} entries, RIRB at {:#x} with {} entries",
            corb.device_addr(), corb_entries.count(), rirb.device_addr(), rirb_entries.count()
        );

        reset_pointers(platform, ring_reset)?;
        let ctl = RingControl::from(platform.read8(regs::CORBCTL)?).with_dma_run(true);
        platform.write8(regs::CORBCTL, ctl.into())?;

        // A response interrupt after every response
        platform.write16(regs::RINTCNT, 1)?;
        let ctl = RingControl::from(platform.read8(regs::RIRBCTL)?).with_dma_run(true);
        platform.write8(regs::RIRBCTL, ctl.into())?;

        Ok(Self {
            corb,
            rirb,
            corb_entries: corb_entries.count(),
            rirb_entries: rirb_entries.count(),
            write_cursor: 0,
            read_cursor: 0,
            ring_reset,
            ring_drain: poll.limit(WaitSite::CorbDrain)
        })
    }

    /// The (write, read) cursors
    pub fn cursors(&self) -> (u16, u16) {
        (self.write_cursor, self.read_cursor)
    }

    pub fn entries(&self) -> (u16, u16) {
        (self.corb_entries, self.rirb_entries)
    }
}

impl CommandTransport for RingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::RingBuffer
    }

    fn exchange<P: Platform + ?Sized>(&mut self, platform: &mut P, verb: u32) -> Result<u32> {
        self.write_cursor = (self.write_cursor + 1) % self.corb_entries;
        let slot = self.write_cursor;
        self.corb.write_u32(slot as usize * CORB_ENTRY_LEN, verb);
        platform.write16(regs::CORBWP, slot)?;

        poll_until(platform, WaitSite::CorbDrain, self.ring_drain, |p| {
            Ok(CorbReadPointer::from(p.read16(regs::CORBRP)?).read_pointer() as u16 == slot)
        })?;
        let read_cursor = self.read_cursor;
        poll_until(platform, WaitSite::RirbResponse, self.ring_drain, |p| {
            Ok(RirbWritePointer::from(p.read16(regs::RIRBWP)?).write_pointer() as u16 != read_cursor)
        })?;

        self.read_cursor = (self.read_cursor + 1) % self.rirb_entries;
        let response = self.rirb.read_u32(self.read_cursor as usize * RIRB_ENTRY_LEN);
        platform.write8(regs::RIRBSTS, RIRBSTS_CLEAR)?;
        trace!("{:#010x} -> {:#010x}", verb, response);
        Ok(response)
    }

    fn teardown<P: Platform + ?Sized>(self, platform: &mut P) -> Result<()> {
        stop_ring(platform, regs::CORBCTL, self.ring_reset)?;
        stop_ring(platform, regs::RIRBCTL, self.ring_reset)?;
        reset_pointers(platform, self.ring_reset)?;
        platform.free_dma(self.corb)?;
        platform.free_dma(self.rirb)
    }
}

/// Clears a ring's DMA run bit and waits for the engine to stop
fn stop_ring<P: Platform + ?Sized>(platform: &mut P, ctl_reg: u32, limit: WaitLimit) -> Result<()> {
    let ctl = RingControl::from(platform.read8(ctl_reg)?).with_dma_run(false);
    platform.write8(ctl_reg, ctl.into())?;
    poll_until(platform, WaitSite::RingReset, limit, |p| {
        Ok(!RingControl::from(p.read8(ctl_reg)?).dma_run())
    })
}

/// Zeroes CORBWP, puts CORBRP through reset and resets RIRBWP.
/// Both rings must be stopped
fn reset_pointers<P: Platform + ?Sized>(platform: &mut P, limit: WaitLimit) -> Result<()> {
    platform.write16(regs::CORBWP, 0)?;
    platform.write16(regs::CORBRP, CorbReadPointer::default().with_reset(true).into())?;
    poll_until(platform, WaitSite::RingReset, limit, |p| {
        Ok(CorbReadPointer::from(p.read16(regs::CORBRP)?).reset())
    })?;
    platform.write16(regs::CORBRP, CorbReadPointer::default().with_reset(false).into())?;
    poll_until(platform, WaitSite::RingReset, limit, |p| {
        Ok(!CorbReadPointer::from(p.read16(regs::CORBRP)?).reset())
    })?;
    platform.write16(regs::RIRBWP, RirbWritePointer::reset().into())
}

/// Selects the largest size the ring supports
fn set_ring_size<P: Platform + ?Sized>(platform: &mut P, size_reg: u32) -> Result<RingEntries> {
    let size = RingSize::from(platform.read8(size_reg)?);
    let entries = size.largest_supported();
    platform.write8(size_reg, size.with_entries(entries).into())?;
    Ok(entries)
}
