//! A simulated HDA controller and the PCI bus it sits on
//!
//! The register file is a flat byte array with the side effects of the
//! registers the bring-up sequence touches layered on top. Device
//! addresses are host addresses, so the CORB/RIRB engines work directly
//! on the memory handed out by `allocate_dma`.

use std::alloc::{self, Layout};
use std::collections::{BTreeMap, BTreeSet};
use std::ptr::{self, NonNull};
use num::Integer;
use crate::error::{Error, Result};
use crate::pci::{PciBus, PciIdentity};
use crate::platform::{Clock, Dma, DmaRegion, RegisterIo, Width};
use crate::regs;
use crate::verb::{Command, VerbWidth};

const REGISTER_SPACE: usize = 0x1000;
const DMA_ALIGN: usize = 4096;

/// A codec answering GetParameter from a table. Parameters not in the
/// table read as 0, every other verb is answered with 0
#[derive(Debug, Clone, Default)]
pub struct SimCodec {
    params: BTreeMap<(u8, u8), u32>,
    /// Nodes that never answer
    silent_nodes: BTreeSet<u8>,
    /// The whole codec never answers
    silent: bool
}

impl SimCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_param(mut self, node: u8, param: u8, val: u32) -> Self {
        self.params.insert((node, param), val);
        self
    }

    pub fn set_param(&mut self, node: u8, param: u8, val: u32) {
        self.params.insert((node, param), val);
    }

    pub fn with_silent_node(mut self, node: u8) -> Self {
        self.silent_nodes.insert(node);
        self
    }

    pub fn silent() -> Self {
        Self { silent: true, ..Self::default() }
    }

    fn answer(&self, command: &Command) -> Option<u32> {
        if self.silent || self.silent_nodes.contains(&command.node) {
            return None;
        }
        if command.verb.width() == VerbWidth::Short && command.verb.id() == 0xf00 {
            let param = command.payload as u8;
            Some(self.params.get(&(command.node, param)).copied().unwrap_or(0))
        } else {
            Some(0)
        }
    }
}

/// Short verb ids start with 0x7 or 0xf, long ones are a single nibble
/// that is never either of those
pub fn verb_width(word: u32) -> VerbWidth {
    match word.get_bits(16..20) {
        0x7 | 0xf => VerbWidth::Short,
        _ => VerbWidth::Long
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaEvent {
    Alloc { addr: u64, len: usize },
    Free { addr: u64, len: usize },
    /// The stream engine at `descriptor` stopped fetching
    StreamStopped { descriptor: u8 }
}

/// The stream descriptor whose SDnCTL sits at `offset`
fn stream_ctl(offset: u32) -> Option<u8> {
    let rel = offset.checked_sub(regs::STREAM_DESCRIPTORS)?;
    if rel % regs::STREAM_DESCRIPTOR_LEN == 0 {
        Some((rel / regs::STREAM_DESCRIPTOR_LEN) as u8)
    } else {
        None
    }
}

pub struct SimController {
    regs: Vec<u8>,
    codecs: BTreeMap<u8, SimCodec>,
    immediate: bool,
    /// Reads of GCTL before CRST reads back as set, None if it never does
    reset_latency: Option<u32>,
    pending_reset: Option<u32>,
    /// Reads of SDnCTL that still see RUN after it was cleared,
    /// None if the engine never stops
    stop_latency: Option<u32>,
    /// SDnCTL offset of the stopping engine and the reads left
    pending_stop: Option<(u32, Option<u32>)>,
    /// The CORB DMA engine does not fetch commands
    stalled_rings: bool,
    corb_rp: u16,
    corb_rp_reset: bool,
    rirb_wp: u16,
    /// Timer checks before an armed timer expires
    timer_checks: u32,
    timer: Option<u32>,
    /// Fail allocations once this many have succeeded
    alloc_limit: Option<usize>,
    allocations: BTreeMap<u64, Layout>,
    pub sent: Vec<u32>,
    pub writes: Vec<(Width, u32, u32)>,
    pub icii_reads: usize,
    pub stalls: Vec<usize>,
    pub armed: Vec<u64>,
    pub cancels: usize,
    pub dma_log: Vec<DmaEvent>
}

impl SimController {
    /// A controller with the given GCAP and no codecs
    pub fn new(gcap: u16) -> Self {
        let mut sim = Self {
            regs: vec![0; REGISTER_SPACE],
            codecs: BTreeMap::new(),
            immediate: true,
            reset_latency: Some(2),
            pending_reset: None,
            stop_latency: Some(0),
            pending_stop: None,
            stalled_rings: false,
            corb_rp: 0,
            corb_rp_reset: false,
            rirb_wp: 0,
            timer_checks: 3,
            timer: None,
            alloc_limit: None,
            allocations: BTreeMap::new(),
            sent: Vec::new(),
            writes: Vec::new(),
            icii_reads: 0,
            stalls: Vec::new(),
            armed: Vec::new(),
            cancels: 0,
            dma_log: Vec::new()
        };
        sim.store(Width::Word, regs::GCAP, gcap as u32);
        // 256 entry rings
        sim.store(Width::Byte, regs::CORBSIZE, 0x40);
        sim.store(Width::Byte, regs::RIRBSIZE, 0x40);
        sim
    }

    /// Adds a codec and marks its address in STATESTS
    pub fn with_codec(mut self, addr: u8, codec: SimCodec) -> Self {
        self.codecs.insert(addr, codec);
        let statests = self.load(Width::Word, regs::STATESTS).with_bit(addr as usize, true);
        self.store(Width::Word, regs::STATESTS, statests);
        self
    }

    /// Marks an address in STATESTS without a codec behind it answering
    pub fn with_state_change(mut self, addr: u8) -> Self {
        let statests = self.load(Width::Word, regs::STATESTS).with_bit(addr as usize, true);
        self.store(Width::Word, regs::STATESTS, statests);
        self
    }

    pub fn without_immediate(mut self) -> Self {
        self.immediate = false;
        self
    }

    pub fn with_reset_latency(mut self, latency: Option<u32>) -> Self {
        self.reset_latency = latency;
        self
    }

    pub fn with_stream_stop_latency(mut self, latency: Option<u32>) -> Self {
        self.stop_latency = latency;
        self
    }

    pub fn with_ring_sizes(mut self, corb_cap: u8, rirb_cap: u8) -> Self {
        self.store(Width::Byte, regs::CORBSIZE, (corb_cap as u32) << 4);
        self.store(Width::Byte, regs::RIRBSIZE, (rirb_cap as u32) << 4);
        self
    }

    pub fn with_stalled_rings(mut self) -> Self {
        self.stalled_rings = true;
        self
    }

    pub fn with_alloc_limit(mut self, limit: usize) -> Self {
        self.alloc_limit = Some(limit);
        self
    }

    pub fn codec_mut(&mut self, addr: u8) -> Option<&mut SimCodec> {
        self.codecs.get_mut(&addr)
    }

    pub fn reg(&self, width: Width, offset: u32) -> u32 {
        self.load(width, offset)
    }

    pub fn live_allocations(&self) -> usize {
        self.allocations.len()
    }

    pub fn sent_commands(&self) -> Vec<Command> {
        self.sent.iter().map(|w| Command::decode(*w, verb_width(*w))).collect()
    }

    /// Commands sent with the given verb id to `node`
    pub fn sent_to(&self, codec: u8, node: u8, verb_id: u16) -> Vec<Command> {
        self.sent_commands()
            .into_iter()
            .filter(|c| c.codec == codec && c.node == node && c.verb.id() == verb_id)
            .collect()
    }

    /// Registers written at `offset`, in order
    pub fn writes_to(&self, offset: u32) -> Vec<u32> {
        self.writes.iter().filter(|(_, o, _)| *o == offset).map(|(_, _, v)| *v).collect()
    }

    fn load(&self, width: Width, offset: u32) -> u32 {
        let start = offset as usize;
        (0..width.bytes()).fold(0u32, |acc, i| acc | (self.regs[start + i] as u32) << (8 * i))
    }

    fn store(&mut self, width: Width, offset: u32, val: u32) {
        let start = offset as usize;
        for i in 0..width.bytes() {
            self.regs[start + i] = (val >> (8 * i)) as u8;
        }
    }

    fn respond(&mut self, verb: u32) -> Option<u32> {
        self.sent.push(verb);
        let command = Command::decode(verb, verb_width(verb));
        self.codecs.get(&command.codec)?.answer(&command)
    }

    fn ring_entries(size_reg: u32) -> u16 {
        match size_reg & 0x3 {
            0 => 2,
            1 => 16,
            _ => 256
        }
    }

    fn ring_base(&self, lower: u32, upper: u32) -> u64 {
        self.load(Width::Dword, lower) as u64 | (self.load(Width::Dword, upper) as u64) << 32
    }

    /// Panics unless `len` bytes at `addr` lie in a live allocation
    fn check_dma(&self, addr: u64, len: usize) {
        let live = self.allocations.range(..=addr).next_back();
        match live {
            Some((base, layout)) if addr + len as u64 <= base + layout.size() as u64 => (),
            _ => panic!("device access to {:#x} outside of any DMA allocation", addr)
        }
    }

    /// Fetches every command between the read and write pointers and
    /// writes the responses into the RIRB
    fn run_corb(&mut self) {
        let corb_running = self.load(Width::Byte, regs::CORBCTL).is_set(1);
        if !corb_running || self.stalled_rings {
            return;
        }
        let corb_entries = Self::ring_entries(self.load(Width::Byte, regs::CORBSIZE));
        let rirb_entries = Self::ring_entries(self.load(Width::Byte, regs::RIRBSIZE));
        let corb = self.ring_base(regs::CORBLBASE, regs::CORBUBASE);
        let rirb = self.ring_base(regs::RIRBLBASE, regs::RIRBUBASE);
        let wp = self.load(Width::Word, regs::CORBWP) as u16 & 0xff;
        while self.corb_rp != wp {
            self.corb_rp = (self.corb_rp + 1) % corb_entries;
            let slot = corb + self.corb_rp as u64 * 4;
            self.check_dma(slot, 4);
            let verb = unsafe { ptr::read_volatile(slot as *const u32) };
            if let Some(response) = self.respond(verb) {
                self.rirb_wp = (self.rirb_wp + 1) % rirb_entries;
                let slot = rirb + self.rirb_wp as u64 * 8;
                self.check_dma(slot, 8);
                let codec = verb.get_bits(28..32) as u64;
                unsafe { ptr::write_volatile(slot as *mut u64, response as u64 | codec << 32) };
                let sts = self.load(Width::Byte, regs::RIRBSTS) | 1;
                self.store(Width::Byte, regs::RIRBSTS, sts);
            }
        }
    }

    fn stop_stream(&mut self, offset: u32) {
        let ctl = self.load(Width::Word, offset).with_bit(1, false);
        self.store(Width::Word, offset, ctl);
        self.pending_stop = None;
        if let Some(descriptor) = stream_ctl(offset) {
            self.dma_log.push(DmaEvent::StreamStopped { descriptor });
        }
    }

    fn run_immediate(&mut self) {
        let verb = self.load(Width::Dword, regs::ICOI);
        let icis = self.load(Width::Word, regs::ICIS);
        match self.respond(verb) {
            Some(response) => {
                self.store(Width::Dword, regs::ICII, response);
                self.store(Width::Word, regs::ICIS, icis.with_bit(1, true).with_bit(0, false));
            }
            None => self.store(Width::Word, regs::ICIS, icis.with_bit(0, true))
        }
    }
}

impl RegisterIo for SimController {
    fn read(&mut self, width: Width, offset: u32) -> Result<u32> {
        let val = match offset {
            regs::GCTL => {
                if let Some(left) = self.pending_reset {
                    if left == 0 {
                        let gctl = self.load(Width::Dword, regs::GCTL).with_bit(0, true);
                        self.store(Width::Dword, regs::GCTL, gctl);
                        self.pending_reset = None;
                    } else {
                        self.pending_reset = Some(left - 1);
                    }
                }
                self.load(width, offset)
            }
            regs::CORBRP => {
                if self.corb_rp_reset { 0x8000 } else { self.corb_rp as u32 }
            }
            regs::RIRBWP => self.rirb_wp as u32,
            regs::ICIS | regs::ICOI | regs::ICII if !self.immediate => 0xffff_ffff,
            regs::ICII => {
                self.icii_reads += 1;
                self.load(width, offset)
            }
            _ if matches!(self.pending_stop, Some((at, _)) if at == offset) => {
                let pending = self.pending_stop;
                match pending {
                    Some((at, Some(0))) => self.stop_stream(at),
                    Some((at, Some(left))) => self.pending_stop = Some((at, Some(left - 1))),
                    _ => ()
                }
                self.load(width, offset)
            }
            _ => self.load(width, offset)
        };
        Ok(width.truncate(val))
    }

    fn write(&mut self, width: Width, offset: u32, val: u32) -> Result<()> {
        let val = width.truncate(val);
        self.writes.push((width, offset, val));
        match offset {
            regs::GCTL => {
                if val.is_set(0) {
                    self.pending_reset = self.reset_latency;
                    self.store(width, offset, val.with_bit(0, false));
                } else {
                    self.pending_reset = None;
                    self.store(width, offset, val);
                }
            }
            regs::STATESTS | regs::RIRBSTS => {
                let cur = self.load(width, offset);
                self.store(width, offset, cur & !val);
            }
            regs::CORBRP => {
                self.corb_rp_reset = val.is_set(15);
                if self.corb_rp_reset {
                    self.corb_rp = 0;
                }
            }
            regs::CORBWP => {
                self.store(width, offset, val);
                self.run_corb();
            }
            regs::RIRBWP => {
                if val.is_set(15) {
                    self.rirb_wp = 0;
                }
            }
            regs::CORBSIZE | regs::RIRBSIZE => {
                let cap = self.load(Width::Byte, offset) & 0xf0;
                self.store(Width::Byte, offset, cap | (val & 0x3));
            }
            regs::ICIS | regs::ICOI | regs::ICII if !self.immediate => (),
            regs::ICIS => {
                if val.is_set(1) {
                    let icis = self.load(Width::Word, regs::ICIS).with_bit(1, false);
                    self.store(Width::Word, regs::ICIS, icis);
                }
                if val.is_set(0) {
                    self.run_immediate();
                }
            }
            _ if width == Width::Word && stream_ctl(offset).is_some() => {
                let running = self.load(Width::Word, offset).is_set(1);
                if running && !val.is_set(1) {
                    // RUN stays set until the engine has wound down
                    self.store(width, offset, val.with_bit(1, true));
                    self.pending_stop = Some((offset, self.stop_latency));
                    if self.stop_latency == Some(0) {
                        self.stop_stream(offset);
                    }
                } else {
                    self.store(width, offset, val);
                }
            }
            _ => self.store(width, offset, val)
        }
        Ok(())
    }
}

impl Dma for SimController {
    fn allocate_dma(&mut self, len: usize) -> Result<DmaRegion> {
        if let Some(limit) = self.alloc_limit {
            if self.dma_log.iter().filter(|e| matches!(e, DmaEvent::Alloc { .. })).count() >= limit {
                return Err(Error::OutOfResources);
            }
        }
        let layout = Layout::from_size_align(len.max(1), DMA_ALIGN).map_err(|_| Error::OutOfResources)?;
        let host = NonNull::new(unsafe { alloc::alloc(layout) }).ok_or(Error::OutOfResources)?;
        // Firmware hands out dirty memory
        unsafe { ptr::write_bytes(host.as_ptr(), 0xa5, layout.size()) };
        let addr = host.as_ptr() as u64;
        self.allocations.insert(addr, layout);
        self.dma_log.push(DmaEvent::Alloc { addr, len });
        Ok(unsafe { DmaRegion::new(host, addr, len, addr as usize) })
    }

    fn free_dma(&mut self, region: DmaRegion) -> Result<()> {
        let addr = region.device_addr();
        let layout = self
            .allocations
            .remove(&addr)
            .unwrap_or_else(|| panic!("freeing {:#x}, which was never allocated", addr));
        unsafe { alloc::dealloc(region.host_ptr(), layout) };
        self.dma_log.push(DmaEvent::Free { addr, len: region.len() });
        Ok(())
    }
}

impl Clock for SimController {
    fn stall(&mut self, microseconds: usize) -> Result<()> {
        self.stalls.push(microseconds);
        Ok(())
    }

    fn arm_timer(&mut self, hundreds_of_ns: u64) -> Result<()> {
        self.armed.push(hundreds_of_ns);
        self.timer = Some(self.timer_checks);
        Ok(())
    }

    fn timer_expired(&mut self) -> Result<bool> {
        match self.timer {
            Some(0) => Ok(true),
            Some(left) => {
                self.timer = Some(left - 1);
                Ok(left == 1)
            }
            None => Ok(false)
        }
    }

    fn cancel_timer(&mut self) -> Result<()> {
        self.timer = None;
        self.cancels += 1;
        Ok(())
    }
}

impl Drop for SimController {
    fn drop(&mut self) {
        for (addr, layout) in core::mem::take(&mut self.allocations) {
            unsafe { alloc::dealloc(addr as *mut u8, layout) };
        }
    }
}

/// A PCI bus of simulated functions
pub struct SimBus {
    functions: Vec<(PciIdentity, Option<SimController>)>,
    pub bound: Vec<usize>,
    pub released: Option<SimController>
}

impl SimBus {
    pub fn new() -> Self {
        Self { functions: Vec::new(), bound: Vec::new(), released: None }
    }

    /// A function that is not an audio controller
    pub fn with_other(mut self, vendor_id: u16, device_id: u16, class: u8, subclass: u8) -> Self {
        self.functions.push((PciIdentity { vendor_id, device_id, class, subclass }, None));
        self
    }

    pub fn with_controller(mut self, identity: PciIdentity, sim: SimController) -> Self {
        self.functions.push((identity, Some(sim)));
        self
    }
}

impl PciBus for SimBus {
    type Candidate = usize;
    type Function = SimController;

    fn candidates(&mut self) -> Result<Vec<usize>> {
        Ok((0..self.functions.len()).collect())
    }

    fn identify(&mut self, candidate: usize) -> Result<PciIdentity> {
        Ok(self.functions[candidate].0)
    }

    fn bind_exclusive(&mut self, candidate: usize) -> Result<SimController> {
        self.bound.push(candidate);
        self.functions[candidate].1.take().ok_or(Error::DeviceIo { op: "OpenProtocol", status: 0x8000_0000_0000_000f })
    }

    fn release(&mut self, function: SimController) -> Result<()> {
        self.released = Some(function);
        Ok(())
    }
}

/// The identity of an ICH6 controller
pub fn ich6() -> PciIdentity {
    PciIdentity { vendor_id: 0x8086, device_id: 0x2668, class: 0x04, subclass: 0x03 }
}
