//! Stream engines, their buffer descriptor lists and the DMA position buffer
//!
//! # References
//!
//! * HDA spec, revision 1.0a, sections 3.3.35 to 3.6.3 and 4.5

use alloc::vec::Vec;
use log::{debug, info};
use crate::codec::{NodeAddr, Topology};
use crate::config::WaitLimit;
use crate::controller::Controller;
use crate::error::{Error, Result, WaitSite};
use crate::platform::{DmaRegion, Platform};
use crate::regs::{self, poll_until, sd, stream_descriptor, Mmio, StreamControl};
use crate::verb::{self, Command, Verb};

/// Bytes of one BDL entry
pub const BDL_ENTRY_LEN: usize = 16;
/// Most entries one BDL holds
pub const MAX_BDL_ENTRIES: usize = 256;
/// Bytes allocated for each stream's BDL
pub const BDL_LEN: usize = MAX_BDL_ENTRIES * BDL_ENTRY_LEN;
/// Bytes of one stream's slot in the DMA position buffer: the position
/// and 4 reserved bytes
const POSITION_ENTRY_LEN: usize = 8;
/// Buffers a BDL entry points at must start on this boundary
const BDL_BUFFER_ALIGN: usize = 128;
/// DPLBASE bit that makes the controller write stream positions
const DMA_POSITION_ENABLE: u64 = 0x1;

/// A description of one piece of the cyclic stream buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BdlEntry {
    /// Device address of the piece, 128 byte aligned
    pub address: u64,
    /// Length of the piece in bytes
    pub length: u32,
    /// Whether the controller raises an interrupt once the last byte of
    /// the piece has been fetched
    pub interrupt_on_completion: bool
}

impl BdlEntry {
    fn write_to(&self, bdl: &mut DmaRegion, index: usize) {
        let offset = index * BDL_ENTRY_LEN;
        bdl.write_u64(offset, self.address);
        bdl.write_u32(offset + 8, self.length);
        bdl.write_u32(offset + 12, self.interrupt_on_completion as u32);
    }
}

/// The shortest waveform `parts` BDL entries can describe, each entry
/// needing an aligned piece of its own
pub fn min_waveform_len(parts: usize) -> usize {
    parts * BDL_BUFFER_ALIGN
}

fn check_shape(len: usize, parts: usize) -> Result<()> {
    if parts == 0 || parts > MAX_BDL_ENTRIES || len > u32::MAX as usize {
        return Err(Error::BadWaveform { len });
    }
    let min = min_waveform_len(parts);
    if len < min {
        return Err(Error::WaveformTooShort { len, min });
    }
    Ok(())
}

/// Splits `len` bytes at `device_addr` into `parts` BDL entries of
/// roughly equal size, every one starting on a 128 byte boundary
/// relative to `device_addr`
///
/// The entry lengths add up to `len`.
pub fn split_buffer(device_addr: u64, len: usize, parts: usize) -> Result<Vec<BdlEntry>> {
    check_shape(len, parts)?;
    let boundary = |i: usize| -> usize {
        if i == parts {
            len
        } else {
            // Computed in u64 so that len * i does not overflow
            let at = (len as u64 * i as u64 / parts as u64) as usize;
            at - at % BDL_BUFFER_ALIGN
        }
    };
    // At least min_waveform_len bytes means consecutive boundaries are
    // at least one alignment step apart
    let mut entries = Vec::with_capacity(parts);
    for i in 0..parts {
        let (start, end) = (boundary(i), boundary(i + 1));
        entries.push(BdlEntry {
            address: device_addr + start as u64,
            length: (end - start) as u32,
            interrupt_on_completion: false
        });
    }
    Ok(entries)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamClass {
    Input,
    Output,
    Bidirectional
}

/// One stream DMA engine and the BDL allocated for it
#[derive(Debug)]
pub struct StreamEngine {
    pub class: StreamClass,
    /// Index among the engines of the same class
    pub index: u8,
    /// Index among all engines, which selects the descriptor registers
    pub descriptor: u8,
    bdl: DmaRegion
}

impl StreamEngine {
    /// Offset of this engine's descriptor registers
    pub fn regs(&self) -> u32 {
        stream_descriptor(self.descriptor)
    }

    pub fn bdl(&self) -> &DmaRegion {
        &self.bdl
    }
}

/// Every stream engine of the controller with its buffers
///
/// Must be handed back with `free` before the controller goes away.
#[derive(Debug)]
pub struct StreamSet {
    input: Vec<StreamEngine>,
    output: Vec<StreamEngine>,
    bidirectional: Vec<StreamEngine>,
    positions: DmaRegion,
    sample_buffer: Option<DmaRegion>,
    /// Index into `output` of the engine `program_output` set up
    programmed: Option<usize>
}

impl StreamSet {
    /// Allocates a BDL for every engine GCAP reports and a DMA position
    /// buffer covering all of them, and turns position reporting on
    pub fn allocate<P: Platform>(controller: &mut Controller<P>) -> Result<Self> {
        let caps = controller.capabilities()?;
        info!(
            "{} input, {} output and {} bidirectional streams",
            caps.input_streams(), caps.output_streams(), caps.bidirectional_streams()
        );
        let platform = controller.platform_mut();
        let mut descriptor = 0u8;
        let mut engines = |class: StreamClass, count: u8| -> Result<Vec<StreamEngine>> {
            let mut engines = Vec::with_capacity(count as usize);
            for index in 0..count {
                let mut bdl = platform.allocate_dma(BDL_LEN)?;
                bdl.zero();
                engines.push(StreamEngine { class, index, descriptor, bdl });
                descriptor += 1;
            }
            Ok(engines)
        };
        let input = engines(StreamClass::Input, caps.input_streams())?;
        let output = engines(StreamClass::Output, caps.output_streams())?;
        let bidirectional = engines(StreamClass::Bidirectional, caps.bidirectional_streams())?;

        let mut positions = platform.allocate_dma(caps.total_streams().max(1) * POSITION_ENTRY_LEN)?;
        positions.zero();
        platform.write_addr(regs::DPLBASE, regs::DPUBASE, positions.device_addr() | DMA_POSITION_ENABLE)?;
        debug!("DMA position buffer at {:#x}", positions.device_addr());

        Ok(Self { input, output, bidirectional, positions, sample_buffer: None, programmed: None })
    }

    pub fn input(&self) -> &[StreamEngine] {
        &self.input
    }

    pub fn output(&self) -> &[StreamEngine] {
        &self.output
    }

    pub fn bidirectional(&self) -> &[StreamEngine] {
        &self.bidirectional
    }

    pub fn positions(&self) -> &DmaRegion {
        &self.positions
    }

    pub fn sample_buffer(&self) -> Option<&DmaRegion> {
        self.sample_buffer.as_ref()
    }

    /// The output engine `program_output` set up
    pub fn programmed(&self) -> Option<&StreamEngine> {
        self.programmed.map(|i| &self.output[i])
    }

    /// Bytes the controller reports having fetched for `engine`
    pub fn position(&self, engine: &StreamEngine) -> u32 {
        self.positions.read_u32(engine.descriptor as usize * POSITION_ENTRY_LEN)
    }

    /// Sets up the configured output engine to play `waveform` and points
    /// every audio output converter in `topology` at it
    ///
    /// Returns the converters that were programmed.
    pub fn program_output<P: Platform>(
        &mut self,
        controller: &mut Controller<P>,
        topology: &Topology,
        waveform: &[u8]
    ) -> Result<Vec<NodeAddr>> {
        let config = *controller.config();
        let idx = config.output_stream;
        let available = self.output.len();
        let engine = self.output.get_mut(idx).ok_or(Error::NoOutputStream { requested: idx, available })?;
        let base = engine.regs();
        let platform = controller.platform_mut();

        reset_stream(platform, base, config.poll.limit(WaitSite::StreamReset))?;

        if let Some(old) = self.sample_buffer.take() {
            platform.free_dma(old)?;
        }
        check_shape(waveform.len(), config.bdl_entries)?;
        let mut sample = platform.allocate_dma(waveform.len())?;
        let entries = match split_buffer(sample.device_addr(), waveform.len(), config.bdl_entries) {
            Ok(entries) => entries,
            Err(e) => {
                platform.free_dma(sample)?;
                return Err(e);
            }
        };
        sample.fill_from(0, waveform);
        for (i, entry) in entries.iter().enumerate() {
            entry.write_to(&mut engine.bdl, i);
        }
        // The cyclic buffer length is the sum of the entry lengths
        platform.write32(base + sd::CBL, waveform.len() as u32)?;
        platform.write16(base + sd::LVI, (entries.len() - 1) as u16)?;
        platform.write_addr(base + sd::BDPL, base + sd::BDPU, engine.bdl.device_addr())?;
        platform.write16(base + sd::FMT, config.format.into())?;
        debug!(
            "output stream {} (descriptor {}): {} bytes in {} BDL entries",
            idx, engine.descriptor, waveform.len(), entries.len()
        );
        self.sample_buffer = Some(sample);
        self.programmed = Some(idx);

        let outputs = topology.audio_outputs();
        for addr in outputs.iter() {
            let NodeAddr(codec, node) = *addr;
            debug!("{:?}: format {:#06x}, stream {}", addr, u16::from(config.format), config.stream_tag);
            controller.command(Command::new(codec, node, Verb::SET_STREAM_FORMAT, config.format.into()))?;
            controller.command(Command::new(
                codec,
                node,
                Verb::SET_STREAM_CHANNEL,
                verb::stream_channel(config.stream_tag, 0)
            ))?;
        }
        Ok(outputs)
    }

    /// Tags the programmed engine with the stream number and sets it running
    pub fn start<P: Platform>(&mut self, controller: &mut Controller<P>) -> Result<()> {
        let config = *controller.config();
        let engine = self.programmed().ok_or(Error::NoOutputStream {
            requested: config.output_stream,
            available: self.output.len()
        })?;
        let (base, descriptor) = (engine.regs(), engine.descriptor);
        let platform = controller.platform_mut();

        let ctl = StreamControl::from_parts(platform.read16(base + sd::CTL)?, platform.read8(base + sd::CTL_HI)?)
            .with_stream_reset(false)
            .with_stream_number(config.stream_tag)
            .with_traffic_priority(true)
            .with_run(true);
        platform.write8(base + sd::CTL_HI, ctl.high())?;

        let sync_bit = 1u32 << descriptor;
        let ssync = platform.read32(regs::SSYNC)?;
        if config.sync_streams {
            platform.write32(regs::SSYNC, ssync | sync_bit)?;
        }
        platform.write16(base + sd::CTL, ctl.low())?;
        if config.sync_streams {
            platform.write32(regs::SSYNC, ssync & !sync_bit)?;
        }
        info!("output stream {} running with stream number {}", config.output_stream, config.stream_tag);
        Ok(())
    }

    /// Stops the programmed engine, turns position reporting off and frees
    /// every buffer
    ///
    /// BDLs are freed class by class, input, output then bidirectional,
    /// each class in the reverse of its allocation order. The position
    /// buffer goes last.
    pub fn free<P: Platform>(mut self, controller: &mut Controller<P>) -> Result<()> {
        let limit = controller.config().poll.limit(WaitSite::StreamReset);
        let platform = controller.platform_mut();
        if let Some(engine) = self.programmed() {
            let base = engine.regs();
            let ctl = StreamControl::from(platform.read16(base + sd::CTL)? as u32).with_run(false);
            platform.write16(base + sd::CTL, ctl.low())?;
            // The engine keeps fetching from the BDL until RUN reads back clear
            poll_until(platform, WaitSite::StreamReset, limit, |p| {
                Ok(!StreamControl::from(p.read16(base + sd::CTL)? as u32).run())
            })?;
            debug!("output stream {} stopped", engine.index);
        }
        platform.write_addr(regs::DPLBASE, regs::DPUBASE, 0)?;

        if let Some(sample) = self.sample_buffer.take() {
            platform.free_dma(sample)?;
        }
        for engines in [self.input, self.output, self.bidirectional] {
            for engine in engines.into_iter().rev() {
                platform.free_dma(engine.bdl)?;
            }
        }
        platform.free_dma(self.positions)
    }
}

/// Puts a stream descriptor through reset: SRST set, acknowledged,
/// cleared and acknowledged again
fn reset_stream<P: Platform>(platform: &mut P, base: u32, limit: WaitLimit) -> Result<()> {
    let ctl = StreamControl::from(platform.read16(base + sd::CTL)? as u32);
    platform.write16(base + sd::CTL, ctl.with_run(false).with_stream_reset(true).low())?;
    poll_until(platform, WaitSite::StreamReset, limit, |p| {
        Ok(StreamControl::from(p.read16(base + sd::CTL)? as u32).stream_reset())
    })?;
    let ctl = StreamControl::from(platform.read16(base + sd::CTL)? as u32);
    platform.write16(base + sd::CTL, ctl.with_stream_reset(false).low())?;
    poll_until(platform, WaitSite::StreamReset, limit, |p| {
        Ok(!StreamControl::from(p.read16(base + sd::CTL)? as u32).stream_reset())
    })
}
