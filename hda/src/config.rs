//! Tunables for the bring-up sequence
//!
//! The defaults reproduce the behavior the sequence has always had:
//! only the immediate transport's response wait is bounded, every other
//! hardware poll spins until the device answers.

use crate::error::WaitSite;
use crate::regs::StreamFormat;

/// How long a hardware poll loop may spin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitLimit {
    /// Spin until the hardware answers
    Unbounded,
    /// Give up with `Error::WaitTimedOut` after this many checks
    Iterations(u32)
}

/// A `WaitLimit` per poll site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub reset: WaitLimit,
    pub ring_reset: WaitLimit,
    pub ring_drain: WaitLimit,
    pub stream_reset: WaitLimit
}

impl PollPolicy {
    pub const UNBOUNDED: PollPolicy = PollPolicy::uniform(WaitLimit::Unbounded);

    /// The same limit at every site
    pub const fn uniform(limit: WaitLimit) -> Self {
        Self {
            reset: limit,
            ring_reset: limit,
            ring_drain: limit,
            stream_reset: limit
        }
    }

    pub fn limit(&self, site: WaitSite) -> WaitLimit {
        match site {
            WaitSite::ControllerReset => self.reset,
            WaitSite::RingReset => self.ring_reset,
            WaitSite::CorbDrain | WaitSite::RirbResponse => self.ring_drain,
            WaitSite::StreamReset => self.stream_reset
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

/// Which command transport to establish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportPreference {
    /// The immediate command interface when ICIS is implemented,
    /// the CORB/RIRB rings otherwise
    Auto,
    Immediate,
    RingBuffer
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub transport: TransportPreference,
    /// Timer units of 100ns armed for each immediate command
    pub immediate_timeout: u64,
    /// Stall between leaving reset and sampling STATESTS
    pub codec_ready_stall_us: usize,
    pub poll: PollPolicy,
    /// Most nodes the topology walk visits under one codec
    pub max_walk_visits: usize,
    /// Index, among the output streams, of the one to program
    pub output_stream: usize,
    /// Stream number the output stream's packets are tagged with (1..=15)
    pub stream_tag: u8,
    pub format: StreamFormat,
    /// How many BDL entries the waveform is split into
    pub bdl_entries: usize,
    /// Set the stream's SSYNC bit while its run bit is set
    pub sync_streams: bool,
    /// Stall after starting the stream, before tearing it down
    pub playback_linger_us: usize
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportPreference::Auto,
            immediate_timeout: 10_000,
            codec_ready_stall_us: 600,
            poll: PollPolicy::UNBOUNDED,
            max_walk_visits: 256,
            output_stream: 0,
            stream_tag: 1,
            format: StreamFormat::default(),
            bdl_entries: 2,
            sync_streams: true,
            playback_linger_us: 0
        }
    }
}
