//! The ways the bring-up sequence can fail

use core::fmt;

/// The hardware poll loops whose termination depends on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitSite {
    /// GCTL.CRST reading back as set
    ControllerReset,
    /// CORBRP.RST being acknowledged or released, or a ring DMA engine stopping
    RingReset,
    /// CORBRP catching up with CORBWP
    CorbDrain,
    /// RIRBWP moving past the read cursor
    RirbResponse,
    /// SDnCTL.SRST being acknowledged or released, or a stream engine stopping
    StreamReset
}

/// Everything that aborts the bring-up sequence
///
/// A codec that does not answer is not an error: the transports report it
/// with the response sentinels in [`crate::verb`] and the topology walk
/// skips it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A platform I/O primitive reported a failure
    DeviceIo { op: &'static str, status: usize },
    /// Pool or DMA buffer allocation failed
    OutOfResources,
    /// No PCI function matched the allow-list or the HD audio class
    NoController,
    /// A poll loop given an iteration bound ran out of iterations
    WaitTimedOut(WaitSite),
    /// The node tree of a codec needed more visits than allowed
    TopologyOverflow { codec: u8 },
    /// A command was issued with no transport established
    NoTransport,
    /// The controller has no output stream engine with the requested index
    NoOutputStream { requested: usize, available: usize },
    /// The waveform cannot be described by the configured BDL entries
    BadWaveform { len: usize },
    /// The waveform leaves a BDL entry without an aligned piece of its own
    WaveformTooShort { len: usize, min: usize }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DeviceIo { op, status } => write!(f, "{} failed with status {:#x}", op, status),
            Error::OutOfResources => write!(f, "out of resources"),
            Error::NoController => write!(f, "no HD audio controller found"),
            Error::WaitTimedOut(site) => write!(f, "timed out waiting for {:?}", site),
            Error::TopologyOverflow { codec } => {
                write!(f, "codec {} reported more nodes than can be walked", codec)
            }
            Error::NoTransport => write!(f, "no command transport established"),
            Error::NoOutputStream { requested, available } => {
                write!(f, "output stream {} requested but only {} available", requested, available)
            }
            Error::BadWaveform { len } => write!(f, "a waveform of {} bytes cannot be streamed", len),
            Error::WaveformTooShort { len, min } => {
                write!(f, "a waveform of {} bytes is too short, the BDL needs at least {}", len, min)
            }
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
