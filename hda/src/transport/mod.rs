//! Getting verbs to the codecs and their responses back
//!
//! Two transports exist. The immediate command interface sends one verb
//! through a pair of registers; the CORB/RIRB rings queue verbs and
//! responses in memory the controller reaches by DMA. Either way there is
//! only ever one command outstanding, so the n-th response belongs to the
//! n-th command.

mod immediate;
mod ring;

pub use immediate::ImmediateTransport;
pub use ring::RingTransport;

use log::{debug, info};
use crate::config::{Config, TransportPreference};
use crate::error::Result;
use crate::platform::Platform;
use crate::regs::{self, ImmediateStatus, Mmio};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Immediate,
    RingBuffer
}

/// A way of exchanging one verb for one response
pub trait CommandTransport {
    fn kind(&self) -> TransportKind;

    /// Sends `verb` and waits for its response
    ///
    /// A codec that never answers yields `verb::TIMED_OUT` where the
    /// transport can tell
    fn exchange<P: Platform + ?Sized>(&mut self, platform: &mut P, verb: u32) -> Result<u32>;

    /// Stops the transport and gives back whatever it allocated
    fn teardown<P: Platform + ?Sized>(self, platform: &mut P) -> Result<()>
    where
        Self: Sized;
}

/// The transport chosen for a controller
#[derive(Debug)]
pub enum Transport {
    Immediate(ImmediateTransport),
    Ring(RingTransport)
}

impl Transport {
    /// Sets up the transport `config` asks for. With
    /// `TransportPreference::Auto` the immediate interface is used when
    /// ICIS is implemented
    pub fn establish<P: Platform + ?Sized>(platform: &mut P, config: &Config) -> Result<Self> {
        let kind = match config.transport {
            TransportPreference::Immediate => TransportKind::Immediate,
            TransportPreference::RingBuffer => TransportKind::RingBuffer,
            TransportPreference::Auto => {
                let icis = platform.read16(regs::ICIS)?;
                debug!("ICIS reads {:#x}", icis);
                if icis == ImmediateStatus::ABSENT {
                    TransportKind::RingBuffer
                } else {
                    TransportKind::Immediate
                }
            }
        };
        info!("using the {:?} command transport", kind);
        Ok(match kind {
            TransportKind::Immediate => Transport::Immediate(ImmediateTransport::new(config.immediate_timeout)),
            TransportKind::RingBuffer => Transport::Ring(RingTransport::setup(platform, &config.poll)?)
        })
    }
}

impl CommandTransport for Transport {
    fn kind(&self) -> TransportKind {
        match self {
            Transport::Immediate(t) => t.kind(),
            Transport::Ring(t) => t.kind()
        }
    }

    fn exchange<P: Platform + ?Sized>(&mut self, platform: &mut P, verb: u32) -> Result<u32> {
        match self {
            Transport::Immediate(t) => t.exchange(platform, verb),
            Transport::Ring(t) => t.exchange(platform, verb)
        }
    }

    fn teardown<P: Platform + ?Sized>(self, platform: &mut P) -> Result<()> {
        match self {
            Transport::Immediate(t) => t.teardown(platform),
            Transport::Ring(t) => t.teardown(platform)
        }
    }
}
