//! Bring-up of an Intel High Definition Audio controller from a pre-boot
//! environment
//!
//! The sequence finds the controller on the PCI bus, takes it out of reset,
//! finds the codecs on its link, establishes a command transport, walks the
//! codecs' node trees and plays a waveform through one output stream. All
//! waiting is done by polling; nothing relies on interrupts.
//!
//! The firmware is reached only through the traits in [`platform`] and
//! [`pci::PciBus`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod pci;
pub mod platform;
pub mod regs;
pub mod stream;
pub mod transport;
pub mod verb;

#[cfg(test)]
mod tests;

use alloc::vec::Vec;
use log::{info, warn};

pub use codec::{Codec, Node, NodeAddr, Topology};
pub use config::{Config, PollPolicy, TransportPreference, WaitLimit};
pub use controller::Controller;
pub use error::{Error, Result, WaitSite};
pub use pci::{PciBus, PciIdentity};
pub use platform::{Clock, Dma, DmaRegion, Platform, RegisterIo, Width};
pub use stream::StreamSet;
pub use transport::TransportKind;

/// What a completed run found and did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub identity: PciIdentity,
    /// STATESTS bitmap of the codecs that reported in
    pub codecs: u16,
    pub transport: TransportKind,
    /// Nodes found below the codec roots
    pub nodes: usize,
    /// Audio output converters the stream format was sent to
    pub outputs: Vec<NodeAddr>,
    /// Descriptor index of the output stream that was started
    pub stream_descriptor: u8
}

/// Runs the whole bring-up sequence once, playing `waveform`
///
/// The steps always run in this order: discover, bind, reset, wait for the
/// codecs, scan them, suppress wake events and interrupts, establish the
/// transport, allocate the streams, walk the topology, program the output
/// stream, start it, free the streams, tear the transport down and release
/// the controller. The first error aborts the sequence. Once the controller
/// is bound, an abort still stops the stream, tears the transport down and
/// releases the controller as far as the hardware lets it.
pub fn run<B: PciBus + ?Sized>(bus: &mut B, config: Config, waveform: &[u8]) -> Result<Summary> {
    let (candidate, identity) = pci::discover(bus)?;
    let function = bus.bind_exclusive(candidate)?;
    let mut controller = Controller::new(function, config);

    let mut streams = None;
    let result = play(&mut controller, &mut streams, identity, waveform).and_then(|summary| {
        if let Some(streams) = streams.take() {
            streams.free(&mut controller)?;
        }
        controller.teardown_transport()?;
        Ok(summary)
    });
    match result {
        Ok(summary) => {
            bus.release(controller.into_platform())?;
            info!("bring-up complete");
            Ok(summary)
        }
        Err(e) => {
            warn!("bring-up failed: {}", e);
            abandon(bus, controller, streams);
            Err(e)
        }
    }
}

/// Everything between binding the controller and freeing the streams.
/// `streams` holds the stream set once it has been allocated
fn play<P: Platform>(
    controller: &mut Controller<P>,
    streams: &mut Option<StreamSet>,
    identity: PciIdentity,
    waveform: &[u8]
) -> Result<Summary> {
    let config = *controller.config();
    controller.reset()?;
    controller.wait_for_codecs()?;
    let codecs = controller.scan_codecs()?;
    controller.suppress_wake_and_interrupts()?;
    let transport = controller.establish_transport()?;

    let streams = streams.insert(StreamSet::allocate(controller)?);
    let topology = Topology::walk(controller)?;
    info!("{} codecs, {} nodes", topology.codecs().len(), topology.node_count());
    let outputs = streams.program_output(controller, &topology, waveform)?;
    streams.start(controller)?;
    let stream_descriptor = streams.programmed().map(|e| e.descriptor).unwrap_or_default();
    if config.playback_linger_us > 0 {
        controller.platform_mut().stall(config.playback_linger_us)?;
    }

    Ok(Summary {
        identity,
        codecs,
        transport,
        nodes: topology.node_count(),
        outputs,
        stream_descriptor
    })
}

/// Undoes whatever an aborted run left behind. Failures here are logged
/// and dropped so that the error that aborted the run is the one reported
fn abandon<B: PciBus + ?Sized>(bus: &mut B, mut controller: Controller<B::Function>, streams: Option<StreamSet>) {
    if let Some(streams) = streams {
        if let Err(e) = streams.free(&mut controller) {
            warn!("could not free the streams: {}", e);
        }
    }
    if let Err(e) = controller.teardown_transport() {
        warn!("could not tear the transport down: {}", e);
    }
    if let Err(e) = bus.release(controller.into_platform()) {
        warn!("could not release the controller: {}", e);
    }
}
