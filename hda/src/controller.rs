//! Controller lifecycle: reset, codec detection and the command path

use log::{debug, info};
use num::Integer;
use crate::config::Config;
use crate::error::{Error, Result, WaitSite};
use crate::platform::Platform;
use crate::regs::{self, poll_until, GlobalCaps, GlobalControl, Mmio, StateChangeStatus};
use crate::transport::{CommandTransport, Transport, TransportKind};
use crate::verb::{Command, Parameter};

/// Number of codec addresses on one link. STATESTS has a bit for each
pub const MAX_CODECS: u8 = 15;

/// One bound HDA controller
///
/// Owns the platform it was bound with and, once established, the command
/// transport. Commands are issued one at a time through `&mut self`.
pub struct Controller<P: Platform> {
    platform: P,
    config: Config,
    /// Bit n is set when a codec answered at address n
    present_codecs: u16,
    transport: Option<Transport>
}

impl<P: Platform> Controller<P> {
    pub fn new(platform: P, config: Config) -> Self {
        Self {
            platform,
            config,
            present_codecs: 0,
            transport: None
        }
    }

    /// Takes the controller out of reset
    ///
    /// Asserting CRST brings the controller out of reset. The controller
    /// reports that it has left reset by reading the bit back as set
    pub fn reset(&mut self) -> Result<()> {
        let gctl = GlobalControl::from(self.platform.read32(regs::GCTL)?).with_controller_reset(true);
        self.platform.write32(regs::GCTL, gctl.into())?;
        let limit = self.config.poll.limit(WaitSite::ControllerReset);
        poll_until(&mut self.platform, WaitSite::ControllerReset, limit, |p| {
            Ok(GlobalControl::from(p.read32(regs::GCTL)?).controller_reset())
        })?;
        info!("controller out of reset");
        Ok(())
    }

    /// Gives the codecs time to request a state change after reset
    pub fn wait_for_codecs(&mut self) -> Result<()> {
        self.platform.stall(self.config.codec_ready_stall_us)
    }

    /// Records the codec addresses STATESTS reports and clears the
    /// reported bits
    pub fn scan_codecs(&mut self) -> Result<u16> {
        let codecs = StateChangeStatus::from(self.platform.read16(regs::STATESTS)?).codecs();
        // Write 1 to clear
        self.platform.write16(regs::STATESTS, codecs)?;
        self.present_codecs = codecs;
        info!("codec bitmap {:#06x}", codecs);
        Ok(codecs)
    }

    /// Nothing here runs from interrupts, so wake events and interrupts
    /// are turned off
    pub fn suppress_wake_and_interrupts(&mut self) -> Result<()> {
        self.platform.write16(regs::WAKEEN, 0)?;
        self.platform.write32(regs::INTCTL, 0)
    }

    pub fn establish_transport(&mut self) -> Result<TransportKind> {
        let transport = Transport::establish(&mut self.platform, &self.config)?;
        let kind = transport.kind();
        self.transport = Some(transport);
        Ok(kind)
    }

    /// Sends one command and returns the raw response
    pub fn command(&mut self, command: Command) -> Result<u32> {
        let transport = self.transport.as_mut().ok_or(Error::NoTransport)?;
        transport.exchange(&mut self.platform, command.encode())
    }

    pub fn get_parameter(&mut self, codec: u8, node: u8, param: Parameter) -> Result<u32> {
        self.command(Command::get_parameter(codec, node, param))
    }

    pub fn capabilities(&mut self) -> Result<GlobalCaps> {
        Ok(GlobalCaps::from(self.platform.read16(regs::GCAP)?))
    }

    /// Stops the transport and frees what it allocated. A no-op when no
    /// transport was established
    pub fn teardown_transport(&mut self) -> Result<()> {
        if let Some(transport) = self.transport.take() {
            debug!("tearing down the {:?} transport", transport.kind());
            transport.teardown(&mut self.platform)?;
        }
        Ok(())
    }

    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.transport.as_ref().map(|t| t.kind())
    }

    pub fn present_codecs(&self) -> u16 {
        self.present_codecs
    }

    /// The addresses of the codecs found by `scan_codecs`, ascending
    pub fn codec_addrs(&self) -> impl Iterator<Item = u8> + '_ {
        (0..MAX_CODECS).filter(move |i| self.present_codecs.is_set(*i as usize))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Hands the platform back. The transport must be torn down first
    pub fn into_platform(self) -> P {
        self.platform
    }
}
