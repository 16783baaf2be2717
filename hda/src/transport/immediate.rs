use core::hint;
use log::{debug, trace};
use crate::error::Result;
use crate::platform::Platform;
use crate::regs::{self, ImmediateStatus, Mmio};
use crate::verb::TIMED_OUT;
use super::{CommandTransport, TransportKind};

/// Sends verbs through ICOI/ICII/ICIS
///
/// This is the one transport wait with a bound: a relative timer is
/// armed for every command and the poll gives up when it fires.
#[derive(Debug)]
pub struct ImmediateTransport {
    timeout: u64
}

impl ImmediateTransport {
    /// `timeout` is in timer units of 100ns
    pub fn new(timeout: u64) -> Self {
        Self { timeout }
    }
}

impl CommandTransport for ImmediateTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Immediate
    }

    fn exchange<P: Platform + ?Sized>(&mut self, platform: &mut P, verb: u32) -> Result<u32> {
        // Drop a response left over from an earlier command that timed out
        platform.write16(regs::ICIS, ImmediateStatus::default().with_result_valid(true).into())?;
        platform.write32(regs::ICOI, verb)?;
        platform.write16(regs::ICIS, ImmediateStatus::default().with_busy(true).into())?;

        platform.arm_timer(self.timeout)?;
        let answered = loop {
            let status = ImmediateStatus::from(platform.read16(regs::ICIS)?);
            if status.result_valid() {
                break true;
            }
            if platform.timer_expired()? {
                break false;
            }
            hint::spin_loop();
        };
        platform.cancel_timer()?;

        if !answered {
            debug!("no response to {:#010x}", verb);
            return Ok(TIMED_OUT);
        }
        let response = platform.read32(regs::ICII)?;
        // IRV is write-1-to-clear, so writing the status back clears it
        let status = platform.read16(regs::ICIS)?;
        platform.write16(regs::ICIS, status)?;
        trace!("{:#010x} -> {:#010x}", verb, response);
        Ok(response)
    }

    fn teardown<P: Platform + ?Sized>(self, _platform: &mut P) -> Result<()> {
        Ok(())
    }
}
