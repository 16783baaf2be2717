use crate::config::{Config, PollPolicy, WaitLimit};
use crate::controller::Controller;
use crate::error::{Error, WaitSite};
use crate::platform::Width;
use crate::regs;
use crate::verb::{Command, Parameter};
use super::sim::{SimCodec, SimController};
use super::{two_widget_sim, ONE_OUTPUT_STREAM};

#[test]
fn test_reset_waits_for_crst() {
    let sim = SimController::new(ONE_OUTPUT_STREAM).with_reset_latency(Some(5));
    let mut controller = Controller::new(sim, Config::default());
    controller.reset().unwrap();
    assert_eq!(controller.platform_mut().reg(Width::Dword, regs::GCTL) & 1, 1);
}

#[test]
fn test_bounded_reset_wait_times_out() {
    let sim = SimController::new(ONE_OUTPUT_STREAM).with_reset_latency(None);
    let config = Config {
        poll: PollPolicy { reset: WaitLimit::Iterations(50), ..PollPolicy::UNBOUNDED },
        ..Config::default()
    };
    let mut controller = Controller::new(sim, config);
    assert_eq!(controller.reset(), Err(Error::WaitTimedOut(WaitSite::ControllerReset)));
}

#[test]
fn test_codec_ready_stall() {
    let mut controller = Controller::new(SimController::new(ONE_OUTPUT_STREAM), Config::default());
    controller.wait_for_codecs().unwrap();
    assert_eq!(controller.platform().stalls, vec![600]);
}

#[test]
fn test_scan_codecs_records_and_clears_statests() {
    let sim = SimController::new(ONE_OUTPUT_STREAM)
        .with_codec(0, SimCodec::new())
        .with_codec(2, SimCodec::new())
        .with_state_change(14);
    let mut controller = Controller::new(sim, Config::default());
    assert_eq!(controller.scan_codecs().unwrap(), 0b0100_0000_0000_0101);
    assert_eq!(controller.codec_addrs().collect::<Vec<_>>(), vec![0, 2, 14]);
    assert_eq!(controller.platform().reg(Width::Word, regs::STATESTS), 0);
    assert_eq!(controller.platform().writes_to(regs::STATESTS), vec![0b0100_0000_0000_0101]);
}

#[test]
fn test_wake_and_interrupts_are_suppressed() {
    let mut controller = Controller::new(SimController::new(ONE_OUTPUT_STREAM), Config::default());
    controller.suppress_wake_and_interrupts().unwrap();
    let sim = controller.platform();
    assert_eq!(sim.writes_to(regs::WAKEEN), vec![0]);
    assert_eq!(sim.writes_to(regs::INTCTL), vec![0]);
}

#[test]
fn test_command_without_transport() {
    let mut controller = Controller::new(two_widget_sim(), Config::default());
    let result = controller.command(Command::get_parameter(2, 0, Parameter::VendorId));
    assert_eq!(result, Err(Error::NoTransport));
    assert!(controller.platform().sent.is_empty());
}

#[test]
fn test_capabilities() {
    let mut controller = Controller::new(SimController::new(0x4401), Config::default());
    let caps = controller.capabilities().unwrap();
    assert_eq!(caps.output_streams(), 4);
    assert_eq!(caps.input_streams(), 4);
    assert_eq!(caps.bidirectional_streams(), 0);
    assert!(caps.addr_64bit_supported());
    assert_eq!(caps.total_streams(), 8);
}
