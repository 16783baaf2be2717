use crate::config::{Config, PollPolicy, TransportPreference, WaitLimit};
use crate::error::{Error, WaitSite};
use crate::platform::Width;
use crate::regs;
use crate::transport::{CommandTransport, ImmediateTransport, RingTransport, Transport, TransportKind};
use crate::verb::{self, Command, Parameter};
use super::sim::{DmaEvent, SimCodec, SimController};
use super::{ready_controller, two_widget_sim, ONE_OUTPUT_STREAM};

fn ring_config() -> Config {
    Config { transport: TransportPreference::RingBuffer, ..Config::default() }
}

#[test]
fn test_auto_prefers_immediate() {
    let controller = ready_controller(two_widget_sim(), Config::default());
    assert_eq!(controller.transport_kind(), Some(TransportKind::Immediate));
}

#[test]
fn test_auto_falls_back_to_rings() {
    let controller = ready_controller(two_widget_sim().without_immediate(), Config::default());
    assert_eq!(controller.transport_kind(), Some(TransportKind::RingBuffer));
}

#[test]
fn test_immediate_exchange() {
    let mut controller = ready_controller(two_widget_sim(), Config::default());
    let vendor = controller.get_parameter(2, 0, Parameter::VendorId).unwrap();
    assert_eq!(vendor, 0xabcd_1234);
    let sim = controller.platform();
    assert_eq!(sim.icii_reads, 1);
    assert_eq!(sim.armed, vec![10_000]);
    assert_eq!(sim.cancels, 1);
    // IRV has been cleared again
    assert_eq!(sim.reg(Width::Word, regs::ICIS) & 0b10, 0);
}

#[test]
fn test_immediate_timeout_returns_sentinel_without_reading_icii() {
    let sim = SimController::new(ONE_OUTPUT_STREAM).with_codec(1, SimCodec::silent());
    let mut controller = ready_controller(sim, Config::default());
    let response = controller.get_parameter(1, 0, Parameter::VendorId).unwrap();
    assert_eq!(response, verb::TIMED_OUT);
    let sim = controller.platform();
    assert_eq!(sim.icii_reads, 0);
    assert_eq!(sim.cancels, 1);
}

#[test]
fn test_immediate_recovers_after_timeout() {
    let sim = SimController::new(ONE_OUTPUT_STREAM)
        .with_codec(1, SimCodec::silent())
        .with_codec(2, super::two_widget_codec());
    let mut controller = ready_controller(sim, Config::default());
    assert_eq!(controller.get_parameter(1, 0, Parameter::VendorId).unwrap(), verb::TIMED_OUT);
    assert_eq!(controller.get_parameter(2, 0, Parameter::VendorId).unwrap(), 0xabcd_1234);
}

#[test]
fn test_ring_setup_programs_registers() {
    let sim = two_widget_sim().with_ring_sizes(0b0010, 0b0110);
    let mut controller = ready_controller(sim, ring_config());
    let sim = controller.platform_mut();
    let allocs: Vec<_> = sim.dma_log.clone();
    let (corb, rirb) = match allocs.as_slice() {
        [DmaEvent::Alloc { addr: corb, len: 1024 }, DmaEvent::Alloc { addr: rirb, len: 2048 }] => (*corb, *rirb),
        other => panic!("unexpected allocations {:?}", other)
    };
    assert_eq!(sim.reg(Width::Dword, regs::CORBLBASE), corb as u32);
    assert_eq!(sim.reg(Width::Dword, regs::CORBUBASE), (corb >> 32) as u32);
    assert_eq!(sim.reg(Width::Dword, regs::RIRBLBASE), rirb as u32);
    assert_eq!(sim.reg(Width::Dword, regs::RIRBUBASE), (rirb >> 32) as u32);
    // 16 entries is all the CORB supports, the RIRB goes up to 256
    assert_eq!(sim.reg(Width::Byte, regs::CORBSIZE) & 0x3, 0b01);
    assert_eq!(sim.reg(Width::Byte, regs::RIRBSIZE) & 0x3, 0b10);
    assert_eq!(sim.writes_to(regs::RINTCNT), vec![1]);
    assert_eq!(sim.writes_to(regs::CORBRP), vec![0x8000, 0]);
    assert_eq!(sim.writes_to(regs::RIRBWP), vec![0x8000]);
    assert_eq!(sim.reg(Width::Byte, regs::CORBCTL) & 0b10, 0b10);
    assert_eq!(sim.reg(Width::Byte, regs::RIRBCTL) & 0b10, 0b10);
}

#[test]
fn test_ring_exchange() {
    let mut controller = ready_controller(two_widget_sim(), ring_config());
    assert_eq!(controller.get_parameter(2, 0, Parameter::VendorId).unwrap(), 0xabcd_1234);
    assert_eq!(controller.get_parameter(2, 5, Parameter::AudioWidgetCaps).unwrap(), 0x0040_0000);
    let sim = controller.platform();
    assert_eq!(sim.writes_to(regs::CORBWP), vec![0, 1, 2]);
    assert_eq!(sim.writes_to(regs::RIRBSTS), vec![0b101, 0b101]);
}

#[test]
fn test_ring_cursors_wrap_after_256_commands() {
    let mut codec = SimCodec::new();
    for node in 0..0x80u8 {
        codec.set_param(node, Parameter::VendorId as u8, 0x1000 | node as u32);
        codec.set_param(node, Parameter::RevisionId as u8, 0x2000 | node as u32);
    }
    let sim = SimController::new(ONE_OUTPUT_STREAM).with_codec(3, codec);
    let mut platform = ready_controller(sim, Config::default()).into_platform();
    let mut ring = RingTransport::setup(&mut platform, &PollPolicy::UNBOUNDED).unwrap();
    assert_eq!(ring.entries(), (256, 256));
    for node in 0..0x80u8 {
        for (param, tag) in [(Parameter::VendorId, 0x1000), (Parameter::RevisionId, 0x2000)] {
            let verb = Command::get_parameter(3, node, param).encode();
            let response = ring.exchange(&mut platform, verb).unwrap();
            assert_eq!(response, tag | node as u32);
        }
    }
    assert_eq!(ring.cursors(), (0, 0));
    // One more lands in slot 1 again
    let verb = Command::get_parameter(3, 7, Parameter::VendorId).encode();
    assert_eq!(ring.exchange(&mut platform, verb).unwrap(), 0x1007);
    assert_eq!(ring.cursors(), (1, 1));
    ring.teardown(&mut platform).unwrap();
    assert_eq!(platform.live_allocations(), 0);
}

#[test]
fn test_ring_wraps_small_rings() {
    let sim = two_widget_sim().with_ring_sizes(0b0001, 0b0001);
    let mut controller = ready_controller(sim, ring_config());
    for _ in 0..5 {
        assert_eq!(controller.get_parameter(2, 0, Parameter::VendorId).unwrap(), 0xabcd_1234);
    }
    assert_eq!(controller.platform().writes_to(regs::CORBWP), vec![0, 1, 0, 1, 0, 1]);
}

#[test]
fn test_ring_teardown_stops_dma_and_frees_buffers() {
    let mut controller = ready_controller(two_widget_sim(), ring_config());
    controller.teardown_transport().unwrap();
    let sim = controller.platform();
    assert_eq!(sim.reg(Width::Byte, regs::CORBCTL) & 0b10, 0);
    assert_eq!(sim.reg(Width::Byte, regs::RIRBCTL) & 0b10, 0);
    assert_eq!(sim.writes_to(regs::CORBRP), vec![0x8000, 0, 0x8000, 0]);
    assert_eq!(sim.writes_to(regs::RIRBWP), vec![0x8000, 0x8000]);
    assert_eq!(sim.live_allocations(), 0);
    assert_eq!(controller.transport_kind(), None);
}

#[test]
fn test_stalled_ring_times_out_when_bounded() {
    let config = Config {
        transport: TransportPreference::RingBuffer,
        poll: PollPolicy::uniform(WaitLimit::Iterations(100)),
        ..Config::default()
    };
    let mut controller = ready_controller(two_widget_sim().with_stalled_rings(), config);
    let result = controller.get_parameter(2, 0, Parameter::VendorId);
    assert_eq!(result, Err(Error::WaitTimedOut(WaitSite::CorbDrain)));
}

#[test]
fn test_forced_immediate_on_its_own() {
    let mut platform = two_widget_sim();
    let config = Config { transport: TransportPreference::Immediate, ..Config::default() };
    let mut transport = Transport::establish(&mut platform, &config).unwrap();
    assert_eq!(transport.kind(), TransportKind::Immediate);
    let verb = Command::get_parameter(2, 4, Parameter::AudioWidgetCaps).encode();
    assert_eq!(transport.exchange(&mut platform, verb).unwrap(), 1);
    transport.teardown(&mut platform).unwrap();

    let mut immediate = ImmediateTransport::new(50);
    immediate.exchange(&mut platform, verb).unwrap();
    assert_eq!(platform.armed, vec![10_000, 50]);
}
