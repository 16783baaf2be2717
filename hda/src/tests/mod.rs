mod sim;
mod controller;
mod transport;

use crate::config::Config;
use crate::controller::Controller;
use crate::verb::Parameter;
use sim::{SimCodec, SimController};

/// GCAP of a controller with one output stream and nothing else
const ONE_OUTPUT_STREAM: u16 = 0x1000;

/// A codec at address 2 whose root lists nodes 4 and 5: node 4 an audio
/// output converter, node 5 a pin complex
fn two_widget_codec() -> SimCodec {
    SimCodec::new()
        .with_param(0, Parameter::VendorId as u8, 0xabcd_1234)
        .with_param(0, Parameter::SubordinateNodeCount as u8, 4 << 16 | 2)
        .with_param(4, Parameter::AudioWidgetCaps as u8, 0x0000_0001)
        .with_param(5, Parameter::AudioWidgetCaps as u8, 0x0040_0000)
}

fn two_widget_sim() -> SimController {
    SimController::new(ONE_OUTPUT_STREAM).with_codec(2, two_widget_codec())
}

/// A controller taken through reset and the codec scan, with its
/// transport established
fn ready_controller(sim: SimController, config: Config) -> Controller<SimController> {
    let mut controller = Controller::new(sim, config);
    controller.reset().unwrap();
    controller.wait_for_codecs().unwrap();
    controller.scan_codecs().unwrap();
    controller.suppress_wake_and_interrupts().unwrap();
    controller.establish_transport().unwrap();
    controller
}
