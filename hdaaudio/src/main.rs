//! A UEFI application that brings up the HD audio controller and plays
//! a short tone through it
//!
//! Built for a `*-unknown-uefi` target. On any other target it only
//! builds its tests.

#![cfg_attr(target_os = "uefi", no_std)]
#![cfg_attr(target_os = "uefi", no_main)]
#![cfg_attr(not(target_os = "uefi"), allow(dead_code))]

extern crate alloc;

mod console;
mod platform;
mod waveform;

use hda::{Config, Error, Summary, TransportPreference};
use machine::uefi::{Status, StatusCode};

macro_rules! Mem {
    // $n megabytes
    ($n:expr, Mib) => { $n * 2u64.pow(20) };
    ($n:expr, Kib) => { $n * 2u64.pow(10) };
}

const APP_HEAP_SIZE: usize = Mem!(4, Mib) as usize;

#[cfg(target_os = "uefi")]
#[global_allocator]
static ALLOCATOR: linked_list_allocator::LockedHeap = linked_list_allocator::LockedHeap::empty();

#[cfg(target_os = "uefi")]
machine::efi_entry_point!(main);

#[cfg(target_os = "uefi")]
fn main(image: machine::uefi::EFIHandle, systable: &'static machine::uefi::EFISystemTable) -> Status {
    use log::{error, warn};
    use machine::uefi::EFIMemoryType;

    console::init(systable.stdout());
    let boot_services = systable.boot_services();
    let heap = match boot_services.alloc_mem(EFIMemoryType::LoaderData, APP_HEAP_SIZE) {
        Ok(heap) => heap,
        Err(e) => {
            error!("{}", e);
            return e.status;
        }
    };
    unsafe { ALLOCATOR.lock().init(heap, APP_HEAP_SIZE) };

    let status = play(boot_services, image);

    // Everything allocated from the heap has been dropped by now
    if let Err(e) = unsafe { boot_services.free_mem(heap.cast()) } {
        warn!("{}", e);
    }
    status
}

#[cfg(target_os = "uefi")]
fn play(boot_services: &'static machine::uefi::EFIBootServices, image: machine::uefi::EFIHandle) -> Status {
    use log::{error, info};

    let tone = waveform::Tone::default();
    let config = config(tone);
    let samples = waveform::render(config.format, tone);
    let mut bus = platform::UefiPciBus::new(boot_services, image);
    match hda::run(&mut bus, config, &samples) {
        Ok(summary) => {
            report(&summary);
            StatusCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            exit_status(&e)
        }
    }
}

#[cfg(target_os = "uefi")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    use core::fmt::Write;
    let _ = writeln!(console::Printer, "{}", info);
    loop {}
}

#[cfg(not(target_os = "uefi"))]
fn main() {
    println!("hdaaudio runs as a UEFI application, build it for a *-unknown-uefi target");
}

/// The run configuration, with the transport chosen by Cargo feature
fn config(tone: waveform::Tone) -> Config {
    let transport = if cfg!(feature = "immediate") {
        TransportPreference::Immediate
    } else if cfg!(feature = "ring-buffer") {
        TransportPreference::RingBuffer
    } else {
        TransportPreference::Auto
    };
    Config {
        transport,
        // Long enough to hear the tone go round once
        playback_linger_us: tone.duration_ms as usize * 1000,
        ..Config::default()
    }
}

fn report(summary: &Summary) {
    log::info!(
        "controller {:04x}:{:04x}, codecs {:#06x}, {:?} transport",
        summary.identity.vendor_id,
        summary.identity.device_id,
        summary.codecs,
        summary.transport
    );
    log::info!(
        "{} nodes, stream descriptor {} fed {} output converters",
        summary.nodes,
        summary.stream_descriptor,
        summary.outputs.len()
    );
}

/// The EFI status the application exits with after `e`
fn exit_status(e: &Error) -> Status {
    match e {
        Error::NoController => StatusCode::NOT_FOUND,
        Error::OutOfResources => StatusCode::OUT_OF_RESOURCES,
        Error::WaitTimedOut(_) => StatusCode::TIMEOUT,
        Error::BadWaveform { .. } | Error::WaveformTooShort { .. } => StatusCode::INVALID_PARAMETER,
        Error::DeviceIo { status, .. } if StatusCode::is_error(*status) => *status,
        _ => StatusCode::DEVICE_ERROR
    }
}
