//! Text output through the firmware console

use core::fmt;
use core::fmt::Write;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};
use log::{Level, LevelFilter, Log, Metadata, Record};
use machine::uefi::EFISimpleTextOutputProtocol;

/// UTF-16 code units sent to the firmware per OutputString call,
/// the terminating null included
const CHUNK_LEN: usize = 128;

static STDOUT: AtomicPtr<EFISimpleTextOutputProtocol> = AtomicPtr::new(ptr::null_mut());

static LOGGER: ConsoleLogger = ConsoleLogger;

/// Writes to ConOut
///
/// Writes are dropped until `init` has been called
pub struct Printer;

impl fmt::Write for Printer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let stdout = STDOUT.load(Ordering::Acquire);
        if stdout.is_null() {
            return Ok(());
        }
        let stdout = unsafe { &*stdout };
        let mut buf = [0u16; CHUNK_LEN];
        let mut len = 0;
        for unit in encode_line_endings(s) {
            // Two slots are kept free so that a surrogate pair
            // never gets split across calls
            if len >= CHUNK_LEN - 2 {
                flush(stdout, &mut buf, len)?;
                len = 0;
            }
            buf[len] = unit;
            len += 1;
        }
        flush(stdout, &mut buf, len)
    }
}

/// UTF-16 encodes `s`, turning each `\n` into `\r\n`
fn encode_line_endings(s: &str) -> impl Iterator<Item = u16> + '_ {
    s.chars().flat_map(|c| {
        let mut units = [0u16; 3];
        let n = if c == '\n' {
            units[0] = b'\r' as u16;
            units[1] = b'\n' as u16;
            2
        } else {
            c.encode_utf16(&mut units[..2]).len()
        };
        units.into_iter().take(n)
    })
}

fn flush(stdout: &EFISimpleTextOutputProtocol, buf: &mut [u16; CHUNK_LEN], len: usize) -> fmt::Result {
    if len == 0 {
        return Ok(());
    }
    buf[len] = 0;
    let res = unsafe { stdout.output_string(buf.as_ptr()) };
    res.map_err(|_| fmt::Error)
}

/// A `log` backend that prints each record on its own console line
pub struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _ = match record.level() {
            Level::Info => writeln!(Printer, "{}", record.args()),
            level => writeln!(Printer, "[{}] {}: {}", level, record.target(), record.args())
        };
    }

    fn flush(&self) {}
}

/// Points the printer at `stdout` and installs the logger
pub fn init(stdout: &'static EFISimpleTextOutputProtocol) {
    STDOUT.store(stdout as *const _ as *mut _, Ordering::Release);
    // Only fails if a logger is already installed, which is then kept
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(if cfg!(feature = "verbose") {
        LevelFilter::Trace
    } else {
        LevelFilter::Info
    });
}
