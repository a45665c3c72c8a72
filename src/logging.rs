//! Timestamped logging with ANSI colour support.
//!
//! Provides the [`rlog!`] macro for consistent log output in the format:
//!
//! ```text
//! 20260827T14:02:11.000 - src/orchestrator.rs:88 - broadcast: m-42 fanned out to 17 member(s)
//! ```
//!
//! When stderr is a terminal, timestamps and source locations are dimmed and
//! phone/message identifiers get consistent colours.  Call [`set_writer`] to
//! redirect output to any [`std::io::Write`] implementor (file, in-memory
//! buffer for tests); installing a custom writer disables colour codes.
//!
//! Phone numbers are PII: log lines never carry a full number.  Use
//! [`phone`] to render a masked suffix such as `…0100`.

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Mutex};
use std::time::SystemTime;

static COLOUR_ENABLED: AtomicBool = AtomicBool::new(false);

static LOG_WRITER: LazyLock<Mutex<Box<dyn Write + Send>>> =
    LazyLock::new(|| Mutex::new(Box::new(io::stderr())));

/// Initialize the logging system. Call once at startup before any logging.
pub fn init() {
    let is_terminal = io::stderr().is_terminal();
    COLOUR_ENABLED.store(is_terminal, Ordering::Relaxed);
}

/// Replace the log writer.  All subsequent [`rlog!`] output goes to `w`.
/// Also disables ANSI colour codes.
pub fn set_writer(w: Box<dyn Write + Send>) {
    COLOUR_ENABLED.store(false, Ordering::Relaxed);
    *LOG_WRITER.lock().unwrap() = w;
}

/// Returns whether ANSI colour output is enabled.
pub fn colour_enabled() -> bool {
    COLOUR_ENABLED.load(Ordering::Relaxed)
}

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

/// Palette for hashing identifiers onto distinct colours.
const ID_COLOURS: &[&str] = &[
    "\x1b[91m", // bright red
    "\x1b[92m", // bright green
    "\x1b[94m", // bright blue
    "\x1b[95m", // bright magenta
    "\x1b[96m", // bright cyan
    "\x1b[32m", // green
    "\x1b[33m", // yellow
    "\x1b[35m", // magenta
    "\x1b[36m", // cyan
];

fn hash_colour(id: &str) -> &'static str {
    let hash: u32 = id
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    ID_COLOURS[(hash as usize) % ID_COLOURS.len()]
}

const PHONE_SUFFIX_LEN: usize = 4;

/// Format a phone number for logging: masked down to its last four digits,
/// with a consistent colour per number.
///
/// Returns e.g. `…0100` (plain) or `\x1b[92m…0100\x1b[0m` (colour).
pub fn phone(number: &str) -> String {
    let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();
    let suffix = if digits.len() > PHONE_SUFFIX_LEN {
        &digits[digits.len() - PHONE_SUFFIX_LEN..]
    } else {
        digits.as_str()
    };
    if colour_enabled() {
        let colour = hash_colour(number);
        format!("{colour}\u{2026}{suffix}{RESET}")
    } else {
        format!("\u{2026}{suffix}")
    }
}

const MSG_ID_COLOUR: &str = "\x1b[93m"; // bright yellow

/// Format a broadcast message id for logging.
pub fn msg_id(id: i64) -> String {
    if colour_enabled() {
        format!("{MSG_ID_COLOUR}m-{id}{RESET}")
    } else {
        format!("m-{id}")
    }
}

/// Format the current wall-clock time as `YYYYMMDDTHH:MM:SS.mmm`.
pub fn format_timestamp() -> String {
    let duration = SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();

    let time_secs = secs % 86400;
    let hours = time_secs / 3600;
    let minutes = (time_secs % 3600) / 60;
    let seconds = time_secs % 60;

    // Civil date from days since epoch (Howard Hinnant's algorithm).
    let days = (secs / 86400) as i64;
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };

    format!(
        "{:04}{:02}{:02}T{:02}:{:02}:{:02}.{:03}",
        y, m, d, hours, minutes, seconds, millis
    )
}

/// Write a single log line to the current writer.
///
/// Called by the [`rlog!`] macro; not intended for direct use.
pub fn emit(file: &str, line: u32, msg: &str) {
    let ts = format_timestamp();
    let formatted = if colour_enabled() {
        format!("{DIM}{ts}{RESET} {DIM}{file}:{line}{RESET} {msg}")
    } else {
        format!("{ts} - {file}:{line} - {msg}")
    };
    let mut writer = LOG_WRITER.lock().unwrap();
    let _ = writeln!(*writer, "{formatted}");
}

/// Emit a log line with timestamp and source location.
///
/// # Usage
///
/// ```ignore
/// rlog!("fanout: sent {} to {}", logging::msg_id(id), logging::phone(&to));
/// ```
#[macro_export]
macro_rules! rlog {
    ($($arg:tt)*) => {{
        $crate::logging::emit(file!(), line!(), &format!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_is_masked_to_last_four_digits() {
        assert_eq!(phone("+12065550100"), "\u{2026}0100");
        assert_eq!(phone("+1 (206) 555-0100"), "\u{2026}0100");
    }

    #[test]
    fn short_numbers_are_not_padded() {
        assert_eq!(phone("911"), "\u{2026}911");
    }
}
