use std::sync::atomic::{AtomicBool, Ordering};

use glasses_core::display::{Display, StatusLight};
use tracing::{debug, info, trace};

/// Display that writes every line to the log.
pub(crate) struct ConsoleDisplay;

impl Display for ConsoleDisplay {
    fn show_text(&self, text: &str) {
        info!("Display: {text}");
    }

    fn pulse(&self) {
        debug!("Display: capture pulse");
    }
}

/// LED stand-in that logs level changes.
#[derive(Default)]
pub(crate) struct LogLight {
    on: AtomicBool,
}

impl StatusLight for LogLight {
    fn set_level(&self, on: bool) {
        if self.on.swap(on, Ordering::Relaxed) != on {
            trace!("LED {}", if on { "on" } else { "off" });
        }
    }
}
