/// Text display collaborator.
pub trait Display: Send + Sync {
    fn show_text(&self, text: &str);

    /// Momentary signal that a frame was captured.
    fn pulse(&self);
}

/// Single status LED.
pub trait StatusLight: Send + Sync {
    fn set_level(&self, on: bool);
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    /// Display that records everything shown on it.
    #[derive(Default)]
    pub(crate) struct RecordingDisplay {
        pub(crate) lines: Mutex<Vec<String>>,
        pub(crate) pulses: AtomicU32,
    }

    impl RecordingDisplay {
        pub(crate) fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }

        pub(crate) fn pulses(&self) -> u32 {
            self.pulses.load(Ordering::SeqCst)
        }
    }

    impl Display for RecordingDisplay {
        fn show_text(&self, text: &str) {
            self.lines.lock().unwrap().push(text.to_string());
        }

        fn pulse(&self) {
            self.pulses.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingLight {
        pub(crate) levels: Mutex<Vec<bool>>,
    }

    impl RecordingLight {
        pub(crate) fn levels(&self) -> Vec<bool> {
            self.levels.lock().unwrap().clone()
        }
    }

    impl StatusLight for RecordingLight {
        fn set_level(&self, on: bool) {
            self.levels.lock().unwrap().push(on);
        }
    }
}
