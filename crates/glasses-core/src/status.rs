//! Shared recognition status.
//!
//! The capture pipeline is the only writer; status endpoints and displays read
//! it. All three fields live behind one mutex so a reader never sees the id of
//! one update paired with the name of another.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

/// Longest name kept in the record, in bytes.
pub const NAME_CAPACITY: usize = 31;

/// Latest interpreted result of a capture cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RecognitionResult {
    Recognized {
        id: Option<u32>,
        name: String,
    },
    Unknown,
    #[default]
    NoFace,
}

/// Consistent copy of the record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub recognized: bool,
    pub id: Option<u32>,
    pub name: String,
    pub result: RecognitionResult,
}

/// JSON body served by the status query surface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusReport {
    Recognized { id: Option<u32>, name: String },
    Unknown,
}

impl From<&StatusSnapshot> for StatusReport {
    fn from(snapshot: &StatusSnapshot) -> Self {
        if snapshot.recognized {
            StatusReport::Recognized {
                id: snapshot.id,
                name: snapshot.name.clone(),
            }
        } else {
            StatusReport::Unknown
        }
    }
}

#[derive(Default)]
pub struct RecognitionStatus {
    record: Mutex<StatusSnapshot>,
}

impl RecognitionStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the record as one unit. The name is truncated to
    /// [`NAME_CAPACITY`] and cleared when absent.
    pub fn update(&self, recognized: bool, id: Option<u32>, name: Option<&str>) {
        let name = name.map(truncate_name).unwrap_or_default();
        let result = if recognized {
            RecognitionResult::Recognized {
                id,
                name: name.clone(),
            }
        } else {
            RecognitionResult::Unknown
        };
        self.replace(StatusSnapshot {
            recognized,
            id,
            name,
            result,
        });
    }

    /// Replace the record with a typed result.
    pub fn set(&self, result: RecognitionResult) {
        match result {
            RecognitionResult::Recognized { id, name } => self.update(true, id, Some(&name)),
            RecognitionResult::Unknown => self.update(false, None, None),
            RecognitionResult::NoFace => self.replace(StatusSnapshot::default()),
        }
    }

    pub fn read(&self) -> StatusSnapshot {
        self.lock().clone()
    }

    pub fn report(&self) -> StatusReport {
        StatusReport::from(&self.read())
    }

    fn replace(&self, snapshot: StatusSnapshot) {
        tracing::info!(
            "Status: {} (ID: {:?}, Name: '{}')",
            if snapshot.recognized {
                "Recognized"
            } else {
                "Unknown"
            },
            snapshot.id,
            snapshot.name
        );
        *self.lock() = snapshot;
    }

    fn lock(&self) -> MutexGuard<'_, StatusSnapshot> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cut `name` to at most [`NAME_CAPACITY`] bytes on a character boundary.
pub fn truncate_name(name: &str) -> String {
    truncate_to(name, NAME_CAPACITY)
}

pub(crate) fn truncate_to(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
