//! Fixed-size pool of frame buffers shared between the driver and its caller.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::types::CaptureError;

/// A buffer checked out of the pool together with the slot it belongs to.
pub(crate) struct Slot {
    pub(crate) index: usize,
    pub(crate) buffer: Vec<u8>,
}

/// Driver-owned set of frame buffers.
///
/// Buffers are handed out through a bounded channel so the pool can never grow
/// past `capacity`; a caller that forgets to give a buffer back starves the
/// next acquisition instead of silently allocating more memory.
pub struct FramePool {
    free_tx: Sender<Slot>,
    free_rx: Receiver<Slot>,
    capacity: usize,
    outstanding: AtomicUsize,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (free_tx, free_rx) = bounded(capacity);
        for index in 0..capacity {
            let _ = free_tx.send(Slot {
                index,
                buffer: Vec::new(),
            });
        }
        Self {
            free_tx,
            free_rx,
            capacity,
            outstanding: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffers currently leased out.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub(crate) fn lease(&self) -> Result<Slot, CaptureError> {
        match self.free_rx.try_recv() {
            Ok(slot) => {
                self.outstanding.fetch_add(1, Ordering::SeqCst);
                Ok(slot)
            }
            Err(_) => Err(CaptureError::PoolExhausted {
                capacity: self.capacity,
            }),
        }
    }

    pub(crate) fn give_back(&self, slot: Slot) {
        if self.free_tx.try_send(slot).is_ok() {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
        } else {
            tracing::error!("frame pool rejected a returned buffer; pool is already full");
        }
    }
}
