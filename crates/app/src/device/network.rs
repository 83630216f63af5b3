//! Host network stack: treats reachability of the inference service as
//! association.
//!
//! `connect` probes the service with a bounded TCP connect on a short-lived
//! thread and reports the outcome as a link event. While associated, a
//! supervision thread re-probes periodically and reports a beacon timeout when
//! the service drops. Every `start`/`stop` bumps a generation counter; probes
//! belonging to an older generation never report.

use std::{
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
};

use glasses_core::{
    connectivity::{
        LinkEvent, LinkEventSink, NetworkError, NetworkStack, REASON_BEACON_TIMEOUT,
        REASON_NO_AP_FOUND,
    },
    tasks::spawn_task,
};
use tracing::{debug, info, warn};

use super::config::ProbeSettings;

pub(crate) struct ProbeNetwork {
    shared: Arc<Shared>,
}

struct Shared {
    settings: ProbeSettings,
    generation: AtomicU64,
    associated: AtomicBool,
    /// Generation of the association probe in flight, `0` when idle.
    probing: AtomicU64,
    sink: Mutex<Option<LinkEventSink>>,
}

impl ProbeNetwork {
    pub(crate) fn new(settings: ProbeSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                generation: AtomicU64::new(0),
                associated: AtomicBool::new(false),
                probing: AtomicU64::new(0),
                sink: Mutex::new(None),
            }),
        }
    }
}

impl NetworkStack for ProbeNetwork {
    fn start(&self, events: LinkEventSink) -> Result<(), NetworkError> {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.associated.store(false, Ordering::SeqCst);
        *self.shared.lock_sink() = Some(events);

        let shared = Arc::clone(&self.shared);
        spawn_task("link-supervisor", move || shared.supervise(generation))?;

        debug!("Probe network started (generation {generation})");
        self.shared.emit(generation, LinkEvent::Started);
        Ok(())
    }

    fn connect(&self) -> Result<(), NetworkError> {
        if self.shared.lock_sink().is_none() {
            return Err(NetworkError::NotStarted);
        }
        let generation = self.shared.generation.load(Ordering::SeqCst);
        if self.shared.probing.swap(generation, Ordering::SeqCst) == generation {
            debug!("Association probe already in flight");
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let spawned = spawn_task("link-probe", move || {
            thread::sleep(shared.settings.association_delay);
            let event = match shared.probe() {
                Ok(local) => {
                    shared.associated.store(true, Ordering::SeqCst);
                    LinkEvent::AddressAcquired {
                        address: local.ip().to_string(),
                    }
                }
                Err(reason) => {
                    debug!("Association probe failed: {reason}");
                    LinkEvent::Disconnected {
                        reason: REASON_NO_AP_FOUND,
                    }
                }
            };
            shared.finish_probe(generation);
            shared.emit(generation, event);
        });
        if let Err(err) = spawned {
            self.shared.finish_probe(generation);
            return Err(err.into());
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), NetworkError> {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.associated.store(false, Ordering::SeqCst);
        *self.shared.lock_sink() = None;
        debug!("Probe network stopped");
        Ok(())
    }
}

impl Shared {
    fn probe(&self) -> Result<SocketAddr, String> {
        let addrs = self
            .settings
            .target
            .to_socket_addrs()
            .map_err(|err| format!("cannot resolve {}: {err}", self.settings.target))?;
        let mut last_error = format!("{} resolved to no addresses", self.settings.target);
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.settings.connect_timeout) {
                Ok(stream) => return stream.local_addr().map_err(|err| err.to_string()),
                Err(err) => last_error = format!("{addr}: {err}"),
            }
        }
        Err(last_error)
    }

    fn supervise(&self, generation: u64) {
        while self.is_current(generation) {
            thread::sleep(self.settings.probe_interval);
            if !self.is_current(generation) || !self.associated.load(Ordering::SeqCst) {
                continue;
            }
            if let Err(reason) = self.probe() {
                warn!("Inference service unreachable: {reason}");
                self.associated.store(false, Ordering::SeqCst);
                self.emit(
                    generation,
                    LinkEvent::Disconnected {
                        reason: REASON_BEACON_TIMEOUT,
                    },
                );
            }
        }
    }

    fn finish_probe(&self, generation: u64) {
        let _ = self
            .probing
            .compare_exchange(generation, 0, Ordering::SeqCst, Ordering::SeqCst);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn emit(&self, generation: u64, event: LinkEvent) {
        if !self.is_current(generation) {
            debug!(?event, "dropping event from a stopped network generation");
            return;
        }
        if let LinkEvent::AddressAcquired { address } = &event {
            info!("Inference service reachable from {address}");
        }
        if let Some(sink) = self.lock_sink().as_ref() {
            let _ = sink.send(event);
        }
    }

    fn lock_sink(&self) -> std::sync::MutexGuard<'_, Option<LinkEventSink>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
