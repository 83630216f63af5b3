use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Spawn a named thread that inherits the current tracing dispatcher.
pub fn spawn_task<F, T>(name: impl Into<String>, f: F) -> io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name(name.into())
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}

/// Sleep for `total`, waking early once `shutdown` is set. Returns `false`
/// when the sleep was cut short.
pub fn sleep_unless(shutdown: &AtomicBool, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}
