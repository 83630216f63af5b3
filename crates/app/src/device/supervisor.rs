//! Device supervisor: builds every task of one device run, watches for a
//! restart request, and starts over with fresh state when one arrives.

use std::{
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use frame_ingest::{Camera, DirectorySource, PooledCamera, SyntheticSource};
use glasses_core::{
    CapturePipeline, ConnectivityManager, RecognitionStatus, RestartLatch,
    connectivity::WaitOutcome,
    display::Display,
    indicator::{INDICATOR_TICK, StatusIndicator, spawn_indicator},
    tasks::spawn_task,
    watchdog::{FailureFlag, WATCHDOG_TICK, WatchdogMonitor, spawn_watchdog},
};
use tracing::{debug, error, info, warn};

use super::{
    DeviceConfig,
    config::CameraConfig,
    console::{ConsoleDisplay, LogLight},
    http::HttpTransport,
    network::ProbeNetwork,
    server::{ServerState, StatusServer, spawn_status_server},
    telemetry,
};

const RESTART_PAUSE: Duration = Duration::from_secs(1);
const SUPERVISOR_POLL: Duration = Duration::from_millis(100);
/// Consecutive runs that may fail to start before the supervisor gives up.
const MAX_STARTUP_FAILURES: u32 = 5;

/// Result of a single device run.
enum RunOutcome {
    Shutdown,
    Restart(String),
}

/// Run the device, restarting it whenever a task requests a device restart.
pub fn run(config: DeviceConfig) -> Result<()> {
    static CTRL_HANDLER: Once = Once::new();

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            handler_shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    telemetry::init_metrics_recorder();

    supervise(&shutdown, RESTART_PAUSE, |shutdown| {
        run_device_once(&config, shutdown)
    })?;
    info!("Device shut down");
    Ok(())
}

/// Restart loop around `run_once`. Requested restarts are unbounded; runs
/// that fail to start are retried at most [`MAX_STARTUP_FAILURES`] times in a
/// row.
fn supervise(
    shutdown: &AtomicBool,
    pause: Duration,
    mut run_once: impl FnMut(&AtomicBool) -> Result<RunOutcome>,
) -> Result<()> {
    let mut attempt: u32 = 0;
    let mut failures: u32 = 0;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }

        match run_once(shutdown) {
            Ok(RunOutcome::Shutdown) => return Ok(()),
            Ok(RunOutcome::Restart(reason)) => {
                failures = 0;
                attempt = attempt.saturating_add(1);
                warn!("Device restart requested (reason: {reason}), attempt #{attempt}");
            }
            Err(err) => {
                if shutdown.load(Ordering::SeqCst) {
                    return Ok(());
                }
                failures += 1;
                if failures >= MAX_STARTUP_FAILURES {
                    bail!("Device failed to start {failures} times in a row: {err:#}");
                }
                attempt = attempt.saturating_add(1);
                error!("Device run failed ({failures}/{MAX_STARTUP_FAILURES}): {err:?}");
            }
        }
        thread::sleep(pause);
    }
}

/// Execute one device run with freshly created process-wide state.
fn run_device_once(config: &DeviceConfig, shutdown: &AtomicBool) -> Result<RunOutcome> {
    let _span = tracing::info_span!(
        "device.run",
        device_id = %config.pipeline.device_id,
        endpoint = %config.pipeline.endpoint,
    )
    .entered();

    let camera = open_camera(&config.camera)?;
    let transport = Arc::new(HttpTransport::new()?);

    let latch = Arc::new(RestartLatch::new());
    let status = Arc::new(RecognitionStatus::new());
    let failure = Arc::new(FailureFlag::new());
    let display: Arc<dyn Display> = Arc::new(ConsoleDisplay);
    let manager = Arc::new(ConnectivityManager::new(
        Arc::new(ProbeNetwork::new(config.network.clone())),
        latch.clone(),
        config.retry,
    ));
    let stop = Arc::new(AtomicBool::new(false));

    manager.start().context("Failed to start connectivity")?;
    let mut tasks = RunningTasks::new(manager.clone(), stop.clone());

    if let Some(addr) = config.status_addr {
        tasks.server = Some(spawn_status_server(
            addr,
            ServerState {
                status: status.clone(),
                connectivity: manager.clone(),
                failure: failure.clone(),
            },
        )?);
    }

    let indicator = StatusIndicator::new(
        manager.clone(),
        failure.clone(),
        Arc::new(LogLight::default()),
        display.clone(),
    );
    tasks.handles.push(
        spawn_indicator(indicator, stop.clone(), INDICATOR_TICK)
            .context("Failed to spawn indicator")?,
    );

    let watchdog = WatchdogMonitor::new(
        manager.clone(),
        manager.clone(),
        failure.clone(),
        config.stall_timeout,
    );
    tasks.handles.push(
        spawn_watchdog(watchdog, stop.clone(), WATCHDOG_TICK)
            .context("Failed to spawn watchdog")?,
    );

    match manager.wait_until_connected(config.startup_wait) {
        WaitOutcome::Connected => info!("Network ready"),
        WaitOutcome::TimedOut => warn!(
            "Network not ready after {:?}; capture starts once associated",
            config.startup_wait
        ),
    }

    let mut pipeline = CapturePipeline::new(
        camera,
        manager.clone(),
        transport,
        display,
        status,
        config.pipeline.clone(),
    );
    let pipeline_stop = stop.clone();
    tasks.handles.push(
        spawn_task("capture-pipeline", move || pipeline.run(&pipeline_stop))
            .context("Failed to spawn capture pipeline")?,
    );

    while !shutdown.load(Ordering::SeqCst) && !latch.is_triggered() {
        thread::sleep(SUPERVISOR_POLL);
    }

    let outcome = if latch.is_triggered() {
        RunOutcome::Restart(latch.reason().unwrap_or_else(|| "unspecified".to_string()))
    } else {
        RunOutcome::Shutdown
    };
    drop(tasks);
    Ok(outcome)
}

fn open_camera(config: &CameraConfig) -> Result<Box<dyn Camera>> {
    let camera: Box<dyn Camera> = match &config.frames_dir {
        Some(dir) => {
            let source = DirectorySource::open(dir, config.frame_size)
                .with_context(|| format!("Failed to open frame directory {}", dir.display()))?;
            Box::new(PooledCamera::new(source, config.buffers))
        }
        None => {
            let (width, height) = config.frame_size;
            Box::new(PooledCamera::new(
                SyntheticSource::new(width, height),
                config.buffers,
            ))
        }
    };
    debug!(
        "Camera ready: {}x{}, {} buffers",
        config.frame_size.0, config.frame_size.1, config.buffers
    );
    Ok(camera)
}

/// Tasks of one device run, torn down on drop in reverse start order.
struct RunningTasks {
    manager: Arc<ConnectivityManager>,
    stop: Arc<AtomicBool>,
    server: Option<StatusServer>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl RunningTasks {
    fn new(manager: Arc<ConnectivityManager>, stop: Arc<AtomicBool>) -> Self {
        Self {
            manager,
            stop,
            server: None,
            handles: Vec::new(),
        }
    }
}

impl Drop for RunningTasks {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for handle in self.handles.drain(..).rev() {
            let name = handle.thread().name().map(str::to_string);
            if handle.join().is_err() {
                error!("Task {:?} panicked", name);
            }
        }
        if let Some(server) = self.server.take() {
            server.stop();
        }
        self.manager.stop();
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn persistent_startup_errors_stop_the_supervisor() {
        let shutdown = AtomicBool::new(false);
        let mut runs = 0;
        let result = supervise(&shutdown, Duration::ZERO, |_| {
            runs += 1;
            Err(anyhow!("frames directory vanished"))
        });
        let err = result.unwrap_err();
        assert_eq!(runs, MAX_STARTUP_FAILURES);
        assert!(err.to_string().contains("frames directory vanished"));
    }

    #[test]
    fn requested_restarts_reset_the_failure_count() {
        let shutdown = AtomicBool::new(false);
        let mut runs = 0;
        let result = supervise(&shutdown, Duration::ZERO, |_| {
            runs += 1;
            match runs {
                12 => Ok(RunOutcome::Shutdown),
                n if n % 4 == 0 => Ok(RunOutcome::Restart("connectivity retries exhausted".into())),
                _ => Err(anyhow!("camera busy")),
            }
        });
        assert!(result.is_ok());
        assert_eq!(runs, 12);
    }

    #[test]
    fn shutdown_before_the_first_run_starts_nothing() {
        let shutdown = AtomicBool::new(true);
        let mut runs = 0;
        supervise(&shutdown, Duration::ZERO, |_| {
            runs += 1;
            Ok(RunOutcome::Shutdown)
        })
        .unwrap();
        assert_eq!(runs, 0);
    }
}
