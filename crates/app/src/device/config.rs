//! Configuration parsing for the device runtime.
//!
//! CLI arguments are validated once into a [`DeviceConfig`]; the running
//! tasks never look at flags again.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use clap::Args;
use glasses_core::{PipelineSettings, RetryPolicy, pipeline::DEFAULT_DEVICE_ID};
use reqwest::Url;

#[derive(Clone, Debug)]
/// Validated configuration shared by every task of one device run.
pub struct DeviceConfig {
    /// Capture pipeline timing, endpoint, and device identity.
    pub pipeline: PipelineSettings,
    /// Association retry limits.
    pub retry: RetryPolicy,
    /// How long the link may stay down before the watchdog escalates.
    pub stall_timeout: Duration,
    /// How long startup waits for the first association.
    pub startup_wait: Duration,
    pub camera: CameraConfig,
    pub network: ProbeSettings,
    /// Bind address of the status server; `None` disables it.
    pub status_addr: Option<SocketAddr>,
}

#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Directory of JPEG frames; a synthetic test pattern when absent.
    pub frames_dir: Option<PathBuf>,
    pub frame_size: (u32, u32),
    pub buffers: usize,
}

#[derive(Clone, Debug)]
/// Reachability probing used as the host's notion of "associated".
pub struct ProbeSettings {
    /// `host:port` of the inference service.
    pub target: String,
    pub connect_timeout: Duration,
    pub probe_interval: Duration,
    /// Delay before each probe, standing in for radio association time.
    pub association_delay: Duration,
}

/// CLI arguments accepted by the `run` and `config` subcommands.
#[derive(Debug, Args)]
pub struct DeviceCliArgs {
    /// Inference service endpoint receiving captured frames.
    #[arg(long = "endpoint", value_name = "URL", default_value = "http://127.0.0.1:5000/api/analyze")]
    pub endpoint: String,
    /// Identifier sent with every frame.
    #[arg(long = "device-id", value_name = "ID", default_value = DEFAULT_DEVICE_ID)]
    pub device_id: String,
    /// Interval between capture cycles.
    #[arg(long = "capture-interval-ms", value_name = "MS", default_value_t = 3_000)]
    pub capture_interval_ms: u64,
    /// Upper bound on one analysis request.
    #[arg(long = "request-timeout-ms", value_name = "MS", default_value_t = 10_000)]
    pub request_timeout_ms: u64,
    /// Pause before re-checking the link while offline.
    #[arg(long = "offline-backoff-ms", value_name = "MS", default_value_t = 1_000)]
    pub offline_backoff_ms: u64,
    /// Pause after a failed capture.
    #[arg(long = "capture-backoff-ms", value_name = "MS", default_value_t = 1_000)]
    pub capture_backoff_ms: u64,
    /// Association attempts per cycle before the network stack is restarted.
    #[arg(long = "max-attempts", value_name = "N", default_value_t = 5)]
    pub max_attempts: u32,
    /// Stack restart cycles before the device restarts.
    #[arg(long = "max-cycles", value_name = "N", default_value_t = 3)]
    pub max_cycles: u32,
    /// Time the link may stay down before the watchdog escalates.
    #[arg(long = "stall-timeout-ms", value_name = "MS", default_value_t = 60_000)]
    pub stall_timeout_ms: u64,
    /// Time startup waits for the first association.
    #[arg(long = "startup-wait-ms", value_name = "MS", default_value_t = 15_000)]
    pub startup_wait_ms: u64,
    /// Directory of JPEG files replayed as camera frames.
    #[arg(long = "frames", value_name = "DIR")]
    pub frames_dir: Option<PathBuf>,
    /// Frame width in pixels.
    #[arg(long = "frame-width", value_name = "PX", default_value_t = 160)]
    pub frame_width: u32,
    /// Frame height in pixels.
    #[arg(long = "frame-height", value_name = "PX", default_value_t = 120)]
    pub frame_height: u32,
    /// Number of camera frame buffers.
    #[arg(long = "frame-buffers", value_name = "N", default_value_t = 2)]
    pub frame_buffers: usize,
    /// TCP connect timeout of one reachability probe.
    #[arg(long = "probe-timeout-ms", value_name = "MS", default_value_t = 3_000)]
    pub probe_timeout_ms: u64,
    /// Interval between reachability probes while associated.
    #[arg(long = "probe-interval-ms", value_name = "MS", default_value_t = 5_000)]
    pub probe_interval_ms: u64,
    /// Simulated association time before each probe.
    #[arg(long = "association-delay-ms", value_name = "MS", default_value_t = 500)]
    pub association_delay_ms: u64,
    /// Status server bind address.
    #[arg(long = "status-addr", value_name = "ADDR", default_value = "0.0.0.0:8080")]
    pub status_addr: SocketAddr,
    /// Do not start the status server.
    #[arg(long = "no-status-server", action = clap::ArgAction::SetTrue)]
    pub no_status_server: bool,
}

impl TryFrom<DeviceCliArgs> for DeviceConfig {
    type Error = anyhow::Error;

    fn try_from(args: DeviceCliArgs) -> Result<Self> {
        let endpoint = Url::parse(&args.endpoint)
            .with_context(|| format!("--endpoint is not a valid URL: {}", args.endpoint))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            bail!("--endpoint must use http:// or https://");
        }
        let host = endpoint
            .host_str()
            .ok_or_else(|| anyhow!("--endpoint must name a host"))?;
        let port = endpoint
            .port_or_known_default()
            .ok_or_else(|| anyhow!("--endpoint has no usable port"))?;
        let target = if host.contains(':') {
            format!("[{}]:{port}", host.trim_matches(|c| c == '[' || c == ']'))
        } else {
            format!("{host}:{port}")
        };

        if args.device_id.trim().is_empty() {
            bail!("--device-id must not be empty");
        }

        for (flag, value) in [
            ("--capture-interval-ms", args.capture_interval_ms),
            ("--request-timeout-ms", args.request_timeout_ms),
            ("--offline-backoff-ms", args.offline_backoff_ms),
            ("--capture-backoff-ms", args.capture_backoff_ms),
            ("--stall-timeout-ms", args.stall_timeout_ms),
            ("--probe-timeout-ms", args.probe_timeout_ms),
            ("--probe-interval-ms", args.probe_interval_ms),
        ] {
            if value == 0 {
                bail!("{flag} must be positive");
            }
        }

        if args.max_attempts == 0 {
            bail!("--max-attempts must be at least 1");
        }
        if args.max_cycles == 0 {
            bail!("--max-cycles must be at least 1");
        }
        if args.frame_buffers == 0 {
            bail!("--frame-buffers must be at least 1");
        }
        if args.frame_width == 0 || args.frame_height == 0 {
            bail!("Frame width and height must be positive integers");
        }
        if let Some(dir) = &args.frames_dir {
            if !dir.is_dir() {
                bail!("--frames must be a directory: {}", dir.display());
            }
        }

        Ok(Self {
            pipeline: PipelineSettings {
                endpoint: endpoint.to_string(),
                device_id: args.device_id,
                capture_interval: Duration::from_millis(args.capture_interval_ms),
                request_timeout: Duration::from_millis(args.request_timeout_ms),
                offline_backoff: Duration::from_millis(args.offline_backoff_ms),
                capture_backoff: Duration::from_millis(args.capture_backoff_ms),
            },
            retry: RetryPolicy::new(args.max_attempts, args.max_cycles),
            stall_timeout: Duration::from_millis(args.stall_timeout_ms),
            startup_wait: Duration::from_millis(args.startup_wait_ms),
            camera: CameraConfig {
                frames_dir: args.frames_dir,
                frame_size: (args.frame_width, args.frame_height),
                buffers: args.frame_buffers,
            },
            network: ProbeSettings {
                target,
                connect_timeout: Duration::from_millis(args.probe_timeout_ms),
                probe_interval: Duration::from_millis(args.probe_interval_ms),
                association_delay: Duration::from_millis(args.association_delay_ms),
            },
            status_addr: (!args.no_status_server).then_some(args.status_addr),
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: DeviceCliArgs,
    }

    fn parse(extra: &[&str]) -> Result<DeviceConfig> {
        let argv = std::iter::once("glasses").chain(extra.iter().copied());
        DeviceConfig::try_from(TestCli::try_parse_from(argv)?.args)
    }

    #[test]
    fn defaults_match_the_reference_device() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.pipeline.capture_interval, Duration::from_millis(3_000));
        assert_eq!(config.pipeline.request_timeout, Duration::from_millis(10_000));
        assert_eq!(config.pipeline.device_id, "esp32_glasses_001");
        assert_eq!(config.camera.buffers, 2);
        assert_eq!(config.camera.frame_size, (160, 120));
        assert_eq!(config.retry, RetryPolicy::new(5, 3));
        assert_eq!(config.network.target, "127.0.0.1:5000");
        assert!(config.status_addr.is_some());
    }

    #[test]
    fn probe_target_uses_the_scheme_default_port() {
        let config = parse(&["--endpoint", "https://vision.example.com/api/analyze"]).unwrap();
        assert_eq!(config.network.target, "vision.example.com:443");
    }

    #[test]
    fn rejects_non_http_endpoints() {
        let err = parse(&["--endpoint", "ftp://example.com/x"]).unwrap_err();
        assert!(err.to_string().contains("http"));
        assert!(parse(&["--endpoint", "not a url"]).is_err());
    }

    #[test]
    fn rejects_zero_limits() {
        assert!(parse(&["--max-attempts", "0"]).is_err());
        assert!(parse(&["--max-cycles", "0"]).is_err());
        assert!(parse(&["--frame-buffers", "0"]).is_err());
        assert!(parse(&["--capture-interval-ms", "0"]).is_err());
    }

    #[test]
    fn status_server_can_be_disabled() {
        let config = parse(&["--no-status-server"]).unwrap();
        assert!(config.status_addr.is_none());
    }

    #[test]
    fn missing_frames_directory_is_rejected() {
        assert!(parse(&["--frames", "/definitely/not/here"]).is_err());
    }
}
