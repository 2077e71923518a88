use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use audio_bridge::{CaptureConfig, SweepConfig};
use clap::{Args, Parser, Subcommand, ValueEnum};
use relay_client::{DEFAULT_RELAY_URL, RelayConfig};
use rtc_negotiator::WebRtcConfig;
use rtc_negotiator::rtc_engine::DEFAULT_STUN_SERVER;

use crate::telemetry::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "earshot",
    version,
    about = "Peer-to-peer audio calls over WebRTC with HTTP or relay signaling"
)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "EARSHOT_LOG_LEVEL",
        default_value_t = LogLevel::Info,
        global = true,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "EARSHOT_LOG_FILE",
        global = true,
        help = "Write logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Answer offers posted as JSON to `POST /offer`
    Serve(ServeArgs),
    /// Post an offer to an answer endpoint and apply the answer it returns
    Call(CallArgs),
    /// Create a relay session and answer whoever joins it
    Host(HostArgs),
    /// Join an existing relay session and send it an offer
    Join(JoinArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(long, env = "EARSHOT_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    #[command(flatten)]
    pub peer: PeerArgs,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Answer endpoint to post the offer to
    #[arg(long, env = "EARSHOT_ANSWER_URL", default_value = "http://localhost:8080/offer")]
    pub server: String,

    #[command(flatten)]
    pub peer: PeerArgs,
}

#[derive(Args, Debug)]
pub struct HostArgs {
    #[command(flatten)]
    pub relay: RelayArgs,

    #[command(flatten)]
    pub peer: PeerArgs,
}

#[derive(Args, Debug)]
pub struct JoinArgs {
    /// Session id printed by `earshot host`
    #[arg(value_name = "SESSION_ID")]
    pub session_id: String,

    #[command(flatten)]
    pub relay: RelayArgs,

    #[command(flatten)]
    pub peer: PeerArgs,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum SourceKind {
    /// Default input device
    #[default]
    Mic,
    /// Synthetic ping-pong sweep
    Tone,
    /// Send no audio
    None,
}

#[derive(Args, Debug, Clone)]
pub struct PeerArgs {
    /// Outbound audio source
    #[arg(long, value_enum, env = "EARSHOT_SOURCE", default_value_t = SourceKind::Mic)]
    pub source: SourceKind,

    /// Record received audio to a WAV file
    #[arg(long, value_name = "PATH", env = "EARSHOT_RECORD")]
    pub record: Option<PathBuf>,

    /// Close the call after this many seconds; otherwise wait for hangup or Ctrl-C
    #[arg(long, value_name = "SECS")]
    pub hold_secs: Option<u64>,

    #[arg(long, value_name = "MS", env = "EARSHOT_ICE_TIMEOUT_MS", default_value_t = 10_000)]
    pub ice_timeout_ms: u64,

    /// STUN/TURN urls; repeat for several
    #[arg(long = "stun", value_name = "URL", default_value = DEFAULT_STUN_SERVER)]
    pub stun: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RelayArgs {
    #[arg(long, value_name = "URL", env = "EARSHOT_RELAY_URL", default_value = DEFAULT_RELAY_URL)]
    pub relay_url: String,

    #[arg(long, value_name = "MS", env = "EARSHOT_POLL_INTERVAL_MS", default_value_t = 10_000)]
    pub poll_interval_ms: u64,

    #[arg(long, value_name = "MS", default_value_t = 5_000)]
    pub error_backoff_ms: u64,

    /// Give up after this many polls (default: poll until cancelled)
    #[arg(long, value_name = "N")]
    pub max_polls: Option<u32>,

    /// Give up after polling this long (default: poll until cancelled)
    #[arg(long, value_name = "SECS")]
    pub poll_deadline_secs: Option<u64>,

    /// Do not refresh our heartbeat while waiting
    #[arg(long)]
    pub no_heartbeat: bool,
}

impl RelayArgs {
    pub fn to_config(&self) -> RelayConfig {
        RelayConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            error_backoff: Duration::from_millis(self.error_backoff_ms),
            max_polls: self.max_polls,
            poll_deadline: self.poll_deadline_secs.map(Duration::from_secs),
            heartbeat_while_polling: !self.no_heartbeat,
            ..RelayConfig::default()
        }
    }
}

/// Everything needed to stand up one peer connection.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub webrtc: WebRtcConfig,
    pub source: SourceKind,
    pub capture: CaptureConfig,
    pub sweep: SweepConfig,
    pub record: Option<PathBuf>,
    pub hold: Option<Duration>,
    pub ice_timeout: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            webrtc: WebRtcConfig::default(),
            source: SourceKind::default(),
            capture: CaptureConfig::default(),
            sweep: SweepConfig::default(),
            record: None,
            hold: None,
            ice_timeout: Duration::from_millis(10_000),
        }
    }
}

impl PeerArgs {
    pub fn to_config(&self) -> PeerConfig {
        PeerConfig {
            webrtc: WebRtcConfig {
                ice_servers: self.stun.clone(),
            },
            source: self.source,
            record: self.record.clone(),
            hold: self.hold_secs.map(Duration::from_secs),
            ice_timeout: Duration::from_millis(self.ice_timeout_ms),
            ..PeerConfig::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub peer: PeerConfig,
}

impl ServeArgs {
    pub fn to_config(&self) -> ServeConfig {
        ServeConfig {
            bind: self.bind,
            peer: self.peer.to_config(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_requires_a_session_id() {
        let err = Cli::try_parse_from(["earshot", "join"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn serve_defaults_match_reference_deployment() {
        let cli = Cli::try_parse_from(["earshot", "serve"]).unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let config = args.to_config();
        assert_eq!(config.bind, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.peer.ice_timeout, Duration::from_secs(10));
        assert_eq!(config.peer.webrtc.ice_servers, vec![DEFAULT_STUN_SERVER.to_string()]);
        assert_eq!(config.peer.source, SourceKind::Mic);
        assert!(config.peer.hold.is_none());
    }

    #[test]
    fn relay_flags_bound_polling() {
        let cli = Cli::try_parse_from([
            "earshot",
            "join",
            "abc123",
            "--relay-url",
            "http://127.0.0.1:8787",
            "--max-polls",
            "4",
            "--no-heartbeat",
            "--source",
            "tone",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.logging.level, LogLevel::Debug);
        let Command::Join(args) = cli.command else {
            panic!("expected join");
        };
        assert_eq!(args.session_id, "abc123");
        assert_eq!(args.peer.source, SourceKind::Tone);
        let relay = args.relay.to_config();
        assert_eq!(relay.max_polls, Some(4));
        assert!(relay.poll_deadline.is_none());
        assert!(!relay.heartbeat_while_polling);
        assert_eq!(relay.poll_interval, Duration::from_secs(10));
    }
}
