use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_CONFIG_PATH: &str = "/etc/pktwatch.conf";
const ENV_PREFIX: &str = "PKTWATCH_";

const DEFAULT_LOOP: u32 = 1;
const DEFAULT_SNAPLEN: usize = 65535;
const DEFAULT_BUFFER_SIZE: usize = 4 * 1024 * 1024;
const DEFAULT_DHCP_PORTS: [u16; 2] = [67, 68];
const DEFAULT_TCP_MAX_BUFFER: usize = 65536;
const DEFAULT_FLOW_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_FLOW_PERIOD: Duration = Duration::from_secs(10);
const DEFAULT_MAX_SESSIONS: usize = 100;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Every key accepted in the config file. Each one can also be overridden by
/// an environment variable, e.g. `capture.device` by `PKTWATCH_CAPTURE_DEVICE`.
pub const KEYS: &[&str] = &[
    "capture.device",
    "capture.file",
    "capture.loop",
    "capture.top_speed",
    "capture.one_at_a_time",
    "capture.dumpfile",
    "capture.snaplen",
    "capture.buffer_size",
    "capture.pin_thread",
    "protocols.icmp.enabled",
    "protocols.dhcpv4.enabled",
    "protocols.dhcpv4.ports",
    "protocols.dhcpv4.send_errors",
    "protocols.tcp.max_buffer",
    "flows.enabled",
    "flows.timeout",
    "flows.period",
    "community_id.seed",
    "run.max_sessions",
    "management.enabled",
    "logging.level",
];

/// Where frames come from and how they are replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    pub device: Option<String>,
    pub file: Option<PathBuf>,
    /// Replay count for files, 0 loops forever.
    pub loop_count: u32,
    pub top_speed: bool,
    pub one_at_a_time: bool,
    pub dumpfile: Option<PathBuf>,
    pub snaplen: usize,
    pub buffer_size: usize,
    /// Run the whole session on the process-wide capture thread.
    pub pin_thread: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            file: None,
            loop_count: DEFAULT_LOOP,
            top_speed: false,
            one_at_a_time: false,
            dumpfile: None,
            snaplen: DEFAULT_SNAPLEN,
            buffer_size: DEFAULT_BUFFER_SIZE,
            pin_thread: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dhcpv4Config {
    pub enabled: bool,
    pub ports: Vec<u16>,
    /// Publish `status: Error` events for malformed messages.
    pub send_errors: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConfig {
    /// Payload bytes kept per direction of a connection.
    pub max_buffer: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolsConfig {
    pub icmp: IcmpConfig,
    pub dhcpv4: Dhcpv4Config,
    pub tcp: TcpConfig,
}

impl Default for ProtocolsConfig {
    fn default() -> Self {
        Self {
            icmp: IcmpConfig { enabled: true },
            dhcpv4: Dhcpv4Config {
                enabled: true,
                ports: DEFAULT_DHCP_PORTS.to_vec(),
                send_errors: true,
            },
            tcp: TcpConfig {
                max_buffer: DEFAULT_TCP_MAX_BUFFER,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowsConfig {
    /// Publish flow-summary events.
    pub enabled: bool,
    pub timeout: Duration,
    pub period: Duration,
}

impl Default for FlowsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: DEFAULT_FLOW_TIMEOUT,
            period: DEFAULT_FLOW_PERIOD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub capture: CaptureConfig,
    pub protocols: ProtocolsConfig,
    pub flows: FlowsConfig,
    pub community_id_seed: u16,
    /// Upper bound on concurrent capture sessions; sizes the error queue.
    pub max_sessions: usize,
    pub managed: bool,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            protocols: ProtocolsConfig::default(),
            flows: FlowsConfig::default(),
            community_id_seed: 0,
            max_sessions: DEFAULT_MAX_SESSIONS,
            managed: false,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Config {
    /// Load from `path` (or `PKTWATCH_CONFIG`, or the default location), then
    /// apply environment overrides.
    ///
    /// A missing file is not an error; the defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => PathBuf::from(
                std::env::var("PKTWATCH_CONFIG")
                    .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
            ),
        };

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::parse(&content)?
        } else {
            Self::default()
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Parse config file content on top of the defaults.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) => config.set(key.trim(), value.trim())?,
                None => {
                    return Err(ConfigError::InvalidValue {
                        key: line.to_string(),
                        value: String::new(),
                    })
                }
            }
        }
        Ok(config)
    }

    /// Apply `PKTWATCH_*` overrides looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for key in KEYS {
            if let Some(value) = lookup(&env_name(key)) {
                self.set(key, value.trim())?;
            }
        }
        Ok(())
    }

    /// Set one key from its textual value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "capture.device" => self.capture.device = non_empty(value),
            "capture.file" => self.capture.file = non_empty(value).map(PathBuf::from),
            "capture.loop" => self.capture.loop_count = parse_number(key, value)?,
            "capture.top_speed" => self.capture.top_speed = parse_bool(key, value)?,
            "capture.one_at_a_time" => self.capture.one_at_a_time = parse_bool(key, value)?,
            "capture.dumpfile" => self.capture.dumpfile = non_empty(value).map(PathBuf::from),
            "capture.snaplen" => self.capture.snaplen = parse_number(key, value)?,
            "capture.buffer_size" => self.capture.buffer_size = parse_number(key, value)?,
            "capture.pin_thread" => self.capture.pin_thread = parse_bool(key, value)?,
            "protocols.icmp.enabled" => self.protocols.icmp.enabled = parse_bool(key, value)?,
            "protocols.dhcpv4.enabled" => {
                self.protocols.dhcpv4.enabled = parse_bool(key, value)?
            }
            "protocols.dhcpv4.ports" => self.protocols.dhcpv4.ports = parse_ports(key, value)?,
            "protocols.dhcpv4.send_errors" => {
                self.protocols.dhcpv4.send_errors = parse_bool(key, value)?
            }
            "protocols.tcp.max_buffer" => {
                self.protocols.tcp.max_buffer = parse_number(key, value)?
            }
            "flows.enabled" => self.flows.enabled = parse_bool(key, value)?,
            "flows.timeout" => self.flows.timeout = parse_duration(key, value)?,
            "flows.period" => self.flows.period = parse_duration(key, value)?,
            "community_id.seed" => self.community_id_seed = parse_number(key, value)?,
            "run.max_sessions" => self.max_sessions = parse_number(key, value)?,
            "management.enabled" => self.managed = parse_bool(key, value)?,
            "logging.level" => self.log_level = value.to_string(),
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// Checks that do not depend on any single analyzer.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sessions == 0 {
            return Err(invalid("run.max_sessions", "0"));
        }
        if self.flows.timeout.is_zero() {
            return Err(invalid("flows.timeout", "0"));
        }
        if self.flows.period.is_zero() {
            return Err(invalid("flows.period", "0"));
        }
        if self.capture.snaplen == 0 {
            return Err(invalid("capture.snaplen", "0"));
        }
        Ok(())
    }
}

/// `capture.device` becomes `PKTWATCH_CAPTURE_DEVICE`.
pub fn env_name(key: &str) -> String {
    format!("{}{}", ENV_PREFIX, key.replace('.', "_").to_uppercase())
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| invalid(key, value))
}

fn parse_ports(key: &str, value: &str) -> Result<Vec<u16>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| match p.parse::<u16>() {
            Ok(port) if port != 0 => Ok(port),
            _ => Err(invalid(key, value)),
        })
        .collect()
}

/// Durations take an `ms`, `s` or `m` suffix; a bare number is seconds.
pub fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    let (number, unit_ms) = if let Some(n) = value.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = value.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = value.strip_suffix('m') {
        (n, 60_000)
    } else {
        (value, 1_000)
    };
    let n: u64 = number.trim().parse().map_err(|_| invalid(key, value))?;
    Ok(Duration::from_millis(n.saturating_mul(unit_ms)))
}
