//! Harness configuration

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_SNAPLEN: i32 = 1600;
pub const DEFAULT_TARGET_HOST: &str = "8.8.8.8";
/// UDP discard port
pub const DEFAULT_TARGET_PORT: u16 = 9;
pub const DEFAULT_PAYLOAD: &[u8] = b"test packet, please ignore";
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);
pub const DEFAULT_FAST_DEADLINE: Duration = Duration::from_secs(1);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(250);

pub const INTERFACE_ENV: &str = "CAPPROBE_INTERFACE";
pub const FAST_ENV: &str = "CAPPROBE_FAST";

/// Which interface to capture on
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InterfaceSelection {
    /// First device reported by libpcap
    #[default]
    Auto,
    Named(String),
}

impl FromStr for InterfaceSelection {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(match s {
            "" | "auto" | "first" => InterfaceSelection::Auto,
            name => InterfaceSelection::Named(name.to_string()),
        })
    }
}

impl fmt::Display for InterfaceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceSelection::Auto => f.write_str("auto"),
            InterfaceSelection::Named(name) => f.write_str(name),
        }
    }
}

/// When a run is allowed to finish with a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PassPolicy {
    /// The first matching packet ends the run
    #[default]
    FirstPacket,
    /// Keep logging packets until the (possibly shortened) deadline
    UntilDeadline,
}

/// Live handle parameters
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub interface: InterfaceSelection,
    pub snaplen: i32,
    pub promisc: bool,
    /// Slice length of a single blocking read; idle slices are never surfaced
    pub read_timeout: Duration,
    pub immediate: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            interface: InterfaceSelection::Auto,
            snaplen: DEFAULT_SNAPLEN,
            promisc: false,
            read_timeout: DEFAULT_READ_TIMEOUT,
            immediate: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub capture: CaptureConfig,
    pub target_host: String,
    pub target_port: u16,
    pub payload: Vec<u8>,
    /// Overrides the filter derived from the probe target
    pub filter: Option<String>,
    pub deadline: Duration,
    pub fast: bool,
    pub fast_deadline: Duration,
    pub policy: PassPolicy,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            capture: CaptureConfig::default(),
            target_host: DEFAULT_TARGET_HOST.to_string(),
            target_port: DEFAULT_TARGET_PORT,
            payload: DEFAULT_PAYLOAD.to_vec(),
            filter: None,
            deadline: DEFAULT_DEADLINE,
            fast: false,
            fast_deadline: DEFAULT_FAST_DEADLINE,
            policy: PassPolicy::FirstPacket,
        }
    }
}

impl HarnessConfig {
    /// Defaults, with the interface and fast mode taken from
    /// `CAPPROBE_INTERFACE` and `CAPPROBE_FAST` when set.
    pub fn from_env() -> Self {
        let mut config = HarnessConfig::default();
        if let Ok(iface) = std::env::var(INTERFACE_ENV) {
            config.capture.interface = iface.parse().unwrap_or_default();
        }
        if let Ok(fast) = std::env::var(FAST_ENV) {
            config.fast = parse_flag(&fast);
        }
        config
    }

    pub fn with_interface(mut self, interface: InterfaceSelection) -> Self {
        self.capture.interface = interface;
        self
    }

    pub fn with_target(mut self, host: impl Into<String>, port: u16) -> Self {
        self.target_host = host.into();
        self.target_port = port;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_fast(mut self, fast_deadline: Duration) -> Self {
        self.fast = true;
        self.fast_deadline = fast_deadline;
        self
    }

    pub fn with_policy(mut self, policy: PassPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// `host H && port P` for the probe destination unless overridden
    pub fn filter_expression(&self) -> String {
        match &self.filter {
            Some(filter) => filter.clone(),
            None => format!("host {} && port {}", self.target_host, self.target_port),
        }
    }

    /// `host:port`, bracketing IPv6 literals
    pub fn target(&self) -> String {
        if self.target_host.contains(':') {
            format!("[{}]:{}", self.target_host, self.target_port)
        } else {
            format!("{}:{}", self.target_host, self.target_port)
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "y" | "yes" | "t" | "true" | "on"
    )
}
