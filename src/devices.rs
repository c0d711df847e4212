//! Serial device discovery for robot arms.
//!
//! Arms show up as USB serial nodes. Which node is the leader and which the
//! follower is decided by a saved hint, an optional probe command, or by
//! watching which node disappears while the operator unplugs an arm.

use comfy_table::{presets::UTF8_FULL, Cell, Table};
use std::fmt;
use std::process::{Command, Stdio};

/// Environment variable naming the probe command.
pub const PROBE_CMD_ENV: &str = "SOLO_PORT_PROBE";

/// Default number of unplug and replug rounds after a failed detection.
pub const DEFAULT_PORT_RETRIES: u32 = 1;

/// Which arm a port belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    Leader,
    Follower,
}

impl DeviceRole {
    /// Settings key holding this role's port.
    pub fn port_key(&self) -> &'static str {
        match self {
            DeviceRole::Leader => "leader_port",
            DeviceRole::Follower => "follower_port",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceRole::Leader => "leader",
            DeviceRole::Follower => "follower",
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of probing one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Role(DeviceRole),
    Unknown,
}

/// A port bound to a role for one launch. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub role: DeviceRole,
    pub path: String,
}

/// Bound on detection retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRetryPolicy {
    pub max_retries: u32,
}

impl Default for PortRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_PORT_RETRIES,
        }
    }
}

impl PortRetryPolicy {
    /// Detection attempts per role: the first scan plus one reconnect round per retry.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Source of candidate ports.
pub trait DeviceDiscovery {
    /// List candidate device paths.
    fn scan(&mut self) -> Vec<String>;

    /// Identify the arm on `path`, if possible.
    fn probe(&mut self, path: &str) -> Probe;
}

/// Globs serial device nodes and optionally probes them with an external command.
#[derive(Debug, Clone)]
pub struct SerialDiscovery {
    patterns: Vec<String>,
    probe_command: Option<Vec<String>>,
}

impl SerialDiscovery {
    pub fn new(probe_command: Option<&str>) -> Self {
        Self::with_patterns(default_patterns(), probe_command)
    }

    pub fn with_patterns<I, S>(patterns: I, probe_command: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let probe_command = probe_command
            .map(|cmd| cmd.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|parts| !parts.is_empty());
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
            probe_command,
        }
    }

    /// Discovery using `--probe-cmd` if given, else `$SOLO_PORT_PROBE`.
    pub fn from_env(probe_command: Option<&str>) -> Self {
        let from_env = std::env::var(PROBE_CMD_ENV).ok();
        Self::new(probe_command.or(from_env.as_deref()))
    }
}

fn default_patterns() -> Vec<&'static str> {
    if cfg!(target_os = "macos") {
        vec![
            "/dev/tty.usbmodem*",
            "/dev/tty.usbserial*",
            "/dev/cu.usbmodem*",
            "/dev/cu.usbserial*",
        ]
    } else {
        vec!["/dev/ttyACM*", "/dev/ttyUSB*"]
    }
}

impl DeviceDiscovery for SerialDiscovery {
    fn scan(&mut self) -> Vec<String> {
        let mut ports = Vec::new();
        for pattern in &self.patterns {
            match glob::glob(pattern) {
                Ok(paths) => ports.extend(
                    paths
                        .filter_map(Result::ok)
                        .map(|p| p.to_string_lossy().into_owned()),
                ),
                Err(e) => log::warn!("Bad port pattern '{}': {}", pattern, e),
            }
        }
        ports.sort();
        ports.dedup();
        log::debug!("Port scan found {:?}", ports);
        ports
    }

    fn probe(&mut self, path: &str) -> Probe {
        let Some((program, args)) = self.probe_command.as_ref().and_then(|c| c.split_first()) else {
            return Probe::Unknown;
        };
        let output = Command::new(program)
            .args(args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output();
        match output {
            Ok(o) if o.status.success() => parse_probe_output(&String::from_utf8_lossy(&o.stdout)),
            Ok(o) => {
                log::debug!("Probe of {} exited with {:?}", path, o.status.code());
                Probe::Unknown
            }
            Err(e) => {
                log::warn!("Failed to run port probe '{}': {}", program, e);
                Probe::Unknown
            }
        }
    }
}

/// Parse a probe command's stdout: the first non-empty line names the role.
pub fn parse_probe_output(stdout: &str) -> Probe {
    let first = stdout.lines().map(str::trim).find(|l| !l.is_empty());
    match first.map(str::to_ascii_lowercase).as_deref() {
        Some("leader") => Probe::Role(DeviceRole::Leader),
        Some("follower") => Probe::Role(DeviceRole::Follower),
        _ => Probe::Unknown,
    }
}

/// Outcome of one detection attempt for a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectAttempt {
    pub bound: Option<String>,
    /// Candidates seen by this attempt's scan, excluding taken paths.
    pub scanned: Vec<String>,
}

/// Run one scan and try to bind `role` without operator help.
///
/// Order: the hint if present and not probing as another role, then the first
/// candidate probing as `role`. Paths in `taken` are never bound.
pub fn detect_role(
    discovery: &mut dyn DeviceDiscovery,
    role: DeviceRole,
    hint: Option<&str>,
    taken: &[String],
) -> DetectAttempt {
    let scanned = scan_free(discovery, taken);

    if let Some(hint) = hint.filter(|h| scanned.iter().any(|p| p == h)) {
        match discovery.probe(hint) {
            Probe::Role(other) if other != role => {
                log::info!("Saved {} port {} answers as {}", role, hint, other);
            }
            _ => {
                return DetectAttempt {
                    bound: Some(hint.to_string()),
                    scanned,
                }
            }
        }
    }

    for candidate in scanned.iter().filter(|p| Some(p.as_str()) != hint) {
        if discovery.probe(candidate) == Probe::Role(role) {
            return DetectAttempt {
                bound: Some(candidate.clone()),
                scanned,
            };
        }
    }

    DetectAttempt {
        bound: None,
        scanned,
    }
}

/// Scan and drop paths already bound to another role.
pub fn scan_free(discovery: &mut dyn DeviceDiscovery, taken: &[String]) -> Vec<String> {
    discovery
        .scan()
        .into_iter()
        .filter(|p| !taken.contains(p))
        .collect()
}

/// Paths in `before` that are gone from `after`.
pub fn vanished(before: &[String], after: &[String]) -> Vec<String> {
    before.iter().filter(|p| !after.contains(p)).cloned().collect()
}

/// Paths in `after` that were not in `before`.
pub fn appeared(before: &[String], after: &[String]) -> Vec<String> {
    vanished(after, before)
}

/// Print scanned ports and their probe results.
pub fn print_ports(ports: &[(String, Probe)]) {
    if ports.is_empty() {
        println!("No serial devices found. Check the USB cables and power.");
        return;
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Port", "Arm"]);
    for (path, probe) in ports {
        let arm = match probe {
            Probe::Role(role) => role.as_str(),
            Probe::Unknown => "-",
        };
        table.add_row(vec![Cell::new(path), Cell::new(arm)]);
    }
    println!("{table}");
}
