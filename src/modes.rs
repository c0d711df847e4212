//! Workflow modes and the parameters each one needs.
//!
//! A mode's schema lists its parameters in prompt order. Defaults may depend
//! on parameters resolved earlier (e.g. `leader_id` on `robot_type`) or on
//! the saved configuration (e.g. the serve port).

use std::fmt;
use std::str::FromStr;

use crate::config::Configuration;
use crate::devices::DeviceRole;
use crate::robots::{validate_repo_id, RobotType};
use crate::servers::ServerType;
use crate::settings::{ModeSettings, Scalar, ScalarKind};

/// A workflow the tool can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Teleop,
    Record,
    Replay,
    Train,
    Inference,
    Calibrate,
    Motors,
    Serve,
}

impl Mode {
    pub const ALL: [Mode; 8] = [
        Mode::Teleop,
        Mode::Record,
        Mode::Replay,
        Mode::Train,
        Mode::Inference,
        Mode::Calibrate,
        Mode::Motors,
        Mode::Serve,
    ];

    /// Key under `modes` in the config file.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Teleop => "teleop",
            Mode::Record => "record",
            Mode::Replay => "replay",
            Mode::Train => "train",
            Mode::Inference => "inference",
            Mode::Calibrate => "calibrate",
            Mode::Motors => "motors",
            Mode::Serve => "serve",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Mode::Teleop => "Teleoperation",
            Mode::Record => "Recording",
            Mode::Replay => "Replay",
            Mode::Train => "Training",
            Mode::Inference => "Inference",
            Mode::Calibrate => "Calibration",
            Mode::Motors => "Motor setup",
            Mode::Serve => "Model serving",
        }
    }

    /// Parameters of this mode, in prompt order.
    pub fn schema(&self) -> Vec<ParamSpec> {
        match self {
            Mode::Teleop => vec![
                robot_type(),
                port(DeviceRole::Leader),
                port(DeviceRole::Follower),
                arm_id(DeviceRole::Leader),
                arm_id(DeviceRole::Follower),
                ParamSpec::new("fps", "Control loop FPS", ScalarKind::Int)
                    .check(Check::Range(1, 240))
                    .default_to("60"),
                ParamSpec::new("display_data", "Display live data", ScalarKind::Bool)
                    .default_to("true"),
            ],
            Mode::Record => vec![
                robot_type(),
                port(DeviceRole::Leader),
                port(DeviceRole::Follower),
                arm_id(DeviceRole::Leader),
                arm_id(DeviceRole::Follower),
                dataset_repo_id(),
                task_description(),
                ParamSpec::new("episode_time", "Episode duration (seconds)", ScalarKind::Int)
                    .check(Check::Range(1, 3600))
                    .default_to("60"),
                ParamSpec::new("reset_time", "Reset duration between episodes (seconds)", ScalarKind::Int)
                    .check(Check::Range(0, 600))
                    .default_to("10"),
                ParamSpec::new("num_episodes", "Number of episodes", ScalarKind::Int)
                    .check(Check::Range(1, 10_000))
                    .default_to("10"),
                fps(),
                ParamSpec::new("push_to_hub", "Push dataset to the Hugging Face Hub", ScalarKind::Bool)
                    .default_to("false"),
                ParamSpec::new("should_resume", "Resume an existing dataset", ScalarKind::Bool)
                    .default_to("false"),
            ],
            Mode::Replay => vec![
                robot_type(),
                port(DeviceRole::Follower),
                arm_id(DeviceRole::Follower),
                dataset_repo_id(),
                ParamSpec::new("episode", "Episode to replay", ScalarKind::Int)
                    .check(Check::Range(0, i64::MAX))
                    .default_to("0"),
                ParamSpec::new("play_sounds", "Play sounds", ScalarKind::Bool).default_to("true"),
            ],
            Mode::Train => vec![
                ParamSpec::new("dataset_repo_id", "Dataset repo id", ScalarKind::Text)
                    .check(Check::RepoId)
                    .derived(last_recorded_dataset),
                ParamSpec::new("policy_type", "Policy type", ScalarKind::Text)
                    .check(Check::OneOf(POLICY_TYPES))
                    .default_to("act"),
                ParamSpec::new("output_dir", "Output directory", ScalarKind::Text)
                    .check(Check::NonEmpty)
                    .depends_on(&["policy_type"])
                    .derived(|resolved, _| {
                        resolved
                            .get_str("policy_type")
                            .map(|policy| format!("outputs/train/{}", policy))
                    }),
                ParamSpec::new("steps", "Training steps", ScalarKind::Int)
                    .check(Check::Range(1, 10_000_000))
                    .default_to("20000"),
                ParamSpec::new("batch_size", "Batch size", ScalarKind::Int)
                    .check(Check::Range(1, 4096))
                    .default_to("8"),
                ParamSpec::new("push_to_hub", "Push policy to the Hugging Face Hub", ScalarKind::Bool)
                    .default_to("false"),
            ],
            Mode::Inference => vec![
                robot_type(),
                port(DeviceRole::Leader),
                port(DeviceRole::Follower),
                arm_id(DeviceRole::Leader),
                arm_id(DeviceRole::Follower),
                ParamSpec::new("policy_path", "Policy path or Hub id", ScalarKind::Text)
                    .check(Check::NonEmpty)
                    .derived(last_trained_policy),
                task_description(),
                ParamSpec::new("inference_time", "Run duration (seconds)", ScalarKind::Int)
                    .check(Check::Range(1, 3600))
                    .default_to("60"),
                fps(),
                ParamSpec::new("use_teleoperation", "Allow leader-arm takeover", ScalarKind::Bool)
                    .default_to("false"),
            ],
            Mode::Calibrate => vec![
                robot_type(),
                arm("Arm to calibrate (leader/follower)"),
                port(DeviceRole::Leader),
                port(DeviceRole::Follower),
                ParamSpec::new("arm_id", "Arm id", ScalarKind::Text)
                    .check(Check::NonEmpty)
                    .depends_on(&["robot_type", "arm"])
                    .derived(|resolved, _| {
                        Some(format!(
                            "{}_{}",
                            resolved.get_str("robot_type")?,
                            resolved.get_str("arm")?
                        ))
                    }),
            ],
            Mode::Motors => vec![
                robot_type(),
                arm("Arm to set up (leader/follower)"),
                port(DeviceRole::Leader),
                port(DeviceRole::Follower),
            ],
            Mode::Serve => vec![
                ParamSpec::new("server", "Server (ollama/vllm/llama.cpp)", ScalarKind::Text)
                    .check(Check::Server)
                    .derived(|_, config| {
                        Some(config.server.preferred().unwrap_or(ServerType::Ollama).to_string())
                    }),
                ParamSpec::new("model", "Model", ScalarKind::Text)
                    .check(Check::NonEmpty)
                    .depends_on(&["server"])
                    .derived(|resolved, _| {
                        let server: ServerType = resolved.get_str("server")?.parse().ok()?;
                        Some(server.default_model().to_string())
                    }),
                ParamSpec::new("port", "Port", ScalarKind::Int)
                    .check(Check::Range(1, 65535))
                    .depends_on(&["server"])
                    .derived(|resolved, config| {
                        let server: ServerType = resolved.get_str("server")?.parse().ok()?;
                        Some(config.server.default_port(server).to_string())
                    }),
            ],
        }
    }

    /// Device roles that must be bound before launching with `settings`.
    pub fn roles(&self, settings: &ModeSettings) -> Vec<DeviceRole> {
        match self {
            Mode::Teleop | Mode::Record => vec![DeviceRole::Leader, DeviceRole::Follower],
            Mode::Replay => vec![DeviceRole::Follower],
            Mode::Inference if settings.get_bool("use_teleoperation") == Some(true) => {
                vec![DeviceRole::Leader, DeviceRole::Follower]
            }
            Mode::Inference => vec![DeviceRole::Follower],
            Mode::Calibrate | Mode::Motors if settings.get_str("arm") == Some("leader") => {
                vec![DeviceRole::Leader]
            }
            Mode::Calibrate | Mode::Motors => vec![DeviceRole::Follower],
            Mode::Train | Mode::Serve => Vec::new(),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("Unknown mode '{}'", s))
    }
}

pub const POLICY_TYPES: &[&str] = &["act", "diffusion", "pi0", "smolvla"];

/// Constraint applied after parsing a value into its kind.
#[derive(Debug, Clone, Copy)]
pub enum Check {
    Any,
    NonEmpty,
    Range(i64, i64),
    OneOf(&'static [&'static str]),
    RepoId,
    Robot,
    Server,
}

/// Where a parameter's default comes from.
#[derive(Clone, Copy)]
pub enum DefaultValue {
    None,
    Fixed(&'static str),
    Derived(fn(&ModeSettings, &Configuration) -> Option<String>),
}

/// One parameter of a mode.
#[derive(Clone)]
pub struct ParamSpec {
    pub key: &'static str,
    pub label: &'static str,
    pub kind: ScalarKind,
    pub check: Check,
    pub default: DefaultValue,
    /// Set for device port parameters, which are resolved by detection
    /// rather than prompted.
    pub port_for: Option<DeviceRole>,
    /// Parameters the default is computed from. A saved value is only
    /// offered while all of them keep their saved values.
    pub parents: &'static [&'static str],
}

impl fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamSpec")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("check", &self.check)
            .field("port_for", &self.port_for)
            .field("parents", &self.parents)
            .finish()
    }
}

impl ParamSpec {
    pub fn new(key: &'static str, label: &'static str, kind: ScalarKind) -> Self {
        Self {
            key,
            label,
            kind,
            check: Check::Any,
            default: DefaultValue::None,
            port_for: None,
            parents: &[],
        }
    }

    pub fn check(mut self, check: Check) -> Self {
        self.check = check;
        self
    }

    pub fn default_to(mut self, value: &'static str) -> Self {
        self.default = DefaultValue::Fixed(value);
        self
    }

    pub fn derived(mut self, f: fn(&ModeSettings, &Configuration) -> Option<String>) -> Self {
        self.default = DefaultValue::Derived(f);
        self
    }

    pub fn depends_on(mut self, parents: &'static [&'static str]) -> Self {
        self.parents = parents;
        self
    }

    pub fn is_port(&self) -> bool {
        self.port_for.is_some()
    }

    /// True when a parent resolved to something other than what was saved
    /// alongside `saved`, which makes the saved value of this parameter stale.
    pub fn parents_changed(&self, saved: &ModeSettings, resolved: &ModeSettings) -> bool {
        self.parents.iter().any(|key| saved.get(key) != resolved.get(key))
    }

    /// The arm whose id this parameter holds, if it is an arm id.
    pub fn arm_id_role(&self, resolved: &ModeSettings) -> Option<DeviceRole> {
        match self.key {
            "leader_id" => Some(DeviceRole::Leader),
            "follower_id" => Some(DeviceRole::Follower),
            "arm_id" if resolved.get_str("arm") == Some("leader") => Some(DeviceRole::Leader),
            "arm_id" => Some(DeviceRole::Follower),
            _ => None,
        }
    }

    /// Parse and check operator or flag input. Returns the normalised value.
    pub fn validate(&self, input: &str) -> Result<Scalar, String> {
        let value = self.kind.parse(input)?;
        match (self.check, &value) {
            (Check::Any, _) => Ok(value),
            (Check::NonEmpty, Scalar::Text(s)) if s.is_empty() => {
                Err(format!("{} cannot be empty", self.label))
            }
            (Check::NonEmpty, _) => Ok(value),
            (Check::Range(min, max), Scalar::Int(n)) if *n < min || *n > max => {
                Err(format!("{} must be between {} and {}", self.label, min, max))
            }
            (Check::Range(..), _) => Ok(value),
            (Check::OneOf(options), Scalar::Text(s)) => {
                let lower = s.to_ascii_lowercase();
                if options.contains(&lower.as_str()) {
                    Ok(Scalar::Text(lower))
                } else {
                    Err(format!("{} must be one of: {}", self.label, options.join(", ")))
                }
            }
            (Check::RepoId, Scalar::Text(s)) => validate_repo_id(s).map(Scalar::Text),
            (Check::Robot, Scalar::Text(s)) => s
                .parse::<RobotType>()
                .map(|rt| Scalar::Text(rt.as_str().to_string())),
            (Check::Server, Scalar::Text(s)) => s
                .parse::<ServerType>()
                .map(|server| Scalar::Text(server.as_str().to_string())),
            (_, _) => Ok(value),
        }
    }

    /// Default for this parameter given what has been resolved so far.
    /// Defaults that fail validation are discarded.
    pub fn default_value(&self, resolved: &ModeSettings, config: &Configuration) -> Option<Scalar> {
        let raw = match self.default {
            DefaultValue::None => return None,
            DefaultValue::Fixed(value) => value.to_string(),
            DefaultValue::Derived(f) => f(resolved, config)?,
        };
        self.validate(&raw).ok()
    }
}

fn robot_type() -> ParamSpec {
    ParamSpec::new("robot_type", "Robot type (so100/so101/koch)", ScalarKind::Text)
        .check(Check::Robot)
        .default_to("so101")
}

fn arm(label: &'static str) -> ParamSpec {
    ParamSpec::new("arm", label, ScalarKind::Text)
        .check(Check::OneOf(&["leader", "follower"]))
        .default_to("follower")
}

fn port(role: DeviceRole) -> ParamSpec {
    let (key, label) = match role {
        DeviceRole::Leader => ("leader_port", "Leader arm port"),
        DeviceRole::Follower => ("follower_port", "Follower arm port"),
    };
    ParamSpec {
        port_for: Some(role),
        ..ParamSpec::new(key, label, ScalarKind::Text).check(Check::NonEmpty)
    }
}

fn arm_id(role: DeviceRole) -> ParamSpec {
    match role {
        DeviceRole::Leader => ParamSpec::new("leader_id", "Leader arm id", ScalarKind::Text)
            .check(Check::NonEmpty)
            .depends_on(&["robot_type"])
            .derived(|resolved, _| resolved.get_str("robot_type").map(|rt| format!("{}_leader", rt))),
        DeviceRole::Follower => ParamSpec::new("follower_id", "Follower arm id", ScalarKind::Text)
            .check(Check::NonEmpty)
            .depends_on(&["robot_type"])
            .derived(|resolved, _| resolved.get_str("robot_type").map(|rt| format!("{}_follower", rt))),
    }
}

fn dataset_repo_id() -> ParamSpec {
    ParamSpec::new("dataset_repo_id", "Dataset repo id", ScalarKind::Text)
        .check(Check::RepoId)
        .derived(|resolved, _| {
            resolved
                .get_str("robot_type")
                .map(|rt| format!("local/{}_dataset", rt))
        })
}

fn task_description() -> ParamSpec {
    ParamSpec::new("task_description", "Task description", ScalarKind::Text)
        .check(Check::NonEmpty)
        .default_to("Pick up the object and place it in the box")
}

fn fps() -> ParamSpec {
    ParamSpec::new("fps", "Recording FPS", ScalarKind::Int)
        .check(Check::Range(1, 240))
        .default_to("30")
}

fn last_recorded_dataset(_: &ModeSettings, config: &Configuration) -> Option<String> {
    config
        .modes
        .get(Mode::Record.as_str())
        .and_then(|m| m.get_str("dataset_repo_id"))
        .map(str::to_string)
}

fn last_trained_policy(_: &ModeSettings, config: &Configuration) -> Option<String> {
    config
        .modes
        .get(Mode::Train.as_str())
        .and_then(|m| m.get_str("output_dir"))
        .map(|dir| format!("{}/checkpoints/last/pretrained_model", dir.trim_end_matches('/')))
}
