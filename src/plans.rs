//! Command lines for each mode.
//!
//! Robotics modes run the LeRobot console scripts; `serve` runs the chosen
//! backend. A plan is built from fully resolved settings, with port bindings
//! already applied.

use std::fmt;

use crate::modes::Mode;
use crate::robots::RobotType;
use crate::servers::ServerType;
use crate::settings::ModeSettings;

/// Errors building a command line from settings.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PlanError {
    #[error("missing parameter '{0}'")]
    Missing(&'static str),

    #[error("invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Host facts that affect command lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanContext {
    pub use_gpu: bool,
}

/// A program, its arguments and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPlan {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandPlan {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    /// Append `--key=value`.
    pub fn flag(&mut self, key: &str, value: impl fmt::Display) -> &mut Self {
        self.args.push(format!("--{}={}", key, value));
        self
    }

    pub fn env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for CommandPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{}={} ", key, quote(value))?;
        }
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

fn quote(s: &str) -> String {
    if s.is_empty() || s.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'') {
        format!("'{}'", s.replace('\'', r"'\''"))
    } else {
        s.to_string()
    }
}

/// Build the command line for `mode` from resolved settings.
pub fn build(mode: Mode, params: &ModeSettings, ctx: PlanContext) -> Result<CommandPlan, PlanError> {
    match mode {
        Mode::Teleop => {
            let mut plan = CommandPlan::new("lerobot-teleoperate");
            arm_args(&mut plan, params, Arm::Follower)?;
            arm_args(&mut plan, params, Arm::Leader)?;
            plan.flag("fps", value(params, "fps")?)
                .flag("display_data", value(params, "display_data")?);
            Ok(plan)
        }
        Mode::Record => {
            let mut plan = CommandPlan::new("lerobot-record");
            arm_args(&mut plan, params, Arm::Follower)?;
            arm_args(&mut plan, params, Arm::Leader)?;
            plan.flag("dataset.repo_id", value(params, "dataset_repo_id")?)
                .flag("dataset.single_task", value(params, "task_description")?)
                .flag("dataset.num_episodes", value(params, "num_episodes")?)
                .flag("dataset.episode_time_s", value(params, "episode_time")?)
                .flag("dataset.reset_time_s", value(params, "reset_time")?)
                .flag("dataset.fps", value(params, "fps")?)
                .flag("dataset.push_to_hub", value(params, "push_to_hub")?)
                .flag("resume", value(params, "should_resume")?);
            Ok(plan)
        }
        Mode::Replay => {
            let mut plan = CommandPlan::new("lerobot-replay");
            arm_args(&mut plan, params, Arm::Follower)?;
            plan.flag("dataset.repo_id", value(params, "dataset_repo_id")?)
                .flag("dataset.episode", value(params, "episode")?)
                .flag("play_sounds", value(params, "play_sounds")?);
            Ok(plan)
        }
        Mode::Train => {
            let mut plan = CommandPlan::new("lerobot-train");
            plan.flag("dataset.repo_id", value(params, "dataset_repo_id")?)
                .flag("policy.type", value(params, "policy_type")?)
                .flag("output_dir", value(params, "output_dir")?)
                .flag("steps", value(params, "steps")?)
                .flag("batch_size", value(params, "batch_size")?)
                .flag("policy.push_to_hub", value(params, "push_to_hub")?);
            Ok(plan)
        }
        Mode::Inference => {
            let robot = robot_type(params)?;
            let mut plan = CommandPlan::new("lerobot-record");
            arm_args(&mut plan, params, Arm::Follower)?;
            if params.get_bool("use_teleoperation") == Some(true) {
                arm_args(&mut plan, params, Arm::Leader)?;
            }
            plan.flag("policy.path", value(params, "policy_path")?)
                .flag("dataset.single_task", value(params, "task_description")?)
                .flag("dataset.repo_id", format!("local/eval_{}", robot))
                .flag("dataset.episode_time_s", value(params, "inference_time")?)
                .flag("dataset.num_episodes", 1)
                .flag("dataset.fps", value(params, "fps")?)
                .flag("dataset.push_to_hub", false);
            Ok(plan)
        }
        Mode::Calibrate => {
            let mut plan = CommandPlan::new("lerobot-calibrate");
            single_arm_args(&mut plan, params, Some(value(params, "arm_id")?))?;
            Ok(plan)
        }
        Mode::Motors => {
            let mut plan = CommandPlan::new("lerobot-setup-motors");
            single_arm_args(&mut plan, params, None)?;
            Ok(plan)
        }
        Mode::Serve => serve_plan(params, ctx),
    }
}

fn serve_plan(params: &ModeSettings, ctx: PlanContext) -> Result<CommandPlan, PlanError> {
    let server: ServerType = value(params, "server")?
        .parse()
        .map_err(|reason| PlanError::Invalid { key: "server", reason })?;
    let model = value(params, "model")?;
    let port = value(params, "port")?;

    let plan = match server {
        ServerType::Ollama => {
            let mut plan = CommandPlan::new("ollama");
            plan.arg("serve").env("OLLAMA_HOST", format!("127.0.0.1:{}", port));
            plan
        }
        ServerType::Vllm => {
            let mut plan = CommandPlan::new("docker");
            plan.arg("run").arg("--rm");
            if ctx.use_gpu {
                plan.arg("--gpus").arg("all");
            }
            plan.arg("-p")
                .arg(format!("{}:8000", port))
                .arg("vllm/vllm-openai:latest")
                .arg("--model")
                .arg(model);
            plan
        }
        ServerType::LlamaCpp => {
            let mut plan = CommandPlan::new("llama-server");
            plan.arg("-hf").arg(model).arg("--port").arg(port);
            plan
        }
    };
    Ok(plan)
}

#[derive(Clone, Copy)]
enum Arm {
    Leader,
    Follower,
}

fn arm_args(plan: &mut CommandPlan, params: &ModeSettings, arm: Arm) -> Result<(), PlanError> {
    let robot = robot_type(params)?;
    match arm {
        Arm::Follower => plan
            .flag("robot.type", robot.follower_driver())
            .flag("robot.port", value(params, "follower_port")?)
            .flag("robot.id", value(params, "follower_id")?),
        Arm::Leader => plan
            .flag("teleop.type", robot.leader_driver())
            .flag("teleop.port", value(params, "leader_port")?)
            .flag("teleop.id", value(params, "leader_id")?),
    };
    Ok(())
}

/// Device arguments for the arm named by the `arm` parameter.
fn single_arm_args(plan: &mut CommandPlan, params: &ModeSettings, id: Option<String>) -> Result<(), PlanError> {
    let robot = robot_type(params)?;
    let (prefix, driver, port_key) = match value(params, "arm")?.as_str() {
        "leader" => ("teleop", robot.leader_driver(), "leader_port"),
        "follower" => ("robot", robot.follower_driver(), "follower_port"),
        other => {
            return Err(PlanError::Invalid {
                key: "arm",
                reason: format!("expected leader or follower, got '{}'", other),
            })
        }
    };
    plan.flag(&format!("{}.type", prefix), driver)
        .flag(&format!("{}.port", prefix), value(params, port_key)?);
    if let Some(id) = id {
        plan.flag(&format!("{}.id", prefix), id);
    }
    Ok(())
}

fn robot_type(params: &ModeSettings) -> Result<RobotType, PlanError> {
    value(params, "robot_type")?
        .parse()
        .map_err(|reason| PlanError::Invalid {
            key: "robot_type",
            reason,
        })
}

fn value(params: &ModeSettings, key: &'static str) -> Result<String, PlanError> {
    params
        .get(key)
        .map(|v| v.to_string())
        .ok_or(PlanError::Missing(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn teleop_params() -> ModeSettings {
        [
            ("robot_type", "so101"),
            ("leader_port", "/dev/ttyACM0"),
            ("follower_port", "/dev/ttyACM1"),
            ("leader_id", "so101_leader"),
            ("follower_id", "so101_follower"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_teleop_plan() {
        let mut params = teleop_params();
        params.insert("fps", 60i64);
        params.insert("display_data", true);

        let plan = build(Mode::Teleop, &params, PlanContext::default()).unwrap();
        assert_eq!(plan.program, "lerobot-teleoperate");
        assert_eq!(
            plan.args,
            vec![
                "--robot.type=so101_follower",
                "--robot.port=/dev/ttyACM1",
                "--robot.id=so101_follower",
                "--teleop.type=so101_leader",
                "--teleop.port=/dev/ttyACM0",
                "--teleop.id=so101_leader",
                "--fps=60",
                "--display_data=true",
            ]
        );
    }

    #[test]
    fn test_missing_parameter() {
        let err = build(Mode::Teleop, &teleop_params(), PlanContext::default()).unwrap_err();
        assert_eq!(err, PlanError::Missing("fps"));
    }

    #[test]
    fn test_inference_without_teleoperation_has_no_leader() {
        let mut params = teleop_params();
        params.insert("policy_path", "outputs/train/act/checkpoints/last/pretrained_model");
        params.insert("task_description", "Pick the cube");
        params.insert("inference_time", 30i64);
        params.insert("fps", 30i64);
        params.insert("use_teleoperation", false);

        let plan = build(Mode::Inference, &params, PlanContext::default()).unwrap();
        assert!(plan.args.iter().all(|a| !a.starts_with("--teleop.")));
        assert!(plan.args.contains(&"--dataset.repo_id=local/eval_so101".to_string()));
        assert!(plan.args.contains(&"--dataset.num_episodes=1".to_string()));
    }

    #[test]
    fn test_calibrate_leader() {
        let params: ModeSettings = [
            ("robot_type", "koch"),
            ("arm", "leader"),
            ("leader_port", "/dev/ttyUSB0"),
            ("arm_id", "koch_leader"),
        ]
        .into_iter()
        .collect();
        let plan = build(Mode::Calibrate, &params, PlanContext::default()).unwrap();
        assert_eq!(
            plan.args,
            vec![
                "--teleop.type=koch_leader",
                "--teleop.port=/dev/ttyUSB0",
                "--teleop.id=koch_leader",
            ]
        );
    }

    #[test]
    fn test_motors_follower() {
        let params: ModeSettings = [
            ("robot_type", "so100"),
            ("arm", "follower"),
            ("follower_port", "/dev/ttyACM1"),
        ]
        .into_iter()
        .collect();
        let plan = build(Mode::Motors, &params, PlanContext::default()).unwrap();
        assert_eq!(plan.program, "lerobot-setup-motors");
        assert_eq!(
            plan.args,
            vec!["--robot.type=so100_follower", "--robot.port=/dev/ttyACM1"]
        );
    }

    #[test]
    fn test_single_arm_rejects_unknown_arm() {
        let params: ModeSettings = [("robot_type", "so100"), ("arm", "left")].into_iter().collect();
        assert!(matches!(
            build(Mode::Motors, &params, PlanContext::default()),
            Err(PlanError::Invalid { key: "arm", .. })
        ));
    }

    #[test]
    fn test_serve_ollama_sets_host() {
        let mut params: ModeSettings = [("server", "ollama"), ("model", "llama3.2:1b")]
            .into_iter()
            .collect();
        params.insert("port", 11434i64);
        let plan = build(Mode::Serve, &params, PlanContext::default()).unwrap();
        assert_eq!(plan.program, "ollama");
        assert_eq!(plan.args, vec!["serve"]);
        assert_eq!(
            plan.env,
            vec![("OLLAMA_HOST".to_string(), "127.0.0.1:11434".to_string())]
        );
    }

    #[test]
    fn test_serve_vllm_gpu_flag() {
        let mut params: ModeSettings = [("server", "vllm"), ("model", "Qwen/Qwen2.5-0.5B-Instruct")]
            .into_iter()
            .collect();
        params.insert("port", 8000i64);

        let cpu = build(Mode::Serve, &params, PlanContext { use_gpu: false }).unwrap();
        assert!(!cpu.args.contains(&"--gpus".to_string()));

        let gpu = build(Mode::Serve, &params, PlanContext { use_gpu: true }).unwrap();
        assert_eq!(&gpu.args[..4], &["run", "--rm", "--gpus", "all"]);
        assert!(gpu.args.contains(&"8000:8000".to_string()));
    }

    #[test]
    fn test_display_quotes_spaces() {
        let mut plan = CommandPlan::new("lerobot-record");
        plan.flag("dataset.single_task", "Pick the cube");
        assert_eq!(plan.to_string(), "lerobot-record '--dataset.single_task=Pick the cube'");
    }
}
