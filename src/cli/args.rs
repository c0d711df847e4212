//! CLI argument parsing with clap.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use super::enums::{ModeChoice, PolicyChoice, RoboMode, RobotChoice, ServerChoice};
use crate::devices::DEFAULT_PORT_RETRIES;

/// Launch model servers and LeRobot workflows, remembering your settings
#[derive(Parser, Debug)]
#[command(name = "solo")]
#[command(version, about = "Launch model servers and LeRobot workflows with saved settings")]
#[command(after_help = "EXAMPLES:
    # Detect hardware and pick a preferred server
    solo setup

    # Serve a model with the preferred backend
    solo serve --model llama3.2:1b

    # Teleoperate, reusing saved settings without questions
    solo robo teleop -y

    # Record with a fixed leader port and 20 episodes
    solo robo record --leader-port /dev/ttyACM0 --set num_episodes=20

    # Show what is configured
    solo status

ENVIRONMENT:
    SOLO_CONFIG        Config file path (default: ~/.solo/config.json)
    SOLO_PORT_PROBE    Command that prints 'leader' or 'follower' for a port
    RUST_LOG           Log filter, overrides -v")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Config file path
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(long, short, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Accept saved settings and defaults without asking
    #[arg(long = "yes", short = 'y', global = true)]
    pub yes: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Detect hardware and choose a preferred serving backend
    Setup,

    /// Start a model server
    #[command(after_help = "EXAMPLES:
    solo serve                          # Preferred server, saved model
    solo serve -s vllm -m Qwen/Qwen2.5-0.5B-Instruct
    solo serve -s llama.cpp -p 9090 --dry-run")]
    Serve(ServeArgs),

    /// Run a LeRobot workflow
    #[command(after_help = "EXAMPLES:
    solo robo motors --set arm=leader
    solo robo calibrate --set arm=leader
    solo robo teleop --robot-type so101
    solo robo record --dataset me/pick_cube
    solo robo train --policy act --set steps=5000
    solo robo inference --set use_teleoperation=true")]
    Robo(RoboArgs),

    /// Show hardware, server, active model and saved settings
    Status,

    /// List serial ports that could be robot arms
    ListPorts {
        /// Command run with each port as last argument; prints 'leader' or 'follower'
        #[arg(long)]
        probe_cmd: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Options shared by commands that launch something.
#[derive(clap::Args, Debug, Default)]
pub struct LaunchArgs {
    /// Set a mode parameter (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// Print the command instead of running it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Serving backend
    #[arg(long, short)]
    pub server: Option<ServerChoice>,

    /// Model to serve
    #[arg(long, short)]
    pub model: Option<String>,

    /// Port to listen on
    #[arg(long, short)]
    pub port: Option<u16>,

    #[command(flatten)]
    pub launch: LaunchArgs,
}

#[derive(clap::Args, Debug)]
pub struct RoboArgs {
    /// Workflow to run
    #[arg(value_enum)]
    pub mode: RoboMode,

    /// Robot kit
    #[arg(long)]
    pub robot_type: Option<RobotChoice>,

    /// Leader arm serial port
    #[arg(long)]
    pub leader_port: Option<String>,

    /// Follower arm serial port
    #[arg(long)]
    pub follower_port: Option<String>,

    /// Dataset repo id (owner/name)
    #[arg(long)]
    pub dataset: Option<String>,

    /// Policy type for training
    #[arg(long)]
    pub policy: Option<PolicyChoice>,

    /// Reconnect-and-retry rounds when an arm is not found
    #[arg(long, default_value_t = DEFAULT_PORT_RETRIES)]
    pub port_retries: u32,

    /// Command run with each port as last argument; prints 'leader' or 'follower'
    #[arg(long)]
    pub probe_cmd: Option<String>,

    #[command(flatten)]
    pub launch: LaunchArgs,
}

impl ServeArgs {
    /// `key=value` overrides from the dedicated flags, then `--set`.
    pub fn overrides(&self) -> Vec<String> {
        let mut pairs = Vec::new();
        if let Some(server) = self.server {
            pairs.push(format!("server={}", crate::servers::ServerType::from(server)));
        }
        if let Some(model) = &self.model {
            pairs.push(format!("model={}", model));
        }
        if let Some(port) = self.port {
            pairs.push(format!("port={}", port));
        }
        pairs.extend(self.launch.set.iter().cloned());
        pairs
    }
}

impl RoboArgs {
    /// `key=value` overrides from the dedicated flags, then `--set`.
    pub fn overrides(&self) -> Vec<String> {
        let mut pairs = Vec::new();
        if let Some(robot) = self.robot_type {
            pairs.push(format!("robot_type={}", crate::robots::RobotType::from(robot)));
        }
        if let Some(port) = &self.leader_port {
            pairs.push(format!("leader_port={}", port));
        }
        if let Some(port) = &self.follower_port {
            pairs.push(format!("follower_port={}", port));
        }
        if let Some(dataset) = &self.dataset {
            pairs.push(format!("dataset_repo_id={}", dataset));
        }
        if let Some(policy) = self.policy {
            pairs.push(format!("policy_type={}", policy.as_str()));
        }
        pairs.extend(self.launch.set.iter().cloned());
        pairs
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Print the configuration document
    Show,
    /// Print the configuration file path
    Path,
    /// Clear saved settings of one mode, or the whole document
    Reset {
        /// Only clear this mode's saved settings
        #[arg(long)]
        mode: Option<ModeChoice>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_global_defaults() {
        let args = Args::parse_from(["solo", "status"]);
        assert!(args.config.is_none());
        assert_eq!(args.verbose, 0);
        assert!(!args.yes);
        assert!(matches!(args.command, Command::Status));
    }

    #[test]
    fn test_args_requires_subcommand() {
        assert!(Args::try_parse_from(["solo"]).is_err());
    }

    #[test]
    fn test_args_verbose_count() {
        let args = Args::parse_from(["solo", "-vv", "status"]);
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_args_global_flags_after_subcommand() {
        let args = Args::parse_from(["solo", "robo", "teleop", "-y", "--config", "/tmp/solo.json"]);
        assert!(args.yes);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/solo.json")));
    }

    #[test]
    fn test_args_robo_flags() {
        let args = Args::parse_from([
            "solo",
            "robo",
            "record",
            "--robot-type",
            "koch",
            "--leader-port",
            "/dev/ttyACM0",
            "--dataset",
            "me/cubes",
            "--set",
            "fps=15",
            "--set",
            "num_episodes=3",
        ]);
        let Command::Robo(robo) = args.command else {
            panic!("Expected Robo subcommand");
        };
        assert_eq!(robo.mode, RoboMode::Record);
        assert_eq!(robo.port_retries, DEFAULT_PORT_RETRIES);
        assert_eq!(
            robo.overrides(),
            vec![
                "robot_type=koch",
                "leader_port=/dev/ttyACM0",
                "dataset_repo_id=me/cubes",
                "fps=15",
                "num_episodes=3",
            ]
        );
    }

    #[test]
    fn test_args_robo_motors() {
        let args = Args::parse_from(["solo", "robo", "motors", "--set", "arm=leader"]);
        let Command::Robo(robo) = args.command else {
            panic!("Expected Robo subcommand");
        };
        assert_eq!(robo.mode, RoboMode::Motors);
        assert_eq!(robo.overrides(), vec!["arm=leader"]);
    }

    #[test]
    fn test_args_robo_rejects_unknown_mode() {
        assert!(Args::try_parse_from(["solo", "robo", "dance"]).is_err());
    }

    #[test]
    fn test_args_port_retries() {
        let args = Args::parse_from(["solo", "robo", "replay", "--port-retries", "3"]);
        let Command::Robo(robo) = args.command else {
            panic!("Expected Robo subcommand");
        };
        assert_eq!(robo.port_retries, 3);
    }

    #[test]
    fn test_args_serve_flags() {
        let args = Args::parse_from(["solo", "serve", "-s", "llama.cpp", "-m", "ggml-org/gemma-3-1b-it-GGUF", "-p", "9090", "--dry-run"]);
        let Command::Serve(serve) = args.command else {
            panic!("Expected Serve subcommand");
        };
        assert!(serve.launch.dry_run);
        assert_eq!(
            serve.overrides(),
            vec!["server=llama.cpp", "model=ggml-org/gemma-3-1b-it-GGUF", "port=9090"]
        );
    }

    #[test]
    fn test_args_serve_rejects_bad_port() {
        assert!(Args::try_parse_from(["solo", "serve", "-p", "70000"]).is_err());
    }

    #[test]
    fn test_args_config_reset_mode() {
        let args = Args::parse_from(["solo", "config", "reset", "--mode", "teleop"]);
        match args.command {
            Command::Config {
                action: ConfigAction::Reset {
                    mode: Some(ModeChoice::Teleop),
                },
            } => (),
            _ => panic!("Expected Config Reset subcommand"),
        }
    }

    #[test]
    fn test_args_list_ports_probe() {
        let args = Args::parse_from(["solo", "list-ports", "--probe-cmd", "arm-probe --quick"]);
        match args.command {
            Command::ListPorts { probe_cmd } => assert_eq!(probe_cmd.as_deref(), Some("arm-probe --quick")),
            _ => panic!("Expected ListPorts subcommand"),
        }
    }
}
