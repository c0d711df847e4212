//! CLI enum types for modes, robots, servers and policies.

use clap::ValueEnum;

use crate::modes::Mode;
use crate::robots::RobotType;
use crate::servers::ServerType;

/// Robotics workflow run by `solo robo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoboMode {
    /// Drive the follower arm with the leader arm
    Teleop,
    /// Record teleoperated episodes into a dataset
    Record,
    /// Replay a recorded episode on the follower arm
    Replay,
    /// Train a policy on a recorded dataset
    Train,
    /// Run a trained policy on the robot
    Inference,
    /// Calibrate one arm
    Calibrate,
    /// Assign motor ids on one arm
    Motors,
}

impl From<RoboMode> for Mode {
    fn from(m: RoboMode) -> Self {
        match m {
            RoboMode::Teleop => Mode::Teleop,
            RoboMode::Record => Mode::Record,
            RoboMode::Replay => Mode::Replay,
            RoboMode::Train => Mode::Train,
            RoboMode::Inference => Mode::Inference,
            RoboMode::Calibrate => Mode::Calibrate,
            RoboMode::Motors => Mode::Motors,
        }
    }
}

/// Any mode with saved settings, for `config reset --mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeChoice {
    Teleop,
    Record,
    Replay,
    Train,
    Inference,
    Calibrate,
    Motors,
    Serve,
}

impl From<ModeChoice> for Mode {
    fn from(m: ModeChoice) -> Self {
        match m {
            ModeChoice::Teleop => Mode::Teleop,
            ModeChoice::Record => Mode::Record,
            ModeChoice::Replay => Mode::Replay,
            ModeChoice::Train => Mode::Train,
            ModeChoice::Inference => Mode::Inference,
            ModeChoice::Calibrate => Mode::Calibrate,
            ModeChoice::Motors => Mode::Motors,
            ModeChoice::Serve => Mode::Serve,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RobotChoice {
    So100,
    So101,
    Koch,
}

impl From<RobotChoice> for RobotType {
    fn from(r: RobotChoice) -> Self {
        match r {
            RobotChoice::So100 => RobotType::So100,
            RobotChoice::So101 => RobotType::So101,
            RobotChoice::Koch => RobotType::Koch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ServerChoice {
    Ollama,
    Vllm,
    #[value(name = "llama.cpp", alias = "llamacpp")]
    LlamaCpp,
}

impl From<ServerChoice> for ServerType {
    fn from(s: ServerChoice) -> Self {
        match s {
            ServerChoice::Ollama => ServerType::Ollama,
            ServerChoice::Vllm => ServerType::Vllm,
            ServerChoice::LlamaCpp => ServerType::LlamaCpp,
        }
    }
}

/// Policy architecture for `robo train`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyChoice {
    Act,
    Diffusion,
    Pi0,
    Smolvla,
}

impl PolicyChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyChoice::Act => "act",
            PolicyChoice::Diffusion => "diffusion",
            PolicyChoice::Pi0 => "pi0",
            PolicyChoice::Smolvla => "smolvla",
        }
    }
}
