//! Session orchestration for one mode run.
//!
//! A session walks `Init → ResolveSettings → ResolvePorts → Launch →
//! Running → Done`, or stops in `Failed`. Settings are committed to the
//! config file at the end of `ResolveSettings`; nothing after that point
//! writes the file except the serve mode's active-model record.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;

use crate::config::{ActiveModel, ConfigError, ConfigStore, Configuration};
use crate::datasets::{self, DatasetState};
use crate::devices::{
    appeared, detect_role, scan_free, vanished, DeviceDiscovery, DeviceRole, PortBinding, PortRetryPolicy,
};
use crate::launcher::{Interrupt, LaunchError, Launcher, ProcessHandle, ProcessState};
use crate::modes::{Mode, ParamSpec};
use crate::prompt::{Console, InteractivePrompt, PromptError};
use crate::robots::{validate_repo_id, RobotType};
use crate::servers::ServerType;
use crate::settings::{ModeSettings, Scalar};

/// How often a running child is polled.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    ResolveSettings,
    ResolvePorts,
    Launch,
    Running,
    Failed,
    Done,
}

/// Errors that end a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Saved setting '{label}' cannot be used: {reason}")]
    InvalidSavedSetting { label: String, reason: String },

    #[error("Invalid value for '{key}': {reason}")]
    InvalidOverride { key: String, reason: String },

    #[error("Could not find the {role} arm port after {attempts} attempt(s). Check the USB connection, or pass --set {role}_port=<port>")]
    PortResolution { role: DeviceRole, attempts: u32 },

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("{mode} exited with {}", describe_exit(.code))]
    ProcessFailed { mode: Mode, code: Option<i32> },

    #[error("Dataset directory {} is incomplete. Delete it or record under another --set dataset_repo_id", .path.display())]
    IncompleteDataset { path: PathBuf },

    #[error("Failed to remove dataset directory {}: {source}", .path.display())]
    DatasetCleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Terminal I/O error: {0}")]
    Terminal(#[source] io::Error),
}

impl From<PromptError> for SessionError {
    fn from(e: PromptError) -> Self {
        match e {
            PromptError::Cancelled => SessionError::Cancelled,
            PromptError::InvalidSavedSetting { label, reason } => {
                SessionError::InvalidSavedSetting { label, reason }
            }
            PromptError::Io(e) => SessionError::Terminal(e),
        }
    }
}

/// Inputs that are not part of the saved configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Values from `--set key=value` and mode flags. Validated and persisted.
    pub overrides: ModeSettings,
    pub retry: PortRetryPolicy,
    /// Local dataset cache. `None` means [`datasets::lerobot_home`].
    pub dataset_home: Option<PathBuf>,
}

/// How the launched process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// Stopped by the operator with Ctrl+C.
    Interrupted,
    /// Command was only printed.
    DryRun,
}

/// Summary of a finished session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub mode: Mode,
    /// Settings as committed to the config file.
    pub settings: ModeSettings,
    pub bindings: Vec<PortBinding>,
    pub outcome: Outcome,
}

/// Drives one mode from settings to a supervised process.
pub struct Session<'a, C: Console> {
    store: &'a mut ConfigStore,
    prompt: &'a mut InteractivePrompt<C>,
    discovery: &'a mut dyn DeviceDiscovery,
    launcher: &'a mut dyn Launcher,
    interrupt: Interrupt,
    options: SessionOptions,
    states: Vec<SessionState>,
}

impl<'a, C: Console> Session<'a, C> {
    pub fn new(
        store: &'a mut ConfigStore,
        prompt: &'a mut InteractivePrompt<C>,
        discovery: &'a mut dyn DeviceDiscovery,
        launcher: &'a mut dyn Launcher,
        interrupt: Interrupt,
        options: SessionOptions,
    ) -> Self {
        Self {
            store,
            prompt,
            discovery,
            launcher,
            interrupt,
            options,
            states: Vec::new(),
        }
    }

    /// States entered so far, in order.
    pub fn states(&self) -> &[SessionState] {
        &self.states
    }

    fn enter(&mut self, state: SessionState) {
        log::debug!("Session state: {:?}", state);
        self.states.push(state);
    }

    pub fn run(&mut self, mode: Mode) -> Result<SessionReport, SessionError> {
        self.enter(SessionState::Init);
        match self.run_states(mode) {
            Ok(report) => {
                self.enter(SessionState::Done);
                Ok(report)
            }
            Err(SessionError::Cancelled) => {
                self.enter(SessionState::Done);
                Err(SessionError::Cancelled)
            }
            Err(e) => {
                self.enter(SessionState::Failed);
                Err(e)
            }
        }
    }

    fn run_states(&mut self, mode: Mode) -> Result<SessionReport, SessionError> {
        self.enter(SessionState::ResolveSettings);
        let mut settings = self.resolve_settings(mode)?;
        if mode == Mode::Record {
            self.check_existing_dataset(&mut settings)?;
        }
        self.store.set_mode_settings(mode.as_str(), settings.clone())?;
        self.register_arm_ids(&settings)?;

        self.enter(SessionState::ResolvePorts);
        let bindings = self.resolve_ports(mode, &settings)?;
        if self.interrupt.is_set() {
            return Err(SessionError::Cancelled);
        }

        self.enter(SessionState::Launch);
        let mut params = settings.clone();
        for binding in &bindings {
            params.insert(binding.role.port_key(), binding.path.clone());
        }
        let mut handle = self.launcher.launch(mode, &params)?;

        if handle.simulated() {
            return Ok(SessionReport {
                mode,
                settings,
                bindings,
                outcome: Outcome::DryRun,
            });
        }
        if let Some(pid) = handle.pid() {
            log::info!("{} running as pid {}", mode, pid);
        }
        if mode == Mode::Serve {
            self.record_active_model(&params)?;
        }

        self.enter(SessionState::Running);
        let outcome = self.supervise(mode, handle.as_mut())?;
        Ok(SessionReport {
            mode,
            settings,
            bindings,
            outcome,
        })
    }

    /// Merge overrides, saved values and prompts into the settings to commit.
    fn resolve_settings(&mut self, mode: Mode) -> Result<ModeSettings, SessionError> {
        let schema = mode.schema();
        check_override_keys(mode, &schema, &self.options.overrides)?;

        let saved = self
            .store
            .get_mode_settings(mode.as_str())
            .cloned()
            .unwrap_or_default();
        let config = self.store.config().clone();

        let reuse_all = !saved.is_empty() && !self.prompt.auto_yes() && {
            self.prompt.say(&format!("Saved {} settings:", mode));
            for (key, value) in saved.iter() {
                self.prompt.say(&format!("  {}: {}", key, value));
            }
            self.prompt
                .confirm(&format!("Reuse all saved {} settings?", mode), true)?
        };

        let mut resolved = ModeSettings::new();
        for spec in &schema {
            // A saved value derived from a different parent no longer applies.
            let saved_value = if saved.contains_key(spec.key) && spec.parents_changed(&saved, &resolved) {
                log::debug!("Dropping saved {}: its parent changed", spec.key);
                None
            } else {
                saved.get(spec.key)
            };

            let value = if let Some(raw) = self.options.overrides.get(spec.key) {
                let value = spec
                    .validate(&raw.to_string())
                    .map_err(|reason| SessionError::InvalidOverride {
                        key: spec.key.to_string(),
                        reason,
                    })?;
                Some(value)
            } else if spec.is_port() {
                // Ports are hints for detection, never asked for.
                saved_value.and_then(|v| spec.validate(&v.to_string()).ok())
            } else {
                let reusable = saved_value.and_then(|v| spec.validate(&v.to_string()).ok());
                match reusable {
                    Some(value) if reuse_all => Some(value),
                    _ => {
                        if let Some(role) = spec.arm_id_role(&resolved) {
                            self.show_known_ids(&config, &resolved, role);
                        }
                        let default = spec.default_value(&resolved, &config);
                        let offered = saved_value.or(default.as_ref());
                        Some(self.prompt.value(spec.label, offered, |input| spec.validate(input))?)
                    }
                }
            };

            if let Some(value) = value {
                resolved.insert(spec.key, value);
            }
        }
        Ok(resolved)
    }

    fn show_known_ids(&mut self, config: &Configuration, resolved: &ModeSettings, role: DeviceRole) {
        if self.prompt.auto_yes() {
            return;
        }
        let Some(robot) = resolved.get_str("robot_type").and_then(|s| s.parse::<RobotType>().ok()) else {
            return;
        };
        let ids = config.known_ids.ids_for(robot, role == DeviceRole::Leader);
        if !ids.is_empty() {
            self.prompt
                .say(&format!("Known {} ids for {}: {}", role, robot, ids.join(", ")));
        }
    }

    /// Settle `dataset_repo_id` and `should_resume` against the local cache.
    fn check_existing_dataset(&mut self, settings: &mut ModeSettings) -> Result<(), SessionError> {
        let home = self.options.dataset_home.clone().unwrap_or_else(datasets::lerobot_home);
        loop {
            let Some(repo_id) = settings.get_str("dataset_repo_id").map(str::to_string) else {
                return Ok(());
            };
            let path = datasets::dataset_dir(&home, &repo_id);
            match datasets::dataset_state(&home, &repo_id) {
                DatasetState::Missing => {
                    settings.insert("should_resume", false);
                    return Ok(());
                }
                DatasetState::Complete => {
                    if settings.get_bool("should_resume") == Some(true) {
                        return Ok(());
                    }
                    self.prompt
                        .say(&format!("Dataset {} already exists at {}", repo_id, path.display()));
                    if self.prompt.confirm("Resume recording into it?", true)? {
                        settings.insert("should_resume", true);
                        return Ok(());
                    }
                }
                DatasetState::Incomplete => {
                    if self.prompt.auto_yes() {
                        return Err(SessionError::IncompleteDataset { path });
                    }
                    self.prompt.say(&format!(
                        "Dataset directory {} exists but has no metadata; it cannot be resumed.",
                        path.display()
                    ));
                    let choice = self.prompt.select(
                        "What do you want to do?",
                        &["Delete it and start fresh", "Use a different dataset id"],
                        1,
                    )?;
                    if choice == 0 && self.prompt.confirm(&format!("Delete {}?", path.display()), false)? {
                        std::fs::remove_dir_all(&path)
                            .map_err(|source| SessionError::DatasetCleanup { path: path.clone(), source })?;
                        log::info!("Removed incomplete dataset {}", path.display());
                        settings.insert("should_resume", false);
                        return Ok(());
                    }
                }
            }
            let current = Scalar::Text(repo_id);
            let next = self.prompt.value("New dataset repo id", Some(&current), validate_repo_id_scalar)?;
            settings.insert("dataset_repo_id", next);
        }
    }

    fn register_arm_ids(&mut self, settings: &ModeSettings) -> Result<(), SessionError> {
        let robot: Option<RobotType> = settings.get_str("robot_type").and_then(|s| s.parse().ok());
        let mut ids = Vec::new();
        if let Some(id) = settings.get_str("leader_id") {
            ids.push((true, id));
        }
        if let Some(id) = settings.get_str("follower_id") {
            ids.push((false, id));
        }
        if let Some(id) = settings.get_str("arm_id") {
            ids.push((settings.get_str("arm") == Some("leader"), id));
        }

        let mut known = self.store.config().known_ids.clone();
        let mut changed = false;
        for (leader, id) in ids {
            changed |= known.register(robot, leader, id);
        }
        if changed {
            self.store.update(|config| config.known_ids = known)?;
        }
        Ok(())
    }

    /// Bind a port for every role the mode needs, retrying within the policy.
    ///
    /// The first attempt uses the saved hint and the probe. Each retry asks the
    /// operator to unplug the arm and binds the one port that went away, then
    /// has them plug it back in and checks it returned.
    fn resolve_ports(&mut self, mode: Mode, settings: &ModeSettings) -> Result<Vec<PortBinding>, SessionError> {
        let mut bindings: Vec<PortBinding> = Vec::new();
        let max_attempts = self.options.retry.max_attempts();

        for role in mode.roles(settings) {
            if self.interrupt.is_set() {
                return Err(SessionError::Cancelled);
            }
            let hint = settings.get_str(role.port_key());
            let taken: Vec<String> = bindings.iter().map(|b| b.path.clone()).collect();
            let attempt = detect_role(&mut *self.discovery, role, hint, &taken);
            let mut bound = attempt.bound;
            let mut latest = attempt.scanned;
            let mut attempts = 1;

            let path = loop {
                if let Some(path) = bound.take() {
                    break path;
                }
                if attempts >= max_attempts {
                    return Err(SessionError::PortResolution { role, attempts });
                }
                log::warn!("No port found for the {} arm (attempt {} of {})", role, attempts, max_attempts);
                attempts += 1;
                (bound, latest) = self.reconnect_round(role, &latest, &taken)?;
            };

            log::info!("Bound {} arm to {}", role, path);
            self.prompt.say(&format!("{} arm: {}", capitalize(role.as_str()), path));
            bindings.push(PortBinding { role, path });
        }
        Ok(bindings)
    }

    /// One unplug and replug cycle. Returns the bound path, if any, and the
    /// last scan.
    fn reconnect_round(
        &mut self,
        role: DeviceRole,
        before: &[String],
        taken: &[String],
    ) -> Result<(Option<String>, Vec<String>), SessionError> {
        self.prompt
            .pause(&format!("Could not identify the {} arm. Unplug its USB cable.", role))?;
        let unplugged = scan_free(&mut *self.discovery, taken);
        let gone = vanished(before, &unplugged);
        let picked = match gone.as_slice() {
            [] => None,
            [only] => Some(only.clone()),
            _ if self.prompt.auto_yes() => {
                log::warn!("Several ports disappeared: {:?}", gone);
                None
            }
            _ => {
                let options: Vec<&str> = gone.iter().map(String::as_str).collect();
                let choice = self
                    .prompt
                    .select(&format!("Several ports disappeared. Which is the {} arm?", role), &options, 0)?;
                Some(gone[choice].clone())
            }
        };

        self.prompt.pause(&format!("Plug the {} arm back in.", role))?;
        let replugged = scan_free(&mut *self.discovery, taken);
        let bound = match picked {
            Some(path) if replugged.contains(&path) => Some(path),
            // Not plugged in before, or renumbered on the way back.
            _ => match appeared(&unplugged, &replugged).as_slice() {
                [only] => Some(only.clone()),
                _ => None,
            },
        };
        Ok((bound, replugged))
    }

    fn record_active_model(&mut self, params: &ModeSettings) -> Result<(), SessionError> {
        let (Some(server), Some(model), Some(port)) = (
            params.get_str("server").and_then(|s| s.parse::<ServerType>().ok()),
            params.get_str("model"),
            params.get_i64("port").and_then(|p| u16::try_from(p).ok()),
        ) else {
            log::warn!("Serve parameters incomplete, not recording active model");
            return Ok(());
        };

        let active = ActiveModel {
            server: server.as_str().to_string(),
            name: model.to_string(),
            full_model_name: server.full_model_name(model),
            port,
            last_used: Utc::now(),
        };
        self.store.update(|config| {
            config.active_model = Some(active);
            config.server.server_type = Some(server.as_str().to_string());
        })?;
        Ok(())
    }

    fn supervise(&mut self, mode: Mode, handle: &mut dyn ProcessHandle) -> Result<Outcome, SessionError> {
        loop {
            if self.interrupt.is_set() {
                let state = handle.interrupt()?;
                log::info!("{} stopped after interrupt: {:?}", mode, state);
                return Ok(Outcome::Interrupted);
            }
            match handle.poll()? {
                ProcessState::Running => std::thread::sleep(POLL_INTERVAL),
                ProcessState::Exited(Some(0)) => return Ok(Outcome::Completed),
                // The child saw the same Ctrl+C as we did.
                ProcessState::Exited(_) if self.interrupt.is_set() => return Ok(Outcome::Interrupted),
                ProcessState::Exited(code) => return Err(SessionError::ProcessFailed { mode, code }),
            }
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

fn check_override_keys(mode: Mode, schema: &[ParamSpec], overrides: &ModeSettings) -> Result<(), SessionError> {
    for (key, _) in overrides.iter() {
        if !schema.iter().any(|p| p.key == key) {
            let known: Vec<&str> = schema.iter().map(|p| p.key).collect();
            return Err(SessionError::InvalidOverride {
                key: key.clone(),
                reason: format!("{} has no such parameter (available: {})", mode, known.join(", ")),
            });
        }
    }
    Ok(())
}

fn validate_repo_id_scalar(input: &str) -> Result<Scalar, String> {
    validate_repo_id(input).map(Scalar::Text)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Parse `key=value` pairs from the command line into override text values.
///
/// Values stay text here; each is validated against its parameter's kind when
/// the session resolves settings.
pub fn parse_overrides<S: AsRef<str>>(pairs: &[S]) -> Result<ModeSettings, SessionError> {
    let mut overrides = ModeSettings::new();
    for pair in pairs {
        let pair = pair.as_ref();
        let (key, value) = pair.split_once('=').ok_or_else(|| SessionError::InvalidOverride {
            key: pair.to_string(),
            reason: "expected key=value".to_string(),
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(SessionError::InvalidOverride {
                key: pair.to_string(),
                reason: "empty parameter name".to_string(),
            });
        }
        overrides.insert(key, Scalar::Text(value.to_string()));
    }
    Ok(overrides)
}
