//! Subcommand handlers.

use comfy_table::{presets::UTF8_FULL, Cell, Table};

use super::args::ConfigAction;
use crate::config::{ConfigError, ConfigStore, Configuration};
use crate::devices::{print_ports, DeviceDiscovery, PortRetryPolicy, SerialDiscovery};
use crate::hardware;
use crate::launcher::{Interrupt, ProcessLauncher};
use crate::modes::Mode;
use crate::plans::PlanContext;
use crate::prompt::{Console, InteractivePrompt, PromptError};
use crate::servers::ServerType;
use crate::session::{parse_overrides, Outcome, Session, SessionError, SessionOptions};

/// Errors from a subcommand, mapped to exit codes by `main`.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to install Ctrl+C handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

impl From<PromptError> for CommandError {
    fn from(e: PromptError) -> Self {
        CommandError::Session(e.into())
    }
}

impl CommandError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CommandError::Session(SessionError::Cancelled))
    }

    /// 130 for operator cancellation, 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        if self.is_cancelled() {
            130
        } else {
            1
        }
    }
}

const DOMAINS: &[&str] = &["Software", "Robotics", "Research", "Education", "Other"];
const ROLES: &[&str] = &["Engineer", "Researcher", "Student", "Hobbyist", "Other"];

/// Detect hardware, ask for preferences and save them.
pub fn run_setup<C: Console>(store: &mut ConfigStore, prompt: &mut InteractivePrompt<C>) -> Result<(), CommandError> {
    println!("Detecting hardware...");
    let mut profile = hardware::detect();
    hardware::print_profile(&profile);

    if profile.gpu_vendor.is_some() {
        let keep = store.config().hardware.gpu_vendor.is_none() || store.config().hardware.use_gpu;
        profile.use_gpu = prompt.confirm("Use the GPU for serving and training?", keep)?;
    }

    let saved_user = store.config().user.clone();
    let domain = prompt.select(
        "What do you mainly work on?",
        DOMAINS,
        index_of(DOMAINS, saved_user.domain.as_deref()).unwrap_or(0),
    )?;
    let role = prompt.select(
        "What is your role?",
        ROLES,
        index_of(ROLES, saved_user.role.as_deref()).unwrap_or(0),
    )?;

    let labels: Vec<&str> = ServerType::ALL.iter().map(|s| s.label()).collect();
    let suggested = store.config().server.preferred().unwrap_or(
        if profile.use_gpu && profile.gpu_vendor.as_deref() == Some("NVIDIA") {
            ServerType::Vllm
        } else {
            ServerType::Ollama
        },
    );
    let default = ServerType::ALL.iter().position(|s| *s == suggested).unwrap_or(0);
    let server = ServerType::ALL[prompt.select("Preferred serving backend:", &labels, default)?];

    store.update(|config| {
        config.hardware = profile;
        config.user.domain = Some(DOMAINS[domain].to_string());
        config.user.role = Some(ROLES[role].to_string());
        config.server.server_type = Some(server.as_str().to_string());
    })?;
    println!("Saved to {}", store.path().display());
    Ok(())
}

fn index_of(options: &[&str], value: Option<&str>) -> Option<usize> {
    value.and_then(|v| options.iter().position(|o| o.eq_ignore_ascii_case(v)))
}

/// Options for [`run_mode`] that come straight from the command line.
#[derive(Debug, Clone, Default)]
pub struct ModeRun {
    pub overrides: Vec<String>,
    pub port_retries: Option<u32>,
    pub probe_cmd: Option<String>,
    pub dry_run: bool,
}

/// Run one mode through a session with real discovery and processes.
pub fn run_mode<C: Console>(
    store: &mut ConfigStore,
    prompt: &mut InteractivePrompt<C>,
    interrupt: Interrupt,
    mode: Mode,
    run: ModeRun,
) -> Result<(), CommandError> {
    let options = SessionOptions {
        overrides: parse_overrides(&run.overrides)?,
        retry: run
            .port_retries
            .map(|max_retries| PortRetryPolicy { max_retries })
            .unwrap_or_default(),
        dataset_home: None,
    };
    let mut discovery = SerialDiscovery::from_env(run.probe_cmd.as_deref());
    let mut launcher = ProcessLauncher::new(PlanContext {
        use_gpu: store.config().hardware.use_gpu,
    })
    .dry_run(run.dry_run);

    println!("{}", mode.title());
    let report = Session::new(store, prompt, &mut discovery, &mut launcher, interrupt, options).run(mode)?;
    match report.outcome {
        Outcome::Completed => println!("{} finished.", mode.title()),
        Outcome::Interrupted => println!("{} stopped.", mode.title()),
        Outcome::DryRun => {}
    }
    Ok(())
}

/// Print everything the config file knows.
pub fn show_status(config: &Configuration) {
    if config.hardware.cpu_model.is_some() || config.hardware.gpu_vendor.is_some() {
        hardware::print_profile(&config.hardware);
    } else {
        println!("Hardware not detected yet. Run 'solo setup'.");
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Server", "Default port", "Preferred"]);
    let preferred = config.server.preferred();
    for server in ServerType::ALL {
        table.add_row(vec![
            Cell::new(server.as_str()),
            Cell::new(config.server.default_port(server)),
            Cell::new(if preferred == Some(server) { "yes" } else { "" }),
        ]);
    }
    println!("{table}");

    match &config.active_model {
        Some(active) => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["Active model", "Server", "Port", "Last used"]);
            table.add_row(vec![
                Cell::new(&active.full_model_name),
                Cell::new(&active.server),
                Cell::new(active.port),
                Cell::new(active.last_used.format("%Y-%m-%d %H:%M UTC")),
            ]);
            println!("{table}");
        }
        None => println!("No model has been served yet."),
    }

    if config.modes.is_empty() {
        println!("No saved mode settings.");
    } else {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL).set_header(vec!["Mode", "Saved settings"]);
        for (mode, settings) in &config.modes {
            let summary: Vec<String> = settings.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            table.add_row(vec![Cell::new(mode), Cell::new(summary.join("\n"))]);
        }
        println!("{table}");
    }

    if !config.known_ids.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_header(vec!["Robot", "Leader ids", "Follower ids"]);
        for (robot, ids) in config.known_ids.iter() {
            table.add_row(vec![
                Cell::new(robot),
                Cell::new(ids.leaders.join(", ")),
                Cell::new(ids.followers.join(", ")),
            ]);
        }
        println!("{table}");
    }
}

/// Scan serial ports and print what each one is.
pub fn list_ports(probe_cmd: Option<&str>) {
    let mut discovery = SerialDiscovery::from_env(probe_cmd);
    let ports: Vec<_> = discovery
        .scan()
        .into_iter()
        .map(|path| {
            let probe = discovery.probe(&path);
            (path, probe)
        })
        .collect();
    print_ports(&ports);
}

/// Handle config subcommand actions.
pub fn handle_config_action<C: Console>(
    store: &mut ConfigStore,
    prompt: &mut InteractivePrompt<C>,
    action: ConfigAction,
) -> Result<(), CommandError> {
    match action {
        ConfigAction::Show => {
            let json = store.config().to_pretty_json().map_err(ConfigError::from)?;
            print!("{}", String::from_utf8_lossy(&json));
            if !store.path().exists() {
                eprintln!("(defaults; {} does not exist yet)", store.path().display());
            }
        }
        ConfigAction::Path => println!("{}", store.path().display()),
        ConfigAction::Reset { mode: Some(mode) } => {
            let mode = Mode::from(mode);
            if store.get_mode_settings(mode.as_str()).is_none() {
                println!("No saved {} settings.", mode);
                return Ok(());
            }
            if prompt.confirm(&format!("Clear saved {} settings?", mode), true)? {
                store.update(|config| {
                    config.modes.remove(mode.as_str());
                })?;
                println!("Cleared saved {} settings.", mode);
            }
        }
        ConfigAction::Reset { mode: None } => {
            if prompt.confirm("Reset the whole configuration?", false)? || prompt.auto_yes() {
                store.save(Configuration::default())?;
                println!("Configuration reset: {}", store.path().display());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ScriptedConsole;
    use crate::settings::ModeSettings;
    use tempfile::TempDir;

    fn prompt(answers: &[&str], auto_yes: bool) -> InteractivePrompt<ScriptedConsole> {
        InteractivePrompt::new(
            ScriptedConsole::new(answers.iter().copied()),
            auto_yes,
            Interrupt::new(),
        )
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(CommandError::Session(SessionError::Cancelled).exit_code(), 130);
        let err: CommandError = PromptError::Cancelled.into();
        assert!(err.is_cancelled());
        let err = CommandError::Session(SessionError::InvalidOverride {
            key: "fps".into(),
            reason: "bad".into(),
        });
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_reset_single_mode() {
        let dir = TempDir::new().unwrap();
        let mut store = ConfigStore::open(dir.path().join("config.json")).unwrap();
        let settings: ModeSettings = [("fps", 30i64)].into_iter().collect();
        store.set_mode_settings("teleop", settings.clone()).unwrap();
        store.set_mode_settings("record", settings).unwrap();

        let mut p = prompt(&[], true);
        handle_config_action(
            &mut store,
            &mut p,
            ConfigAction::Reset {
                mode: Some(crate::cli::ModeChoice::Teleop),
            },
        )
        .unwrap();

        let reloaded = ConfigStore::open(store.path()).unwrap();
        assert!(reloaded.get_mode_settings("teleop").is_none());
        assert!(reloaded.get_mode_settings("record").is_some());
    }

    #[test]
    fn test_reset_all_declined() {
        let dir = TempDir::new().unwrap();
        let mut store = ConfigStore::open(dir.path().join("config.json")).unwrap();
        store.update(|c| c.user.role = Some("Engineer".into())).unwrap();

        let mut p = prompt(&["n"], false);
        handle_config_action(&mut store, &mut p, ConfigAction::Reset { mode: None }).unwrap();
        assert_eq!(store.config().user.role.as_deref(), Some("Engineer"));
    }

    #[test]
    fn test_reset_all_with_yes() {
        let dir = TempDir::new().unwrap();
        let mut store = ConfigStore::open(dir.path().join("config.json")).unwrap();
        store.update(|c| c.user.role = Some("Engineer".into())).unwrap();

        let mut p = prompt(&[], true);
        handle_config_action(&mut store, &mut p, ConfigAction::Reset { mode: None }).unwrap();
        assert_eq!(store.config(), &Configuration::default());
    }

    #[test]
    fn test_index_of_is_case_insensitive() {
        assert_eq!(index_of(ROLES, Some("student")), Some(2));
        assert_eq!(index_of(ROLES, Some("Pilot")), None);
        assert_eq!(index_of(ROLES, None), None);
    }
}
