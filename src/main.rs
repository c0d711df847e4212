use clap::Parser;

use solo_cli::cli::{self, Args, Command, ConfigAction, CommandError, ModeRun};
use solo_cli::config::{self, ConfigStore};
use solo_cli::launcher::Interrupt;
use solo_cli::modes::Mode;
use solo_cli::prompt::{InteractivePrompt, StdConsole};

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn run(args: Args) -> Result<(), CommandError> {
    let path = args.config.clone().unwrap_or_else(config::default_path);

    // Listing ports or printing the path needs neither the store nor prompts.
    match &args.command {
        Command::Config {
            action: ConfigAction::Path,
        } => {
            println!("{}", path.display());
            return Ok(());
        }
        Command::ListPorts { probe_cmd } => {
            cli::list_ports(probe_cmd.as_deref());
            return Ok(());
        }
        _ => {}
    }

    let mut store = ConfigStore::open(&path)?;
    let interrupt = Interrupt::new();
    interrupt.install_ctrlc_handler()?;
    let mut prompt = InteractivePrompt::new(StdConsole::new(interrupt.clone()), args.yes, interrupt.clone());

    match args.command {
        Command::Setup => cli::run_setup(&mut store, &mut prompt),
        Command::Serve(serve) => {
            let run = ModeRun {
                overrides: serve.overrides(),
                dry_run: serve.launch.dry_run,
                ..Default::default()
            };
            cli::run_mode(&mut store, &mut prompt, interrupt, Mode::Serve, run)
        }
        Command::Robo(robo) => {
            let run = ModeRun {
                overrides: robo.overrides(),
                port_retries: Some(robo.port_retries),
                probe_cmd: robo.probe_cmd.clone(),
                dry_run: robo.launch.dry_run,
            };
            cli::run_mode(&mut store, &mut prompt, interrupt, robo.mode.into(), run)
        }
        Command::Status => {
            cli::show_status(store.config());
            Ok(())
        }
        Command::Config { action } => cli::handle_config_action(&mut store, &mut prompt, action),
        Command::ListPorts { .. } => Ok(()),
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(args) {
        if e.is_cancelled() {
            eprintln!("Cancelled.");
        } else {
            eprintln!("Error: {}", e);
        }
        std::process::exit(e.exit_code());
    }
}
