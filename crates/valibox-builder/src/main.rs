use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use valibox_builder::config::{self, ConfigDoc};
use valibox_builder::executor::{
    self, CursorFile, ExecCtx, PinnedVersion, RunController, RunOutcome, RunState, StdoutSink,
    VersionMode,
};
use valibox_builder::planner::{self, Plan};
use valibox_builder::workspace::{self, WorkspacePaths};
use valibox_builder::{Error, Result, shell};

#[derive(Debug, Parser)]
#[command(author, version, about = "Resumable firmware build helper")]
struct Args {
    /// Configuration file (default: <root>/.valibox_build_config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory the repositories are checked out into
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the computed step list
    Steps {
        /// Emit the list as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run every step from the first one
    Start {
        /// Print the steps without performing them
        #[arg(long)]
        dry_run: bool,
    },
    /// Continue from the last unfinished step
    Resume {
        /// Print the steps without performing them
        #[arg(long)]
        dry_run: bool,
    },
    /// Show where an interrupted run would resume
    Status,
    /// Inspect or change the configuration file
    Config {
        #[command(subcommand)]
        cmd: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the merged configuration
    Show,
    /// Print one `section.key` value
    Get { key: String },
    /// Set one `section.key` value and save the file
    Set { key: String, value: String },
    /// Open the file in $EDITOR and validate it afterwards
    Edit,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);
    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("[ERROR] {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "warn,valibox_builder=debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .init();
}

fn run(args: Args) -> Result<ExitCode> {
    let paths = workspace::load_paths(&args.root)?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| paths.root.join(config::DEFAULT_CONFIG_FILE));

    match args.cmd {
        Command::Steps { json } => cmd_steps(&config_path, &paths, json),
        Command::Start { dry_run } => cmd_run(&config_path, paths, dry_run, false),
        Command::Resume { dry_run } => cmd_run(&config_path, paths, dry_run, true),
        Command::Status => cmd_status(&config_path, &paths),
        Command::Config { cmd } => cmd_config(&config_path, cmd),
    }
}

fn load_plan(config_path: &Path, paths: &WorkspacePaths, mode: VersionMode) -> Result<Plan> {
    let doc = config::load(config_path)?;
    let cfg = doc.typed()?;
    let version = executor::resolve_version(
        &cfg.release,
        &CursorFile::new(paths.cursor_file.clone()),
        &PinnedVersion::new(paths.version_file.clone()),
        mode,
        chrono::Local::now().naive_local(),
    )?;
    planner::build_steps(&cfg, &version)
}

fn cmd_steps(config_path: &Path, paths: &WorkspacePaths, json: bool) -> Result<ExitCode> {
    let plan = load_plan(config_path, paths, VersionMode::Inspect)?;
    if json {
        let s = serde_json::to_string_pretty(&plan.listing())
            .map_err(|e| Error::msg(format!("failed to encode step list: {e}")))?;
        println!("{s}");
    } else {
        print!("{}", plan.to_text());
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_run(
    config_path: &Path,
    paths: WorkspacePaths,
    dry_run: bool,
    resume: bool,
) -> Result<ExitCode> {
    let mode = match (resume, dry_run) {
        (false, false) => VersionMode::Start,
        (true, false) => VersionMode::Resume,
        (true, true) => VersionMode::Inspect,
        (false, true) => VersionMode::Preview,
    };
    let plan = load_plan(config_path, &paths, mode)?;
    let pinned = PinnedVersion::new(paths.version_file.clone());
    let cursor = CursorFile::new(paths.cursor_file.clone());
    let controller = RunController::new(plan, cursor);
    let sink = Arc::new(StdoutSink::default());
    let mut ctx = ExecCtx::new(paths, dry_run, sink);

    let outcome = if resume {
        controller.resume(&mut ctx)?
    } else {
        controller.start(&mut ctx)?
    };
    match outcome {
        RunOutcome::Complete { .. } => {
            if !dry_run {
                pinned.clear()?;
            }
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::Failed {
            step,
            description,
            error,
        } => {
            eprintln!("[ERROR] step {step} failed");
            eprintln!("{description}");
            if let Some(e) = error {
                eprintln!("{e}");
            }
            eprintln!("fix the problem and run 'valibox-build resume' to continue from step {step}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn cmd_status(config_path: &Path, paths: &WorkspacePaths) -> Result<ExitCode> {
    let plan = load_plan(config_path, paths, VersionMode::Inspect)?;
    let total = plan.len();
    let controller = RunController::new(plan, CursorFile::new(paths.cursor_file.clone()));
    println!("root: {}", paths.root.display());
    match controller.state()? {
        RunState::Fresh => println!("no run in progress ({total} steps)"),
        RunState::InProgress { next } => {
            println!("resume at step {next}/{total}");
            if let Some(step) = controller.plan().get(next) {
                println!("{next}:\t{}", step.describe());
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_config(config_path: &Path, cmd: ConfigCommand) -> Result<ExitCode> {
    match cmd {
        ConfigCommand::Show => {
            let doc = config::load(config_path)?;
            println!("# {}", doc.path.display());
            print!("{}", doc.to_toml_string()?);
        }
        ConfigCommand::Get { key } => {
            let doc = config::load(config_path)?;
            match doc.get(&key)? {
                toml::Value::String(s) => println!("{s}"),
                other => println!("{other}"),
            }
        }
        ConfigCommand::Set { key, value } => {
            let mut doc = config::load(config_path)?;
            doc.set(&key, &value)?;
            doc.save()?;
        }
        ConfigCommand::Edit => edit_config(config_path)?,
    }
    Ok(ExitCode::SUCCESS)
}

fn edit_config(config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        ConfigDoc {
            path: config_path.to_path_buf(),
            value: config::defaults()?,
        }
        .save()?;
    }
    let editor = std::env::var("EDITOR")
        .ok()
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| "vi".into());
    let mut words = shell::split(&editor)?;
    if words.is_empty() {
        return Err(Error::msg("EDITOR is empty"));
    }
    let program = words.remove(0);
    let status = std::process::Command::new(&program)
        .args(&words)
        .arg(config_path)
        .status()
        .map_err(|e| Error::msg(format!("failed to start editor '{program}': {e}")))?;
    if !status.success() {
        return Err(Error::msg(format!("editor '{program}' exited with {status}")));
    }
    config::load(config_path).map_err(|e| {
        Error::msg(format!(
            "{e}\nthe file was saved but is not valid; run 'valibox-build config edit' again"
        ))
    })?;
    println!("{} is valid", config_path.display());
    Ok(())
}
