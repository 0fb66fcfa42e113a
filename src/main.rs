//! deploy-stage CLI entrypoint.
//!
//! This is the main entrypoint for the deploy-stage command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use deploy_stage::cli::{Cli, Commands, OutputFormatter};
use deploy_stage::config::{
    find_stage_file, project_root, stage_file_path, LoadedStage, StageLoader, StageSource,
};
use deploy_stage::deploy::{DeployEngine, DeployRun, DryRunEngine, HookRegistry, SshEngine};
use deploy_stage::error::Result;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Stage used when neither `--config` nor `--stage` is given.
const DEFAULT_STAGE: &str = "production";

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Where the stage comes from, as chosen by the global flags.
struct StageArgs {
    config: Option<PathBuf>,
    stage: Option<String>,
    from_env: bool,
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let args = StageArgs {
        config: cli.config,
        stage: cli.stage,
        from_env: cli.from_env,
    };

    match cli.command {
        Commands::Init { path, force } => {
            cmd_init(&path, args.stage.as_deref().unwrap_or(DEFAULT_STAGE), force)
        }
        Commands::Validate { warnings } => cmd_validate(&args, warnings, &formatter),
        Commands::Show => cmd_show(&args, &formatter),
        Commands::Apply {
            yes,
            dry_run,
            ssh_program,
            timeout,
        } => cmd_apply(&args, yes, dry_run, ssh_program, timeout, &formatter).await,
    }
}

/// Writes a template stage file.
fn cmd_init(path: &Path, stage: &str, force: bool) -> Result<()> {
    info!("Initializing stage '{stage}' in: {}", path.display());

    let stage_path = stage_file_path(path, stage)?;
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && stage_path.exists() {
        eprintln!("Stage file already exists: {}", stage_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if let Some(deploy_dir) = stage_path.parent() {
        std::fs::create_dir_all(deploy_dir)?;
    }

    std::fs::write(&stage_path, include_str!("../templates/stage.yaml"))?;
    eprintln!("Created: {}", stage_path.display());

    if force || !env_path.exists() {
        std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
        eprintln!("Created: {}", env_path.display());
    }

    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.lines().any(|line| line.trim() == ".env") {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# deploy-stage secrets\n.env")?;
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, ".env\n")?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nStage initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and set DEPLOY_STAGE_API_TOKEN");
    eprintln!("  2. Edit {} with your hosts", stage_path.display());
    eprintln!("  3. Run 'deploy-stage --stage {stage} validate --warnings'");
    eprintln!("  4. Run 'deploy-stage --stage {stage} apply --dry-run'");

    Ok(())
}

/// Validates the stage.
fn cmd_validate(args: &StageArgs, show_warnings: bool, formatter: &OutputFormatter) -> Result<()> {
    let loaded = load_stage(args)?;
    eprintln!("{}", formatter.format_validation(&loaded, show_warnings));
    Ok(())
}

/// Shows the validated stage.
fn cmd_show(args: &StageArgs, formatter: &OutputFormatter) -> Result<()> {
    let loaded = load_stage(args)?;
    eprintln!("{}", formatter.format_stage(loaded.config()));
    Ok(())
}

/// Applies the stage.
async fn cmd_apply(
    args: &StageArgs,
    auto_approve: bool,
    dry_run: bool,
    ssh_program: String,
    timeout: u64,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_stage(args)?.into_config();
    let registry = HookRegistry::from_definitions(config.hooks());

    eprintln!("{}", formatter.format_stage(&config));

    if !auto_approve && !dry_run {
        eprint!(
            "Deploy to {} host(s) as role '{}'? [y/N]: ",
            config.hosts().len(),
            config.role()
        );
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Apply cancelled.");
            return Ok(());
        }
    }

    let ssh = SshEngine::new()
        .with_program(ssh_program)
        .with_command_timeout(timeout);
    let engine: &dyn DeployEngine = if dry_run { &DryRunEngine } else { &ssh };

    let report = DeployRun::new(engine, &registry).apply(&config).await?;
    eprintln!("{}", formatter.format_report(&report));

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the stage file path.
fn resolve_stage_path(args: &StageArgs) -> Result<PathBuf> {
    match (&args.stage, &args.config) {
        (Some(stage), _) => find_stage_file(std::env::current_dir()?, stage),
        (None, Some(path)) => Ok(path.clone()),
        (None, None) => find_stage_file(std::env::current_dir()?, DEFAULT_STAGE),
    }
}

/// Loads and validates the stage selected by the global flags.
fn load_stage(args: &StageArgs) -> Result<LoadedStage> {
    if args.from_env {
        let loader = StageLoader::new().with_base_path(std::env::current_dir()?);
        loader.load_dotenv()?;
        debug!("Loading stage from environment");
        return loader.load(StageSource::Env);
    }

    let stage_file = resolve_stage_path(args)?;
    debug!("Loading stage from: {}", stage_file.display());

    let loader = StageLoader::new().with_base_path(project_root(&stage_file));
    loader.load_dotenv()?;
    loader.load(StageSource::File(stage_file))
}
