//! botfleet CLI
//!
//! The `botfleet` command provisions agent instances that share one
//! versioned runtime environment.
//!
//! ## Commands
//!
//! - `env`: build, update and inspect the shared environment
//! - `create`: provision a new instance
//! - `start` / `stop`: forward to the process supervisor
//! - `status` / `list`: reconcile the registry with live state
//! - `personas`: list persona templates

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use botfleet_core::{
    CreateRequest, Disposition, ErrorKind, Fleet, FleetError, InstanceStatus, PersonaChoice,
    UpdateOutcome,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

#[derive(Parser)]
#[command(name = "botfleet")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Provision and operate a fleet of agent instances", long_about = None)]
struct Cli {
    /// Fleet root directory
    #[arg(long, global = true, env = "BOTFLEET_ROOT", default_value = ".")]
    root: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and JSON command output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the shared runtime environment
    Env {
        #[command(subcommand)]
        action: EnvAction,
    },

    /// Provision a new instance
    Create {
        /// Instance name (lowercase letters, digits, inner hyphens)
        name: String,

        /// Host port (default: one above the highest assigned port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Model identifier (default from botfleet.toml)
        #[arg(short, long)]
        model: Option<String>,

        /// Persona template name, or `custom`
        #[arg(long, default_value = "assistant")]
        persona: String,

        /// Persona document for `--persona custom`
        #[arg(long)]
        persona_file: Option<PathBuf>,
    },

    /// Start one instance, or all of them
    Start {
        name: Option<String>,
    },

    /// Stop one instance, or all of them
    Stop {
        name: Option<String>,
    },

    /// Show instance status
    Status {
        name: Option<String>,
    },

    /// List provisioned instances
    List,

    /// List persona templates
    Personas,
}

#[derive(Subcommand)]
enum EnvAction {
    /// Rebuild the environment if the dependency spec changed
    Update,

    /// Build the environment, optionally even if it is current
    Build {
        /// Discard the stored fingerprint first
        #[arg(long)]
        force: bool,
    },

    /// Show fingerprints and provenance
    Status,

    /// List environment snapshots
    Backups,

    /// Delete old environment snapshots
    Prune {
        /// Number of newest snapshots to keep
        #[arg(long, default_value = "3")]
        keep: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    botfleet_core::init_tracing(cli.json, cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => report_error(&err),
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let fleet = Fleet::open(&cli.root)
        .with_context(|| format!("Failed to open fleet root {:?}", cli.root))?;
    let json = cli.json;

    match cli.command {
        Commands::Env { action } => match action {
            EnvAction::Update => cmd_env_update(&fleet, false, json).await,
            EnvAction::Build { force } => cmd_env_update(&fleet, force, json).await,
            EnvAction::Status => cmd_env_status(&fleet, json),
            EnvAction::Backups => cmd_env_backups(&fleet, json),
            EnvAction::Prune { keep } => cmd_env_prune(&fleet, keep),
        },
        Commands::Create {
            name,
            port,
            model,
            persona,
            persona_file,
        } => cmd_create(&fleet, name, port, model, &persona, persona_file.as_deref(), json),
        Commands::Start { name } => {
            fleet.start(name.as_deref()).await?;
            println!("Started {}", name.as_deref().unwrap_or("all instances"));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Stop { name } => {
            fleet.stop(name.as_deref()).await?;
            println!("Stopped {}", name.as_deref().unwrap_or("all instances"));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status { name } => cmd_status(&fleet, name.as_deref(), json).await,
        Commands::List => cmd_list(&fleet, json),
        Commands::Personas => cmd_personas(&fleet, json),
    }
}

// ========== Error reporting ==========

/// Exit code for a classified failure
fn exit_code_for(kind: ErrorKind, disposition: Disposition) -> u8 {
    if disposition == Disposition::PartiallyModified {
        return 70;
    }
    match kind {
        ErrorKind::Validation => 2,
        ErrorKind::Conflict => 3,
        ErrorKind::Dependency => 4,
        ErrorKind::Build => 5,
        ErrorKind::Io => 6,
    }
}

fn report_error(err: &anyhow::Error) -> ExitCode {
    match err.chain().find_map(|e| e.downcast_ref::<FleetError>()) {
        Some(fleet_err) => {
            eprintln!(
                "error[{}]: {} (entity: {}, state: {})",
                fleet_err.kind().as_str(),
                fleet_err,
                fleet_err.entity().as_str(),
                fleet_err.disposition().as_str()
            );
            if fleet_err.is_fatal() {
                eprintln!("State may be inconsistent; inspect it before retrying.");
            }
            ExitCode::from(exit_code_for(fleet_err.kind(), fleet_err.disposition()))
        }
        None => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

// ========== Environment Commands ==========

#[derive(Serialize)]
struct UpdateReport {
    outcome: &'static str,
    fingerprint: Option<String>,
    backup: Option<PathBuf>,
    error: Option<String>,
}

async fn cmd_env_update(fleet: &Fleet, force: bool, json: bool) -> Result<ExitCode> {
    if force {
        fleet.env().invalidate().map_err(FleetError::from)?;
        info!("Stored fingerprint discarded, forcing rebuild");
    }

    let outcome = fleet.env().update().await.map_err(FleetError::from)?;
    let report = match &outcome {
        UpdateOutcome::NoOp { fingerprint } => UpdateReport {
            outcome: outcome.label(),
            fingerprint: Some(fingerprint.to_string()),
            backup: None,
            error: None,
        },
        UpdateOutcome::Updated { version, backup } => UpdateReport {
            outcome: outcome.label(),
            fingerprint: Some(version.fingerprint.to_string()),
            backup: backup.clone(),
            error: None,
        },
        UpdateOutcome::FailedRolledBack { error, backup } => UpdateReport {
            outcome: outcome.label(),
            fingerprint: None,
            backup: backup.clone(),
            error: Some(error.to_string()),
        },
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        match &outcome {
            UpdateOutcome::NoOp { fingerprint } => {
                println!("Environment is current ({})", fingerprint.short());
            }
            UpdateOutcome::Updated { version, backup } => {
                println!("Environment updated ({})", version.fingerprint.short());
                println!("  Built at:   {}", version.built_at.to_rfc3339());
                println!("  Build host: {}", version.build_host);
                if let Some(backup) = backup {
                    println!("  Previous environment kept at {}", backup.display());
                }
            }
            UpdateOutcome::FailedRolledBack { .. } => {}
        }
    }

    if let UpdateOutcome::FailedRolledBack { error, backup } = &outcome {
        let state = if backup.is_some() {
            "previous environment restored"
        } else {
            "partial build removed"
        };
        let kind = ErrorKind::of_env(error);
        eprintln!(
            "error[{}]: {} (entity: environment, state: {}; {})",
            kind.as_str(),
            error,
            Disposition::RolledBack.as_str(),
            state
        );
        return Ok(ExitCode::from(exit_code_for(kind, Disposition::RolledBack)));
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Serialize)]
struct EnvStatus {
    spec_fingerprint: Option<String>,
    stored_fingerprint: Option<String>,
    needs_update: bool,
    artifact_present: bool,
    version: Option<botfleet_core::EnvironmentVersion>,
}

fn cmd_env_status(fleet: &Fleet, json: bool) -> Result<ExitCode> {
    let env = fleet.env();
    let status = EnvStatus {
        spec_fingerprint: env.current_fingerprint().ok().map(|f| f.to_string()),
        stored_fingerprint: env
            .stored_fingerprint()
            .map_err(FleetError::from)?
            .map(|f| f.to_string()),
        needs_update: env.needs_update().unwrap_or(true),
        artifact_present: env.has_artifact(),
        version: env.current_version().map_err(FleetError::from)?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(ExitCode::SUCCESS);
    }

    let short = |f: &Option<String>| {
        f.as_deref()
            .map(|s| s[..12.min(s.len())].to_string())
            .unwrap_or_else(|| "(none)".to_string())
    };
    println!("Dependency spec:  {}", env.layout().spec_path.display());
    println!("Spec fingerprint: {}", short(&status.spec_fingerprint));
    println!("Stored:           {}", short(&status.stored_fingerprint));
    println!(
        "Artifact:         {}",
        if status.artifact_present { "present" } else { "missing" }
    );
    if let Some(version) = &status.version {
        println!("Built at:         {}", version.built_at.to_rfc3339());
        println!("Build host:       {}", version.build_host);
    }
    println!(
        "Needs update:     {}",
        if status.needs_update { "yes" } else { "no" }
    );
    Ok(ExitCode::SUCCESS)
}

fn cmd_env_backups(fleet: &Fleet, json: bool) -> Result<ExitCode> {
    let backups = fleet.env().list_backups().map_err(FleetError::from)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&backups)?);
    } else if backups.is_empty() {
        println!("No environment backups.");
    } else {
        for backup in backups {
            println!("{}", backup.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_env_prune(fleet: &Fleet, keep: usize) -> Result<ExitCode> {
    let removed = fleet
        .env()
        .prune_backups(keep)
        .map_err(FleetError::from)?;
    println!("Removed {} backup(s), kept up to {}", removed.len(), keep);
    Ok(ExitCode::SUCCESS)
}

// ========== Instance Commands ==========

fn persona_choice(persona: &str, persona_file: Option<&Path>) -> Result<PersonaChoice> {
    let inline = persona_file
        .map(|path| {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read persona file {:?}", path))
        })
        .transpose()?;
    // a persona file implies a custom persona
    if inline.is_some() {
        return Ok(PersonaChoice::Custom(inline));
    }
    Ok(PersonaChoice::from_arg(persona, None))
}

fn cmd_create(
    fleet: &Fleet,
    name: String,
    port: Option<u16>,
    model: Option<String>,
    persona: &str,
    persona_file: Option<&Path>,
    json: bool,
) -> Result<ExitCode> {
    let request = CreateRequest {
        name,
        port,
        model,
        persona: persona_choice(persona, persona_file)?,
    };
    let instance = fleet.registry().create(&request)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&instance)?);
    } else {
        println!("Created instance {}", instance.name);
        println!("  Port:  {}", instance.port);
        println!("  Model: {}", instance.model);
        println!(
            "  Dir:   {}",
            fleet.registry().instance_dir(&instance.name).display()
        );
        println!();
        println!("Start it with: botfleet start {}", instance.name);
    }
    Ok(ExitCode::SUCCESS)
}

fn render_status_table(report: &[InstanceStatus]) -> String {
    let mut out = format!(
        "{:<20} {:<8} {:>6} {:>7} {}\n",
        "NAME", "STATE", "PORT", "CPU%", "MEMORY"
    );
    for s in report {
        out.push_str(&format!(
            "{:<20} {:<8} {:>6} {:>7} {}\n",
            s.name,
            s.state.as_str(),
            s.external_port.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
            s.cpu_percent
                .map(|c| format!("{c:.1}"))
                .unwrap_or_else(|| "-".into()),
            s.memory.as_deref().unwrap_or("-"),
        ));
    }
    out
}

async fn cmd_status(fleet: &Fleet, name: Option<&str>, json: bool) -> Result<ExitCode> {
    let aggregator = fleet.status();
    let report = match name {
        Some(name) => vec![aggregator.report_one(name).await?],
        None => aggregator.report().await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.is_empty() {
        println!("No instances. Create one with: botfleet create <name>");
    } else {
        print!("{}", render_status_table(&report));
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_list(fleet: &Fleet, json: bool) -> Result<ExitCode> {
    let instances = fleet.registry().list()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&instances)?);
        return Ok(ExitCode::SUCCESS);
    }
    if instances.is_empty() {
        println!("No instances.");
    }
    for instance in instances {
        println!(
            "{:<20} port {:<6} model {}",
            instance.name, instance.port, instance.model
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_personas(fleet: &Fleet, json: bool) -> Result<ExitCode> {
    let names = fleet.registry().personas().names()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&names)?);
        return Ok(ExitCode::SUCCESS);
    }
    println!(
        "Persona templates in {}:",
        fleet.registry().personas().dir().display()
    );
    if names.is_empty() {
        println!("  (none; new instances get a generated persona)");
    }
    for name in names {
        println!("  {}", name);
    }
    println!("  custom (use --persona-file, or get the generated default)");
    Ok(ExitCode::SUCCESS)
}
