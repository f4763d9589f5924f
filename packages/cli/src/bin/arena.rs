use anyhow::Context;
use arena_cli::output::{print_reconcile_report, print_sweep_report};
use arena_cli::AppContext;
use arena_config::OrchestratorConfig;
use arena_instance::{ManagerError, ReconcileOptions};
use clap::{Parser, Subcommand};
use colored::*;
use std::process;
use tracing::{info, warn};

mod cli;

use cli::challenges::ChallengesCommands;
use cli::instances::InstancesCommands;

#[derive(Parser)]
#[command(name = "arena")]
#[command(about = "Arena - per-participant challenge instance orchestrator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile with the engine, then sweep expired instances until interrupted
    Serve {
        /// Adopt containers of instances that are still scheduled to be live
        #[arg(long)]
        reattach: bool,
    },
    /// Match engine containers against instance records
    Reconcile {
        /// Report what would change without touching anything
        #[arg(long)]
        dry_run: bool,
        /// Adopt containers of instances that are still scheduled to be live
        #[arg(long)]
        reattach: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a single expiry sweep
    Sweep,
    /// Inspect instance records
    #[command(subcommand)]
    Instances(InstancesCommands),
    /// Manage the challenge catalog
    #[command(subcommand)]
    Challenges(ChallengesCommands),
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    arena_cli::init_tracing();

    let cli = Cli::parse();

    if let Err(e) = handle_command(cli.command).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn handle_command(command: Commands) -> anyhow::Result<()> {
    let ctx = load_context().await?;

    match command {
        Commands::Serve { reattach } => serve(ctx, reattach).await,
        Commands::Reconcile {
            dry_run,
            reattach,
            json,
        } => {
            let report = ctx
                .manager
                .reconcile(ReconcileOptions { dry_run, reattach })
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_reconcile_report(&report, dry_run);
            }
            Ok(())
        }
        Commands::Sweep => {
            let report = ctx.sweeper().sweep_once().await?;
            print_sweep_report(&report);
            Ok(())
        }
        Commands::Instances(command) => cli::instances::handle_instances_command(&ctx, command).await,
        Commands::Challenges(command) => {
            cli::challenges::handle_challenges_command(&ctx, command).await
        }
    }
}

async fn load_context() -> anyhow::Result<AppContext> {
    let config = OrchestratorConfig::from_env().context("Invalid configuration")?;
    AppContext::from_config(config)
        .await
        .context("Failed to start orchestrator")
}

async fn serve(ctx: AppContext, reattach: bool) -> anyhow::Result<()> {
    match ctx
        .manager
        .reconcile(ReconcileOptions {
            dry_run: false,
            reattach,
        })
        .await
    {
        Ok(report) => print_reconcile_report(&report, false),
        Err(ManagerError::NotConfigured) => {
            warn!("No container provider configured; skipping reconcile")
        }
        Err(e) => return Err(e).context("Startup reconcile failed"),
    }

    let sweeper = ctx.sweeper();
    sweeper.start().await;

    println!(
        "{} sweeping every {:?} (Ctrl+C to stop)",
        "Arena running:".green().bold(),
        ctx.config.sweep_interval
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutdown requested");
    sweeper.stop().await;
    Ok(())
}
