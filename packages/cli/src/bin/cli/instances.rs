// ABOUTME: CLI commands for querying instance records
// ABOUTME: Lists and shows instances with their live status as seen from this process

use anyhow::Result;
use arena_cli::output::{format_entries, format_remaining, instances_table, status_label};
use arena_cli::AppContext;
use arena_instance::InstanceFilter;
use chrono::Utc;
use clap::Subcommand;
use colored::*;

#[derive(Subcommand)]
pub enum InstancesCommands {
    /// List instances matching the filters.
    ///
    /// Live status is probed from this process only, which tracks no runtimes;
    /// records still scheduled to run show as degraded.
    List {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        team: Option<String>,
        #[arg(long)]
        game: Option<String>,
        #[arg(long)]
        challenge: Option<String>,
        /// Only instances whose removal time is still ahead
        #[arg(long, conflicts_with = "expired")]
        available: bool,
        /// Only instances whose removal time has passed
        #[arg(long)]
        expired: bool,
        /// Include flags
        #[arg(long)]
        detailed: bool,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        size: Option<u32>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show one instance (status as seen from this command, not a running server)
    Show {
        id: String,
        /// Include the flag
        #[arg(long)]
        detailed: bool,
    },
}

pub async fn handle_instances_command(ctx: &AppContext, command: InstancesCommands) -> Result<()> {
    match command {
        InstancesCommands::List {
            user,
            team,
            game,
            challenge,
            available,
            expired,
            detailed,
            page,
            size,
            json,
        } => {
            let is_available = match (available, expired) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let views = ctx
                .manager
                .find(InstanceFilter {
                    user_id: user,
                    team_id: team,
                    game_id: game,
                    challenge_id: challenge,
                    is_available,
                    detailed,
                    page,
                    size,
                    ..Default::default()
                })
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&views)?);
            } else if views.is_empty() {
                println!("{}", "No instances found".yellow());
            } else {
                println!("{}", instances_table(&views, Utc::now()));
                println!(
                    "{}",
                    "Status is as seen from this command; instances served by a running \
                     `arena serve` show as degraded here."
                        .dimmed()
                );
            }
            Ok(())
        }
        InstancesCommands::Show { id, detailed } => {
            let view = ctx.manager.find_by_id(&id, detailed).await?;

            println!("{}", format!("Instance {}", view.id).blue().bold());
            println!("  Challenge: {}", view.challenge_id);
            println!("  User:      {}", view.user_id);
            if let Some(team) = &view.team_id {
                println!("  Team:      {}", team);
            }
            if let Some(game) = &view.game_id {
                println!("  Game:      {}", game);
            }
            println!("  Status:    {}", status_label(view.status, view.degraded));
            println!("  Created:   {}", view.created_at.to_rfc3339());
            println!(
                "  Removal:   {} ({})",
                view.removed_at.to_rfc3339(),
                format_remaining(view.removed_at, Utc::now())
            );
            if let Some(flag) = &view.flag {
                println!("  Flag:      {}", flag);
            }
            println!("  Entries:");
            for line in format_entries(&view.entries).lines() {
                println!("    {}", line);
            }
            Ok(())
        }
    }
}
