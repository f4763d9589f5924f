// ABOUTME: CLI commands for the challenge catalog (import, list)
// ABOUTME: Imports descriptors from JSON files via upsert so re-imports update in place

use anyhow::Result;
use arena_cli::challenges::load_challenges;
use arena_cli::output::challenges_table;
use arena_cli::AppContext;
use clap::Subcommand;
use colored::*;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum ChallengesCommands {
    /// Import challenge descriptors from a JSON file (object or array)
    Import {
        /// Path to the JSON file
        path: PathBuf,
    },
    /// List all challenges
    List,
}

pub async fn handle_challenges_command(ctx: &AppContext, command: ChallengesCommands) -> Result<()> {
    match command {
        ChallengesCommands::Import { path } => {
            let challenges = load_challenges(&path)?;
            for challenge in &challenges {
                ctx.catalog.upsert_challenge(challenge).await?;
                println!("{} {}", "✓".green(), challenge.id);
            }
            println!("Imported {} challenge(s)", challenges.len());
            Ok(())
        }
        ChallengesCommands::List => {
            let challenges = ctx.catalog.list_challenges().await?;
            if challenges.is_empty() {
                println!("{}", "No challenges found".yellow());
                println!("{}", "Use 'arena challenges import <file>' to add some".dimmed());
                return Ok(());
            }
            println!("{}", challenges_table(&challenges));
            Ok(())
        }
    }
}
