// ABOUTME: Terminal rendering of instances, challenges and reports
// ABOUTME: Builds comfy-table tables and colored status labels

use arena_instance::{
    BackendStatus, ChallengeDescriptor, InstanceView, PortBinding, ReconcileReport, SweepReport,
};
use chrono::{DateTime, Utc};
use colored::*;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn status_label(status: BackendStatus, degraded: bool) -> ColoredString {
    if degraded {
        return "degraded".yellow();
    }
    match status {
        BackendStatus::Running => status.as_str().green(),
        BackendStatus::Created | BackendStatus::Paused => status.as_str().yellow(),
        BackendStatus::Exited | BackendStatus::Removed => status.as_str().dimmed(),
        BackendStatus::Unknown => status.as_str().red(),
    }
}

pub fn format_entries(entries: &[PortBinding]) -> String {
    if entries.is_empty() {
        return "-".to_string();
    }
    entries
        .iter()
        .map(|binding| match &binding.entry {
            Some(entry) => format!("{} -> {}", binding.container_port, entry),
            None => format!("{} -> :{}", binding.container_port, binding.host_port),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Time left until `removed_at`, or "expired"
pub fn format_remaining(removed_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let left = (removed_at - now).num_seconds();
    if left <= 0 {
        return "expired".to_string();
    }
    let (hours, minutes, seconds) = (left / 3600, (left % 3600) / 60, left % 60);
    if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

fn owner_label(view: &InstanceView) -> String {
    match (&view.team_id, &view.game_id) {
        (Some(team), Some(game)) => format!("{} ({}/{})", view.user_id, team, game),
        (Some(team), None) => format!("{} ({})", view.user_id, team),
        _ => view.user_id.clone(),
    }
}

pub fn instances_table(views: &[InstanceView], now: DateTime<Utc>) -> Table {
    let detailed = views.iter().any(|v| v.flag.is_some());

    let mut table = new_table();
    let mut header = vec!["ID", "Challenge", "Owner", "Status", "Entries", "Remaining"];
    if detailed {
        header.push("Flag");
    }
    table.set_header(header);

    for view in views {
        let mut row = vec![
            view.id.clone(),
            view.challenge_id.clone(),
            owner_label(view),
            status_label(view.status, view.degraded).to_string(),
            format_entries(&view.entries),
            format_remaining(view.removed_at, now),
        ];
        if detailed {
            row.push(view.flag.clone().unwrap_or_default());
        }
        table.add_row(row);
    }
    table
}

pub fn challenges_table(challenges: &[ChallengeDescriptor]) -> Table {
    let mut table = new_table();
    table.set_header(vec!["ID", "Image", "Ports", "Memory", "CPU", "Duration", "Flag"]);

    for challenge in challenges {
        let ports = challenge
            .container_ports()
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let memory = match challenge.memory_limit_mb {
            0 => "-".to_string(),
            mb => format!("{} MB", mb),
        };
        let cpu = if challenge.cpu_cores > 0.0 {
            format!("{}", challenge.cpu_cores)
        } else {
            "-".to_string()
        };

        table.add_row(vec![
            challenge.id.clone(),
            challenge.image.clone(),
            if ports.is_empty() { "-".to_string() } else { ports },
            memory,
            cpu,
            format!("{}s", challenge.duration_secs),
            challenge.flag_kind.as_str().to_string(),
        ]);
    }
    table
}

pub fn print_reconcile_report(report: &ReconcileReport, dry_run: bool) {
    let title = if dry_run {
        "Reconcile (dry run)"
    } else {
        "Reconcile"
    };
    println!("{}", title.blue().bold());
    println!("  Containers scanned: {}", report.scanned);
    println!("  Torn down:          {}", report.torn_down);
    println!("  Re-attached:        {}", report.reattached);

    if report.degraded.is_empty() {
        println!("  Degraded:           0");
    } else {
        println!(
            "  Degraded:           {}",
            report.degraded.len().to_string().yellow()
        );
        for id in &report.degraded {
            println!("    {}", id.yellow());
        }
    }

    for error in &report.errors {
        println!("  {} {}", "✗".red(), error);
    }
}

pub fn print_sweep_report(report: &SweepReport) {
    println!(
        "{} reclaimed {}, failed {}, pruned {}",
        "Sweep:".blue().bold(),
        report.reclaimed,
        report.failed,
        report.pruned
    );
}
