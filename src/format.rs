use colored::Colorize;
use std::collections::HashMap;
use std::time::SystemTime;

use corpus_graph_ingest::graph::FileState;
use corpus_graph_ingest::processor::{DiscoveredReport, LinkedReport, RecoverReport};
use corpus_graph_ingest::Config;

/// Format a timestamp as a human-readable relative time string.
pub fn format_timestamp(time: SystemTime) -> String {
    let elapsed = match SystemTime::now().duration_since(time) {
        Ok(d) => d,
        Err(_) => return "in the future".to_string(),
    };

    let secs = elapsed.as_secs();
    if secs < 60 {
        return "just now".to_string();
    }

    let mins = secs / 60;
    if mins < 60 {
        return if mins == 1 { "1 minute ago".to_string() } else { format!("{mins} minutes ago") };
    }

    let hours = mins / 60;
    if hours < 24 {
        return if hours == 1 { "1 hour ago".to_string() } else { format!("{hours} hours ago") };
    }

    let days = hours / 24;
    if days == 1 { "1 day ago".to_string() } else { format!("{days} days ago") }
}

/// Print the tool's banner followed by version.
pub fn print_version() {
    println!("{}", "corpus-graph-ingest".bold().cyan());
    println!("  {} {}", "v".dimmed(), env!("CARGO_PKG_VERSION").bold());
    println!("  {}", "Corpus ingestion pipeline: discover, parse, link, extract, embed".dimmed());
}

pub fn print_logo() {
    println!("{}", "corpus-graph-ingest".bold().cyan());
}

pub fn print_discovered_report(report: &DiscoveredReport) {
    println!("\n  {} {}\n", "✓".green().bold(), "Discovery phase complete".bold());
    println!("  {}  {}", "Files parsed:".dimmed(), report.files_parsed.to_string().green());
    println!("  {} {}", "Files errored:".dimmed(), report.files_errored.to_string().yellow());
    println!(
        "  {} {}",
        "Pending imports resolved:".dimmed(),
        report.pending_resolved.to_string().green()
    );
    println!(
        "  {} {}",
        "Pending imports remaining:".dimmed(),
        report.pending_remaining.to_string().yellow()
    );
}

pub fn print_linked_report(report: &LinkedReport) {
    println!("\n  {} {}\n", "✓".green().bold(), "Linked phase complete".bold());
    println!("  {} {}", "Entities processed:".dimmed(), report.entities_processed.to_string().yellow());
    println!("  {} {}", "Entities created:".dimmed(), report.entities_created.to_string().green());
    println!("  {}   {}", "Nodes embedded:".dimmed(), report.nodes_embedded.to_string().green());
    println!("  {}  {}", "Chunks created:".dimmed(), report.chunks_created.to_string().green());
    println!("  {}   {}", "Files embedded:".dimmed(), report.files_embedded.to_string().green());
}

pub fn print_ingest_summary(discovered: &DiscoveredReport, linked: &LinkedReport) {
    print_discovered_report(discovered);
    print_linked_report(linked);
    println!();
}

pub fn print_recover_report(report: &RecoverReport) {
    println!("\n  {} {}\n", "✓".green().bold(), "Recovery complete".bold());
    println!("  {}  {}", "States reset:".dimmed(), report.states_reset.to_string().yellow());
    println!("  {}  {}", "Files recovered:".dimmed(), report.files_recovered.to_string().green());
    println!("  {}  {}", "Files still in error:".dimmed(), report.files_in_error.to_string().yellow());
    println!();
}

pub fn print_state_stats(stats: &HashMap<FileState, usize>) {
    println!("\n  {} {}\n", "●".cyan().bold(), "Corpus Status".bold());
    let mut states = FileState::all().to_vec();
    states.sort_by_key(|s| s.as_str().to_string());
    for state in states {
        let count = stats.get(&state).copied().unwrap_or(0);
        println!("  {:<12} {}", format!("{state}:").cyan(), count.to_string().yellow());
    }
    println!();
}

pub fn print_config(config: &Config) {
    println!("\n  {} {}\n", "●".cyan().bold(), "Resolved Configuration".bold());
    println!("  {} {:?}", "Embedding provider:".dimmed(), config.embedding_provider);
    println!("  {}    {}", "Embedding model:".dimmed(), config.embedding_model);
    println!("  {}   {}", "Dimensions:".dimmed(), config.embedding_dimensions.to_string().yellow());
    println!("  {}     {}", "Entity service:".dimmed(), config.entity_service_endpoint);
    println!(
        "  {}     {}",
        "Source dirs:".dimmed(),
        config
            .source_dirs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  {}  {}", "Watch enabled:".dimmed(), config.watch_enabled);
    println!(
        "  {} {}ms",
        "Watch debounce:".dimmed(),
        config.watch_debounce_ms
    );
    println!();
}

pub fn print_init_success(path: &str) {
    println!("  {} created default config at {}", "✓".green().bold(), path.bold());
}

pub fn print_watch_started(dirs: &[String]) {
    println!(
        "  {} watching {} for changes...",
        "●".cyan().bold(),
        dirs.join(", ").bold()
    );
    println!("  {}", "Press Ctrl+C to stop.".dimmed());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn format_timestamp_just_now() {
        assert_eq!(format_timestamp(SystemTime::now()), "just now");
    }

    #[test]
    fn format_timestamp_minutes_ago() {
        let t = SystemTime::now() - Duration::from_secs(120);
        assert_eq!(format_timestamp(t), "2 minutes ago");
    }

    #[test]
    fn format_timestamp_hours_ago() {
        let t = SystemTime::now() - Duration::from_secs(3 * 3600);
        assert_eq!(format_timestamp(t), "3 hours ago");
    }

    #[test]
    fn print_discovered_report_does_not_panic_on_empty() {
        print_discovered_report(&DiscoveredReport::default());
    }

    #[test]
    fn print_state_stats_does_not_panic_on_empty() {
        print_state_stats(&HashMap::new());
    }
}
