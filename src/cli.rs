use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::commands::{self, CommandReport};
use crate::commands::search::SearchCommandOptions;
use crate::commands::sync::SyncCommandOptions;

#[derive(Parser)]
#[command(
    name = "session-recall",
    version,
    about = "Search past AI coding-assistant sessions by relevance"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct SearchArgs {
    /// Free-text query; words are joined with spaces
    query: Vec<String>,
    /// Earliest session end (RFC 3339 or YYYY-MM-DD)
    #[arg(long)]
    since: Option<String>,
    /// Latest session end (RFC 3339 or YYYY-MM-DD)
    #[arg(long)]
    until: Option<String>,
    /// Only sessions that ended within the last N days
    #[arg(long)]
    days: Option<u32>,
    /// Tool name fragment; repeat to accept any of several
    #[arg(long = "tool")]
    tools: Vec<String>,
    /// Substring of a file path touched by a tool call
    #[arg(long)]
    file: Option<String>,
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    limit: Option<u64>,
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Rank sessions against a query and filters
    Search(SearchArgs),
    /// Parse every session into the local store
    Sync {
        /// Re-parse sessions whose content hash is unchanged
        #[arg(long)]
        force: bool,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show resolved paths, config and store state
    Status {
        #[arg(long)]
        json: bool,
    },
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{}: {}", report.command, if report.ok { "ok" } else { "issues" });
        for detail in &report.details {
            println!("  {detail}");
        }
        for issue in &report.issues {
            println!("  issue: {issue}");
        }
    }
    if !report.ok {
        anyhow::bail!("{} reported {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}

fn run_search(args: SearchArgs) -> Result<()> {
    let opts = SearchCommandOptions {
        query: args.query,
        since: args.since,
        until: args.until,
        days: args.days,
        tools: args.tools,
        file: args.file,
        limit: args.limit.and_then(|n| usize::try_from(n).ok()),
    };
    let outcome = commands::search::run(&opts)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome.results)?);
    } else {
        print!("{}", commands::search::render_text(&outcome));
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Search(args) => run_search(args),
        Command::Sync {
            force,
            dry_run,
            json,
        } => {
            let report = commands::sync::run(&SyncCommandOptions { force, dry_run })?;
            print_report(&report, json)
        }
        Command::Status { json } => print_report(&commands::status::run()?, json),
    }
}
