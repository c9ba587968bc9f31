use std::io::IsTerminal;

use clap::Parser;
use color_eyre::Result;
use dpk_core::{CommandStatus, DpkCommand, ExecutionOutcome, GlobalOptions};
use serde_json::Value;

mod cli;
mod style;

use cli::{build_command, DpkCli};
use style::Style;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = DpkCli::parse();
    init_tracing(cli.trace, cli.verbose, cli.quiet);

    let global = GlobalOptions {
        quiet: cli.quiet,
        verbose: cli.verbose,
        trace: cli.trace,
        json: cli.json,
        offline: cli.offline,
        root: cli.root.clone(),
    };

    let command = build_command(&cli.command);
    let outcome = dpk_core::execute(&global, &command);
    let code = emit_output(&cli, &command, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8, quiet: bool) {
    let level = if trace {
        "trace"
    } else if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("dpk_core={level},dpk_domain={level},dpk={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn emit_output(cli: &DpkCli, command: &DpkCommand, outcome: &ExecutionOutcome) -> Result<i32> {
    let code = outcome.exit_code();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome.to_json_response())?);
        return Ok(code);
    }
    if cli.quiet {
        if outcome.status != CommandStatus::Ok {
            eprintln!("{}", outcome.message);
        }
        return Ok(code);
    }

    let style = Style::new(cli.no_color, std::io::stdout().is_terminal());
    let message = format!("dpk {}: {}", command.name(), outcome.message);
    println!("{}", style.status(&outcome.status, &message));
    if let Some(hint) = hint_from_details(&outcome.details) {
        println!("{}", style.info(&format!("Hint: {hint}")));
    }
    if let Some(table) = render_table(&style, command, &outcome.details) {
        println!("{table}");
    }
    Ok(code)
}

fn hint_from_details(details: &Value) -> Option<&str> {
    details
        .as_object()
        .and_then(|map| map.get("hint"))
        .and_then(Value::as_str)
}

fn render_table(style: &Style, command: &DpkCommand, details: &Value) -> Option<String> {
    let (key, headers, fields): (&str, &[&str], &[&str]) = match command {
        DpkCommand::Tags => (
            "tags",
            &["Tag", "Revision", "Profiles", "Label"][..],
            &["name", "revision", "profiles", "label"][..],
        ),
        DpkCommand::Profiles { .. } => (
            "profiles",
            &["File", "Title", "Cached"][..],
            &["file_name", "title", "cached"][..],
        ),
        DpkCommand::Backups => (
            "snapshots",
            &["Snapshot", "Label"][..],
            &["snapshot", "label"][..],
        ),
        _ => return None,
    };
    let items = details.get(key)?.as_array()?;
    if items.is_empty() {
        return None;
    }
    let rows: Vec<Vec<String>> = items
        .iter()
        .map(|item| fields.iter().map(|field| cell(item.get(*field))).collect())
        .collect();
    Some(format_table(style, headers, &rows))
}

fn join_cells(cells: impl Iterator<Item = String>, widths: &[usize]) -> String {
    cells
        .zip(widths.iter().copied())
        .map(|(text, width)| format!("{text:<width$}"))
        .collect::<Vec<_>>()
        .join("  ")
        .trim_end()
        .to_string()
}

fn cell(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn format_table(style: &Style, headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, value) in widths.iter_mut().zip(row) {
            *width = (*width).max(value.chars().count());
        }
    }
    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(style.table_header(&join_cells(
        headers.iter().map(|h| (*h).to_string()),
        &widths,
    )));
    lines.push(join_cells(widths.iter().map(|w| "-".repeat(*w)), &widths));
    for row in rows {
        lines.push(join_cells(row.iter().cloned(), &widths));
    }
    lines.join("\n")
}
