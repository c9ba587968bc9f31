//! One entry point per user-facing operation, each producing an [`ExecutionOutcome`].

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{Config, GlobalOptions};
use crate::error::DpkError;
use crate::installation::match_tag;
use crate::library_store::SelfUpdate;
use crate::outcome::ExecutionOutcome;
use crate::session::Session;
use crate::worker::BackgroundWorker;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DpkCommand {
    Status,
    Tags,
    Profiles { tag: String },
    Install { tag: String, files: Vec<String> },
    Sync,
    SelfUpdate,
    Backup,
    Backups,
    Restore { snapshot: String },
}

impl DpkCommand {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Tags => "tags",
            Self::Profiles { .. } => "profiles",
            Self::Install { .. } => "install",
            Self::Sync => "sync",
            Self::SelfUpdate => "self-update",
            Self::Backup => "backup",
            Self::Backups => "backups",
            Self::Restore { .. } => "restore",
        }
    }
}

/// Everything a command needs: the open session and the worker that runs long jobs.
pub struct CommandContext {
    session: Arc<Session>,
    worker: BackgroundWorker,
}

impl CommandContext {
    /// Opens the configured installation and starts the worker.
    ///
    /// # Errors
    /// Fails when the session cannot be opened or the worker cannot start.
    pub fn new(config: &Config) -> Result<Self, DpkError> {
        Ok(Self::with_session(Session::open(config)?, BackgroundWorker::spawn()?))
    }

    #[must_use]
    pub fn with_session(session: Session, worker: BackgroundWorker) -> Self {
        Self {
            session: Arc::new(session),
            worker,
        }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    fn background<T, F>(&self, label: &'static str, job: F) -> Result<T, DpkError>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> Result<T, DpkError> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        self.worker.submit(label, move || job(session.as_ref())).wait()
    }
}

/// Resolves configuration, opens the installation and runs `command`.
///
/// Errors never escape; they become user-error or failure outcomes.
#[must_use]
pub fn execute(global: &GlobalOptions, command: &DpkCommand) -> ExecutionOutcome {
    let config = match Config::from_env(global) {
        Ok(config) => config,
        Err(err) => {
            return ExecutionOutcome::user_error(
                format!("invalid configuration: {err:#}"),
                json!({ "reason": "config" }),
            )
        }
    };
    match CommandContext::new(&config) {
        Ok(ctx) => run(&ctx, command),
        Err(err) => ExecutionOutcome::from_error(&err),
    }
}

#[must_use]
pub fn run(ctx: &CommandContext, command: &DpkCommand) -> ExecutionOutcome {
    debug!(command = command.name(), "dispatching");
    let result = match command {
        DpkCommand::Status => status(ctx),
        DpkCommand::Tags => tags(ctx),
        DpkCommand::Profiles { tag } => profiles(ctx, tag),
        DpkCommand::Install { tag, files } => install(ctx, tag, files),
        DpkCommand::Sync => sync(ctx),
        DpkCommand::SelfUpdate => self_update(ctx),
        DpkCommand::Backup => backup(ctx),
        DpkCommand::Backups => backups(ctx),
        DpkCommand::Restore { snapshot } => restore(ctx, snapshot),
    };
    result.unwrap_or_else(|err| ExecutionOutcome::from_error(&err))
}

fn to_details<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn status(ctx: &CommandContext) -> Result<ExecutionOutcome, DpkError> {
    let session = ctx.session();
    let installation = session.installation();
    let version = installation.installed_version().ok();
    let installed = installation.installed_profiles()?;
    let snapshots = session.snapshots()?;
    let (library, matched) = session.with_library(|library| {
        let matched = version
            .as_deref()
            .and_then(|v| match_tag(library, v))
            .map(|tag| tag.label());
        let summary = json!({
            "version": library.version(),
            "tags": library.tags().len(),
            "cached_profiles": library.content_cache().len(),
            "cached_bytes": library.content_cache().size_bytes(),
        });
        (summary, matched)
    });
    let message = match &version {
        Some(v) => format!("DE1 app {v}, {} profiles installed", installed.len()),
        None => format!("unknown DE1 app version, {} profiles installed", installed.len()),
    };
    Ok(ExecutionOutcome::success(
        message,
        json!({
            "root": installation.root().display().to_string(),
            "installed_version": version,
            "matched_tag": matched,
            "installed_profiles": installed.len(),
            "library": library,
            "library_source": session.library_source(),
            "snapshots": snapshots.len(),
            "latest_snapshot": snapshots.last().map(ToString::to_string),
            "online": session.is_online(),
        }),
    ))
}

fn tags(ctx: &CommandContext) -> Result<ExecutionOutcome, DpkError> {
    let rows: Vec<Value> = ctx.session().with_library(|library| {
        library
            .tags_as_list()
            .into_iter()
            .map(|tag| {
                json!({
                    "name": tag.name,
                    "revision": tag.revision_hash,
                    "label": tag.label(),
                    "profiles": tag.profiles.len(),
                })
            })
            .collect()
    });
    let message = if rows.is_empty() {
        "no tags known yet; run `dpk sync`".to_string()
    } else {
        format!("{} tags known", rows.len())
    };
    Ok(ExecutionOutcome::success(message, json!({ "tags": rows })))
}

fn profiles(ctx: &CommandContext, query: &str) -> Result<ExecutionOutcome, DpkError> {
    ctx.session().with_library(|library| {
        let tag = library
            .find_tag(query)
            .ok_or_else(|| DpkError::UnknownTag(query.to_string()))?;
        let rows: Vec<Value> = tag
            .profiles
            .iter()
            .map(|profile| {
                json!({
                    "file_name": profile.file_name,
                    "title": profile.display_name,
                    "content_hash": profile.content_hash,
                    "cached": library.content_for(profile).is_some(),
                })
            })
            .collect();
        Ok(ExecutionOutcome::success(
            tag.label(),
            json!({ "tag": tag.name, "revision": tag.revision_hash, "profiles": rows }),
        ))
    })
}

fn install(ctx: &CommandContext, tag: &str, files: &[String]) -> Result<ExecutionOutcome, DpkError> {
    let query = tag.to_string();
    let files = files.to_vec();
    let report = ctx.background("install", move |session| session.install(&query, &files))?;
    let message = format!(
        "installed {} profiles from {}",
        report.installed.len(),
        report.tag
    );
    let details = to_details(&report);
    if report.failed.is_empty() && report.unknown.is_empty() {
        Ok(ExecutionOutcome::success(message, details))
    } else if report.installed.is_empty() && !report.unknown.is_empty() {
        Ok(ExecutionOutcome::user_error(
            format!("no matching profiles in {}", report.tag),
            details,
        ))
    } else {
        Ok(ExecutionOutcome::failure(
            format!("{message}; {} failed", report.failed.len() + report.unknown.len()),
            details,
        ))
    }
}

fn sync(ctx: &CommandContext) -> Result<ExecutionOutcome, DpkError> {
    let report = ctx.background("sync", Session::sync)?;
    let message = if report.merged.is_empty() {
        "library is up to date".to_string()
    } else {
        format!(
            "merged {} new tags (library version {})",
            report.merged.len(),
            report.version
        )
    };
    Ok(ExecutionOutcome::success(message, to_details(&report)))
}

fn self_update(ctx: &CommandContext) -> Result<ExecutionOutcome, DpkError> {
    let outcome = ctx.background("self-update", Session::self_update)?;
    let message = match &outcome {
        SelfUpdate::Updated { from, to, release } => {
            format!("library updated from {from} to {to} (release {release})")
        }
        SelfUpdate::AlreadyLatest { version, .. } => {
            format!("library {version} is already the latest")
        }
        SelfUpdate::NoRelease => "no library release published".to_string(),
    };
    Ok(ExecutionOutcome::success(message, to_details(&outcome)))
}

fn backup(ctx: &CommandContext) -> Result<ExecutionOutcome, DpkError> {
    let name = ctx.background("backup", Session::backup)?;
    Ok(ExecutionOutcome::success(
        format!("created backup {name}"),
        json!({
            "snapshot": name.file_name(),
            "profiles": name.entry_count,
            "created_at_millis": name.created_at_millis,
        }),
    ))
}

fn backups(ctx: &CommandContext) -> Result<ExecutionOutcome, DpkError> {
    let names = ctx.session().snapshots()?;
    let rows: Vec<Value> = names
        .iter()
        .rev()
        .map(|name| json!({ "snapshot": name.file_name(), "label": name.to_string() }))
        .collect();
    Ok(ExecutionOutcome::success(
        format!("{} backups", rows.len()),
        json!({ "snapshots": rows }),
    ))
}

fn restore(ctx: &CommandContext, snapshot: &str) -> Result<ExecutionOutcome, DpkError> {
    let snapshot = snapshot.to_string();
    let report = ctx.background("restore", move |session| session.restore(&snapshot))?;
    let message = format!(
        "restored {} profiles from {}",
        report.written.len(),
        report.snapshot
    );
    let details = to_details(&report);
    if report.failed.is_empty() {
        Ok(ExecutionOutcome::success(message, details))
    } else {
        Ok(ExecutionOutcome::failure(
            format!("{message}; {} failed", report.failed.len()),
            details,
        ))
    }
}
