use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use dpk_core::DpkCommand;

pub const DPK_HELP_TEMPLATE: &str =
    "{before-help}\nUsage:\n    {usage}\n\nGlobal options:\n{options}\n";

pub const DPK_BEFORE_HELP: &str = concat!(
    "dpk ",
    env!("CARGO_PKG_VERSION"),
    " – DE1 profile keeper\n\n",
    "\x1b[1;36mLibrary\x1b[0m\n",
    "  sync             Mirror new catalog tags into the local profile library.\n",
    "  self-update      Replace the library with a newer published one.\n",
    "  tags             List known tags, newest first.\n",
    "  profiles         Show the profiles recorded for one tag.\n",
    "  install          Copy a tag's profiles into the app's profile folder.\n\n",
    "\x1b[1;36mBackups\x1b[0m\n",
    "  backup           Snapshot the profile folder.\n",
    "  backups          List snapshots, newest first.\n",
    "  restore          Write a snapshot back into the profile folder.\n\n",
    "\x1b[1;36mInfo\x1b[0m\n",
    "  status           Installed app version, matching tag, library and backups.\n",
);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    propagate_version = false,
    disable_help_subcommand = true,
    before_help = DPK_BEFORE_HELP,
    help_template = DPK_HELP_TEMPLATE
)]
#[allow(clippy::struct_excessive_bools)]
pub struct DpkCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)",
        global = true
    )]
    pub quiet: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)", global = true)]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(
        long,
        help = "Emit {status,message,details} JSON envelopes",
        global = true
    )]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[arg(
        long,
        help = "Disable the catalog for this invocation",
        global = true
    )]
    pub offline: bool,
    #[arg(
        long,
        value_name = "DIR",
        env = "DPK_ROOT",
        help = "DE1 app folder containing version.tcl",
        global = true
    )]
    pub root: Option<PathBuf>,
    #[command(subcommand)]
    pub command: CommandCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandCli {
    #[command(about = "Show the installed app version, matching tag, library and backups.")]
    Status,
    #[command(about = "List known tags, newest first.")]
    Tags,
    #[command(
        about = "Show the profiles recorded for one tag.",
        override_usage = "dpk profiles <TAG>"
    )]
    Profiles(TagArgs),
    #[command(
        about = "Copy a tag's profiles into the app's profile folder.",
        override_usage = "dpk install <TAG> [FILE ...]"
    )]
    Install(InstallArgs),
    #[command(about = "Mirror new catalog tags into the local profile library.")]
    Sync,
    #[command(about = "Replace the library with a newer published one.")]
    SelfUpdate,
    #[command(about = "Snapshot the profile folder.")]
    Backup,
    #[command(about = "List snapshots, newest first.")]
    Backups,
    #[command(
        about = "Write a snapshot back into the profile folder.",
        override_usage = "dpk restore <SNAPSHOT|latest>"
    )]
    Restore(RestoreArgs),
}

#[derive(Args, Debug)]
pub struct TagArgs {
    #[arg(value_name = "TAG", help = "Tag name, revision hash, or hash prefix")]
    pub tag: String,
}

#[derive(Args, Debug)]
pub struct InstallArgs {
    #[arg(value_name = "TAG", help = "Tag name, revision hash, or hash prefix")]
    pub tag: String,
    #[arg(value_name = "FILE", help = "Profile file names to install (default: all)")]
    pub files: Vec<String>,
}

#[derive(Args, Debug)]
pub struct RestoreArgs {
    #[arg(
        value_name = "SNAPSHOT",
        help = "Snapshot file name from `dpk backups`, or `latest`"
    )]
    pub snapshot: String,
}

pub fn build_command(command: &CommandCli) -> DpkCommand {
    match command {
        CommandCli::Status => DpkCommand::Status,
        CommandCli::Tags => DpkCommand::Tags,
        CommandCli::Profiles(args) => DpkCommand::Profiles {
            tag: args.tag.clone(),
        },
        CommandCli::Install(args) => DpkCommand::Install {
            tag: args.tag.clone(),
            files: args.files.clone(),
        },
        CommandCli::Sync => DpkCommand::Sync,
        CommandCli::SelfUpdate => DpkCommand::SelfUpdate,
        CommandCli::Backup => DpkCommand::Backup,
        CommandCli::Backups => DpkCommand::Backups,
        CommandCli::Restore(args) => DpkCommand::Restore {
            snapshot: args.snapshot.clone(),
        },
    }
}
