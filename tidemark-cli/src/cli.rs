//! CLI argument definitions using clap.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

use tidemark_migrate::VersionId;

use crate::config::CONFIG_FILE_NAME;

/// Tidemark - versioned SQL migrations for PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "tidemark")]
#[command(version)]
#[command(about = "Tidemark - versioned SQL migrations for PostgreSQL", long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE_NAME)]
    pub config: PathBuf,

    /// Database connection URL (overrides the configuration file)
    #[arg(long, global = true, env = "TIDEMARK_DB_URL", hide_env_values = true)]
    pub db_url: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Database migration commands
    Migrate(MigrateArgs),

    /// Apply seed files that have not been applied yet
    Seed(SeedArgs),

    /// Display version information
    Version,
}

// =============================================================================
// Migrate Command
// =============================================================================

/// Arguments for the `migrate` command
#[derive(Args, Debug)]
pub struct MigrateArgs {
    #[command(subcommand)]
    pub command: MigrateSubcommand,
}

/// Migrate subcommands
#[derive(Subcommand, Debug)]
pub enum MigrateSubcommand {
    /// Apply pending migrations, then seed files
    Up(MigrateUpArgs),

    /// List local and remote migration versions
    List(MigrateListArgs),

    /// Create an empty migration file
    New(MigrateNewArgs),
}

/// Arguments for `migrate up`
#[derive(Args, Debug)]
pub struct MigrateUpArgs {
    /// Apply migrations up to and including this version
    #[arg(long, value_name = "VERSION", value_parser = parse_version)]
    pub target: Option<VersionId>,

    /// Show what would be applied without changing the database
    #[arg(long)]
    pub dry_run: bool,

    /// Skip seed files after migrating
    #[arg(long)]
    pub skip_seed: bool,
}

/// Arguments for `migrate list`
#[derive(Args, Debug)]
pub struct MigrateListArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `migrate new`
#[derive(Args, Debug)]
pub struct MigrateNewArgs {
    /// Name for the migration (letters, digits, `_` and `-`)
    pub name: String,
}

// =============================================================================
// Seed Command
// =============================================================================

/// Arguments for the `seed` command
#[derive(Args, Debug)]
pub struct SeedArgs {
    /// Show which seeds would run without changing the database
    #[arg(long)]
    pub dry_run: bool,
}

fn parse_version(raw: &str) -> Result<VersionId, String> {
    VersionId::parse(raw).map_err(|e| e.to_string())
}
