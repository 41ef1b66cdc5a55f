//! `tidemark migrate` commands - Database migration management.

use serde::Serialize;

use tidemark_migrate::{
    ExecutionMode, MigrationEngine, MigrationResult, MigrationSource, VersionId, VersionRow,
};

use crate::cli::{MigrateArgs, MigrateListArgs, MigrateNewArgs, MigrateSubcommand, MigrateUpArgs};
use crate::commands::Context;
use crate::commands::seed::print_seed_report;
use crate::error::CliResult;
use crate::output::{self, success, warn};

/// Run the migrate command
pub async fn run(args: MigrateArgs, ctx: &Context) -> CliResult<()> {
    match args.command {
        MigrateSubcommand::Up(up_args) => run_up(up_args, ctx).await,
        MigrateSubcommand::List(list_args) => run_list(list_args, ctx).await,
        MigrateSubcommand::New(new_args) => run_new(new_args, ctx),
    }
}

/// Run `tidemark migrate up` - apply pending migrations and seeds
async fn run_up(args: MigrateUpArgs, ctx: &Context) -> CliResult<()> {
    output::header(if args.dry_run {
        "Migrate Up (dry run)"
    } else {
        "Migrate Up"
    });

    let mut config = ctx
        .engine_config()
        .target_version(args.target.clone())
        .dry_run(args.dry_run);
    if args.skip_seed {
        config = config.seed_enabled(false);
    }

    output::kv("Migrations", &config.migrations_dir.display().to_string());
    if let Some(target) = &args.target {
        output::kv("Target", target.as_str());
    }
    output::newline();

    let engine = MigrationEngine::new(config).with_cancellation(ctx.cancel.clone());

    output::step(1, 2, "Connecting to database...");
    let mut conn = ctx.connect().await?;

    output::step(2, 2, "Applying migrations...");
    let result = engine.migrate_and_seed(&mut conn).await?;

    output::newline();
    print_result(&result);

    Ok(())
}

fn print_result(result: &MigrationResult) {
    if !result.missing_local.is_empty() {
        warn("Remote migration versions not found in local migrations directory:");
        for version in &result.missing_local {
            output::list_item(version.as_str());
        }
        output::newline();
    }

    if !result.applied.is_empty() {
        output::section(if result.dry_run {
            "Would apply"
        } else {
            "Applied"
        });
        for migration in &result.applied {
            let mut line = format!("{}_{}", migration.version, migration.name);
            if migration.mode == ExecutionMode::NonTransactional {
                line.push_str(&format!(" {}", output::style_pending("(no transaction)")));
            }
            if !result.dry_run {
                line.push_str(&format!(" ({}ms)", migration.duration_ms));
            }
            output::list_item(&line);
        }
        output::newline();
    }

    print_seed_report(&result.seeds, result.dry_run);

    success(&result.summary());
}

/// Run `tidemark migrate list` - show local and remote versions side by side
async fn run_list(args: MigrateListArgs, ctx: &Context) -> CliResult<()> {
    let engine = MigrationEngine::new(ctx.engine_config());
    let mut conn = ctx.connect().await?;
    let status = engine.status(&mut conn).await?;
    let entries: Vec<ListEntry> = status.rows().iter().map(ListEntry::from).collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        output::info("No migrations found.");
        return Ok(());
    }

    print!("{}", render_table(&entries));
    Ok(())
}

/// Run `tidemark migrate new` - create an empty migration file
fn run_new(args: MigrateNewArgs, ctx: &Context) -> CliResult<()> {
    let source = MigrationSource::new(ctx.engine_config().migrations_dir);
    let path = source.create(&args.name)?;

    success(&format!("Created new migration at {}", path.display()));
    Ok(())
}

/// One row of `migrate list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListEntry {
    /// Version when a local file exists.
    pub local: Option<String>,
    /// Version when recorded in the history table.
    pub remote: Option<String>,
    /// Version timestamp as `YYYY-MM-DD HH:MM:SS`, or the raw version.
    pub time: String,
}

impl From<&VersionRow> for ListEntry {
    fn from(row: &VersionRow) -> Self {
        let version = row.version.as_str().to_string();
        Self {
            local: row.is_local().then(|| version.clone()),
            remote: row.is_remote().then(|| version.clone()),
            time: format_time(&row.version),
        }
    }
}

fn format_time(version: &VersionId) -> String {
    match version.timestamp() {
        Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => version.as_str().to_string(),
    }
}

fn render_table(entries: &[ListEntry]) -> String {
    let rows: Vec<Vec<String>> = entries
        .iter()
        .map(|e| {
            vec![
                e.local.clone().unwrap_or_default(),
                e.remote.clone().unwrap_or_default(),
                e.time.clone(),
            ]
        })
        .collect();
    output::table(&["Local", "Remote", "Time (UTC)"], &rows)
}
