//! `tidemark seed` command - Apply seed files that have not run yet.

use tidemark_migrate::{MigrationEngine, SeedReport};

use crate::cli::SeedArgs;
use crate::commands::Context;
use crate::error::CliResult;
use crate::output::{self, success};

/// Run the seed command
pub async fn run(args: SeedArgs, ctx: &Context) -> CliResult<()> {
    output::header(if args.dry_run { "Seed (dry run)" } else { "Seed" });

    let config = ctx.engine_config().dry_run(args.dry_run);
    if !config.seed_enabled {
        output::info("Seeding is disabled in the configuration.");
        return Ok(());
    }

    let engine = MigrationEngine::new(config).with_cancellation(ctx.cancel.clone());
    let mut conn = ctx.connect().await?;
    let report = engine.seed(&mut conn).await?;

    print_seed_report(&report, args.dry_run);
    success(&seed_summary(&report, args.dry_run));

    Ok(())
}

/// Print applied and skipped seed files.
pub fn print_seed_report(report: &SeedReport, dry_run: bool) {
    if !report.applied.is_empty() {
        output::section(if dry_run { "Would seed" } else { "Seeded" });
        for path in &report.applied {
            output::list_item(&path.display().to_string());
        }
        output::newline();
    }

    if !report.skipped.is_empty() {
        output::section("Already seeded");
        for path in &report.skipped {
            output::list_item(&output::style_pending(&path.display().to_string()));
        }
        output::newline();
    }
}

fn seed_summary(report: &SeedReport, dry_run: bool) -> String {
    match (report.applied.len(), dry_run) {
        (0, _) => "No new seed files".to_string(),
        (n, true) => format!("{} seed files to apply", n),
        (n, false) => format!("{} seed files applied", n),
    }
}
