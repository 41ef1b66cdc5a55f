//! `tidemark version` command - Display version information.

use crate::error::CliResult;
use crate::output::{self, kv};

/// Package version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the version command
pub fn run() -> CliResult<()> {
    output::header("tidemark");

    kv("Version", VERSION);

    #[cfg(debug_assertions)]
    let build_mode = "debug";
    #[cfg(not(debug_assertions))]
    let build_mode = "release";

    kv("Build", build_mode);
    output::newline();

    output::section("Components");
    kv("tidemark-migrate", VERSION);
    kv("tidemark-postgres", VERSION);

    Ok(())
}
