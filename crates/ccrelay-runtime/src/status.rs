//! `ccrelay status`: dump the persisted bindings.

use std::path::Path;

use anyhow::Context;
use ccrelay_core::load_json;
use ccrelay_engine::RegistryState;

use crate::cli::Cli;
use crate::config::{home_dir, state_paths};

pub fn run_status(cli: &Cli) -> anyhow::Result<()> {
    let paths = state_paths(cli, &home_dir()?);
    println!("{}", render_status(&paths.state_file())?);
    Ok(())
}

/// Pretty JSON of the state file. A missing file renders as empty state.
pub fn render_status(path: &Path) -> anyhow::Result<String> {
    let state: RegistryState =
        load_json(path).with_context(|| format!("loading {}", path.display()))?;
    serde_json::to_string_pretty(&state).context("rendering state")
}
