//! Generate config.toml and config.schema.json into the workspace `schemas/` directory.
//!
//! Run with: cargo run -p ofw-core --example generate_config [-- --check]

use std::path::PathBuf;

use anyhow::Context;
use ofw_core::APP_NAME;
use ofw_core::schema::{REPO_URL, check_generated_files, write_generated_files};

fn main() -> anyhow::Result<()> {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR")?;
    let workspace_root = PathBuf::from(&manifest_dir)
        .parent() // crates/
        .and_then(|p| p.parent())
        .map(PathBuf::from)
        .context("could not find workspace root")?;

    let schemas_dir = workspace_root.join("schemas");

    if std::env::args().any(|a| a == "--check") {
        check_generated_files(&schemas_dir, APP_NAME, REPO_URL)?;
        println!("{} is up to date", schemas_dir.display());
        return Ok(());
    }

    println!("Generating config files to {}...", schemas_dir.display());
    write_generated_files(&schemas_dir, APP_NAME, REPO_URL)?;
    println!("Done! Generated:");
    println!("  - {}/config.schema.json", schemas_dir.display());
    println!("  - {}/config.toml", schemas_dir.display());

    Ok(())
}
