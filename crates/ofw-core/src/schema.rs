//! Schema and example config generation.
//!
//! JSON schema and example TOML are derived from the config structs so the
//! published files in `schemas/` never drift from what the loader accepts.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use schemars::Schema;
use schemars::generate::SchemaSettings;
use serde_json::json;

use crate::config::AppConfig;

/// Generated schema filename.
pub const SCHEMA_FILENAME: &str = "config.schema.json";

/// Generated config filename.
pub const CONFIG_FILENAME: &str = "config.toml";

/// Repository URL used for the schema `$id`.
pub const REPO_URL: &str = "https://github.com/byteowlz/ofw";

/// Generate the JSON schema for `AppConfig` using schemars.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn generate_schema(project_name: &str, repo_url: &str) -> Result<String> {
    // draft-07 has the widest TOML editor support
    let settings = SchemaSettings::draft07();
    let generator = settings.into_generator();
    let mut schema: Schema = generator.into_root_schema_for::<AppConfig>();

    schema.insert(
        "$id".to_string(),
        json!(format!("{repo_url}/schemas/{SCHEMA_FILENAME}")),
    );
    schema.insert(
        "title".to_string(),
        json!(format!("{project_name} configuration")),
    );
    schema.insert(
        "description".to_string(),
        json!(format!("Configuration schema for {project_name}")),
    );

    if let Some(props) = schema.get_mut("properties")
        && let Some(props_obj) = props.as_object_mut()
    {
        props_obj.insert(
            "$schema".to_string(),
            json!({
                "type": "string",
                "description": "JSON Schema reference for editor support"
            }),
        );
    }

    serde_json::to_string_pretty(&schema).context("serializing JSON schema")
}

/// Generate the example TOML configuration from the default `AppConfig`.
///
/// # Errors
///
/// Returns an error if TOML serialization fails.
pub fn generate_example_config(project_name: &str, repo_url: &str) -> Result<String> {
    let schema_url = format!("{repo_url}/raw/main/schemas/{SCHEMA_FILENAME}");

    let config = AppConfig::default();
    let toml_body =
        toml::to_string_pretty(&config).context("serializing default config to TOML")?;

    let mut output = String::new();
    let _ = write!(
        output,
        r#""$schema" = "{schema_url}"

# Configuration for {project_name}.
# Copy this file to $XDG_CONFIG_HOME/{project_name}/config.toml and adjust as needed.
# Every key can also be set from the environment, e.g. OFW__AUTH__TRANSPORT=http.

"#
    );
    output.push_str(&toml_body);

    Ok(output)
}

/// Write generated files to a directory.
///
/// # Errors
///
/// Returns an error if directory creation or file writing fails.
pub fn write_generated_files(output_dir: &Path, project_name: &str, repo_url: &str) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating output directory: {}", output_dir.display()))?;

    let schema = generate_schema(project_name, repo_url)?;
    let schema_path = output_dir.join(SCHEMA_FILENAME);
    fs::write(&schema_path, &schema)
        .with_context(|| format!("writing schema to {}", schema_path.display()))?;

    let config = generate_example_config(project_name, repo_url)?;
    let config_path = output_dir.join(CONFIG_FILENAME);
    fs::write(&config_path, &config)
        .with_context(|| format!("writing config to {}", config_path.display()))?;

    Ok(())
}

/// Compare freshly generated files against the copies in `dir`.
///
/// # Errors
///
/// Returns an error listing every file that is missing or stale.
pub fn check_generated_files(dir: &Path, project_name: &str, repo_url: &str) -> Result<()> {
    let expected = [
        (dir.join(SCHEMA_FILENAME), generate_schema(project_name, repo_url)?),
        (
            dir.join(CONFIG_FILENAME),
            generate_example_config(project_name, repo_url)?,
        ),
    ];

    let mut errors = Vec::new();
    for (path, fresh) in &expected {
        if !path.exists() {
            errors.push(format!(
                "{} does not exist. Run the generate_config example to create it.",
                path.display()
            ));
            continue;
        }
        let existing =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        if &existing != fresh {
            errors.push(format!(
                "{} is out of date. Run the generate_config example to update it.",
                path.display()
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        anyhow::bail!(
            "generated config/schema check failed:\n  - {}",
            errors.join("\n  - ")
        )
    }
}
