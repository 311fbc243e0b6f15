use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

/// The dotenv file name for an environment: `.env` or `.env.{name}`.
pub fn env_file_name(env: Option<&str>) -> String {
    match env {
        Some(name) => format!(".env.{}", name),
        None => ".env".to_string(),
    }
}

/// Load the env file from the current directory or the closest ancestor.
///
/// Returns the path that was loaded, or `None` when there is no such file;
/// settings can still come from the process environment.
pub fn load_dotenv_from_ancestors(env: Option<&str>) -> Result<Option<PathBuf>> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let file_name = env_file_name(env);

    let mut current = cwd.as_path();
    loop {
        let env_path = current.join(&file_name);
        if env_path.exists() {
            dotenvy::from_path(&env_path)
                .with_context(|| format!("Failed to load {}", env_path.display()))?;
            debug!("Loaded {}", env_path.display());
            return Ok(Some(env_path));
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }

    if env.is_some() {
        anyhow::bail!(
            "No {} file found.\n\nSearched from {} to filesystem root.",
            file_name,
            cwd.display()
        );
    }

    Ok(None)
}
