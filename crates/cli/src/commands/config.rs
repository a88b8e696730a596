//! Configuration commands (show, init)

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use courier_core::Config;
use tracing::info;

/// Which file `Config::discover` would pick for `dir`, if any
fn config_source(dir: &Path) -> Option<PathBuf> {
  let local = Config::local_config_path(dir);
  if local.exists() {
    return Some(local);
  }
  Config::user_config_path().filter(|path| path.exists())
}

/// Show the effective configuration
pub async fn cmd_config_show(config: &Config, explicit: Option<&Path>) -> Result<()> {
  let cwd = std::env::current_dir()?;

  match explicit.map(Path::to_path_buf).or_else(|| config_source(&cwd)) {
    Some(path) => println!("Using config: {:?}", path),
    None => println!("Using default configuration (no config file found)"),
  }
  println!();

  // Show config as TOML
  let toml_str = toml::to_string_pretty(config)?;
  println!("{}", toml_str);

  Ok(())
}

/// Write the commented template to `./courier.toml`
pub async fn cmd_config_init(force: bool) -> Result<()> {
  let cwd = std::env::current_dir()?;
  let path = write_template(&cwd, force)?;

  println!("Created config: {:?}", path);
  println!("Edit the file to customize settings.");
  Ok(())
}

fn write_template(dir: &Path, force: bool) -> Result<PathBuf> {
  let path = Config::local_config_path(dir);
  if path.exists() && !force {
    bail!("Config file already exists: {:?} (use --force to overwrite)", path);
  }

  std::fs::write(&path, Config::generate_template())?;
  info!(path = ?path, "Wrote config template");
  Ok(path)
}
