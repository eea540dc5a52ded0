use crate::config::generate::generate_starter_config;
use crate::config::{user_config_path, SYSTEM_CONFIG_PATH};
use std::fs;
use std::path::{Path, PathBuf};

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();

    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    let config_path = default_target().unwrap_or_else(|| PathBuf::from(SYSTEM_CONFIG_PATH));
    write_config(&config_content, &config_path)?;
    println!("Config file written to {}", config_path.display());
    Ok(())
}

/// `~/.config/logstore/config.yml` if its directory can be created.
fn default_target() -> Option<PathBuf> {
    let user_config = user_config_path()?;
    let parent = user_config.parent()?;
    match fs::create_dir_all(parent) {
        Ok(()) => Some(user_config),
        Err(_) => {
            eprintln!("Warning: Could not create directory {}", parent.display());
            eprintln!("Falling back to {}", SYSTEM_CONFIG_PATH);
            None
        }
    }
}

/// Writes a new config file, refusing to overwrite an existing one.
pub fn write_config(config_content: &str, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        return Err(format!(
            "Config file already exists at {}. Remove it first or use --stdout to print the config",
            path.display()
        )
        .into());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, config_content)?;
    Ok(())
}
