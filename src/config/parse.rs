use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, unexpanded_env_vars};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parse and validate a config document. `$env{VAR}` references are expanded
/// first and must all resolve.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;
    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Comment lines are skipped: a `$env{...}` mentioned in a comment is never used.
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let content: String = yaml_string
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n");
    let unexpanded_vars = unexpanded_env_vars(&content);
    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with an actual value",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables\n\
             2. Replace the variables in the config file with actual values",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

fn expand_paths(config: &mut Config) {
    config.storage.path = expand_tilde(&config.storage.path);
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    warn_ignored_cleanup("sinks.main", &config.sinks.main);
    if let Some(secondary) = &config.sinks.secondary {
        warn_ignored_cleanup("sinks.secondary", secondary);
    }

    if config.storage.path == PathBuf::new() {
        errors.push("storage.path must not be empty".to_string());
    }

    validate_quotas(&config.quotas, &mut errors);

    if config.driver.tick_interval.is_zero() {
        errors.push("driver.tick_interval must be greater than zero".to_string());
    }

    if config.web.listen.parse::<SocketAddr>().is_err() {
        errors.push(format!(
            "web.listen '{}' is not a socket address (expected e.g. 127.0.0.1:7105)",
            config.web.listen
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

/// Nonsensical cleanups are not errors: the sink runs without cleanup.
fn warn_ignored_cleanup(context: &str, sink: &EmitterConfig) {
    if let Some(cleanup) = sink.cleanup {
        if sink.enabled && (cleanup.interval.is_zero() || cleanup.keep.is_zero()) {
            tracing::warn!(
                sink = context,
                "cleanup with zero interval or keep is ignored; the sink will not be pruned"
            );
        }
    }
}

fn validate_quotas(quotas: &[QuotaConfig], errors: &mut Vec<String>) {
    let mut seen = HashSet::new();

    for (i, quota) in quotas.iter().enumerate() {
        let context = format!("quotas[{}] ({})", i, quota.instance_id);

        if quota.instance_id.is_empty() {
            errors.push(format!("quotas[{}]: instance_id must not be empty", i));
        }
        if !seen.insert((quota.instance_id.as_str(), quota.unit)) {
            errors.push(format!(
                "{}: duplicate quota for unit '{}'",
                context, quota.unit
            ));
        }
        if quota.interval.is_zero() {
            errors.push(format!("{}: interval must be greater than zero", context));
        } else if chrono::Duration::from_std(quota.interval).is_err() {
            errors.push(format!("{}: interval is out of range", context));
        }

        let mut rule_ids = HashSet::new();
        for rule in &quota.notifications {
            if rule.percent == 0 {
                errors.push(format!(
                    "{}: notification '{}' must have a percent greater than zero",
                    context, rule.id
                ));
            }
            if !rule_ids.insert(rule.id.as_str()) {
                errors.push(format!("{}: duplicate notification id '{}'", context, rule.id));
            }
        }
    }
}
