//! Configuration management commands.
//!
//! Configuration is loaded from TOML files and merged with environment variables
//! prefixed with `AUCTION_HOOKS__`. For example,
//! `AUCTION_HOOKS__HOOKS__DEFAULT_TIMEOUT_MS` will override
//! `hooks.default_timeout_ms` in the TOML file.

use std::fs;
use std::path::PathBuf;

use auction_hooks_common::hooks::HookStageExecutor;
use auction_hooks_common::settings::Settings;

use crate::error::CliError;
use crate::hash::compute_settings_hash;

/// Load and merge configuration from TOML file with environment variables.
///
/// The settings are validated the way the server validates them at startup:
/// field ranges, module configuration, activity rules and both execution
/// plans against the registered hooks.
pub(crate) fn load_and_merge_config(
    file: &PathBuf,
    verbose: bool,
) -> Result<(Settings, String), CliError> {
    let content = fs::read_to_string(file)?;

    if verbose {
        println!("Loading config from: {}", file.display());
        println!("Environment variables with AUCTION_HOOKS__ prefix will be merged");
    }

    let settings = Settings::from_toml_validated(&content)
        .map_err(|e| CliError::Config(format!("Failed to parse and merge config: {:?}", e)))?;

    HookStageExecutor::from_settings(&settings)
        .map_err(|e| CliError::Config(format!("Hook configuration is invalid: {:?}", e)))?;

    let merged_toml = settings
        .to_canonical_toml()
        .map_err(|e| CliError::Config(format!("Failed to serialize merged config: {e:?}")))?;

    Ok((settings, merged_toml))
}

/// Validate configuration file.
pub fn validate(file: PathBuf, verbose: bool) -> Result<(), CliError> {
    let (settings, merged_toml) = load_and_merge_config(&file, verbose)?;
    let hash = compute_settings_hash(&merged_toml);

    let host_plan = settings
        .hooks
        .host_plan()
        .map_err(|e| CliError::Config(format!("{e:?}")))?;

    println!("Configuration is valid");
    println!("  File: {}", file.display());
    println!("  Hash: {}", hash);
    println!("  Default timeout: {}ms", settings.hooks.default_timeout_ms);
    println!("  Host plan hooks: {}", host_plan.hook_refs().count());
    println!("  Configured activities: {}", settings.activities.len());

    if verbose {
        println!("\nModules:");
        for (code, config) in &settings.hooks.modules {
            let enabled = config
                .get("enabled")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(true);
            println!(
                "  - {}: {}",
                code,
                if enabled { "enabled" } else { "disabled" }
            );
        }

        println!("\nHost execution plan:");
        for (stage, hook) in host_plan.hook_refs() {
            println!("  - {}: {}", stage, hook);
        }

        if !settings.hooks.host_module_execution.is_empty() {
            println!("\nHost module execution:");
            for (code, allowed) in &settings.hooks.host_module_execution {
                println!("  - {}: {}", code, allowed);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) const VALID_CONFIG: &str = r#"
[hooks]
default_timeout_ms = 300
host_execution_plan = '''
{"endpoints": {"/openrtb2/auction": {"stages": {"processed-auction-request": {"groups": [
    {"timeout": 100, "hook_sequence": [
        {"module_code": "pb-rule-engine", "hook_impl_code": "pb-rule-engine-processed-auction-request"}
    ]}
]}}}}}
'''

[hooks.modules."pb-rule-engine"]
enabled = true

[[hooks.modules."pb-rule-engine".rule_sets]]
name = "filter"

[[hooks.modules."pb-rule-engine".rule_sets.model_groups]]
analytics_key = "filter"
schema = [{ function = "channel" }]
rules = [{ conditions = ["*"], results = [{ function = "excludeBidders", args = { bidders = ["bidder1"] } }] }]

[activities.sync_user]
default = true

[[activities.sync_user.rules]]
allow = false
condition = { component_type = ["bidder"], component_name = ["blocked-bidder"] }
"#;

    pub(crate) fn write_config(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let config_path = dir.path().join(name);
        fs::write(&config_path, content).expect("should write config");
        config_path
    }

    #[test]
    fn test_validate_valid_config() {
        let dir = TempDir::new().expect("should create temp dir");
        let config_path = write_config(&dir, "hooks.toml", VALID_CONFIG);

        let result = validate(config_path, false);
        assert!(result.is_ok(), "{result:?}");
    }

    #[test]
    fn test_validate_verbose() {
        let dir = TempDir::new().expect("should create temp dir");
        let config_path = write_config(&dir, "hooks.toml", VALID_CONFIG);

        assert!(validate(config_path, true).is_ok());
    }

    #[test]
    fn test_validate_invalid_toml() {
        let dir = TempDir::new().expect("should create temp dir");
        let config_path = write_config(&dir, "invalid.toml", "invalid { toml");

        let result = validate(config_path, false);
        assert!(matches!(result, Err(CliError::Config(_))));
    }

    #[test]
    fn test_validate_unknown_hook_in_plan() {
        let dir = TempDir::new().expect("should create temp dir");
        let config_path = write_config(
            &dir,
            "unknown.toml",
            r#"
[hooks]
host_execution_plan = '''
{"endpoints": {"/openrtb2/auction": {"stages": {"entrypoint": {"groups": [
    {"timeout": 50, "hook_sequence": [{"module_code": "ghost", "hook_impl_code": "ghost-hook"}]}
]}}}}}
'''
"#,
        );

        let err = validate(config_path, false).expect_err("unknown hook should fail");
        assert!(err.to_string().contains("Hook configuration is invalid"));
    }

    #[test]
    fn test_validate_broken_module_config() {
        let dir = TempDir::new().expect("should create temp dir");
        let config_path = write_config(
            &dir,
            "broken.toml",
            r#"
[[hooks.modules."pb-rule-engine".rule_sets]]
name = "broken"

[[hooks.modules."pb-rule-engine".rule_sets.model_groups]]
schema = [{ function = "channel" }]
rules = [{ conditions = ["web"], results = [{ function = "excludeBidders" }] }]
"#,
        );

        assert!(validate(config_path, false).is_err());
    }

    #[test]
    fn test_validate_nonexistent_file() {
        let dir = TempDir::new().expect("should create temp dir");
        let config_path = dir.path().join("nonexistent.toml");

        let result = validate(config_path, false);
        assert!(matches!(result, Err(CliError::Io(_))));
    }

    #[test]
    fn test_env_override_changes_merged_hash() {
        let dir = TempDir::new().expect("should create temp dir");
        let config_path = write_config(&dir, "hooks.toml", VALID_CONFIG);

        let (_, base) = load_and_merge_config(&config_path, false).expect("should load");
        let overridden = temp_env::with_var(
            "AUCTION_HOOKS__HOOKS__DEFAULT_TIMEOUT_MS",
            Some("500"),
            || load_and_merge_config(&config_path, false).expect("should load"),
        );

        assert_eq!(overridden.0.hooks.default_timeout_ms, 500);
        assert_ne!(compute_settings_hash(&base), compute_settings_hash(&overridden.1));
    }
}
