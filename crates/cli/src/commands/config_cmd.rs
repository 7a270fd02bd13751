//! `steward config`: Configuration management commands.

use steward_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            if let Err(e) = config.validate() {
                println!("   ❌ {e}");
                return Err(e.into());
            }
            println!("   ✅ All checks passed");

            let mut warnings = Vec::new();
            if config.storage.backend == "none" {
                warnings.push("Storage backend is 'none': state is lost on exit");
            }
            if config.executor.simple_task_types.is_empty() {
                warnings.push("No simple task types: every unregistered task is queued");
            }
            if config.decision.safe_defaults.is_empty()
                && config.decision.fallback_default.is_null()
            {
                warnings.push("No configured safe defaults: unknown decisions resolve to null");
            }
            for w in &warnings {
                println!("   ⚠️  {w}");
            }

            println!();
            println!("   Store:       {}", config.storage.backend);
            println!("   Data dir:    {}", config.storage.resolved_data_dir().display());
            println!("   Batchable:   {}", config.batcher.batchable_types.join(", "));
            println!("   Simple:      {}", config.executor.simple_task_types.join(", "));
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}
