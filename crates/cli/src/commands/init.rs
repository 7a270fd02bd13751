//! `steward init`: First-time setup.

use std::path::Path;

use steward_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();

    println!("Steward — First-Time Setup");
    println!("==========================\n");

    if write_default_config(&config_dir)? {
        println!("✅ Created config.toml in {}", config_dir.display());
    } else {
        println!(
            "⚠️  Config already exists at: {}",
            config_dir.join("config.toml").display()
        );
        println!("   Edit it manually or delete and re-run init.");
    }

    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if config.storage.backend == "file" {
        let data_dir = config.storage.resolved_data_dir();
        std::fs::create_dir_all(&data_dir)?;
        println!("✅ Data directory: {}", data_dir.display());
    }

    println!("\nSetup complete. Run `steward run` to start the service.");
    Ok(())
}

/// Write the default config into `dir` unless one exists. Returns whether
/// a file was written.
pub fn write_default_config(dir: &Path) -> std::io::Result<bool> {
    let path = dir.join("config.toml");
    if path.exists() {
        return Ok(false);
    }
    std::fs::create_dir_all(dir)?;
    std::fs::write(&path, AppConfig::default_toml())?;
    Ok(true)
}
