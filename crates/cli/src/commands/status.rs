//! `steward status`: Show configuration and component health.

use steward_config::AppConfig;

pub async fn run(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let steward = super::open_steward().await?;
    let report = steward.health();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let config = steward.config();
    println!("Steward Status");
    println!("==============");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Store:        {}", config.storage.backend);
    println!("  Health:       {}", report.status);
    for reason in &report.reasons {
        println!("    - {reason}");
    }
    println!(
        "  Cache:        {} entries, {:.1}% hit ratio",
        report.cache.entries,
        report.cache.hit_ratio * 100.0
    );
    println!(
        "  Tasks:        {} queued, {} running",
        report.queue_depth, report.running_tasks
    );
    println!("  Batches:      {} pending", report.pending_batches);
    println!(
        "  Decisions:    {} recorded, {} patterns",
        report.decisions.history_len, report.decisions.patterns
    );
    println!(
        "  Context:      {} turns, {} project, {} code, {} tasks",
        report.context.conversation_turns,
        report.context.project_entries,
        report.context.code_entries,
        report.context.task_entries
    );

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file — run `steward init` first");
    }

    Ok(())
}
