pub mod config_cmd;
pub mod decide;
pub mod init;
pub mod run;
pub mod status;
pub mod task;

use std::sync::Arc;

use serde_json::Value;
use steward_config::AppConfig;
use steward_runtime::Steward;

/// Load config, build the service and restore its persisted state.
pub async fn open_steward() -> Result<Arc<Steward>, Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let steward = Arc::new(Steward::from_config(config)?);
    steward.init().await;
    Ok(steward)
}

/// Parse a JSON command-line argument.
pub fn parse_json_arg(name: &str, raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("--{name} is not valid JSON: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_args_parse() {
        assert_eq!(
            parse_json_arg("context", r#"{"filePath": "a.rs"}"#).unwrap()["filePath"],
            "a.rs"
        );
        let err = parse_json_arg("params", "{oops").unwrap_err();
        assert!(err.contains("--params"));
    }
}
