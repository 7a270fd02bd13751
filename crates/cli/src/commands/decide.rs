//! `steward decide`: Resolve one decision and remember it.

use super::parse_json_arg;

pub async fn run(
    category: &str,
    action: &str,
    context: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let context = parse_json_arg("context", context)?;
    let steward = super::open_steward().await?;

    let decision = steward.decisions().make_decision(category, action, context);
    println!("{}", serde_json::to_string_pretty(&decision)?);

    // Persist so patterns accumulate across invocations.
    steward.persist().await?;
    Ok(())
}
