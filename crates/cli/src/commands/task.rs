//! `steward task`: Submit one task.

use steward_core::{TaskPriority, TaskSpec, TaskStatus};

use super::parse_json_arg;

pub async fn run(
    task_type: &str,
    params: &str,
    priority: &str,
    wait: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let params = parse_json_arg("params", params)?;
    let priority: TaskPriority = priority.parse()?;
    let steward = super::open_steward().await?;

    let spec = TaskSpec::new(task_type, params).with_priority(priority);
    let mut task = steward.executor().execute_task(spec).await;

    if wait && task.status == TaskStatus::Queued {
        steward.drain_tasks().await;
        if let Some(updated) = steward.executor().get_task(&task.id) {
            task = updated;
        }
    }

    println!("{}", serde_json::to_string_pretty(&task)?);
    steward.persist().await?;
    Ok(())
}
