use tracing::{info, warn};

use crate::model::task::{Task, TaskSnapshot};
use crate::services::batch::{BatchReport, BatchedMutator, RemoteResult, Reporter, WorkItem};
use crate::services::client::RunrunitClient;
use crate::services::desired_date::{desired_date_for, should_update, DesiredDateRule};

/// Moves every task from one stage to another, in paced waves.
pub async fn move_tasks<R: Reporter>(
    client: &RunrunitClient,
    mutator: &BatchedMutator<R>,
    tasks: &[Task],
    from_stage_id: u64,
    to_stage_id: u64,
) -> BatchReport<TaskSnapshot> {
    info!("Moving {} tasks from stage {from_stage_id} to {to_stage_id}...", tasks.len());

    let items: Vec<WorkItem<&Task>> = tasks.iter().map(|t| WorkItem::new(t.id, t)).collect();

    let report = mutator
        .run(
            items,
            |_| Ok(()),
            |id, ()| async move {
                let res = client.move_task(id, from_stage_id, to_stage_id).await;
                if let RemoteResult::Ok(snap) = &res {
                    info!("Task {id} moved: {}", snap.title);
                }
                res
            },
        )
        .await;

    log_failures(tasks.iter(), &report);
    report
}

/// Fills `desired_date` for tasks that only have a start date.
///
/// Tasks that already carry a desired date, or have no start date, are left
/// out of the run entirely. The date is computed once per task; retries
/// resend the same value.
pub async fn update_desired_dates<R: Reporter>(
    client: &RunrunitClient,
    mutator: &BatchedMutator<R>,
    tasks: &[Task],
    rule: &DesiredDateRule,
) -> BatchReport<TaskSnapshot> {
    let updatable: Vec<&Task> = tasks.iter().filter(|t| should_update(t)).collect();

    info!("Updating {} tasks...", updatable.len());

    let items: Vec<WorkItem<&Task>> = updatable.iter().map(|t| WorkItem::new(t.id, *t)).collect();

    let report = mutator
        .run(
            items,
            |item| desired_date_for(item.payload, rule),
            |id, desired_date: String| async move {
                let res = client.set_desired_date(id, &desired_date).await;
                if let RemoteResult::Ok(snap) = &res {
                    info!(
                        "Task {id} updated desired_date to {}: {}",
                        snap.desired_date.as_deref().unwrap_or("-"),
                        snap.title
                    );
                }
                res
            },
        )
        .await;

    log_failures(updatable.into_iter(), &report);
    report
}

// O relatório preserva a ordem de entrada, então dá para casar por posição.
fn log_failures<'a>(tasks: impl Iterator<Item = &'a Task>, report: &BatchReport<TaskSnapshot>) {
    for (task, item) in tasks.zip(&report.items) {
        if !item.outcome.is_success() {
            warn!("Error updating task {} - {}", task.id, task.title);
        }
    }
}
