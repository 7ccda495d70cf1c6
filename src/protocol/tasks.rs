use serde_json::{json, Value};

use super::{client_for, get_str, require_u64, resolve_stage, Reply};
use crate::config::Settings;
use crate::services::batch::BatchedMutator;
use crate::services::bulk;
use crate::services::client::TaskQuery;
use crate::services::desired_date::should_update;

fn parse_ids(payload: &Value, key: &str) -> Result<Option<Vec<u64>>, String> {
    let arr = match payload.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(v) => v
            .as_array()
            .ok_or_else(|| format!("payload.{key} must be an array"))?,
    };

    arr.iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_u64()
                .ok_or_else(|| format!("invalid id at payload.{key}[{i}]"))
        })
        .collect::<Result<Vec<u64>, String>>()
        .map(Some)
}

pub async fn list(settings: &Settings, payload: &Value) -> Reply {
    let board_id = require_u64(payload, "board_id")?;
    let client = client_for(settings, payload)?;
    let stage_id = resolve_stage(&client, board_id, payload, "stage_id", "stage").await?;

    let query = TaskQuery {
        board_id,
        stage_id,
        user_id: get_str(payload, "user_id").map(String::from),
    };

    let only_pending = payload
        .get("only_missing_desired_date")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let tasks = client
        .list_tasks(&query, |t| !only_pending || should_update(t))
        .await
        .map_err(|e| e.to_string())?;

    Ok(json!({ "tasks": tasks }))
}

pub async fn move_tasks(settings: &Settings, payload: &Value) -> Reply {
    let board_id = require_u64(payload, "board_id")?;
    let only = parse_ids(payload, "task_ids")?;
    let client = client_for(settings, payload)?;

    let from = resolve_stage(&client, board_id, payload, "from_stage_id", "from_stage").await?;
    let to = resolve_stage(&client, board_id, payload, "to_stage_id", "to_stage").await?;

    let query = TaskQuery {
        board_id,
        stage_id: from,
        user_id: get_str(payload, "user_id").map(String::from),
    };

    let tasks = client
        .list_tasks(&query, |t| only.as_ref().map_or(true, |ids| ids.contains(&t.id)))
        .await
        .map_err(|e| e.to_string())?;

    let mutator = BatchedMutator::new(settings.batch_options());
    let report = bulk::move_tasks(&client, &mutator, &tasks, from, to).await;

    Ok(json!({ "report": report }))
}

pub async fn update_desired_date(settings: &Settings, payload: &Value) -> Reply {
    let board_id = require_u64(payload, "board_id")?;
    let client = client_for(settings, payload)?;
    let stage_id = resolve_stage(&client, board_id, payload, "stage_id", "stage").await?;

    let query = TaskQuery {
        board_id,
        stage_id,
        user_id: get_str(payload, "user_id").map(String::from),
    };

    let tasks = client
        .list_tasks(&query, |_| true)
        .await
        .map_err(|e| e.to_string())?;

    let rule = settings.desired_date_rule();
    let mutator = BatchedMutator::new(settings.batch_options());
    let report = bulk::update_desired_dates(&client, &mutator, &tasks, &rule).await;

    Ok(json!({ "report": report }))
}
