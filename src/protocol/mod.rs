use serde_json::{json, Value};

use crate::config::Settings;
use crate::model::board::find_stage_id;
use crate::services::client::RunrunitClient;

mod command;
mod tasks;
use command::Command;

type Reply = Result<Value, String>;

fn get_cmd(req: &Value) -> &str {
    req.get("cmd").and_then(|v| v.as_str()).unwrap_or("")
}

fn get_id(req: &Value) -> Value {
    req.get("id").cloned().unwrap_or(Value::Null)
}

fn get_payload(req: &Value) -> &Value {
    static EMPTY: Value = Value::Null;
    req.get("payload").unwrap_or(&EMPTY)
}

fn ok(id: Value, payload: Value) -> String {
    json!({
        "id": id,
        "status": "ok",
        "payload": payload
    })
    .to_string()
}

fn err(id: Value, message: impl Into<String>) -> String {
    json!({
        "id": id,
        "status": "error",
        "message": message.into()
    })
    .to_string()
}

fn get_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

// ids chegam como número ou string ("123")
fn get_u64(payload: &Value, key: &str) -> Option<u64> {
    match payload.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn require_u64(payload: &Value, key: &str) -> Result<u64, String> {
    get_u64(payload, key).ok_or_else(|| format!("payload.{key} is required"))
}

fn client_for(settings: &Settings, payload: &Value) -> Result<RunrunitClient, String> {
    let creds = settings
        .credentials(get_str(payload, "app_key"), get_str(payload, "user_token"))
        .map_err(|e| e.to_string())?;
    settings.client(&creds).map_err(|e| e.to_string())
}

/// Stage given either by id (`id_key`) or by exact name (`name_key`).
async fn resolve_stage(
    client: &RunrunitClient,
    board_id: u64,
    payload: &Value,
    id_key: &str,
    name_key: &str,
) -> Result<u64, String> {
    if let Some(id) = get_u64(payload, id_key) {
        return Ok(id);
    }

    let name = get_str(payload, name_key)
        .ok_or_else(|| format!("payload.{id_key} or payload.{name_key} is required"))?;

    let stages = client
        .list_stages(board_id)
        .await
        .map_err(|e| e.to_string())?;

    find_stage_id(name, &stages).ok_or_else(|| format!("stage not found: {name}"))
}

async fn list_boards(settings: &Settings, payload: &Value) -> Reply {
    let client = client_for(settings, payload)?;
    let boards = client.list_boards().await.map_err(|e| e.to_string())?;
    Ok(json!({ "boards": boards }))
}

async fn list_stages(settings: &Settings, payload: &Value) -> Reply {
    let board_id = require_u64(payload, "board_id")?;
    let client = client_for(settings, payload)?;
    let stages = client
        .list_stages(board_id)
        .await
        .map_err(|e| e.to_string())?;
    Ok(json!({ "stages": stages }))
}

async fn find_stage(settings: &Settings, payload: &Value) -> Reply {
    let board_id = require_u64(payload, "board_id")?;
    let name = get_str(payload, "name").ok_or("payload.name is required")?;
    let client = client_for(settings, payload)?;
    let stages = client
        .list_stages(board_id)
        .await
        .map_err(|e| e.to_string())?;
    Ok(json!({ "stage_id": find_stage_id(name, &stages) }))
}

/// Handles one JSON request line and returns one JSON response line.
pub async fn handle(settings: &Settings, input: &str) -> String {
    let req: Value = match serde_json::from_str(input) {
        Ok(v) => v,
        Err(_) => {
            return json!({
                "status": "error",
                "message": "invalid json"
            })
            .to_string();
        }
    };

    let id = get_id(&req);
    let payload = get_payload(&req);

    let reply = match Command::from(get_cmd(&req)) {
        Command::Ping => Ok(json!({ "message": "runrun-core alive" })),
        Command::BoardsList => list_boards(settings, payload).await,
        Command::StagesList => list_stages(settings, payload).await,
        Command::StagesFind => find_stage(settings, payload).await,
        Command::TasksList => tasks::list(settings, payload).await,
        Command::TasksMove => tasks::move_tasks(settings, payload).await,
        Command::TasksUpdateDesiredDate => tasks::update_desired_date(settings, payload).await,
        Command::Unknown => Err("unknown command".to_string()),
    };

    match reply {
        Ok(p) => ok(id, p),
        Err(e) => err(id, e),
    }
}
