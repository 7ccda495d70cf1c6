use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use crate::error::{Result, RunrunError};
use crate::model::board::{Board, Stage};
use crate::model::task::{ApiTask, Task, TaskSnapshot};
use crate::services::batch::RemoteResult;

pub const BASE_URL: &str = "https://runrun.it/api";
pub const TIMEOUT_SECS: u64 = 60;

const ERROR_SNIPPET_CHARS: usize = 400;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub app_key: String,
    pub user_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    pub board_id: u64,
    pub stage_id: u64,
    pub user_id: Option<String>,
}

/// Thin async wrapper over the runrun.it REST API.
///
/// Cloning is cheap: the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct RunrunitClient {
    http: Client,
    base_url: String,
}

impl RunrunitClient {
    pub fn new(creds: &Credentials) -> Result<Self> {
        Self::with_base_url(creds, BASE_URL, Duration::from_secs(TIMEOUT_SECS))
    }

    pub fn with_base_url(creds: &Credentials, base_url: &str, timeout: Duration) -> Result<Self> {
        if creds.app_key.trim().is_empty() {
            return Err(RunrunError::Config("app key is required".into()));
        }
        if creds.user_token.trim().is_empty() {
            return Err(RunrunError::Config("user token is required".into()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("App-Key", header_value("app key", &creds.app_key)?);
        headers.insert("User-Token", header_value("user token", &creds.user_token)?);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(RunrunitClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        debug!(path, "GET");

        let resp = self.http.get(self.url(path)).query(query).send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RunrunError::RateLimited);
        }
        // Só 200 conta como sucesso (201/204 também são rejeitados)
        if status != StatusCode::OK {
            return Err(RunrunError::Status {
                status: status.as_u16(),
                body: extract_error_message(&text),
            });
        }

        Ok(serde_json::from_str(&text)?)
    }

    pub async fn list_boards(&self) -> Result<Vec<Board>> {
        self.get_json("/boards", &[]).await
    }

    pub async fn list_stages(&self, board_id: u64) -> Result<Vec<Stage>> {
        self.get_json(&format!("/v1.0/boards/{board_id}/stages"), &[])
            .await
    }

    /// Lists the tasks sitting in one stage of a board, keeping those accepted
    /// by `filter`.
    pub async fn list_tasks<F>(&self, query: &TaskQuery, filter: F) -> Result<Vec<Task>>
    where
        F: Fn(&Task) -> bool,
    {
        let mut params = vec![
            ("board_id", query.board_id.to_string()),
            ("board_stage_id", query.stage_id.to_string()),
        ];
        if let Some(user) = &query.user_id {
            params.push(("user_id", user.clone()));
        }

        let raw: Vec<ApiTask> = self.get_json("/v1.0/tasks", &params).await?;

        Ok(raw
            .into_iter()
            .map(Task::from)
            .filter(|t| filter(t))
            .collect())
    }

    pub async fn move_task(&self, id: u64, from_stage_id: u64, to_stage_id: u64) -> RemoteResult<TaskSnapshot> {
        let body = json!({
            "board_stage_id": to_stage_id,
            "to_board_stage_id": to_stage_id,
            "from_board_stage_id": from_stage_id,
            "check_subtasks": true
        });

        self.mutate(self.http.post(self.url(&format!("/tasks/{id}/move"))).json(&body))
            .await
    }

    pub async fn set_desired_date(&self, id: u64, desired_date: &str) -> RemoteResult<TaskSnapshot> {
        let body = json!({
            "task": { "desired_date": desired_date }
        });

        self.mutate(self.http.put(self.url(&format!("/tasks/{id}"))).json(&body))
            .await
    }

    async fn mutate<T: DeserializeOwned>(&self, req: RequestBuilder) -> RemoteResult<T> {
        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => return RemoteResult::Failed(e.to_string()),
        };

        let status = resp.status();

        // Lê como texto primeiro para não perder a mensagem de erro
        let text = match resp.text().await {
            Ok(t) => t,
            Err(e) => return RemoteResult::Failed(e.to_string()),
        };

        classify(status, &text)
    }
}

fn header_value(what: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value.trim())
        .map_err(|_| RunrunError::Config(format!("{what} is not a valid header value")))
}

/// Maps a raw HTTP reply onto the closed set the batcher understands.
pub fn classify<T: DeserializeOwned>(status: StatusCode, body: &str) -> RemoteResult<T> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return RemoteResult::RateLimited;
    }

    if status != StatusCode::OK {
        return RemoteResult::Failed(format!(
            "HTTP {}: {}",
            status.as_u16(),
            extract_error_message(body)
        ));
    }

    match serde_json::from_str(body) {
        Ok(v) => RemoteResult::Ok(v),
        Err(e) => RemoteResult::Failed(format!("invalid response: {e}")),
    }
}

fn extract_error_message(body_text: &str) -> String {
    // { "error": "..." }, { "error": { "message": "..." } } ou { "message": "..." }
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(body_text) {
        if let Some(msg) = v.get("error").and_then(|e| e.as_str()) {
            return msg.to_string();
        }
        if let Some(msg) = v
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return msg.to_string();
        }
        if let Some(msg) = v.get("message").and_then(|m| m.as_str()) {
            return msg.to_string();
        }
    }

    let trimmed = body_text.trim();
    if trimmed.chars().count() > ERROR_SNIPPET_CHARS {
        let head: String = trimmed.chars().take(ERROR_SNIPPET_CHARS).collect();
        format!("{head}...")
    } else {
        trimmed.to_string()
    }
}
