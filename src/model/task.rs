use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: u64,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub board: String,

    #[serde(default)]
    pub stage: String,

    #[serde(default)]
    pub user: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_start_date: Option<String>,
}

/// Formato cru de `GET /v1.0/tasks`. Campos nulos viram vazio/None.
#[derive(Debug, Deserialize)]
pub struct ApiTask {
    pub id: u64,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub board_name: Option<String>,

    #[serde(default)]
    pub board_stage_name: Option<String>,

    #[serde(default)]
    pub user_name: Option<String>,

    #[serde(default)]
    pub desired_date: Option<String>,

    #[serde(default)]
    pub desired_start_date: Option<String>,
}

impl From<ApiTask> for Task {
    fn from(t: ApiTask) -> Self {
        Task {
            id: t.id,
            title: t.title.unwrap_or_default(),
            board: t.board_name.unwrap_or_default(),
            stage: t.board_stage_name.unwrap_or_default(),
            user: t.user_name.unwrap_or_default(),
            desired_date: t.desired_date,
            desired_start_date: t.desired_start_date,
        }
    }
}

/// What the service echoes back after a move or an update.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub id: u64,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub desired_date: Option<String>,
}
