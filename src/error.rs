use thiserror::Error;

pub type Result<T> = std::result::Result<T, RunrunError>;

#[derive(Debug, Error)]
pub enum RunrunError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited by runrun.it")]
    RateLimited,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("task {id} has no desired_start_date")]
    MissingStartDate { id: u64 },

    #[error("task {id} has an invalid date {value:?}")]
    InvalidDate { id: u64, value: String },
}
