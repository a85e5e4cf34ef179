//! Thin client for the hosted backend: the row-oriented data API, the blob
//! storage API, and the change-notification feed. The backend owns all
//! canonical state; everything here is request/response plumbing.

pub mod feed;
pub mod rows;
pub mod session;
pub mod storage;

pub use feed::{ChangeFeed, Subscription};
pub use rows::Rows;
pub use session::Session;
pub use storage::Storage;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("backend returned no rows")]
    NoRows,

    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid row: {0}")]
    InvalidRow(#[from] cove_types::models::RowError),
}
