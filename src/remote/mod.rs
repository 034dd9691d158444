//! Remote news server: source traits and the HTTP implementation.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Article, Page, SettingsBundle};

pub mod http;

pub use http::NewsServerClient;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("news server unreachable: {0}")]
    NoNetwork(String),
    #[error("blocking remote call issued from the UI thread")]
    OnUiThread,
    #[error("news server error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid news server response: {0}")]
    Decode(String),
    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            RemoteError::NoNetwork(err.to_string())
        } else if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            RemoteError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            RemoteError::Request(err.to_string())
        }
    }
}

#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn app_settings(&self) -> Result<SettingsBundle, RemoteError>;

    /// Server-side "settings last updated" timestamp in epoch millis.
    async fn app_settings_update_time(&self) -> Result<i64, RemoteError>;
}

#[async_trait]
pub trait ArticleSource: Send + Sync {
    async fn raw_latest_articles_by_page(
        &self,
        page: &Page,
        count: u32,
    ) -> Result<Vec<Article>, RemoteError>;

    async fn raw_articles_after_last_id(
        &self,
        page: &Page,
        last_article_id: &str,
        count: u32,
    ) -> Result<Vec<Article>, RemoteError>;
}
