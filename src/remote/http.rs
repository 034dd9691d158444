use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ArticleSource, RemoteError, SettingsSource};
use crate::config::Config;
use crate::model::{Article, Page, SettingsBundle};

#[derive(Clone)]
pub struct NewsServerClient {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for NewsServerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewsServerClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateTimeResponse {
    update_time: i64,
}

impl NewsServerClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.server.base_url).context("invalid server.base_url")?;
        Self::with_base_url(base_url, cfg.request_timeout())
    }

    pub fn with_base_url(mut base_url: Url, timeout: Duration) -> Result<Self> {
        // Url::join drops the last segment unless the path ends with a slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder()
            .user_agent(concat!("news-server-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base_url })
    }

    pub fn build_request(&self, path: &str, article_count: Option<u32>) -> Result<reqwest::Request> {
        let mut endpoint = self
            .base_url
            .join(path)
            .context("invalid news server endpoint")?;
        if let Some(count) = article_count {
            endpoint
                .query_pairs_mut()
                .append_pair("article_count", &count.to_string());
        }
        self.http
            .get(endpoint)
            .header("Accept", "application/json")
            .build()
            .context("failed to build news server request")
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        path: &str,
        article_count: Option<u32>,
    ) -> Result<T, RemoteError> {
        let request = self
            .build_request(path, article_count)
            .map_err(|err| RemoteError::Request(format!("{err:#}")))?;
        debug!(url = %request.url(), "news server request");

        let res = self.http.execute(request).await?;
        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!(body = %body, "rate limited by news server");
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, body = %body, "news server error");
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = res.text().await?;
        serde_json::from_str(&body).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

fn page_articles_path(page: &Page) -> String {
    format!("pages/{}/articles", page.id)
}

#[async_trait]
impl SettingsSource for NewsServerClient {
    async fn app_settings(&self) -> Result<SettingsBundle, RemoteError> {
        self.execute_json("app-settings", None).await
    }

    async fn app_settings_update_time(&self) -> Result<i64, RemoteError> {
        let resp: UpdateTimeResponse = self.execute_json("app-settings/update-time", None).await?;
        Ok(resp.update_time)
    }
}

#[async_trait]
impl ArticleSource for NewsServerClient {
    async fn raw_latest_articles_by_page(
        &self,
        page: &Page,
        count: u32,
    ) -> Result<Vec<Article>, RemoteError> {
        self.execute_json(&page_articles_path(page), Some(count)).await
    }

    async fn raw_articles_after_last_id(
        &self,
        page: &Page,
        last_article_id: &str,
        count: u32,
    ) -> Result<Vec<Article>, RemoteError> {
        let path = format!("{}/before/{}", page_articles_path(page), last_article_id);
        self.execute_json(&path, Some(count)).await
    }
}
