//! Article fetching for a page.

use std::sync::Arc;
use tracing::{debug, instrument};

use crate::model::{Article, Page};
use crate::remote::{ArticleSource, RemoteError};

/// Articles requested per call when the caller does not say otherwise.
pub const DEFAULT_ARTICLE_REQUEST_SIZE: u32 = 5;

/// Stamp a freshly fetched article with the page it was requested for.
pub fn process_fetched_article(article: &mut Article, page: &Page) {
    article.page_id = Some(page.id.clone());
    article.newspaper_id = page.newspaper_id.clone();
}

#[derive(Clone)]
pub struct NewsDataRepository {
    source: Arc<dyn ArticleSource>,
    default_request_size: u32,
}

impl NewsDataRepository {
    pub fn new(source: Arc<dyn ArticleSource>) -> Self {
        Self::with_request_size(source, DEFAULT_ARTICLE_REQUEST_SIZE)
    }

    pub fn with_request_size(source: Arc<dyn ArticleSource>, default_request_size: u32) -> Self {
        Self {
            source,
            default_request_size,
        }
    }

    /// Latest articles of `page`, newest first as served.
    #[instrument(skip_all, fields(page_id = %page.id))]
    pub async fn latest_articles_by_page(
        &self,
        page: &Page,
        count: Option<u32>,
    ) -> Result<Vec<Article>, RemoteError> {
        let count = count.unwrap_or(self.default_request_size);
        let articles = self.source.raw_latest_articles_by_page(page, count).await?;
        Ok(Self::attach_page(articles, page))
    }

    /// Articles of `page` that follow `last_article_id`.
    #[instrument(skip_all, fields(page_id = %page.id, last_article_id = %last_article_id))]
    pub async fn articles_after_last_id(
        &self,
        page: &Page,
        last_article_id: &str,
        count: Option<u32>,
    ) -> Result<Vec<Article>, RemoteError> {
        let count = count.unwrap_or(self.default_request_size);
        let articles = self
            .source
            .raw_articles_after_last_id(page, last_article_id, count)
            .await?;
        Ok(Self::attach_page(articles, page))
    }

    fn attach_page(mut articles: Vec<Article>, page: &Page) -> Vec<Article> {
        for article in &mut articles {
            process_fetched_article(article, page);
        }
        debug!(count = articles.len(), "fetched articles");
        articles
    }
}
