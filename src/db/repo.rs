use super::model::SettingsCounts;
use crate::model::{Country, Language, Newspaper, Page, PageGroup, TOP_LEVEL_PAGE_PARENT_ID};
use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

/// `app_meta` key of the timestamp recorded by the last completed sync.
pub const META_SETTINGS_UPDATE_TIME: &str = "settings_update_time";
/// `app_meta` key of the last timestamp reported by the server.
pub const META_SERVER_SETTINGS_UPDATE_TIME: &str = "server_settings_update_time";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and ask sqlite to create the file. Leaves in-memory and
/// non-sqlite URLs untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match path_part.strip_prefix("~/") {
        Some(rest) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
            Err(_) => path_part.to_string(),
        },
        None => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{}", expanded_path);
    match query_part {
        Some(q) if q.contains("mode=") => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn replace_languages(pool: &Pool, languages: &[Language]) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM languages").execute(&mut *tx).await?;
    for language in languages {
        sqlx::query("INSERT OR REPLACE INTO languages (id, name) VALUES (?, ?)")
            .bind(&language.id)
            .bind(&language.name)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await
}

#[instrument(skip_all)]
pub async fn replace_countries(pool: &Pool, countries: &[Country]) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM countries").execute(&mut *tx).await?;
    for country in countries {
        sqlx::query(
            "INSERT OR REPLACE INTO countries (name, country_code, time_zone) VALUES (?, ?, ?)",
        )
        .bind(&country.name)
        .bind(&country.country_code)
        .bind(&country.time_zone)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await
}

/// Only active newspapers are stored, so `active` is not persisted.
#[instrument(skip_all)]
pub async fn replace_newspapers(pool: &Pool, newspapers: &[Newspaper]) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM newspapers").execute(&mut *tx).await?;
    for newspaper in newspapers {
        sqlx::query(
            "INSERT OR REPLACE INTO newspapers (id, name, country_name, language_id) VALUES (?, ?, ?, ?)",
        )
        .bind(&newspaper.id)
        .bind(&newspaper.name)
        .bind(&newspaper.country_name)
        .bind(&newspaper.language_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await
}

/// Only active pages are stored, so `active` is not persisted.
#[instrument(skip_all)]
pub async fn replace_pages(pool: &Pool, pages: &[Page]) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM pages").execute(&mut *tx).await?;
    for page in pages {
        sqlx::query(
            "INSERT OR REPLACE INTO pages (id, newspaper_id, parent_page_id, name, link_format, has_data, has_child) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&page.id)
        .bind(&page.newspaper_id)
        .bind(&page.parent_page_id)
        .bind(&page.name)
        .bind(&page.link_format)
        .bind(page.has_data)
        .bind(page.has_child)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await
}

#[instrument(skip_all)]
pub async fn replace_page_groups(pool: &Pool, page_groups: &[PageGroup]) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM page_groups").execute(&mut *tx).await?;
    for group in page_groups {
        sqlx::query("INSERT OR REPLACE INTO page_groups (name, active, page_list) VALUES (?, ?, ?)")
            .bind(&group.name)
            .bind(group.active)
            .bind(Json(&group.page_list))
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await
}

async fn count_rows(pool: &Pool, sql: &str) -> sqlx::Result<i64> {
    sqlx::query_scalar(sql).fetch_one(pool).await
}

#[instrument(skip_all)]
pub async fn settings_counts(pool: &Pool) -> sqlx::Result<SettingsCounts> {
    Ok(SettingsCounts {
        languages: count_rows(pool, "SELECT COUNT(*) FROM languages").await?,
        countries: count_rows(pool, "SELECT COUNT(*) FROM countries").await?,
        newspapers: count_rows(pool, "SELECT COUNT(*) FROM newspapers").await?,
        pages: count_rows(pool, "SELECT COUNT(*) FROM pages").await?,
        page_groups: count_rows(pool, "SELECT COUNT(*) FROM page_groups").await?,
    })
}

fn newspaper_from_row(row: &SqliteRow) -> Newspaper {
    Newspaper {
        id: row.get("id"),
        name: row.get("name"),
        country_name: row.get("country_name"),
        language_id: row.get("language_id"),
        active: true,
    }
}

fn page_from_row(row: &SqliteRow) -> Page {
    Page {
        id: row.get("id"),
        newspaper_id: row.get("newspaper_id"),
        parent_page_id: row.get("parent_page_id"),
        name: row.get("name"),
        active: true,
        link_format: row.get("link_format"),
        has_data: row.get("has_data"),
        has_child: row.get("has_child"),
    }
}

const PAGE_COLUMNS: &str =
    "id, newspaper_id, parent_page_id, name, link_format, has_data, has_child";

#[instrument(skip_all)]
pub async fn list_newspapers(pool: &Pool) -> sqlx::Result<Vec<Newspaper>> {
    let rows = sqlx::query("SELECT id, name, country_name, language_id FROM newspapers ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(newspaper_from_row).collect())
}

#[instrument(skip_all)]
pub async fn list_page_groups(pool: &Pool) -> sqlx::Result<Vec<PageGroup>> {
    let rows = sqlx::query("SELECT name, active, page_list FROM page_groups ORDER BY name")
        .fetch_all(pool)
        .await?;
    rows.iter()
        .map(|row| {
            let Json(page_list) = row.try_get::<Json<Vec<String>>, _>("page_list")?;
            Ok(PageGroup {
                name: row.get("name"),
                active: row.get("active"),
                page_list,
            })
        })
        .collect()
}

#[instrument(skip_all)]
pub async fn page_by_id(pool: &Pool, page_id: &str) -> sqlx::Result<Option<Page>> {
    let row = sqlx::query(&format!("SELECT {PAGE_COLUMNS} FROM pages WHERE id = ?"))
        .bind(page_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(page_from_row))
}

#[instrument(skip_all)]
pub async fn top_pages_for_newspaper(pool: &Pool, newspaper_id: &str) -> sqlx::Result<Vec<Page>> {
    let rows = sqlx::query(&format!(
        "SELECT {PAGE_COLUMNS} FROM pages WHERE newspaper_id = ? AND parent_page_id = ? ORDER BY id"
    ))
    .bind(newspaper_id)
    .bind(TOP_LEVEL_PAGE_PARENT_ID)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(page_from_row).collect())
}

#[instrument(skip_all)]
pub async fn child_pages_of(pool: &Pool, parent_page_id: &str) -> sqlx::Result<Vec<Page>> {
    let rows = sqlx::query(&format!(
        "SELECT {PAGE_COLUMNS} FROM pages WHERE parent_page_id = ? ORDER BY id"
    ))
    .bind(parent_page_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(page_from_row).collect())
}

#[instrument(skip_all)]
pub async fn get_meta_i64(pool: &Pool, key: &str) -> sqlx::Result<Option<i64>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM app_meta WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value.and_then(|v| v.parse().ok()))
}

#[instrument(skip_all)]
pub async fn set_meta_i64(pool: &Pool, key: &str, value: i64) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO app_meta (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(pool)
    .await?;
    Ok(())
}
