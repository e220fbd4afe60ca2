//! `PostgreSQL` [`PageStore`] for deployments with several server instances.
//!
//! The CAS commit is a conditional `UPDATE ... WHERE server_revision = $n`
//! inside a transaction that also upserts the slug reservation. Under
//! `READ COMMITTED` a concurrent writer blocks on the row and then re-evaluates
//! the `WHERE` clause against the new version, so exactly one writer per
//! revision value sees a row come back.
//!
//! Documents are stored as JSON text columns.

use async_trait::async_trait;
use pagedrop_core::{Background, Block, Page, PageId, PageSummary, User};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use crate::storage::page_store::{CasOutcome, PagePatch, PageStore, StoreError};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS pages (
        id TEXT PRIMARY KEY,
        owner_token TEXT NOT NULL,
        user_id TEXT,
        slug TEXT UNIQUE,
        draft_content TEXT NOT NULL,
        draft_background TEXT NOT NULL,
        published_content TEXT,
        published_background TEXT,
        server_revision BIGINT NOT NULL,
        published_revision BIGINT,
        is_published BOOLEAN NOT NULL DEFAULT FALSE,
        published_at BIGINT,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS pages_owner_token_idx ON pages (owner_token)",
    "CREATE TABLE IF NOT EXISTS slug_reservations (
        slug TEXT PRIMARY KEY,
        page_id TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS slug_reservations_page_idx ON slug_reservations (page_id)",
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT UNIQUE,
        auth_subject TEXT NOT NULL
    )",
];

const PAGE_COLUMNS: &str = "id, owner_token, user_id, slug, draft_content, draft_background, \
     published_content, published_background, server_revision, published_revision, \
     is_published, published_at, created_at, updated_at";

/// `PostgreSQL`-backed revision store.
#[derive(Clone)]
pub struct PostgresPageStore {
    pool: PgPool,
}

impl PostgresPageStore {
    /// Connects a pool to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, shared with the Postgres rate-limit counter.
    #[must_use]
    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    async fn current_revision(&self, id: &PageId) -> Result<Option<u64>, StoreError> {
        let row = sqlx::query("SELECT server_revision FROM pages WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|r| to_u64(r.try_get("server_revision").map_err(backend)?))
            .transpose()
    }
}

fn backend(e: impl Into<anyhow::Error>) -> StoreError {
    StoreError::Backend(e.into())
}

fn to_u64(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(backend)
}

fn to_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(backend)
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(backend)
}

fn decode<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, StoreError> {
    serde_json::from_str(text).map_err(backend)
}

fn row_to_page(row: &PgRow) -> Result<Page, StoreError> {
    let published_content: Option<String> = row.try_get("published_content").map_err(backend)?;
    let published_background: Option<String> =
        row.try_get("published_background").map_err(backend)?;
    let published_revision: Option<i64> = row.try_get("published_revision").map_err(backend)?;

    Ok(Page {
        id: PageId::new(row.try_get::<String, _>("id").map_err(backend)?),
        owner_token: row.try_get("owner_token").map_err(backend)?,
        user_id: row.try_get("user_id").map_err(backend)?,
        slug: row.try_get("slug").map_err(backend)?,
        draft_content: decode::<Vec<Block>>(
            &row.try_get::<String, _>("draft_content").map_err(backend)?,
        )?,
        draft_background: decode::<Background>(
            &row.try_get::<String, _>("draft_background").map_err(backend)?,
        )?,
        published_content: published_content.as_deref().map(decode).transpose()?,
        published_background: published_background.as_deref().map(decode).transpose()?,
        server_revision: to_u64(row.try_get("server_revision").map_err(backend)?)?,
        published_revision: published_revision.map(to_u64).transpose()?,
        is_published: row.try_get("is_published").map_err(backend)?,
        published_at: row.try_get("published_at").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
    })
}

#[async_trait]
impl PageStore for PostgresPageStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn initialize(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
        }
        Ok(())
    }

    async fn create_page(&self, page: &Page) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO pages (id, owner_token, user_id, slug, draft_content, draft_background, \
             server_revision, is_published, created_at, updated_at) \
             VALUES ($1, $2, $3, NULL, $4, $5, $6, FALSE, $7, $8) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(page.id.as_str())
        .bind(&page.owner_token)
        .bind(page.user_id.as_deref())
        .bind(encode(&page.draft_content)?)
        .bind(encode(&page.draft_background)?)
        .bind(to_i64(page.server_revision)?)
        .bind(page.created_at)
        .bind(page.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::PageExists(page.id.clone()));
        }
        Ok(())
    }

    async fn get_page(&self, id: &PageId) -> Result<Option<Page>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PAGE_COLUMNS} FROM pages WHERE id = $1"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(row_to_page).transpose()
    }

    async fn get_page_by_slug(&self, slug: &str) -> Result<Option<Page>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PAGE_COLUMNS} FROM pages WHERE slug = $1"))
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(row_to_page).transpose()
    }

    async fn list_pages_for_owner(
        &self,
        owner_token: &str,
    ) -> Result<Vec<PageSummary>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PAGE_COLUMNS} FROM pages WHERE owner_token = $1 ORDER BY updated_at DESC"
        ))
        .bind(owner_token)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter()
            .map(|row| row_to_page(row).map(|page| page.summary()))
            .collect()
    }

    async fn cas_update(
        &self,
        id: &PageId,
        expected_revision: u64,
        patch: PagePatch,
    ) -> Result<CasOutcome, StoreError> {
        match self.current_revision(id).await? {
            None => return Err(StoreError::PageNotFound(id.clone())),
            Some(current) if current != expected_revision => {
                return Ok(CasOutcome::RevisionMismatch {
                    current_revision: current,
                })
            }
            Some(_) => {}
        }

        let mut tx = self.pool.begin().await.map_err(backend)?;

        if let Some(slug) = patch.slug() {
            let reserved = sqlx::query(
                "INSERT INTO slug_reservations (slug, page_id) VALUES ($1, $2) \
                 ON CONFLICT (slug) DO UPDATE SET page_id = EXCLUDED.page_id \
                 WHERE slug_reservations.page_id = EXCLUDED.page_id \
                 RETURNING page_id",
            )
            .bind(slug)
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;

            if reserved.is_none() {
                let holder: Option<String> =
                    sqlx::query_scalar("SELECT page_id FROM slug_reservations WHERE slug = $1")
                        .bind(slug)
                        .fetch_optional(&mut *tx)
                        .await
                        .map_err(backend)?;
                tx.rollback().await.map_err(backend)?;
                return Ok(CasOutcome::SlugTaken {
                    holder: PageId::new(holder.unwrap_or_default()),
                });
            }

            sqlx::query("DELETE FROM slug_reservations WHERE page_id = $1 AND slug <> $2")
                .bind(id.as_str())
                .bind(slug)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        let save_draft_sql = format!(
            "UPDATE pages SET draft_content = $3, draft_background = $4, updated_at = $5, \
             server_revision = server_revision + 1 \
             WHERE id = $1 AND server_revision = $2 RETURNING {PAGE_COLUMNS}"
        );
        let publish_sql = format!(
            "UPDATE pages SET draft_content = $3, draft_background = $4, \
             published_content = $3, published_background = $4, \
             slug = $5, is_published = TRUE, published_at = $6, updated_at = $6, \
             server_revision = server_revision + 1, \
             published_revision = server_revision + 1 \
             WHERE id = $1 AND server_revision = $2 RETURNING {PAGE_COLUMNS}"
        );

        let updated = match &patch {
            PagePatch::SaveDraft { document, now } => sqlx::query(&save_draft_sql)
                .bind(id.as_str())
                .bind(to_i64(expected_revision)?)
                .bind(encode(&document.blocks)?)
                .bind(encode(&document.background)?)
                .bind(*now),
            PagePatch::Publish {
                document,
                slug,
                now,
            } => sqlx::query(&publish_sql)
                .bind(id.as_str())
                .bind(to_i64(expected_revision)?)
                .bind(encode(&document.blocks)?)
                .bind(encode(&document.background)?)
                .bind(slug.as_str())
                .bind(*now),
        }
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;

        let Some(row) = updated else {
            tx.rollback().await.map_err(backend)?;
            return match self.current_revision(id).await? {
                Some(current_revision) => Ok(CasOutcome::RevisionMismatch { current_revision }),
                None => Err(StoreError::PageNotFound(id.clone())),
            };
        };

        let page = row_to_page(&row)?;
        tx.commit().await.map_err(backend)?;
        Ok(CasOutcome::Applied(Box::new(page)))
    }

    async fn slug_holder(&self, slug: &str) -> Result<Option<PageId>, StoreError> {
        let holder: Option<String> =
            sqlx::query_scalar("SELECT page_id FROM slug_reservations WHERE slug = $1")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        Ok(holder.map(PageId::new))
    }

    async fn reserve_slug(&self, slug: &str, page: &PageId) -> Result<bool, StoreError> {
        let reserved = sqlx::query(
            "INSERT INTO slug_reservations (slug, page_id) VALUES ($1, $2) \
             ON CONFLICT (slug) DO UPDATE SET page_id = EXCLUDED.page_id \
             WHERE slug_reservations.page_id = EXCLUDED.page_id \
             RETURNING page_id",
        )
        .bind(slug)
        .bind(page.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(reserved.is_some())
    }

    async fn claim_anonymous(
        &self,
        anonymous_token: &str,
        user_id: &str,
        now: i64,
    ) -> Result<Vec<PageId>, StoreError> {
        let mut ids: Vec<String> = sqlx::query_scalar(
            "UPDATE pages SET user_id = $2, owner_token = $2, updated_at = $3 \
             WHERE owner_token = $1 AND user_id IS NULL AND is_published = FALSE \
             RETURNING id",
        )
        .bind(anonymous_token)
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        ids.sort();
        Ok(ids.into_iter().map(PageId::new).collect())
    }

    async fn delete_stale_anonymous(&self, idle_before: i64) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let ids: Vec<String> = sqlx::query_scalar(
            "DELETE FROM pages \
             WHERE user_id IS NULL AND is_published = FALSE AND updated_at < $1 \
             RETURNING id",
        )
        .bind(idle_before)
        .fetch_all(&mut *tx)
        .await
        .map_err(backend)?;

        if !ids.is_empty() {
            sqlx::query("DELETE FROM slug_reservations WHERE page_id = ANY($1)")
                .bind(&ids)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }
        tx.commit().await.map_err(backend)?;
        Ok(ids.len() as u64)
    }

    async fn put_user(&self, user: &User) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO users (id, username, auth_subject) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET username = EXCLUDED.username, \
             auth_subject = EXCLUDED.auth_subject",
        )
        .bind(&user.id)
        .bind(user.username.as_deref())
        .bind(&user.auth_subject)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(true),
            // The username column is UNIQUE.
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(backend(e)),
        }
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT id, username, auth_subject FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|row| {
            Ok(User {
                id: row.try_get("id").map_err(backend)?,
                username: row.try_get("username").map_err(backend)?,
                auth_subject: row.try_get("auth_subject").map_err(backend)?,
            })
        })
        .transpose()
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }
}
