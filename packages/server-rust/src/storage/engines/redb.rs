//! Embedded [`PageStore`] backed by [`redb`].
//!
//! redb is a single-writer engine: every write transaction is serialized, so
//! the revision check and the row update inside one transaction form the
//! conditional write. Rows are encoded with `rmp-serde` (named fields) so new
//! optional fields stay readable from older files.
//!
//! All redb calls are blocking and run on the tokio blocking pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use pagedrop_core::{Page, PageId, PageSummary, User};
use redb::{Database, ReadableTable, TableDefinition};

use crate::storage::page_store::{
    is_claimable, is_stale_anonymous, CasOutcome, PagePatch, PageStore, StoreError,
};

const PAGES: TableDefinition<&str, &[u8]> = TableDefinition::new("pages");
const SLUGS: TableDefinition<&str, &str> = TableDefinition::new("slug_reservations");
const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// redb-backed revision store.
pub struct RedbPageStore {
    db: Arc<Database>,
}

impl RedbPageStore {
    /// Opens (or creates) the database file at `path` and ensures all tables
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the tables created.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db = Database::create(path.as_ref())?;
        create_tables(&db)?;
        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("redb task panicked: {e}")))?
            .map_err(StoreError::Backend)
    }
}

fn create_tables(db: &Database) -> anyhow::Result<()> {
    let txn = db.begin_write()?;
    {
        txn.open_table(PAGES)?;
        txn.open_table(SLUGS)?;
        txn.open_table(USERS)?;
    }
    txn.commit()?;
    Ok(())
}

fn decode_page(bytes: &[u8]) -> anyhow::Result<Page> {
    Ok(rmp_serde::from_slice(bytes)?)
}

fn encode_page(page: &Page) -> anyhow::Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(page)?)
}

fn read_page<T>(table: &T, id: &str) -> anyhow::Result<Option<Page>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(id)? {
        Some(guard) => Ok(Some(decode_page(guard.value())?)),
        None => Ok(None),
    }
}

fn scan_pages<T>(table: &T) -> anyhow::Result<Vec<Page>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut pages = Vec::new();
    for entry in table.iter()? {
        let (_, value) = entry?;
        pages.push(decode_page(value.value())?);
    }
    Ok(pages)
}

#[async_trait]
impl PageStore for RedbPageStore {
    fn backend_name(&self) -> &'static str {
        "redb"
    }

    async fn initialize(&self) -> Result<(), StoreError> {
        self.blocking(create_tables).await
    }

    async fn create_page(&self, page: &Page) -> Result<(), StoreError> {
        let page = page.clone();
        let id = page.id.clone();
        let inserted = self
            .blocking(move |db| {
                let txn = db.begin_write()?;
                {
                    let mut pages = txn.open_table(PAGES)?;
                    if pages.get(page.id.as_str())?.is_some() {
                        return Ok(false);
                    }
                    let bytes = encode_page(&page)?;
                    pages.insert(page.id.as_str(), bytes.as_slice())?;
                }
                txn.commit()?;
                Ok(true)
            })
            .await?;

        if inserted {
            Ok(())
        } else {
            Err(StoreError::PageExists(id))
        }
    }

    async fn get_page(&self, id: &PageId) -> Result<Option<Page>, StoreError> {
        let id = id.clone();
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let pages = txn.open_table(PAGES)?;
            read_page(&pages, id.as_str())
        })
        .await
    }

    async fn get_page_by_slug(&self, slug: &str) -> Result<Option<Page>, StoreError> {
        let slug = slug.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let slugs = txn.open_table(SLUGS)?;
            let holder = slugs.get(slug.as_str())?.map(|g| g.value().to_string());
            let Some(holder) = holder else {
                return Ok(None);
            };
            let pages = txn.open_table(PAGES)?;
            Ok(read_page(&pages, &holder)?.filter(|page| page.slug.as_deref() == Some(&slug)))
        })
        .await
    }

    async fn list_pages_for_owner(
        &self,
        owner_token: &str,
    ) -> Result<Vec<PageSummary>, StoreError> {
        let owner_token = owner_token.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let pages = txn.open_table(PAGES)?;
            let mut summaries: Vec<PageSummary> = scan_pages(&pages)?
                .into_iter()
                .filter(|page| page.owner_token == owner_token)
                .map(|page| page.summary())
                .collect();
            summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            Ok(summaries)
        })
        .await
    }

    async fn cas_update(
        &self,
        id: &PageId,
        expected_revision: u64,
        patch: PagePatch,
    ) -> Result<CasOutcome, StoreError> {
        let page_id = id.clone();
        let outcome = self
            .blocking(move |db| {
                let txn = db.begin_write()?;
                let outcome = {
                    let mut pages = txn.open_table(PAGES)?;
                    let mut slugs = txn.open_table(SLUGS)?;

                    let Some(mut page) = read_page(&pages, page_id.as_str())? else {
                        return Ok(None);
                    };
                    if page.server_revision != expected_revision {
                        return Ok(Some(CasOutcome::RevisionMismatch {
                            current_revision: page.server_revision,
                        }));
                    }

                    if let Some(slug) = patch.slug() {
                        let holder = slugs.get(slug)?.map(|g| g.value().to_string());
                        if let Some(holder) = holder {
                            if holder != page_id.as_str() {
                                return Ok(Some(CasOutcome::SlugTaken {
                                    holder: PageId::new(holder),
                                }));
                            }
                        }

                        let mut released = Vec::new();
                        for entry in slugs.iter()? {
                            let (reserved, holder) = entry?;
                            if holder.value() == page_id.as_str() && reserved.value() != slug {
                                released.push(reserved.value().to_string());
                            }
                        }
                        for reserved in &released {
                            slugs.remove(reserved.as_str())?;
                        }
                        slugs.insert(slug, page_id.as_str())?;
                    }

                    patch.apply_to(&mut page);
                    let bytes = encode_page(&page)?;
                    pages.insert(page_id.as_str(), bytes.as_slice())?;
                    CasOutcome::Applied(Box::new(page))
                };
                txn.commit()?;
                Ok(Some(outcome))
            })
            .await?;

        outcome.ok_or_else(|| StoreError::PageNotFound(id.clone()))
    }

    async fn slug_holder(&self, slug: &str) -> Result<Option<PageId>, StoreError> {
        let slug = slug.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let slugs = txn.open_table(SLUGS)?;
            let holder = slugs
                .get(slug.as_str())?
                .map(|g| PageId::new(g.value()));
            Ok(holder)
        })
        .await
    }

    async fn reserve_slug(&self, slug: &str, page: &PageId) -> Result<bool, StoreError> {
        let slug = slug.to_string();
        let page = page.clone();
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            let reserved = {
                let mut slugs = txn.open_table(SLUGS)?;
                let holder = slugs.get(slug.as_str())?.map(|g| g.value().to_string());
                match holder {
                    Some(holder) => holder == page.as_str(),
                    None => {
                        slugs.insert(slug.as_str(), page.as_str())?;
                        true
                    }
                }
            };
            txn.commit()?;
            Ok(reserved)
        })
        .await
    }

    async fn claim_anonymous(
        &self,
        anonymous_token: &str,
        user_id: &str,
        now: i64,
    ) -> Result<Vec<PageId>, StoreError> {
        let anonymous_token = anonymous_token.to_string();
        let user_id = user_id.to_string();
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            let mut claimed = Vec::new();
            {
                let mut pages = txn.open_table(PAGES)?;
                let eligible: Vec<Page> = scan_pages(&pages)?
                    .into_iter()
                    .filter(|page| is_claimable(page, &anonymous_token))
                    .collect();
                for mut page in eligible {
                    page.user_id = Some(user_id.clone());
                    page.owner_token.clone_from(&user_id);
                    page.updated_at = now;
                    let bytes = encode_page(&page)?;
                    pages.insert(page.id.as_str(), bytes.as_slice())?;
                    claimed.push(page.id);
                }
            }
            txn.commit()?;
            claimed.sort();
            Ok(claimed)
        })
        .await
    }

    async fn delete_stale_anonymous(&self, idle_before: i64) -> Result<u64, StoreError> {
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            let deleted = {
                let mut pages = txn.open_table(PAGES)?;
                let mut slugs = txn.open_table(SLUGS)?;

                let stale: Vec<String> = scan_pages(&pages)?
                    .into_iter()
                    .filter(|page| is_stale_anonymous(page, idle_before))
                    .map(|page| page.id.as_str().to_string())
                    .collect();

                let mut released = Vec::new();
                for entry in slugs.iter()? {
                    let (reserved, holder) = entry?;
                    if stale.iter().any(|id| id == holder.value()) {
                        released.push(reserved.value().to_string());
                    }
                }
                for reserved in &released {
                    slugs.remove(reserved.as_str())?;
                }
                for id in &stale {
                    pages.remove(id.as_str())?;
                }
                stale.len() as u64
            };
            txn.commit()?;
            Ok(deleted)
        })
        .await
    }

    async fn put_user(&self, user: &User) -> Result<bool, StoreError> {
        let user = user.clone();
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            {
                let mut users = txn.open_table(USERS)?;
                if let Some(username) = user.username.as_deref() {
                    for entry in users.iter()? {
                        let (_, value) = entry?;
                        let other: User = rmp_serde::from_slice(value.value())?;
                        if other.id != user.id && other.username.as_deref() == Some(username) {
                            return Ok(false);
                        }
                    }
                }
                let bytes = rmp_serde::to_vec_named(&user)?;
                users.insert(user.id.as_str(), bytes.as_slice())?;
            }
            txn.commit()?;
            Ok(true)
        })
        .await
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        let id = id.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let users = txn.open_table(USERS)?;
            match users.get(id.as_str())? {
                Some(guard) => Ok(Some(rmp_serde::from_slice(guard.value())?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
