//! SQLite-backed local cache of the service catalog and user data.
//!
//! The store owns every persisted row. Catalog rows (summaries and details)
//! are written by the sync coordinator and the search waterfall; favorites
//! and history are written by explicit user actions.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, Transaction, params};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::live::{ChangeNotifier, LiveQuery, Table};
use crate::model::{
    Favorite, HistoryEntry, LocalizedString, ServiceDetail, ServiceSummary, now_millis,
};

/// Metadata key holding the last applied remote catalog version.
pub const CATALOG_VERSION_KEY: &str = "catalog_version";

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS services (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        subtitle TEXT NOT NULL,
        icon TEXT NOT NULL,
        category TEXT NOT NULL,
        version_added INTEGER NOT NULL,
        last_updated INTEGER NOT NULL,
        images TEXT NOT NULL,
        image_names TEXT NOT NULL,
        search_keywords TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_services_category ON services(category);

    CREATE TABLE IF NOT EXISTS service_details (
        service_id TEXT PRIMARY KEY REFERENCES services(id) ON DELETE CASCADE,
        instructions TEXT NOT NULL,
        required_documents TEXT NOT NULL,
        processing_time TEXT NOT NULL,
        contact_info TEXT NOT NULL,
        youtube_link TEXT,
        last_updated INTEGER NOT NULL,
        images TEXT NOT NULL,
        image_names TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS favorites (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        service_id TEXT NOT NULL REFERENCES services(id) ON DELETE CASCADE,
        added_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_favorites_service ON favorites(service_id);

    CREATE TABLE IF NOT EXISTS history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        service_id TEXT NOT NULL REFERENCES services(id) ON DELETE CASCADE,
        accessed_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_history_accessed ON history(accessed_at);

    CREATE TABLE IF NOT EXISTS metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

const SUMMARY_COLUMNS: &str = "s.id, s.title, s.subtitle, s.icon, s.category, s.version_added, \
     s.last_updated, s.images, s.image_names, s.search_keywords";

const DETAIL_COLUMNS: &str = "service_id, instructions, required_documents, processing_time, \
     contact_info, youtube_link, last_updated, images, image_names";

// ============================================================================
// Local Store
// ============================================================================

/// Handle to the local cache database.
///
/// Cheap to clone; all clones share one connection and one change notifier,
/// so a write through any clone wakes every live query.
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
    notifier: Arc<ChangeNotifier>,
}

impl LocalStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!("Opening local store at {}", path.display());
        Self::init(Connection::open(path)?)
    }

    /// A private, non-persistent store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        debug!("Local store schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            notifier: Arc::new(ChangeNotifier::new()),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub(crate) fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    // ------------------------------------------------------------------------
    // Service summaries
    // ------------------------------------------------------------------------

    /// Insert or replace summaries keyed by id.
    ///
    /// Existing rows are updated in place, so favorites and history that
    /// reference them survive.
    pub fn upsert_services(&self, services: &[ServiceSummary]) -> Result<usize, StoreError> {
        {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            for service in services {
                upsert_service(&tx, service)?;
            }
            tx.commit()?;
        }
        self.notifier.touch(&[Table::Services]);
        debug!("Upserted {} services", services.len());
        Ok(services.len())
    }

    /// Look up one summary by id.
    pub fn get_service(&self, id: &str) -> Result<Option<ServiceSummary>, StoreError> {
        let conn = self.conn()?;
        let service = conn
            .query_row(
                &format!("SELECT {SUMMARY_COLUMNS} FROM services s WHERE s.id = ?1"),
                params![id],
                summary_from_row,
            )
            .optional()?;
        Ok(service)
    }

    pub fn services_once(&self) -> Result<Vec<ServiceSummary>, StoreError> {
        self.query_summaries(
            &format!("SELECT {SUMMARY_COLUMNS} FROM services s ORDER BY s.title COLLATE NOCASE"),
            &[],
        )
    }

    /// All services, re-emitted on every catalog change.
    pub fn services(&self) -> LiveQuery<Vec<ServiceSummary>> {
        LiveQuery::new(self.clone(), &[Table::Services], |store| {
            store.services_once()
        })
    }

    pub fn services_in_category_once(
        &self,
        category: &str,
    ) -> Result<Vec<ServiceSummary>, StoreError> {
        self.query_summaries(
            &format!(
                "SELECT {SUMMARY_COLUMNS} FROM services s WHERE s.category = ?1 \
                 ORDER BY s.title COLLATE NOCASE"
            ),
            &[&category as &dyn rusqlite::ToSql],
        )
    }

    pub fn services_in_category(&self, category: &str) -> LiveQuery<Vec<ServiceSummary>> {
        let category = category.to_string();
        LiveQuery::new(self.clone(), &[Table::Services], move |store| {
            store.services_in_category_once(&category)
        })
    }

    /// Distinct categories present in the catalog.
    pub fn categories(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT category FROM services ORDER BY category")?;
        let categories = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(categories)
    }

    pub fn service_count(&self) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM services", [], |row| row.get(0))?)
    }

    /// Local substring search.
    ///
    /// Matches the query, case-insensitively, inside either variant of the
    /// title or subtitle, or exactly against one of the service's keywords.
    /// A blank query matches nothing.
    pub fn search_once(&self, query: &str) -> Result<Vec<ServiceSummary>, StoreError> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let matches = self
            .services_once()?
            .into_iter()
            .filter(|service| matches_local_query(service, &needle))
            .collect();
        Ok(matches)
    }

    pub fn search(&self, query: &str) -> LiveQuery<Vec<ServiceSummary>> {
        let query = query.to_string();
        LiveQuery::new(self.clone(), &[Table::Services], move |store| {
            store.search_once(&query)
        })
    }

    /// Delete one service together with its detail, favorites and history.
    pub fn delete_service(&self, id: &str) -> Result<bool, StoreError> {
        let removed = {
            let conn = self.conn()?;
            conn.execute("DELETE FROM services WHERE id = ?1", params![id])?
        };
        if removed > 0 {
            self.notifier.touch(Table::CASCADE_FROM_SERVICES);
        }
        Ok(removed > 0)
    }

    /// Full cache invalidation: drop every catalog row (cascading to user
    /// rows) and forget the applied catalog version.
    pub fn clear_catalog(&self) -> Result<usize, StoreError> {
        let removed = {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            let removed = tx.execute("DELETE FROM services", [])?;
            tx.execute(
                "DELETE FROM metadata WHERE key = ?1",
                params![CATALOG_VERSION_KEY],
            )?;
            tx.commit()?;
            removed
        };
        self.notifier.touch(Table::CASCADE_FROM_SERVICES);
        self.notifier.touch(&[Table::Metadata]);
        info!("Cleared {removed} cached services");
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // Service details
    // ------------------------------------------------------------------------

    pub fn get_detail(&self, service_id: &str) -> Result<Option<ServiceDetail>, StoreError> {
        let conn = self.conn()?;
        let detail = conn
            .query_row(
                &format!("SELECT {DETAIL_COLUMNS} FROM service_details WHERE service_id = ?1"),
                params![service_id],
                detail_from_row,
            )
            .optional()?;
        Ok(detail)
    }

    /// Insert or replace details. Details whose service is not cached are
    /// skipped; returns how many were written.
    pub fn upsert_details(&self, details: &[ServiceDetail]) -> Result<usize, StoreError> {
        let written = {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            let mut written = 0;
            for detail in details {
                if upsert_detail(&tx, detail)? {
                    written += 1;
                }
            }
            tx.commit()?;
            written
        };
        self.notifier.touch(&[Table::ServiceDetails]);
        Ok(written)
    }

    /// Write a summary and its detail together.
    pub fn upsert_service_with_detail(
        &self,
        service: &ServiceSummary,
        detail: &ServiceDetail,
    ) -> Result<(), StoreError> {
        {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            upsert_service(&tx, service)?;
            upsert_detail(&tx, detail)?;
            tx.commit()?;
        }
        self.notifier
            .touch(&[Table::Services, Table::ServiceDetails]);
        Ok(())
    }

    /// Apply a full remote catalog in one transaction and record `version`
    /// as the last applied catalog version.
    ///
    /// Returns the number of summaries and details written.
    pub fn replace_catalog(
        &self,
        services: &[ServiceSummary],
        details: &[ServiceDetail],
        version: i64,
    ) -> Result<(usize, usize), StoreError> {
        let written = {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            for service in services {
                upsert_service(&tx, service)?;
            }
            let mut detail_count = 0;
            for detail in details {
                if upsert_detail(&tx, detail)? {
                    detail_count += 1;
                } else {
                    warn!(
                        "Skipping detail for unknown service '{}'",
                        detail.service_id
                    );
                }
            }
            put_metadata(&tx, CATALOG_VERSION_KEY, &version.to_string())?;
            tx.commit()?;
            (services.len(), detail_count)
        };
        self.notifier
            .touch(&[Table::Services, Table::ServiceDetails, Table::Metadata]);
        Ok(written)
    }

    // ------------------------------------------------------------------------
    // Favorites
    // ------------------------------------------------------------------------

    /// Bookmark a service. Returns `false` if it already was one or could not
    /// be added.
    pub fn add_favorite(&self, service_id: &str) -> bool {
        match self.try_add_favorite(service_id) {
            Ok(added) => added,
            Err(StoreError::Database(rusqlite::Error::SqliteFailure(e, _)))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                debug!("Cannot favorite unknown service '{service_id}'");
                false
            }
            Err(e) => {
                warn!("Failed to add favorite '{service_id}': {e}");
                false
            }
        }
    }

    fn try_add_favorite(&self, service_id: &str) -> Result<bool, StoreError> {
        {
            let conn = self.conn()?;
            if favorite_exists(&conn, service_id)? {
                return Ok(false);
            }
            conn.execute(
                "INSERT INTO favorites (service_id, added_at) VALUES (?1, ?2)",
                params![service_id, now_millis()],
            )?;
        }
        self.notifier.touch(&[Table::Favorites]);
        Ok(true)
    }

    /// Remove a bookmark. Returns `false` if there was nothing to remove.
    pub fn remove_favorite(&self, service_id: &str) -> bool {
        let removed = self.conn().and_then(|conn| {
            Ok(conn.execute(
                "DELETE FROM favorites WHERE service_id = ?1",
                params![service_id],
            )?)
        });
        match removed {
            Ok(0) => false,
            Ok(_) => {
                self.notifier.touch(&[Table::Favorites]);
                true
            }
            Err(e) => {
                warn!("Failed to remove favorite '{service_id}': {e}");
                false
            }
        }
    }

    /// Flip the bookmark state; returns whether the service is now a favorite.
    pub fn toggle_favorite(&self, service_id: &str) -> bool {
        if self.remove_favorite(service_id) {
            false
        } else {
            self.add_favorite(service_id)
        }
    }

    pub fn is_favorite(&self, service_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        favorite_exists(&conn, service_id)
    }

    /// Favorite services, most recently added first.
    pub fn favorites_once(&self) -> Result<Vec<ServiceSummary>, StoreError> {
        self.query_summaries(
            &format!(
                "SELECT {SUMMARY_COLUMNS} FROM favorites f \
                 JOIN services s ON s.id = f.service_id \
                 ORDER BY f.added_at DESC, f.id DESC"
            ),
            &[],
        )
    }

    pub fn favorites(&self) -> LiveQuery<Vec<ServiceSummary>> {
        LiveQuery::new(
            self.clone(),
            &[Table::Services, Table::Favorites],
            |store| store.favorites_once(),
        )
    }

    pub fn favorite_entries_once(&self) -> Result<Vec<Favorite>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, service_id, added_at FROM favorites ORDER BY added_at DESC, id DESC",
        )?;
        let favorites = stmt
            .query_map([], |row| {
                Ok(Favorite {
                    id: row.get(0)?,
                    service_id: row.get(1)?,
                    added_at: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(favorites)
    }

    // ------------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------------

    /// Record that a service detail was viewed now.
    pub fn record_view(&self, service_id: &str) -> Result<i64, StoreError> {
        self.record_view_at(service_id, now_millis())
    }

    pub fn record_view_at(&self, service_id: &str, accessed_at: i64) -> Result<i64, StoreError> {
        let id = {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO history (service_id, accessed_at) VALUES (?1, ?2)",
                params![service_id, accessed_at],
            )?;
            conn.last_insert_rowid()
        };
        self.notifier.touch(&[Table::History]);
        Ok(id)
    }

    /// The `limit` most recent views, newest first.
    pub fn recent_history_once(&self, limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, service_id, accessed_at FROM history \
             ORDER BY accessed_at DESC, id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit as i64], |row| {
                Ok(HistoryEntry {
                    id: row.get(0)?,
                    service_id: row.get(1)?,
                    accessed_at: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn recent_history(&self, limit: usize) -> LiveQuery<Vec<HistoryEntry>> {
        LiveQuery::new(self.clone(), &[Table::History], move |store| {
            store.recent_history_once(limit)
        })
    }

    /// Delete every history row accessed strictly before `cutoff`.
    pub fn prune_history(&self, cutoff: i64) -> Result<usize, StoreError> {
        let removed = {
            let conn = self.conn()?;
            conn.execute(
                "DELETE FROM history WHERE accessed_at < ?1",
                params![cutoff],
            )?
        };
        if removed > 0 {
            self.notifier.touch(&[Table::History]);
        }
        debug!("Pruned {removed} history rows older than {cutoff}");
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------------

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn put_metadata(&self, key: &str, value: &str) -> Result<(), StoreError> {
        {
            let conn = self.conn()?;
            put_metadata(&conn, key, value)?;
        }
        self.notifier.touch(&[Table::Metadata]);
        Ok(())
    }

    /// Last applied remote catalog version, if any.
    pub fn catalog_version(&self) -> Result<Option<i64>, StoreError> {
        let raw = self.get_metadata(CATALOG_VERSION_KEY)?;
        Ok(raw.and_then(|v| match v.parse() {
            Ok(version) => Some(version),
            Err(_) => {
                warn!("Ignoring unparsable catalog version '{v}'");
                None
            }
        }))
    }

    fn query_summaries(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ServiceSummary>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let services = stmt
            .query_map(args, summary_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(services)
    }
}

// ============================================================================
// Row Helpers
// ============================================================================

fn matches_local_query(service: &ServiceSummary, needle: &str) -> bool {
    service.title.contains_lowercase(needle)
        || service.subtitle.contains_lowercase(needle)
        || service
            .search_keywords
            .iter()
            .any(|k| k.trim().to_lowercase() == needle)
}

fn upsert_service(tx: &Transaction<'_>, service: &ServiceSummary) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO services (id, title, subtitle, icon, category, version_added, \
             last_updated, images, image_names, search_keywords)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
             title = excluded.title,
             subtitle = excluded.subtitle,
             icon = excluded.icon,
             category = excluded.category,
             version_added = excluded.version_added,
             last_updated = excluded.last_updated,
             images = excluded.images,
             image_names = excluded.image_names,
             search_keywords = excluded.search_keywords",
        params![
            service.id,
            service.title.encode(),
            service.subtitle.encode(),
            service.icon,
            service.category,
            service.version_added,
            service.last_updated,
            serde_json::to_string(&service.images)?,
            serde_json::to_string(&service.image_names)?,
            serde_json::to_string(&service.search_keywords)?,
        ],
    )?;
    Ok(())
}

/// Returns `false` without writing when the parent service is missing.
fn upsert_detail(tx: &Transaction<'_>, detail: &ServiceDetail) -> Result<bool, StoreError> {
    let parent_exists: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM services WHERE id = ?1)",
        params![detail.service_id],
        |row| row.get(0),
    )?;
    if !parent_exists {
        return Ok(false);
    }
    tx.execute(
        "INSERT INTO service_details (service_id, instructions, required_documents, \
             processing_time, contact_info, youtube_link, last_updated, images, image_names)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(service_id) DO UPDATE SET
             instructions = excluded.instructions,
             required_documents = excluded.required_documents,
             processing_time = excluded.processing_time,
             contact_info = excluded.contact_info,
             youtube_link = excluded.youtube_link,
             last_updated = excluded.last_updated,
             images = excluded.images,
             image_names = excluded.image_names",
        params![
            detail.service_id,
            detail.instructions.encode(),
            detail.required_documents.encode(),
            detail.processing_time.encode(),
            detail.contact_info.encode(),
            detail.youtube_link,
            detail.last_updated,
            serde_json::to_string(&detail.images)?,
            serde_json::to_string(&detail.image_names)?,
        ],
    )?;
    Ok(true)
}

fn put_metadata(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO metadata (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

fn favorite_exists(conn: &Connection, service_id: &str) -> Result<bool, StoreError> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM favorites WHERE service_id = ?1)",
        params![service_id],
        |row| row.get(0),
    )?)
}

fn json_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn localized(row: &Row<'_>, idx: usize) -> rusqlite::Result<LocalizedString> {
    let raw: String = row.get(idx)?;
    Ok(LocalizedString::decode(&raw))
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<ServiceSummary> {
    Ok(ServiceSummary {
        id: row.get(0)?,
        title: localized(row, 1)?,
        subtitle: localized(row, 2)?,
        icon: row.get(3)?,
        category: row.get(4)?,
        version_added: row.get(5)?,
        last_updated: row.get(6)?,
        images: json_list(row, 7)?,
        image_names: json_list(row, 8)?,
        search_keywords: json_list(row, 9)?,
    })
}

fn detail_from_row(row: &Row<'_>) -> rusqlite::Result<ServiceDetail> {
    Ok(ServiceDetail {
        service_id: row.get(0)?,
        instructions: localized(row, 1)?,
        required_documents: localized(row, 2)?,
        processing_time: localized(row, 3)?,
        contact_info: localized(row, 4)?,
        youtube_link: row.get(5)?,
        last_updated: row.get(6)?,
        images: json_list(row, 7)?,
        image_names: json_list(row, 8)?,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::model::fixtures::{detail, service};

    fn seeded() -> LocalStore {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .upsert_services(&[
                service("passport", "E-Passport", "ই-পাসপোর্ট"),
                service("nid", "National ID Card", "জাতীয় পরিচয়পত্র"),
            ])
            .unwrap();
        store
    }

    // --- summaries ---

    #[test]
    fn test_upsert_replaces_by_id() {
        let store = seeded();
        let mut updated = service("passport", "E-Passport Renewal", "ই-পাসপোর্ট নবায়ন");
        updated.images = vec!["a.png".into(), "b.png".into()];
        store.upsert_services(&[updated.clone()]).unwrap();

        assert_eq!(store.service_count().unwrap(), 2);
        assert_eq!(store.get_service("passport").unwrap().unwrap(), updated);
    }

    #[test]
    fn test_get_missing_service() {
        let store = seeded();
        assert!(store.get_service("nope").unwrap().is_none());
    }

    #[test]
    fn test_categories_and_category_query() {
        let store = seeded();
        let mut land = service("mutation", "Land Mutation", "নামজারি");
        land.category = "land".into();
        store.upsert_services(&[land]).unwrap();

        assert_eq!(store.categories().unwrap(), vec!["general", "land"]);
        let land_services = store.services_in_category_once("land").unwrap();
        assert_eq!(land_services.len(), 1);
        assert_eq!(land_services[0].id, "mutation");
    }

    #[test]
    fn test_malformed_localized_column_reads_as_uniform() {
        let store = seeded();
        store
            .conn()
            .unwrap()
            .execute(
                "UPDATE services SET title = 'Legacy title' WHERE id = 'nid'",
                [],
            )
            .unwrap();

        let nid = store.get_service("nid").unwrap().unwrap();
        assert_eq!(nid.title, LocalizedString::uniform("Legacy title"));
    }

    // --- search ---

    #[test]
    fn test_search_matches_bengali_title() {
        let store = seeded();
        let hits = store.search_once("পাসপোর্ট").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "passport");
    }

    #[test]
    fn test_search_is_case_insensitive_and_covers_subtitle() {
        let store = seeded();
        assert_eq!(store.search_once("e-PASSPORT").unwrap().len(), 1);
        assert_eq!(store.search_once("card service").unwrap().len(), 1);
    }

    #[test]
    fn test_search_matches_exact_keyword() {
        let store = seeded();
        let mut svc = service("tin", "Taxpayer Registration", "করদাতা নিবন্ধন");
        svc.search_keywords = vec!["etin".into()];
        store.upsert_services(&[svc]).unwrap();

        assert_eq!(store.search_once("ETIN").unwrap()[0].id, "tin");
        assert!(store.search_once("eti").unwrap().is_empty());
    }

    #[test]
    fn test_blank_search_matches_nothing() {
        let store = seeded();
        assert!(store.search_once("   ").unwrap().is_empty());
    }

    // --- details and cascade ---

    #[test]
    fn test_detail_round_trip() {
        let store = seeded();
        let mut d = detail("passport");
        d.youtube_link = Some("https://youtu.be/abc".into());
        d.images = vec!["x.png".into()];
        assert_eq!(store.upsert_details(&[d.clone()]).unwrap(), 1);
        assert_eq!(store.get_detail("passport").unwrap().unwrap(), d);
    }

    #[test]
    fn test_detail_for_unknown_service_skipped() {
        let store = seeded();
        assert_eq!(store.upsert_details(&[detail("ghost")]).unwrap(), 0);
        assert!(store.get_detail("ghost").unwrap().is_none());
    }

    #[test]
    fn test_delete_service_cascades() {
        let store = seeded();
        store.upsert_details(&[detail("passport")]).unwrap();
        assert!(store.add_favorite("passport"));
        store.record_view("passport").unwrap();

        assert!(store.delete_service("passport").unwrap());

        assert!(store.get_detail("passport").unwrap().is_none());
        assert!(!store.is_favorite("passport").unwrap());
        assert!(store.recent_history_once(10).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_keeps_user_rows() {
        let store = seeded();
        assert!(store.add_favorite("passport"));
        store.record_view("passport").unwrap();

        store
            .upsert_services(&[service("passport", "Passport", "পাসপোর্ট")])
            .unwrap();

        assert!(store.is_favorite("passport").unwrap());
        assert_eq!(store.recent_history_once(10).unwrap().len(), 1);
    }

    #[test]
    fn test_replace_catalog_sets_version() {
        let store = LocalStore::open_in_memory().unwrap();
        let (services, details) = store
            .replace_catalog(
                &[service("a", "Alpha", "আলফা")],
                &[detail("a"), detail("orphan")],
                7,
            )
            .unwrap();
        assert_eq!((services, details), (1, 1));
        assert_eq!(store.catalog_version().unwrap(), Some(7));
    }

    #[test]
    fn test_clear_catalog_forgets_version() {
        let store = seeded();
        store.put_metadata(CATALOG_VERSION_KEY, "3").unwrap();
        assert!(store.add_favorite("nid"));

        assert_eq!(store.clear_catalog().unwrap(), 2);
        assert_eq!(store.service_count().unwrap(), 0);
        assert!(store.catalog_version().unwrap().is_none());
        assert!(store.favorites_once().unwrap().is_empty());
    }

    // --- favorites ---

    #[test]
    fn test_favorite_duplicate_rejected() {
        let store = seeded();
        assert!(store.add_favorite("nid"));
        assert!(!store.add_favorite("nid"));
        assert_eq!(store.favorite_entries_once().unwrap().len(), 1);
    }

    #[test]
    fn test_favorite_unknown_service_rejected() {
        let store = seeded();
        assert!(!store.add_favorite("ghost"));
    }

    #[test]
    fn test_remove_and_toggle_favorite() {
        let store = seeded();
        assert!(!store.remove_favorite("nid"));
        assert!(store.toggle_favorite("nid"));
        assert!(store.is_favorite("nid").unwrap());
        assert!(!store.toggle_favorite("nid"));
        assert!(!store.is_favorite("nid").unwrap());
    }

    #[test]
    fn test_favorites_join_services() {
        let store = seeded();
        store.add_favorite("passport");
        store.add_favorite("nid");

        let ids: Vec<String> = store
            .favorites_once()
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["nid", "passport"]);
    }

    // --- history ---

    #[test]
    fn test_prune_history_respects_cutoff() {
        let store = seeded();
        store.record_view_at("passport", 100).unwrap();
        store.record_view_at("passport", 199).unwrap();
        store.record_view_at("nid", 200).unwrap();
        store.record_view_at("nid", 300).unwrap();

        assert_eq!(store.prune_history(200).unwrap(), 2);

        let remaining: Vec<i64> = store
            .recent_history_once(10)
            .unwrap()
            .into_iter()
            .map(|h| h.accessed_at)
            .collect();
        assert_eq!(remaining, vec![300, 200]);
    }

    #[test]
    fn test_recent_history_limit_and_order() {
        let store = seeded();
        for ts in [10, 30, 20] {
            store.record_view_at("nid", ts).unwrap();
        }
        let recent = store.recent_history_once(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].accessed_at, 30);
        assert_eq!(recent[1].accessed_at, 20);
    }

    // --- metadata ---

    #[test]
    fn test_metadata_upsert() {
        let store = LocalStore::open_in_memory().unwrap();
        assert!(store.get_metadata("k").unwrap().is_none());
        store.put_metadata("k", "1").unwrap();
        store.put_metadata("k", "2").unwrap();
        assert_eq!(store.get_metadata("k").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_unparsable_catalog_version_is_none() {
        let store = LocalStore::open_in_memory().unwrap();
        store.put_metadata(CATALOG_VERSION_KEY, "abc").unwrap();
        assert!(store.catalog_version().unwrap().is_none());
    }

    #[test]
    fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");
        {
            let store = LocalStore::open(&path).unwrap();
            store
                .upsert_services(&[service("a", "Alpha", "আলফা")])
                .unwrap();
        }
        let reopened = LocalStore::open(&path).unwrap();
        assert_eq!(reopened.service_count().unwrap(), 1);
    }

    // --- live queries ---

    #[tokio::test]
    async fn test_live_search_re_emits_on_write() {
        let store = LocalStore::open_in_memory().unwrap();
        let mut live = store.search("passport");

        assert!(live.next().await.unwrap().unwrap().is_empty());

        store
            .upsert_services(&[service("passport", "E-Passport", "ই-পাসপোর্ট")])
            .unwrap();

        let next = tokio::time::timeout(Duration::from_secs(1), live.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(next.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_query_outlives_other_store_handles() {
        let store = seeded();
        let mut live = store.services();
        assert_eq!(live.next().await.unwrap().unwrap().len(), 2);

        drop(store);

        let waited = tokio::time::timeout(Duration::from_secs(60), live.next()).await;
        assert!(waited.is_err(), "live query should keep waiting, not end");
    }

    #[tokio::test]
    async fn test_live_query_ignores_unrelated_tables() {
        let store = seeded();
        let mut live = store.services();
        live.next().await.unwrap().unwrap();

        store.record_view("nid").unwrap();
        store.put_metadata("k", "v").unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(50), live.next()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_live_favorites_follow_cascade() {
        let store = seeded();
        store.add_favorite("nid");
        let mut live = store.favorites();
        assert_eq!(live.next().await.unwrap().unwrap().len(), 1);

        store.delete_service("nid").unwrap();
        let next = tokio::time::timeout(Duration::from_secs(1), live.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(next.is_empty());
    }

    #[tokio::test]
    async fn test_restart_yields_immediately() {
        let store = seeded();
        let mut live = store.recent_history(5);
        live.next().await.unwrap().unwrap();

        let mut restarted = live.restart();
        let first = tokio::time::timeout(Duration::from_millis(50), restarted.next()).await;
        assert!(first.is_ok());
    }
}
