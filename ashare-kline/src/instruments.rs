//! Instrument and ETF side catalogs.
//!
//! Small keyed tables, not partitioned. `stock_info` holds every code that
//! has bars in the store (stocks, ETFs, indices and sectors alike);
//! `etf_info` holds ETF classification used by collectors.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::cache::EtfCache;
use crate::db::Database;
use crate::error::Result;

/// Display name and classification of an instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentInfo {
    pub code: String,
    pub name: String,
    /// Coarse classification, e.g. "Stock", "ETF", "Sector"
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// ETF metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EtfInfo {
    pub etf_code: String,
    /// Theme or tracked segment, e.g. "证券", "半导体"
    pub etf_type: String,
    pub etf_name: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl InstrumentInfo {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            code: row.get(0)?,
            name: row.get(1)?,
            sector: row.get(2)?,
            industry: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

impl EtfInfo {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            etf_code: row.get(0)?,
            etf_type: row.get(1)?,
            etf_name: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }
}

/// Record `code` if it has never been seen. Existing rows are left alone.
pub(crate) fn record_unseen(conn: &Connection, code: &str, name: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO stock_info (code, name) VALUES (?1, ?2)",
        params![code, name],
    )?;
    Ok(inserted > 0)
}

/// Access to `stock_info` and `etf_info`.
#[derive(Debug, Clone)]
pub struct InstrumentCatalog {
    db: Database,
    etf_cache: Option<Arc<EtfCache>>,
}

impl InstrumentCatalog {
    pub(crate) fn new(db: Database, etf_cache: Option<Arc<EtfCache>>) -> Self {
        Self { db, etf_cache }
    }

    pub(crate) fn set_etf_cache(&mut self, cache: Option<Arc<EtfCache>>) {
        self.etf_cache = cache;
    }

    pub fn etf_cache(&self) -> Option<&Arc<EtfCache>> {
        self.etf_cache.as_ref()
    }

    /// Insert or overwrite an instrument. `created_at` survives updates.
    pub fn upsert_instrument_info(
        &self,
        code: &str,
        name: &str,
        sector: Option<&str>,
        industry: Option<&str>,
    ) -> Result<()> {
        let conn = self.db.connect()?;
        conn.execute(
            r#"
            INSERT INTO stock_info (code, name, sector, industry, updated_at)
            VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP)
            ON CONFLICT(code) DO UPDATE SET
                name = excluded.name,
                sector = excluded.sector,
                industry = excluded.industry,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![code, name, sector, industry],
        )?;
        debug!(code, "Upserted instrument info");
        Ok(())
    }

    pub fn get_instrument_info(&self, code: &str) -> Result<Option<InstrumentInfo>> {
        let conn = self.db.connect()?;
        let info = conn
            .query_row(
                "SELECT code, name, sector, industry, created_at, updated_at
                 FROM stock_info WHERE code = ?1",
                params![code],
                InstrumentInfo::from_row,
            )
            .optional()?;
        Ok(info)
    }

    /// All instruments ordered by code.
    pub fn list_instruments(&self) -> Result<Vec<InstrumentInfo>> {
        let conn = self.db.connect()?;
        let mut stmt = conn.prepare(
            "SELECT code, name, sector, industry, created_at, updated_at
             FROM stock_info ORDER BY code",
        )?;
        let rows = stmt.query_map([], InstrumentInfo::from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Insert or overwrite an ETF and drop its cached copy.
    pub fn upsert_etf_info(&self, etf_code: &str, etf_type: &str, etf_name: &str) -> Result<()> {
        let conn = self.db.connect()?;
        conn.execute(
            r#"
            INSERT INTO etf_info (etf_code, etf_type, etf_name, updated_at)
            VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
            ON CONFLICT(etf_code) DO UPDATE SET
                etf_type = excluded.etf_type,
                etf_name = excluded.etf_name,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![etf_code, etf_type, etf_name],
        )?;

        if let Some(cache) = &self.etf_cache {
            cache.invalidate(etf_code);
        }
        debug!(etf_code, "Upserted ETF info");
        Ok(())
    }

    /// ETF lookup, served from the cache when one is attached.
    pub fn get_etf_info(&self, etf_code: &str) -> Result<Option<EtfInfo>> {
        if let Some(hit) = self.etf_cache.as_ref().and_then(|c| c.get(etf_code)) {
            return Ok(Some(hit));
        }
        let generation = self.etf_cache.as_ref().map(|c| c.generation());

        let conn = self.db.connect()?;
        let info = conn
            .query_row(
                "SELECT etf_code, etf_type, etf_name, created_at, updated_at
                 FROM etf_info WHERE etf_code = ?1",
                params![etf_code],
                EtfInfo::from_row,
            )
            .optional()?;

        if let (Some(cache), Some(info), Some(generation)) =
            (&self.etf_cache, &info, generation)
        {
            cache.put_if_generation(info.clone(), generation);
        }
        Ok(info)
    }

    /// `etf_code -> etf_type` for every known ETF.
    pub fn etf_types(&self) -> Result<BTreeMap<String, String>> {
        let conn = self.db.connect()?;
        let mut stmt = conn.prepare("SELECT etf_code, etf_type FROM etf_info")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn create_test_catalog(cache: Option<Arc<EtfCache>>) -> (TempDir, InstrumentCatalog) {
        let dir = tempdir().unwrap();
        let db = Database::initialize(dir.path().join("instruments.db"), Duration::from_secs(5))
            .unwrap();
        (dir, InstrumentCatalog::new(db, cache))
    }

    #[test]
    fn test_instrument_upsert_is_last_write_wins() {
        let (_dir, catalog) = create_test_catalog(None);

        catalog
            .upsert_instrument_info("BK0477", "酿酒行业", Some("Sector"), None)
            .unwrap();
        catalog
            .upsert_instrument_info("BK0477", "酿酒行业", Some("Sector"), Some("食品饮料"))
            .unwrap();

        let info = catalog.get_instrument_info("BK0477").unwrap().unwrap();
        assert_eq!(info.industry.as_deref(), Some("食品饮料"));
        assert!(info.created_at.is_some());
        assert_eq!(catalog.list_instruments().unwrap().len(), 1);
    }

    #[test]
    fn test_record_unseen_keeps_existing() {
        let (_dir, catalog) = create_test_catalog(None);
        catalog
            .upsert_instrument_info("000001", "平安银行", Some("Stock"), Some("银行"))
            .unwrap();

        let conn = catalog.db.connect().unwrap();
        assert!(!record_unseen(&conn, "000001", "other").unwrap());
        assert!(record_unseen(&conn, "600000", "浦发银行").unwrap());

        let kept = catalog.get_instrument_info("000001").unwrap().unwrap();
        assert_eq!(kept.name, "平安银行");
        assert_eq!(kept.sector.as_deref(), Some("Stock"));

        let added = catalog.get_instrument_info("600000").unwrap().unwrap();
        assert!(added.sector.is_none());
    }

    #[test]
    fn test_missing_instrument() {
        let (_dir, catalog) = create_test_catalog(None);
        assert!(catalog.get_instrument_info("999999").unwrap().is_none());
        assert!(catalog.get_etf_info("999999").unwrap().is_none());
    }

    #[test]
    fn test_etf_types() {
        let (_dir, catalog) = create_test_catalog(None);
        catalog.upsert_etf_info("512880", "证券", "证券ETF").unwrap();
        catalog.upsert_etf_info("512480", "半导体", "半导体ETF").unwrap();

        let types = catalog.etf_types().unwrap();
        assert_eq!(types.len(), 2);
        assert_eq!(types["512880"], "证券");
    }

    #[test]
    fn test_etf_cache_invalidated_on_write() {
        let cache = Arc::new(EtfCache::new());
        let (_dir, catalog) = create_test_catalog(Some(cache.clone()));

        catalog.upsert_etf_info("512880", "证券", "证券ETF").unwrap();
        assert_eq!(catalog.get_etf_info("512880").unwrap().unwrap().etf_type, "证券");
        assert_eq!(cache.stats().active_entries, 1);

        catalog.upsert_etf_info("512880", "券商", "证券ETF").unwrap();
        assert_eq!(cache.stats().total_entries, 0);
        assert_eq!(catalog.get_etf_info("512880").unwrap().unwrap().etf_type, "券商");
    }

    #[test]
    fn test_etf_cache_not_refilled_with_superseded_row() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let cache = Arc::new(EtfCache::new());
        let (_dir, catalog) = create_test_catalog(Some(cache));
        catalog.upsert_etf_info("512880", "v0", "证券ETF").unwrap();

        let done = AtomicBool::new(false);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    while !done.load(Ordering::Relaxed) {
                        catalog.get_etf_info("512880").unwrap();
                    }
                });
            }

            for i in 1..=50 {
                catalog
                    .upsert_etf_info("512880", &format!("v{i}"), "证券ETF")
                    .unwrap();
            }
            done.store(true, Ordering::Relaxed);
        });

        let info = catalog.get_etf_info("512880").unwrap().unwrap();
        assert_eq!(info.etf_type, "v50");
    }
}
