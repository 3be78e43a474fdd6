use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use rusqlite::Connection;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("ad id {0} out of range for storage")]
    IdRange(u64),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Canonical ad identifier. Parsed once from markup, stored as INTEGER.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AdId(pub u64);

impl FromStr for AdId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse().map(AdId)
    }
}

impl fmt::Display for AdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdRecord {
    pub id: AdId,
    pub title: String,
    pub description: String,
    pub location: String,
    pub posted: String,
    pub price: String,
    pub url: String,
}

/// Everything already seen for one feed, newest first.
#[derive(Debug, Clone, Default)]
pub struct KnownAdSet {
    records: Vec<AdRecord>,
    ids: HashSet<AdId>,
}

impl KnownAdSet {
    pub fn from_records(records: Vec<AdRecord>) -> Self {
        let mut set = Self::default();
        for r in records {
            set.push(r);
        }
        set
    }

    fn push(&mut self, record: AdRecord) -> bool {
        if !self.ids.insert(record.id) {
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn contains(&self, id: AdId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[AdRecord] {
        &self.records
    }

    #[cfg(test)]
    pub fn ids(&self) -> &HashSet<AdId> {
        &self.ids
    }
}

/// Ads discovered during the current pass only, in discovery order.
#[derive(Debug, Clone, Default)]
pub struct ScrapePass {
    order: Vec<AdId>,
    records: HashMap<AdId, AdRecord>,
}

impl ScrapePass {
    /// Returns false if the id was already recorded in this pass.
    pub fn insert(&mut self, record: AdRecord) -> bool {
        if self.records.contains_key(&record.id) {
            return false;
        }
        self.order.push(record.id);
        self.records.insert(record.id, record);
        true
    }

    pub fn contains(&self, id: AdId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AdRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }
}

/// Union keyed by id. New records go first; an id that is already known keeps its old record.
pub fn merge(known: KnownAdSet, pass: &ScrapePass) -> KnownAdSet {
    let mut merged = KnownAdSet::default();
    for record in pass.iter() {
        if !known.contains(record.id) {
            merged.push(record.clone());
        }
    }
    for record in known.records {
        merged.push(record);
    }
    merged
}

pub struct FeedCount {
    pub feed: String,
    pub ads: i64,
}

/// SQLite-backed known-ad store. One logical store per feed name.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS ads (
                feed        TEXT NOT NULL,
                ad_id       INTEGER NOT NULL,
                position    INTEGER NOT NULL,
                title       TEXT NOT NULL,
                description TEXT NOT NULL,
                location    TEXT NOT NULL,
                posted      TEXT NOT NULL,
                price       TEXT NOT NULL,
                url         TEXT NOT NULL,
                PRIMARY KEY (feed, ad_id)
            );
            CREATE INDEX IF NOT EXISTS idx_ads_feed_position ON ads(feed, position);
            ",
        )?;
        Ok(())
    }

    /// Load a feed's known ads. A feed that was never persisted loads as empty.
    pub fn load(&self, feed: &str) -> Result<KnownAdSet> {
        let mut stmt = self.conn.prepare(
            "SELECT ad_id, title, description, location, posted, price, url
             FROM ads WHERE feed = ?1 ORDER BY position",
        )?;
        let rows = stmt
            .query_map([feed], |row| {
                let id: i64 = row.get(0)?;
                Ok(AdRecord {
                    id: AdId(id as u64),
                    title: row.get(1)?,
                    description: row.get(2)?,
                    location: row.get(3)?,
                    posted: row.get(4)?,
                    price: row.get(5)?,
                    url: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(KnownAdSet::from_records(rows))
    }

    /// Replace a feed's rows with `set` in one transaction.
    ///
    /// Either the whole new set is committed or the previous one is left untouched.
    pub fn persist(&self, feed: &str, set: &KnownAdSet) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM ads WHERE feed = ?1", [feed])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO ads
                 (feed, ad_id, position, title, description, location, posted, price, url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for (pos, r) in set.records().iter().enumerate() {
                let id = i64::try_from(r.id.0).map_err(|_| StoreError::IdRange(r.id.0))?;
                stmt.execute(rusqlite::params![
                    feed,
                    id,
                    pos as i64,
                    r.title,
                    r.description,
                    r.location,
                    r.posted,
                    r.price,
                    r.url,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn feed_counts(&self) -> Result<Vec<FeedCount>> {
        let mut stmt = self
            .conn
            .prepare("SELECT feed, COUNT(*) FROM ads GROUP BY feed ORDER BY feed")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(FeedCount {
                    feed: row.get(0)?,
                    ads: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
pub(crate) fn sample_record(id: u64, title: &str) -> AdRecord {
    AdRecord {
        id: AdId(id),
        title: title.to_string(),
        description: format!("{} in good shape", title),
        location: "Ottawa".to_string(),
        posted: "2 hours ago".to_string(),
        price: "$1,200".to_string(),
        url: format!("http://www.kijiji.ca/v-cars/ottawa/{}", id),
    }
}
