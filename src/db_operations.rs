use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rusqlite::{
    params,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Type, ValueRef},
    Connection, OptionalExtension, Row, ToSql,
};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::{
    data_types::{Destination, FetchRecord, Institution, Language, Menu, MenuRecord},
    errors::StoreError,
};

const CHANGE_CAPACITY: usize = 64;

const MENU_COLUMNS: &str = "mensa_id, idx, language, title, description, price, allergens,
    is_vegetarian, is_vegan, image_url, date, created_at";

/// Key of a live menu query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MenuKey {
    pub mensa_id: Uuid,
    pub language: Language,
    pub date: NaiveDate,
}

/// Broadcast after every committed write.
#[derive(Debug, Clone)]
pub enum StoreChange {
    Menus(Vec<MenuKey>),
    /// expiry sweep or wipe, any key may be affected
    All,
}

impl StoreChange {
    pub fn touches(&self, key: &MenuKey) -> bool {
        match self {
            StoreChange::Menus(keys) => keys.contains(key),
            StoreChange::All => true,
        }
    }
}

/// SQLite backed menu cache.
///
/// All calls run on the blocking pool against a single connection, so every
/// upsert and delete is atomic and commits are observed in order.
#[derive(Clone)]
pub struct MenuStore {
    conn: Arc<Mutex<Connection>>,
    changes: broadcast::Sender<StoreChange>,
}

impl MenuStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        check_or_create_db_tables(&conn)?;
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            changes,
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection, &broadcast::Sender<StoreChange>) -> Result<T, StoreError>
            + Send
            + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let changes = self.changes.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            // notifying while still holding the lock keeps notification order == commit order
            f(&mut *conn, &changes)
        })
        .await?
    }

    pub async fn insert_menu(&self, record: MenuRecord) -> Result<(), StoreError> {
        self.insert_menus(vec![record]).await.map(|_| ())
    }

    /// Upserts all records in one transaction, last write wins per key.
    pub async fn insert_menus(&self, records: Vec<MenuRecord>) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        self.with_conn(move |conn, changes| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(&format!(
                    "INSERT OR REPLACE INTO menus ({MENU_COLUMNS})
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ))?;

                for record in &records {
                    let menu = &record.menu;
                    stmt.execute(params![
                        record.mensa_id.to_string(),
                        menu.index,
                        record.language,
                        menu.title,
                        menu.description,
                        serde_json::to_string(&menu.price)?,
                        menu.allergens,
                        menu.is_vegetarian,
                        menu.is_vegan,
                        menu.image_url,
                        record.date,
                        record.created_at.timestamp_millis(),
                    ])?;
                }
            }
            tx.commit()?;

            let mut keys: Vec<MenuKey> = Vec::new();
            for record in &records {
                let key = MenuKey {
                    mensa_id: record.mensa_id,
                    language: record.language,
                    date: record.date,
                };
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
            let _ = changes.send(StoreChange::Menus(keys));

            Ok(records.len())
        })
        .await
    }

    /// All menus of one mensa for one language and day, in stored order.
    pub async fn query_menus(
        &self,
        mensa_id: Uuid,
        language: Language,
        date: NaiveDate,
    ) -> Result<Vec<Menu>, StoreError> {
        self.with_conn(move |conn, _| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {MENU_COLUMNS} FROM menus
                    WHERE mensa_id = ?1 AND language = ?2 AND date = ?3
                    ORDER BY idx, title"
            ))?;
            let menus = stmt
                .query_map(params![mensa_id.to_string(), language, date], |row| {
                    record_from_row(row).map(|r| r.menu)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(menus)
        })
        .await
    }

    /// Live variant of [`MenuStore::query_menus`].
    pub fn watch_menus(&self, mensa_id: Uuid, language: Language, date: NaiveDate) -> MenuWatcher {
        MenuWatcher {
            store: self.clone(),
            // subscribe before the first snapshot so no commit slips through
            changes: self.changes.subscribe(),
            key: MenuKey {
                mensa_id,
                language,
                date,
            },
            primed: false,
        }
    }

    pub async fn query_menus_by_date(&self, date: NaiveDate) -> Result<Vec<MenuRecord>, StoreError> {
        self.with_conn(move |conn, _| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {MENU_COLUMNS} FROM menus
                    WHERE date = ?1
                    ORDER BY mensa_id, language, idx"
            ))?;
            let records = stmt
                .query_map(params![date], record_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(records)
        })
        .await
    }

    /// Removes menus created before `before`, returns the number of deleted rows.
    pub async fn delete_expired(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        self.with_conn(move |conn, changes| {
            let deleted = conn.execute(
                "DELETE FROM menus WHERE created_at < ?1",
                params![before.timestamp_millis()],
            )?;
            if deleted > 0 {
                let _ = changes.send(StoreChange::All);
            }

            Ok(deleted)
        })
        .await
    }

    /// Wipes menus and fetch records.
    pub async fn clear_all(&self) -> Result<(), StoreError> {
        self.with_conn(|conn, changes| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM menus", [])?;
            tx.execute("DELETE FROM fetch_info", [])?;
            tx.commit()?;
            let _ = changes.send(StoreChange::All);

            Ok(())
        })
        .await
    }

    pub async fn get_fetch_record(
        &self,
        institution: Institution,
        destination: Destination,
        language: Language,
    ) -> Result<Option<FetchRecord>, StoreError> {
        self.with_conn(move |conn, _| {
            let fetched_at: Option<i64> = conn
                .prepare_cached(
                    "SELECT fetched_at FROM fetch_info
                        WHERE institution = ?1 AND destination = ?2 AND language = ?3",
                )?
                .query_row(params![institution, destination, language], |row| row.get(0))
                .optional()?;

            Ok(fetched_at
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .map(|fetched_at| FetchRecord {
                    institution,
                    destination,
                    language,
                    fetched_at,
                }))
        })
        .await
    }

    /// Upserts a fetch record. The stored timestamp never moves backwards.
    pub async fn insert_fetch_record(&self, record: FetchRecord) -> Result<(), StoreError> {
        self.with_conn(move |conn, _| {
            conn.prepare_cached(
                "INSERT INTO fetch_info (institution, destination, language, fetched_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT (institution, destination, language)
                    DO UPDATE SET fetched_at = MAX(fetched_at, excluded.fetched_at)",
            )?
            .execute(params![
                record.institution,
                record.destination,
                record.language,
                record.fetched_at.timestamp_millis()
            ])?;

            Ok(())
        })
        .await
    }
}

/// Observes one (mensa, language, date) slot of the cache.
///
/// The first [`MenuWatcher::next`] yields the current rows. Every later call
/// waits for a commit touching the slot, then reads the slot.
///
/// Snapshots coalesce: the rows are read when `next` runs, not captured per
/// commit. Two quick commits can both yield the final state, and the state
/// between them is never observed.
pub struct MenuWatcher {
    store: MenuStore,
    changes: broadcast::Receiver<StoreChange>,
    key: MenuKey,
    primed: bool,
}

impl MenuWatcher {
    pub fn key(&self) -> &MenuKey {
        &self.key
    }

    pub async fn next(&mut self) -> Option<Result<Vec<Menu>, StoreError>> {
        if self.primed {
            loop {
                match self.changes.recv().await {
                    Ok(change) if change.touches(&self.key) => break,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        // missed notifications, re-reading yields the latest state anyway
                        log::debug!("menu watcher lagged by {skipped} changes");
                        break;
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        }
        self.primed = true;

        Some(
            self.store
                .query_menus(self.key.mensa_id, self.key.language, self.key.date)
                .await,
        )
    }
}

fn check_or_create_db_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "create table if not exists menus (
            mensa_id text not null,
            idx integer not null,
            language text not null,
            title text not null,
            description text not null,
            price text not null,
            allergens text,
            is_vegetarian integer not null,
            is_vegan integer not null,
            image_url text,
            date text not null,
            created_at integer not null,
            primary key (mensa_id, language, title, date)
        );

        create index if not exists menus_created_at on menus (created_at);

        create table if not exists fetch_info (
            institution text not null,
            destination text not null,
            language text not null,
            fetched_at integer not null,
            primary key (institution, destination, language)
        );",
    )
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<MenuRecord> {
    let mensa_id: String = row.get(0)?;
    let mensa_id = Uuid::parse_str(&mensa_id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;

    let price: String = row.get(5)?;
    let price: Vec<String> = serde_json::from_str(&price)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    let date: NaiveDate = row.get(10)?;
    let created_at: i64 = row.get(11)?;
    let created_at = DateTime::<Utc>::from_timestamp_millis(created_at)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(11, created_at))?;

    Ok(MenuRecord {
        mensa_id,
        language: row.get(2)?,
        date,
        created_at,
        menu: Menu {
            title: row.get(3)?,
            description: row.get(4)?,
            price,
            allergens: row.get(6)?,
            is_vegetarian: row.get(7)?,
            is_vegan: row.get(8)?,
            image_url: row.get(9)?,
            weekday: date.weekday(),
            index: row.get(1)?,
        },
    })
}

// the code enums are stored by their stable string code
macro_rules! sql_code {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.code()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let code = value.as_str()?;
                <$ty>::from_code(code)
                    .ok_or_else(|| FromSqlError::Other(Box::new(StoreError::UnknownCode(code.to_string()))))
            }
        }
    };
}

sql_code!(Institution);
sql_code!(Destination);
sql_code!(Language);
