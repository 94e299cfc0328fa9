//! Local SQLite database layer for Mero Hisab.
//!
//! Uses rusqlite with WAL mode. The database mirrors the user's Firestore
//! collections and also holds the key-value settings store (preferences,
//! OTP records, session) and the pending operation queue that is replayed
//! when the device comes back online.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{Error, Result};

/// Managed state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// In-memory database with all migrations applied.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

const DB_FILE_NAME: &str = "hisab.db";

/// Initialize the database at `{data_dir}/hisab.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState> {
    fs::create_dir_all(data_dir)?;

    let db_path = data_dir.join(DB_FILE_NAME);
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;

    // Fail fast on a corrupt file so init() can recreate it.
    let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    if check != "ok" {
        return Err(Error::State(format!("integrity check failed: {check}")));
    }

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Migration v1: settings store, ledger tables and the pending queue.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        -- profiles (one per verified phone number)
        CREATE TABLE IF NOT EXISTS profiles (
            id TEXT PRIMARY KEY,
            phone TEXT NOT NULL UNIQUE,
            name TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- customers
        CREATE TABLE IF NOT EXISTS customers (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            phone TEXT NOT NULL DEFAULT '',
            customer_type TEXT NOT NULL DEFAULT 'customer'
                CHECK (customer_type IN ('customer', 'supplier')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- transaction_entries
        CREATE TABLE IF NOT EXISTS transaction_entries (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            customer_id TEXT NOT NULL REFERENCES customers(id) ON DELETE CASCADE,
            customer_name TEXT NOT NULL,
            amount REAL NOT NULL CHECK (amount > 0),
            transaction_type TEXT NOT NULL
                CHECK (transaction_type IN ('given', 'received')),
            description TEXT NOT NULL DEFAULT '',
            transaction_date TEXT NOT NULL,
            balance_after REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- pending_operations (offline queue, replayed in id order)
        CREATE TABLE IF NOT EXISTS pending_operations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            operation TEXT NOT NULL CHECK (operation IN ('CREATE', 'UPDATE', 'DELETE')),
            entity TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            timestamp TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now'))
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_customers_user ON customers(user_id);
        CREATE INDEX IF NOT EXISTS idx_entries_customer ON transaction_entries(customer_id, transaction_date);
        CREATE INDEX IF NOT EXISTS idx_entries_user ON transaction_entries(user_id);
        CREATE INDEX IF NOT EXISTS idx_pending_status ON pending_operations(status);
        CREATE INDEX IF NOT EXISTS idx_pending_entity ON pending_operations(entity, entity_id);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        Error::Database(e)
    })?;

    info!("Applied migration v1");
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Migration v2: per-user phone uniqueness and push bookkeeping.
///
/// Adds:
/// - `synced_at` on customers and transaction_entries (last successful push)
/// - a partial unique index so two customers of one user cannot share a phone
fn migrate_v2(conn: &Connection) -> Result<()> {
    for table in ["customers", "transaction_entries"] {
        if !column_exists(conn, table, "synced_at")? {
            conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN synced_at TEXT;"))?;
        }
    }

    conn.execute_batch(
        "
        CREATE UNIQUE INDEX IF NOT EXISTS idx_customers_user_phone_unique
            ON customers(user_id, phone)
            WHERE phone <> '';

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        Error::Database(e)
    })?;

    info!("Applied migration v2 (customer phone uniqueness, synced_at)");
    Ok(())
}

/// Migration v3: `revision` on queue rows, bumped whenever a later edit is
/// merged into a row. A flush only deletes the revision it uploaded.
fn migrate_v3(conn: &Connection) -> Result<()> {
    if !column_exists(conn, "pending_operations", "revision")? {
        conn.execute_batch(
            "ALTER TABLE pending_operations ADD COLUMN revision INTEGER NOT NULL DEFAULT 0;",
        )?;
    }
    conn.execute_batch("INSERT INTO schema_version (version) VALUES (3);")
        .map_err(|e| {
            error!("Migration v3 failed: {e}");
            Error::Database(e)
        })?;

    info!("Applied migration v3 (queue row revisions)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )?;
    Ok(())
}

/// Remove a single setting. Missing keys are not an error.
pub fn delete_setting(conn: &Connection, category: &str, key: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
    )?;
    Ok(())
}

/// Get all settings grouped by category as JSON.
///
/// The `otp` and `auth` categories hold hashes and session data and are
/// left out.
pub fn get_all_settings(conn: &Connection) -> serde_json::Value {
    let mut stmt = match conn.prepare(
        "SELECT setting_category, setting_key, setting_value FROM local_settings
         WHERE setting_category NOT IN ('otp', 'auth')
         ORDER BY setting_category, setting_key",
    ) {
        Ok(s) => s,
        Err(e) => {
            error!("get_all_settings prepare: {e}");
            return serde_json::json!({});
        }
    };

    let mut result = serde_json::Map::new();

    let rows = match stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    }) {
        Ok(r) => r,
        Err(e) => {
            error!("get_all_settings query: {e}");
            return serde_json::json!({});
        }
    };

    for (cat, key, val) in rows.flatten() {
        let category = result.entry(cat).or_insert_with(|| serde_json::json!({}));
        if let serde_json::Value::Object(ref mut map) = category {
            map.insert(key, serde_json::Value::String(val));
        }
    }

    serde_json::Value::Object(result)
}

/// Delete all settings in a category.
pub fn delete_all_settings(conn: &Connection, category: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1",
        params![category],
    )?;
    Ok(())
}

/// Row counts per table, for diagnostics.
pub fn table_counts(conn: &Connection) -> serde_json::Value {
    let mut counts = serde_json::Map::new();
    for table in [
        "profiles",
        "customers",
        "transaction_entries",
        "pending_operations",
        "local_settings",
    ] {
        let n: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .unwrap_or(0);
        counts.insert(table.to_string(), serde_json::json!(n));
    }
    serde_json::Value::Object(counts)
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

// ===========================================================================
// Tests
// ===========================================================================
