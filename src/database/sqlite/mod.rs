use libsqlite3_sys::{SQLITE_OK, sqlite3, sqlite3_api_routines};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::ffi::{c_char, c_int};
use std::path::Path;
use tracing::{debug, info};

use crate::config::BUNDLED_VECTOR_EXTENSION;
use crate::{RagError, Result};

#[cfg(test)]
mod tests;

pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

/// Real signature of a SQLite extension entry point
type ExtensionInit =
    unsafe extern "C" fn(*mut sqlite3, *mut *mut c_char, *const sqlite3_api_routines) -> c_int;

/// Register the linked sqlite-vec functions and `vec0` module on one connection
async fn register_bundled_vec(
    conn: &mut SqliteConnection,
) -> std::result::Result<(), sqlx::Error> {
    let mut handle = conn.lock_handle().await?;
    let db = handle.as_raw_handle().as_ptr();

    // SAFETY: the sqlite-vec crate declares its entry point without parameters;
    // the C function has the `ExtensionInit` signature. `db` stays valid and
    // exclusively locked for the duration of the call.
    let rc = unsafe {
        let init: ExtensionInit =
            std::mem::transmute(sqlite_vec::sqlite3_vec_init as *const ());
        init(db, std::ptr::null_mut(), std::ptr::null())
    };

    if rc != SQLITE_OK {
        return Err(sqlx::Error::Configuration(
            format!("sqlite-vec initialization failed with code {}", rc).into(),
        ));
    }
    Ok(())
}

/// File name of the store inside the application base directory
pub const STORE_FILE_NAME: &str = "store.db";

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
    vector_extension: Option<String>,
}

impl Database {
    /// Open (creating if missing) a store without any loadable extension
    #[inline]
    pub async fn new<P: AsRef<Path>>(path: P, max_connections: u32) -> Result<Self> {
        Self::open(path.as_ref(), max_connections, None).await
    }

    /// Open a store whose connections all load the given SQLite extension.
    ///
    /// [`BUNDLED_VECTOR_EXTENSION`] registers the statically linked sqlite-vec
    /// on each connection; anything else is loaded as an extension file.
    /// Fails if the extension cannot be loaded.
    #[inline]
    pub async fn with_vector_extension<P: AsRef<Path>>(
        path: P,
        max_connections: u32,
        extension: &str,
    ) -> Result<Self> {
        Self::open(path.as_ref(), max_connections, Some(extension)).await
    }

    async fn open(path: &Path, max_connections: u32, extension: Option<&str>) -> Result<Self> {
        let mut options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections.max(1));
        match extension {
            Some(BUNDLED_VECTOR_EXTENSION) => {
                pool_options = pool_options
                    .after_connect(|conn, _meta| Box::pin(register_bundled_vec(conn)));
            }
            Some(extension) => options = options.extension(extension.to_string()),
            None => {}
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| {
                RagError::Storage(format!(
                    "Failed to open store at {}: {}",
                    path.display(),
                    e
                ))
            })?;

        let database = Self {
            pool,
            vector_extension: extension.map(str::to_string),
        };
        if let Err(e) = database.run_migrations().await {
            database.close().await;
            return Err(e);
        }

        Ok(database)
    }

    /// Open `store.db` inside `base_dir`, creating the directory if needed
    #[inline]
    pub async fn initialize_from_base_dir(
        base_dir: &Path,
        max_connections: u32,
        extension: Option<&str>,
    ) -> Result<Self> {
        std::fs::create_dir_all(base_dir).map_err(|e| {
            RagError::Storage(format!(
                "Failed to create base directory {}: {}",
                base_dir.display(),
                e
            ))
        })?;

        Self::open(&base_dir.join(STORE_FILE_NAME), max_connections, extension).await
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Name of the loadable extension every connection was opened with, if any
    #[inline]
    pub fn vector_extension(&self) -> Option<&str> {
        self.vector_extension.as_deref()
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    /// Optimize database performance by running VACUUM and ANALYZE
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        info!("Optimizing database performance");

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(|e| RagError::Storage(format!("Failed to vacuum database: {}", e)))?;

        sqlx::query("ANALYZE")
            .execute(&self.pool)
            .await
            .map_err(|e| RagError::Storage(format!("Failed to analyze database: {}", e)))?;

        debug!("Database optimization completed");
        Ok(())
    }

    /// Close every pooled connection; waits for checked-out connections to return
    #[inline]
    pub async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            debug!("Closed database connection pool");
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}
