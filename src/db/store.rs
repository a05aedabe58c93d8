//! SQLite store backing the user and product endpoints.
//!
//! Every query is a static SQL string with bound parameters; nothing is
//! assembled from request text. The store keeps one connection open for
//! its whole life so an in-memory database outlives idle pool periods.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, FromRow};

use crate::config::DatabaseConfig;
use crate::db::pool::ManageConnection;
use crate::db::DbError;

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        username      TEXT NOT NULL,
        email         TEXT NOT NULL COLLATE NOCASE,
        password_hash TEXT NOT NULL,
        created_at    TEXT NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS users_email_key ON users (email)",
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        name        TEXT NOT NULL,
        description TEXT NOT NULL,
        price       REAL NOT NULL,
        stock       INTEGER NOT NULL
    )
    "#,
];

const DEMO_PRODUCTS: [(&str, &str, f64, i64); 3] = [
    ("Laptop", "Portátil de 14 pulgadas", 999.99, 12),
    ("Teclado", "Teclado mecánico", 79.5, 40),
    ("Monitor", "Monitor 27 pulgadas", 249.0, 8),
];

/// A row of the `users` table.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Parameters for inserting a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// A row of the `products` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub stock: i64,
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DbError::UniqueViolation("users_email_key")
            }
            other => DbError::Query(other.to_string()),
        }
    }
}

/// A migrated database and the options to reach it.
pub struct Store {
    options: SqliteConnectOptions,
    _keepalive: Mutex<SqliteConnection>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("filename", &self.options.clone().get_filename())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open the database at `config.url`, create the schema, and seed the
    /// demo catalogue when enabled and the table is empty.
    pub async fn open(config: &DatabaseConfig) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| DbError::Connect(e.to_string()))?
            .create_if_missing(true);

        let mut conn = options
            .connect()
            .await
            .map_err(|e| DbError::Connect(e.to_string()))?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut conn).await?;
        }
        if config.seed_demo_data {
            seed_demo_products(&mut conn).await?;
        }

        tracing::debug!(url = %config.url, "Store ready");
        Ok(Self {
            options,
            _keepalive: Mutex::new(conn),
        })
    }

    /// Open a fresh connection outside the pool.
    pub async fn connect(&self) -> Result<StoreConnection, DbError> {
        let conn = self
            .options
            .connect()
            .await
            .map_err(|e| DbError::Connect(e.to_string()))?;

        let id = CONNECTION_IDS.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(connection_id = id, "Opened store connection");
        Ok(StoreConnection { id, conn })
    }
}

async fn seed_demo_products(conn: &mut SqliteConnection) -> Result<(), DbError> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
        .fetch_one(&mut *conn)
        .await?;
    if existing > 0 {
        return Ok(());
    }

    for (name, description, price, stock) in DEMO_PRODUCTS {
        sqlx::query("INSERT INTO products (name, description, price, stock) VALUES (?, ?, ?, ?)")
            .bind(name)
            .bind(description)
            .bind(price)
            .bind(stock)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

static CONNECTION_IDS: AtomicU64 = AtomicU64::new(1);

/// One connection to the store.
pub struct StoreConnection {
    id: u64,
    conn: SqliteConnection,
}

impl std::fmt::Debug for StoreConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConnection").field("id", &self.id).finish()
    }
}

impl StoreConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn list_users(&mut self) -> Result<Vec<UserRecord>, DbError> {
        let users = sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, email, password_hash, created_at FROM users ORDER BY id",
        )
        .fetch_all(&mut self.conn)
        .await?;
        Ok(users)
    }

    /// Case-insensitive lookup; the column collates with `NOCASE`.
    pub async fn find_user_by_email(&mut self, email: &str) -> Result<Option<UserRecord>, DbError> {
        let user = sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&mut self.conn)
        .await?;
        Ok(user)
    }

    pub async fn insert_user(&mut self, user: NewUser) -> Result<UserRecord, DbError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (username, email, password_hash, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id, username, email, password_hash, created_at
            "#,
        )
        .bind(user.username)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(Utc::now())
        .fetch_one(&mut self.conn)
        .await?;
        Ok(record)
    }

    pub async fn list_products(&mut self) -> Result<Vec<Product>, DbError> {
        let products = sqlx::query_as::<_, Product>(
            "SELECT id, name, description, price, stock FROM products ORDER BY id",
        )
        .fetch_all(&mut self.conn)
        .await?;
        Ok(products)
    }
}

/// Opens [`StoreConnection`]s for the pool.
#[derive(Debug, Clone)]
pub struct StoreManager {
    store: Arc<Store>,
}

impl StoreManager {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

impl ManageConnection for StoreManager {
    type Connection = StoreConnection;

    async fn connect(&self) -> Result<StoreConnection, DbError> {
        self.store.connect().await
    }
}
