//! Ledger Store: one integer credit balance per identity.
//!
//! Every mutation is a single SQL statement, so each call is atomic on its
//! own. Cross-call atomicity (check-then-debit) is provided by
//! [`LedgerStore::try_debit`], which folds the sufficiency check into the
//! `UPDATE` itself.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};

use crate::{domain::UserId, errors::Error, Result};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create the account with balance 0 if missing. Returns `true` if a row was created.
    async fn ensure_account(&self, user_id: UserId) -> Result<bool>;

    /// Current balance; 0 for an identity with no account.
    async fn balance(&self, user_id: UserId) -> Result<i64>;

    async fn exists(&self, user_id: UserId) -> Result<bool>;

    /// Add `amount` credits and return the new balance. `None` (and no
    /// change) for unknown identities.
    async fn credit(&self, user_id: UserId, amount: i64) -> Result<Option<i64>>;

    /// Subtract `amount` credits without a sufficiency check. Silently a no-op
    /// for unknown identities.
    async fn debit(&self, user_id: UserId, amount: i64) -> Result<()>;

    /// Subtract `amount` only if the balance covers it. Returns the balance
    /// after the debit, or `None` if nothing was debited.
    async fn try_debit(&self, user_id: UserId, amount: i64) -> Result<Option<i64>>;
}

#[derive(Clone, Debug)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open (creating if needed) the database at `url` and apply migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(opts).await?;
        Self::from_pool(pool).await
    }

    /// Single-connection in-memory database (each connection would otherwise
    /// see its own empty database).
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn positive(amount: i64) -> Result<i64> {
    if amount > 0 {
        Ok(amount)
    } else {
        Err(Error::InvalidAmount(amount))
    }
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn ensure_account(&self, user_id: UserId) -> Result<bool> {
        let res = sqlx::query("INSERT INTO accounts (identity) VALUES (?) ON CONFLICT(identity) DO NOTHING")
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn balance(&self, user_id: UserId) -> Result<i64> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT balance FROM accounts WHERE identity = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(b,)| b).unwrap_or(0))
    }

    async fn exists(&self, user_id: UserId) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM accounts WHERE identity = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn credit(&self, user_id: UserId, amount: i64) -> Result<Option<i64>> {
        let amount = positive(amount)?;
        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE accounts SET balance = balance + ? WHERE identity = ? RETURNING balance",
        )
        .bind(amount)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(b,)| b))
    }

    async fn debit(&self, user_id: UserId, amount: i64) -> Result<()> {
        let amount = positive(amount)?;
        sqlx::query("UPDATE accounts SET balance = balance - ? WHERE identity = ?")
            .bind(amount)
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn try_debit(&self, user_id: UserId, amount: i64) -> Result<Option<i64>> {
        let amount = positive(amount)?;
        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE accounts SET balance = balance - ?1 WHERE identity = ?2 AND balance >= ?1 RETURNING balance",
        )
        .bind(amount)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(b,)| b))
    }
}
