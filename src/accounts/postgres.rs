// PostgreSQL account store
//
// Direct queries through the deadpool connection pool

use super::{
    Account, AccountStore, ConsumeResetToken, NewAccount, ResetTokenRecord, SetResetToken,
    UpdateAccountPassword, UpdateAccountProfile, UpdateAccountRole,
};
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::error::SqlState;
use tokio_postgres::Row;

pub const ACCOUNTS_TABLE_DDL: &str = "CREATE TABLE IF NOT EXISTS accounts (
    id SERIAL PRIMARY KEY,
    email VARCHAR(255) UNIQUE NOT NULL,
    password_hash VARCHAR(255) NOT NULL,
    role VARCHAR(16) NOT NULL DEFAULT 'user'
        CHECK (role IN ('admin', 'lgst', 'vorstand', 'user')),
    display_name VARCHAR(255),
    reset_token_hash VARCHAR(64),
    reset_token_expires TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
    CHECK ((reset_token_hash IS NULL) = (reset_token_expires IS NULL))
)";

const ACCOUNT_COLUMNS: &str = "id, email, password_hash, role, display_name, \
     reset_token_hash, reset_token_expires, created_at, updated_at";

pub struct PostgresAccountStore {
    pool: Pool,
}

impl PostgresAccountStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, AppError> {
        Ok(self.pool.get().await?)
    }

    async fn query_account(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Option<Account>, AppError> {
        let client = self.client().await?;
        client
            .query_opt(sql, params)
            .await
            .map_err(map_write_error)?
            .map(|row| account_from_row(&row))
            .transpose()
    }
}

fn account_from_row(row: &Row) -> Result<Account, AppError> {
    let role: String = row.get("role");
    let token_hash: Option<String> = row.get("reset_token_hash");
    let token_expires: Option<DateTime<Utc>> = row.get("reset_token_expires");

    Ok(Account {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role: role.parse().map_err(AppError::Internal)?,
        display_name: row.get("display_name"),
        reset_token: token_hash
            .zip(token_expires)
            .map(|(token_hash, expires_at)| ResetTokenRecord { token_hash, expires_at }),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn map_write_error(e: tokio_postgres::Error) -> AppError {
    if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        AppError::Conflict("Email already registered".to_string())
    } else {
        AppError::Database(e)
    }
}

#[async_trait]
impl AccountStore for PostgresAccountStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AppError> {
        let sql = format!("SELECT {} FROM accounts WHERE email = $1", ACCOUNT_COLUMNS);
        self.query_account(&sql, &[&email]).await
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<Account>, AppError> {
        let sql = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        self.query_account(&sql, &[&id]).await
    }

    async fn list(&self) -> Result<Vec<Account>, AppError> {
        let client = self.client().await?;
        let sql = format!("SELECT {} FROM accounts ORDER BY id", ACCOUNT_COLUMNS);
        client
            .query(sql.as_str(), &[])
            .await?
            .iter()
            .map(account_from_row)
            .collect()
    }

    async fn create(&self, account: NewAccount) -> Result<Account, AppError> {
        let sql = format!(
            "INSERT INTO accounts (email, password_hash, role, display_name)
             VALUES ($1, $2, $3, $4)
             RETURNING {}",
            ACCOUNT_COLUMNS
        );
        self.query_account(
            &sql,
            &[
                &account.email,
                &account.password_hash,
                &account.role.as_str(),
                &account.display_name,
            ],
        )
        .await?
        .ok_or_else(|| AppError::Internal("INSERT returned no row".to_string()))
    }

    async fn update_role(&self, cmd: UpdateAccountRole) -> Result<Option<Account>, AppError> {
        let sql = format!(
            "UPDATE accounts SET role = $1, updated_at = NOW() WHERE id = $2 RETURNING {}",
            ACCOUNT_COLUMNS
        );
        self.query_account(&sql, &[&cmd.role.as_str(), &cmd.id]).await
    }

    async fn update_password(&self, cmd: UpdateAccountPassword) -> Result<Option<Account>, AppError> {
        let sql = format!(
            "UPDATE accounts
             SET password_hash = $1, reset_token_hash = NULL, reset_token_expires = NULL, updated_at = NOW()
             WHERE id = $2
             RETURNING {}",
            ACCOUNT_COLUMNS
        );
        self.query_account(&sql, &[&cmd.password_hash, &cmd.id]).await
    }

    async fn update_profile(&self, cmd: UpdateAccountProfile) -> Result<Option<Account>, AppError> {
        let sql = format!(
            "UPDATE accounts
             SET email = COALESCE($1, email), display_name = COALESCE($2, display_name), updated_at = NOW()
             WHERE id = $3
             RETURNING {}",
            ACCOUNT_COLUMNS
        );
        self.query_account(&sql, &[&cmd.email, &cmd.display_name, &cmd.id]).await
    }

    async fn set_reset_token(&self, cmd: SetResetToken) -> Result<(), AppError> {
        let client = self.client().await?;
        let updated = client
            .execute(
                "UPDATE accounts SET reset_token_hash = $1, reset_token_expires = $2, updated_at = NOW()
                 WHERE id = $3",
                &[&cmd.token.token_hash, &cmd.token.expires_at, &cmd.id],
            )
            .await?;

        if updated == 0 {
            return Err(AppError::NotFound("Account not found".to_string()));
        }
        Ok(())
    }

    async fn consume_reset_token(&self, cmd: ConsumeResetToken) -> Result<Option<Account>, AppError> {
        // Single statement: the row lock taken by UPDATE serializes concurrent consumers
        let sql = format!(
            "UPDATE accounts
             SET password_hash = $1, reset_token_hash = NULL, reset_token_expires = NULL, updated_at = NOW()
             WHERE reset_token_hash = $2 AND reset_token_expires > $3
             RETURNING {}",
            ACCOUNT_COLUMNS
        );
        self.query_account(&sql, &[&cmd.new_password_hash, &cmd.token_hash, &cmd.now])
            .await
    }

    async fn delete(&self, id: i32) -> Result<bool, AppError> {
        let client = self.client().await?;
        let deleted = client
            .execute("DELETE FROM accounts WHERE id = $1", &[&id])
            .await?;
        Ok(deleted > 0)
    }
}
