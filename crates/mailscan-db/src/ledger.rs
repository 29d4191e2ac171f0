//! Credit ledger: append-only transactions and the derived balance.
//!
//! Rows are immutable once written. The ledger itself does not enforce a
//! non-negative balance; the overdraft gate for scan debits lives in the
//! orchestrator's batch commit, which re-checks inside the same
//! transaction (`scan_logs::commit_batch`).

use crate::error::{DatabaseError, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::fmt;
use std::str::FromStr;

/// Category of a ledger entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Debit for classification work consumed by a scan.
    ScanUsage,
    /// External purchase credit.
    Purchase,
    /// Promotional/signup credit.
    Bonus,
    /// Refund credit.
    Refund,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ScanUsage => "scan_usage",
            Self::Purchase => "purchase",
            Self::Bonus => "bonus",
            Self::Refund => "refund",
        };
        f.write_str(s)
    }
}

impl FromStr for TransactionKind {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scan_usage" => Ok(Self::ScanUsage),
            "purchase" => Ok(Self::Purchase),
            "bonus" => Ok(Self::Bonus),
            "refund" => Ok(Self::Refund),
            other => Err(DatabaseError::Decode(format!(
                "invalid transaction kind '{other}'"
            ))),
        }
    }
}

/// An immutable ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Unique transaction id.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Signed amount; negative is a debit.
    pub amount: i64,
    /// Entry category.
    pub kind: TransactionKind,
    /// Correlated scan or external payment id.
    pub reference_id: Option<String>,
    /// Human-readable detail.
    pub description: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
}

/// Fields for appending a ledger entry.
#[derive(Debug)]
pub struct NewTransaction<'a> {
    /// Owning user.
    pub user_id: &'a str,
    /// Signed amount; negative is a debit.
    pub amount: i64,
    /// Entry category.
    pub kind: TransactionKind,
    /// Correlated scan or external payment id.
    pub reference_id: Option<&'a str>,
    /// Human-readable detail.
    pub description: Option<&'a str>,
}

/// Append a transaction to the ledger.
pub async fn insert(pool: &SqlitePool, new: NewTransaction<'_>) -> Result<String> {
    let id = uuid::Uuid::new_v4().to_string();

    sqlx::query(
        "INSERT INTO credit_transactions (id, user_id, amount, kind, reference_id, description) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(new.user_id)
    .bind(new.amount)
    .bind(new.kind.to_string())
    .bind(new.reference_id)
    .bind(new.description)
    .execute(pool)
    .await?;

    Ok(id)
}

/// Derived balance: SUM of all amounts for the user.
///
/// A user with no transactions has balance 0; absence is never an error.
pub async fn balance(pool: &SqlitePool, user_id: &str) -> Result<i64> {
    let sum: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM credit_transactions WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(sum)
}

/// Transaction history for a user, newest first.
pub async fn history(pool: &SqlitePool, user_id: &str) -> Result<Vec<CreditTransaction>> {
    let rows: Vec<(String, String, i64, String, Option<String>, Option<String>, String)> =
        sqlx::query_as(
            "SELECT id, user_id, amount, kind, reference_id, description, created_at \
             FROM credit_transactions WHERE user_id = ? \
             ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

    rows.into_iter()
        .map(
            |(id, user_id, amount, kind, reference_id, description, created_at)| {
                Ok(CreditTransaction {
                    id,
                    user_id,
                    amount,
                    kind: kind.parse()?,
                    reference_id,
                    description,
                    created_at,
                })
            },
        )
        .collect()
}
