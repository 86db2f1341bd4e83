//! # Payment Ledger
//!
//! One append-only payment row per program, written in the same transaction
//! as the program's move to `approved`. Rows are never updated. The writer is
//! crate-private: only the `final-approve` transition records payments.

use sqlx::{SqliteConnection, SqlitePool};

use crate::errors::{is_unique_violation, ApprovalError, Result};
use crate::types::PaymentRecord;

/// Append the payment for `program_id`. A second payment for the same
/// program is rejected by the `UNIQUE` constraint and reported as
/// [`ApprovalError::PreconditionFailed`].
pub(crate) async fn record_payment(
    conn: &mut SqliteConnection,
    program_id: i64,
    voucher_number: &str,
    eft_number: &str,
    recorded_by: i64,
    now: i64,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO payments (program_id, voucher_number, eft_number, recorded_by, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(program_id)
    .bind(voucher_number)
    .bind(eft_number)
    .bind(recorded_by)
    .bind(now)
    .execute(&mut *conn)
    .await;

    match result {
        Ok(done) => Ok(done.last_insert_rowid()),
        Err(e) if is_unique_violation(&e) => Err(ApprovalError::PreconditionFailed(format!(
            "payment for program {program_id} is already recorded"
        ))),
        Err(e) => Err(e.into()),
    }
}

pub async fn payment_for(pool: &SqlitePool, program_id: i64) -> Result<Option<PaymentRecord>> {
    let row = sqlx::query_as::<_, PaymentRecord>(
        r#"
        SELECT id, program_id, voucher_number, eft_number, recorded_by, created_at
        FROM   payments
        WHERE  program_id = ?1
        "#,
    )
    .bind(program_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

#[cfg(test)]
pub async fn count_payments(pool: &SqlitePool, program_id: i64) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM payments WHERE program_id = ?1")
        .bind(program_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}
