//! # Storage
//!
//! Database layer: pool construction, migrations, and typed helpers over the
//! program tables.
//!
//! | Table               | Written by                              |
//! |---------------------|-----------------------------------------|
//! | `programs`          | create / edit / delete / every transition |
//! | `status_changes`    | every committed status change           |
//! | `approval_requests` | `submit-to-finance`                     |
//!
//! Every write that changes a program goes through a compare-and-set on the
//! `version` column, executed as the first statement of its transaction so
//! SQLite takes the write lock before anything is read. Zero affected rows
//! means another writer committed first.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::documents;
use crate::errors::{ApprovalError, Result};
use crate::types::{
    ApprovalRequest, NewProgram, Program, ProgramChanges, ProgramStatus, StatusChange,
    TransitionKind,
};

/// Pool sizing and the bound on how long a persistence call may block.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub max_connections: u32,
    /// Pool acquire timeout and SQLite busy timeout. Exceeding it surfaces
    /// as [`ApprovalError::StorageUnavailable`].
    pub timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str, options: &StoreOptions) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };
    let in_memory = url.contains(":memory:");

    let connect = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(options.timeout);

    let mut pool_options = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .acquire_timeout(options.timeout);
    if in_memory {
        // Each in-memory connection is its own database; keep exactly one alive.
        pool_options = pool_options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }

    let pool = pool_options.connect_with(connect).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Program reads
// ─────────────────────────────────────────────────────────

const PROGRAM_COLUMNS: &str = "id, name, recipient_name, budget_minor, exco_reference, status, \
                               version, created_by, updated_by, created_at, updated_at";

/// Fetch a program row without its documents.
pub async fn fetch_program_row(pool: &SqlitePool, id: i64) -> Result<Option<Program>> {
    let row = sqlx::query_as::<_, Program>(&format!(
        "SELECT {PROGRAM_COLUMNS} FROM programs WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Fetch a program with its current document metadata.
pub async fn fetch_program(pool: &SqlitePool, id: i64) -> Result<Option<Program>> {
    let Some(mut program) = fetch_program_row(pool, id).await? else {
        return Ok(None);
    };
    program.documents = documents::list_slots(pool, id).await?;
    Ok(Some(program))
}

/// Like [`fetch_program`], but a missing program is [`ApprovalError::NotFound`].
pub async fn load_program(pool: &SqlitePool, id: i64) -> Result<Program> {
    fetch_program(pool, id)
        .await?
        .ok_or_else(|| ApprovalError::not_found("program", id))
}

/// List programs newest first, optionally restricted to one creator.
pub async fn list_programs(pool: &SqlitePool, created_by: Option<i64>) -> Result<Vec<Program>> {
    let mut programs = match created_by {
        Some(owner) => {
            sqlx::query_as::<_, Program>(&format!(
                "SELECT {PROGRAM_COLUMNS} FROM programs WHERE created_by = ?1 ORDER BY id DESC"
            ))
            .bind(owner)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, Program>(&format!(
                "SELECT {PROGRAM_COLUMNS} FROM programs ORDER BY id DESC"
            ))
            .fetch_all(pool)
            .await?
        }
    };
    for program in &mut programs {
        program.documents = documents::list_slots(pool, program.id).await?;
    }
    Ok(programs)
}

// ─────────────────────────────────────────────────────────
// Program writes
// ─────────────────────────────────────────────────────────

pub async fn insert_program(
    conn: &mut SqliteConnection,
    fields: &NewProgram,
    created_by: i64,
    now: i64,
) -> Result<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO programs
            (name, recipient_name, budget_minor, exco_reference, status, version,
             created_by, updated_by, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, NULL, ?7, ?7)
        "#,
    )
    .bind(&fields.name)
    .bind(&fields.recipient_name)
    .bind(fields.budget)
    .bind(&fields.exco_reference)
    .bind(ProgramStatus::Draft)
    .bind(created_by)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// Move `program` to `to` if nobody changed it since it was read.
pub async fn update_status_cas(
    conn: &mut SqliteConnection,
    program: &Program,
    to: ProgramStatus,
    now: i64,
) -> Result<()> {
    let affected = sqlx::query(
        r#"
        UPDATE programs
        SET    status = ?1, version = version + 1, updated_at = ?2
        WHERE  id = ?3 AND version = ?4
        "#,
    )
    .bind(to)
    .bind(now)
    .bind(program.id)
    .bind(program.version)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if affected == 0 {
        return Err(ApprovalError::ConflictingTransition {
            program_id: program.id,
        });
    }
    Ok(())
}

/// Apply field changes if nobody changed the program since it was read.
/// Always bumps the version, even when only documents change.
pub async fn update_fields_cas(
    conn: &mut SqliteConnection,
    program: &Program,
    changes: &ProgramChanges,
    updated_by: i64,
    now: i64,
) -> Result<()> {
    let (set_exco, exco) = match &changes.exco_reference {
        Some(value) => (true, value.clone()),
        None => (false, None),
    };
    let affected = sqlx::query(
        r#"
        UPDATE programs
        SET    name           = COALESCE(?1, name),
               recipient_name = COALESCE(?2, recipient_name),
               budget_minor   = COALESCE(?3, budget_minor),
               exco_reference = CASE WHEN ?4 THEN ?5 ELSE exco_reference END,
               updated_by     = ?6,
               updated_at     = ?7,
               version        = version + 1
        WHERE  id = ?8 AND version = ?9
        "#,
    )
    .bind(&changes.name)
    .bind(&changes.recipient_name)
    .bind(changes.budget)
    .bind(set_exco)
    .bind(exco)
    .bind(updated_by)
    .bind(now)
    .bind(program.id)
    .bind(program.version)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if affected == 0 {
        return Err(ApprovalError::ConflictingTransition {
            program_id: program.id,
        });
    }
    Ok(())
}

/// Remove a program; dependent rows go with it through `ON DELETE CASCADE`.
/// Assert `program` is still at the observed version without bumping it.
///
/// Takes the write lock for the rest of the transaction, so a concurrent
/// status change either lands before (and this fails) or after commit.
pub async fn pin_version(conn: &mut SqliteConnection, program: &Program) -> Result<()> {
    let affected = sqlx::query("UPDATE programs SET version = version WHERE id = ?1 AND version = ?2")
        .bind(program.id)
        .bind(program.version)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    if affected == 0 {
        return Err(ApprovalError::ConflictingTransition {
            program_id: program.id,
        });
    }
    Ok(())
}

pub async fn delete_program_cas(conn: &mut SqliteConnection, program: &Program) -> Result<()> {
    let affected = sqlx::query("DELETE FROM programs WHERE id = ?1 AND version = ?2")
        .bind(program.id)
        .bind(program.version)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    if affected == 0 {
        return Err(ApprovalError::ConflictingTransition {
            program_id: program.id,
        });
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Audit trail
// ─────────────────────────────────────────────────────────

pub async fn insert_status_change(
    conn: &mut SqliteConnection,
    program_id: i64,
    from: ProgramStatus,
    to: ProgramStatus,
    transition: TransitionKind,
    actor_id: i64,
    now: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO status_changes
            (program_id, from_status, to_status, transition, actor_id, changed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(program_id)
    .bind(from)
    .bind(to)
    .bind(transition)
    .bind(actor_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Status walk of a program, oldest first.
pub async fn list_status_changes(pool: &SqlitePool, program_id: i64) -> Result<Vec<StatusChange>> {
    let rows = sqlx::query_as::<_, StatusChange>(
        r#"
        SELECT id, program_id, from_status, to_status, transition, actor_id, changed_at
        FROM   status_changes
        WHERE  program_id = ?1
        ORDER  BY id ASC
        "#,
    )
    .bind(program_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn insert_approval_request(
    conn: &mut SqliteConnection,
    program_id: i64,
    requested_by: i64,
    now: i64,
) -> Result<i64> {
    let id = sqlx::query(
        "INSERT INTO approval_requests (program_id, requested_by, requested_at) VALUES (?1, ?2, ?3)",
    )
    .bind(program_id)
    .bind(requested_by)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn list_approval_requests(
    pool: &SqlitePool,
    program_id: i64,
) -> Result<Vec<ApprovalRequest>> {
    let rows = sqlx::query_as::<_, ApprovalRequest>(
        r#"
        SELECT id, program_id, requested_by, requested_at
        FROM   approval_requests
        WHERE  program_id = ?1
        ORDER  BY id ASC
        "#,
    )
    .bind(program_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
