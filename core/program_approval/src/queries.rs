//! # Queries and Remarks
//!
//! Finance raises queries against a program, a program assistant answers
//! them, and finance resolves them. Raising forces the program to `query`
//! and answering forces it to `query_answered`; each pair of writes shares one
//! transaction with the program's version compare-and-set, so a pending query
//! never exists on a program that is not in `query`. Resolving touches only
//! the query.
//!
//! Remarks are free-text annotations, append-only.

use sqlx::SqlitePool;
use tracing::info;

use crate::errors::{ApprovalError, Result};
use crate::rbac::Operation;
use crate::storage;
use crate::types::{now_millis, Actor, Query, QueryStatus, Remark, TransitionKind};
use crate::workflow::{authorize, check_expected_version, commit_status, required_text};

const QUERY_COLUMNS: &str = "id, program_id, query_text, created_by, created_at, status, \
                             answer_text, answered_by, answered_at, resolved_by, resolved_at";

// ─────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────

pub async fn fetch_query(pool: &SqlitePool, query_id: i64) -> Result<Option<Query>> {
    let row = sqlx::query_as::<_, Query>(&format!(
        "SELECT {QUERY_COLUMNS} FROM queries WHERE id = ?1"
    ))
    .bind(query_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn load_query(pool: &SqlitePool, query_id: i64) -> Result<Query> {
    fetch_query(pool, query_id)
        .await?
        .ok_or_else(|| ApprovalError::not_found("query", query_id))
}

/// Queries on a program, oldest first.
pub async fn list_queries(pool: &SqlitePool, program_id: i64) -> Result<Vec<Query>> {
    let rows = sqlx::query_as::<_, Query>(&format!(
        "SELECT {QUERY_COLUMNS} FROM queries WHERE program_id = ?1 ORDER BY id ASC"
    ))
    .bind(program_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn count_pending(pool: &SqlitePool, program_id: i64) -> Result<i64> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM queries WHERE program_id = ?1 AND status = ?2")
            .bind(program_id)
            .bind(QueryStatus::Pending)
            .fetch_one(pool)
            .await?;
    Ok(count)
}

/// Remarks on a program, oldest first.
pub async fn list_remarks(pool: &SqlitePool, program_id: i64) -> Result<Vec<Remark>> {
    let rows = sqlx::query_as::<_, Remark>(
        r#"
        SELECT id, program_id, remark, author_id, author_name, author_role, created_at
        FROM   remarks
        WHERE  program_id = ?1
        ORDER  BY id ASC
        "#,
    )
    .bind(program_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Query lifecycle
// ─────────────────────────────────────────────────────────

/// Create a pending query and move the program to `query`, atomically.
pub(crate) async fn raise_query(
    pool: &SqlitePool,
    actor: &Actor,
    program_id: i64,
    text: Option<&str>,
    expected_version: Option<i64>,
) -> Result<Query> {
    let program = storage::load_program(pool, program_id).await?;
    check_expected_version(&program, expected_version)?;
    authorize(actor, Operation::Transition(TransitionKind::RaiseQuery), &program)?;
    let text = required_text(text, "query text")?;

    let now = now_millis();
    let mut tx = pool.begin().await?;
    let to = commit_status(&mut tx, &program, TransitionKind::RaiseQuery, actor, now).await?;
    let query_id = sqlx::query(
        r#"
        INSERT INTO queries (program_id, query_text, created_by, created_at, status)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(program_id)
    .bind(&text)
    .bind(actor.id)
    .bind(now)
    .bind(QueryStatus::Pending)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();
    tx.commit().await?;

    info!(
        "Query {query_id} raised on program {program_id} by actor {}; {} -> {to}",
        actor.id, program.status
    );
    load_query(pool, query_id).await
}

/// Answer a pending query and move the program to `query_answered`, atomically.
pub(crate) async fn answer_query(
    pool: &SqlitePool,
    actor: &Actor,
    query_id: i64,
    text: Option<&str>,
    expected_version: Option<i64>,
) -> Result<Query> {
    let query = load_query(pool, query_id).await?;
    let program = storage::load_program(pool, query.program_id).await?;
    check_expected_version(&program, expected_version)?;
    authorize(actor, Operation::Transition(TransitionKind::AnswerQuery), &program)?;
    if query.status != QueryStatus::Pending {
        return Err(ApprovalError::PreconditionFailed(format!(
            "query {query_id} is not pending"
        )));
    }
    let text = required_text(text, "answer text")?;

    let now = now_millis();
    let mut tx = pool.begin().await?;
    let affected = sqlx::query(
        r#"
        UPDATE queries
        SET    status = ?1, answer_text = ?2, answered_by = ?3, answered_at = ?4
        WHERE  id = ?5 AND status = ?6
        "#,
    )
    .bind(QueryStatus::Answered)
    .bind(&text)
    .bind(actor.id)
    .bind(now)
    .bind(query_id)
    .bind(QueryStatus::Pending)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if affected == 0 {
        return Err(ApprovalError::ConflictingTransition {
            program_id: program.id,
        });
    }
    let to = commit_status(&mut tx, &program, TransitionKind::AnswerQuery, actor, now).await?;
    tx.commit().await?;

    info!(
        "Query {query_id} answered by actor {}; program {} {} -> {to}",
        actor.id, program.id, program.status
    );
    load_query(pool, query_id).await
}

/// Mark an answered query resolved. The program status is untouched.
pub(crate) async fn resolve_query(pool: &SqlitePool, actor: &Actor, query_id: i64) -> Result<Query> {
    let query = load_query(pool, query_id).await?;
    let program = storage::load_program(pool, query.program_id).await?;
    authorize(actor, Operation::Transition(TransitionKind::ResolveQuery), &program)?;
    if query.status != QueryStatus::Answered {
        return Err(ApprovalError::PreconditionFailed(format!(
            "query {query_id} must be answered before it is resolved"
        )));
    }

    let affected = sqlx::query(
        r#"
        UPDATE queries
        SET    status = ?1, resolved_by = ?2, resolved_at = ?3
        WHERE  id = ?4 AND status = ?5
        "#,
    )
    .bind(QueryStatus::Resolved)
    .bind(actor.id)
    .bind(now_millis())
    .bind(query_id)
    .bind(QueryStatus::Answered)
    .execute(pool)
    .await?
    .rows_affected();
    if affected == 0 {
        return Err(ApprovalError::ConflictingTransition {
            program_id: program.id,
        });
    }

    info!("Query {query_id} resolved by actor {}", actor.id);
    load_query(pool, query_id).await
}

// ─────────────────────────────────────────────────────────
// Remarks
// ─────────────────────────────────────────────────────────

pub(crate) async fn add_remark(
    pool: &SqlitePool,
    actor: &Actor,
    program_id: i64,
    text: &str,
) -> Result<Remark> {
    let program = storage::load_program(pool, program_id).await?;
    authorize(actor, Operation::AddRemark, &program)?;
    let text = required_text(Some(text), "remark")?;

    let id = sqlx::query(
        r#"
        INSERT INTO remarks (program_id, remark, author_id, author_name, author_role, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(program_id)
    .bind(&text)
    .bind(actor.id)
    .bind(&actor.name)
    .bind(actor.role)
    .bind(now_millis())
    .execute(pool)
    .await?
    .last_insert_rowid();

    info!("Remark {id} added to program {program_id} by actor {}", actor.id);
    let remark = sqlx::query_as::<_, Remark>(
        r#"
        SELECT id, program_id, remark, author_id, author_name, author_role, created_at
        FROM   remarks
        WHERE  id = ?1
        "#,
    )
    .bind(id)
    .fetch_one(pool)
    .await?;
    Ok(remark)
}
