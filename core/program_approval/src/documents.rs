//! # Document Store
//!
//! Holds the current file of every slot on a program, the finance-authored
//! signed counterparts, and an append-only history of every superseded
//! version.
//!
//! File bytes live in the content-addressed `blobs` table keyed by the
//! lowercase hex SHA-256 of the content; slots and history rows only carry
//! the hash, so identical uploads are stored once and a history row never
//! copies content.
//!
//! Overwriting a slot that already holds a file archives the previous
//! `(file name, content, uploaded-at)` into `document_history` inside the
//! same transaction before the slot is replaced. Nothing here deletes history.

use sha2::{Digest, Sha256};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::accounts;
use crate::errors::{ApprovalError, Result};
use crate::types::{DocumentHistoryRecord, DocumentSlot, DocumentSummary, SignedDocumentSet, SlotUpload, StoredFile};

/// Which set of slots an operation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shelf {
    /// Applicant-facing documents on the program itself.
    Original,
    /// Counter-signed documents uploaded by finance.
    Signed,
}

impl Shelf {
    fn table(&self) -> &'static str {
        match self {
            Self::Original => "program_documents",
            Self::Signed => "signed_documents",
        }
    }

    fn is_signed(&self) -> bool {
        matches!(self, Self::Signed)
    }
}

/// Reject uploads with no name or no content.
pub fn validate_upload(upload: &SlotUpload, shelf: Shelf) -> Result<()> {
    if upload.file.file_name.trim().is_empty() {
        return Err(ApprovalError::Validation(format!(
            "file name for {} must not be empty",
            upload.slot
        )));
    }
    if upload.file.content.is_empty() {
        return Err(ApprovalError::Validation(format!(
            "file for {} must not be empty",
            upload.slot
        )));
    }
    if shelf.is_signed() && !upload.slot.is_signable() {
        return Err(ApprovalError::Validation(format!(
            "{} has no signed counterpart",
            upload.slot
        )));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Blobs
// ─────────────────────────────────────────────────────────

pub fn content_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Store `content` once under its hash and return the hash.
pub async fn put_blob(conn: &mut SqliteConnection, content: &[u8], now: i64) -> Result<String> {
    let hash = content_hash(content);
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO blobs (content_hash, content, size_bytes, created_at)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(&hash)
    .bind(content)
    .bind(content.len() as i64)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(hash)
}

/// Delete every blob no slot, signed slot or history record points at.
pub async fn prune_orphan_blobs(conn: &mut SqliteConnection) -> Result<u64> {
    let removed = sqlx::query(
        r#"
        DELETE FROM blobs
        WHERE content_hash NOT IN (SELECT content_hash FROM program_documents)
          AND content_hash NOT IN (SELECT content_hash FROM signed_documents)
          AND content_hash NOT IN (SELECT content_hash FROM document_history)
        "#,
    )
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(removed)
}

// ─────────────────────────────────────────────────────────
// Slot writes
// ─────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct CurrentSlot {
    file_name: String,
    content_hash: String,
    uploaded_by: i64,
    uploaded_at: i64,
}

/// Write `upload` into its slot, archiving the previous file first.
///
/// `archive_as` tags the archived record; `None` keeps the uploader of the
/// superseded file. Returns the id of the history record, if one was written.
pub async fn put_slot(
    conn: &mut SqliteConnection,
    shelf: Shelf,
    program_id: i64,
    upload: &SlotUpload,
    uploaded_by: i64,
    archive_as: Option<i64>,
    now: i64,
) -> Result<Option<i64>> {
    let table = shelf.table();

    let current = sqlx::query_as::<_, CurrentSlot>(&format!(
        "SELECT file_name, content_hash, uploaded_by, uploaded_at FROM {table} \
         WHERE program_id = ?1 AND slot = ?2"
    ))
    .bind(program_id)
    .bind(upload.slot)
    .fetch_optional(&mut *conn)
    .await?;

    let archived = match current {
        Some(previous) => {
            let tagged = archive_as.unwrap_or(previous.uploaded_by);
            let uploader_name = accounts::display_name(conn, tagged).await?;
            let id = sqlx::query(
                r#"
                INSERT INTO document_history
                    (program_id, slot, signed, file_name, content_hash,
                     uploaded_by, uploader_name, uploaded_at, archived_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(program_id)
            .bind(upload.slot)
            .bind(shelf.is_signed())
            .bind(&previous.file_name)
            .bind(&previous.content_hash)
            .bind(tagged)
            .bind(&uploader_name)
            .bind(previous.uploaded_at)
            .bind(now)
            .execute(&mut *conn)
            .await?
            .last_insert_rowid();
            debug!(
                "Archived {} of program {program_id} as history {id}",
                upload.slot
            );
            Some(id)
        }
        None => None,
    };

    let hash = put_blob(conn, &upload.file.content, now).await?;
    sqlx::query(&format!(
        r#"
        INSERT INTO {table} (program_id, slot, file_name, content_hash, uploaded_by, uploaded_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT (program_id, slot) DO UPDATE SET
            file_name    = excluded.file_name,
            content_hash = excluded.content_hash,
            uploaded_by  = excluded.uploaded_by,
            uploaded_at  = excluded.uploaded_at
        "#
    ))
    .bind(program_id)
    .bind(upload.slot)
    .bind(&upload.file.file_name)
    .bind(&hash)
    .bind(uploaded_by)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(archived)
}

/// Create the signed set row if the program has none yet, otherwise touch it.
pub async fn upsert_signed_set(
    conn: &mut SqliteConnection,
    program_id: i64,
    actor_id: i64,
    now: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO signed_document_sets (program_id, created_by, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?3)
        ON CONFLICT (program_id) DO UPDATE SET updated_at = excluded.updated_at
        "#,
    )
    .bind(program_id)
    .bind(actor_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────

async fn list_shelf(pool: &SqlitePool, shelf: Shelf, program_id: i64) -> Result<Vec<DocumentSummary>> {
    let table = shelf.table();
    let rows = sqlx::query_as::<_, DocumentSummary>(&format!(
        r#"
        SELECT d.slot, d.file_name, d.content_hash, b.size_bytes, d.uploaded_by, d.uploaded_at
        FROM   {table} d
        JOIN   blobs b ON b.content_hash = d.content_hash
        WHERE  d.program_id = ?1
        ORDER  BY d.slot ASC
        "#
    ))
    .bind(program_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Metadata of every populated slot on the program.
pub async fn list_slots(pool: &SqlitePool, program_id: i64) -> Result<Vec<DocumentSummary>> {
    list_shelf(pool, Shelf::Original, program_id).await
}

/// Current file of a slot; `None` for an empty slot.
pub async fn get_slot(
    pool: &SqlitePool,
    shelf: Shelf,
    program_id: i64,
    slot: DocumentSlot,
) -> Result<Option<StoredFile>> {
    let table = shelf.table();
    let file = sqlx::query_as::<_, StoredFile>(&format!(
        r#"
        SELECT d.file_name, d.content_hash, b.content, d.uploaded_at
        FROM   {table} d
        JOIN   blobs b ON b.content_hash = d.content_hash
        WHERE  d.program_id = ?1 AND d.slot = ?2
        "#
    ))
    .bind(program_id)
    .bind(slot)
    .fetch_optional(pool)
    .await?;
    Ok(file)
}

/// Archived versions of a slot, newest first.
pub async fn get_history(
    pool: &SqlitePool,
    shelf: Shelf,
    program_id: i64,
    slot: DocumentSlot,
) -> Result<Vec<DocumentHistoryRecord>> {
    let rows = sqlx::query_as::<_, DocumentHistoryRecord>(
        r#"
        SELECT h.id, h.program_id, h.slot, h.signed, h.file_name, h.content_hash,
               b.size_bytes, h.uploaded_by, h.uploader_name, h.uploaded_at, h.archived_at
        FROM   document_history h
        JOIN   blobs b ON b.content_hash = h.content_hash
        WHERE  h.program_id = ?1 AND h.slot = ?2 AND h.signed = ?3
        ORDER  BY h.id DESC
        "#,
    )
    .bind(program_id)
    .bind(slot)
    .bind(shelf.is_signed())
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Content of one history record.
pub async fn get_history_entry(pool: &SqlitePool, history_id: i64) -> Result<Option<StoredFile>> {
    let file = sqlx::query_as::<_, StoredFile>(
        r#"
        SELECT h.file_name, h.content_hash, b.content, h.uploaded_at
        FROM   document_history h
        JOIN   blobs b ON b.content_hash = h.content_hash
        WHERE  h.id = ?1
        "#,
    )
    .bind(history_id)
    .fetch_optional(pool)
    .await?;
    Ok(file)
}

/// Program that owns a history record.
pub async fn history_program(pool: &SqlitePool, history_id: i64) -> Result<Option<i64>> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT program_id FROM document_history WHERE id = ?1")
        .bind(history_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(id,)| id))
}

pub async fn get_signed_set(pool: &SqlitePool, program_id: i64) -> Result<Option<SignedDocumentSet>> {
    let Some(mut set) = sqlx::query_as::<_, SignedDocumentSet>(
        r#"
        SELECT program_id, created_by, created_at, updated_at
        FROM   signed_document_sets
        WHERE  program_id = ?1
        "#,
    )
    .bind(program_id)
    .fetch_optional(pool)
    .await?
    else {
        return Ok(None);
    };
    set.documents = list_shelf(pool, Shelf::Signed, program_id).await?;
    Ok(Some(set))
}

/// Number of populated signed slots; zero when no set exists.
pub async fn count_signed_slots(pool: &SqlitePool, program_id: i64) -> Result<i64> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM signed_documents WHERE program_id = ?1")
            .bind(program_id)
            .fetch_one(pool)
            .await?;
    Ok(count)
}
