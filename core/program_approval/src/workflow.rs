//! # Approval Workflow
//!
//! The program state machine. Every mutation follows the same shape:
//!
//! 1. load the program (outside any transaction);
//! 2. reject a stale `expected_version` with `ConflictingTransition`;
//! 3. [`rbac::authorize`] the actor against the loaded status;
//! 4. check preconditions (signed documents, payment numbers, non-empty text);
//! 5. open a transaction whose first statement is the version compare-and-set,
//!    apply every coupled write, commit.
//!
//! A failure at any step leaves the database untouched: steps 1–4 write
//! nothing, and step 5 rolls back when the transaction is dropped uncommitted.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

use crate::documents::{self, Shelf};
use crate::errors::{ApprovalError, Result};
use crate::ledger;
use crate::queries;
use crate::rbac::{self, Decision, DenialReason, Operation, ProgramFacts};
use crate::storage;
use crate::types::{
    now_millis, Actor, NewProgram, Program, ProgramChanges, ProgramStatus, SignedDocumentSet,
    SlotUpload, TransitionKind, TransitionPayload,
};

// ─────────────────────────────────────────────────────────
// Shared guards
// ─────────────────────────────────────────────────────────

/// The actor acted on a version that is no longer current.
pub(crate) fn check_expected_version(program: &Program, expected: Option<i64>) -> Result<()> {
    match expected {
        Some(version) if version != program.version => {
            warn!(
                "Program {} is at version {}, actor expected {version}",
                program.id, program.version
            );
            Err(ApprovalError::ConflictingTransition {
                program_id: program.id,
            })
        }
        _ => Ok(()),
    }
}

/// Authorize, logging denials.
pub(crate) fn authorize(actor: &Actor, operation: Operation, program: &Program) -> Result<()> {
    let facts = ProgramFacts::from(program);
    match rbac::authorize(actor, operation, Some(&facts)) {
        Decision::Allowed => Ok(()),
        Decision::Denied(reason) => {
            warn!(
                "Denied {operation} on program {} for actor {}: {reason}",
                program.id, actor.id
            );
            Err(ApprovalError::PermissionDenied(reason.to_string()))
        }
    }
}

/// Trimmed, non-empty free text or `PreconditionFailed`.
pub(crate) fn required_text(text: Option<&str>, what: &str) -> Result<String> {
    match text.map(str::trim) {
        Some(t) if !t.is_empty() => Ok(t.to_string()),
        _ => Err(ApprovalError::PreconditionFailed(format!("{what} must not be empty"))),
    }
}

/// Move the program along `kind` inside the caller's transaction and
/// append the timeline entry. Returns the new status.
pub(crate) async fn commit_status(
    conn: &mut SqliteConnection,
    program: &Program,
    kind: TransitionKind,
    actor: &Actor,
    now: i64,
) -> Result<ProgramStatus> {
    let Some(to) = kind.target() else {
        return Ok(program.status);
    };
    if !program.status.can_transition_to(to) {
        return Err(ApprovalError::PreconditionFailed(format!(
            "program {} cannot move from {} to {to}",
            program.id, program.status
        )));
    }
    storage::update_status_cas(conn, program, to, now).await?;
    if to != program.status {
        storage::insert_status_change(conn, program.id, program.status, to, kind, actor.id, now)
            .await?;
    }
    Ok(to)
}

// ─────────────────────────────────────────────────────────
// Program lifecycle
// ─────────────────────────────────────────────────────────

fn required_field(value: &str, what: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApprovalError::Validation(format!("{what} is required")));
    }
    Ok(value.to_string())
}

fn optional_field(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub(crate) async fn create_program(
    pool: &SqlitePool,
    actor: &Actor,
    fields: NewProgram,
    files: Vec<SlotUpload>,
) -> Result<Program> {
    rbac::require(actor, Operation::Create, None)?;

    let fields = NewProgram {
        name: required_field(&fields.name, "name")?,
        recipient_name: required_field(&fields.recipient_name, "recipient name")?,
        budget: fields.budget,
        exco_reference: optional_field(fields.exco_reference.as_deref()),
    };
    for upload in &files {
        documents::validate_upload(upload, Shelf::Original)?;
    }

    let now = now_millis();
    let mut tx = pool.begin().await?;
    let id = storage::insert_program(&mut tx, &fields, actor.id, now).await?;
    for upload in &files {
        documents::put_slot(&mut tx, Shelf::Original, id, upload, actor.id, Some(actor.id), now)
            .await?;
    }
    tx.commit().await?;

    info!(
        "Program {id} created by actor {} with {} document(s)",
        actor.id,
        files.len()
    );
    storage::load_program(pool, id).await
}

pub(crate) async fn edit_program(
    pool: &SqlitePool,
    actor: &Actor,
    id: i64,
    changes: ProgramChanges,
    files: Vec<SlotUpload>,
) -> Result<Program> {
    let program = storage::load_program(pool, id).await?;
    check_expected_version(&program, changes.expected_version)?;
    authorize(actor, Operation::Edit, &program)?;

    let changes = ProgramChanges {
        name: changes
            .name
            .as_deref()
            .map(|v| required_field(v, "name"))
            .transpose()?,
        recipient_name: changes
            .recipient_name
            .as_deref()
            .map(|v| required_field(v, "recipient name"))
            .transpose()?,
        budget: changes.budget,
        exco_reference: changes
            .exco_reference
            .map(|v| optional_field(v.as_deref())),
        expected_version: changes.expected_version,
    };
    if changes.is_empty() && files.is_empty() {
        return Err(ApprovalError::Validation("nothing to change".into()));
    }
    for upload in &files {
        documents::validate_upload(upload, Shelf::Original)?;
    }

    // Superseded files are attributed to whoever last updated the program.
    let archive_as = program.updated_by.unwrap_or(program.created_by);
    let now = now_millis();
    let mut tx = pool.begin().await?;
    storage::update_fields_cas(&mut tx, &program, &changes, actor.id, now).await?;
    let mut archived = 0usize;
    for upload in &files {
        if documents::put_slot(&mut tx, Shelf::Original, id, upload, actor.id, Some(archive_as), now)
            .await?
            .is_some()
        {
            archived += 1;
        }
    }
    tx.commit().await?;

    info!(
        "Program {id} edited by actor {} ({} file(s), {archived} archived)",
        actor.id,
        files.len()
    );
    storage::load_program(pool, id).await
}

pub(crate) async fn delete_program(pool: &SqlitePool, actor: &Actor, id: i64) -> Result<()> {
    let program = storage::load_program(pool, id).await?;
    authorize(actor, Operation::Delete, &program)?;

    let mut tx = pool.begin().await?;
    storage::delete_program_cas(&mut tx, &program).await?;
    let pruned = documents::prune_orphan_blobs(&mut tx).await?;
    tx.commit().await?;

    info!("Program {id} deleted by actor {} ({pruned} blob(s) released)", actor.id);
    Ok(())
}

pub(crate) async fn upload_signed_documents(
    pool: &SqlitePool,
    actor: &Actor,
    id: i64,
    files: Vec<SlotUpload>,
) -> Result<SignedDocumentSet> {
    let program = storage::load_program(pool, id).await?;
    store_signed_documents(pool, actor, &program, files).await
}

/// Signed upload against an observed program snapshot.
pub(crate) async fn store_signed_documents(
    pool: &SqlitePool,
    actor: &Actor,
    program: &Program,
    files: Vec<SlotUpload>,
) -> Result<SignedDocumentSet> {
    let id = program.id;
    authorize(actor, Operation::UploadSignedDocuments, program)?;
    if files.is_empty() {
        return Err(ApprovalError::Validation(
            "at least one signed document is required".into(),
        ));
    }
    for upload in &files {
        documents::validate_upload(upload, Shelf::Signed)?;
    }

    let now = now_millis();
    let mut tx = pool.begin().await?;
    storage::pin_version(&mut tx, program).await?;
    documents::upsert_signed_set(&mut tx, id, actor.id, now).await?;
    for upload in &files {
        documents::put_slot(&mut tx, Shelf::Signed, id, upload, actor.id, None, now).await?;
    }
    tx.commit().await?;

    info!(
        "{} signed document(s) uploaded to program {id} by actor {}",
        files.len(),
        actor.id
    );
    documents::get_signed_set(pool, id)
        .await?
        .ok_or_else(|| ApprovalError::not_found("signed document set for program", id))
}

// ─────────────────────────────────────────────────────────
// Transitions
// ─────────────────────────────────────────────────────────

/// Apply a named transition to a program.
pub(crate) async fn transition(
    pool: &SqlitePool,
    actor: &Actor,
    id: i64,
    kind: TransitionKind,
    payload: TransitionPayload,
) -> Result<Program> {
    match kind {
        TransitionKind::RaiseQuery => {
            queries::raise_query(pool, actor, id, payload.text.as_deref(), payload.expected_version)
                .await?;
            return storage::load_program(pool, id).await;
        }
        TransitionKind::AnswerQuery | TransitionKind::ResolveQuery => {
            let query_id = payload.query_id.ok_or_else(|| {
                ApprovalError::Validation(format!("{kind} requires a query id"))
            })?;
            let query = queries::load_query(pool, query_id).await?;
            if query.program_id != id {
                return Err(ApprovalError::NotFound(format!(
                    "query {query_id} on program {id}"
                )));
            }
            if kind == TransitionKind::AnswerQuery {
                queries::answer_query(
                    pool,
                    actor,
                    query_id,
                    payload.text.as_deref(),
                    payload.expected_version,
                )
                .await?;
            } else {
                queries::resolve_query(pool, actor, query_id).await?;
            }
            return storage::load_program(pool, id).await;
        }
        _ => {}
    }

    let program = storage::load_program(pool, id).await?;
    check_expected_version(&program, payload.expected_version)?;

    let operation = Operation::Transition(kind);
    match rbac::authorize(actor, operation, Some(&ProgramFacts::from(&program))) {
        Decision::Allowed => {}
        Decision::Denied(DenialReason::InvalidState {
            status: ProgramStatus::Approved,
            ..
        }) if kind == TransitionKind::FinalApprove => {
            return Err(ApprovalError::PreconditionFailed(format!(
                "payment for program {id} is already recorded"
            )));
        }
        Decision::Denied(reason) => {
            warn!("Denied {kind} on program {id} for actor {}: {reason}", actor.id);
            return Err(ApprovalError::PermissionDenied(reason.to_string()));
        }
    }

    let payment = match kind {
        TransitionKind::Complete => {
            if documents::count_signed_slots(pool, id).await? == 0 {
                return Err(ApprovalError::PreconditionFailed(format!(
                    "program {id} has no signed documents"
                )));
            }
            let pending = queries::count_pending(pool, id).await?;
            if pending > 0 {
                return Err(ApprovalError::PreconditionFailed(format!(
                    "program {id} has {pending} pending quer{}",
                    if pending == 1 { "y" } else { "ies" }
                )));
            }
            None
        }
        TransitionKind::FinalApprove => Some((
            required_text(payload.voucher_number.as_deref(), "voucher number")?,
            required_text(payload.eft_number.as_deref(), "EFT number")?,
        )),
        _ => None,
    };

    let now = now_millis();
    let mut tx = pool.begin().await?;
    let to = commit_status(&mut tx, &program, kind, actor, now).await?;
    match kind {
        TransitionKind::SubmitToFinance => {
            storage::insert_approval_request(&mut tx, id, actor.id, now).await?;
        }
        TransitionKind::FinalApprove => {
            if let Some((voucher, eft)) = &payment {
                ledger::record_payment(&mut tx, id, voucher, eft, actor.id, now).await?;
            }
        }
        _ => {}
    }
    tx.commit().await?;

    info!(
        "Program {id}: {} -> {to} via {kind} by actor {}",
        program.status, actor.id
    );
    storage::load_program(pool, id).await
}
