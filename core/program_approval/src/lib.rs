//! # Program Approval Core
//!
//! Program applications move through a multi-role approval pipeline:
//! applicant → finance review → MMK office review → payment approval, with
//! query threads, remarks, and versioned documents along the way.
//!
//! [`ApprovalService`] exposes every operation:
//!
//! | Phase        | Entry Point(s)                                                       |
//! |--------------|----------------------------------------------------------------------|
//! | Accounts     | `register_user`, `login`, `resolve_session`, `logout`                |
//! | Programs     | [`ApprovalService::create_program`], `list_programs`, `get_program`, `edit_program`, `delete_program` |
//! | Workflow     | [`ApprovalService::transition`], `program_timeline`, `list_approval_requests` |
//! | Documents    | `get_document`, `get_document_history`, `get_history_file`           |
//! | Signed set   | `upload_signed_documents`, `get_signed_document_set`, `get_signed_document` |
//! | Queries      | `add_query`, `answer_query`, `resolve_query`, `list_queries`         |
//! | Remarks      | `add_remark`, `list_remarks`                                          |
//! | Ledger       | `get_payment`                                                         |
//!
//! ## Architecture
//!
//! Authorization is fully delegated to [`rbac`]. Status changes and their
//! coupled writes live in `workflow` and `queries`; persistence lives in
//! [`storage`], [`documents`], `ledger` and [`accounts`]. This file contains
//! only the public entry points.

use sqlx::SqlitePool;

pub mod accounts;
pub mod documents;
pub mod errors;
mod ledger;
mod queries;
pub mod rbac;
pub mod storage;
pub mod types;
mod workflow;

#[cfg(test)]
mod invariants;
#[cfg(test)]
mod test_documents;
#[cfg(test)]
mod test_support;
#[cfg(test)]
mod test_workflow;

use documents::Shelf;
pub use errors::{ApprovalError, Result};
pub use rbac::{authorize, Decision, DenialReason, Operation, ProgramFacts};
pub use storage::StoreOptions;
pub use types::{
    Actor, ApprovalRequest, Budget, DocumentHistoryRecord, DocumentSlot, DocumentSummary,
    FileUpload, NewProgram, PaymentRecord, Program, ProgramChanges, ProgramStatus, Query,
    QueryStatus, Remark, Role, Session, SignedDocumentSet, SlotUpload, StatusChange, StoredFile,
    TransitionKind, TransitionPayload,
};

/// Handle to the approval core. Cheap to clone; all state lives in the pool.
#[derive(Clone, Debug)]
pub struct ApprovalService {
    pool: SqlitePool,
}

impl ApprovalService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (and migrate) the database at `database_url`.
    pub async fn connect(database_url: &str, options: &StoreOptions) -> Result<Self> {
        Ok(Self::new(storage::init_pool(database_url, options).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ─────────────────────────────────────────────────────────
    // Accounts
    // ─────────────────────────────────────────────────────────

    /// Register a user. `admin` must hold [`Role::Administrator`].
    pub async fn register_user(
        &self,
        admin: &Actor,
        name: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<Actor> {
        accounts::register_user(&self.pool, admin, name, email, password, role).await
    }

    /// Create the first administrator if none exists yet.
    pub async fn bootstrap_admin(&self, name: &str, email: &str, password: &str) -> Result<Option<Actor>> {
        if accounts::has_administrator(&self.pool).await? {
            return Ok(None);
        }
        accounts::create_user(&self.pool, name, email, password, Role::Administrator)
            .await
            .map(Some)
    }

    pub async fn login(&self, email: &str, password: &str, ttl_millis: i64) -> Result<Session> {
        accounts::login(&self.pool, email, password, ttl_millis).await
    }

    pub async fn resolve_session(&self, token: &str) -> Result<Actor> {
        accounts::resolve_session(&self.pool, token).await
    }

    pub async fn logout(&self, token: &str) -> Result<()> {
        accounts::logout(&self.pool, token).await
    }

    pub async fn prune_expired_sessions(&self) -> Result<u64> {
        accounts::prune_expired_sessions(&self.pool).await
    }

    // ─────────────────────────────────────────────────────────
    // Programs
    // ─────────────────────────────────────────────────────────

    /// Create a program in `draft` owned by `actor`.
    pub async fn create_program(
        &self,
        actor: &Actor,
        fields: NewProgram,
        files: Vec<SlotUpload>,
    ) -> Result<Program> {
        workflow::create_program(&self.pool, actor, fields, files).await
    }

    /// Staff see every program; applicants see their own.
    pub async fn list_programs(&self, actor: &Actor) -> Result<Vec<Program>> {
        let owner = (!rbac::sees_all_programs(actor)).then_some(actor.id);
        storage::list_programs(&self.pool, owner).await
    }

    pub async fn get_program(&self, actor: &Actor, id: i64) -> Result<Program> {
        let program = storage::load_program(&self.pool, id).await?;
        workflow::authorize(actor, Operation::View, &program)?;
        Ok(program)
    }

    /// Change fields and/or replace documents. Replaced documents are
    /// archived to history before being overwritten.
    pub async fn edit_program(
        &self,
        actor: &Actor,
        id: i64,
        changes: ProgramChanges,
        files: Vec<SlotUpload>,
    ) -> Result<Program> {
        workflow::edit_program(&self.pool, actor, id, changes, files).await
    }

    pub async fn delete_program(&self, actor: &Actor, id: i64) -> Result<()> {
        workflow::delete_program(&self.pool, actor, id).await
    }

    // ─────────────────────────────────────────────────────────
    // Workflow
    // ─────────────────────────────────────────────────────────

    /// Apply a named transition. See [`TransitionPayload`] for the inputs
    /// individual transitions need.
    pub async fn transition(
        &self,
        actor: &Actor,
        id: i64,
        kind: TransitionKind,
        payload: TransitionPayload,
    ) -> Result<Program> {
        workflow::transition(&self.pool, actor, id, kind, payload).await
    }

    /// Committed status changes of a program, oldest first.
    pub async fn program_timeline(&self, actor: &Actor, id: i64) -> Result<Vec<StatusChange>> {
        self.get_program(actor, id).await?;
        storage::list_status_changes(&self.pool, id).await
    }

    pub async fn list_approval_requests(&self, actor: &Actor, id: i64) -> Result<Vec<ApprovalRequest>> {
        self.get_program(actor, id).await?;
        storage::list_approval_requests(&self.pool, id).await
    }

    // ─────────────────────────────────────────────────────────
    // Documents
    // ─────────────────────────────────────────────────────────

    /// Current file of a slot; an empty slot is `NotFound`.
    pub async fn get_document(&self, program_id: i64, slot: DocumentSlot) -> Result<StoredFile> {
        self.require_program(program_id).await?;
        documents::get_slot(&self.pool, Shelf::Original, program_id, slot)
            .await?
            .ok_or_else(|| ApprovalError::NotFound(format!("{slot} on program {program_id}")))
    }

    /// Superseded versions of a slot, newest first.
    pub async fn get_document_history(
        &self,
        program_id: i64,
        slot: DocumentSlot,
    ) -> Result<Vec<DocumentHistoryRecord>> {
        self.require_program(program_id).await?;
        documents::get_history(&self.pool, Shelf::Original, program_id, slot).await
    }

    pub async fn get_history_file(&self, history_id: i64) -> Result<StoredFile> {
        documents::get_history_entry(&self.pool, history_id)
            .await?
            .ok_or_else(|| ApprovalError::not_found("history record", history_id))
    }

    /// Program that owns a history record, for visibility checks upstream.
    pub async fn history_program(&self, history_id: i64) -> Result<i64> {
        documents::history_program(&self.pool, history_id)
            .await?
            .ok_or_else(|| ApprovalError::not_found("history record", history_id))
    }

    pub async fn upload_signed_documents(
        &self,
        actor: &Actor,
        id: i64,
        files: Vec<SlotUpload>,
    ) -> Result<SignedDocumentSet> {
        workflow::upload_signed_documents(&self.pool, actor, id, files).await
    }

    pub async fn get_signed_document_set(&self, program_id: i64) -> Result<SignedDocumentSet> {
        self.require_program(program_id).await?;
        documents::get_signed_set(&self.pool, program_id)
            .await?
            .ok_or_else(|| ApprovalError::not_found("signed document set for program", program_id))
    }

    pub async fn get_signed_document(&self, program_id: i64, slot: DocumentSlot) -> Result<StoredFile> {
        self.require_program(program_id).await?;
        documents::get_slot(&self.pool, Shelf::Signed, program_id, slot)
            .await?
            .ok_or_else(|| {
                ApprovalError::NotFound(format!("signed {slot} on program {program_id}"))
            })
    }

    pub async fn get_signed_document_history(
        &self,
        program_id: i64,
        slot: DocumentSlot,
    ) -> Result<Vec<DocumentHistoryRecord>> {
        self.require_program(program_id).await?;
        documents::get_history(&self.pool, Shelf::Signed, program_id, slot).await
    }

    // ─────────────────────────────────────────────────────────
    // Queries & remarks
    // ─────────────────────────────────────────────────────────

    /// Raise a query; the program moves to `query` in the same transaction.
    pub async fn add_query(&self, actor: &Actor, program_id: i64, text: &str) -> Result<Query> {
        queries::raise_query(&self.pool, actor, program_id, Some(text), None).await
    }

    /// Answer a pending query; the program moves to `query_answered`.
    pub async fn answer_query(&self, actor: &Actor, query_id: i64, text: &str) -> Result<Query> {
        queries::answer_query(&self.pool, actor, query_id, Some(text), None).await
    }

    pub async fn resolve_query(&self, actor: &Actor, query_id: i64) -> Result<Query> {
        queries::resolve_query(&self.pool, actor, query_id).await
    }

    pub async fn get_query(&self, query_id: i64) -> Result<Query> {
        queries::load_query(&self.pool, query_id).await
    }

    pub async fn list_queries(&self, program_id: i64) -> Result<Vec<Query>> {
        self.require_program(program_id).await?;
        queries::list_queries(&self.pool, program_id).await
    }

    pub async fn add_remark(&self, actor: &Actor, program_id: i64, text: &str) -> Result<Remark> {
        queries::add_remark(&self.pool, actor, program_id, text).await
    }

    pub async fn list_remarks(&self, program_id: i64) -> Result<Vec<Remark>> {
        self.require_program(program_id).await?;
        queries::list_remarks(&self.pool, program_id).await
    }

    // ─────────────────────────────────────────────────────────
    // Ledger
    // ─────────────────────────────────────────────────────────

    pub async fn get_payment(&self, program_id: i64) -> Result<PaymentRecord> {
        self.require_program(program_id).await?;
        ledger::payment_for(&self.pool, program_id)
            .await?
            .ok_or_else(|| ApprovalError::not_found("payment for program", program_id))
    }

    async fn require_program(&self, program_id: i64) -> Result<()> {
        storage::fetch_program_row(&self.pool, program_id)
            .await?
            .map(|_| ())
            .ok_or_else(|| ApprovalError::not_found("program", program_id))
    }
}
