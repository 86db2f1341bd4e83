//! # Types
//!
//! Shared data structures used across all modules of the approval core.
//!
//! ## Status as a Finite-State Machine
//!
//! [`ProgramStatus`] follows a forward-only lifecycle with a query loop:
//!
//! ```text
//! Draft ──► UnderReviewFinance ──► Completed ──► UnderReviewMmk ──► ApprovedByMmkOffice ──► Approved
//!                │   ▲                ▲               │
//!                ▼   │                │               ▼
//!              Query ──► QueryAnswered ┘            Query
//!
//! UnderReviewFinance | Query | QueryAnswered | UnderReviewMmk ──► Rejected
//! ```
//!
//! `Approved` and `Rejected` are terminal. Which actor may fire which edge is
//! decided by [`crate::rbac`]; this module only knows the graph itself.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ApprovalError;

// ── Actors ───────────────────────────────────────────────────────────

/// Capability class of an authenticated user. A user holds exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Role {
    Applicant,
    Administrator,
    FinanceReviewer,
    ProgramAssistant,
    MmkOfficeReviewer,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Applicant,
        Role::Administrator,
        Role::FinanceReviewer,
        Role::ProgramAssistant,
        Role::MmkOfficeReviewer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applicant => "applicant",
            Self::Administrator => "administrator",
            Self::FinanceReviewer => "finance_reviewer",
            Self::ProgramAssistant => "program_assistant",
            Self::MmkOfficeReviewer => "mmk_office_reviewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ApprovalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| ApprovalError::Validation(format!("unknown role `{s}`")))
    }
}

/// The authenticated caller of a core operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Actor {
    pub id: i64,
    pub name: String,
    pub role: Role,
}

/// A bearer session issued at login.
#[derive(Clone, Debug, Serialize)]
pub struct Session {
    pub token: String,
    pub actor: Actor,
    pub expires_at: i64,
}

// ── Program status ───────────────────────────────────────────────────

/// Lifecycle status of a program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ProgramStatus {
    /// Created, not yet submitted.
    Draft,
    /// Awaiting finance review.
    UnderReviewFinance,
    /// Finance raised a query that is not yet answered.
    Query,
    /// The outstanding query was answered; back with finance.
    QueryAnswered,
    /// Finance signed off ("Document Checked").
    Completed,
    /// Awaiting MMK office review.
    UnderReviewMmk,
    /// MMK office approved; awaiting payment.
    ApprovedByMmkOffice,
    /// Payment recorded ("Payment Approved").
    Approved,
    Rejected,
}

impl ProgramStatus {
    pub const ALL: [ProgramStatus; 9] = [
        ProgramStatus::Draft,
        ProgramStatus::UnderReviewFinance,
        ProgramStatus::Query,
        ProgramStatus::QueryAnswered,
        ProgramStatus::Completed,
        ProgramStatus::UnderReviewMmk,
        ProgramStatus::ApprovedByMmkOffice,
        ProgramStatus::Approved,
        ProgramStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::UnderReviewFinance => "under_review_finance",
            Self::Query => "query",
            Self::QueryAnswered => "query_answered",
            Self::Completed => "completed",
            Self::UnderReviewMmk => "under_review_mmk",
            Self::ApprovedByMmkOffice => "approved_by_mmk_office",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Human label shown on dashboards.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::UnderReviewFinance => "Under Review (Finance)",
            Self::Query => "Query",
            Self::QueryAnswered => "Query Answered",
            Self::Completed => "Document Checked",
            Self::UnderReviewMmk => "Under Review (MMK Office)",
            Self::ApprovedByMmkOffice => "Approved by MMK Office",
            Self::Approved => "Payment Approved",
            Self::Rejected => "Rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    /// Edges of the status graph. Staying in `QueryAnswered` is allowed so a
    /// second pending query can be answered without leaving the state.
    pub fn can_transition_to(&self, next: ProgramStatus) -> bool {
        use ProgramStatus::*;
        matches!(
            (self, next),
            (Draft, UnderReviewFinance)
                | (UnderReviewFinance, Query)
                | (UnderReviewFinance, Completed)
                | (UnderReviewFinance, Rejected)
                | (Query, QueryAnswered)
                | (Query, Rejected)
                | (QueryAnswered, Query)
                | (QueryAnswered, QueryAnswered)
                | (QueryAnswered, Completed)
                | (QueryAnswered, Rejected)
                | (Completed, UnderReviewMmk)
                | (UnderReviewMmk, Query)
                | (UnderReviewMmk, ApprovedByMmkOffice)
                | (UnderReviewMmk, Rejected)
                | (ApprovedByMmkOffice, Approved)
        )
    }
}

impl fmt::Display for ProgramStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgramStatus {
    type Err = ApprovalError;

    /// Accepts canonical names, dashboard labels, and the legacy
    /// `pending` / `under_review` names of the simplified dashboard.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(status) = ProgramStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s || st.label().eq_ignore_ascii_case(s))
        {
            return Ok(status);
        }
        match s {
            "pending" => Ok(Self::Draft),
            "under_review" => Ok(Self::UnderReviewFinance),
            _ => Err(ApprovalError::Validation(format!("unknown status `{s}`"))),
        }
    }
}

/// Named, guarded state changes on a program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum TransitionKind {
    SubmitToFinance,
    RaiseQuery,
    AnswerQuery,
    ResolveQuery,
    Complete,
    Reject,
    SubmitToMmk,
    ApproveByMmk,
    FinalApprove,
}

impl TransitionKind {
    pub const ALL: [TransitionKind; 9] = [
        TransitionKind::SubmitToFinance,
        TransitionKind::RaiseQuery,
        TransitionKind::AnswerQuery,
        TransitionKind::ResolveQuery,
        TransitionKind::Complete,
        TransitionKind::Reject,
        TransitionKind::SubmitToMmk,
        TransitionKind::ApproveByMmk,
        TransitionKind::FinalApprove,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubmitToFinance => "submit-to-finance",
            Self::RaiseQuery => "raise-query",
            Self::AnswerQuery => "answer-query",
            Self::ResolveQuery => "resolve-query",
            Self::Complete => "complete",
            Self::Reject => "reject",
            Self::SubmitToMmk => "submit-to-mmk",
            Self::ApproveByMmk => "approve-by-mmk",
            Self::FinalApprove => "final-approve",
        }
    }

    /// Status the program lands in, or `None` when the transition leaves
    /// the program status untouched.
    pub fn target(&self) -> Option<ProgramStatus> {
        match self {
            Self::SubmitToFinance => Some(ProgramStatus::UnderReviewFinance),
            Self::RaiseQuery => Some(ProgramStatus::Query),
            Self::AnswerQuery => Some(ProgramStatus::QueryAnswered),
            Self::ResolveQuery => None,
            Self::Complete => Some(ProgramStatus::Completed),
            Self::Reject => Some(ProgramStatus::Rejected),
            Self::SubmitToMmk => Some(ProgramStatus::UnderReviewMmk),
            Self::ApproveByMmk => Some(ProgramStatus::ApprovedByMmkOffice),
            Self::FinalApprove => Some(ProgramStatus::Approved),
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransitionKind {
    type Err = ApprovalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransitionKind::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ApprovalError::Validation(format!("unknown transition `{s}`")))
    }
}

/// Optional inputs of [`crate::ApprovalService::transition`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransitionPayload {
    /// Program version the actor observed; a mismatch is a conflict.
    pub expected_version: Option<i64>,
    /// Query text for `raise-query`, answer text for `answer-query`.
    pub text: Option<String>,
    /// Target query for `answer-query` / `resolve-query`.
    pub query_id: Option<i64>,
    pub voucher_number: Option<String>,
    pub eft_number: Option<String>,
}

// ── Budget ───────────────────────────────────────────────────────────

/// Non-negative amount with two fractional digits, held in minor units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct Budget(i64);

impl Budget {
    pub fn from_minor(minor: i64) -> Result<Self, ApprovalError> {
        if minor < 0 {
            return Err(ApprovalError::Validation("budget must not be negative".into()));
        }
        Ok(Self(minor))
    }

    pub fn minor_units(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Budget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl FromStr for Budget {
    type Err = ApprovalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ApprovalError::Validation(format!("invalid budget `{s}`"));
        let s = s.trim();
        if s.starts_with('-') {
            return Err(ApprovalError::Validation("budget must not be negative".into()));
        }
        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
        if (whole.is_empty() && frac.is_empty())
            || frac.len() > 2
            || !whole.bytes().all(|b| b.is_ascii_digit())
            || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }
        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let cents: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };
        whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(cents))
            .map(Budget)
            .ok_or_else(invalid)
    }
}

impl TryFrom<f64> for Budget {
    type Error = ApprovalError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() {
            return Err(ApprovalError::Validation("budget must be a finite number".into()));
        }
        value.to_string().parse()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BudgetInput {
    Number(f64),
    Text(String),
}

impl Serialize for Budget {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Budget {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let parsed = match BudgetInput::deserialize(deserializer)? {
            BudgetInput::Number(n) => Budget::try_from(n),
            BudgetInput::Text(s) => s.parse(),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

// ── Documents ────────────────────────────────────────────────────────

/// Named attachment point on a program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub enum DocumentSlot {
    CentralServiceLetter,
    PknsApprovalLetter,
    ProgramLetter,
    ExcoLetter,
    BankAccountManager,
    CordRegistrationForm,
    /// Ad-hoc resubmission; has no signed counterpart.
    UpdatedDocument,
}

impl DocumentSlot {
    pub const ALL: [DocumentSlot; 7] = [
        DocumentSlot::CentralServiceLetter,
        DocumentSlot::PknsApprovalLetter,
        DocumentSlot::ProgramLetter,
        DocumentSlot::ExcoLetter,
        DocumentSlot::BankAccountManager,
        DocumentSlot::CordRegistrationForm,
        DocumentSlot::UpdatedDocument,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CentralServiceLetter => "centralServiceLetter",
            Self::PknsApprovalLetter => "pknsApprovalLetter",
            Self::ProgramLetter => "programLetter",
            Self::ExcoLetter => "excoLetter",
            Self::BankAccountManager => "bankAccountManager",
            Self::CordRegistrationForm => "cordRegistrationForm",
            Self::UpdatedDocument => "updatedDocument",
        }
    }

    /// Whether the slot has a counter-signed version in the signed set.
    pub fn is_signable(&self) -> bool {
        !matches!(self, Self::UpdatedDocument)
    }
}

impl fmt::Display for DocumentSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentSlot {
    type Err = ApprovalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentSlot::ALL
            .into_iter()
            .find(|slot| slot.as_str() == s)
            .ok_or_else(|| ApprovalError::NotFound(format!("document slot `{s}`")))
    }
}

/// An uploaded file as received from the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileUpload {
    pub file_name: String,
    pub content: Vec<u8>,
}

impl FileUpload {
    pub fn new(file_name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
        }
    }
}

/// A file destined for a particular slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotUpload {
    pub slot: DocumentSlot,
    pub file: FileUpload,
}

/// Metadata of the file currently held by a slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub slot: DocumentSlot,
    pub file_name: String,
    pub content_hash: String,
    pub size_bytes: i64,
    pub uploaded_by: i64,
    pub uploaded_at: i64,
}

/// File content fetched from a slot or from history.
#[derive(Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
pub struct StoredFile {
    pub file_name: String,
    pub content_hash: String,
    pub content: Vec<u8>,
    pub uploaded_at: i64,
}

/// Archived version of a slot, written before the slot was overwritten.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DocumentHistoryRecord {
    pub id: i64,
    pub program_id: i64,
    pub slot: DocumentSlot,
    /// True when the archived file came from the signed set.
    pub signed: bool,
    pub file_name: String,
    pub content_hash: String,
    pub size_bytes: i64,
    pub uploaded_by: i64,
    pub uploader_name: String,
    pub uploaded_at: i64,
    pub archived_at: i64,
}

/// Finance-authored counter-signed documents of a program.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SignedDocumentSet {
    pub program_id: i64,
    pub created_by: i64,
    pub created_at: i64,
    pub updated_at: i64,
    #[sqlx(skip)]
    pub documents: Vec<DocumentSummary>,
}

// ── Programs ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub id: i64,
    pub name: String,
    pub recipient_name: String,
    #[sqlx(rename = "budget_minor")]
    pub budget: Budget,
    pub exco_reference: Option<String>,
    pub status: ProgramStatus,
    /// Bumped on every committed status change or edit.
    pub version: i64,
    pub created_by: i64,
    pub updated_by: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    #[sqlx(skip)]
    pub documents: Vec<DocumentSummary>,
}

/// Fields of a new program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewProgram {
    pub name: String,
    pub recipient_name: String,
    pub budget: Budget,
    pub exco_reference: Option<String>,
}

/// Field-level changes of an edit. `None` leaves the field untouched;
/// `exco_reference: Some(None)` clears it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgramChanges {
    pub name: Option<String>,
    pub recipient_name: Option<String>,
    pub budget: Option<Budget>,
    pub exco_reference: Option<Option<String>>,
    pub expected_version: Option<i64>,
}

impl ProgramChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.recipient_name.is_none()
            && self.budget.is_none()
            && self.exco_reference.is_none()
    }
}

// ── Queries, remarks, ledger, audit ──────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum QueryStatus {
    Pending,
    Answered,
    Resolved,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub id: i64,
    pub program_id: i64,
    pub query_text: String,
    pub created_by: i64,
    pub created_at: i64,
    pub status: QueryStatus,
    pub answer_text: Option<String>,
    pub answered_by: Option<i64>,
    pub answered_at: Option<i64>,
    pub resolved_by: Option<i64>,
    pub resolved_at: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Remark {
    pub id: i64,
    pub program_id: i64,
    pub remark: String,
    pub author_id: i64,
    pub author_name: String,
    pub author_role: Role,
    pub created_at: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub id: i64,
    pub program_id: i64,
    pub voucher_number: String,
    pub eft_number: String,
    pub recorded_by: i64,
    pub created_at: i64,
}

/// Audit entry written when a program is submitted to finance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub id: i64,
    pub program_id: i64,
    pub requested_by: i64,
    pub requested_at: i64,
}

/// One committed edge of a program's status walk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub id: i64,
    pub program_id: i64,
    pub from_status: ProgramStatus,
    pub to_status: ProgramStatus,
    pub transition: TransitionKind,
    pub actor_id: i64,
    pub changed_at: i64,
}

/// Current time as Unix milliseconds.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
