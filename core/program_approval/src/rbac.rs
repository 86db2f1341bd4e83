//! # Role-Based Access Control
//!
//! Every operation on a program is gated by [`authorize`], a pure function of
//! the actor's role and id, the program's creator and status, and the
//! requested [`Operation`]. The decision is driven by the [`RULES`] table; an
//! (operation, role) pair absent from the table is always denied.
//!
//! | Operation               | Roles                              | Owner only | States                                   |
//! |-------------------------|------------------------------------|------------|------------------------------------------|
//! | create                  | Applicant, Administrator           | –          | –                                        |
//! | view                    | staff roles / Applicant            | Applicant  | any                                      |
//! | edit                    | Administrator                      | –          | any                                      |
//! | edit                    | Applicant                          | yes        | not completed / approved / rejected      |
//! | edit                    | ProgramAssistant                   | –          | query                                    |
//! | delete                  | Administrator                      | –          | any                                      |
//! | delete                  | Applicant                          | yes        | draft … query_answered                   |
//! | upload signed documents | FinanceReviewer                    | –          | submitted, non-terminal                  |
//! | add remark              | staff roles / Applicant            | Applicant  | any                                      |
//! | submit-to-finance       | Applicant / Administrator          | Applicant  | draft                                    |
//! | raise-query             | FinanceReviewer                    | –          | under_review_finance, under_review_mmk, query_answered |
//! | answer-query            | ProgramAssistant                   | –          | query, query_answered                    |
//! | resolve-query           | FinanceReviewer                    | –          | any                                      |
//! | complete                | FinanceReviewer                    | –          | under_review_finance, query_answered     |
//! | reject                  | FinanceReviewer, MmkOfficeReviewer | –          | under_review_finance, query, query_answered, under_review_mmk |
//! | submit-to-mmk           | Applicant                          | yes        | completed                                |
//! | approve-by-mmk          | MmkOfficeReviewer                  | –          | under_review_mmk                         |
//! | final-approve           | FinanceReviewer                    | –          | approved_by_mmk_office                   |

use std::fmt;

use crate::errors::{ApprovalError, Result};
use crate::types::{Actor, Program, ProgramStatus, Role, TransitionKind};

use ProgramStatus::*;
use Role::*;

/// Something an actor may attempt against a program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    View,
    Edit,
    Delete,
    UploadSignedDocuments,
    AddRemark,
    Transition(TransitionKind),
}

impl Operation {
    pub const ALL: [Operation; 15] = [
        Operation::Create,
        Operation::View,
        Operation::Edit,
        Operation::Delete,
        Operation::UploadSignedDocuments,
        Operation::AddRemark,
        Operation::Transition(TransitionKind::SubmitToFinance),
        Operation::Transition(TransitionKind::RaiseQuery),
        Operation::Transition(TransitionKind::AnswerQuery),
        Operation::Transition(TransitionKind::ResolveQuery),
        Operation::Transition(TransitionKind::Complete),
        Operation::Transition(TransitionKind::Reject),
        Operation::Transition(TransitionKind::SubmitToMmk),
        Operation::Transition(TransitionKind::ApproveByMmk),
        Operation::Transition(TransitionKind::FinalApprove),
    ];
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::View => f.write_str("view"),
            Self::Edit => f.write_str("edit"),
            Self::Delete => f.write_str("delete"),
            Self::UploadSignedDocuments => f.write_str("upload-signed-documents"),
            Self::AddRemark => f.write_str("add-remark"),
            Self::Transition(kind) => write!(f, "{kind}"),
        }
    }
}

/// The slice of a program the access decision depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgramFacts {
    pub created_by: i64,
    pub status: ProgramStatus,
}

impl From<&Program> for ProgramFacts {
    fn from(program: &Program) -> Self {
        Self {
            created_by: program.created_by,
            status: program.status,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(DenialReason),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DenialReason {
    /// No rule grants the operation to this role.
    RoleNotPermitted { role: Role, operation: Operation },
    /// The rule is restricted to the program's creator.
    NotOwner { operation: Operation },
    /// The program's current status is outside the rule's window.
    InvalidState { operation: Operation, status: ProgramStatus },
    /// The rule needs a program but none was given.
    MissingProgram { operation: Operation },
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoleNotPermitted { role, operation } => {
                write!(f, "role {role} may not {operation}")
            }
            Self::NotOwner { operation } => {
                write!(f, "only the program's creator may {operation}")
            }
            Self::InvalidState { operation, status } => {
                write!(f, "cannot {operation} while program is {status}")
            }
            Self::MissingProgram { operation } => write!(f, "{operation} requires a program"),
        }
    }
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Convert a denial into [`ApprovalError::PermissionDenied`].
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Allowed => Ok(()),
            Self::Denied(reason) => Err(ApprovalError::PermissionDenied(reason.to_string())),
        }
    }
}

// ── Decision table ───────────────────────────────────────────────────

#[derive(Clone, Copy, Debug)]
enum Ownership {
    Anyone,
    CreatorOnly,
}

#[derive(Clone, Copy, Debug)]
enum Window {
    Any,
    Only(&'static [ProgramStatus]),
    /// Neither signed off by finance nor terminal.
    BeforeSignOff,
}

impl Window {
    fn admits(&self, status: ProgramStatus) -> bool {
        match self {
            Self::Any => true,
            Self::Only(states) => states.contains(&status),
            Self::BeforeSignOff => !status.is_terminal() && status != Completed,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Rule {
    operation: Operation,
    roles: &'static [Role],
    ownership: Ownership,
    window: Window,
}

const STAFF: &[Role] = &[Administrator, FinanceReviewer, ProgramAssistant, MmkOfficeReviewer];

const SUBMITTED_OPEN: &[ProgramStatus] = &[
    UnderReviewFinance,
    Query,
    QueryAnswered,
    Completed,
    UnderReviewMmk,
    ApprovedByMmkOffice,
];

const REVIEWABLE: &[ProgramStatus] = &[UnderReviewFinance, Query, QueryAnswered, UnderReviewMmk];

const fn rule(
    operation: Operation,
    roles: &'static [Role],
    ownership: Ownership,
    window: Window,
) -> Rule {
    Rule {
        operation,
        roles,
        ownership,
        window,
    }
}

const fn transition(kind: TransitionKind) -> Operation {
    Operation::Transition(kind)
}

static RULES: &[Rule] = &[
    rule(Operation::Create, &[Applicant, Administrator], Ownership::Anyone, Window::Any),
    rule(Operation::View, STAFF, Ownership::Anyone, Window::Any),
    rule(Operation::View, &[Applicant], Ownership::CreatorOnly, Window::Any),
    rule(Operation::Edit, &[Administrator], Ownership::Anyone, Window::Any),
    rule(
        Operation::Edit,
        &[Applicant],
        Ownership::CreatorOnly,
        Window::BeforeSignOff,
    ),
    rule(Operation::Edit, &[ProgramAssistant], Ownership::Anyone, Window::Only(&[Query])),
    rule(Operation::Delete, &[Administrator], Ownership::Anyone, Window::Any),
    rule(
        Operation::Delete,
        &[Applicant],
        Ownership::CreatorOnly,
        Window::Only(&[Draft, UnderReviewFinance, Query, QueryAnswered]),
    ),
    rule(
        Operation::UploadSignedDocuments,
        &[FinanceReviewer],
        Ownership::Anyone,
        Window::Only(SUBMITTED_OPEN),
    ),
    rule(Operation::AddRemark, STAFF, Ownership::Anyone, Window::Any),
    rule(Operation::AddRemark, &[Applicant], Ownership::CreatorOnly, Window::Any),
    rule(
        transition(TransitionKind::SubmitToFinance),
        &[Applicant],
        Ownership::CreatorOnly,
        Window::Only(&[Draft]),
    ),
    rule(
        transition(TransitionKind::SubmitToFinance),
        &[Administrator],
        Ownership::Anyone,
        Window::Only(&[Draft]),
    ),
    rule(
        transition(TransitionKind::RaiseQuery),
        &[FinanceReviewer],
        Ownership::Anyone,
        Window::Only(&[UnderReviewFinance, UnderReviewMmk, QueryAnswered]),
    ),
    rule(
        transition(TransitionKind::AnswerQuery),
        &[ProgramAssistant],
        Ownership::Anyone,
        Window::Only(&[Query, QueryAnswered]),
    ),
    rule(
        transition(TransitionKind::ResolveQuery),
        &[FinanceReviewer],
        Ownership::Anyone,
        Window::Any,
    ),
    rule(
        transition(TransitionKind::Complete),
        &[FinanceReviewer],
        Ownership::Anyone,
        Window::Only(&[UnderReviewFinance, QueryAnswered]),
    ),
    rule(
        transition(TransitionKind::Reject),
        &[FinanceReviewer, MmkOfficeReviewer],
        Ownership::Anyone,
        Window::Only(REVIEWABLE),
    ),
    rule(
        transition(TransitionKind::SubmitToMmk),
        &[Applicant],
        Ownership::CreatorOnly,
        Window::Only(&[Completed]),
    ),
    rule(
        transition(TransitionKind::ApproveByMmk),
        &[MmkOfficeReviewer],
        Ownership::Anyone,
        Window::Only(&[UnderReviewMmk]),
    ),
    rule(
        transition(TransitionKind::FinalApprove),
        &[FinanceReviewer],
        Ownership::Anyone,
        Window::Only(&[ApprovedByMmkOffice]),
    ),
];

/// Decide whether `actor` may perform `operation` against `program`.
///
/// `program` is `None` only for [`Operation::Create`]. The function has no
/// side effects and reads nothing beyond its arguments.
pub fn authorize(actor: &Actor, operation: Operation, program: Option<&ProgramFacts>) -> Decision {
    let Some(rule) = RULES
        .iter()
        .find(|r| r.operation == operation && r.roles.contains(&actor.role))
    else {
        return Decision::Denied(DenialReason::RoleNotPermitted {
            role: actor.role,
            operation,
        });
    };

    let needs_program =
        matches!(rule.ownership, Ownership::CreatorOnly) || !matches!(rule.window, Window::Any);
    let program = match program {
        Some(p) => p,
        None if needs_program => {
            return Decision::Denied(DenialReason::MissingProgram { operation })
        }
        None => return Decision::Allowed,
    };

    if matches!(rule.ownership, Ownership::CreatorOnly) && program.created_by != actor.id {
        return Decision::Denied(DenialReason::NotOwner { operation });
    }
    if !rule.window.admits(program.status) {
        return Decision::Denied(DenialReason::InvalidState {
            operation,
            status: program.status,
        });
    }
    Decision::Allowed
}

/// Shorthand for `authorize(..).into_result()`.
pub fn require(actor: &Actor, operation: Operation, program: Option<&ProgramFacts>) -> Result<()> {
    authorize(actor, operation, program).into_result()
}

/// Whether the actor sees every program or only their own.
pub fn sees_all_programs(actor: &Actor) -> bool {
    STAFF.contains(&actor.role)
}
