#![allow(dead_code)]

use crate::types::{DocumentHistoryRecord, Program, ProgramStatus, Query, QueryStatus, StatusChange};

/// Budgets are never negative.
pub fn assert_budget_non_negative(program: &Program) {
    assert!(
        program.budget.minor_units() >= 0,
        "program {} has negative budget {}",
        program.id,
        program.budget
    );
}

/// A timeline is a walk of the status graph starting at `draft`, each entry
/// leaving the status the previous one entered.
pub fn assert_valid_walk(timeline: &[StatusChange]) {
    let mut current = ProgramStatus::Draft;
    for change in timeline {
        assert!(
            !current.is_terminal(),
            "timeline entry {} leaves terminal status {current}",
            change.id
        );
        assert_eq!(
            change.from_status, current,
            "timeline entry {} starts at {} but program was {}",
            change.id, change.from_status, current
        );
        assert!(
            change.from_status.can_transition_to(change.to_status),
            "invalid status transition from {} to {} via {}",
            change.from_status,
            change.to_status,
            change.transition
        );
        current = change.to_status;
    }
}

/// The timeline ends at the program's current status.
pub fn assert_timeline_matches(program: &Program, timeline: &[StatusChange]) {
    let last = timeline
        .last()
        .map(|c| c.to_status)
        .unwrap_or(ProgramStatus::Draft);
    assert_eq!(
        last, program.status,
        "timeline of program {} ends at {last}, status is {}",
        program.id, program.status
    );
}

/// A pending query implies the program sits in `query`, unless it was
/// rejected while the query was open.
pub fn assert_pending_query_coupled(program: &Program, queries: &[Query]) {
    if program.status != ProgramStatus::Rejected
        && queries.iter().any(|q| q.status == QueryStatus::Pending)
    {
        assert_eq!(
            program.status,
            ProgramStatus::Query,
            "program {} has a pending query but is {}",
            program.id,
            program.status
        );
    }
}

/// Answered/resolved queries carry their answer.
pub fn assert_query_fields_consistent(query: &Query) {
    match query.status {
        QueryStatus::Pending => {
            assert!(query.answer_text.is_none() && query.answered_at.is_none());
            assert!(query.resolved_at.is_none());
        }
        QueryStatus::Answered => {
            assert!(query.answer_text.is_some() && query.answered_by.is_some());
            assert!(query.resolved_at.is_none());
        }
        QueryStatus::Resolved => {
            assert!(query.answer_text.is_some());
            assert!(query.resolved_at.is_some() && query.resolved_by.is_some());
        }
    }
}

/// History comes back newest first.
pub fn assert_history_newest_first(history: &[DocumentHistoryRecord]) {
    for pair in history.windows(2) {
        assert!(
            pair[0].id > pair[1].id,
            "history record {} listed before older record {}",
            pair[1].id,
            pair[0].id
        );
    }
}
