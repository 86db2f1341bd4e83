use crate::invariants::{assert_budget_non_negative, assert_timeline_matches, assert_valid_walk};
use crate::test_support::{no_payload, payment, setup, text, upload, water_supply};
use crate::{
    ApprovalError, Budget, DocumentSlot, NewProgram, ProgramChanges, ProgramStatus, TransitionKind,
    TransitionPayload,
};

#[tokio::test]
async fn test_full_approval_scenario() {
    let fx = setup().await;
    let svc = &fx.service;

    let program = fx.draft().await;
    assert_eq!(program.status, ProgramStatus::Draft);
    assert_eq!(program.budget.to_string(), "12000.00");
    assert_budget_non_negative(&program);

    let program = fx
        .step(&fx.applicant, program.id, TransitionKind::SubmitToFinance, no_payload())
        .await;
    assert_eq!(program.status, ProgramStatus::UnderReviewFinance);

    let query = svc
        .add_query(&fx.finance, program.id, "Missing budget breakdown")
        .await
        .unwrap();
    assert_eq!(query.status, crate::QueryStatus::Pending);
    assert_eq!(
        svc.get_program(&fx.finance, program.id).await.unwrap().status,
        ProgramStatus::Query
    );

    let query = svc
        .answer_query(&fx.assistant, query.id, "Breakdown attached")
        .await
        .unwrap();
    assert_eq!(query.status, crate::QueryStatus::Answered);
    assert_eq!(
        svc.get_program(&fx.finance, program.id).await.unwrap().status,
        ProgramStatus::QueryAnswered
    );

    svc.upload_signed_documents(
        &fx.finance,
        program.id,
        vec![upload(DocumentSlot::ExcoLetter, "exco-signed.pdf", b"signed exco")],
    )
    .await
    .unwrap();
    let program = fx
        .step(&fx.finance, program.id, TransitionKind::Complete, no_payload())
        .await;
    assert_eq!(program.status, ProgramStatus::Completed);
    assert_eq!(program.status.label(), "Document Checked");

    let program = fx
        .step(&fx.applicant, program.id, TransitionKind::SubmitToMmk, no_payload())
        .await;
    assert_eq!(program.status, ProgramStatus::UnderReviewMmk);

    let program = fx
        .step(&fx.mmk, program.id, TransitionKind::ApproveByMmk, no_payload())
        .await;
    assert_eq!(program.status, ProgramStatus::ApprovedByMmkOffice);

    let program = fx
        .step(&fx.finance, program.id, TransitionKind::FinalApprove, payment("V-001", "E-001"))
        .await;
    assert_eq!(program.status, ProgramStatus::Approved);

    let record = svc.get_payment(program.id).await.unwrap();
    assert_eq!(record.voucher_number, "V-001");
    assert_eq!(record.eft_number, "E-001");
    assert_eq!(record.recorded_by, fx.finance.id);

    let timeline = svc.program_timeline(&fx.applicant, program.id).await.unwrap();
    assert_valid_walk(&timeline);
    assert_timeline_matches(&program, &timeline);
    assert_eq!(timeline.len(), 7);

    let requests = svc.list_approval_requests(&fx.admin, program.id).await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].requested_by, fx.applicant.id);
}

#[tokio::test]
async fn test_final_approve_twice_is_precondition_failed() {
    let fx = setup().await;
    let program = fx.approved_by_mmk().await;
    fx.step(&fx.finance, program.id, TransitionKind::FinalApprove, payment("V-001", "E-001"))
        .await;

    let err = fx
        .service
        .transition(&fx.finance, program.id, TransitionKind::FinalApprove, payment("V-002", "E-002"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::PreconditionFailed(_)), "{err}");
    assert_eq!(crate::ledger::count_payments(fx.service.pool(), program.id).await.unwrap(), 1);
    assert_eq!(
        fx.service.get_payment(program.id).await.unwrap().voucher_number,
        "V-001"
    );
}

#[tokio::test]
async fn test_final_approve_requires_payment_numbers() {
    let fx = setup().await;
    let program = fx.approved_by_mmk().await;

    for payload in [no_payload(), payment("V-1", "  "), payment("", "E-1")] {
        let err = fx
            .service
            .transition(&fx.finance, program.id, TransitionKind::FinalApprove, payload)
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::PreconditionFailed(_)), "{err}");
    }
    let program = fx.service.get_program(&fx.admin, program.id).await.unwrap();
    assert_eq!(program.status, ProgramStatus::ApprovedByMmkOffice);
    assert!(matches!(
        fx.service.get_payment(program.id).await,
        Err(ApprovalError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_final_approve_by_non_finance_is_denied_even_when_approved() {
    let fx = setup().await;
    let program = fx.approved_by_mmk().await;
    fx.step(&fx.finance, program.id, TransitionKind::FinalApprove, payment("V", "E"))
        .await;
    let err = fx
        .service
        .transition(&fx.mmk, program.id, TransitionKind::FinalApprove, payment("V", "E"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::PermissionDenied(_)));
}

#[tokio::test]
async fn test_complete_without_signed_documents_fails() {
    let fx = setup().await;
    let program = fx.submitted().await;
    let err = fx
        .service
        .transition(&fx.finance, program.id, TransitionKind::Complete, no_payload())
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::PreconditionFailed(_)), "{err}");
    assert_eq!(
        fx.service.get_program(&fx.finance, program.id).await.unwrap().status,
        ProgramStatus::UnderReviewFinance
    );
}

#[tokio::test]
async fn test_non_owner_cannot_edit_or_submit() {
    let fx = setup().await;
    let program = fx.submitted().await;

    let changes = ProgramChanges {
        name: Some("Hijacked".into()),
        ..Default::default()
    };
    let err = fx
        .service
        .edit_program(&fx.other_applicant, program.id, changes, Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::PermissionDenied(_)));

    let draft = fx.draft().await;
    let err = fx
        .service
        .transition(&fx.other_applicant, draft.id, TransitionKind::SubmitToFinance, no_payload())
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::PermissionDenied(_)));

    let unchanged = fx.service.get_program(&fx.admin, program.id).await.unwrap();
    assert_eq!(unchanged.name, "Water Supply");
    assert_eq!(unchanged.version, program.version);
}

#[tokio::test]
async fn test_create_validates_fields_and_role() {
    let fx = setup().await;
    let svc = &fx.service;

    let blank = NewProgram {
        name: "   ".into(),
        ..water_supply()
    };
    assert!(matches!(
        svc.create_program(&fx.applicant, blank, Vec::new()).await,
        Err(ApprovalError::Validation(_))
    ));

    let no_recipient = NewProgram {
        recipient_name: String::new(),
        ..water_supply()
    };
    assert!(matches!(
        svc.create_program(&fx.applicant, no_recipient, Vec::new()).await,
        Err(ApprovalError::Validation(_))
    ));

    assert!(matches!(
        svc.create_program(&fx.finance, water_supply(), Vec::new()).await,
        Err(ApprovalError::PermissionDenied(_))
    ));

    let by_admin = svc
        .create_program(&fx.admin, water_supply(), Vec::new())
        .await
        .unwrap();
    assert_eq!(by_admin.created_by, fx.admin.id);
    assert_eq!(by_admin.status, ProgramStatus::Draft);
}

#[tokio::test]
async fn test_listing_respects_visibility() {
    let fx = setup().await;
    let mine = fx.draft().await;
    let theirs = fx
        .service
        .create_program(&fx.other_applicant, water_supply(), Vec::new())
        .await
        .unwrap();

    let own = fx.service.list_programs(&fx.applicant).await.unwrap();
    assert_eq!(own.iter().map(|p| p.id).collect::<Vec<_>>(), vec![mine.id]);

    for staff in [&fx.admin, &fx.finance, &fx.mmk, &fx.assistant] {
        assert_eq!(fx.service.list_programs(staff).await.unwrap().len(), 2);
    }

    assert!(matches!(
        fx.service.get_program(&fx.applicant, theirs.id).await,
        Err(ApprovalError::PermissionDenied(_))
    ));
    assert!(matches!(
        fx.service.get_program(&fx.applicant, 9_999).await,
        Err(ApprovalError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_edit_windows_per_role() {
    let fx = setup().await;
    let svc = &fx.service;
    let rename = |name: &str| ProgramChanges {
        name: Some(name.into()),
        ..Default::default()
    };

    // Owner edits while under review.
    let program = fx.submitted().await;
    let edited = svc
        .edit_program(&fx.applicant, program.id, rename("Water Supply II"), Vec::new())
        .await
        .unwrap();
    assert_eq!(edited.name, "Water Supply II");
    assert_eq!(edited.updated_by, Some(fx.applicant.id));
    assert_eq!(edited.version, program.version + 1);
    assert_eq!(edited.status, ProgramStatus::UnderReviewFinance);

    // Assistant may not edit outside `query`.
    assert!(matches!(
        svc.edit_program(&fx.assistant, program.id, rename("x"), Vec::new()).await,
        Err(ApprovalError::PermissionDenied(_))
    ));

    // ...but may while the program is queried.
    svc.add_query(&fx.finance, program.id, "Fix the recipient").await.unwrap();
    let fixed = svc
        .edit_program(
            &fx.assistant,
            program.id,
            ProgramChanges {
                recipient_name: Some("Village B".into()),
                budget: Some("15000.50".parse::<Budget>().unwrap()),
                exco_reference: Some(Some("EXCO/2024/17".into())),
                ..Default::default()
            },
            Vec::new(),
        )
        .await
        .unwrap();
    assert_eq!(fixed.recipient_name, "Village B");
    assert_eq!(fixed.budget.minor_units(), 1_500_050);
    assert_eq!(fixed.exco_reference.as_deref(), Some("EXCO/2024/17"));
    assert_eq!(fixed.status, ProgramStatus::Query);

    // Owner is locked out once finance signs off; the administrator is not.
    let completed = fx.completed().await;
    assert!(matches!(
        svc.edit_program(&fx.applicant, completed.id, rename("late"), Vec::new()).await,
        Err(ApprovalError::PermissionDenied(_))
    ));
    let by_admin = svc
        .edit_program(&fx.admin, completed.id, rename("admin fix"), Vec::new())
        .await
        .unwrap();
    assert_eq!(by_admin.name, "admin fix");

    // Clearing the reference and rejecting empty edits.
    let cleared = svc
        .edit_program(
            &fx.admin,
            program.id,
            ProgramChanges {
                exco_reference: Some(None),
                ..Default::default()
            },
            Vec::new(),
        )
        .await
        .unwrap();
    assert_eq!(cleared.exco_reference, None);
    assert!(matches!(
        svc.edit_program(&fx.admin, program.id, ProgramChanges::default(), Vec::new()).await,
        Err(ApprovalError::Validation(_))
    ));
}

#[tokio::test]
async fn test_delete_windows() {
    let fx = setup().await;
    let svc = &fx.service;

    let draft = fx.draft().await;
    assert!(matches!(
        svc.delete_program(&fx.other_applicant, draft.id).await,
        Err(ApprovalError::PermissionDenied(_))
    ));
    assert!(matches!(
        svc.delete_program(&fx.finance, draft.id).await,
        Err(ApprovalError::PermissionDenied(_))
    ));
    svc.delete_program(&fx.applicant, draft.id).await.unwrap();
    assert!(matches!(
        svc.get_program(&fx.admin, draft.id).await,
        Err(ApprovalError::NotFound(_))
    ));

    let completed = fx.completed().await;
    assert!(matches!(
        svc.delete_program(&fx.applicant, completed.id).await,
        Err(ApprovalError::PermissionDenied(_))
    ));

    let approved = fx.approved_by_mmk().await;
    fx.step(&fx.finance, approved.id, TransitionKind::FinalApprove, payment("V", "E"))
        .await;
    svc.delete_program(&fx.admin, approved.id).await.unwrap();
    assert!(matches!(
        svc.get_payment(approved.id).await,
        Err(ApprovalError::NotFound(_))
    ));
    assert!(matches!(
        svc.delete_program(&fx.admin, approved.id).await,
        Err(ApprovalError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_reject_is_terminal() {
    let fx = setup().await;
    let program = fx.submitted().await;
    let program = fx
        .step(&fx.mmk, program.id, TransitionKind::Reject, no_payload())
        .await;
    assert_eq!(program.status, ProgramStatus::Rejected);

    for (actor, kind, payload) in [
        (&fx.finance, TransitionKind::Complete, no_payload()),
        (&fx.finance, TransitionKind::RaiseQuery, text("why")),
        (&fx.finance, TransitionKind::Reject, no_payload()),
        (&fx.applicant, TransitionKind::SubmitToFinance, no_payload()),
    ] {
        let err = fx
            .service
            .transition(actor, program.id, kind, payload)
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::PermissionDenied(_)), "{kind}: {err}");
    }
    let timeline = fx.service.program_timeline(&fx.admin, program.id).await.unwrap();
    assert_valid_walk(&timeline);
    assert_eq!(timeline.last().unwrap().to_status, ProgramStatus::Rejected);
}

#[tokio::test]
async fn test_no_shortcut_from_draft() {
    let fx = setup().await;
    let program = fx.draft().await;
    for (actor, kind) in [
        (&fx.finance, TransitionKind::Complete),
        (&fx.mmk, TransitionKind::ApproveByMmk),
        (&fx.applicant, TransitionKind::SubmitToMmk),
        (&fx.finance, TransitionKind::Reject),
    ] {
        assert!(fx
            .service
            .transition(actor, program.id, kind, payment("V", "E"))
            .await
            .is_err());
    }
    let err = fx
        .service
        .transition(&fx.finance, program.id, TransitionKind::FinalApprove, payment("V", "E"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::PermissionDenied(_)));
    assert_eq!(
        fx.service.get_program(&fx.admin, program.id).await.unwrap().status,
        ProgramStatus::Draft
    );
    assert!(fx
        .service
        .program_timeline(&fx.admin, program.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_stale_expected_version_conflicts() {
    let fx = setup().await;
    let program = fx.submitted().await;
    let stale = TransitionPayload {
        expected_version: Some(program.version - 1),
        ..Default::default()
    };
    let err = fx
        .service
        .transition(&fx.finance, program.id, TransitionKind::Reject, stale)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApprovalError::ConflictingTransition { program_id } if program_id == program.id
    ));

    let current = TransitionPayload {
        expected_version: Some(program.version),
        ..Default::default()
    };
    let rejected = fx
        .service
        .transition(&fx.finance, program.id, TransitionKind::Reject, current)
        .await
        .unwrap();
    assert_eq!(rejected.version, program.version + 1);
}

#[tokio::test]
async fn test_unknown_program_is_not_found() {
    let fx = setup().await;
    let err = fx
        .service
        .transition(&fx.finance, 404, TransitionKind::Complete, no_payload())
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::NotFound(_)));
}
