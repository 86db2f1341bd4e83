use proptest::prelude::*;

use crate::invariants::assert_history_newest_first;
use crate::test_support::{setup, upload, water_supply};
use crate::{ApprovalError, DocumentSlot, ProgramChanges, ProgramStatus};

#[tokio::test]
async fn test_overwrites_archive_previous_versions() {
    let fx = setup().await;
    let svc = &fx.service;

    let program = svc
        .create_program(
            &fx.applicant,
            water_supply(),
            vec![upload(DocumentSlot::ExcoLetter, "a.pdf", b"first")],
        )
        .await
        .unwrap();
    assert_eq!(program.documents.len(), 1);
    assert!(svc
        .get_document_history(program.id, DocumentSlot::ExcoLetter)
        .await
        .unwrap()
        .is_empty());

    for (name, content) in [("b.pdf", b"second"), ("c.pdf", b"third!")] {
        svc.edit_program(
            &fx.applicant,
            program.id,
            ProgramChanges::default(),
            vec![upload(DocumentSlot::ExcoLetter, name, content)],
        )
        .await
        .unwrap();
    }

    let current = svc.get_document(program.id, DocumentSlot::ExcoLetter).await.unwrap();
    assert_eq!(current.file_name, "c.pdf");
    assert_eq!(current.content, b"third!");

    let history = svc
        .get_document_history(program.id, DocumentSlot::ExcoLetter)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_history_newest_first(&history);
    assert_eq!(history[0].file_name, "b.pdf");
    assert_eq!(history[1].file_name, "a.pdf");
    assert!(history.iter().all(|h| !h.signed && h.program_id == program.id));
    assert_eq!(history[0].size_bytes, 6);

    let oldest = svc.get_history_file(history[1].id).await.unwrap();
    assert_eq!(oldest.content, b"first");
    assert_eq!(svc.history_program(history[1].id).await.unwrap(), program.id);

    // Other slots are untouched.
    assert!(svc
        .get_document_history(program.id, DocumentSlot::ProgramLetter)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_history_uploader_is_previous_editor() {
    let fx = setup().await;
    let svc = &fx.service;
    let program = svc
        .create_program(
            &fx.applicant,
            water_supply(),
            vec![upload(DocumentSlot::ProgramLetter, "v1.pdf", b"v1")],
        )
        .await
        .unwrap();
    svc.transition(&fx.applicant, program.id, crate::TransitionKind::SubmitToFinance, Default::default())
        .await
        .unwrap();
    svc.add_query(&fx.finance, program.id, "Letter is unsigned").await.unwrap();

    svc.edit_program(
        &fx.assistant,
        program.id,
        ProgramChanges::default(),
        vec![upload(DocumentSlot::ProgramLetter, "v2.pdf", b"v2")],
    )
    .await
    .unwrap();
    svc.edit_program(
        &fx.admin,
        program.id,
        ProgramChanges::default(),
        vec![upload(DocumentSlot::ProgramLetter, "v3.pdf", b"v3")],
    )
    .await
    .unwrap();

    let history = svc
        .get_document_history(program.id, DocumentSlot::ProgramLetter)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    // v2 was superseded after the assistant's edit, v1 before anyone edited.
    assert_eq!(history[0].file_name, "v2.pdf");
    assert_eq!(history[0].uploaded_by, fx.assistant.id);
    assert_eq!(history[0].uploader_name, "assistant");
    assert_eq!(history[1].file_name, "v1.pdf");
    assert_eq!(history[1].uploaded_by, fx.applicant.id);
    assert_eq!(history[1].uploader_name, "u1");
}

#[tokio::test]
async fn test_identical_content_is_stored_once() {
    let fx = setup().await;
    let svc = &fx.service;
    let program = svc
        .create_program(
            &fx.applicant,
            water_supply(),
            vec![
                upload(DocumentSlot::ExcoLetter, "a.pdf", b"same bytes"),
                upload(DocumentSlot::BankAccountManager, "b.pdf", b"same bytes"),
            ],
        )
        .await
        .unwrap();
    assert_eq!(program.documents.len(), 2);
    assert_eq!(program.documents[0].content_hash, program.documents[1].content_hash);

    let (blobs,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM blobs")
        .fetch_one(svc.pool())
        .await
        .unwrap();
    assert_eq!(blobs, 1);
}

#[tokio::test]
async fn test_missing_documents_are_not_found() {
    let fx = setup().await;
    let program = fx.draft().await;

    assert!(matches!(
        fx.service.get_document(program.id, DocumentSlot::CordRegistrationForm).await,
        Err(ApprovalError::NotFound(_))
    ));
    assert!(matches!(
        fx.service.get_document(9_999, DocumentSlot::CordRegistrationForm).await,
        Err(ApprovalError::NotFound(_))
    ));
    assert!(matches!(
        fx.service.get_document_history(9_999, DocumentSlot::CordRegistrationForm).await,
        Err(ApprovalError::NotFound(_))
    ));
    assert!(matches!(
        fx.service.get_history_file(9_999).await,
        Err(ApprovalError::NotFound(_))
    ));
    assert!(matches!(
        fx.service.get_signed_document_set(program.id).await,
        Err(ApprovalError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_invalid_uploads_write_nothing() {
    let fx = setup().await;
    let err = fx
        .service
        .create_program(
            &fx.applicant,
            water_supply(),
            vec![
                upload(DocumentSlot::ExcoLetter, "a.pdf", b"ok"),
                upload(DocumentSlot::BankAccountManager, "empty.pdf", b""),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::Validation(_)));
    assert!(fx.service.list_programs(&fx.admin).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_signed_documents_keep_their_own_history() {
    let fx = setup().await;
    let svc = &fx.service;
    let program = fx.submitted().await;

    assert!(matches!(
        svc.upload_signed_documents(
            &fx.applicant,
            program.id,
            vec![upload(DocumentSlot::ExcoLetter, "s.pdf", b"s")],
        )
        .await,
        Err(ApprovalError::PermissionDenied(_))
    ));
    assert!(matches!(
        svc.upload_signed_documents(
            &fx.finance,
            program.id,
            vec![upload(DocumentSlot::UpdatedDocument, "s.pdf", b"s")],
        )
        .await,
        Err(ApprovalError::Validation(_))
    ));
    assert!(matches!(
        svc.upload_signed_documents(&fx.finance, program.id, Vec::new()).await,
        Err(ApprovalError::Validation(_))
    ));

    let set = svc
        .upload_signed_documents(
            &fx.finance,
            program.id,
            vec![
                upload(DocumentSlot::ExcoLetter, "exco-signed-1.pdf", b"signed v1"),
                upload(DocumentSlot::BankAccountManager, "bank-signed.pdf", b"bank"),
            ],
        )
        .await
        .unwrap();
    assert_eq!(set.created_by, fx.finance.id);
    assert_eq!(set.documents.len(), 2);

    let set = svc
        .upload_signed_documents(
            &fx.finance,
            program.id,
            vec![upload(DocumentSlot::ExcoLetter, "exco-signed-2.pdf", b"signed v2")],
        )
        .await
        .unwrap();
    assert_eq!(set.documents.len(), 2);

    let current = svc
        .get_signed_document(program.id, DocumentSlot::ExcoLetter)
        .await
        .unwrap();
    assert_eq!(current.content, b"signed v2");

    let signed_history = svc
        .get_signed_document_history(program.id, DocumentSlot::ExcoLetter)
        .await
        .unwrap();
    assert_eq!(signed_history.len(), 1);
    assert!(signed_history[0].signed);
    assert_eq!(signed_history[0].file_name, "exco-signed-1.pdf");
    assert_eq!(signed_history[0].uploaded_by, fx.finance.id);

    // The applicant's slot has no history of its own.
    assert!(svc
        .get_document_history(program.id, DocumentSlot::ExcoLetter)
        .await
        .unwrap()
        .is_empty());
    assert!(matches!(
        svc.get_signed_document(program.id, DocumentSlot::CordRegistrationForm).await,
        Err(ApprovalError::NotFound(_))
    ));

    // Still under review; signing alone does not move the program.
    assert_eq!(
        svc.get_program(&fx.finance, program.id).await.unwrap().status,
        ProgramStatus::UnderReviewFinance
    );
}

#[tokio::test]
async fn test_delete_drops_documents_and_history() {
    let fx = setup().await;
    let svc = &fx.service;
    let program = svc
        .create_program(
            &fx.applicant,
            water_supply(),
            vec![upload(DocumentSlot::ExcoLetter, "a.pdf", b"a")],
        )
        .await
        .unwrap();
    svc.edit_program(
        &fx.applicant,
        program.id,
        ProgramChanges::default(),
        vec![upload(DocumentSlot::ExcoLetter, "b.pdf", b"b")],
    )
    .await
    .unwrap();
    let history = svc
        .get_document_history(program.id, DocumentSlot::ExcoLetter)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);

    svc.delete_program(&fx.applicant, program.id).await.unwrap();
    assert!(matches!(
        svc.get_history_file(history[0].id).await,
        Err(ApprovalError::NotFound(_))
    ));
}

async fn blob_count(svc: &crate::ApprovalService) -> i64 {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM blobs")
        .fetch_one(svc.pool())
        .await
        .unwrap();
    count
}

#[tokio::test]
async fn test_delete_releases_unreferenced_blobs() {
    let fx = setup().await;
    let svc = &fx.service;
    let keep = svc
        .create_program(
            &fx.other_applicant,
            water_supply(),
            vec![upload(DocumentSlot::ProgramLetter, "shared.pdf", b"shared")],
        )
        .await
        .unwrap();
    let doomed = svc
        .create_program(
            &fx.applicant,
            water_supply(),
            vec![
                upload(DocumentSlot::ExcoLetter, "a.pdf", b"exco v1"),
                upload(DocumentSlot::ProgramLetter, "shared.pdf", b"shared"),
            ],
        )
        .await
        .unwrap();
    svc.edit_program(
        &fx.applicant,
        doomed.id,
        ProgramChanges::default(),
        vec![upload(DocumentSlot::ExcoLetter, "b.pdf", b"exco v2")],
    )
    .await
    .unwrap();
    assert_eq!(blob_count(svc).await, 3);

    svc.delete_program(&fx.applicant, doomed.id).await.unwrap();
    assert_eq!(blob_count(svc).await, 1);
    let survivor = svc
        .get_document(keep.id, DocumentSlot::ProgramLetter)
        .await
        .unwrap();
    assert_eq!(survivor.content, b"shared");

    svc.delete_program(&fx.admin, keep.id).await.unwrap();
    assert_eq!(blob_count(svc).await, 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// N uploads to one slot leave N-1 history records, newest first, each
    /// holding the content it replaced.
    #[test]
    fn overwrite_history_tracks_every_version(
        contents in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..32), 1..6)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let fx = setup().await;
            let svc = &fx.service;
            let first = upload(DocumentSlot::CordRegistrationForm, "v0.pdf", &contents[0]);
            let program = svc
                .create_program(&fx.applicant, water_supply(), vec![first])
                .await
                .unwrap();
            for (i, content) in contents.iter().enumerate().skip(1) {
                svc.edit_program(
                    &fx.applicant,
                    program.id,
                    ProgramChanges::default(),
                    vec![upload(DocumentSlot::CordRegistrationForm, &format!("v{i}.pdf"), content)],
                )
                .await
                .unwrap();
            }

            let history = svc
                .get_document_history(program.id, DocumentSlot::CordRegistrationForm)
                .await
                .unwrap();
            assert_eq!(history.len(), contents.len() - 1);
            assert_history_newest_first(&history);
            for (record, expected) in history.iter().zip(contents.iter().rev().skip(1)) {
                let file = svc.get_history_file(record.id).await.unwrap();
                assert_eq!(&file.content, expected);
            }
            let current = svc.get_document(program.id, DocumentSlot::CordRegistrationForm).await.unwrap();
            assert_eq!(Some(&current.content), contents.last());
        });
    }
}
