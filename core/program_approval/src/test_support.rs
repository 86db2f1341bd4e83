use crate::storage::{init_pool, StoreOptions};
use crate::{
    accounts, Actor, ApprovalService, Budget, DocumentSlot, FileUpload, NewProgram, Program,
    ProgramStatus, Role, SlotUpload, TransitionKind, TransitionPayload,
};

pub(crate) struct Fixture {
    pub service: ApprovalService,
    pub admin: Actor,
    pub applicant: Actor,
    pub other_applicant: Actor,
    pub finance: Actor,
    pub assistant: Actor,
    pub mmk: Actor,
}

pub(crate) async fn setup() -> Fixture {
    let pool = init_pool("sqlite::memory:", &StoreOptions::default())
        .await
        .expect("in-memory pool");
    let user = |name: &'static str, role: Role| {
        let pool = pool.clone();
        async move {
            accounts::create_user(&pool, name, &format!("{name}@example.org"), "pw", role)
                .await
                .expect("create user")
        }
    };
    Fixture {
        admin: user("admin", Role::Administrator).await,
        applicant: user("u1", Role::Applicant).await,
        other_applicant: user("u2", Role::Applicant).await,
        finance: user("finance", Role::FinanceReviewer).await,
        assistant: user("assistant", Role::ProgramAssistant).await,
        mmk: user("mmk", Role::MmkOfficeReviewer).await,
        service: ApprovalService::new(pool),
    }
}

pub(crate) fn water_supply() -> NewProgram {
    NewProgram {
        name: "Water Supply".into(),
        recipient_name: "Village A".into(),
        budget: "12000".parse::<Budget>().expect("budget"),
        exco_reference: None,
    }
}

pub(crate) fn upload(slot: DocumentSlot, name: &str, content: &[u8]) -> SlotUpload {
    SlotUpload {
        slot,
        file: FileUpload::new(name, content.to_vec()),
    }
}

pub(crate) fn no_payload() -> TransitionPayload {
    TransitionPayload::default()
}

pub(crate) fn text(t: &str) -> TransitionPayload {
    TransitionPayload {
        text: Some(t.into()),
        ..Default::default()
    }
}

pub(crate) fn payment(voucher: &str, eft: &str) -> TransitionPayload {
    TransitionPayload {
        voucher_number: Some(voucher.into()),
        eft_number: Some(eft.into()),
        ..Default::default()
    }
}

impl Fixture {
    pub async fn draft(&self) -> Program {
        self.service
            .create_program(&self.applicant, water_supply(), Vec::new())
            .await
            .expect("create")
    }

    pub async fn step(&self, actor: &Actor, id: i64, kind: TransitionKind, payload: TransitionPayload) -> Program {
        self.service
            .transition(actor, id, kind, payload)
            .await
            .unwrap_or_else(|e| panic!("{kind} failed: {e}"))
    }

    /// A program waiting for finance review.
    pub async fn submitted(&self) -> Program {
        let program = self.draft().await;
        self.step(&self.applicant, program.id, TransitionKind::SubmitToFinance, no_payload())
            .await
    }

    /// A program finance has signed off.
    pub async fn completed(&self) -> Program {
        let program = self.submitted().await;
        self.service
            .upload_signed_documents(
                &self.finance,
                program.id,
                vec![upload(DocumentSlot::ProgramLetter, "signed.pdf", b"signed")],
            )
            .await
            .expect("signed upload");
        self.step(&self.finance, program.id, TransitionKind::Complete, no_payload())
            .await
    }

    /// A program awaiting payment.
    pub async fn approved_by_mmk(&self) -> Program {
        let program = self.completed().await;
        self.step(&self.applicant, program.id, TransitionKind::SubmitToMmk, no_payload())
            .await;
        let program = self
            .step(&self.mmk, program.id, TransitionKind::ApproveByMmk, no_payload())
            .await;
        assert_eq!(program.status, ProgramStatus::ApprovedByMmkOffice);
        program
    }
}
