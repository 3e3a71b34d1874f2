//! Safe and forced deletion against the embedded libSQL backend.

use chrono::{NaiveDate, TimeZone, Utc};
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use uuid::Uuid;

use chancery::config::OfficeConfig;
use chancery::db::libsql::LibSqlBackend;
use chancery::db::{
    AppointmentStatus, BillingStore, CascadeStore, ClientRecord, ClientStore,
    CreateAppointmentParams, CreateClientParams, CreateDocumentParams, CreateMatterParams,
    Database, DocumentRecord, DocumentStore, EntityRef, InvoiceRecord, MatterRecord, MatterStatus,
    MatterStore, PaymentMethod, RecordPaymentParams,
};
use chancery::error::LedgerError;
use chancery::files::LocalFiles;
use chancery::ledger::{
    Capability, CapabilitySet, CreateInvoiceInput, add_payment, create_invoice, force_delete,
    safe_delete,
};

struct Office {
    _dir: tempfile::TempDir,
    db: LibSqlBackend,
    files: LocalFiles,
    uploads: std::path::PathBuf,
}

async fn setup() -> Office {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = LibSqlBackend::new_local(dir.path().join("test.db"))
        .await
        .expect("open database");
    db.run_migrations().await.expect("migrations");
    let uploads = dir.path().join("uploads");
    std::fs::create_dir_all(&uploads).expect("uploads dir");
    let files = LocalFiles::new(&uploads);
    Office {
        _dir: dir,
        db,
        files,
        uploads,
    }
}

fn force_caps() -> CapabilitySet {
    CapabilitySet::new().grant(Capability::ForceDelete)
}

async fn seed_client(db: &dyn Database, name: &str) -> ClientRecord {
    db.create_client(&CreateClientParams {
        name: name.to_string(),
        ..Default::default()
    })
    .await
    .expect("create client")
}

async fn seed_matter(db: &dyn Database, client_id: Uuid, number: &str) -> MatterRecord {
    db.create_matter(&CreateMatterParams {
        matter_number: number.to_string(),
        title: format!("Matter {number}"),
        description: None,
        client_id,
        responsible_user: "rashid".to_string(),
        status: MatterStatus::Active,
        opened_on: NaiveDate::from_ymd_opt(2026, 1, 10).expect("date"),
        next_hearing: None,
    })
    .await
    .expect("create matter")
}

async fn seed_appointment(db: &dyn Database, client_id: Option<Uuid>, matter_id: Option<Uuid>) {
    db.create_appointment(&CreateAppointmentParams {
        title: "Hearing prep".to_string(),
        description: None,
        owner: "rashid".to_string(),
        client_id,
        matter_id,
        starts_at: Utc.with_ymd_and_hms(2026, 4, 2, 10, 0, 0).single().expect("ts"),
        ends_at: Utc.with_ymd_and_hms(2026, 4, 2, 11, 0, 0).single().expect("ts"),
        location: None,
        status: AppointmentStatus::Scheduled,
        notes: None,
    })
    .await
    .expect("create appointment");
}

async fn seed_invoice(
    db: &dyn Database,
    client_id: Uuid,
    matter_id: Option<Uuid>,
) -> InvoiceRecord {
    create_invoice(
        db,
        &OfficeConfig::default(),
        &CreateInvoiceInput {
            client_id,
            matter_id,
            base_amount: dec!(100),
            tax_rate: dec!(0.15),
            issued_on: Some(NaiveDate::from_ymd_opt(2026, 2, 1).expect("date")),
            due_on: NaiveDate::from_ymd_opt(2026, 3, 1).expect("date"),
            notes: None,
        },
    )
    .await
    .expect("create invoice")
}

async fn seed_document(
    office: &Office,
    client_id: Uuid,
    matter_id: Option<Uuid>,
    file_ref: &str,
) -> DocumentRecord {
    std::fs::write(office.uploads.join(file_ref), b"scanned contract").expect("stored file");
    office
        .db
        .create_document(&CreateDocumentParams {
            client_id,
            matter_id,
            file_ref: file_ref.to_string(),
            original_filename: "contract.pdf".to_string(),
            doc_type: Some("contract".to_string()),
            description: None,
            confidential: false,
        })
        .await
        .expect("create document")
}

fn settle(amount: rust_decimal::Decimal) -> RecordPaymentParams {
    RecordPaymentParams {
        amount,
        method: PaymentMethod::Cash,
        reference: None,
        notes: None,
        paid_at: Utc.with_ymd_and_hms(2026, 2, 14, 9, 0, 0).single().expect("ts"),
    }
}

#[tokio::test]
async fn safe_delete_reports_dependents_and_changes_nothing() {
    let office = setup().await;
    let client = seed_client(&office.db, "Haya Trading").await;
    let matter = seed_matter(&office.db, client.id, "C-100").await;
    seed_appointment(&office.db, Some(client.id), None).await;
    seed_appointment(&office.db, None, Some(matter.id)).await;
    seed_invoice(&office.db, client.id, Some(matter.id)).await;
    seed_document(&office, client.id, None, "scan-1.pdf").await;

    let err = safe_delete(&office.db, &office.files, &EntityRef::Client(client.id))
        .await
        .expect_err("dependents must block the delete");
    match err {
        LedgerError::HasDependents(counts) => {
            assert_eq!(counts.matters, 1);
            assert_eq!(counts.appointments, 2);
            assert_eq!(counts.invoices, 1);
            assert_eq!(counts.documents, 1);
            assert_eq!(counts.payments, 0);
        }
        other => panic!("expected HasDependents, got {other}"),
    }

    // Nothing was touched.
    assert!(office.db.get_client(client.id).await.expect("get").is_some());
    assert!(office.db.get_matter(matter.id).await.expect("get").is_some());
    assert!(office.uploads.join("scan-1.pdf").exists());
}

#[tokio::test]
async fn safe_delete_removes_leaves_and_their_files() {
    let office = setup().await;
    let client = seed_client(&office.db, "Haya Trading").await;
    let document = seed_document(&office, client.id, None, "scan-2.pdf").await;

    safe_delete(&office.db, &office.files, &EntityRef::Document(document.id))
        .await
        .expect("leaf delete");
    assert!(
        office
            .db
            .get_document(document.id)
            .await
            .expect("get")
            .is_none()
    );
    assert!(!office.uploads.join("scan-2.pdf").exists());

    let err = safe_delete(&office.db, &office.files, &EntityRef::Document(document.id))
        .await
        .expect_err("already gone");
    assert!(matches!(err, LedgerError::NotFound { .. }));
}

#[tokio::test]
async fn safe_delete_blocks_invoice_with_payments() {
    let office = setup().await;
    let client = seed_client(&office.db, "Haya Trading").await;
    let invoice = seed_invoice(&office.db, client.id, None).await;
    add_payment(&office.db, invoice.id, &settle(dec!(15)))
        .await
        .expect("payment");

    let err = safe_delete(&office.db, &office.files, &EntityRef::Invoice(invoice.id))
        .await
        .expect_err("payments must block the delete");
    match err {
        LedgerError::HasDependents(counts) => assert_eq!(counts.payments, 1),
        other => panic!("expected HasDependents, got {other}"),
    }
}

#[tokio::test]
async fn force_delete_removes_the_whole_closure() {
    let office = setup().await;
    let client = seed_client(&office.db, "Haya Trading").await;
    let matter = seed_matter(&office.db, client.id, "C-100").await;
    seed_appointment(&office.db, Some(client.id), None).await;
    seed_appointment(&office.db, Some(client.id), Some(matter.id)).await;
    let invoice = seed_invoice(&office.db, client.id, Some(matter.id)).await;
    add_payment(&office.db, invoice.id, &settle(dec!(15)))
        .await
        .expect("first payment");
    add_payment(&office.db, invoice.id, &settle(dec!(100)))
        .await
        .expect("second payment");
    let document = seed_document(&office, client.id, Some(matter.id), "scan-3.pdf").await;

    let deleted = force_delete(
        &office.db,
        &office.files,
        &force_caps(),
        &EntityRef::Client(client.id),
    )
    .await
    .expect("forced delete");
    assert_eq!(deleted.matters, 1);
    assert_eq!(deleted.appointments, 2);
    assert_eq!(deleted.invoices, 1);
    assert_eq!(deleted.payments, 2);
    assert_eq!(deleted.documents, 1);

    assert!(office.db.get_client(client.id).await.expect("get").is_none());
    assert!(office.db.get_matter(matter.id).await.expect("get").is_none());
    assert!(
        office
            .db
            .get_invoice(invoice.id)
            .await
            .expect("get")
            .is_none()
    );
    assert!(
        office
            .db
            .get_document(document.id)
            .await
            .expect("get")
            .is_none()
    );
    assert!(
        office
            .db
            .list_payments(invoice.id)
            .await
            .expect("list")
            .is_empty()
    );
    assert!(!office.uploads.join("scan-3.pdf").exists());
}

#[tokio::test]
async fn force_delete_requires_the_capability() {
    let office = setup().await;
    let client = seed_client(&office.db, "Haya Trading").await;

    let err = force_delete(
        &office.db,
        &office.files,
        &CapabilitySet::new(),
        &EntityRef::Client(client.id),
    )
    .await
    .expect_err("capability is required");
    assert!(matches!(err, LedgerError::Forbidden(_)));
    assert!(office.db.get_client(client.id).await.expect("get").is_some());
}

#[tokio::test]
async fn stale_cascade_plan_rolls_back_completely() {
    let office = setup().await;
    let client = seed_client(&office.db, "Haya Trading").await;
    let invoice = seed_invoice(&office.db, client.id, None).await;

    // Plan the closure, then record a payment the plan knows nothing about.
    let plan = office
        .db
        .collect_closure(&EntityRef::Client(client.id))
        .await
        .expect("collect")
        .expect("client exists");
    add_payment(&office.db, invoice.id, &settle(dec!(15)))
        .await
        .expect("late payment");

    // Deleting the invoice would orphan the new payment; the foreign key
    // aborts the transaction and nothing is deleted.
    office
        .db
        .execute_closure(&plan)
        .await
        .expect_err("stale plan must fail");

    assert!(office.db.get_client(client.id).await.expect("get").is_some());
    assert!(
        office
            .db
            .get_invoice(invoice.id)
            .await
            .expect("get")
            .is_some()
    );
    assert_eq!(
        office.db.list_payments(invoice.id).await.expect("list").len(),
        1
    );
}

#[tokio::test]
async fn force_delete_of_missing_record_is_not_found() {
    let office = setup().await;
    let err = force_delete(
        &office.db,
        &office.files,
        &force_caps(),
        &EntityRef::Matter(Uuid::new_v4()),
    )
    .await
    .expect_err("nothing to delete");
    assert!(matches!(err, LedgerError::NotFound { .. }));
}
