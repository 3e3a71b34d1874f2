//! End-to-end billing flow against the embedded libSQL backend.

use chrono::{NaiveDate, TimeZone, Utc};
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use uuid::Uuid;

use chancery::config::OfficeConfig;
use chancery::db::libsql::LibSqlBackend;
use chancery::db::{
    BillingStore, ClientRecord, CreateClientParams, CreateMatterParams, Database, InvoiceRecord,
    InvoiceStatus, MatterRecord, MatterStatus, PaymentMethod, RecordPaymentParams,
};
use chancery::error::LedgerError;
use chancery::ledger::{
    CreateInvoiceInput, EditInvoiceInput, add_payment, cancel_invoice, create_invoice,
    edit_invoice, remove_payment,
};

async fn setup() -> (tempfile::TempDir, LibSqlBackend) {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = LibSqlBackend::new_local(dir.path().join("test.db"))
        .await
        .expect("open database");
    backend.run_migrations().await.expect("migrations");
    (dir, backend)
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

async fn seed_invoice(db: &dyn Database, office: &OfficeConfig, client_id: Uuid) -> InvoiceRecord {
    create_invoice(
        db,
        office,
        &CreateInvoiceInput {
            client_id,
            matter_id: None,
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

fn payment(amount: rust_decimal::Decimal, hour: u32) -> RecordPaymentParams {
    RecordPaymentParams {
        amount,
        method: PaymentMethod::Transfer,
        reference: None,
        notes: None,
        paid_at: Utc.with_ymd_and_hms(2026, 2, 14, hour, 0, 0).single().expect("ts"),
    }
}

#[tokio::test]
async fn invoice_amounts_and_numbers_are_derived() {
    let (_dir, db) = setup().await;
    let office = OfficeConfig::default();
    let client = seed_client(&db, "Haya Trading").await;

    let first = seed_invoice(&db, &office, client.id).await;
    assert_eq!(first.invoice_number, "INV-0001");
    assert_eq!(first.base_amount, dec!(100.00));
    assert_eq!(first.tax_amount, dec!(15.00));
    assert_eq!(first.total_amount, dec!(115.00));
    assert_eq!(first.status, InvoiceStatus::Pending);
    assert_eq!(first.paid_at, None);

    let second = seed_invoice(&db, &office, client.id).await;
    assert_eq!(second.invoice_number, "INV-0002");
}

#[tokio::test]
async fn invoice_requires_matter_of_same_client() {
    let (_dir, db) = setup().await;
    let office = OfficeConfig::default();
    let owner = seed_client(&db, "Owner").await;
    let other = seed_client(&db, "Other").await;
    let matter = seed_matter(&db, owner.id, "C-100").await;

    let err = create_invoice(
        &db,
        &office,
        &CreateInvoiceInput {
            client_id: other.id,
            matter_id: Some(matter.id),
            base_amount: dec!(50),
            tax_rate: dec!(0.15),
            issued_on: None,
            due_on: NaiveDate::from_ymd_opt(2026, 3, 1).expect("date"),
            notes: None,
        },
    )
    .await
    .expect_err("cross-client invoice must be rejected");
    assert!(matches!(err, LedgerError::OwnershipMismatch { .. }));
}

#[tokio::test]
async fn payments_walk_pending_partial_paid() {
    let (_dir, db) = setup().await;
    let office = OfficeConfig::default();
    let client = seed_client(&db, "Haya Trading").await;
    let invoice = seed_invoice(&db, &office, client.id).await;

    let (after_first, _) = add_payment(&db, invoice.id, &payment(dec!(15), 9))
        .await
        .expect("first payment");
    assert_eq!(after_first.status, InvoiceStatus::Partial);
    assert_eq!(after_first.paid_at, None);

    // One cent over the remaining balance must be rejected outright.
    let err = add_payment(&db, invoice.id, &payment(dec!(100.01), 10))
        .await
        .expect_err("overpayment must be rejected");
    match err {
        LedgerError::Overpayment { amount, remaining } => {
            assert_eq!(amount, dec!(100.01));
            assert_eq!(remaining, dec!(100.00));
        }
        other => panic!("expected Overpayment, got {other}"),
    }

    let (after_second, second) = add_payment(&db, invoice.id, &payment(dec!(100), 14))
        .await
        .expect("settling payment");
    assert_eq!(after_second.status, InvoiceStatus::Paid);
    assert_eq!(after_second.paid_at, Some(second.paid_at));
}

#[tokio::test]
async fn zero_and_negative_payments_are_rejected() {
    let (_dir, db) = setup().await;
    let office = OfficeConfig::default();
    let client = seed_client(&db, "Haya Trading").await;
    let invoice = seed_invoice(&db, &office, client.id).await;

    for amount in [dec!(0), dec!(-5)] {
        let err = add_payment(&db, invoice.id, &payment(amount, 9))
            .await
            .expect_err("non-positive amount must be rejected");
        assert!(matches!(err, LedgerError::InvariantViolation(_)));
    }
}

#[tokio::test]
async fn sub_cent_payment_amounts_are_rejected() {
    let (_dir, db) = setup().await;
    let office = OfficeConfig::default();
    let client = seed_client(&db, "Haya Trading").await;
    let invoice = seed_invoice(&db, &office, client.id).await;

    let err = add_payment(&db, invoice.id, &payment(dec!(10.005), 9))
        .await
        .expect_err("sub-cent amount must be rejected");
    assert!(matches!(err, LedgerError::InvariantViolation(_)));
    assert!(
        db.list_payments(invoice.id)
            .await
            .expect("list payments")
            .is_empty()
    );

    let (after, _) = add_payment(&db, invoice.id, &payment(dec!(10.05), 9))
        .await
        .expect("cent-precise payment");
    assert_eq!(after.status, InvoiceStatus::Partial);
}

#[tokio::test]
async fn removing_a_payment_re_derives_status() {
    let (_dir, db) = setup().await;
    let office = OfficeConfig::default();
    let client = seed_client(&db, "Haya Trading").await;
    let invoice = seed_invoice(&db, &office, client.id).await;

    let (_, first) = add_payment(&db, invoice.id, &payment(dec!(15), 9))
        .await
        .expect("first payment");
    let (paid, _) = add_payment(&db, invoice.id, &payment(dec!(100), 14))
        .await
        .expect("second payment");
    assert_eq!(paid.status, InvoiceStatus::Paid);

    let after_removal = remove_payment(&db, first.id).await.expect("remove payment");
    assert_eq!(after_removal.status, InvoiceStatus::Partial);
    assert_eq!(after_removal.paid_at, None);

    let remaining = db.list_payments(invoice.id).await.expect("list payments");
    let removed_again = remove_payment(&db, remaining[0].id)
        .await
        .expect("remove last payment");
    assert_eq!(removed_again.status, InvoiceStatus::Pending);

    let err = remove_payment(&db, first.id)
        .await
        .expect_err("payment is gone");
    assert!(matches!(err, LedgerError::NotFound { kind: "payment", .. }));
}

#[tokio::test]
async fn cancellation_is_explicit_blocked_by_payments_and_sticky() {
    let (_dir, db) = setup().await;
    let office = OfficeConfig::default();
    let client = seed_client(&db, "Haya Trading").await;

    let cancellable = seed_invoice(&db, &office, client.id).await;
    let cancelled = cancel_invoice(&db, cancellable.id).await.expect("cancel");
    assert_eq!(cancelled.status, InvoiceStatus::Cancelled);

    // Cancelling again is a no-op, and payments bounce off.
    let again = cancel_invoice(&db, cancellable.id).await.expect("idempotent");
    assert_eq!(again.status, InvoiceStatus::Cancelled);
    let err = add_payment(&db, cancellable.id, &payment(dec!(10), 9))
        .await
        .expect_err("cancelled invoices take no payments");
    assert!(matches!(err, LedgerError::InvariantViolation(_)));

    let collected = seed_invoice(&db, &office, client.id).await;
    add_payment(&db, collected.id, &payment(dec!(15), 9))
        .await
        .expect("payment");
    let err = cancel_invoice(&db, collected.id)
        .await
        .expect_err("cancellation is blocked once money arrived");
    assert!(matches!(err, LedgerError::InvariantViolation(_)));
}

#[tokio::test]
async fn editing_an_invoice_cannot_drop_total_below_paid() {
    let (_dir, db) = setup().await;
    let office = OfficeConfig::default();
    let client = seed_client(&db, "Haya Trading").await;
    let invoice = seed_invoice(&db, &office, client.id).await;
    add_payment(&db, invoice.id, &payment(dec!(50), 9))
        .await
        .expect("payment");

    let shrink = EditInvoiceInput {
        base_amount: dec!(30),
        tax_rate: dec!(0),
        matter_id: None,
        issued_on: None,
        due_on: None,
        notes: None,
    };
    let err = edit_invoice(&db, invoice.id, &shrink)
        .await
        .expect_err("total below collected sum must be rejected");
    assert!(matches!(err, LedgerError::InvariantViolation(_)));

    let grow = EditInvoiceInput {
        base_amount: dec!(200),
        tax_rate: dec!(0.15),
        matter_id: None,
        issued_on: None,
        due_on: None,
        notes: None,
    };
    let updated = edit_invoice(&db, invoice.id, &grow).await.expect("edit");
    assert_eq!(updated.total_amount, dec!(230.00));
    assert_eq!(updated.status, InvoiceStatus::Partial);
}

#[tokio::test]
async fn summary_groups_totals_by_status() {
    let (_dir, db) = setup().await;
    let office = OfficeConfig::default();
    let client = seed_client(&db, "Haya Trading").await;

    let _pending = seed_invoice(&db, &office, client.id).await;
    let partial = seed_invoice(&db, &office, client.id).await;
    add_payment(&db, partial.id, &payment(dec!(15), 9))
        .await
        .expect("payment");
    let paid = seed_invoice(&db, &office, client.id).await;
    add_payment(&db, paid.id, &payment(dec!(115), 10))
        .await
        .expect("settling payment");

    let summary = db.billing_summary().await.expect("summary");
    assert_eq!(summary.pending_total, dec!(115.00));
    assert_eq!(summary.partial_total, dec!(115.00));
    assert_eq!(summary.paid_total, dec!(115.00));
    assert_eq!(summary.outstanding_total, dec!(215.00));
}
