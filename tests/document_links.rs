//! Document-to-matter linking against the embedded libSQL backend.

use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use uuid::Uuid;

use chancery::db::libsql::LibSqlBackend;
use chancery::db::{
    ClientRecord, CreateClientParams, CreateDocumentParams, CreateMatterParams, Database,
    DocumentRecord, MatterRecord, MatterStatus,
};
use chancery::error::LedgerError;
use chancery::ledger::{link_document, unlink_document};

async fn setup() -> (tempfile::TempDir, LibSqlBackend) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = LibSqlBackend::new_local(dir.path().join("test.db"))
        .await
        .expect("open database");
    db.run_migrations().await.expect("migrations");
    (dir, db)
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

async fn seed_document(db: &dyn Database, client_id: Uuid) -> DocumentRecord {
    db.create_document(&CreateDocumentParams {
        client_id,
        matter_id: None,
        file_ref: "scan.pdf".to_string(),
        original_filename: "scan.pdf".to_string(),
        doc_type: None,
        description: None,
        confidential: true,
    })
    .await
    .expect("create document")
}

#[tokio::test]
async fn linking_requires_matching_client() {
    let (_dir, db) = setup().await;
    let owner = seed_client(&db, "Owner").await;
    let other = seed_client(&db, "Other").await;
    let owners_matter = seed_matter(&db, owner.id, "C-100").await;
    let others_matter = seed_matter(&db, other.id, "C-200").await;
    let document = seed_document(&db, owner.id).await;

    let err = link_document(&db, document.id, others_matter.id)
        .await
        .expect_err("cross-client link must be rejected");
    match err {
        LedgerError::OwnershipMismatch {
            record_client,
            matter_client,
        } => {
            assert_eq!(record_client, owner.id);
            assert_eq!(matter_client, other.id);
        }
        other => panic!("expected OwnershipMismatch, got {other}"),
    }

    let linked = link_document(&db, document.id, owners_matter.id)
        .await
        .expect("same-client link");
    assert_eq!(linked.matter_id, Some(owners_matter.id));
}

#[tokio::test]
async fn unlinking_clears_the_matter_only() {
    let (_dir, db) = setup().await;
    let client = seed_client(&db, "Owner").await;
    let matter = seed_matter(&db, client.id, "C-100").await;
    let document = seed_document(&db, client.id).await;
    link_document(&db, document.id, matter.id)
        .await
        .expect("link");

    let unlinked = unlink_document(&db, document.id).await.expect("unlink");
    assert_eq!(unlinked.matter_id, None);
    assert_eq!(unlinked.file_ref, "scan.pdf");
    assert!(unlinked.confidential);

    let err = link_document(&db, document.id, Uuid::new_v4())
        .await
        .expect_err("unknown matter");
    assert!(matches!(err, LedgerError::NotFound { kind: "matter", .. }));

    let err = unlink_document(&db, Uuid::new_v4())
        .await
        .expect_err("unknown document");
    assert!(matches!(err, LedgerError::NotFound { kind: "document", .. }));
}
