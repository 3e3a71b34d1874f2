//! Document linker.
//!
//! Associates a document with a matter while enforcing client-ownership
//! consistency: a document may only be linked to a matter of its own client.

use uuid::Uuid;

use crate::db::{Database, DocumentRecord, LinkDocumentOutcome};
use crate::error::LedgerError;

/// Attach a document to a matter of the same client.
pub async fn link_document(
    db: &dyn Database,
    document_id: Uuid,
    matter_id: Uuid,
) -> Result<DocumentRecord, LedgerError> {
    match db.link_document(document_id, matter_id).await? {
        LinkDocumentOutcome::Linked(document) => Ok(document),
        LinkDocumentOutcome::DocumentNotFound => Err(LedgerError::not_found("document", document_id)),
        LinkDocumentOutcome::MatterNotFound => Err(LedgerError::not_found("matter", matter_id)),
        LinkDocumentOutcome::OwnershipMismatch {
            document_client,
            matter_client,
        } => Err(LedgerError::OwnershipMismatch {
            record_client: document_client,
            matter_client,
        }),
    }
}

/// Clear a document's matter reference. The document row and its stored file
/// are left untouched.
pub async fn unlink_document(
    db: &dyn Database,
    document_id: Uuid,
) -> Result<DocumentRecord, LedgerError> {
    db.unlink_document(document_id)
        .await?
        .ok_or_else(|| LedgerError::not_found("document", document_id))
}
