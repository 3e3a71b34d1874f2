//! Cascade deletion planner.
//!
//! Two entry points over the dependency graph
//! Client → Matter → {Appointment, Invoice → Payment, Document}:
//!
//! - `safe_delete` refuses to remove anything that still has direct
//!   dependents and reports their counts.
//! - `force_delete` removes the full transitive closure in one atomic
//!   transaction, leaf to root, then releases the stored files of deleted
//!   documents best-effort.

use crate::db::{Database, DependentCounts, EntityRef, SafeDeleteOutcome};
use crate::error::LedgerError;
use crate::files::FileStorage;
use crate::ledger::capability::{Capability, CapabilitySet};

/// Delete `entity` only if nothing depends on it.
///
/// Blocked deletions report per-kind dependent counts and leave the store
/// untouched. A deleted document's stored file is released afterwards,
/// best-effort.
pub async fn safe_delete(
    db: &dyn Database,
    files: &dyn FileStorage,
    entity: &EntityRef,
) -> Result<(), LedgerError> {
    match db.safe_delete(entity).await? {
        SafeDeleteOutcome::Deleted { file_refs } => {
            release_stored_files(files, &file_refs).await;
            Ok(())
        }
        SafeDeleteOutcome::NotFound => Err(LedgerError::not_found(entity.kind(), entity.id())),
        SafeDeleteOutcome::Blocked(counts) => Err(LedgerError::HasDependents(counts)),
    }
}

/// Delete `entity` together with its whole dependency closure.
///
/// Requires `Capability::ForceDelete`, supplied by the caller. The closure is
/// removed in strict leaf-to-root order inside one transaction; any failure
/// rolls the whole thing back and surfaces as `DeletionFailed`. Stored files
/// are released only after the commit, so a storage failure can never corrupt
/// the database.
pub async fn force_delete(
    db: &dyn Database,
    files: &dyn FileStorage,
    capabilities: &CapabilitySet,
    entity: &EntityRef,
) -> Result<DependentCounts, LedgerError> {
    if !capabilities.has(Capability::ForceDelete) {
        return Err(LedgerError::Forbidden(Capability::ForceDelete));
    }

    let plan = db
        .collect_closure(entity)
        .await?
        .ok_or_else(|| LedgerError::not_found(entity.kind(), entity.id()))?;

    tracing::debug!(
        "forced delete of {} {} covers {} rows",
        entity.kind(),
        entity.id(),
        plan.row_count()
    );

    let deleted = db
        .execute_closure(&plan)
        .await
        .map_err(|e| LedgerError::DeletionFailed(e.to_string()))?;

    release_stored_files(files, &plan.file_refs).await;
    Ok(deleted)
}

/// Ask the file-storage collaborator to drop each stored file, logging
/// failures instead of propagating them.
async fn release_stored_files(files: &dyn FileStorage, file_refs: &[String]) {
    for file_ref in file_refs {
        if let Err(e) = files.delete_stored_file(file_ref).await {
            tracing::warn!("Failed to delete stored file '{}': {}", file_ref, e);
        }
    }
}
