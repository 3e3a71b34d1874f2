//! Deletion planner queries for the libSQL backend.

use libsql::params;
use uuid::Uuid;

use crate::db::{CascadePlan, CascadeStore, DependentCounts, EntityRef, SafeDeleteOutcome};
use crate::error::DatabaseError;

use super::{LibSqlBackend, get_i64, get_text, parse_uuid};

/// Table name of a root entity kind.
fn root_table(entity: &EntityRef) -> &'static str {
    match entity {
        EntityRef::Client(_) => "clients",
        EntityRef::Matter(_) => "matters",
        EntityRef::Invoice(_) => "invoices",
        EntityRef::Appointment(_) => "appointments",
        EntityRef::Document(_) => "documents",
    }
}

fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn id_values(ids: &[Uuid]) -> Vec<libsql::Value> {
    ids.iter()
        .map(|id| libsql::Value::Text(id.to_string()))
        .collect()
}

async fn count_rows(
    conn: &libsql::Connection,
    sql: &str,
    id: Uuid,
) -> Result<u64, DatabaseError> {
    let row = conn
        .query(sql, params![id.to_string()])
        .await?
        .next()
        .await?
        .ok_or_else(|| DatabaseError::Query("count query returned no row".to_string()))?;
    Ok(u64::try_from(get_i64(&row, 0)).unwrap_or(0))
}

async fn collect_ids(
    conn: &libsql::Connection,
    sql: &str,
    values: Vec<libsql::Value>,
    field: &str,
) -> Result<Vec<Uuid>, DatabaseError> {
    let mut rows = conn.query(sql, values).await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(parse_uuid(&get_text(&row, 0), field)?);
    }
    Ok(out)
}

/// Delete the listed rows, skipping empty lists, and return the count.
async fn delete_by_ids(
    conn: &libsql::Connection,
    table: &str,
    ids: &[Uuid],
) -> Result<u64, DatabaseError> {
    if ids.is_empty() {
        return Ok(0);
    }
    let affected = conn
        .execute(
            &format!(
                "DELETE FROM {table} WHERE id IN ({})",
                placeholders(ids.len())
            ),
            id_values(ids),
        )
        .await?;
    Ok(affected)
}

#[async_trait::async_trait]
impl CascadeStore for LibSqlBackend {
    async fn safe_delete(&self, entity: &EntityRef) -> Result<SafeDeleteOutcome, DatabaseError> {
        let conn = self.connect().await?;
        let table = root_table(entity);
        let id = entity.id();

        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result = async {
            let mut file_refs: Vec<String> = Vec::new();
            let exists = match entity {
                EntityRef::Document(_) => {
                    let row = conn
                        .query(
                            "SELECT file_ref FROM documents WHERE id = ?1 LIMIT 1",
                            params![id.to_string()],
                        )
                        .await?
                        .next()
                        .await?;
                    match row {
                        Some(row) => {
                            file_refs.push(get_text(&row, 0));
                            true
                        }
                        None => false,
                    }
                }
                _ => conn
                    .query(
                        &format!("SELECT id FROM {table} WHERE id = ?1 LIMIT 1"),
                        params![id.to_string()],
                    )
                    .await?
                    .next()
                    .await?
                    .is_some(),
            };
            if !exists {
                return Ok(SafeDeleteOutcome::NotFound);
            }

            let mut counts = DependentCounts::default();
            match entity {
                EntityRef::Client(_) => {
                    counts.matters = count_rows(
                        &conn,
                        "SELECT COUNT(*) FROM matters WHERE client_id = ?1",
                        id,
                    )
                    .await?;
                    counts.appointments = count_rows(
                        &conn,
                        "SELECT COUNT(*) FROM appointments WHERE client_id = ?1",
                        id,
                    )
                    .await?;
                    counts.invoices = count_rows(
                        &conn,
                        "SELECT COUNT(*) FROM invoices WHERE client_id = ?1",
                        id,
                    )
                    .await?;
                    counts.documents = count_rows(
                        &conn,
                        "SELECT COUNT(*) FROM documents WHERE client_id = ?1",
                        id,
                    )
                    .await?;
                }
                EntityRef::Matter(_) => {
                    counts.appointments = count_rows(
                        &conn,
                        "SELECT COUNT(*) FROM appointments WHERE matter_id = ?1",
                        id,
                    )
                    .await?;
                    counts.invoices = count_rows(
                        &conn,
                        "SELECT COUNT(*) FROM invoices WHERE matter_id = ?1",
                        id,
                    )
                    .await?;
                    counts.documents = count_rows(
                        &conn,
                        "SELECT COUNT(*) FROM documents WHERE matter_id = ?1",
                        id,
                    )
                    .await?;
                }
                EntityRef::Invoice(_) => {
                    counts.payments = count_rows(
                        &conn,
                        "SELECT COUNT(*) FROM payments WHERE invoice_id = ?1",
                        id,
                    )
                    .await?;
                }
                // Leaves of the dependency graph.
                EntityRef::Appointment(_) | EntityRef::Document(_) => {}
            }

            if !counts.is_empty() {
                return Ok(SafeDeleteOutcome::Blocked(counts));
            }

            conn.execute(
                &format!("DELETE FROM {table} WHERE id = ?1"),
                params![id.to_string()],
            )
            .await?;
            Ok(SafeDeleteOutcome::Deleted { file_refs })
        }
        .await;

        match result {
            Ok(outcome) => {
                conn.execute("COMMIT", ()).await?;
                Ok(outcome)
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(err)
            }
        }
    }

    async fn collect_closure(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<CascadePlan>, DatabaseError> {
        let conn = self.connect().await?;
        let table = root_table(entity);
        let id = entity.id();

        let exists = conn
            .query(
                &format!("SELECT id FROM {table} WHERE id = ?1 LIMIT 1"),
                params![id.to_string()],
            )
            .await?
            .next()
            .await?
            .is_some();
        if !exists {
            return Ok(None);
        }

        let mut plan = CascadePlan::empty(*entity);
        match entity {
            EntityRef::Client(_) => {
                plan.matter_ids = collect_ids(
                    &conn,
                    "SELECT id FROM matters WHERE client_id = ?1",
                    vec![libsql::Value::Text(id.to_string())],
                    "matters.id",
                )
                .await?;

                let mut values = vec![libsql::Value::Text(id.to_string())];
                values.extend(id_values(&plan.matter_ids));
                let matter_set = (2..=values.len())
                    .map(|i| format!("?{i}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let matter_filter = if plan.matter_ids.is_empty() {
                    String::new()
                } else {
                    format!(" OR matter_id IN ({matter_set})")
                };

                plan.invoice_ids = collect_ids(
                    &conn,
                    &format!("SELECT id FROM invoices WHERE client_id = ?1{matter_filter}"),
                    values.clone(),
                    "invoices.id",
                )
                .await?;
                plan.appointment_ids = collect_ids(
                    &conn,
                    &format!("SELECT id FROM appointments WHERE client_id = ?1{matter_filter}"),
                    values.clone(),
                    "appointments.id",
                )
                .await?;

                let mut rows = conn
                    .query(
                        &format!(
                            "SELECT id, file_ref FROM documents \
                             WHERE client_id = ?1{matter_filter}"
                        ),
                        values,
                    )
                    .await?;
                while let Some(row) = rows.next().await? {
                    plan.document_ids
                        .push(parse_uuid(&get_text(&row, 0), "documents.id")?);
                    plan.file_refs.push(get_text(&row, 1));
                }
            }
            EntityRef::Matter(_) => {
                plan.invoice_ids = collect_ids(
                    &conn,
                    "SELECT id FROM invoices WHERE matter_id = ?1",
                    vec![libsql::Value::Text(id.to_string())],
                    "invoices.id",
                )
                .await?;
                plan.appointment_ids = collect_ids(
                    &conn,
                    "SELECT id FROM appointments WHERE matter_id = ?1",
                    vec![libsql::Value::Text(id.to_string())],
                    "appointments.id",
                )
                .await?;

                let mut rows = conn
                    .query(
                        "SELECT id, file_ref FROM documents WHERE matter_id = ?1",
                        params![id.to_string()],
                    )
                    .await?;
                while let Some(row) = rows.next().await? {
                    plan.document_ids
                        .push(parse_uuid(&get_text(&row, 0), "documents.id")?);
                    plan.file_refs.push(get_text(&row, 1));
                }
            }
            EntityRef::Invoice(_) | EntityRef::Appointment(_) => {}
            EntityRef::Document(_) => {
                let row = conn
                    .query(
                        "SELECT file_ref FROM documents WHERE id = ?1 LIMIT 1",
                        params![id.to_string()],
                    )
                    .await?
                    .next()
                    .await?;
                if let Some(row) = row {
                    plan.file_refs.push(get_text(&row, 0));
                }
            }
        }

        let mut owning_invoices = plan.invoice_ids.clone();
        if matches!(entity, EntityRef::Invoice(_)) {
            owning_invoices.push(id);
        }
        if !owning_invoices.is_empty() {
            plan.payment_ids = collect_ids(
                &conn,
                &format!(
                    "SELECT id FROM payments WHERE invoice_id IN ({})",
                    placeholders(owning_invoices.len())
                ),
                id_values(&owning_invoices),
                "payments.id",
            )
            .await?;
        }

        Ok(Some(plan))
    }

    async fn execute_closure(
        &self,
        plan: &CascadePlan,
    ) -> Result<DependentCounts, DatabaseError> {
        let conn = self.connect().await?;
        let table = root_table(&plan.root);
        let root_id = plan.root.id();

        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result = async {
            // Leaf to root. A row inserted after the plan was collected
            // leaves a dangling foreign key, which aborts the transaction
            // here and rolls everything back.
            let mut counts = DependentCounts::default();
            counts.payments = delete_by_ids(&conn, "payments", &plan.payment_ids).await?;
            counts.invoices = delete_by_ids(&conn, "invoices", &plan.invoice_ids).await?;
            counts.documents = delete_by_ids(&conn, "documents", &plan.document_ids).await?;
            counts.appointments =
                delete_by_ids(&conn, "appointments", &plan.appointment_ids).await?;
            counts.matters = delete_by_ids(&conn, "matters", &plan.matter_ids).await?;

            let affected = conn
                .execute(
                    &format!("DELETE FROM {table} WHERE id = ?1"),
                    params![root_id.to_string()],
                )
                .await?;
            if affected != 1 {
                return Err(DatabaseError::Query(format!(
                    "cascade root delete affected {affected} rows, expected 1"
                )));
            }
            Ok(counts)
        }
        .await;

        match result {
            Ok(counts) => {
                conn.execute("COMMIT", ()).await?;
                Ok(counts)
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(err)
            }
        }
    }
}
