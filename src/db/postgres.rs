//! PostgreSQL backend for the Database trait.
//!
//! All invariant-bearing mutations run inside a transaction with the invoice
//! (or deletion root) row locked via `SELECT ... FOR UPDATE`, so concurrent
//! writers serialize on the row instead of racing the validation.

use std::ops::DerefMut;

use async_trait::async_trait;
use deadpool_postgres::{GenericClient, Manager, ManagerConfig, Pool, RecyclingMethod};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::db::{
    AppointmentRecord, AppointmentStatus, AppointmentStore, BillingStore, BillingSummary,
    CancelInvoiceOutcome, CascadePlan, CascadeStore, ClientRecord, ClientStore,
    CreateAppointmentParams, CreateClientParams, CreateDocumentParams, CreateMatterParams,
    Database, DependentCounts, DocumentRecord, DocumentStore, EntityRef, InvoiceFilter,
    InvoiceRecord, InvoiceStatus, LinkDocumentOutcome, MatterRecord, MatterStatus, MatterStore,
    NewInvoice, PaymentMethod, PaymentOutcome, PaymentRecord, RecordPaymentParams,
    RemovePaymentOutcome, SafeDeleteOutcome, UpdateAppointmentParams, UpdateClientParams,
    UpdateInvoiceOutcome, UpdateInvoiceParams, UpdateMatterParams,
};
use crate::error::DatabaseError;
use crate::ledger::status::{AppliedPayment, resolve_status};

mod embedded {
    refinery::embed_migrations!("migrations");
}

const CLIENT_COLS: &str =
    "id, name, email, phone, address, company, national_id, notes, created_at, updated_at";
const MATTER_COLS: &str = "id, matter_number, title, description, client_id, responsible_user, \
     status, opened_on, next_hearing, created_at, updated_at";
const APPOINTMENT_COLS: &str = "id, title, description, owner, client_id, matter_id, starts_at, \
     ends_at, location, status, notes, created_at";
const INVOICE_COLS: &str = "id, invoice_number, client_id, matter_id, base_amount, tax_amount, \
     total_amount, status, issued_on, due_on, paid_at, notes, created_at, updated_at";
const PAYMENT_COLS: &str =
    "id, invoice_id, amount, method, reference, notes, paid_at, created_at";
const DOCUMENT_COLS: &str = "id, client_id, matter_id, file_ref, original_filename, doc_type, \
     description, confidential, created_at, updated_at";

/// PostgreSQL database backend over a deadpool connection pool.
pub struct PgBackend {
    pool: Pool,
}

impl PgBackend {
    /// Create a new PostgreSQL backend from configuration.
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let url = config
            .postgres_url
            .as_ref()
            .ok_or_else(|| DatabaseError::Pool("postgres connection URL is not set".to_string()))?;
        let pg_config: tokio_postgres::Config = url
            .expose_secret()
            .parse()
            .map_err(|e: tokio_postgres::Error| DatabaseError::Pool(e.to_string()))?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<deadpool_postgres::Object, DatabaseError> {
        self.pool
            .get()
            .await
            .map_err(|e| DatabaseError::Pool(e.to_string()))
    }
}

// ==================== Row mappers ====================

fn row_to_client(row: &Row) -> ClientRecord {
    ClientRecord {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        phone: row.get("phone"),
        address: row.get("address"),
        company: row.get("company"),
        national_id: row.get("national_id"),
        notes: row.get("notes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_matter(row: &Row) -> Result<MatterRecord, DatabaseError> {
    let status_raw: String = row.get("status");
    let status = MatterStatus::from_db_value(&status_raw).ok_or_else(|| {
        DatabaseError::Serialization(format!("unknown matter status '{status_raw}'"))
    })?;
    Ok(MatterRecord {
        id: row.get("id"),
        matter_number: row.get("matter_number"),
        title: row.get("title"),
        description: row.get("description"),
        client_id: row.get("client_id"),
        responsible_user: row.get("responsible_user"),
        status,
        opened_on: row.get("opened_on"),
        next_hearing: row.get("next_hearing"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_appointment(row: &Row) -> Result<AppointmentRecord, DatabaseError> {
    let status_raw: String = row.get("status");
    let status = AppointmentStatus::from_db_value(&status_raw).ok_or_else(|| {
        DatabaseError::Serialization(format!("unknown appointment status '{status_raw}'"))
    })?;
    Ok(AppointmentRecord {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        owner: row.get("owner"),
        client_id: row.get("client_id"),
        matter_id: row.get("matter_id"),
        starts_at: row.get("starts_at"),
        ends_at: row.get("ends_at"),
        location: row.get("location"),
        status,
        notes: row.get("notes"),
        created_at: row.get("created_at"),
    })
}

fn row_to_invoice(row: &Row) -> Result<InvoiceRecord, DatabaseError> {
    let status_raw: String = row.get("status");
    let status = InvoiceStatus::from_db_value(&status_raw).ok_or_else(|| {
        DatabaseError::Serialization(format!("unknown invoice status '{status_raw}'"))
    })?;
    Ok(InvoiceRecord {
        id: row.get("id"),
        invoice_number: row.get("invoice_number"),
        client_id: row.get("client_id"),
        matter_id: row.get("matter_id"),
        base_amount: row.get("base_amount"),
        tax_amount: row.get("tax_amount"),
        total_amount: row.get("total_amount"),
        status,
        issued_on: row.get("issued_on"),
        due_on: row.get("due_on"),
        paid_at: row.get("paid_at"),
        notes: row.get("notes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_payment(row: &Row) -> Result<PaymentRecord, DatabaseError> {
    let method_raw: String = row.get("method");
    let method = PaymentMethod::from_db_value(&method_raw).ok_or_else(|| {
        DatabaseError::Serialization(format!("unknown payment method '{method_raw}'"))
    })?;
    Ok(PaymentRecord {
        id: row.get("id"),
        invoice_id: row.get("invoice_id"),
        amount: row.get("amount"),
        method,
        reference: row.get("reference"),
        notes: row.get("notes"),
        paid_at: row.get("paid_at"),
        created_at: row.get("created_at"),
    })
}

fn row_to_document(row: &Row) -> DocumentRecord {
    DocumentRecord {
        id: row.get("id"),
        client_id: row.get("client_id"),
        matter_id: row.get("matter_id"),
        file_ref: row.get("file_ref"),
        original_filename: row.get("original_filename"),
        doc_type: row.get("doc_type"),
        description: row.get("description"),
        confidential: row.get("confidential"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

// ==================== Transaction helpers ====================

/// Lock and fetch an invoice row inside `tx`.
async fn lock_invoice<C: GenericClient>(
    tx: &C,
    invoice_id: Uuid,
) -> Result<Option<InvoiceRecord>, DatabaseError> {
    let row = tx
        .query_opt(
            &format!("SELECT {INVOICE_COLS} FROM invoices WHERE id = $1 FOR UPDATE"),
            &[&invoice_id],
        )
        .await?;
    row.as_ref().map(row_to_invoice).transpose()
}

/// All payments applied to an invoice, for the status resolver. Always read
/// back from the table, never derived by arithmetic on the previous state.
async fn applied_payments<C: GenericClient>(
    tx: &C,
    invoice_id: Uuid,
) -> Result<Vec<AppliedPayment>, DatabaseError> {
    let rows = tx
        .query(
            "SELECT amount, paid_at FROM payments WHERE invoice_id = $1 ORDER BY paid_at",
            &[&invoice_id],
        )
        .await?;
    Ok(rows
        .iter()
        .map(|row| AppliedPayment {
            amount: row.get("amount"),
            paid_at: row.get("paid_at"),
        })
        .collect())
}

/// Write the re-derived status back and return the refreshed invoice.
async fn store_resolution<C: GenericClient>(
    tx: &C,
    invoice: &InvoiceRecord,
    payments: &[AppliedPayment],
) -> Result<InvoiceRecord, DatabaseError> {
    let resolution = resolve_status(invoice.status, invoice.total_amount, payments);
    let row = tx
        .query_one(
            &format!(
                "UPDATE invoices SET status = $2, paid_at = $3, updated_at = NOW() \
                 WHERE id = $1 RETURNING {INVOICE_COLS}"
            ),
            &[&invoice.id, &resolution.status.as_str(), &resolution.paid_at],
        )
        .await?;
    row_to_invoice(&row)
}

async fn count_rows<C: GenericClient>(
    tx: &C,
    sql: &str,
    id: Uuid,
) -> Result<u64, DatabaseError> {
    let row = tx.query_one(sql, &[&id]).await?;
    let count: i64 = row.get(0);
    Ok(u64::try_from(count).unwrap_or(0))
}

// ==================== ClientStore ====================

#[async_trait]
impl ClientStore for PgBackend {
    async fn create_client(
        &self,
        input: &CreateClientParams,
    ) -> Result<ClientRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO clients (id, name, email, phone, address, company, national_id, notes) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {CLIENT_COLS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.name,
                    &input.email,
                    &input.phone,
                    &input.address,
                    &input.company,
                    &input.national_id,
                    &input.notes,
                ],
            )
            .await?;
        Ok(row_to_client(&row))
    }

    async fn get_client(&self, client_id: Uuid) -> Result<Option<ClientRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {CLIENT_COLS} FROM clients WHERE id = $1"),
                &[&client_id],
            )
            .await?;
        Ok(row.as_ref().map(row_to_client))
    }

    async fn update_client(
        &self,
        client_id: Uuid,
        input: &UpdateClientParams,
    ) -> Result<Option<ClientRecord>, DatabaseError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;

        let Some(row) = tx
            .query_opt(
                &format!("SELECT {CLIENT_COLS} FROM clients WHERE id = $1 FOR UPDATE"),
                &[&client_id],
            )
            .await?
        else {
            return Ok(None);
        };
        let mut client = row_to_client(&row);

        if let Some(name) = &input.name {
            client.name = name.clone();
        }
        if let Some(email) = &input.email {
            client.email = email.clone();
        }
        if let Some(phone) = &input.phone {
            client.phone = phone.clone();
        }
        if let Some(address) = &input.address {
            client.address = address.clone();
        }
        if let Some(company) = &input.company {
            client.company = company.clone();
        }
        if let Some(national_id) = &input.national_id {
            client.national_id = national_id.clone();
        }
        if let Some(notes) = &input.notes {
            client.notes = notes.clone();
        }

        let row = tx
            .query_one(
                &format!(
                    "UPDATE clients SET name = $2, email = $3, phone = $4, address = $5, \
                     company = $6, national_id = $7, notes = $8, updated_at = NOW() \
                     WHERE id = $1 RETURNING {CLIENT_COLS}"
                ),
                &[
                    &client_id,
                    &client.name,
                    &client.email,
                    &client.phone,
                    &client.address,
                    &client.company,
                    &client.national_id,
                    &client.notes,
                ],
            )
            .await?;
        let updated = row_to_client(&row);
        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn list_clients(&self, query: Option<&str>) -> Result<Vec<ClientRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = match query {
            Some(q) => {
                let pattern = format!("%{q}%");
                conn.query(
                    &format!(
                        "SELECT {CLIENT_COLS} FROM clients WHERE name ILIKE $1 ORDER BY name"
                    ),
                    &[&pattern],
                )
                .await?
            }
            None => {
                conn.query(
                    &format!("SELECT {CLIENT_COLS} FROM clients ORDER BY name"),
                    &[],
                )
                .await?
            }
        };
        Ok(rows.iter().map(row_to_client).collect())
    }
}

// ==================== MatterStore ====================

#[async_trait]
impl MatterStore for PgBackend {
    async fn create_matter(
        &self,
        input: &CreateMatterParams,
    ) -> Result<MatterRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO matters (id, matter_number, title, description, client_id, \
                     responsible_user, status, opened_on, next_hearing) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {MATTER_COLS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.matter_number,
                    &input.title,
                    &input.description,
                    &input.client_id,
                    &input.responsible_user,
                    &input.status.as_str(),
                    &input.opened_on,
                    &input.next_hearing,
                ],
            )
            .await?;
        row_to_matter(&row)
    }

    async fn get_matter(&self, matter_id: Uuid) -> Result<Option<MatterRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {MATTER_COLS} FROM matters WHERE id = $1"),
                &[&matter_id],
            )
            .await?;
        row.as_ref().map(row_to_matter).transpose()
    }

    async fn get_matter_by_number(
        &self,
        matter_number: &str,
    ) -> Result<Option<MatterRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {MATTER_COLS} FROM matters WHERE matter_number = $1"),
                &[&matter_number],
            )
            .await?;
        row.as_ref().map(row_to_matter).transpose()
    }

    async fn update_matter(
        &self,
        matter_id: Uuid,
        input: &UpdateMatterParams,
    ) -> Result<Option<MatterRecord>, DatabaseError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;

        let Some(row) = tx
            .query_opt(
                &format!("SELECT {MATTER_COLS} FROM matters WHERE id = $1 FOR UPDATE"),
                &[&matter_id],
            )
            .await?
        else {
            return Ok(None);
        };
        let mut matter = row_to_matter(&row)?;

        if let Some(title) = &input.title {
            matter.title = title.clone();
        }
        if let Some(description) = &input.description {
            matter.description = description.clone();
        }
        if let Some(responsible_user) = &input.responsible_user {
            matter.responsible_user = responsible_user.clone();
        }
        if let Some(status) = input.status {
            matter.status = status;
        }
        if let Some(opened_on) = input.opened_on {
            matter.opened_on = opened_on;
        }
        if let Some(next_hearing) = input.next_hearing {
            matter.next_hearing = next_hearing;
        }

        let row = tx
            .query_one(
                &format!(
                    "UPDATE matters SET title = $2, description = $3, responsible_user = $4, \
                     status = $5, opened_on = $6, next_hearing = $7, updated_at = NOW() \
                     WHERE id = $1 RETURNING {MATTER_COLS}"
                ),
                &[
                    &matter_id,
                    &matter.title,
                    &matter.description,
                    &matter.responsible_user,
                    &matter.status.as_str(),
                    &matter.opened_on,
                    &matter.next_hearing,
                ],
            )
            .await?;
        let updated = row_to_matter(&row)?;
        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn list_matters(
        &self,
        client_id: Option<Uuid>,
    ) -> Result<Vec<MatterRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = match client_id {
            Some(client_id) => {
                conn.query(
                    &format!(
                        "SELECT {MATTER_COLS} FROM matters WHERE client_id = $1 \
                         ORDER BY opened_on DESC, matter_number"
                    ),
                    &[&client_id],
                )
                .await?
            }
            None => {
                conn.query(
                    &format!(
                        "SELECT {MATTER_COLS} FROM matters ORDER BY opened_on DESC, matter_number"
                    ),
                    &[],
                )
                .await?
            }
        };
        rows.iter().map(row_to_matter).collect()
    }
}

// ==================== AppointmentStore ====================

#[async_trait]
impl AppointmentStore for PgBackend {
    async fn create_appointment(
        &self,
        input: &CreateAppointmentParams,
    ) -> Result<AppointmentRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO appointments (id, title, description, owner, client_id, \
                     matter_id, starts_at, ends_at, location, status, notes) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                     RETURNING {APPOINTMENT_COLS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.title,
                    &input.description,
                    &input.owner,
                    &input.client_id,
                    &input.matter_id,
                    &input.starts_at,
                    &input.ends_at,
                    &input.location,
                    &input.status.as_str(),
                    &input.notes,
                ],
            )
            .await?;
        row_to_appointment(&row)
    }

    async fn get_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<AppointmentRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {APPOINTMENT_COLS} FROM appointments WHERE id = $1"),
                &[&appointment_id],
            )
            .await?;
        row.as_ref().map(row_to_appointment).transpose()
    }

    async fn update_appointment(
        &self,
        appointment_id: Uuid,
        input: &UpdateAppointmentParams,
    ) -> Result<Option<AppointmentRecord>, DatabaseError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;

        let Some(row) = tx
            .query_opt(
                &format!("SELECT {APPOINTMENT_COLS} FROM appointments WHERE id = $1 FOR UPDATE"),
                &[&appointment_id],
            )
            .await?
        else {
            return Ok(None);
        };
        let mut appointment = row_to_appointment(&row)?;

        if let Some(title) = &input.title {
            appointment.title = title.clone();
        }
        if let Some(description) = &input.description {
            appointment.description = description.clone();
        }
        if let Some(starts_at) = input.starts_at {
            appointment.starts_at = starts_at;
        }
        if let Some(ends_at) = input.ends_at {
            appointment.ends_at = ends_at;
        }
        if let Some(location) = &input.location {
            appointment.location = location.clone();
        }
        if let Some(status) = input.status {
            appointment.status = status;
        }
        if let Some(notes) = &input.notes {
            appointment.notes = notes.clone();
        }

        let row = tx
            .query_one(
                &format!(
                    "UPDATE appointments SET title = $2, description = $3, starts_at = $4, \
                     ends_at = $5, location = $6, status = $7, notes = $8 \
                     WHERE id = $1 RETURNING {APPOINTMENT_COLS}"
                ),
                &[
                    &appointment_id,
                    &appointment.title,
                    &appointment.description,
                    &appointment.starts_at,
                    &appointment.ends_at,
                    &appointment.location,
                    &appointment.status.as_str(),
                    &appointment.notes,
                ],
            )
            .await?;
        let updated = row_to_appointment(&row)?;
        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn list_appointments(
        &self,
        client_id: Option<Uuid>,
        matter_id: Option<Uuid>,
    ) -> Result<Vec<AppointmentRecord>, DatabaseError> {
        let conn = self.conn().await?;

        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        if let Some(client_id) = &client_id {
            params.push(client_id);
            conditions.push(format!("client_id = ${}", params.len()));
        }
        if let Some(matter_id) = &matter_id {
            params.push(matter_id);
            conditions.push(format!("matter_id = ${}", params.len()));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {} ", conditions.join(" AND "))
        };

        let rows = conn
            .query(
                &format!(
                    "SELECT {APPOINTMENT_COLS} FROM appointments {where_clause}ORDER BY starts_at"
                ),
                &params,
            )
            .await?;
        rows.iter().map(row_to_appointment).collect()
    }
}

// ==================== DocumentStore ====================

#[async_trait]
impl DocumentStore for PgBackend {
    async fn create_document(
        &self,
        input: &CreateDocumentParams,
    ) -> Result<DocumentRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO documents (id, client_id, matter_id, file_ref, \
                     original_filename, doc_type, description, confidential) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {DOCUMENT_COLS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.client_id,
                    &input.matter_id,
                    &input.file_ref,
                    &input.original_filename,
                    &input.doc_type,
                    &input.description,
                    &input.confidential,
                ],
            )
            .await?;
        Ok(row_to_document(&row))
    }

    async fn get_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<DocumentRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {DOCUMENT_COLS} FROM documents WHERE id = $1"),
                &[&document_id],
            )
            .await?;
        Ok(row.as_ref().map(row_to_document))
    }

    async fn list_documents(
        &self,
        client_id: Option<Uuid>,
        matter_id: Option<Uuid>,
    ) -> Result<Vec<DocumentRecord>, DatabaseError> {
        let conn = self.conn().await?;

        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        if let Some(client_id) = &client_id {
            params.push(client_id);
            conditions.push(format!("client_id = ${}", params.len()));
        }
        if let Some(matter_id) = &matter_id {
            params.push(matter_id);
            conditions.push(format!("matter_id = ${}", params.len()));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {} ", conditions.join(" AND "))
        };

        let rows = conn
            .query(
                &format!(
                    "SELECT {DOCUMENT_COLS} FROM documents {where_clause}ORDER BY created_at DESC"
                ),
                &params,
            )
            .await?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    async fn link_document(
        &self,
        document_id: Uuid,
        matter_id: Uuid,
    ) -> Result<LinkDocumentOutcome, DatabaseError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;

        let Some(row) = tx
            .query_opt(
                &format!("SELECT {DOCUMENT_COLS} FROM documents WHERE id = $1 FOR UPDATE"),
                &[&document_id],
            )
            .await?
        else {
            return Ok(LinkDocumentOutcome::DocumentNotFound);
        };
        let document = row_to_document(&row);

        let Some(matter_row) = tx
            .query_opt(
                "SELECT client_id FROM matters WHERE id = $1",
                &[&matter_id],
            )
            .await?
        else {
            return Ok(LinkDocumentOutcome::MatterNotFound);
        };
        let matter_client: Uuid = matter_row.get("client_id");
        if matter_client != document.client_id {
            return Ok(LinkDocumentOutcome::OwnershipMismatch {
                document_client: document.client_id,
                matter_client,
            });
        }

        let row = tx
            .query_one(
                &format!(
                    "UPDATE documents SET matter_id = $2, updated_at = NOW() \
                     WHERE id = $1 RETURNING {DOCUMENT_COLS}"
                ),
                &[&document_id, &matter_id],
            )
            .await?;
        let linked = row_to_document(&row);
        tx.commit().await?;
        Ok(LinkDocumentOutcome::Linked(linked))
    }

    async fn unlink_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<DocumentRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE documents SET matter_id = NULL, updated_at = NOW() \
                     WHERE id = $1 RETURNING {DOCUMENT_COLS}"
                ),
                &[&document_id],
            )
            .await?;
        Ok(row.as_ref().map(row_to_document))
    }
}

// ==================== BillingStore ====================

#[async_trait]
impl BillingStore for PgBackend {
    async fn next_invoice_sequence(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one("SELECT nextval('invoice_number_seq')", &[])
            .await?;
        Ok(row.get(0))
    }

    async fn insert_invoice(&self, input: &NewInvoice) -> Result<InvoiceRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO invoices (id, invoice_number, client_id, matter_id, \
                     base_amount, tax_amount, total_amount, status, issued_on, due_on, notes) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                     RETURNING {INVOICE_COLS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.invoice_number,
                    &input.client_id,
                    &input.matter_id,
                    &input.base_amount,
                    &input.tax_amount,
                    &input.total_amount,
                    &InvoiceStatus::Pending.as_str(),
                    &input.issued_on,
                    &input.due_on,
                    &input.notes,
                ],
            )
            .await?;
        row_to_invoice(&row)
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<InvoiceRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {INVOICE_COLS} FROM invoices WHERE id = $1"),
                &[&invoice_id],
            )
            .await?;
        row.as_ref().map(row_to_invoice).transpose()
    }

    async fn get_invoice_by_number(
        &self,
        invoice_number: &str,
    ) -> Result<Option<InvoiceRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {INVOICE_COLS} FROM invoices WHERE invoice_number = $1"),
                &[&invoice_number],
            )
            .await?;
        row.as_ref().map(row_to_invoice).transpose()
    }

    async fn list_invoices(
        &self,
        filter: &InvoiceFilter,
    ) -> Result<Vec<InvoiceRecord>, DatabaseError> {
        let conn = self.conn().await?;

        let status_value = filter.status.map(|s| s.as_str().to_string());
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        if let Some(client_id) = &filter.client_id {
            params.push(client_id);
            conditions.push(format!("client_id = ${}", params.len()));
        }
        if let Some(matter_id) = &filter.matter_id {
            params.push(matter_id);
            conditions.push(format!("matter_id = ${}", params.len()));
        }
        if let Some(status) = &status_value {
            params.push(status);
            conditions.push(format!("status = ${}", params.len()));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {} ", conditions.join(" AND "))
        };

        let rows = conn
            .query(
                &format!(
                    "SELECT {INVOICE_COLS} FROM invoices {where_clause}ORDER BY invoice_number"
                ),
                &params,
            )
            .await?;
        rows.iter().map(row_to_invoice).collect()
    }

    async fn update_invoice(
        &self,
        invoice_id: Uuid,
        input: &UpdateInvoiceParams,
    ) -> Result<UpdateInvoiceOutcome, DatabaseError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;

        let Some(mut invoice) = lock_invoice(&tx, invoice_id).await? else {
            return Ok(UpdateInvoiceOutcome::NotFound);
        };
        let payments = applied_payments(&tx, invoice_id).await?;
        let paid_sum: Decimal = payments.iter().map(|p| p.amount).sum();
        if input.total_amount < paid_sum {
            return Ok(UpdateInvoiceOutcome::TotalBelowPaid { paid_sum });
        }

        invoice.base_amount = input.base_amount;
        invoice.tax_amount = input.tax_amount;
        invoice.total_amount = input.total_amount;
        if let Some(matter_id) = input.matter_id {
            invoice.matter_id = matter_id;
        }
        if let Some(issued_on) = input.issued_on {
            invoice.issued_on = issued_on;
        }
        if let Some(due_on) = input.due_on {
            invoice.due_on = due_on;
        }
        if let Some(notes) = &input.notes {
            invoice.notes = notes.clone();
        }

        tx.execute(
            "UPDATE invoices SET matter_id = $2, base_amount = $3, tax_amount = $4, \
             total_amount = $5, issued_on = $6, due_on = $7, notes = $8 WHERE id = $1",
            &[
                &invoice_id,
                &invoice.matter_id,
                &invoice.base_amount,
                &invoice.tax_amount,
                &invoice.total_amount,
                &invoice.issued_on,
                &invoice.due_on,
                &invoice.notes,
            ],
        )
        .await?;

        let updated = store_resolution(&tx, &invoice, &payments).await?;
        tx.commit().await?;
        Ok(UpdateInvoiceOutcome::Updated(updated))
    }

    async fn cancel_invoice(
        &self,
        invoice_id: Uuid,
    ) -> Result<CancelInvoiceOutcome, DatabaseError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;

        let Some(invoice) = lock_invoice(&tx, invoice_id).await? else {
            return Ok(CancelInvoiceOutcome::NotFound);
        };
        if invoice.status == InvoiceStatus::Cancelled {
            return Ok(CancelInvoiceOutcome::Cancelled(invoice));
        }
        let payments = applied_payments(&tx, invoice_id).await?;
        let paid_sum: Decimal = payments.iter().map(|p| p.amount).sum();
        if paid_sum > Decimal::ZERO {
            return Ok(CancelInvoiceOutcome::HasPayments { paid_sum });
        }

        let row = tx
            .query_one(
                &format!(
                    "UPDATE invoices SET status = $2, paid_at = NULL, updated_at = NOW() \
                     WHERE id = $1 RETURNING {INVOICE_COLS}"
                ),
                &[&invoice_id, &InvoiceStatus::Cancelled.as_str()],
            )
            .await?;
        let cancelled = row_to_invoice(&row)?;
        tx.commit().await?;
        Ok(CancelInvoiceOutcome::Cancelled(cancelled))
    }

    async fn apply_payment(
        &self,
        invoice_id: Uuid,
        input: &RecordPaymentParams,
    ) -> Result<PaymentOutcome, DatabaseError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;

        let Some(invoice) = lock_invoice(&tx, invoice_id).await? else {
            return Ok(PaymentOutcome::InvoiceNotFound);
        };
        if invoice.status == InvoiceStatus::Cancelled {
            return Ok(PaymentOutcome::InvoiceCancelled);
        }

        // The precondition check runs again here, under the row lock, so a
        // concurrent writer that slipped in between the caller's read and
        // this transaction still cannot push the sum past the total.
        let existing = applied_payments(&tx, invoice_id).await?;
        let paid_sum: Decimal = existing.iter().map(|p| p.amount).sum();
        let remaining = invoice.total_amount - paid_sum;
        if input.amount > remaining {
            return Ok(PaymentOutcome::Overpayment { remaining });
        }

        let row = tx
            .query_one(
                &format!(
                    "INSERT INTO payments (id, invoice_id, amount, method, reference, notes, paid_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {PAYMENT_COLS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &invoice_id,
                    &input.amount,
                    &input.method.as_str(),
                    &input.reference,
                    &input.notes,
                    &input.paid_at,
                ],
            )
            .await?;
        let payment = row_to_payment(&row)?;

        let payments = applied_payments(&tx, invoice_id).await?;
        let updated = store_resolution(&tx, &invoice, &payments).await?;
        tx.commit().await?;
        Ok(PaymentOutcome::Applied {
            invoice: updated,
            payment,
        })
    }

    async fn remove_payment(
        &self,
        payment_id: Uuid,
    ) -> Result<RemovePaymentOutcome, DatabaseError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;

        let Some(row) = tx
            .query_opt(
                "SELECT invoice_id FROM payments WHERE id = $1",
                &[&payment_id],
            )
            .await?
        else {
            return Ok(RemovePaymentOutcome::PaymentNotFound);
        };
        let invoice_id: Uuid = row.get("invoice_id");

        let invoice = lock_invoice(&tx, invoice_id)
            .await?
            .ok_or_else(|| DatabaseError::Query("payment references a missing invoice".into()))?;

        tx.execute("DELETE FROM payments WHERE id = $1", &[&payment_id])
            .await?;
        let payments = applied_payments(&tx, invoice_id).await?;
        let updated = store_resolution(&tx, &invoice, &payments).await?;
        tx.commit().await?;
        Ok(RemovePaymentOutcome::Removed { invoice: updated })
    }

    async fn get_payment(
        &self,
        payment_id: Uuid,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {PAYMENT_COLS} FROM payments WHERE id = $1"),
                &[&payment_id],
            )
            .await?;
        row.as_ref().map(row_to_payment).transpose()
    }

    async fn list_payments(&self, invoice_id: Uuid) -> Result<Vec<PaymentRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {PAYMENT_COLS} FROM payments WHERE invoice_id = $1 ORDER BY paid_at"
                ),
                &[&invoice_id],
            )
            .await?;
        rows.iter().map(row_to_payment).collect()
    }

    async fn billing_summary(&self) -> Result<BillingSummary, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                "SELECT \
                   COALESCE(SUM(total_amount) FILTER (WHERE status = 'pending'), 0::numeric), \
                   COALESCE(SUM(total_amount) FILTER (WHERE status = 'partial'), 0::numeric), \
                   COALESCE(SUM(total_amount) FILTER (WHERE status = 'paid'), 0::numeric) \
                 FROM invoices",
                &[],
            )
            .await?;
        let pending_total: Decimal = row.get(0);
        let partial_total: Decimal = row.get(1);
        let paid_total: Decimal = row.get(2);

        let row = conn
            .query_one(
                "SELECT COALESCE(SUM(p.amount), 0::numeric) FROM payments p \
                 JOIN invoices i ON i.id = p.invoice_id \
                 WHERE i.status IN ('pending', 'partial')",
                &[],
            )
            .await?;
        let open_paid: Decimal = row.get(0);

        Ok(BillingSummary {
            pending_total,
            partial_total,
            paid_total,
            outstanding_total: pending_total + partial_total - open_paid,
        })
    }
}

// ==================== CascadeStore ====================

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

#[async_trait]
impl CascadeStore for PgBackend {
    async fn safe_delete(&self, entity: &EntityRef) -> Result<SafeDeleteOutcome, DatabaseError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let table = root_table(entity);
        let id = entity.id();

        let mut file_refs: Vec<String> = Vec::new();
        let locked = match entity {
            EntityRef::Document(_) => {
                let row = tx
                    .query_opt(
                        &format!("SELECT file_ref FROM {table} WHERE id = $1 FOR UPDATE"),
                        &[&id],
                    )
                    .await?;
                match row {
                    Some(row) => {
                        file_refs.push(row.get("file_ref"));
                        true
                    }
                    None => false,
                }
            }
            _ => {
                tx.query_opt(
                    &format!("SELECT id FROM {table} WHERE id = $1 FOR UPDATE"),
                    &[&id],
                )
                .await?
                .is_some()
            }
        };
        if !locked {
            return Ok(SafeDeleteOutcome::NotFound);
        }

        let mut counts = DependentCounts::default();
        match entity {
            EntityRef::Client(_) => {
                counts.matters =
                    count_rows(&tx, "SELECT COUNT(*) FROM matters WHERE client_id = $1", id)
                        .await?;
                counts.appointments = count_rows(
                    &tx,
                    "SELECT COUNT(*) FROM appointments WHERE client_id = $1",
                    id,
                )
                .await?;
                counts.invoices =
                    count_rows(&tx, "SELECT COUNT(*) FROM invoices WHERE client_id = $1", id)
                        .await?;
                counts.documents = count_rows(
                    &tx,
                    "SELECT COUNT(*) FROM documents WHERE client_id = $1",
                    id,
                )
                .await?;
            }
            EntityRef::Matter(_) => {
                counts.appointments = count_rows(
                    &tx,
                    "SELECT COUNT(*) FROM appointments WHERE matter_id = $1",
                    id,
                )
                .await?;
                counts.invoices =
                    count_rows(&tx, "SELECT COUNT(*) FROM invoices WHERE matter_id = $1", id)
                        .await?;
                counts.documents = count_rows(
                    &tx,
                    "SELECT COUNT(*) FROM documents WHERE matter_id = $1",
                    id,
                )
                .await?;
            }
            EntityRef::Invoice(_) => {
                counts.payments = count_rows(
                    &tx,
                    "SELECT COUNT(*) FROM payments WHERE invoice_id = $1",
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

        tx.execute(&format!("DELETE FROM {table} WHERE id = $1"), &[&id])
            .await?;
        tx.commit().await?;
        Ok(SafeDeleteOutcome::Deleted { file_refs })
    }

    async fn collect_closure(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<CascadePlan>, DatabaseError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let id = entity.id();
        let mut plan = CascadePlan::empty(*entity);

        match entity {
            EntityRef::Client(_) => {
                let rows = tx
                    .query("SELECT id FROM matters WHERE client_id = $1", &[&id])
                    .await?;
                plan.matter_ids = rows.iter().map(|r| r.get("id")).collect();

                let rows = tx
                    .query(
                        "SELECT id FROM invoices WHERE client_id = $1 OR matter_id = ANY($2)",
                        &[&id, &plan.matter_ids],
                    )
                    .await?;
                plan.invoice_ids = rows.iter().map(|r| r.get("id")).collect();

                let rows = tx
                    .query(
                        "SELECT id FROM appointments WHERE client_id = $1 OR matter_id = ANY($2)",
                        &[&id, &plan.matter_ids],
                    )
                    .await?;
                plan.appointment_ids = rows.iter().map(|r| r.get("id")).collect();

                let rows = tx
                    .query(
                        "SELECT id, file_ref FROM documents \
                         WHERE client_id = $1 OR matter_id = ANY($2)",
                        &[&id, &plan.matter_ids],
                    )
                    .await?;
                for row in &rows {
                    plan.document_ids.push(row.get("id"));
                    plan.file_refs.push(row.get("file_ref"));
                }

                let exists = tx
                    .query_opt("SELECT id FROM clients WHERE id = $1", &[&id])
                    .await?
                    .is_some();
                if !exists {
                    return Ok(None);
                }
            }
            EntityRef::Matter(_) => {
                let exists = tx
                    .query_opt("SELECT id FROM matters WHERE id = $1", &[&id])
                    .await?
                    .is_some();
                if !exists {
                    return Ok(None);
                }

                let rows = tx
                    .query("SELECT id FROM invoices WHERE matter_id = $1", &[&id])
                    .await?;
                plan.invoice_ids = rows.iter().map(|r| r.get("id")).collect();

                let rows = tx
                    .query("SELECT id FROM appointments WHERE matter_id = $1", &[&id])
                    .await?;
                plan.appointment_ids = rows.iter().map(|r| r.get("id")).collect();

                let rows = tx
                    .query(
                        "SELECT id, file_ref FROM documents WHERE matter_id = $1",
                        &[&id],
                    )
                    .await?;
                for row in &rows {
                    plan.document_ids.push(row.get("id"));
                    plan.file_refs.push(row.get("file_ref"));
                }
            }
            EntityRef::Invoice(_) => {
                let exists = tx
                    .query_opt("SELECT id FROM invoices WHERE id = $1", &[&id])
                    .await?
                    .is_some();
                if !exists {
                    return Ok(None);
                }
            }
            EntityRef::Appointment(_) => {
                let exists = tx
                    .query_opt("SELECT id FROM appointments WHERE id = $1", &[&id])
                    .await?
                    .is_some();
                if !exists {
                    return Ok(None);
                }
            }
            EntityRef::Document(_) => {
                let Some(row) = tx
                    .query_opt("SELECT file_ref FROM documents WHERE id = $1", &[&id])
                    .await?
                else {
                    return Ok(None);
                };
                plan.file_refs.push(row.get("file_ref"));
            }
        }

        let mut owning_invoices = plan.invoice_ids.clone();
        if matches!(entity, EntityRef::Invoice(_)) {
            owning_invoices.push(id);
        }
        if !owning_invoices.is_empty() {
            let rows = tx
                .query(
                    "SELECT id FROM payments WHERE invoice_id = ANY($1)",
                    &[&owning_invoices],
                )
                .await?;
            plan.payment_ids = rows.iter().map(|r| r.get("id")).collect();
        }

        Ok(Some(plan))
    }

    async fn execute_closure(
        &self,
        plan: &CascadePlan,
    ) -> Result<DependentCounts, DatabaseError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let table = root_table(&plan.root);
        let root_id = plan.root.id();

        let locked = tx
            .query_opt(
                &format!("SELECT id FROM {table} WHERE id = $1 FOR UPDATE"),
                &[&root_id],
            )
            .await?
            .is_some();
        if !locked {
            return Err(DatabaseError::Query(format!(
                "{} {} vanished before the cascade could run",
                plan.root.kind(),
                root_id
            )));
        }

        // Leaf to root. A row inserted after the plan was collected leaves a
        // dangling foreign key, which aborts the transaction here and rolls
        // everything back.
        let mut counts = DependentCounts::default();
        counts.payments = tx
            .execute(
                "DELETE FROM payments WHERE id = ANY($1)",
                &[&plan.payment_ids],
            )
            .await?;
        counts.invoices = tx
            .execute(
                "DELETE FROM invoices WHERE id = ANY($1)",
                &[&plan.invoice_ids],
            )
            .await?;
        counts.documents = tx
            .execute(
                "DELETE FROM documents WHERE id = ANY($1)",
                &[&plan.document_ids],
            )
            .await?;
        counts.appointments = tx
            .execute(
                "DELETE FROM appointments WHERE id = ANY($1)",
                &[&plan.appointment_ids],
            )
            .await?;
        counts.matters = tx
            .execute(
                "DELETE FROM matters WHERE id = ANY($1)",
                &[&plan.matter_ids],
            )
            .await?;

        let affected = tx
            .execute(&format!("DELETE FROM {table} WHERE id = $1"), &[&root_id])
            .await?;
        if affected != 1 {
            return Err(DatabaseError::Query(format!(
                "cascade root delete affected {affected} rows, expected 1"
            )));
        }

        tx.commit().await?;
        Ok(counts)
    }
}

#[async_trait]
impl Database for PgBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let mut conn = self.conn().await?;
        let client = conn.deref_mut().deref_mut();
        embedded::migrations::runner()
            .run_async(client)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        Ok(())
    }
}
