//! Database abstraction layer.
//!
//! Provides a backend-agnostic `Database` trait that unifies all persistence
//! operations. Two implementations exist behind feature flags:
//!
//! - `postgres` (default): Uses `deadpool-postgres` + `tokio-postgres`
//! - `libsql`: Uses libSQL for embedded/single-office deployment
//!
//! Mutations with business invariants (payments, invoice edits, deletions)
//! are composite operations: each backend validates and applies them inside
//! one transaction with the invoice row locked, and reports the result as a
//! domain outcome instead of a bare error. The `ledger` module translates
//! outcomes into the caller-facing `LedgerError` taxonomy.

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "libsql")]
pub mod libsql;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;

/// Create a database backend from configuration, run migrations, and return it.
pub async fn connect_from_config(
    config: &crate::config::DatabaseConfig,
) -> Result<Arc<dyn Database>, DatabaseError> {
    match config.backend {
        #[cfg(feature = "libsql")]
        crate::config::DatabaseBackend::LibSql => {
            let default_path = crate::config::default_libsql_path();
            let db_path = config.libsql_path.as_deref().unwrap_or(&default_path);
            let backend = libsql::LibSqlBackend::new_local(db_path).await?;
            backend.run_migrations().await?;
            Ok(Arc::new(backend))
        }
        #[cfg(feature = "postgres")]
        _ => {
            let pg = postgres::PgBackend::new(config).await?;
            pg.run_migrations().await?;
            Ok(Arc::new(pg))
        }
        #[cfg(not(feature = "postgres"))]
        _ => Err(DatabaseError::Pool(
            "No database backend available. Enable 'postgres' or 'libsql' feature.".to_string(),
        )),
    }
}

/// Derived invoice lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Partial,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Partial => "partial",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "partial" => Some(Self::Partial),
            "paid" => Some(Self::Paid),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// How a payment was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
    Cheque,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Card => "card",
            Self::Transfer => "transfer",
            Self::Cheque => "cheque",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "cash" => Some(Self::Cash),
            "card" => Some(Self::Card),
            "transfer" => Some(Self::Transfer),
            "cheque" => Some(Self::Cheque),
            _ => None,
        }
    }
}

/// Matter lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatterStatus {
    Active,
    Suspended,
    Closed,
}

impl MatterStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Closed => "closed",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "suspended" => Some(Self::Suspended),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Appointment lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(Self::Scheduled),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

// ==================== Records & params ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub company: Option<String>,
    pub national_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateClientParams {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub company: Option<String>,
    pub national_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateClientParams {
    pub name: Option<String>,
    pub email: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub address: Option<Option<String>>,
    pub company: Option<Option<String>>,
    pub national_id: Option<Option<String>>,
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatterRecord {
    pub id: Uuid,
    pub matter_number: String,
    pub title: String,
    pub description: Option<String>,
    pub client_id: Uuid,
    pub responsible_user: String,
    pub status: MatterStatus,
    pub opened_on: NaiveDate,
    pub next_hearing: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateMatterParams {
    pub matter_number: String,
    pub title: String,
    pub description: Option<String>,
    pub client_id: Uuid,
    pub responsible_user: String,
    pub status: MatterStatus,
    pub opened_on: NaiveDate,
    pub next_hearing: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateMatterParams {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub responsible_user: Option<String>,
    pub status: Option<MatterStatus>,
    pub opened_on: Option<NaiveDate>,
    pub next_hearing: Option<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentRecord {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub owner: String,
    pub client_id: Option<Uuid>,
    pub matter_id: Option<Uuid>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub location: Option<String>,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateAppointmentParams {
    pub title: String,
    pub description: Option<String>,
    pub owner: String,
    pub client_id: Option<Uuid>,
    pub matter_id: Option<Uuid>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub location: Option<String>,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateAppointmentParams {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub location: Option<Option<String>>,
    pub status: Option<AppointmentStatus>,
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub id: Uuid,
    pub invoice_number: String,
    pub client_id: Uuid,
    pub matter_id: Option<Uuid>,
    pub base_amount: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub status: InvoiceStatus,
    pub issued_on: NaiveDate,
    pub due_on: NaiveDate,
    /// Timestamp of the payment that settled the invoice in full.
    pub paid_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fully computed invoice row ready for insertion. Amounts and the invoice
/// number are produced by the ledger, never by the backend.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub invoice_number: String,
    pub client_id: Uuid,
    pub matter_id: Option<Uuid>,
    pub base_amount: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub issued_on: NaiveDate,
    pub due_on: NaiveDate,
    pub notes: Option<String>,
}

/// Header update applied by `edit_invoice`. All three amounts are recomputed
/// by the ledger and validated by the backend against the paid sum under the
/// invoice row lock.
#[derive(Debug, Clone)]
pub struct UpdateInvoiceParams {
    pub matter_id: Option<Option<Uuid>>,
    pub base_amount: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub issued_on: Option<NaiveDate>,
    pub due_on: Option<NaiveDate>,
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub client_id: Option<Uuid>,
    pub matter_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub paid_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RecordPaymentParams {
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub paid_at: DateTime<Utc>,
}

/// Outstanding/collected totals across the ledger, grouped by status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingSummary {
    pub pending_total: Decimal,
    pub partial_total: Decimal,
    pub paid_total: Decimal,
    /// Sum of `total - paid` over all pending and partial invoices.
    pub outstanding_total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub client_id: Uuid,
    pub matter_id: Option<Uuid>,
    /// Opaque reference into the file-storage collaborator.
    pub file_ref: String,
    pub original_filename: String,
    pub doc_type: Option<String>,
    pub description: Option<String>,
    pub confidential: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateDocumentParams {
    pub client_id: Uuid,
    pub matter_id: Option<Uuid>,
    pub file_ref: String,
    pub original_filename: String,
    pub doc_type: Option<String>,
    pub description: Option<String>,
    pub confidential: bool,
}

// ==================== Deletion planning ====================

/// Reference to a deletable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum EntityRef {
    Client(Uuid),
    Matter(Uuid),
    Invoice(Uuid),
    Appointment(Uuid),
    Document(Uuid),
}

impl EntityRef {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Client(_) => "client",
            Self::Matter(_) => "matter",
            Self::Invoice(_) => "invoice",
            Self::Appointment(_) => "appointment",
            Self::Document(_) => "document",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Client(id)
            | Self::Matter(id)
            | Self::Invoice(id)
            | Self::Appointment(id)
            | Self::Document(id) => *id,
        }
    }
}

/// Per-kind record counts, used both to explain a blocked safe delete and to
/// report what a forced delete removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentCounts {
    pub matters: u64,
    pub appointments: u64,
    pub invoices: u64,
    pub payments: u64,
    pub documents: u64,
}

impl DependentCounts {
    pub fn is_empty(&self) -> bool {
        self.matters == 0
            && self.appointments == 0
            && self.invoices == 0
            && self.payments == 0
            && self.documents == 0
    }

    pub fn total(&self) -> u64 {
        self.matters + self.appointments + self.invoices + self.payments + self.documents
    }
}

impl fmt::Display for DependentCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        for (label, count) in [
            ("matters", self.matters),
            ("appointments", self.appointments),
            ("invoices", self.invoices),
            ("payments", self.payments),
            ("documents", self.documents),
        ] {
            if count > 0 {
                parts.push(format!("{label}={count}"));
            }
        }
        if parts.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// Transitive dependency closure of one entity, listed in strict leaf-to-root
/// deletion order.
#[derive(Debug, Clone)]
pub struct CascadePlan {
    pub root: EntityRef,
    pub payment_ids: Vec<Uuid>,
    pub invoice_ids: Vec<Uuid>,
    pub document_ids: Vec<Uuid>,
    pub appointment_ids: Vec<Uuid>,
    pub matter_ids: Vec<Uuid>,
    /// Stored-file references of every document in the closure (including a
    /// document root itself). Released best-effort after the commit.
    pub file_refs: Vec<String>,
}

impl CascadePlan {
    pub fn empty(root: EntityRef) -> Self {
        Self {
            root,
            payment_ids: Vec::new(),
            invoice_ids: Vec::new(),
            document_ids: Vec::new(),
            appointment_ids: Vec::new(),
            matter_ids: Vec::new(),
            file_refs: Vec::new(),
        }
    }

    /// Rows the plan will delete, including the root.
    pub fn row_count(&self) -> usize {
        self.payment_ids.len()
            + self.invoice_ids.len()
            + self.document_ids.len()
            + self.appointment_ids.len()
            + self.matter_ids.len()
            + 1
    }
}

// ==================== Composite operation outcomes ====================

#[derive(Debug)]
pub enum PaymentOutcome {
    Applied {
        invoice: InvoiceRecord,
        payment: PaymentRecord,
    },
    InvoiceNotFound,
    InvoiceCancelled,
    Overpayment {
        remaining: Decimal,
    },
}

#[derive(Debug)]
pub enum RemovePaymentOutcome {
    Removed { invoice: InvoiceRecord },
    PaymentNotFound,
}

#[derive(Debug)]
pub enum UpdateInvoiceOutcome {
    Updated(InvoiceRecord),
    NotFound,
    /// The edit would lower the total below the already-collected sum.
    TotalBelowPaid {
        paid_sum: Decimal,
    },
}

#[derive(Debug)]
pub enum CancelInvoiceOutcome {
    Cancelled(InvoiceRecord),
    NotFound,
    /// Cancellation is blocked once any payment has been recorded.
    HasPayments {
        paid_sum: Decimal,
    },
}

#[derive(Debug)]
pub enum LinkDocumentOutcome {
    Linked(DocumentRecord),
    DocumentNotFound,
    MatterNotFound,
    OwnershipMismatch {
        document_client: Uuid,
        matter_client: Uuid,
    },
}

#[derive(Debug)]
pub enum SafeDeleteOutcome {
    /// Entity removed; the listed stored files should be released.
    Deleted { file_refs: Vec<String> },
    NotFound,
    Blocked(DependentCounts),
}

// ==================== Sub-traits ====================
//
// Each sub-trait groups related persistence methods. The `Database`
// supertrait combines them all; leaf consumers can depend on a specific
// sub-trait instead.

#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn create_client(
        &self,
        input: &CreateClientParams,
    ) -> Result<ClientRecord, DatabaseError>;
    async fn get_client(&self, client_id: Uuid) -> Result<Option<ClientRecord>, DatabaseError>;
    async fn update_client(
        &self,
        client_id: Uuid,
        input: &UpdateClientParams,
    ) -> Result<Option<ClientRecord>, DatabaseError>;
    /// List clients, optionally filtered by a case-insensitive name substring.
    async fn list_clients(&self, query: Option<&str>) -> Result<Vec<ClientRecord>, DatabaseError>;
}

#[async_trait]
pub trait MatterStore: Send + Sync {
    async fn create_matter(
        &self,
        input: &CreateMatterParams,
    ) -> Result<MatterRecord, DatabaseError>;
    async fn get_matter(&self, matter_id: Uuid) -> Result<Option<MatterRecord>, DatabaseError>;
    async fn get_matter_by_number(
        &self,
        matter_number: &str,
    ) -> Result<Option<MatterRecord>, DatabaseError>;
    async fn update_matter(
        &self,
        matter_id: Uuid,
        input: &UpdateMatterParams,
    ) -> Result<Option<MatterRecord>, DatabaseError>;
    async fn list_matters(
        &self,
        client_id: Option<Uuid>,
    ) -> Result<Vec<MatterRecord>, DatabaseError>;
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn create_appointment(
        &self,
        input: &CreateAppointmentParams,
    ) -> Result<AppointmentRecord, DatabaseError>;
    async fn get_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<AppointmentRecord>, DatabaseError>;
    async fn update_appointment(
        &self,
        appointment_id: Uuid,
        input: &UpdateAppointmentParams,
    ) -> Result<Option<AppointmentRecord>, DatabaseError>;
    async fn list_appointments(
        &self,
        client_id: Option<Uuid>,
        matter_id: Option<Uuid>,
    ) -> Result<Vec<AppointmentRecord>, DatabaseError>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create_document(
        &self,
        input: &CreateDocumentParams,
    ) -> Result<DocumentRecord, DatabaseError>;
    async fn get_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<DocumentRecord>, DatabaseError>;
    async fn list_documents(
        &self,
        client_id: Option<Uuid>,
        matter_id: Option<Uuid>,
    ) -> Result<Vec<DocumentRecord>, DatabaseError>;
    /// Attach a document to a matter; the ownership check runs inside the
    /// backend transaction.
    async fn link_document(
        &self,
        document_id: Uuid,
        matter_id: Uuid,
    ) -> Result<LinkDocumentOutcome, DatabaseError>;
    /// Clear the matter reference only. The document row and its stored file
    /// are never touched.
    async fn unlink_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<DocumentRecord>, DatabaseError>;
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Next value of the monotonic invoice-number sequence.
    async fn next_invoice_sequence(&self) -> Result<i64, DatabaseError>;
    /// Insert a fully computed invoice row. A duplicate invoice number
    /// surfaces as `DatabaseError::UniqueViolation`.
    async fn insert_invoice(&self, row: &NewInvoice) -> Result<InvoiceRecord, DatabaseError>;
    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<InvoiceRecord>, DatabaseError>;
    async fn get_invoice_by_number(
        &self,
        invoice_number: &str,
    ) -> Result<Option<InvoiceRecord>, DatabaseError>;
    async fn list_invoices(
        &self,
        filter: &InvoiceFilter,
    ) -> Result<Vec<InvoiceRecord>, DatabaseError>;
    /// Apply a header edit inside one transaction: lock the invoice row,
    /// reject totals below the paid sum, re-derive status.
    async fn update_invoice(
        &self,
        invoice_id: Uuid,
        input: &UpdateInvoiceParams,
    ) -> Result<UpdateInvoiceOutcome, DatabaseError>;
    /// Explicit cancellation, blocked once any payment exists. Idempotent for
    /// an already-cancelled invoice.
    async fn cancel_invoice(
        &self,
        invoice_id: Uuid,
    ) -> Result<CancelInvoiceOutcome, DatabaseError>;
    /// Validate and apply a payment inside one transaction with the invoice
    /// row locked, then re-derive status from the recomputed paid sum.
    async fn apply_payment(
        &self,
        invoice_id: Uuid,
        input: &RecordPaymentParams,
    ) -> Result<PaymentOutcome, DatabaseError>;
    /// Delete a payment and re-derive the invoice status from the payments
    /// that remain (summed, never subtracted).
    async fn remove_payment(
        &self,
        payment_id: Uuid,
    ) -> Result<RemovePaymentOutcome, DatabaseError>;
    async fn get_payment(
        &self,
        payment_id: Uuid,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;
    async fn list_payments(&self, invoice_id: Uuid) -> Result<Vec<PaymentRecord>, DatabaseError>;
    async fn billing_summary(&self) -> Result<BillingSummary, DatabaseError>;
}

#[async_trait]
pub trait CascadeStore: Send + Sync {
    /// Count direct dependents and delete the entity in one transaction, or
    /// report why the delete is blocked. Performs no mutation when blocked.
    async fn safe_delete(&self, entity: &EntityRef) -> Result<SafeDeleteOutcome, DatabaseError>;
    /// Collect the transitive dependency closure of `entity`. Returns `None`
    /// when the root does not exist.
    async fn collect_closure(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<CascadePlan>, DatabaseError>;
    /// Delete the closure in one transaction, payments first and the root
    /// last. Rolls back entirely on any failure, including foreign-key
    /// violations raised by rows created after the plan was collected.
    async fn execute_closure(
        &self,
        plan: &CascadePlan,
    ) -> Result<DependentCounts, DatabaseError>;
}

/// Backend-agnostic database supertrait.
#[async_trait]
pub trait Database:
    ClientStore
    + MatterStore
    + AppointmentStore
    + DocumentStore
    + BillingStore
    + CascadeStore
    + Send
    + Sync
{
    /// Run schema migrations for this backend.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{DependentCounts, EntityRef, InvoiceStatus, PaymentMethod};

    #[test]
    fn status_round_trips_through_db_values() {
        for status in [
            InvoiceStatus::Pending,
            InvoiceStatus::Partial,
            InvoiceStatus::Paid,
            InvoiceStatus::Cancelled,
        ] {
            assert_eq!(InvoiceStatus::from_db_value(status.as_str()), Some(status));
        }
        assert_eq!(InvoiceStatus::from_db_value("overdue"), None);
    }

    #[test]
    fn payment_method_rejects_unknown_values() {
        assert_eq!(
            PaymentMethod::from_db_value("cash"),
            Some(PaymentMethod::Cash)
        );
        assert_eq!(PaymentMethod::from_db_value("barter"), None);
    }

    #[test]
    fn dependent_counts_display_lists_only_nonzero_kinds() {
        let counts = DependentCounts {
            matters: 1,
            appointments: 2,
            invoices: 1,
            payments: 0,
            documents: 1,
        };
        assert_eq!(
            counts.to_string(),
            "matters=1, appointments=2, invoices=1, documents=1"
        );
        assert_eq!(DependentCounts::default().to_string(), "none");
        assert!(DependentCounts::default().is_empty());
    }

    #[test]
    fn entity_ref_reports_kind_and_id() {
        let id = Uuid::new_v4();
        let entity = EntityRef::Matter(id);
        assert_eq!(entity.kind(), "matter");
        assert_eq!(entity.id(), id);
    }
}
