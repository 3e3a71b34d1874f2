//! Billing ledger & referential-integrity engine.
//!
//! The operations the presentation layer calls: invoice/payment
//! reconciliation, document linking, and the cascade deletion planner. Each
//! returns a success value or a typed `LedgerError`; none of them know about
//! HTTP or HTML.

pub mod billing;
pub mod capability;
pub mod cascade;
pub mod documents;
pub mod status;

pub use billing::{
    CreateInvoiceInput, EditInvoiceInput, add_payment, cancel_invoice, create_invoice,
    edit_invoice, remove_payment,
};
pub use capability::{Capability, CapabilitySet};
pub use cascade::{force_delete, safe_delete};
pub use documents::{link_document, unlink_document};
pub use status::{AppliedPayment, StatusResolution, invoice_totals, is_overdue, remaining,
    resolve_status};
