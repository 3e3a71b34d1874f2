//! Invoice ledger and payment recorder.
//!
//! Orchestrates billing mutations over the `Database` trait. Amount
//! computation and precondition checks live here; the backends re-validate
//! anything that depends on concurrent state (the paid sum) under their own
//! row lock, and this module translates their outcomes into `LedgerError`.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::config::OfficeConfig;
use crate::db::{
    CancelInvoiceOutcome, Database, InvoiceRecord, NewInvoice, PaymentOutcome, PaymentRecord,
    RecordPaymentParams, RemovePaymentOutcome, UpdateInvoiceOutcome, UpdateInvoiceParams,
};
use crate::error::{DatabaseError, LedgerError};
use crate::ledger::status::invoice_totals;

#[derive(Debug, Clone)]
pub struct CreateInvoiceInput {
    pub client_id: Uuid,
    pub matter_id: Option<Uuid>,
    pub base_amount: Decimal,
    /// Tax rate for this invoice; callers usually pass
    /// `office.default_tax_rate`.
    pub tax_rate: Decimal,
    /// Defaults to today when absent.
    pub issued_on: Option<NaiveDate>,
    pub due_on: NaiveDate,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EditInvoiceInput {
    pub base_amount: Decimal,
    pub tax_rate: Decimal,
    /// `Some(None)` detaches the invoice from its matter.
    pub matter_id: Option<Option<Uuid>>,
    pub issued_on: Option<NaiveDate>,
    pub due_on: Option<NaiveDate>,
    pub notes: Option<Option<String>>,
}

fn validate_amounts(base_amount: Decimal, tax_rate: Decimal) -> Result<(), LedgerError> {
    if base_amount < Decimal::ZERO {
        return Err(LedgerError::InvariantViolation(
            "base amount must not be negative".to_string(),
        ));
    }
    if tax_rate < Decimal::ZERO {
        return Err(LedgerError::InvariantViolation(
            "tax rate must not be negative".to_string(),
        ));
    }
    Ok(())
}

/// Verify that a matter belongs to the expected client.
async fn check_matter_ownership(
    db: &dyn Database,
    matter_id: Uuid,
    client_id: Uuid,
) -> Result<(), LedgerError> {
    let matter = db
        .get_matter(matter_id)
        .await?
        .ok_or_else(|| LedgerError::not_found("matter", matter_id))?;
    if matter.client_id != client_id {
        return Err(LedgerError::OwnershipMismatch {
            record_client: client_id,
            matter_client: matter.client_id,
        });
    }
    Ok(())
}

/// Create an invoice with derived tax/total amounts and a sequence-generated
/// invoice number.
pub async fn create_invoice(
    db: &dyn Database,
    office: &OfficeConfig,
    input: &CreateInvoiceInput,
) -> Result<InvoiceRecord, LedgerError> {
    validate_amounts(input.base_amount, input.tax_rate)?;

    db.get_client(input.client_id)
        .await?
        .ok_or_else(|| LedgerError::not_found("client", input.client_id))?;
    if let Some(matter_id) = input.matter_id {
        check_matter_ownership(db, matter_id, input.client_id).await?;
    }

    let (tax_amount, total_amount) = invoice_totals(input.base_amount, input.tax_rate);
    let sequence = db.next_invoice_sequence().await?;
    let invoice_number = office.format_invoice_number(sequence);

    let row = NewInvoice {
        invoice_number: invoice_number.clone(),
        client_id: input.client_id,
        matter_id: input.matter_id,
        base_amount: input.base_amount.round_dp(2),
        tax_amount,
        total_amount,
        issued_on: input.issued_on.unwrap_or_else(|| Utc::now().date_naive()),
        due_on: input.due_on,
        notes: input.notes.clone(),
    };

    match db.insert_invoice(&row).await {
        Ok(invoice) => Ok(invoice),
        // The sequence is monotonic, so a collision means the number space
        // was tampered with; surface it, never renumber.
        Err(DatabaseError::UniqueViolation(_)) => {
            Err(LedgerError::DuplicateInvoiceNumber(invoice_number))
        }
        Err(e) => Err(e.into()),
    }
}

/// Re-apply the invoice computation to an existing invoice. The edit is
/// rejected when it would lower the total below the already-collected sum,
/// and the status is always re-derived, never set directly.
pub async fn edit_invoice(
    db: &dyn Database,
    invoice_id: Uuid,
    input: &EditInvoiceInput,
) -> Result<InvoiceRecord, LedgerError> {
    validate_amounts(input.base_amount, input.tax_rate)?;

    let current = db
        .get_invoice(invoice_id)
        .await?
        .ok_or_else(|| LedgerError::not_found("invoice", invoice_id))?;
    if let Some(Some(matter_id)) = input.matter_id {
        check_matter_ownership(db, matter_id, current.client_id).await?;
    }

    let (tax_amount, total_amount) = invoice_totals(input.base_amount, input.tax_rate);
    let params = UpdateInvoiceParams {
        matter_id: input.matter_id,
        base_amount: input.base_amount.round_dp(2),
        tax_amount,
        total_amount,
        issued_on: input.issued_on,
        due_on: input.due_on,
        notes: input.notes.clone(),
    };

    match db.update_invoice(invoice_id, &params).await? {
        UpdateInvoiceOutcome::Updated(invoice) => Ok(invoice),
        UpdateInvoiceOutcome::NotFound => Err(LedgerError::not_found("invoice", invoice_id)),
        UpdateInvoiceOutcome::TotalBelowPaid { paid_sum } => {
            Err(LedgerError::InvariantViolation(format!(
                "new total {} is below the {} already collected",
                total_amount, paid_sum
            )))
        }
    }
}

/// Explicitly cancel an invoice. Cancellation is the only direct status
/// mutation and is blocked once any payment has been recorded.
pub async fn cancel_invoice(
    db: &dyn Database,
    invoice_id: Uuid,
) -> Result<InvoiceRecord, LedgerError> {
    match db.cancel_invoice(invoice_id).await? {
        CancelInvoiceOutcome::Cancelled(invoice) => Ok(invoice),
        CancelInvoiceOutcome::NotFound => Err(LedgerError::not_found("invoice", invoice_id)),
        CancelInvoiceOutcome::HasPayments { paid_sum } => Err(LedgerError::InvariantViolation(
            format!("cannot cancel an invoice with {} already collected", paid_sum),
        )),
    }
}

/// Record a payment against an invoice.
///
/// The overpayment check runs again inside the backend transaction with the
/// invoice row locked, so two concurrent payments can never together exceed
/// the total.
pub async fn add_payment(
    db: &dyn Database,
    invoice_id: Uuid,
    input: &RecordPaymentParams,
) -> Result<(InvoiceRecord, PaymentRecord), LedgerError> {
    if input.amount <= Decimal::ZERO {
        return Err(LedgerError::InvariantViolation(
            "payment amount must be greater than 0".to_string(),
        ));
    }
    // Amounts are ledgered at cent precision.
    if input.amount != input.amount.round_dp(2) {
        return Err(LedgerError::InvariantViolation(
            "payment amount must not have more than 2 decimal places".to_string(),
        ));
    }

    match db.apply_payment(invoice_id, input).await? {
        PaymentOutcome::Applied { invoice, payment } => Ok((invoice, payment)),
        PaymentOutcome::InvoiceNotFound => Err(LedgerError::not_found("invoice", invoice_id)),
        PaymentOutcome::InvoiceCancelled => Err(LedgerError::InvariantViolation(
            "cannot record a payment against a cancelled invoice".to_string(),
        )),
        PaymentOutcome::Overpayment { remaining } => Err(LedgerError::Overpayment {
            amount: input.amount,
            remaining,
        }),
    }
}

/// Delete a payment, re-deriving the invoice status from the payments that
/// remain and clearing the completion timestamp when no longer paid.
pub async fn remove_payment(
    db: &dyn Database,
    payment_id: Uuid,
) -> Result<InvoiceRecord, LedgerError> {
    match db.remove_payment(payment_id).await? {
        RemovePaymentOutcome::Removed { invoice } => Ok(invoice),
        RemovePaymentOutcome::PaymentNotFound => Err(LedgerError::not_found("payment", payment_id)),
    }
}
