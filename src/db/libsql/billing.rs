//! Invoice and payment store for the libSQL backend.
//!
//! Every mutation that depends on the paid sum runs inside a
//! `BEGIN IMMEDIATE` transaction, re-reads the payments table, and re-derives
//! the invoice status before committing.

use chrono::Utc;
use libsql::params;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::{
    BillingStore, BillingSummary, CancelInvoiceOutcome, InvoiceFilter, InvoiceRecord,
    InvoiceStatus, NewInvoice, PaymentMethod, PaymentOutcome, PaymentRecord, RecordPaymentParams,
    RemovePaymentOutcome, UpdateInvoiceOutcome, UpdateInvoiceParams,
};
use crate::error::DatabaseError;
use crate::ledger::status::{AppliedPayment, resolve_status};

use super::{
    LibSqlBackend, fmt_date, fmt_ts, get_i64, get_opt_text, get_text, opt_text, parse_date,
    parse_decimal, parse_timestamp, parse_timestamp_opt, parse_uuid,
};

const INVOICE_COLS: &str = "id, invoice_number, client_id, matter_id, base_amount, tax_amount, \
     total_amount, status, issued_on, due_on, paid_at, notes, created_at, updated_at";
const PAYMENT_COLS: &str =
    "id, invoice_id, amount, method, reference, notes, paid_at, created_at";

fn parse_invoice_status(raw: &str) -> Result<InvoiceStatus, DatabaseError> {
    InvoiceStatus::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid invoice status '{raw}'")))
}

fn parse_payment_method(raw: &str) -> Result<PaymentMethod, DatabaseError> {
    PaymentMethod::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid payment method '{raw}'")))
}

fn row_to_invoice_record(row: &libsql::Row) -> Result<InvoiceRecord, DatabaseError> {
    let status_raw = get_text(row, 7);
    Ok(InvoiceRecord {
        id: parse_uuid(&get_text(row, 0), "invoices.id")?,
        invoice_number: get_text(row, 1),
        client_id: parse_uuid(&get_text(row, 2), "invoices.client_id")?,
        matter_id: get_opt_text(row, 3)
            .map(|value| parse_uuid(&value, "invoices.matter_id"))
            .transpose()?,
        base_amount: parse_decimal(&get_text(row, 4))?,
        tax_amount: parse_decimal(&get_text(row, 5))?,
        total_amount: parse_decimal(&get_text(row, 6))?,
        status: parse_invoice_status(&status_raw)?,
        issued_on: parse_date(&get_text(row, 8))?,
        due_on: parse_date(&get_text(row, 9))?,
        paid_at: parse_timestamp_opt(get_opt_text(row, 10))?,
        notes: get_opt_text(row, 11),
        created_at: parse_timestamp(&get_text(row, 12))?,
        updated_at: parse_timestamp(&get_text(row, 13))?,
    })
}

fn row_to_payment_record(row: &libsql::Row) -> Result<PaymentRecord, DatabaseError> {
    let method_raw = get_text(row, 3);
    Ok(PaymentRecord {
        id: parse_uuid(&get_text(row, 0), "payments.id")?,
        invoice_id: parse_uuid(&get_text(row, 1), "payments.invoice_id")?,
        amount: parse_decimal(&get_text(row, 2))?,
        method: parse_payment_method(&method_raw)?,
        reference: get_opt_text(row, 4),
        notes: get_opt_text(row, 5),
        paid_at: parse_timestamp(&get_text(row, 6))?,
        created_at: parse_timestamp(&get_text(row, 7))?,
    })
}

async fn fetch_invoice(
    conn: &libsql::Connection,
    invoice_id: Uuid,
) -> Result<Option<InvoiceRecord>, DatabaseError> {
    let row = conn
        .query(
            &format!("SELECT {INVOICE_COLS} FROM invoices WHERE id = ?1 LIMIT 1"),
            params![invoice_id.to_string()],
        )
        .await?
        .next()
        .await?;
    row.map(|row| row_to_invoice_record(&row)).transpose()
}

/// Read the applied payments back from the table. Amounts are TEXT, so the
/// sum always happens here in `Decimal`, never in SQL.
async fn applied_payments(
    conn: &libsql::Connection,
    invoice_id: Uuid,
) -> Result<Vec<AppliedPayment>, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT amount, paid_at FROM payments WHERE invoice_id = ?1 ORDER BY paid_at ASC",
            params![invoice_id.to_string()],
        )
        .await?;

    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(AppliedPayment {
            amount: parse_decimal(&get_text(&row, 0))?,
            paid_at: parse_timestamp(&get_text(&row, 1))?,
        });
    }
    Ok(out)
}

/// Write the re-derived status back and return the refreshed invoice.
async fn store_resolution(
    conn: &libsql::Connection,
    invoice: &InvoiceRecord,
    payments: &[AppliedPayment],
) -> Result<InvoiceRecord, DatabaseError> {
    let resolution = resolve_status(invoice.status, invoice.total_amount, payments);
    conn.execute(
        "UPDATE invoices SET status = ?2, paid_at = ?3, updated_at = ?4 WHERE id = ?1",
        params![
            invoice.id.to_string(),
            resolution.status.as_str(),
            opt_text(resolution.paid_at.map(fmt_ts).as_deref()),
            fmt_ts(Utc::now()),
        ],
    )
    .await?;

    fetch_invoice(conn, invoice.id)
        .await?
        .ok_or_else(|| DatabaseError::Query("failed to load re-derived invoice".to_string()))
}

#[async_trait::async_trait]
impl BillingStore for LibSqlBackend {
    async fn next_invoice_sequence(&self) -> Result<i64, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                "UPDATE counters SET value = value + 1 WHERE name = 'invoice_number' \
                 RETURNING value",
                (),
            )
            .await?
            .next()
            .await?
            .ok_or_else(|| DatabaseError::Query("invoice counter row is missing".to_string()))?;
        Ok(get_i64(&row, 0))
    }

    async fn insert_invoice(&self, input: &NewInvoice) -> Result<InvoiceRecord, DatabaseError> {
        let conn = self.connect().await?;
        let id = Uuid::new_v4();
        let now = fmt_ts(Utc::now());
        conn.execute(
            "INSERT INTO invoices (id, invoice_number, client_id, matter_id, base_amount, \
             tax_amount, total_amount, status, issued_on, due_on, notes, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
            params![
                id.to_string(),
                input.invoice_number.as_str(),
                input.client_id.to_string(),
                opt_text(input.matter_id.map(|v| v.to_string()).as_deref()),
                input.base_amount.to_string(),
                input.tax_amount.to_string(),
                input.total_amount.to_string(),
                InvoiceStatus::Pending.as_str(),
                fmt_date(input.issued_on),
                fmt_date(input.due_on),
                opt_text(input.notes.as_deref()),
                now.as_str(),
            ],
        )
        .await?;

        fetch_invoice(&conn, id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created invoice".to_string()))
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<InvoiceRecord>, DatabaseError> {
        let conn = self.connect().await?;
        fetch_invoice(&conn, invoice_id).await
    }

    async fn get_invoice_by_number(
        &self,
        invoice_number: &str,
    ) -> Result<Option<InvoiceRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {INVOICE_COLS} FROM invoices WHERE invoice_number = ?1 LIMIT 1"),
                params![invoice_number],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_invoice_record(&row)).transpose()
    }

    async fn list_invoices(
        &self,
        filter: &InvoiceFilter,
    ) -> Result<Vec<InvoiceRecord>, DatabaseError> {
        let conn = self.connect().await?;

        let mut conditions: Vec<String> = Vec::new();
        let mut values: Vec<libsql::Value> = Vec::new();
        if let Some(client_id) = filter.client_id {
            values.push(libsql::Value::Text(client_id.to_string()));
            conditions.push(format!("client_id = ?{}", values.len()));
        }
        if let Some(matter_id) = filter.matter_id {
            values.push(libsql::Value::Text(matter_id.to_string()));
            conditions.push(format!("matter_id = ?{}", values.len()));
        }
        if let Some(status) = filter.status {
            values.push(libsql::Value::Text(status.as_str().to_string()));
            conditions.push(format!("status = ?{}", values.len()));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {} ", conditions.join(" AND "))
        };

        let mut rows = conn
            .query(
                &format!(
                    "SELECT {INVOICE_COLS} FROM invoices {where_clause}ORDER BY invoice_number ASC"
                ),
                values,
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_invoice_record(&row)?);
        }
        Ok(out)
    }

    async fn update_invoice(
        &self,
        invoice_id: Uuid,
        input: &UpdateInvoiceParams,
    ) -> Result<UpdateInvoiceOutcome, DatabaseError> {
        let conn = self.connect().await?;
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result = async {
            let Some(mut invoice) = fetch_invoice(&conn, invoice_id).await? else {
                return Ok(UpdateInvoiceOutcome::NotFound);
            };
            let payments = applied_payments(&conn, invoice_id).await?;
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

            conn.execute(
                "UPDATE invoices SET matter_id = ?2, base_amount = ?3, tax_amount = ?4, \
                 total_amount = ?5, issued_on = ?6, due_on = ?7, notes = ?8 WHERE id = ?1",
                params![
                    invoice_id.to_string(),
                    opt_text(invoice.matter_id.map(|v| v.to_string()).as_deref()),
                    invoice.base_amount.to_string(),
                    invoice.tax_amount.to_string(),
                    invoice.total_amount.to_string(),
                    fmt_date(invoice.issued_on),
                    fmt_date(invoice.due_on),
                    opt_text(invoice.notes.as_deref()),
                ],
            )
            .await?;

            let updated = store_resolution(&conn, &invoice, &payments).await?;
            Ok(UpdateInvoiceOutcome::Updated(updated))
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

    async fn cancel_invoice(
        &self,
        invoice_id: Uuid,
    ) -> Result<CancelInvoiceOutcome, DatabaseError> {
        let conn = self.connect().await?;
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result = async {
            let Some(invoice) = fetch_invoice(&conn, invoice_id).await? else {
                return Ok(CancelInvoiceOutcome::NotFound);
            };
            if invoice.status == InvoiceStatus::Cancelled {
                return Ok(CancelInvoiceOutcome::Cancelled(invoice));
            }
            let payments = applied_payments(&conn, invoice_id).await?;
            let paid_sum: Decimal = payments.iter().map(|p| p.amount).sum();
            if paid_sum > Decimal::ZERO {
                return Ok(CancelInvoiceOutcome::HasPayments { paid_sum });
            }

            conn.execute(
                "UPDATE invoices SET status = ?2, paid_at = NULL, updated_at = ?3 WHERE id = ?1",
                params![
                    invoice_id.to_string(),
                    InvoiceStatus::Cancelled.as_str(),
                    fmt_ts(Utc::now()),
                ],
            )
            .await?;

            let cancelled = fetch_invoice(&conn, invoice_id).await?.ok_or_else(|| {
                DatabaseError::Query("failed to load cancelled invoice".to_string())
            })?;
            Ok(CancelInvoiceOutcome::Cancelled(cancelled))
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

    async fn apply_payment(
        &self,
        invoice_id: Uuid,
        input: &RecordPaymentParams,
    ) -> Result<PaymentOutcome, DatabaseError> {
        let conn = self.connect().await?;
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result = async {
            let Some(invoice) = fetch_invoice(&conn, invoice_id).await? else {
                return Ok(PaymentOutcome::InvoiceNotFound);
            };
            if invoice.status == InvoiceStatus::Cancelled {
                return Ok(PaymentOutcome::InvoiceCancelled);
            }

            // Re-check the balance inside the write transaction, so two
            // payments racing each other cannot together exceed the total.
            let existing = applied_payments(&conn, invoice_id).await?;
            let paid_sum: Decimal = existing.iter().map(|p| p.amount).sum();
            let remaining = invoice.total_amount - paid_sum;
            if input.amount > remaining {
                return Ok(PaymentOutcome::Overpayment { remaining });
            }

            let payment_id = Uuid::new_v4();
            conn.execute(
                "INSERT INTO payments (id, invoice_id, amount, method, reference, notes, \
                 paid_at, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    payment_id.to_string(),
                    invoice_id.to_string(),
                    input.amount.to_string(),
                    input.method.as_str(),
                    opt_text(input.reference.as_deref()),
                    opt_text(input.notes.as_deref()),
                    fmt_ts(input.paid_at),
                    fmt_ts(Utc::now()),
                ],
            )
            .await?;

            let row = conn
                .query(
                    &format!("SELECT {PAYMENT_COLS} FROM payments WHERE id = ?1 LIMIT 1"),
                    params![payment_id.to_string()],
                )
                .await?
                .next()
                .await?
                .ok_or_else(|| {
                    DatabaseError::Query("failed to load created payment".to_string())
                })?;
            let payment = row_to_payment_record(&row)?;

            let payments = applied_payments(&conn, invoice_id).await?;
            let updated = store_resolution(&conn, &invoice, &payments).await?;
            Ok(PaymentOutcome::Applied {
                invoice: updated,
                payment,
            })
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

    async fn remove_payment(
        &self,
        payment_id: Uuid,
    ) -> Result<RemovePaymentOutcome, DatabaseError> {
        let conn = self.connect().await?;
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result = async {
            let Some(row) = conn
                .query(
                    "SELECT invoice_id FROM payments WHERE id = ?1 LIMIT 1",
                    params![payment_id.to_string()],
                )
                .await?
                .next()
                .await?
            else {
                return Ok(RemovePaymentOutcome::PaymentNotFound);
            };
            let invoice_id = parse_uuid(&get_text(&row, 0), "payments.invoice_id")?;

            let invoice = fetch_invoice(&conn, invoice_id).await?.ok_or_else(|| {
                DatabaseError::Query("payment references a missing invoice".to_string())
            })?;

            conn.execute(
                "DELETE FROM payments WHERE id = ?1",
                params![payment_id.to_string()],
            )
            .await?;

            let payments = applied_payments(&conn, invoice_id).await?;
            let updated = store_resolution(&conn, &invoice, &payments).await?;
            Ok(RemovePaymentOutcome::Removed { invoice: updated })
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

    async fn get_payment(
        &self,
        payment_id: Uuid,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {PAYMENT_COLS} FROM payments WHERE id = ?1 LIMIT 1"),
                params![payment_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_payment_record(&row)).transpose()
    }

    async fn list_payments(&self, invoice_id: Uuid) -> Result<Vec<PaymentRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {PAYMENT_COLS} FROM payments WHERE invoice_id = ?1 \
                     ORDER BY paid_at ASC"
                ),
                params![invoice_id.to_string()],
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_payment_record(&row)?);
        }
        Ok(out)
    }

    async fn billing_summary(&self) -> Result<BillingSummary, DatabaseError> {
        let conn = self.connect().await?;

        let mut summary = BillingSummary::default();
        let mut rows = conn
            .query("SELECT status, total_amount FROM invoices", ())
            .await?;
        while let Some(row) = rows.next().await? {
            let status = parse_invoice_status(&get_text(&row, 0))?;
            let total = parse_decimal(&get_text(&row, 1))?;
            match status {
                InvoiceStatus::Pending => summary.pending_total += total,
                InvoiceStatus::Partial => summary.partial_total += total,
                InvoiceStatus::Paid => summary.paid_total += total,
                InvoiceStatus::Cancelled => {}
            }
        }

        let mut open_paid = Decimal::ZERO;
        let mut rows = conn
            .query(
                "SELECT p.amount FROM payments p JOIN invoices i ON i.id = p.invoice_id \
                 WHERE i.status IN ('pending', 'partial')",
                (),
            )
            .await?;
        while let Some(row) = rows.next().await? {
            open_paid += parse_decimal(&get_text(&row, 0))?;
        }

        summary.outstanding_total = summary.pending_total + summary.partial_total - open_paid;
        Ok(summary)
    }
}
