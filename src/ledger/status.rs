//! Pure derivation of invoice status from its payments.
//!
//! Status is never stored-and-trusted: every path that changes the paid sum
//! or the total re-derives it through `resolve_status`. The function has no
//! side effects and is called by both storage backends inside their write
//! transactions.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::db::{InvoiceRecord, InvoiceStatus};

/// Amount/timestamp view of a payment, as the resolver needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedPayment {
    pub amount: Decimal,
    pub paid_at: DateTime<Utc>,
}

/// Result of re-deriving an invoice's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusResolution {
    pub status: InvoiceStatus,
    pub paid_sum: Decimal,
    /// Timestamp of the payment whose cumulative sum crossed the total, set
    /// only while the invoice is paid in full.
    pub paid_at: Option<DateTime<Utc>>,
}

/// Derive the status of an invoice from its payments.
///
/// Cancellation is sticky: an explicitly cancelled invoice stays cancelled
/// regardless of its payments. Otherwise the status follows the paid sum:
/// zero is pending, at least the total is paid, anything in between partial.
pub fn resolve_status(
    current: InvoiceStatus,
    total_amount: Decimal,
    payments: &[AppliedPayment],
) -> StatusResolution {
    let paid_sum: Decimal = payments.iter().map(|p| p.amount).sum();

    if current == InvoiceStatus::Cancelled {
        return StatusResolution {
            status: InvoiceStatus::Cancelled,
            paid_sum,
            paid_at: None,
        };
    }

    if paid_sum.is_zero() {
        return StatusResolution {
            status: InvoiceStatus::Pending,
            paid_sum,
            paid_at: None,
        };
    }

    if paid_sum >= total_amount {
        return StatusResolution {
            status: InvoiceStatus::Paid,
            paid_sum,
            paid_at: crossing_timestamp(total_amount, payments),
        };
    }

    StatusResolution {
        status: InvoiceStatus::Partial,
        paid_sum,
        paid_at: None,
    }
}

/// Timestamp of the payment that pushed the cumulative sum past the total,
/// walking payments in chronological order.
fn crossing_timestamp(
    total_amount: Decimal,
    payments: &[AppliedPayment],
) -> Option<DateTime<Utc>> {
    let mut ordered: Vec<AppliedPayment> = payments.to_vec();
    ordered.sort_by_key(|p| p.paid_at);

    let mut cumulative = Decimal::ZERO;
    for payment in &ordered {
        cumulative += payment.amount;
        if cumulative >= total_amount {
            return Some(payment.paid_at);
        }
    }
    None
}

/// Tax and total for a base amount at the given rate, rounded to 2 dp.
pub fn invoice_totals(base_amount: Decimal, tax_rate: Decimal) -> (Decimal, Decimal) {
    let tax_amount = (base_amount * tax_rate).round_dp(2);
    let total_amount = (base_amount + tax_amount).round_dp(2);
    (tax_amount, total_amount)
}

/// Unpaid balance given the invoice total and the current paid sum.
pub fn remaining(total_amount: Decimal, paid_sum: Decimal) -> Decimal {
    total_amount - paid_sum
}

/// Whether the invoice is past due, derived from the due date. The original
/// system stored an `overdue` status; here it is display-only and never
/// persisted.
pub fn is_overdue(invoice: &InvoiceRecord, today: NaiveDate) -> bool {
    matches!(
        invoice.status,
        InvoiceStatus::Pending | InvoiceStatus::Partial
    ) && invoice.due_on < today
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    use super::{AppliedPayment, invoice_totals, remaining, resolve_status};
    use crate::db::InvoiceStatus;

    fn at(hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, hour, 0, 0).unwrap()
    }

    fn payment(amount: rust_decimal::Decimal, hour: u32) -> AppliedPayment {
        AppliedPayment {
            amount,
            paid_at: at(hour),
        }
    }

    #[test]
    fn no_payments_is_pending() {
        let res = resolve_status(InvoiceStatus::Paid, dec!(115.00), &[]);
        assert_eq!(res.status, InvoiceStatus::Pending);
        assert_eq!(res.paid_sum, dec!(0));
        assert_eq!(res.paid_at, None);
    }

    #[test]
    fn partial_payment_is_partial() {
        let res = resolve_status(InvoiceStatus::Pending, dec!(115.00), &[payment(dec!(15), 9)]);
        assert_eq!(res.status, InvoiceStatus::Partial);
        assert_eq!(res.paid_sum, dec!(15));
        assert_eq!(res.paid_at, None);
    }

    #[test]
    fn full_payment_is_paid_with_crossing_timestamp() {
        let payments = [payment(dec!(100), 9), payment(dec!(15), 14)];
        let res = resolve_status(InvoiceStatus::Partial, dec!(115.00), &payments);
        assert_eq!(res.status, InvoiceStatus::Paid);
        assert_eq!(res.paid_sum, dec!(115));
        assert_eq!(res.paid_at, Some(at(14)));
    }

    #[test]
    fn crossing_timestamp_uses_chronological_order() {
        // Listed out of order: the 14:00 payment alone crosses the total.
        let payments = [payment(dec!(10), 16), payment(dec!(115), 14)];
        let res = resolve_status(InvoiceStatus::Pending, dec!(115.00), &payments);
        assert_eq!(res.status, InvoiceStatus::Paid);
        assert_eq!(res.paid_at, Some(at(14)));
    }

    #[test]
    fn cancelled_is_sticky() {
        let payments = [payment(dec!(115), 9)];
        let res = resolve_status(InvoiceStatus::Cancelled, dec!(115.00), &payments);
        assert_eq!(res.status, InvoiceStatus::Cancelled);
        assert_eq!(res.paid_sum, dec!(115));
        assert_eq!(res.paid_at, None);
    }

    #[test]
    fn resolver_is_idempotent() {
        let payments = [payment(dec!(40), 9), payment(dec!(20), 11)];
        let first = resolve_status(InvoiceStatus::Pending, dec!(115.00), &payments);
        let second = resolve_status(first.status, dec!(115.00), &payments);
        assert_eq!(first, second);
    }

    #[test]
    fn totals_round_to_cents() {
        let (tax, total) = invoice_totals(dec!(100), dec!(0.15));
        assert_eq!(tax, dec!(15.00));
        assert_eq!(total, dec!(115.00));

        let (tax, total) = invoice_totals(dec!(33.33), dec!(0.15));
        assert_eq!(tax, dec!(5.00));
        assert_eq!(total, dec!(38.33));
    }

    #[test]
    fn remaining_is_total_minus_paid() {
        assert_eq!(remaining(dec!(115.00), dec!(15.00)), dec!(100.00));
    }

    #[test]
    fn overdue_applies_only_to_open_invoices_past_due() {
        let due_on = chrono::NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let mut invoice = crate::db::InvoiceRecord {
            id: uuid::Uuid::new_v4(),
            invoice_number: "INV-0001".to_string(),
            client_id: uuid::Uuid::new_v4(),
            matter_id: None,
            base_amount: dec!(100),
            tax_amount: dec!(15),
            total_amount: dec!(115),
            status: InvoiceStatus::Pending,
            issued_on: due_on,
            due_on,
            paid_at: None,
            notes: None,
            created_at: at(9),
            updated_at: at(9),
        };

        let day_after = due_on.succ_opt().unwrap();
        assert!(super::is_overdue(&invoice, day_after));
        assert!(!super::is_overdue(&invoice, due_on));

        invoice.status = InvoiceStatus::Paid;
        assert!(!super::is_overdue(&invoice, day_after));
        invoice.status = InvoiceStatus::Cancelled;
        assert!(!super::is_overdue(&invoice, day_after));
    }
}
