//! Back-office billing CLI.
//!
//! Thin front end over the `chancery` library: resolves configuration from
//! the environment, opens the configured backend, and exposes the ledger and
//! deletion operations as subcommands.

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use uuid::Uuid;

use chancery::config::Config;
use chancery::db::{
    EntityRef, InvoiceFilter, PaymentMethod, RecordPaymentParams, connect_from_config,
};
use chancery::files::LocalFiles;
use chancery::ledger::{
    Capability, CapabilitySet, CreateInvoiceInput, add_payment, cancel_invoice, create_invoice,
    force_delete, remove_payment, safe_delete,
};

#[derive(Parser)]
#[command(name = "chancery")]
#[command(about = "Billing ledger for a small law office")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply schema migrations and exit.
    Migrate,

    /// Show outstanding and collected totals grouped by invoice status.
    Summary,

    /// Create an invoice for a client.
    InvoiceCreate {
        #[arg(long)]
        client_id: Uuid,
        #[arg(long)]
        matter_id: Option<Uuid>,
        /// Pre-tax amount.
        #[arg(long)]
        amount: Decimal,
        /// Tax rate override; defaults to the configured office rate.
        #[arg(long)]
        tax_rate: Option<Decimal>,
        #[arg(long)]
        due_on: NaiveDate,
        #[arg(long)]
        notes: Option<String>,
    },

    /// List invoices, optionally filtered.
    InvoiceList {
        #[arg(long)]
        client_id: Option<Uuid>,
        #[arg(long)]
        matter_id: Option<Uuid>,
    },

    /// Cancel an invoice that has no payments.
    InvoiceCancel {
        invoice_id: Uuid,
    },

    /// Record a payment against an invoice.
    PaymentAdd {
        #[arg(long)]
        invoice_id: Uuid,
        #[arg(long)]
        amount: Decimal,
        #[arg(long, default_value = "transfer")]
        method: String,
        #[arg(long)]
        reference: Option<String>,
    },

    /// Delete a payment and re-derive the invoice status.
    PaymentRemove {
        payment_id: Uuid,
    },

    /// Delete a record, refusing when dependents exist unless --force.
    Delete {
        /// One of: client, matter, invoice, appointment, document.
        kind: String,
        id: Uuid,
        /// Delete the full dependency closure.
        #[arg(long)]
        force: bool,
    },
}

fn entity_ref(kind: &str, id: Uuid) -> anyhow::Result<EntityRef> {
    match kind {
        "client" => Ok(EntityRef::Client(id)),
        "matter" => Ok(EntityRef::Matter(id)),
        "invoice" => Ok(EntityRef::Invoice(id)),
        "appointment" => Ok(EntityRef::Appointment(id)),
        "document" => Ok(EntityRef::Document(id)),
        other => anyhow::bail!("unknown record kind '{other}'"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::resolve().context("failed to resolve configuration")?;
    let db = connect_from_config(&config.database)
        .await
        .context("failed to open database")?;
    let files = LocalFiles::new(&config.office.files_root);

    match cli.command {
        Commands::Migrate => {
            // connect_from_config already ran them; reaching here means done.
            println!("migrations applied");
        }
        Commands::Summary => {
            let summary = db.billing_summary().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::InvoiceCreate {
            client_id,
            matter_id,
            amount,
            tax_rate,
            due_on,
            notes,
        } => {
            let input = CreateInvoiceInput {
                client_id,
                matter_id,
                base_amount: amount,
                tax_rate: tax_rate.unwrap_or(config.office.default_tax_rate),
                issued_on: None,
                due_on,
                notes,
            };
            let invoice = create_invoice(db.as_ref(), &config.office, &input).await?;
            println!("{}", serde_json::to_string_pretty(&invoice)?);
        }
        Commands::InvoiceList {
            client_id,
            matter_id,
        } => {
            let filter = InvoiceFilter {
                client_id,
                matter_id,
                status: None,
            };
            let invoices = db.list_invoices(&filter).await?;
            println!("{}", serde_json::to_string_pretty(&invoices)?);
        }
        Commands::InvoiceCancel { invoice_id } => {
            let invoice = cancel_invoice(db.as_ref(), invoice_id).await?;
            println!(
                "cancelled invoice {} ({})",
                invoice.invoice_number, invoice.id
            );
        }
        Commands::PaymentAdd {
            invoice_id,
            amount,
            method,
            reference,
        } => {
            let method = PaymentMethod::from_db_value(&method)
                .with_context(|| format!("unknown payment method '{method}'"))?;
            let input = RecordPaymentParams {
                amount,
                method,
                reference,
                notes: None,
                paid_at: Utc::now(),
            };
            let (invoice, payment) = add_payment(db.as_ref(), invoice_id, &input).await?;
            println!(
                "recorded payment {} of {}; invoice {} is now {}",
                payment.id,
                payment.amount,
                invoice.invoice_number,
                invoice.status.as_str()
            );
        }
        Commands::PaymentRemove { payment_id } => {
            let invoice = remove_payment(db.as_ref(), payment_id).await?;
            println!(
                "removed payment; invoice {} is now {}",
                invoice.invoice_number,
                invoice.status.as_str()
            );
        }
        Commands::Delete { kind, id, force } => {
            let entity = entity_ref(&kind, id)?;
            if force {
                let capabilities = CapabilitySet::new().grant(Capability::ForceDelete);
                let deleted = force_delete(db.as_ref(), &files, &capabilities, &entity).await?;
                println!("deleted {kind} {id} and dependents ({deleted})");
            } else {
                safe_delete(db.as_ref(), &files, &entity).await?;
                println!("deleted {kind} {id}");
            }
        }
    }

    Ok(())
}
