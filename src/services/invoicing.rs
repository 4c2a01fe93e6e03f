use std::{sync::Arc, time::Duration};

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        invoice::{self, Entity as Invoice, InvoiceStatus},
        invoice_line_item::{self, Entity as InvoiceLineItem},
        payment::{self, Entity as Payment, REFUND_METHOD},
        repair_order::{self, Entity as RepairOrder, RepairStatus},
        repair_status_log,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{document_number, repair_orders},
};

#[derive(Debug, Clone)]
pub struct NewInvoiceLine {
    pub description: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub repair_order_id: Uuid,
    pub lines: Vec<NewInvoiceLine>,
    pub tax_amount: Decimal,
    pub shipping_amount: Decimal,
    pub discount_amount: Decimal,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub amount: Decimal,
    pub method: String,
    pub reference: Option<String>,
    pub received_by: Option<Uuid>,
    pub idempotency_key: Option<String>,
}

/// A payment application; `replayed` is true when an idempotency key
/// matched an existing row and nothing was written.
#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    pub invoice: invoice::Model,
    pub payment: payment::Model,
    pub replayed: bool,
}

#[derive(Debug, Clone)]
pub struct InvoiceDetail {
    pub invoice: invoice::Model,
    pub lines: Vec<invoice_line_item::Model>,
    pub payments: Vec<payment::Model>,
}

/// Invoice and payment reconciliation.
///
/// `payments` is an append-only ledger; `invoices.amount_paid` and `status`
/// are derived from it in the same transaction as each payment append.
/// Payment-side mutations serialize on an in-process per-invoice lock.
#[derive(Clone)]
pub struct InvoicingService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    invoice_locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
    lock_wait: Duration,
}

impl InvoicingService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender, lock_wait: Duration) -> Self {
        Self {
            db,
            event_sender,
            invoice_locks: Arc::new(DashMap::new()),
            lock_wait,
        }
    }

    /// Issues the invoice for a completed repair and moves the order to
    /// `invoiced`, both in one transaction. An order carries at most one
    /// non-voided invoice.
    #[instrument(skip(self, new), fields(repair_order_id = %new.repair_order_id))]
    pub async fn create_invoice(&self, new: NewInvoice) -> Result<InvoiceDetail, ServiceError> {
        if new.lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "an invoice requires at least one line item".to_string(),
            ));
        }
        for line in &new.lines {
            if line.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "line '{}' has non-positive quantity",
                    line.description
                )));
            }
            if line.unit_price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "line '{}' has negative unit price",
                    line.description
                )));
            }
        }
        for (label, amount) in [
            ("tax", new.tax_amount),
            ("shipping", new.shipping_amount),
            ("discount", new.discount_amount),
        ] {
            if amount < Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "{} amount must not be negative",
                    label
                )));
            }
        }

        let detail = self
            .db
            .transaction::<_, InvoiceDetail, ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = RepairOrder::find_by_id(new.repair_order_id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!(
                                "repair order {} not found",
                                new.repair_order_id
                            ))
                        })?;
                    if order.repair_status() != Some(RepairStatus::Completed) {
                        return Err(ServiceError::PreconditionFailed(format!(
                            "repair order {} is {}, not completed; it cannot be invoiced",
                            order.order_number, order.status
                        )));
                    }
                    if repair_orders::current_invoice(txn, order.id).await?.is_some() {
                        return Err(ServiceError::PreconditionFailed(format!(
                            "repair order {} already has an open invoice",
                            order.order_number
                        )));
                    }

                    let subtotal: Decimal = new
                        .lines
                        .iter()
                        .map(|l| Decimal::from(l.quantity) * l.unit_price)
                        .sum();
                    let total = subtotal + new.tax_amount + new.shipping_amount
                        - new.discount_amount;
                    if total < Decimal::ZERO {
                        return Err(ServiceError::ValidationError(format!(
                            "discount {} exceeds invoice value {}",
                            new.discount_amount,
                            subtotal + new.tax_amount + new.shipping_amount
                        )));
                    }

                    let now = Utc::now();
                    let invoice_number = document_number("INV");
                    let created = invoice::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        invoice_number: Set(invoice_number.clone()),
                        repair_order_id: Set(order.id),
                        subtotal: Set(subtotal),
                        tax_amount: Set(new.tax_amount),
                        shipping_amount: Set(new.shipping_amount),
                        discount_amount: Set(new.discount_amount),
                        total_amount: Set(total),
                        amount_paid: Set(Decimal::ZERO),
                        status: Set(InvoiceStatus::derive(total, Decimal::ZERO)
                            .as_str()
                            .to_string()),
                        created_by: Set(new.created_by),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                    .insert(txn)
                    .await?;

                    let mut lines = Vec::with_capacity(new.lines.len());
                    for line in &new.lines {
                        let row = invoice_line_item::ActiveModel {
                            id: Set(Uuid::new_v4()),
                            invoice_id: Set(created.id),
                            description: Set(line.description.clone()),
                            quantity: Set(line.quantity),
                            unit_price: Set(line.unit_price),
                            line_total: Set(Decimal::from(line.quantity) * line.unit_price),
                            created_at: Set(now),
                        }
                        .insert(txn)
                        .await?;
                        lines.push(row);
                    }

                    repair_orders::transition_in(
                        txn,
                        order,
                        RepairStatus::Invoiced,
                        new.created_by,
                        Some(format!("invoice {} issued", invoice_number)),
                    )
                    .await?;

                    Ok(InvoiceDetail {
                        invoice: created,
                        lines,
                        payments: Vec::new(),
                    })
                })
            })
            .await
            .map_err(ServiceError::from)?;

        self.event_sender.send_or_log(Event::InvoiceCreated {
            invoice_id: detail.invoice.id,
            repair_order_id: detail.invoice.repair_order_id,
            total_amount: detail.invoice.total_amount,
        });

        Ok(detail)
    }

    /// Applies a payment against the remaining balance. Overpayment is
    /// rejected outright; an `idempotency_key` seen before replays the
    /// original outcome without writing.
    #[instrument(skip(self, new), fields(amount = %new.amount, method = %new.method))]
    pub async fn apply_payment(
        &self,
        invoice_id: Uuid,
        new: NewPayment,
    ) -> Result<PaymentOutcome, ServiceError> {
        if new.amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "payment amount must be positive".to_string(),
            ));
        }
        if new.method.trim().is_empty() || new.method == REFUND_METHOD {
            return Err(ServiceError::ValidationError(format!(
                "'{}' is not a valid payment method",
                new.method
            )));
        }

        let _guard = self.lock_invoice(invoice_id).await?;

        let outcome = self
            .db
            .transaction::<_, PaymentOutcome, ServiceError>(move |txn| {
                Box::pin(async move {
                    let invoice = load_invoice(txn, invoice_id).await?;
                    reject_if_voided(&invoice)?;

                    if let Some(key) = &new.idempotency_key {
                        let existing = Payment::find()
                            .filter(payment::Column::InvoiceId.eq(invoice_id))
                            .filter(payment::Column::IdempotencyKey.eq(key.clone()))
                            .one(txn)
                            .await?;
                        if let Some(existing) = existing {
                            return Ok(PaymentOutcome {
                                invoice,
                                payment: existing,
                                replayed: true,
                            });
                        }
                    }

                    let remaining = invoice.remaining();
                    if new.amount > remaining {
                        return Err(ServiceError::OverpaymentRejected(format!(
                            "payment of {} exceeds remaining balance {} on invoice {}",
                            new.amount, remaining, invoice.invoice_number
                        )));
                    }

                    let now = Utc::now();
                    let row = payment::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        invoice_id: Set(invoice_id),
                        amount: Set(new.amount),
                        method: Set(new.method.clone()),
                        reference: Set(new.reference.clone()),
                        received_by: Set(new.received_by),
                        idempotency_key: Set(new.idempotency_key.clone()),
                        created_at: Set(now),
                    }
                    .insert(txn)
                    .await?;

                    let paid = invoice.amount_paid + new.amount;
                    let total = invoice.total_amount;
                    let mut active: invoice::ActiveModel = invoice.into();
                    active.amount_paid = Set(paid);
                    active.status = Set(InvoiceStatus::derive(total, paid).as_str().to_string());
                    active.updated_at = Set(now);
                    let invoice = active.update(txn).await?;

                    Ok(PaymentOutcome {
                        invoice,
                        payment: row,
                        replayed: false,
                    })
                })
            })
            .await
            .map_err(ServiceError::from)?;

        if !outcome.replayed {
            info!(
                invoice = %outcome.invoice.invoice_number,
                amount = %outcome.payment.amount,
                status = %outcome.invoice.status,
                "payment applied"
            );
            self.event_sender.send_or_log(Event::PaymentApplied {
                payment_id: outcome.payment.id,
                invoice_id: outcome.invoice.id,
                amount: outcome.payment.amount,
                new_status: outcome.invoice.status.clone(),
            });
        }

        Ok(outcome)
    }

    /// Refunds part or all of what was paid, as a negative ledger row with
    /// method `refund`. The derived status walks back accordingly.
    #[instrument(skip(self))]
    pub async fn refund_payment(
        &self,
        invoice_id: Uuid,
        amount: Decimal,
        reference: Option<String>,
        received_by: Option<Uuid>,
    ) -> Result<PaymentOutcome, ServiceError> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "refund amount must be positive".to_string(),
            ));
        }

        let _guard = self.lock_invoice(invoice_id).await?;

        let outcome = self
            .db
            .transaction::<_, PaymentOutcome, ServiceError>(move |txn| {
                Box::pin(async move {
                    let invoice = load_invoice(txn, invoice_id).await?;
                    reject_if_voided(&invoice)?;

                    if amount > invoice.amount_paid {
                        return Err(ServiceError::ValidationError(format!(
                            "refund of {} exceeds the {} paid on invoice {}",
                            amount, invoice.amount_paid, invoice.invoice_number
                        )));
                    }

                    let now = Utc::now();
                    let row = payment::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        invoice_id: Set(invoice_id),
                        amount: Set(-amount),
                        method: Set(REFUND_METHOD.to_string()),
                        reference: Set(reference.clone()),
                        received_by: Set(received_by),
                        idempotency_key: Set(None),
                        created_at: Set(now),
                    }
                    .insert(txn)
                    .await?;

                    let paid = invoice.amount_paid - amount;
                    let total = invoice.total_amount;
                    let mut active: invoice::ActiveModel = invoice.into();
                    active.amount_paid = Set(paid);
                    active.status = Set(InvoiceStatus::derive(total, paid).as_str().to_string());
                    active.updated_at = Set(now);
                    let invoice = active.update(txn).await?;

                    Ok(PaymentOutcome {
                        invoice,
                        payment: row,
                        replayed: false,
                    })
                })
            })
            .await
            .map_err(ServiceError::from)?;

        self.event_sender.send_or_log(Event::PaymentRefunded {
            payment_id: outcome.payment.id,
            invoice_id: outcome.invoice.id,
            amount,
        });

        Ok(outcome)
    }

    /// Voids an unpaid invoice and reopens the order for re-invoicing.
    /// Anything paid must be refunded first.
    #[instrument(skip(self))]
    pub async fn void_invoice(
        &self,
        invoice_id: Uuid,
        actor: Option<Uuid>,
        reason: Option<String>,
    ) -> Result<invoice::Model, ServiceError> {
        let _guard = self.lock_invoice(invoice_id).await?;

        let invoice = self
            .db
            .transaction::<_, invoice::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let invoice = load_invoice(txn, invoice_id).await?;
                    reject_if_voided(&invoice)?;
                    if invoice.amount_paid != Decimal::ZERO {
                        return Err(ServiceError::PreconditionFailed(format!(
                            "invoice {} has {} paid; refund before voiding",
                            invoice.invoice_number, invoice.amount_paid
                        )));
                    }

                    let now = Utc::now();
                    let order_id = invoice.repair_order_id;
                    let invoice_number = invoice.invoice_number.clone();
                    let mut active: invoice::ActiveModel = invoice.into();
                    active.status = Set(InvoiceStatus::Voided.as_str().to_string());
                    active.updated_at = Set(now);
                    let invoice = active.update(txn).await?;

                    // Voiding reverses the invoicing step. The reversal is
                    // system-driven and not part of the forward transition
                    // table, so it writes the order and audit row directly.
                    let order = RepairOrder::find_by_id(order_id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("repair order {} not found", order_id))
                        })?;
                    if order.repair_status() == Some(RepairStatus::Invoiced) {
                        let mut active: repair_order::ActiveModel = order.into();
                        active.status = Set(RepairStatus::Completed.as_str().to_string());
                        active.updated_at = Set(now);
                        active.update(txn).await?;

                        repair_status_log::ActiveModel {
                            id: Set(Uuid::new_v4()),
                            repair_order_id: Set(order_id),
                            from_status: Set(Some(RepairStatus::Invoiced.as_str().to_string())),
                            to_status: Set(RepairStatus::Completed.as_str().to_string()),
                            changed_by: Set(actor),
                            note: Set(Some(match &reason {
                                Some(reason) => {
                                    format!("invoice {} voided: {}", invoice_number, reason)
                                }
                                None => format!("invoice {} voided", invoice_number),
                            })),
                            created_at: Set(now),
                        }
                        .insert(txn)
                        .await?;
                    }

                    Ok(invoice)
                })
            })
            .await
            .map_err(ServiceError::from)?;

        self.event_sender.send_or_log(Event::InvoiceVoided {
            invoice_id: invoice.id,
        });

        Ok(invoice)
    }

    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<InvoiceDetail, ServiceError> {
        let invoice = load_invoice(&*self.db, invoice_id).await?;
        let lines = InvoiceLineItem::find()
            .filter(invoice_line_item::Column::InvoiceId.eq(invoice_id))
            .order_by_asc(invoice_line_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        let payments = Payment::find()
            .filter(payment::Column::InvoiceId.eq(invoice_id))
            .order_by_asc(payment::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(InvoiceDetail {
            invoice,
            lines,
            payments,
        })
    }

    async fn lock_invoice(&self, invoice_id: Uuid) -> Result<OwnedMutexGuard<()>, ServiceError> {
        let cell = self.invoice_locks.entry(invoice_id).or_default().value().clone();
        timeout(self.lock_wait, cell.lock_owned()).await.map_err(|_| {
            ServiceError::ConcurrencyConflict(format!(
                "timed out waiting for payment lock on invoice {}",
                invoice_id
            ))
        })
    }
}

async fn load_invoice<C: ConnectionTrait>(
    conn: &C,
    invoice_id: Uuid,
) -> Result<invoice::Model, ServiceError> {
    Invoice::find_by_id(invoice_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("invoice {} not found", invoice_id)))
}

fn reject_if_voided(invoice: &invoice::Model) -> Result<(), ServiceError> {
    if invoice.invoice_status() == Some(InvoiceStatus::Voided) {
        return Err(ServiceError::InvoiceAlreadyClosed(format!(
            "invoice {} is voided",
            invoice.invoice_number
        )));
    }
    Ok(())
}
