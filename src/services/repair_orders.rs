use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    entities::{
        invoice::{self, Entity as Invoice, InvoiceStatus},
        repair_order::{self, Entity as RepairOrder, RepairStatus},
        repair_status_log::{self, Entity as RepairStatusLog},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::document_number,
};

#[derive(Debug, Clone)]
pub struct NewRepairOrder {
    pub customer_id: Uuid,
    pub device: String,
    pub reported_problem: Option<String>,
    pub created_by: Option<Uuid>,
}

/// Repair order state machine.
///
/// Every status change goes through [`transition_in`], which validates the
/// transition table and appends a `repair_status_logs` row in the same
/// transaction. Orchestrated changes (invoicing, completion, delivery) call
/// the crate-internal helper from their own transactions; the named
/// operations here cover the transitions a human drives directly.
#[derive(Clone)]
pub struct RepairOrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl RepairOrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Creates an order in `received` with its opening status-log row
    /// (`from_status` null).
    #[instrument(skip(self, new), fields(customer_id = %new.customer_id))]
    pub async fn create_order(
        &self,
        new: NewRepairOrder,
    ) -> Result<repair_order::Model, ServiceError> {
        if new.device.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "device description must not be empty".to_string(),
            ));
        }

        let order = self
            .db
            .transaction::<_, repair_order::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let now = Utc::now();
                    let order = repair_order::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        order_number: Set(document_number("RO")),
                        customer_id: Set(new.customer_id),
                        device: Set(new.device.clone()),
                        reported_problem: Set(new.reported_problem.clone()),
                        status: Set(RepairStatus::Received.as_str().to_string()),
                        technician_id: Set(None),
                        estimated_cost: Set(None),
                        actual_cost: Set(None),
                        delivered_at: Set(None),
                        delivered_by: Set(None),
                        delivery_signature: Set(None),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                    .insert(txn)
                    .await?;

                    repair_status_log::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        repair_order_id: Set(order.id),
                        from_status: Set(None),
                        to_status: Set(RepairStatus::Received.as_str().to_string()),
                        changed_by: Set(new.created_by),
                        note: Set(None),
                        created_at: Set(now),
                    }
                    .insert(txn)
                    .await?;

                    Ok(order)
                })
            })
            .await
            .map_err(ServiceError::from)?;

        self.event_sender.send_or_log(Event::RepairOrderCreated {
            repair_order_id: order.id,
        });

        Ok(order)
    }

    pub async fn begin_inspection(
        &self,
        order_id: Uuid,
        actor: Option<Uuid>,
    ) -> Result<repair_order::Model, ServiceError> {
        self.transition(order_id, RepairStatus::Inspection, actor, None, |_| Ok(()))
            .await
    }

    /// Records the estimate and moves the order to `quotation_sent`.
    pub async fn send_quotation(
        &self,
        order_id: Uuid,
        estimated_cost: Decimal,
        actor: Option<Uuid>,
    ) -> Result<repair_order::Model, ServiceError> {
        if estimated_cost < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "estimated cost must not be negative".to_string(),
            ));
        }
        self.transition(
            order_id,
            RepairStatus::QuotationSent,
            actor,
            None,
            move |active| {
                active.estimated_cost = Set(Some(estimated_cost));
                Ok(())
            },
        )
        .await
    }

    pub async fn approve_quotation(
        &self,
        order_id: Uuid,
        actor: Option<Uuid>,
    ) -> Result<repair_order::Model, ServiceError> {
        self.transition(
            order_id,
            RepairStatus::QuotationApproved,
            actor,
            None,
            |_| Ok(()),
        )
        .await
    }

    /// Assigns a technician and moves the order onto the bench. Reachable
    /// from `received` (walk-in), `quotation_approved` and `waiting_parts`.
    pub async fn start_repair(
        &self,
        order_id: Uuid,
        technician_id: Uuid,
        estimated_cost: Option<Decimal>,
        actor: Option<Uuid>,
    ) -> Result<repair_order::Model, ServiceError> {
        if matches!(estimated_cost, Some(cost) if cost < Decimal::ZERO) {
            return Err(ServiceError::ValidationError(
                "estimated cost must not be negative".to_string(),
            ));
        }
        self.transition(
            order_id,
            RepairStatus::UnderRepair,
            actor,
            None,
            move |active| {
                active.technician_id = Set(Some(technician_id));
                if let Some(cost) = estimated_cost {
                    active.estimated_cost = Set(Some(cost));
                }
                Ok(())
            },
        )
        .await
    }

    /// Parts arrived: `waiting_parts` back to the bench. Keeps the assigned
    /// technician.
    pub async fn resume_repair(
        &self,
        order_id: Uuid,
        actor: Option<Uuid>,
    ) -> Result<repair_order::Model, ServiceError> {
        self.transition(order_id, RepairStatus::UnderRepair, actor, None, |_| Ok(()))
            .await
    }

    pub async fn mark_waiting_parts(
        &self,
        order_id: Uuid,
        actor: Option<Uuid>,
        note: Option<String>,
    ) -> Result<repair_order::Model, ServiceError> {
        self.transition(order_id, RepairStatus::WaitingParts, actor, note, |_| Ok(()))
            .await
    }

    /// Terminal rejection; a reason is mandatory for the audit trail.
    pub async fn reject(
        &self,
        order_id: Uuid,
        reason: String,
        actor: Option<Uuid>,
    ) -> Result<repair_order::Model, ServiceError> {
        if reason.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "a rejection reason is required".to_string(),
            ));
        }
        self.transition(order_id, RepairStatus::Rejected, actor, Some(reason), |_| {
            Ok(())
        })
        .await
    }

    pub async fn hold(
        &self,
        order_id: Uuid,
        actor: Option<Uuid>,
        note: Option<String>,
    ) -> Result<repair_order::Model, ServiceError> {
        self.transition(order_id, RepairStatus::OnHold, actor, note, |_| Ok(()))
            .await
    }

    /// Returns an on-hold order to the status it held before the hold, read
    /// back from the status log.
    #[instrument(skip(self))]
    pub async fn resume_from_hold(
        &self,
        order_id: Uuid,
        actor: Option<Uuid>,
    ) -> Result<repair_order::Model, ServiceError> {
        let order = self.load_order(order_id).await?;
        let status = repair_status_of(&order)?;
        if status != RepairStatus::OnHold {
            return Err(ServiceError::PreconditionFailed(format!(
                "repair order {} is not on hold",
                order.order_number
            )));
        }

        let hold_entry = RepairStatusLog::find()
            .filter(repair_status_log::Column::RepairOrderId.eq(order_id))
            .filter(repair_status_log::Column::ToStatus.eq(RepairStatus::OnHold.as_str()))
            .order_by_desc(repair_status_log::Column::CreatedAt)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "repair order {} is on hold but has no hold log entry",
                    order.order_number
                ))
            })?;

        let resume_to = hold_entry
            .from_status
            .as_deref()
            .and_then(RepairStatus::from_str)
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "hold log entry for repair order {} has no usable prior status",
                    order.order_number
                ))
            })?;

        self.transition(order_id, resume_to, actor, Some("resumed from hold".to_string()), |_| {
            Ok(())
        })
        .await
    }

    /// The invoice must be fully paid before the device is staged for
    /// pickup.
    #[instrument(skip(self))]
    pub async fn mark_ready_for_delivery(
        &self,
        order_id: Uuid,
        actor: Option<Uuid>,
    ) -> Result<repair_order::Model, ServiceError> {
        let invoice = current_invoice(&*self.db, order_id).await?.ok_or_else(|| {
            ServiceError::PreconditionFailed(format!(
                "repair order {} has no invoice to settle",
                order_id
            ))
        })?;
        if invoice.invoice_status() != Some(InvoiceStatus::Paid) {
            return Err(ServiceError::PreconditionFailed(format!(
                "invoice {} is not fully paid ({} outstanding)",
                invoice.invoice_number,
                invoice.remaining()
            )));
        }

        self.transition(order_id, RepairStatus::ReadyForDelivery, actor, None, |_| {
            Ok(())
        })
        .await
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<repair_order::Model, ServiceError> {
        self.load_order(order_id).await
    }

    /// Full audit trail for one order, oldest first.
    pub async fn status_history(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<repair_status_log::Model>, ServiceError> {
        self.load_order(order_id).await?;
        let logs = RepairStatusLog::find()
            .filter(repair_status_log::Column::RepairOrderId.eq(order_id))
            .order_by_asc(repair_status_log::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(logs)
    }

    pub async fn list_orders(
        &self,
        status: Option<RepairStatus>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<repair_order::Model>, u64), ServiceError> {
        let mut query = RepairOrder::find().order_by_desc(repair_order::Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(repair_order::Column::Status.eq(status.as_str()));
        }

        let paginator = query.paginate(&*self.db, limit);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((orders, total))
    }

    async fn load_order(&self, order_id: Uuid) -> Result<repair_order::Model, ServiceError> {
        RepairOrder::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("repair order {} not found", order_id)))
    }

    /// Loads, mutates and transitions an order in one transaction, then
    /// emits the status-change event.
    async fn transition<F>(
        &self,
        order_id: Uuid,
        to: RepairStatus,
        actor: Option<Uuid>,
        note: Option<String>,
        mutate: F,
    ) -> Result<repair_order::Model, ServiceError>
    where
        F: FnOnce(&mut repair_order::ActiveModel) -> Result<(), ServiceError> + Send + 'static,
    {
        let (order, log) = self
            .db
            .transaction::<_, (repair_order::Model, repair_status_log::Model), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        let order = RepairOrder::find_by_id(order_id)
                            .one(txn)
                            .await?
                            .ok_or_else(|| {
                                ServiceError::NotFound(format!(
                                    "repair order {} not found",
                                    order_id
                                ))
                            })?;
                        transition_with(txn, order, to, actor, note, mutate).await
                    })
                },
            )
            .await
            .map_err(ServiceError::from)?;

        self.event_sender.send_or_log(Event::RepairStatusChanged {
            repair_order_id: order.id,
            old_status: log.from_status.clone(),
            new_status: log.to_status.clone(),
        });

        Ok(order)
    }
}

fn repair_status_of(order: &repair_order::Model) -> Result<RepairStatus, ServiceError> {
    order.repair_status().ok_or_else(|| {
        ServiceError::InternalError(format!(
            "repair order {} has unrecognized status {}",
            order.order_number, order.status
        ))
    })
}

/// The order's non-voided invoice, if any. Voided invoices stay on record
/// but no longer represent the order's bill.
pub(crate) async fn current_invoice<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Option<invoice::Model>, ServiceError> {
    let invoice = Invoice::find()
        .filter(invoice::Column::RepairOrderId.eq(order_id))
        .filter(invoice::Column::Status.ne(InvoiceStatus::Voided.as_str()))
        .one(conn)
        .await?;
    Ok(invoice)
}

/// Validates and applies one status change inside a caller-owned
/// transaction, appending the audit row. Used by this service and by the
/// invoicing/workflow orchestrations so their order updates commit with
/// their own writes.
pub(crate) async fn transition_in<C: ConnectionTrait>(
    conn: &C,
    order: repair_order::Model,
    to: RepairStatus,
    changed_by: Option<Uuid>,
    note: Option<String>,
) -> Result<(repair_order::Model, repair_status_log::Model), ServiceError> {
    transition_with(conn, order, to, changed_by, note, |_| Ok(())).await
}

async fn transition_with<C, F>(
    conn: &C,
    order: repair_order::Model,
    to: RepairStatus,
    changed_by: Option<Uuid>,
    note: Option<String>,
    mutate: F,
) -> Result<(repair_order::Model, repair_status_log::Model), ServiceError>
where
    C: ConnectionTrait,
    F: FnOnce(&mut repair_order::ActiveModel) -> Result<(), ServiceError>,
{
    let from = repair_status_of(&order)?;
    if !from.can_transition_to(to) {
        return Err(ServiceError::InvalidTransition(format!(
            "repair order {} cannot move from {} to {}",
            order.order_number,
            from.as_str(),
            to.as_str()
        )));
    }

    let now = Utc::now();
    let order_id = order.id;
    let mut active: repair_order::ActiveModel = order.into();
    active.status = Set(to.as_str().to_string());
    active.updated_at = Set(now);
    mutate(&mut active)?;
    let updated = active.update(conn).await?;

    let log = repair_status_log::ActiveModel {
        id: Set(Uuid::new_v4()),
        repair_order_id: Set(order_id),
        from_status: Set(Some(from.as_str().to_string())),
        to_status: Set(to.as_str().to_string()),
        changed_by: Set(changed_by),
        note: Set(note),
        created_at: Set(now),
    }
    .insert(conn)
    .await?;

    Ok((updated, log))
}
