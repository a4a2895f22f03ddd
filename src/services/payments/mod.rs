//! Gateway payments: initiation, callback reconciliation and refunds.
//!
//! Callbacks are idempotent. A payment is completed by a conditional update that
//! only matches rows not yet completed, so a replayed success, IPN or manual
//! confirmation is reported as [`CallbackOutcome::AlreadyProcessed`] and has no
//! further effect on the order, stock, coupons or notifications.

pub mod bkash;
pub mod sslcommerz;

use crate::{
    config::AppConfig,
    db::{self, DbPool},
    entities::{
        order::{self, Entity as OrderEntity, OrderStatus, PaymentMethod, PaymentStatus},
        payment::{self, Entity as PaymentEntity, PaymentRecordStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::order_status,
};
use bkash::{BkashClient, CreatePayment};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sslcommerz::{SslCallbackUrls, SslCommerzClient};
use std::{collections::BTreeMap, str::FromStr, sync::Arc};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub const BKASH_CALLBACK_PATH: &str = "/api/v1/payments/bkash/callback";
pub const SSL_SUCCESS_PATH: &str = "/api/v1/payments/sslcommerz/success";
pub const SSL_FAIL_PATH: &str = "/api/v1/payments/sslcommerz/fail";
pub const SSL_CANCEL_PATH: &str = "/api/v1/payments/sslcommerz/cancel";
pub const SSL_IPN_PATH: &str = "/api/v1/payments/sslcommerz/ipn";

const GATEWAY_ACTOR: &str = "payment-gateway";

/// Failure talking to a payment gateway
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("gateway timed out")]
    Timeout,
    #[error("gateway returned HTTP {status}")]
    Http { status: u16, body: String },
    #[error("gateway rejected the request: {0}")]
    Rejected(String),
    #[error("malformed gateway response: {0}")]
    Malformed(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_decode() {
            GatewayError::Malformed(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Timeout => ServiceError::GatewayTimeout(err.to_string()),
            other => ServiceError::ExternalServiceError(other.to_string()),
        }
    }
}

/// Gateways send amounts either as strings or numbers
pub(crate) fn parse_amount(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

/// `{PREFIX}-{order_number}-{8 hex}`
pub fn generate_transaction_id(prefix: &str, order_number: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, order_number, &suffix[..8])
}

/// What the customer has to do next after checkout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentStep {
    CashOnDelivery,
    Redirect {
        payment_id: Uuid,
        transaction_id: String,
        url: String,
    },
    /// Nagad and Rocket are reconciled manually
    AwaitingPayment {
        payment_id: Uuid,
        transaction_id: String,
        method: PaymentMethod,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SslCallbackKind {
    Success,
    Fail,
    Cancel,
    Ipn,
}

/// Result of reconciling one gateway callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallbackOutcome {
    Completed {
        order_number: String,
        transaction_id: String,
    },
    AlreadyProcessed {
        order_number: String,
        transaction_id: String,
    },
    FlaggedForReview {
        order_number: String,
        transaction_id: String,
        reason: String,
    },
    Failed {
        order_number: String,
        transaction_id: String,
        reason: String,
    },
}

impl CallbackOutcome {
    pub fn message(&self) -> String {
        match self {
            Self::Completed { .. } => "Payment completed successfully!".to_string(),
            Self::AlreadyProcessed { .. } => "Payment was already processed.".to_string(),
            Self::FlaggedForReview { reason, .. } => {
                format!("Payment received but needs review: {}", reason)
            }
            Self::Failed { .. } => "Payment failed. Please try again.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefundRequest {
    pub amount: Option<Decimal>,
    pub remarks: String,
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DbPool>,
    events: EventSender,
    bkash: BkashClient,
    sslcommerz: SslCommerzClient,
    site_url: String,
    require_signed_redirects: bool,
}

impl PaymentService {
    pub fn new(db: Arc<DbPool>, events: EventSender, config: &AppConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(config.payments.timeout())
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client: {}", e)))?;

        Ok(Self {
            db,
            events,
            bkash: BkashClient::new(http.clone(), config.payments.bkash.clone()),
            sslcommerz: SslCommerzClient::new(http, config.payments.sslcommerz.clone()),
            site_url: config.site_url.trim_end_matches('/').to_string(),
            require_signed_redirects: config.payments.require_signed_redirects,
        })
    }

    fn link(&self, path: &str) -> String {
        format!("{}{}", self.site_url, path)
    }

    /// Starts a gateway payment for a pending order.
    ///
    /// Runs outside the placement transaction. On gateway failure nothing is written
    /// and the order stays pending.
    #[instrument(skip(self, order), fields(order_number = %order.order_number, method = %order.payment_method))]
    pub async fn initiate(&self, order: &order::Model) -> Result<PaymentStep, ServiceError> {
        let method = order.payment_method;
        let Some(prefix) = method.transaction_prefix() else {
            return Ok(PaymentStep::CashOnDelivery);
        };
        let transaction_id = generate_transaction_id(prefix, &order.order_number);

        let gateway = match method {
            PaymentMethod::Bkash => {
                let checkout = self
                    .bkash
                    .create_payment(&CreatePayment {
                        payer_reference: order.phone.clone(),
                        callback_url: self.link(BKASH_CALLBACK_PATH),
                        amount: format!("{:.2}", order.total),
                        merchant_invoice_number: order.order_number.clone(),
                    })
                    .await
                    .map_err(|e| self.init_failed(method, e))?;
                Some((Some(checkout.payment_id), checkout.raw, checkout.bkash_url))
            }
            PaymentMethod::Sslcommerz => {
                let urls = SslCallbackUrls {
                    success: self.link(SSL_SUCCESS_PATH),
                    fail: self.link(SSL_FAIL_PATH),
                    cancel: self.link(SSL_CANCEL_PATH),
                    ipn: self.link(SSL_IPN_PATH),
                };
                let session = self
                    .sslcommerz
                    .create_session(order, &transaction_id, &urls)
                    .await
                    .map_err(|e| self.init_failed(method, e))?;
                Some((session.session_key, session.raw, session.gateway_url))
            }
            PaymentMethod::Nagad | PaymentMethod::Rocket => None,
            PaymentMethod::Cod => return Ok(PaymentStep::CashOnDelivery),
        };

        let (reference, raw, redirect) = match gateway {
            Some((reference, raw, url)) => (reference, Some(raw), Some(url)),
            None => (None, None, None),
        };

        let now = Utc::now();
        let payment_id = Uuid::new_v4();
        let txn = db::begin(&self.db).await?;
        payment::ActiveModel {
            id: Set(payment_id),
            order_id: Set(order.id),
            payment_method: Set(method),
            transaction_id: Set(transaction_id.clone()),
            gateway_reference: Set(reference),
            amount: Set(order.total),
            status: Set(PaymentRecordStatus::Pending),
            gateway_response: Set(raw),
            review_required: Set(false),
            review_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            completed_at: Set(None),
        }
        .insert(&txn)
        .await?;

        OrderEntity::update_many()
            .set(order::ActiveModel {
                transaction_id: Set(Some(transaction_id.clone())),
                payment_status: Set(PaymentStatus::Pending),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(order::Column::Id.eq(order.id))
            .exec(&txn)
            .await?;
        db::commit(txn).await?;

        counter!("bookstore_payments.initiated", 1);
        info!(%transaction_id, "Payment initiated");

        Ok(match redirect {
            Some(url) => PaymentStep::Redirect {
                payment_id,
                transaction_id,
                url,
            },
            None => PaymentStep::AwaitingPayment {
                payment_id,
                transaction_id,
                method,
            },
        })
    }

    fn init_failed(&self, method: PaymentMethod, err: GatewayError) -> ServiceError {
        counter!("bookstore_payments.init_failed", 1);
        warn!(gateway = %method, error = %err, "Payment initialization failed");
        err.into()
    }

    /// Reconciles an SSLCommerz redirect or IPN
    #[instrument(skip(self, fields), fields(tran_id = ?fields.get("tran_id")))]
    pub async fn handle_sslcommerz(
        &self,
        kind: SslCallbackKind,
        fields: BTreeMap<String, String>,
    ) -> Result<CallbackOutcome, ServiceError> {
        counter!("bookstore_payments.callbacks", 1);

        let tran_id = fields
            .get("tran_id")
            .filter(|t| !t.is_empty())
            .cloned()
            .ok_or_else(|| ServiceError::BadRequest("tran_id is required".into()))?;

        let payment = self.find_by_transaction(&tran_id).await?;
        let order = self.order_for(&payment).await?;

        if payment.status == PaymentRecordStatus::Completed {
            return Ok(self.already_processed(&payment, &order));
        }

        let signed = fields.contains_key("verify_sign");
        let signature_checked =
            kind == SslCallbackKind::Ipn || signed || self.require_signed_redirects;
        if signature_checked {
            if !self.sslcommerz.verify(&fields) {
                counter!("bookstore_payments.invalid_signature", 1);
                warn!(%tran_id, %kind, "Rejected callback with invalid signature");
                return Err(ServiceError::BadRequest("invalid callback signature".into()));
            }
        }

        let raw = serde_json::to_value(&fields)?;

        match kind {
            SslCallbackKind::Fail => {
                let reason = fields
                    .get("error")
                    .cloned()
                    .unwrap_or_else(|| "payment failed at gateway".to_string());
                return self.mark_failed(&payment, &order, reason, raw).await;
            }
            SslCallbackKind::Cancel => {
                return self
                    .mark_failed(&payment, &order, "cancelled by customer".to_string(), raw)
                    .await;
            }
            SslCallbackKind::Success | SslCallbackKind::Ipn => {}
        }

        if let Some(status) = fields.get("status") {
            if matches!(
                status.as_str(),
                "FAILED" | "CANCELLED" | "UNATTEMPTED" | "EXPIRED"
            ) {
                let reason = format!("gateway reported {}", status);
                return self.mark_failed(&payment, &order, reason, raw).await;
            }
        }

        let mut amount = fields
            .get("amount")
            .and_then(|a| Decimal::from_str(a.trim()).ok());
        let mut verified = signature_checked;

        if let Some(val_id) = fields.get("val_id").filter(|v| !v.is_empty()) {
            let validation = self.sslcommerz.validate(val_id).await?;
            if !validation.is_valid() {
                let reason = format!("gateway validation returned {}", validation.status);
                return self.flag_for_review(&payment, &order, reason, raw).await;
            }
            if let Some(validated_tran) = &validation.tran_id {
                if validated_tran != &tran_id {
                    let reason = format!("validation belongs to transaction {}", validated_tran);
                    return self.flag_for_review(&payment, &order, reason, raw).await;
                }
            }
            // The validation API is authoritative for the amount
            amount = validation.amount;
            verified = true;
        }

        // Posted fields alone never settle a payment
        if !verified {
            counter!("bookstore_payments.unverified_callbacks", 1);
            warn!(%tran_id, %kind, "Rejected success callback without signature or val_id");
            return Err(ServiceError::BadRequest(
                "callback must be signed or carry a val_id".into(),
            ));
        }

        self.settle(&payment, &order, amount, raw, "SSLCommerz").await
    }

    /// Reconciles the customer's return from bKash
    #[instrument(skip(self))]
    pub async fn handle_bkash(
        &self,
        gateway_payment_id: &str,
        status: &str,
    ) -> Result<CallbackOutcome, ServiceError> {
        counter!("bookstore_payments.callbacks", 1);

        let payment = PaymentEntity::find()
            .filter(payment::Column::GatewayReference.eq(gateway_payment_id))
            .filter(payment::Column::PaymentMethod.eq(PaymentMethod::Bkash))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Payment not found".into()))?;
        let order = self.order_for(&payment).await?;

        if payment.status == PaymentRecordStatus::Completed {
            return Ok(self.already_processed(&payment, &order));
        }

        if status != "success" {
            let reason = format!("customer returned with status {}", status);
            return self
                .mark_failed(&payment, &order, reason, json!({ "status": status }))
                .await;
        }

        let execution = self.bkash.execute_payment(gateway_payment_id).await?;
        if !execution.is_completed() {
            let reason = format!("bKash reported {}", execution.transaction_status);
            return self.mark_failed(&payment, &order, reason, execution.raw).await;
        }

        self.settle(&payment, &order, execution.amount, execution.raw, "bKash")
            .await
    }

    /// Records a Nagad or Rocket payment confirmed out of band
    #[instrument(skip(self))]
    pub async fn confirm_manual_payment(
        &self,
        transaction_id: &str,
        amount: Decimal,
        reference: Option<String>,
    ) -> Result<CallbackOutcome, ServiceError> {
        let payment = self.find_by_transaction(transaction_id).await?;
        if !matches!(
            payment.payment_method,
            PaymentMethod::Nagad | PaymentMethod::Rocket
        ) {
            return Err(ServiceError::InvalidOperation(format!(
                "{} payments are confirmed by the gateway",
                payment.payment_method.display_name()
            )));
        }
        let order = self.order_for(&payment).await?;
        if payment.status == PaymentRecordStatus::Completed {
            return Ok(self.already_processed(&payment, &order));
        }

        let raw = json!({ "amount": amount.to_string(), "reference": reference });
        let via = payment.payment_method.display_name();
        self.settle(&payment, &order, Some(amount), raw, via).await
    }

    /// Completes the payment when the reported amount matches, otherwise flags it
    async fn settle(
        &self,
        payment: &payment::Model,
        order: &order::Model,
        amount: Option<Decimal>,
        raw: Value,
        via: &str,
    ) -> Result<CallbackOutcome, ServiceError> {
        match amount {
            None => {
                self.flag_for_review(payment, order, "callback did not report an amount".into(), raw)
                    .await
            }
            Some(paid) if paid != payment.amount => {
                counter!("bookstore_payments.amount_mismatch", 1);
                let reason = format!(
                    "amount mismatch: expected ৳{} but gateway reported ৳{}",
                    payment.amount.normalize(),
                    paid.normalize()
                );
                self.flag_for_review(payment, order, reason, raw).await
            }
            Some(_) => self.complete(payment, order, raw, via).await,
        }
    }

    async fn complete(
        &self,
        payment: &payment::Model,
        order: &order::Model,
        raw: Value,
        via: &str,
    ) -> Result<CallbackOutcome, ServiceError> {
        let now = Utc::now();
        let txn = db::begin(&self.db).await?;

        let updated = PaymentEntity::update_many()
            .set(payment::ActiveModel {
                status: Set(PaymentRecordStatus::Completed),
                gateway_response: Set(Some(raw)),
                completed_at: Set(Some(now)),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(payment::Column::Id.eq(payment.id))
            .filter(payment::Column::Status.ne(PaymentRecordStatus::Completed))
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(self.already_processed(payment, order));
        }

        let current = OrderEntity::find_by_id(order.id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order.order_number)))?;

        let review_reason = if current.status == OrderStatus::Pending {
            order_status::apply_transition(
                &txn,
                &current,
                OrderStatus::Confirmed,
                format!("Payment successful via {}", via),
                Some(GATEWAY_ACTOR.to_string()),
            )
            .await?;
            None
        } else {
            // Money arrived for an order that already moved on, usually a cancellation
            let reason = format!("payment received while order was {}", current.status);
            PaymentEntity::update_many()
                .set(payment::ActiveModel {
                    review_required: Set(true),
                    review_reason: Set(Some(reason.clone())),
                    ..Default::default()
                })
                .filter(payment::Column::Id.eq(payment.id))
                .exec(&txn)
                .await?;
            order_status::record_history(
                &txn,
                current.id,
                current.status,
                format!("Payment flagged for review: {}", reason),
                Some(GATEWAY_ACTOR.to_string()),
            )
            .await?;
            Some(reason)
        };

        OrderEntity::update_many()
            .set(order::ActiveModel {
                payment_status: Set(PaymentStatus::Paid),
                transaction_id: Set(Some(payment.transaction_id.clone())),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(order::Column::Id.eq(order.id))
            .exec(&txn)
            .await?;

        db::commit(txn).await?;
        counter!("bookstore_payments.completed", 1);
        info!(transaction_id = %payment.transaction_id, "Payment completed");

        self.events
            .send_or_log(Event::PaymentCompleted {
                payment_id: payment.id,
                order_id: order.id,
                transaction_id: payment.transaction_id.clone(),
            })
            .await;

        Ok(match review_reason {
            None => {
                self.events
                    .send_or_log(Event::OrderConfirmed {
                        order_id: order.id,
                        order_number: order.order_number.clone(),
                    })
                    .await;
                CallbackOutcome::Completed {
                    order_number: order.order_number.clone(),
                    transaction_id: payment.transaction_id.clone(),
                }
            }
            Some(reason) => {
                self.events
                    .send_or_log(Event::PaymentFlaggedForReview {
                        payment_id: payment.id,
                        order_number: order.order_number.clone(),
                        reason: reason.clone(),
                    })
                    .await;
                CallbackOutcome::FlaggedForReview {
                    order_number: order.order_number.clone(),
                    transaction_id: payment.transaction_id.clone(),
                    reason,
                }
            }
        })
    }

    /// Marks a pending payment failed; the order stays pending so it can be retried
    async fn mark_failed(
        &self,
        payment: &payment::Model,
        order: &order::Model,
        reason: String,
        raw: Value,
    ) -> Result<CallbackOutcome, ServiceError> {
        let now = Utc::now();
        let txn = db::begin(&self.db).await?;

        let updated = PaymentEntity::update_many()
            .set(payment::ActiveModel {
                status: Set(PaymentRecordStatus::Failed),
                gateway_response: Set(Some(raw)),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(payment::Column::Id.eq(payment.id))
            .filter(payment::Column::Status.eq(PaymentRecordStatus::Pending))
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            txn.rollback().await?;
            let latest = self.find_by_transaction(&payment.transaction_id).await?;
            if latest.status == PaymentRecordStatus::Completed {
                return Ok(self.already_processed(&latest, order));
            }
            return Ok(CallbackOutcome::Failed {
                order_number: order.order_number.clone(),
                transaction_id: payment.transaction_id.clone(),
                reason,
            });
        }

        OrderEntity::update_many()
            .set(order::ActiveModel {
                payment_status: Set(PaymentStatus::Failed),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::PaymentStatus.ne(PaymentStatus::Paid))
            .exec(&txn)
            .await?;

        order_status::record_history(
            &txn,
            order.id,
            order.status,
            format!(
                "Payment failed via {}: {}",
                payment.payment_method.display_name(),
                reason
            ),
            Some(GATEWAY_ACTOR.to_string()),
        )
        .await?;
        db::commit(txn).await?;

        counter!("bookstore_payments.failed", 1);
        info!(transaction_id = %payment.transaction_id, %reason, "Payment failed");

        self.events
            .send_or_log(Event::PaymentFailed {
                payment_id: payment.id,
                order_number: order.order_number.clone(),
                transaction_id: payment.transaction_id.clone(),
                reason: reason.clone(),
            })
            .await;

        Ok(CallbackOutcome::Failed {
            order_number: order.order_number.clone(),
            transaction_id: payment.transaction_id.clone(),
            reason,
        })
    }

    /// Keeps the order unconfirmed and records why a person has to look at it
    async fn flag_for_review(
        &self,
        payment: &payment::Model,
        order: &order::Model,
        reason: String,
        raw: Value,
    ) -> Result<CallbackOutcome, ServiceError> {
        warn!(transaction_id = %payment.transaction_id, %reason, "Payment flagged for review");
        let txn = db::begin(&self.db).await?;

        PaymentEntity::update_many()
            .set(payment::ActiveModel {
                review_required: Set(true),
                review_reason: Set(Some(reason.clone())),
                gateway_response: Set(Some(raw)),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(payment::Column::Id.eq(payment.id))
            .filter(payment::Column::Status.ne(PaymentRecordStatus::Completed))
            .exec(&txn)
            .await?;

        order_status::record_history(
            &txn,
            order.id,
            order.status,
            format!("Payment flagged for review: {}", reason),
            Some(GATEWAY_ACTOR.to_string()),
        )
        .await?;
        db::commit(txn).await?;

        counter!("bookstore_payments.flagged", 1);
        if !payment.review_required {
            self.events
                .send_or_log(Event::PaymentFlaggedForReview {
                    payment_id: payment.id,
                    order_number: order.order_number.clone(),
                    reason: reason.clone(),
                })
                .await;
        }

        Ok(CallbackOutcome::FlaggedForReview {
            order_number: order.order_number.clone(),
            transaction_id: payment.transaction_id.clone(),
            reason,
        })
    }

    fn already_processed(&self, payment: &payment::Model, order: &order::Model) -> CallbackOutcome {
        counter!("bookstore_payments.duplicate_callbacks", 1);
        info!(transaction_id = %payment.transaction_id, "Callback for completed payment ignored");
        CallbackOutcome::AlreadyProcessed {
            order_number: order.order_number.clone(),
            transaction_id: payment.transaction_id.clone(),
        }
    }

    /// Refunds a completed payment; SSLCommerz refunds go through the gateway.
    ///
    /// The row is claimed with a conditional update first so only one caller ever
    /// reaches the gateway. A gateway failure releases the claim.
    #[instrument(skip(self, request))]
    pub async fn refund(
        &self,
        transaction_id: &str,
        request: RefundRequest,
    ) -> Result<payment::Model, ServiceError> {
        let payment = self.find_by_transaction(transaction_id).await?;
        if payment.status != PaymentRecordStatus::Completed {
            return Err(ServiceError::InvalidOperation(
                "only completed payments can be refunded".into(),
            ));
        }
        let amount = request.amount.unwrap_or(payment.amount);
        if amount <= Decimal::ZERO || amount > payment.amount {
            return Err(ServiceError::ValidationError(format!(
                "refund amount must be between 0 and {}",
                payment.amount.normalize()
            )));
        }

        let bank_tran_id = if payment.payment_method == PaymentMethod::Sslcommerz {
            Some(
                payment
                    .gateway_response
                    .as_ref()
                    .and_then(|r| r.get("bank_tran_id"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ServiceError::InvalidOperation("payment has no bank transaction id".into())
                    })?
                    .to_string(),
            )
        } else {
            None
        };

        let claimed = PaymentEntity::update_many()
            .set(payment::ActiveModel {
                status: Set(PaymentRecordStatus::Refunded),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(payment::Column::Id.eq(payment.id))
            .filter(payment::Column::Status.eq(PaymentRecordStatus::Completed))
            .exec(&*self.db)
            .await?;
        if claimed.rows_affected == 0 {
            counter!("bookstore_payments.refund_conflicts", 1);
            return Err(ServiceError::Conflict(format!(
                "payment {} is already refunded",
                payment.transaction_id
            )));
        }

        let refund_raw = match bank_tran_id {
            Some(bank_tran_id) => match self.gateway_refund(&bank_tran_id, amount, &request.remarks).await {
                Ok(raw) => raw,
                Err(e) => {
                    self.release_refund_claim(&payment).await?;
                    return Err(e);
                }
            },
            None => json!({ "manual": true, "remarks": request.remarks }),
        };

        let now = Utc::now();
        let txn = db::begin(&self.db).await?;
        let mut active: payment::ActiveModel = payment.clone().into();
        active.status = Set(PaymentRecordStatus::Refunded);
        active.gateway_response = Set(Some(json!({
            "payment": payment.gateway_response,
            "refund": refund_raw,
            "refund_amount": amount.to_string(),
        })));
        active.updated_at = Set(now);
        let refunded = active.update(&txn).await?;

        let order = OrderEntity::find_by_id(payment.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".into()))?;
        OrderEntity::update_many()
            .set(order::ActiveModel {
                payment_status: Set(PaymentStatus::Refunded),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(order::Column::Id.eq(order.id))
            .exec(&txn)
            .await?;
        if order_status::can_transition(order.status, OrderStatus::Refunded) {
            order_status::apply_transition(
                &txn,
                &order,
                OrderStatus::Refunded,
                format!("Refunded ৳{}: {}", amount.normalize(), request.remarks),
                Some(GATEWAY_ACTOR.to_string()),
            )
            .await?;
        }
        db::commit(txn).await?;

        counter!("bookstore_payments.refunded", 1);
        Ok(refunded)
    }

    async fn gateway_refund(
        &self,
        bank_tran_id: &str,
        amount: Decimal,
        remarks: &str,
    ) -> Result<Value, ServiceError> {
        let refund = self.sslcommerz.refund(bank_tran_id, amount, remarks).await?;
        if !refund.is_accepted() {
            return Err(ServiceError::PaymentFailed(format!(
                "refund rejected by gateway: {}",
                refund.status
            )));
        }
        Ok(refund.raw)
    }

    async fn release_refund_claim(&self, payment: &payment::Model) -> Result<(), ServiceError> {
        PaymentEntity::update_many()
            .set(payment::ActiveModel {
                status: Set(PaymentRecordStatus::Completed),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(payment::Column::Id.eq(payment.id))
            .filter(payment::Column::Status.eq(PaymentRecordStatus::Refunded))
            .exec(&*self.db)
            .await?;
        warn!(transaction_id = %payment.transaction_id, "Gateway refund failed; payment left completed");
        Ok(())
    }

    async fn find_by_transaction(&self, transaction_id: &str) -> Result<payment::Model, ServiceError> {
        PaymentEntity::find()
            .filter(payment::Column::TransactionId.eq(transaction_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Payment not found".into()))
    }

    async fn order_for(&self, payment: &payment::Model) -> Result<order::Model, ServiceError> {
        OrderEntity::find_by_id(payment.order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".into()))
    }
}
