//! Per-reading evaluation and alert dispatch.
//!
//! For each incoming reading the monitor stores it, classifies it against
//! the pool's thresholds, updates the pool status and, if anything is out of
//! band, asks the throttle whether the owner may be mailed now.
//!
//! # Clock injection
//! `process_reading_at` takes `now` explicitly; `process_reading` is the
//! wrapper that supplies `Utc::now()`. Use the former in tests.
//!
//! # Throttling
//! The binary builds the monitor with [`ReadingMonitor::with_store_throttle`],
//! which keeps dispatch times in the store so that windows hold across
//! separate `ingest` runs. Tests and embedders may pass an in-memory
//! [`Throttle`](crate::alert::Throttle) to `new` instead.
//!
//! # Delivery failures
//! A failed send is logged and reported in the outcome but never fails the
//! call, and the throttle window it consumed is not given back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::alert::{
    ClassificationPolicy, NotificationGate, ReadingEvaluation, StoreThrottle, evaluate_reading,
};
use crate::audit::{self, AuditAction, AuditEntry};
use crate::identity::{IdentityError, IdentityVerifier};
use crate::logging::{self, Component, FailureType};
use crate::model::{Classification, Parameter, PoolReading};
use crate::notify::{AlertMessage, Mailer};
use crate::store::{PoolStore, StoreError};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("pool not found: {0}")]
    PoolNotFound(String),
    #[error("{parameter} value {value} is not a finite number")]
    InvalidReading { parameter: Parameter, value: f64 },
    #[error("authentication failed: {0}")]
    Unauthorized(#[from] IdentityError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What happened on the notification side of one reading.
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyOutcome {
    /// Every parameter was within its band (or no band was configured).
    NotNeeded,
    /// The pool owner has no subscriber record to mail.
    NoRecipient,
    /// The throttle refused: mode `NONE`, an unknown mode, or still inside
    /// the window of an earlier alert.
    Suppressed,
    Sent { recipient: String },
    /// The throttle approved but the mailer failed.
    DeliveryFailed { recipient: String, failure: FailureType, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadingOutcome {
    pub pool_id: String,
    pub evaluation: ReadingEvaluation,
    pub status: Classification,
    pub notification: NotifyOutcome,
}

pub struct ReadingMonitor<S: PoolStore, M: Mailer> {
    store: Arc<S>,
    mailer: M,
    throttle: Arc<dyn NotificationGate>,
    policy: ClassificationPolicy,
}

impl<S: PoolStore, M: Mailer> ReadingMonitor<S, M> {
    pub fn new(
        store: Arc<S>,
        mailer: M,
        throttle: Arc<dyn NotificationGate>,
        policy: ClassificationPolicy,
    ) -> Self {
        Self {
            store,
            mailer,
            throttle,
            policy,
        }
    }

    /// Monitor whose throttle windows are kept in `store`.
    pub fn with_store_throttle(store: Arc<S>, mailer: M, policy: ClassificationPolicy) -> Self
    where
        S: 'static,
    {
        let throttle = Arc::new(StoreThrottle::new(Arc::clone(&store)));
        Self::new(store, mailer, throttle, policy)
    }

    /// Authenticates `token` and processes the reading for that subject.
    pub fn process_with_token<V: IdentityVerifier + ?Sized>(
        &self,
        verifier: &V,
        token: &str,
        pool_id: &str,
        reading: PoolReading,
    ) -> Result<ReadingOutcome, MonitorError> {
        let subject = verifier.verify(token)?;
        self.process_reading(&subject.subject_id, pool_id, reading)
    }

    /// Convenience wrapper that uses the real current time.
    pub fn process_reading(
        &self,
        subject_id: &str,
        pool_id: &str,
        reading: PoolReading,
    ) -> Result<ReadingOutcome, MonitorError> {
        self.process_reading_at(subject_id, pool_id, reading, Utc::now())
    }

    pub fn process_reading_at(
        &self,
        subject_id: &str,
        pool_id: &str,
        reading: PoolReading,
        now: DateTime<Utc>,
    ) -> Result<ReadingOutcome, MonitorError> {
        if let Some(parameter) = Parameter::ALL
            .into_iter()
            .find(|&p| !reading.value(p).is_finite())
        {
            return Err(MonitorError::InvalidReading {
                parameter,
                value: reading.value(parameter),
            });
        }

        let pool = match self.store.get_pool(pool_id)? {
            Some(pool) if pool.owner_id == subject_id => pool,
            _ => return Err(MonitorError::PoolNotFound(pool_id.to_string())),
        };

        self.store.insert_reading(&pool.id, &reading)?;

        let thresholds = self.store.get_thresholds(&pool.id)?.map(|r| r.thresholds);
        if thresholds.is_none() {
            logging::debug(
                Component::Classifier,
                Some(&pool.id),
                "No thresholds configured, reading treated as OK",
            );
        }

        let evaluation = evaluate_reading(&reading, thresholds.as_ref(), self.policy);
        let status = evaluation.status();
        let warnings = evaluation
            .parameters
            .iter()
            .filter(|p| p.classification == Classification::Warning)
            .count();
        logging::log_evaluation_summary(
            &pool.id,
            evaluation.parameters.len(),
            evaluation.out_of_band().count(),
            warnings,
        );

        if status != pool.status {
            self.store.set_pool_status(&pool.id, status)?;
        }

        let notification = if evaluation.has_breach() {
            self.notify(subject_id, &pool.id, &pool.name, &evaluation, &reading, now)?
        } else {
            NotifyOutcome::NotNeeded
        };

        Ok(ReadingOutcome {
            pool_id: pool.id,
            evaluation,
            status,
            notification,
        })
    }

    fn notify(
        &self,
        subject_id: &str,
        pool_id: &str,
        pool_name: &str,
        evaluation: &ReadingEvaluation,
        reading: &PoolReading,
        now: DateTime<Utc>,
    ) -> Result<NotifyOutcome, MonitorError> {
        let Some(subscriber) = self.store.get_subscriber(subject_id)? else {
            logging::warn(
                Component::Monitor,
                Some(pool_id),
                &format!("out-of-band reading but no subscriber record for {}", subject_id),
            );
            return Ok(NotifyOutcome::NoRecipient);
        };

        let mode = subscriber.notification_mode;
        if !self.throttle.admit(subject_id, pool_id, &mode, now)? {
            logging::debug(
                Component::Throttle,
                Some(pool_id),
                &format!("alert suppressed (mode {})", mode),
            );
            return Ok(NotifyOutcome::Suppressed);
        }

        let message = AlertMessage::from_evaluation(
            &subscriber.email,
            &subscriber.display_name,
            pool_name,
            evaluation,
            mode,
            reading.measured_at,
        );

        let outcome = match self.mailer.send(&message.recipient, &message.subject(), &message.body()) {
            Ok(()) => {
                logging::info(
                    Component::Mailer,
                    Some(pool_id),
                    &format!("alert sent to {}", message.recipient),
                );
                audit::record(
                    &*self.store,
                    AuditEntry::new(
                        None,
                        AuditAction::AlertSent,
                        format!("Alert for pool \"{}\" sent to {}", pool_name, message.recipient),
                        Some(pool_id),
                        now,
                    ),
                );
                NotifyOutcome::Sent {
                    recipient: message.recipient,
                }
            }
            Err(err) => {
                let failure = logging::log_delivery_failure(pool_id, &message.recipient, &err);
                audit::record(
                    &*self.store,
                    AuditEntry::new(
                        None,
                        AuditAction::AlertDeliveryFailed,
                        format!(
                            "Alert for pool \"{}\" to {} failed: {}",
                            pool_name, message.recipient, err
                        ),
                        Some(pool_id),
                        now,
                    ),
                );
                NotifyOutcome::DeliveryFailed {
                    recipient: message.recipient,
                    failure,
                    reason: err.to_string(),
                }
            }
        };

        Ok(outcome)
    }
}
