//! Human-readable alert text.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::alert::{NotificationMode, ReadingEvaluation};
use crate::model::{Band, Parameter};

/// One out-of-band value with the band it violated.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub parameter: Parameter,
    pub value: f64,
    pub band: Band,
}

/// An alert ready to hand to a [`Mailer`](super::Mailer).
#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    pub recipient: String,
    pub recipient_name: String,
    pub pool_name: String,
    pub violations: Vec<Violation>,
    pub mode: NotificationMode,
    pub measured_at: DateTime<Utc>,
}

impl AlertMessage {
    /// Builds the alert for every out-of-band parameter in `evaluation`.
    ///
    /// Parameters with no band are skipped; they can only be `Ok` anyway.
    pub fn from_evaluation(
        recipient: &str,
        recipient_name: &str,
        pool_name: &str,
        evaluation: &ReadingEvaluation,
        mode: NotificationMode,
        measured_at: DateTime<Utc>,
    ) -> Self {
        let violations = evaluation
            .out_of_band()
            .filter_map(|p| {
                p.band.map(|band| Violation {
                    parameter: p.parameter,
                    value: p.value,
                    band,
                })
            })
            .collect();

        Self {
            recipient: recipient.to_string(),
            recipient_name: recipient_name.to_string(),
            pool_name: pool_name.to_string(),
            violations,
            mode,
            measured_at,
        }
    }

    pub fn subject(&self) -> String {
        format!("AquaMon alert: {} out of range", self.pool_name)
    }

    pub fn body(&self) -> String {
        let mut body = String::new();
        let _ = writeln!(body, "Hello {},", self.recipient_name);
        let _ = writeln!(body);
        let _ = writeln!(
            body,
            "The reading taken at {} for pool \"{}\" is outside its configured limits:",
            self.measured_at.format("%Y-%m-%d %H:%M UTC"),
            self.pool_name
        );
        let _ = writeln!(body);
        for v in &self.violations {
            let unit = v.parameter.unit();
            let sep = if unit.is_empty() { "" } else { " " };
            let _ = writeln!(
                body,
                "  - {}: {}{}{} (allowed {}{}{})",
                v.parameter, v.value, sep, unit, v.band, sep, unit
            );
        }
        let _ = writeln!(body);
        let _ = writeln!(body, "Notification mode: {}", self.mode);
        let _ = writeln!(body, "Sent to: {}", self.recipient);
        body
    }
}
