//! Water-quality band classification.
//!
//! Everything here is a pure function of its inputs: no clock, no history,
//! no I/O. Safe to call from any thread without synchronization.

use crate::model::{Band, Classification, Parameter, PoolReading, PoolThresholds};

/// Fraction of a band's width, measured in from each edge, that the margin
/// policy reports as `Warning`.
pub const WARNING_MARGIN_FRACTION: f64 = 0.07;

/// How in-band values are graded.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum ClassificationPolicy {
    /// In band is `Ok`, out of band is `Critical`.
    #[default]
    Strict,
    /// As `Strict`, but values within `fraction * width` of either edge are
    /// reported as `Warning`.
    Margin { fraction: f64 },
}

impl ClassificationPolicy {
    pub fn margin() -> Self {
        ClassificationPolicy::Margin {
            fraction: WARNING_MARGIN_FRACTION,
        }
    }
}

// ---------------------------------------------------------------------------
// Single-value classification
// ---------------------------------------------------------------------------

/// Classifies `value` against `band` with the strict binary policy.
///
/// Returns `Ok` when no band is configured: a pool without saved thresholds
/// must never alert.
pub fn classify(value: f64, band: Option<&Band>) -> Classification {
    classify_with_policy(value, band, ClassificationPolicy::Strict)
}

/// Classifies `value` against `band` under `policy`.
///
/// Band edges are inclusive. The margin is measured from each edge toward
/// the middle of the band, so a band narrower than twice the margin reports
/// every in-band value as `Warning`.
pub fn classify_with_policy(
    value: f64,
    band: Option<&Band>,
    policy: ClassificationPolicy,
) -> Classification {
    let Some(band) = band else {
        // Missing configuration fails open.
        return Classification::Ok;
    };

    if value < band.min || value > band.max {
        return Classification::Critical;
    }

    match policy {
        ClassificationPolicy::Strict => Classification::Ok,
        ClassificationPolicy::Margin { fraction } => {
            let margin = band.width() * fraction;
            if value < band.min + margin || value > band.max - margin {
                Classification::Warning
            } else {
                Classification::Ok
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Whole-reading evaluation
// ---------------------------------------------------------------------------

/// Outcome for one parameter of a reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterEvaluation {
    pub parameter: Parameter,
    pub value: f64,
    /// `None` when the pool has no thresholds configured.
    pub band: Option<Band>,
    pub classification: Classification,
}

/// The three parameter outcomes for one pool reading.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingEvaluation {
    pub parameters: Vec<ParameterEvaluation>,
}

impl ReadingEvaluation {
    /// Worst classification across all parameters.
    pub fn status(&self) -> Classification {
        self.parameters
            .iter()
            .map(|p| p.classification)
            .max()
            .unwrap_or(Classification::Ok)
    }

    /// Parameters whose value fell outside the configured band.
    pub fn out_of_band(&self) -> impl Iterator<Item = &ParameterEvaluation> {
        self.parameters
            .iter()
            .filter(|p| p.classification == Classification::Critical)
    }

    pub fn has_breach(&self) -> bool {
        self.out_of_band().next().is_some()
    }

    pub fn get(&self, parameter: Parameter) -> Option<&ParameterEvaluation> {
        self.parameters.iter().find(|p| p.parameter == parameter)
    }
}

/// Evaluates pH, free chlorine and temperature of `reading` against
/// `thresholds`.
pub fn evaluate_reading(
    reading: &PoolReading,
    thresholds: Option<&PoolThresholds>,
    policy: ClassificationPolicy,
) -> ReadingEvaluation {
    let parameters = Parameter::ALL
        .iter()
        .map(|&parameter| {
            let value = reading.value(parameter);
            let band = thresholds.map(|t| *t.band(parameter));
            ParameterEvaluation {
                parameter,
                value,
                band,
                classification: classify_with_policy(value, band.as_ref(), policy),
            }
        })
        .collect();

    ReadingEvaluation { parameters }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
