/// Alerting core: band classification and notification rate limiting.
///
/// Submodules:
/// - `thresholds`: pure classification of readings against bands.
/// - `throttle`: per subscriber/pool/mode dispatch windows.

pub mod thresholds;
pub mod throttle;

pub use thresholds::{
    ClassificationPolicy, ParameterEvaluation, ReadingEvaluation, WARNING_MARGIN_FRACTION,
    classify, classify_with_policy, evaluate_reading,
};
pub use throttle::{NotificationGate, NotificationMode, StoreThrottle, Throttle, ThrottleKey};
