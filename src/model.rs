/// Core data types for the pool water-quality monitoring service.
///
/// This module defines the shared domain model imported by all other modules.
/// It contains no I/O, only types and the small amount of logic that belongs
/// to them (band edges, default thresholds, status ranking).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Measured parameters
// ---------------------------------------------------------------------------

/// The three quantities every pool sensor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    Ph,
    FreeChlorine,
    Temperature,
}

impl Parameter {
    /// Evaluation order used for messages and reports.
    pub const ALL: [Parameter; 3] = [Parameter::Ph, Parameter::FreeChlorine, Parameter::Temperature];

    pub fn unit(&self) -> &'static str {
        match self {
            Parameter::Ph => "",
            Parameter::FreeChlorine => "ppm",
            Parameter::Temperature => "°C",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::Ph => write!(f, "pH"),
            Parameter::FreeChlorine => write!(f, "free chlorine"),
            Parameter::Temperature => write!(f, "temperature"),
        }
    }
}

// ---------------------------------------------------------------------------
// Reading types
// ---------------------------------------------------------------------------

/// One sensor sample for a pool: all three parameters taken together.
///
/// Immutable once created. Produced by a sensor or a simulator upstream of
/// this service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolReading {
    pub ph: f64,
    pub free_chlorine: f64,
    pub temperature_c: f64,
    pub measured_at: DateTime<Utc>,
}

impl PoolReading {
    pub fn value(&self, parameter: Parameter) -> f64 {
        match parameter {
            Parameter::Ph => self.ph,
            Parameter::FreeChlorine => self.free_chlorine,
            Parameter::Temperature => self.temperature_c,
        }
    }
}

// ---------------------------------------------------------------------------
// Threshold types
// ---------------------------------------------------------------------------

/// Inclusive acceptable range for one measured quantity.
///
/// `min <= max` is expected but not enforced; the classifier compares
/// against both edges independently.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

impl Band {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.min, self.max)
    }
}

/// Default pH band for newly created pools.
pub const DEFAULT_PH_BAND: Band = Band::new(7.2, 7.8);

/// Default free chlorine band, in ppm.
pub const DEFAULT_CHLORINE_BAND: Band = Band::new(0.5, 1.5);

/// Default water temperature band, in °C.
pub const DEFAULT_TEMPERATURE_BAND: Band = Band::new(20.0, 35.0);

/// The band set configured for one pool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolThresholds {
    pub ph: Band,
    pub free_chlorine: Band,
    pub temperature: Band,
}

impl PoolThresholds {
    pub fn band(&self, parameter: Parameter) -> &Band {
        match parameter {
            Parameter::Ph => &self.ph,
            Parameter::FreeChlorine => &self.free_chlorine,
            Parameter::Temperature => &self.temperature,
        }
    }
}

impl Default for PoolThresholds {
    fn default() -> Self {
        Self {
            ph: DEFAULT_PH_BAND,
            free_chlorine: DEFAULT_CHLORINE_BAND,
            temperature: DEFAULT_TEMPERATURE_BAND,
        }
    }
}

/// Stored thresholds plus their edit bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdRecord {
    pub pool_id: String,
    pub thresholds: PoolThresholds,
    /// Starts at 1 and increments on every update.
    pub version: i32,
    pub modified_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Pools and subscribers
// ---------------------------------------------------------------------------

/// Derived health of a pool, the worst classification of its latest reading.
///
/// Variants are ordered by severity so `max()` picks the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Classification {
    Ok,
    Warning,
    Critical,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Ok => "OK",
            Classification::Warning => "WARNING",
            Classification::Critical => "CRITICAL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "OK" => Some(Classification::Ok),
            "WARNING" => Some(Classification::Warning),
            "CRITICAL" => Some(Classification::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A monitored pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub status: Classification,
    pub volume_m3: Option<f64>,
    pub length_m: Option<f64>,
    pub width_m: Option<f64>,
    pub average_depth_m: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// The user record the monitor needs in order to send an alert.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscriber {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub notification_mode: crate::alert::throttle::NotificationMode,
}
