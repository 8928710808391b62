//! Vital sign readings and clinical threshold evaluation.
//!
//! Thresholds are fixed clinical ranges; a reading outside any range is
//! abnormal. The monitoring task evaluates only the single most recent
//! reading per visit within its lookback window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One recorded set of vital signs for a visit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VitalsReading {
    pub id: Uuid,
    pub visit_id: Uuid,
    /// Body temperature in degrees Celsius.
    pub temperature: f64,
    /// Heart rate in beats per minute.
    pub heart_rate: i32,
    /// Systolic blood pressure in mmHg.
    pub systolic_bp: i32,
    /// Diastolic blood pressure in mmHg.
    pub diastolic_bp: i32,
    /// Peripheral oxygen saturation in percent.
    pub spo2: i32,
    pub is_abnormal: bool,
    pub recorded_at: DateTime<Utc>,
}

impl VitalsReading {
    pub fn new(
        visit_id: Uuid,
        temperature: f64,
        heart_rate: i32,
        systolic_bp: i32,
        diastolic_bp: i32,
        spo2: i32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            visit_id,
            temperature,
            heart_rate,
            systolic_bp,
            diastolic_bp,
            spo2,
            is_abnormal: false,
            recorded_at: Utc::now(),
        }
    }
}

/// A single breached metric, as surfaced in the emergency alert.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VitalBreach {
    /// Metric name, e.g. `"spo2"` or `"heart_rate"`.
    pub vital_type: &'static str,
    /// Observed value, rendered for display.
    pub vital_value: String,
}

/// Fixed clinical threshold ranges. Values outside a range are abnormal.
#[derive(Clone, Copy, Debug)]
pub struct VitalThresholds {
    pub temperature_range: (f64, f64),
    pub heart_rate_range: (i32, i32),
    pub systolic_range: (i32, i32),
    pub diastolic_range: (i32, i32),
    pub spo2_min: i32,
}

impl Default for VitalThresholds {
    fn default() -> Self {
        Self {
            temperature_range: (35.0, 39.0),
            heart_rate_range: (40, 130),
            systolic_range: (80, 180),
            diastolic_range: (50, 120),
            spo2_min: 90,
        }
    }
}

impl VitalThresholds {
    /// Evaluate one reading; returns every breached metric, empty if the
    /// reading is within all ranges.
    pub fn breaches(&self, reading: &VitalsReading) -> Vec<VitalBreach> {
        let mut breached = Vec::new();

        let (temp_lo, temp_hi) = self.temperature_range;
        if reading.temperature < temp_lo || reading.temperature > temp_hi {
            breached.push(VitalBreach {
                vital_type: "temperature",
                vital_value: format!("{:.1}", reading.temperature),
            });
        }

        let (hr_lo, hr_hi) = self.heart_rate_range;
        if reading.heart_rate < hr_lo || reading.heart_rate > hr_hi {
            breached.push(VitalBreach {
                vital_type: "heart_rate",
                vital_value: reading.heart_rate.to_string(),
            });
        }

        let (sys_lo, sys_hi) = self.systolic_range;
        if reading.systolic_bp < sys_lo || reading.systolic_bp > sys_hi {
            breached.push(VitalBreach {
                vital_type: "systolic_bp",
                vital_value: reading.systolic_bp.to_string(),
            });
        }

        let (dia_lo, dia_hi) = self.diastolic_range;
        if reading.diastolic_bp < dia_lo || reading.diastolic_bp > dia_hi {
            breached.push(VitalBreach {
                vital_type: "diastolic_bp",
                vital_value: reading.diastolic_bp.to_string(),
            });
        }

        if reading.spo2 < self.spo2_min {
            breached.push(VitalBreach {
                vital_type: "spo2",
                vital_value: reading.spo2.to_string(),
            });
        }

        breached
    }

    /// Whether the reading breaches any threshold.
    pub fn is_abnormal(&self, reading: &VitalsReading) -> bool {
        !self.breaches(reading).is_empty()
    }
}
