//! Broadcast message schema.
//!
//! Every event carries a `type` discriminator and an ISO-8601
//! `timestamp`; the remaining fields are per-type. This is the JSON that
//! goes over the SSE wire as `data:` records.

use carelink_core::VitalBreach;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of an emergency alert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Critical,
    High,
}

/// A message delivered to channel subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastEvent {
    /// Emitted immediately on connect so the client can confirm liveness
    /// before any real event arrives.
    Connected {
        channel: String,
        timestamp: DateTime<Utc>,
    },
    EmergencyVitals {
        severity: AlertSeverity,
        patient_id: Uuid,
        patient_name: String,
        /// Breached metric names, comma-separated when several breach at
        /// once (one alert aggregates all breached metrics).
        vital_type: String,
        vital_value: String,
        action_required: bool,
        timestamp: DateTime<Utc>,
    },
    LabResultReady {
        patient_name: String,
        test_type: String,
        test_id: Uuid,
        action: String,
        timestamp: DateTime<Utc>,
    },
    DischargeComplete {
        patient_name: String,
        hospital_name: String,
        visit_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    SecureMessage {
        thread_id: Uuid,
        message_id: Uuid,
        preview: String,
        timestamp: DateTime<Utc>,
    },
}

impl BroadcastEvent {
    pub fn connected(channel: impl std::fmt::Display) -> Self {
        Self::Connected {
            channel: channel.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// One emergency alert aggregating every breached metric.
    pub fn emergency_vitals(
        severity: AlertSeverity,
        patient_id: Uuid,
        patient_name: impl Into<String>,
        breaches: &[VitalBreach],
    ) -> Self {
        let vital_type = breaches
            .iter()
            .map(|b| b.vital_type)
            .collect::<Vec<_>>()
            .join(", ");
        let vital_value = breaches
            .iter()
            .map(|b| b.vital_value.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        Self::EmergencyVitals {
            severity,
            patient_id,
            patient_name: patient_name.into(),
            vital_type,
            vital_value,
            action_required: true,
            timestamp: Utc::now(),
        }
    }

    pub fn lab_result_ready(
        patient_name: impl Into<String>,
        test_type: impl Into<String>,
        test_id: Uuid,
        action: impl Into<String>,
    ) -> Self {
        Self::LabResultReady {
            patient_name: patient_name.into(),
            test_type: test_type.into(),
            test_id,
            action: action.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn discharge_complete(
        patient_name: impl Into<String>,
        hospital_name: impl Into<String>,
        visit_id: Uuid,
    ) -> Self {
        Self::DischargeComplete {
            patient_name: patient_name.into(),
            hospital_name: hospital_name.into(),
            visit_id,
            timestamp: Utc::now(),
        }
    }

    pub fn secure_message(thread_id: Uuid, message_id: Uuid, preview: impl Into<String>) -> Self {
        Self::SecureMessage {
            thread_id,
            message_id,
            preview: preview.into(),
            timestamp: Utc::now(),
        }
    }
}
