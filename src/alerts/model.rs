//! Alert entity model

use chrono::{DateTime, Duration as ChronoDuration, DurationRound, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::{RiskAssessment, RiskLevel};
use crate::types::{LookoutError, Result};

/// Action-facing severity of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Urgent,
    Emergency,
}

impl AlertLevel {
    /// Fixed mapping from classifier severity
    pub fn from_risk(level: RiskLevel) -> Self {
        match level {
            RiskLevel::None | RiskLevel::Low => Self::Info,
            RiskLevel::Medium => Self::Warning,
            RiskLevel::High => Self::Urgent,
            RiskLevel::Critical => Self::Emergency,
        }
    }

    pub fn requires_action(&self) -> bool {
        matches!(self, Self::Urgent | Self::Emergency)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Urgent => "urgent",
            Self::Emergency => "emergency",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "urgent" => Some(Self::Urgent),
            "emergency" => Some(Self::Emergency),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted guardian alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub session_id: String,
    pub guardian_id: String,
    pub alert_level: AlertLevel,
    pub message: String,
    pub context: Option<String>,
    pub assessment_detail: Option<String>,
    pub requires_action: bool,
    pub guardian_notified: bool,
    pub resolved: bool,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp::option", default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Session and the guardian it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRef {
    pub session_id: String,
    pub guardian_id: String,
}

impl SessionRef {
    pub fn new(session_id: impl Into<String>, guardian_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            guardian_id: guardian_id.into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.session_id.trim().is_empty() {
            return Err(LookoutError::BadRequest("session_id must not be empty".into()));
        }
        if self.guardian_id.trim().is_empty() {
            return Err(LookoutError::BadRequest("guardian_id must not be empty".into()));
        }
        Ok(())
    }
}

/// Why an alert is being created
#[derive(Debug, Clone)]
pub enum AlertTrigger {
    /// Classifier decided the guardian must be told
    Risk {
        assessment: RiskAssessment,
        message: String,
    },
    /// Explicit emergency control, no analysis involved
    Emergency { reason: Option<String> },
    /// Alert raised directly by an operator or another service
    Manual {
        level: AlertLevel,
        message: String,
        context: Option<String>,
        assessment_detail: Option<String>,
    },
    /// Continuous activity beyond the configured threshold
    Activity {
        activity_type: String,
        duration_minutes: u32,
    },
}

/// Alert row before the store assigns `id` and `created_at`
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub session_id: String,
    pub guardian_id: String,
    pub alert_level: AlertLevel,
    pub message: String,
    pub context: Option<String>,
    pub assessment_detail: Option<String>,
    pub requires_action: bool,
}

impl NewAlert {
    pub fn from_trigger(session: SessionRef, trigger: AlertTrigger) -> Self {
        let (alert_level, message, context, assessment_detail) = match trigger {
            AlertTrigger::Risk {
                assessment,
                message,
            } => {
                let detail = serde_json::to_string(&assessment).ok();
                (
                    AlertLevel::from_risk(assessment.level()),
                    format!("Safety concern detected: {}", assessment.reason()),
                    Some(message),
                    detail,
                )
            }
            AlertTrigger::Emergency { reason } => (
                AlertLevel::Emergency,
                "EMERGENCY: Child pressed the emergency help button".to_string(),
                reason.filter(|r| !r.trim().is_empty()),
                None,
            ),
            AlertTrigger::Manual {
                level,
                message,
                context,
                assessment_detail,
            } => (level, message, context, assessment_detail),
            AlertTrigger::Activity {
                activity_type,
                duration_minutes,
            } => (
                AlertLevel::Info,
                format!(
                    "Child has been {} for {} minutes. Consider suggesting a break.",
                    activity_type, duration_minutes
                ),
                None,
                None,
            ),
        };

        Self {
            session_id: session.session_id,
            guardian_id: session.guardian_id,
            requires_action: alert_level.requires_action(),
            alert_level,
            message,
            context,
            assessment_detail,
        }
    }

    /// Materialize the row once the store has assigned identity and time
    pub fn into_alert(self, id: i64, created_at: DateTime<Utc>) -> Alert {
        Alert {
            id,
            session_id: self.session_id,
            guardian_id: self.guardian_id,
            alert_level: self.alert_level,
            message: self.message,
            context: self.context,
            assessment_detail: self.assessment_detail,
            requires_action: self.requires_action,
            guardian_notified: false,
            resolved: false,
            created_at,
            resolved_at: None,
        }
    }
}

/// Reject an alert whose session is already bound to another guardian
pub(crate) fn check_binding(session_id: &str, bound: Option<&str>, guardian_id: &str) -> Result<()> {
    match bound {
        Some(existing) if existing != guardian_id => Err(LookoutError::Conflict(format!(
            "session {} is bound to a different guardian",
            session_id
        ))),
        _ => Ok(()),
    }
}

/// Creation time for the next alert of a session.
///
/// Microsecond precision, and strictly after the previous alert of the same
/// session even if the wall clock stalls or steps backwards.
pub fn next_created_at(now: DateTime<Utc>, previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = truncate_micros(now);
    match previous {
        Some(prev) if prev >= now => prev + ChronoDuration::microseconds(1),
        _ => now,
    }
}

fn truncate_micros(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(ChronoDuration::microseconds(1)).unwrap_or(t)
}

/// ISO-8601 with fixed microsecond precision, used on every wire surface
pub fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn micros_to_datetime(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros)
}

/// serde adapter that keeps timestamps at microsecond precision
pub(crate) mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_timestamp(t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(t: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
            match t {
                Some(t) => s.serialize_str(&super::super::format_timestamp(t)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw: Option<String> = Option::deserialize(d)?;
            raw.map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::AssessmentSource;
    use chrono::TimeZone;

    #[test]
    fn test_level_mapping_table() {
        assert_eq!(AlertLevel::from_risk(RiskLevel::None), AlertLevel::Info);
        assert_eq!(AlertLevel::from_risk(RiskLevel::Low), AlertLevel::Info);
        assert_eq!(AlertLevel::from_risk(RiskLevel::Medium), AlertLevel::Warning);
        assert_eq!(AlertLevel::from_risk(RiskLevel::High), AlertLevel::Urgent);
        assert_eq!(AlertLevel::from_risk(RiskLevel::Critical), AlertLevel::Emergency);

        assert!(!AlertLevel::Info.requires_action());
        assert!(!AlertLevel::Warning.requires_action());
        assert!(AlertLevel::Urgent.requires_action());
        assert!(AlertLevel::Emergency.requires_action());
    }

    #[test]
    fn test_created_at_is_strictly_monotonic() {
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let first = next_created_at(t, None);
        let second = next_created_at(t, Some(first));
        let third = next_created_at(t - ChronoDuration::seconds(5), Some(second));

        assert!(first < second);
        assert!(second < third);
        assert_eq!(third - second, ChronoDuration::microseconds(1));
    }

    #[test]
    fn test_created_at_truncated_to_micros() {
        let t = Utc.timestamp_nanos(1_700_000_000_123_456_789);
        let created = next_created_at(t, None);
        assert_eq!(created.timestamp_subsec_nanos() % 1_000, 0);
        assert_eq!(micros_to_datetime(created.timestamp_micros()), Some(created));
    }

    #[test]
    fn test_risk_trigger_derives_level_and_action() {
        let assessment = RiskAssessment::new(RiskLevel::Medium, "fell down", false, AssessmentSource::Keyword);
        let new = NewAlert::from_trigger(
            SessionRef::new("s1", "g1"),
            AlertTrigger::Risk {
                assessment,
                message: "I fell down".into(),
            },
        );
        assert_eq!(new.alert_level, AlertLevel::Warning);
        assert!(!new.requires_action);
        assert_eq!(new.context.as_deref(), Some("I fell down"));
        assert!(new.assessment_detail.unwrap().contains("\"level\":\"medium\""));
    }

    #[test]
    fn test_emergency_trigger_requires_action() {
        let new = NewAlert::from_trigger(
            SessionRef::new("s1", "g1"),
            AlertTrigger::Emergency { reason: None },
        );
        assert_eq!(new.alert_level, AlertLevel::Emergency);
        assert!(new.requires_action);
    }

    #[test]
    fn test_binding_conflict() {
        assert!(check_binding("s1", None, "g1").is_ok());
        assert!(check_binding("s1", Some("g1"), "g1").is_ok());
        let err = check_binding("s1", Some("g1"), "g2").unwrap_err();
        assert!(matches!(err, LookoutError::Conflict(_)));
    }

    #[test]
    fn test_alert_json_timestamps_have_micros() {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let alert = NewAlert::from_trigger(
            SessionRef::new("s1", "g1"),
            AlertTrigger::Emergency { reason: None },
        )
        .into_alert(7, created);

        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["created_at"], "2026-03-01T12:00:00.000000Z");
        assert_eq!(json["alert_level"], "emergency");
        assert!(json["resolved_at"].is_null());

        let back: Alert = serde_json::from_value(json).unwrap();
        assert_eq!(back, alert);
    }
}
