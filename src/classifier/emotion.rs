//! Emotion layer and fusion with the risk level

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::semantic::ClassifierError;
use super::{RiskAssessment, RiskLevel};

/// Primary emotion detected in a child's message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Happy,
    Sad,
    Angry,
    Scared,
    Frustrated,
    Excited,
    Neutral,
    Concerned,
}

impl Emotion {
    /// Parse a one-word model answer; anything unrecognised is neutral
    pub fn from_word(word: &str) -> Self {
        let cleaned = word
            .trim()
            .split(|c: char| !c.is_alphabetic())
            .find(|w| !w.is_empty())
            .unwrap_or("")
            .to_lowercase();

        match cleaned.as_str() {
            "happy" => Self::Happy,
            "sad" => Self::Sad,
            "angry" => Self::Angry,
            "scared" => Self::Scared,
            "frustrated" => Self::Frustrated,
            "excited" => Self::Excited,
            "concerned" => Self::Concerned,
            _ => Self::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Scared => "scared",
            Self::Frustrated => "frustrated",
            Self::Excited => "excited",
            Self::Neutral => "neutral",
            Self::Concerned => "concerned",
        }
    }

    /// Negative emotions that may warrant guardian attention
    pub fn is_concerning(&self) -> bool {
        matches!(self, Self::Sad | Self::Scared | Self::Angry | Self::Frustrated)
    }

    /// Emotions that lift a `none` risk to `low` on their own
    fn lifts_quiet_message(&self) -> bool {
        matches!(self, Self::Sad | Self::Scared)
    }
}

impl std::fmt::Display for Emotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best-effort emotion tagging
#[async_trait]
pub trait EmotionDetector: Send + Sync {
    async fn detect(&self, message: &str) -> Result<Emotion, ClassifierError>;
}

/// Phrases that, combined with a concerning emotion, indicate real distress
const DISTRESS_INDICATORS: &[&str] = &[
    "everyone hates me",
    "hurt myself",
    "leave me alone forever",
    "go away",
    "hate",
];

fn distress_indicator(message: &str) -> Option<&'static str> {
    let lower = message.to_lowercase();
    DISTRESS_INDICATORS.iter().copied().find(|i| lower.contains(i))
}

/// Attach the emotion tag and apply the fusion rules:
///
/// - concerning emotion + distress indicator → at least `medium`
/// - `scared`/`sad` on an otherwise clean message → `low`
pub fn fuse(assessment: RiskAssessment, emotion: Option<Emotion>, message: &str) -> RiskAssessment {
    let Some(emotion) = emotion else {
        return assessment;
    };
    let assessment = assessment.with_emotion(emotion);

    if emotion.is_concerning() {
        if let Some(indicator) = distress_indicator(message) {
            return assessment.escalate(
                RiskLevel::Medium,
                &format!("child expressing {} emotion (\"{}\")", emotion, indicator),
            );
        }
    }

    if emotion.lifts_quiet_message() && assessment.level() == RiskLevel::None {
        return assessment.escalate(RiskLevel::Low, &format!("child seems {}", emotion));
    }

    assessment
}
