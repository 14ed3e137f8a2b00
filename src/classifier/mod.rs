//! Risk classification for inbound child messages
//!
//! Three layers, evaluated in order:
//!
//! 1. **Keyword** - fixed urgent/concern word sets, in-process. A hit
//!    short-circuits: no external call is made.
//! 2. **Semantic** - external language-understanding service, bounded by a
//!    timeout. Any failure degrades to `none` (no alert) and is logged.
//! 3. **Emotion** - best-effort tag fetched concurrently with the semantic
//!    call, fused into the level (see [`emotion::fuse`]).
//!
//! The explicit emergency control bypasses all of it through
//! [`RiskClassifier::assess_emergency_trigger`].

pub mod emotion;
pub mod keywords;
pub mod semantic;

pub use emotion::{Emotion, EmotionDetector};
pub use keywords::KeywordMatch;
pub use semantic::{
    ClassifierError, DisabledSemanticService, LlmRiskService, SemanticJudgment,
    SemanticRiskService,
};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::logging::log_classification_failure;

/// Classifier severity judgment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Parse a level string from an external service; unknown values are `none`
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            "critical" => Self::Critical,
            _ => Self::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which layer produced the assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentSource {
    Keyword,
    Semantic,
    Emergency,
    /// Semantic layer failed or timed out
    Inconclusive,
}

/// Per-message risk assessment. Never persisted.
///
/// Fields are private so that `level` and `requires_alert` can only change
/// together: `requires_alert = parent_alert || level >= medium`, and
/// `critical` always requires an alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    level: RiskLevel,
    reason: String,
    emotion: Option<Emotion>,
    requires_alert: bool,
    source: AssessmentSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    recommended_response: Option<String>,
    #[serde(skip)]
    parent_alert: bool,
}

impl RiskAssessment {
    pub fn new(level: RiskLevel, reason: &str, parent_alert: bool, source: AssessmentSource) -> Self {
        Self {
            level,
            reason: reason.to_string(),
            emotion: None,
            requires_alert: Self::derive_requires_alert(level, parent_alert),
            source,
            recommended_response: None,
            parent_alert,
        }
    }

    fn derive_requires_alert(level: RiskLevel, parent_alert: bool) -> bool {
        parent_alert || level >= RiskLevel::Medium
    }

    fn from_keyword(hit: KeywordMatch) -> Self {
        match hit {
            KeywordMatch::Urgent(term) => Self::new(
                RiskLevel::Critical,
                &format!("urgent keyword \"{}\"", term),
                true,
                AssessmentSource::Keyword,
            ),
            KeywordMatch::Concern(term) => Self::new(
                RiskLevel::Medium,
                &format!("concern keyword \"{}\"", term),
                false,
                AssessmentSource::Keyword,
            ),
        }
    }

    fn from_judgment(judgment: SemanticJudgment) -> Self {
        let reason = if judgment.reason.trim().is_empty() {
            "semantic safety check".to_string()
        } else {
            judgment.reason
        };
        let mut assessment = Self::new(
            judgment.concern_level,
            &reason,
            judgment.parent_alert,
            AssessmentSource::Semantic,
        );
        assessment.recommended_response = judgment.recommended_response;
        assessment
    }

    /// Most conservative non-blocking outcome: no alert
    fn inconclusive() -> Self {
        Self::new(
            RiskLevel::None,
            "safety analysis unavailable",
            false,
            AssessmentSource::Inconclusive,
        )
    }

    pub fn level(&self) -> RiskLevel {
        self.level
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn emotion(&self) -> Option<Emotion> {
        self.emotion
    }

    pub fn requires_alert(&self) -> bool {
        self.requires_alert
    }

    pub fn source(&self) -> AssessmentSource {
        self.source
    }

    pub fn recommended_response(&self) -> Option<&str> {
        self.recommended_response.as_deref()
    }

    pub(crate) fn with_emotion(mut self, emotion: Emotion) -> Self {
        self.emotion = Some(emotion);
        self
    }

    /// Raise the level to at least `floor`. Never lowers it.
    pub(crate) fn escalate(mut self, floor: RiskLevel, note: &str) -> Self {
        if floor <= self.level {
            return self;
        }
        self.reason = if self.level == RiskLevel::None {
            note.to_string()
        } else {
            format!("{}; {}", self.reason, note)
        };
        self.level = floor;
        self.requires_alert = Self::derive_requires_alert(self.level, self.parent_alert);
        self
    }

    fn prefix_reason(mut self, prefix: &str) -> Self {
        self.reason = format!("{}{}", prefix, self.reason);
        self
    }
}

/// The explicit "help" control: always `critical`, always alerts
pub fn emergency_assessment() -> RiskAssessment {
    RiskAssessment::new(
        RiskLevel::Critical,
        "emergency control pressed",
        true,
        AssessmentSource::Emergency,
    )
}

/// Classifier configuration
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Upper bound for each external call
    pub semantic_timeout: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            semantic_timeout: Duration::from_secs(8),
        }
    }
}

/// Layered risk classifier
pub struct RiskClassifier {
    semantic: Arc<dyn SemanticRiskService>,
    emotions: Arc<dyn EmotionDetector>,
    config: ClassifierConfig,
}

impl RiskClassifier {
    pub fn new(
        semantic: Arc<dyn SemanticRiskService>,
        emotions: Arc<dyn EmotionDetector>,
        config: ClassifierConfig,
    ) -> Self {
        Self {
            semantic,
            emotions,
            config,
        }
    }

    /// Classifier with the semantic layer switched off (keyword layer only)
    pub fn keyword_only() -> Self {
        let disabled = Arc::new(DisabledSemanticService);
        Self::new(disabled.clone(), disabled, ClassifierConfig::default())
    }

    /// Assess one child message. Never fails: external failures degrade to
    /// an inconclusive, no-alert result.
    pub async fn assess(&self, message: &str, child_age: u32) -> RiskAssessment {
        if let Some(hit) = keywords::scan(message) {
            debug!(term = %hit.term(), "Keyword layer matched, skipping semantic analysis");
            return RiskAssessment::from_keyword(hit);
        }

        let (judgment, emotion) = tokio::join!(
            self.semantic_judgment(message, child_age),
            self.detect_emotion(message),
        );

        let assessment = match judgment {
            Some(j) => RiskAssessment::from_judgment(j),
            None => RiskAssessment::inconclusive(),
        };

        emotion::fuse(assessment, emotion, message)
    }

    /// Screen the text description of an image produced by the vision service
    pub async fn assess_image_description(&self, description: &str, child_age: u32) -> RiskAssessment {
        self.assess(description, child_age)
            .await
            .prefix_reason("image: ")
    }

    /// Explicit emergency trigger. No analysis, no external calls.
    pub fn assess_emergency_trigger(&self) -> RiskAssessment {
        emergency_assessment()
    }

    async fn semantic_judgment(&self, message: &str, child_age: u32) -> Option<SemanticJudgment> {
        let timeout = self.config.semantic_timeout;
        let result = match tokio::time::timeout(timeout, self.semantic.assess(message, child_age)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifierError::Timeout(timeout)),
        };

        match result {
            Ok(judgment) => Some(judgment),
            Err(ClassifierError::Unavailable(reason)) => {
                debug!("Semantic layer unavailable: {}", reason);
                None
            }
            Err(e) => {
                log_classification_failure("semantic", &e);
                None
            }
        }
    }

    async fn detect_emotion(&self, message: &str) -> Option<Emotion> {
        let timeout = self.config.semantic_timeout;
        match tokio::time::timeout(timeout, self.emotions.detect(message)).await {
            Ok(Ok(emotion)) => Some(emotion),
            Ok(Err(ClassifierError::Unavailable(_))) => None,
            Ok(Err(e)) => {
                log_classification_failure("emotion", &e);
                None
            }
            Err(_) => {
                log_classification_failure("emotion", &ClassifierError::Timeout(timeout));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Semantic stub with a scripted behaviour and a call counter
    struct ScriptedSemantic {
        calls: AtomicUsize,
        behaviour: Behaviour,
    }

    enum Behaviour {
        Judge(SemanticJudgment),
        Fail,
        Hang,
    }

    impl ScriptedSemantic {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                behaviour,
            })
        }
    }

    #[async_trait]
    impl SemanticRiskService for ScriptedSemantic {
        async fn assess(&self, _message: &str, _age: u32) -> Result<SemanticJudgment, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Judge(j) => Ok(j.clone()),
                Behaviour::Fail => Err(ClassifierError::Status(502)),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ClassifierError::Status(504))
                }
            }
        }
    }

    struct FixedEmotion(Option<Emotion>);

    #[async_trait]
    impl EmotionDetector for FixedEmotion {
        async fn detect(&self, _message: &str) -> Result<Emotion, ClassifierError> {
            self.0
                .ok_or_else(|| ClassifierError::Malformed("no emotion".into()))
        }
    }

    fn classifier(semantic: Arc<ScriptedSemantic>, emotion: Option<Emotion>) -> RiskClassifier {
        RiskClassifier::new(
            semantic,
            Arc::new(FixedEmotion(emotion)),
            ClassifierConfig {
                semantic_timeout: Duration::from_millis(50),
            },
        )
    }

    fn judgment(level: RiskLevel, parent_alert: bool) -> SemanticJudgment {
        SemanticJudgment {
            is_safe: level < RiskLevel::Medium,
            concern_level: level,
            reason: "model says so".into(),
            parent_alert,
            recommended_response: Some("Let's find a grown-up".into()),
        }
    }

    #[tokio::test]
    async fn test_urgent_keyword_short_circuits_semantic_layer() {
        let semantic = ScriptedSemantic::new(Behaviour::Fail);
        let c = classifier(semantic.clone(), Some(Emotion::Scared));

        for message in ["there is a FIRE", "my brother took poison", "I can't breathe"] {
            let a = c.assess(message, 7).await;
            assert_eq!(a.level(), RiskLevel::Critical, "{message}");
            assert!(a.requires_alert());
            assert_eq!(a.source(), AssessmentSource::Keyword);
        }
        assert_eq!(semantic.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fell_down_scenario_is_medium() {
        let semantic = ScriptedSemantic::new(Behaviour::Judge(judgment(RiskLevel::None, false)));
        let c = classifier(semantic.clone(), None);

        let a = c.assess("I fell down and my knee hurts", 6).await;
        assert_eq!(a.level(), RiskLevel::Medium);
        assert!(a.requires_alert());
        assert_eq!(semantic.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_semantic_timeout_degrades_to_none() {
        let semantic = ScriptedSemantic::new(Behaviour::Hang);
        let c = classifier(semantic.clone(), None);

        let a = c.assess("what is under my bed", 8).await;
        assert_eq!(a.level(), RiskLevel::None);
        assert!(!a.requires_alert());
        assert_eq!(a.source(), AssessmentSource::Inconclusive);
        assert_eq!(semantic.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_semantic_error_degrades_to_none() {
        let c = classifier(ScriptedSemantic::new(Behaviour::Fail), None);
        let a = c.assess("tell me a joke", 8).await;
        assert_eq!(a.level(), RiskLevel::None);
        assert!(!a.requires_alert());
    }

    #[tokio::test]
    async fn test_semantic_judgment_is_used() {
        let c = classifier(
            ScriptedSemantic::new(Behaviour::Judge(judgment(RiskLevel::High, true))),
            Some(Emotion::Neutral),
        );
        let a = c.assess("a man in a van asked me to come over", 9).await;
        assert_eq!(a.level(), RiskLevel::High);
        assert!(a.requires_alert());
        assert_eq!(a.reason(), "model says so");
        assert_eq!(a.recommended_response(), Some("Let's find a grown-up"));
        assert_eq!(a.emotion(), Some(Emotion::Neutral));
    }

    #[tokio::test]
    async fn test_parent_alert_on_low_level_requires_alert() {
        let c = classifier(
            ScriptedSemantic::new(Behaviour::Judge(judgment(RiskLevel::Low, true))),
            None,
        );
        let a = c.assess("mom is not home yet", 9).await;
        assert_eq!(a.level(), RiskLevel::Low);
        assert!(a.requires_alert());
    }

    #[tokio::test]
    async fn test_scared_emotion_lifts_clean_semantic_result() {
        let c = classifier(
            ScriptedSemantic::new(Behaviour::Judge(judgment(RiskLevel::None, false))),
            Some(Emotion::Scared),
        );
        let a = c.assess("the thunder is so loud", 5).await;
        assert_eq!(a.level(), RiskLevel::Low);
        assert!(!a.requires_alert());
    }

    #[test]
    fn test_emergency_trigger_is_critical() {
        let a = RiskClassifier::keyword_only().assess_emergency_trigger();
        assert_eq!(a.level(), RiskLevel::Critical);
        assert!(a.requires_alert());
        assert_eq!(a.source(), AssessmentSource::Emergency);
    }

    #[test]
    fn test_critical_always_requires_alert() {
        let a = RiskAssessment::new(RiskLevel::Critical, "x", false, AssessmentSource::Semantic);
        assert!(a.requires_alert());
    }

    #[tokio::test]
    async fn test_image_description_reason_is_prefixed() {
        let c = RiskClassifier::keyword_only();
        let a = c.assess_image_description("a child next to a kitchen fire", 6).await;
        assert_eq!(a.level(), RiskLevel::Critical);
        assert!(a.reason().starts_with("image: "));
    }
}
