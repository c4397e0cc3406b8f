//! Impact governance
//!
//! Classifies how consequential a query is from an explicit keyword rule
//! table. The resulting tier raises the validator's confidence threshold,
//! applies a confidence penalty and adds required checks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Real-world area a query touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactCategory {
    Healthcare,
    Finance,
    Legal,
    Climate,
    Humanitarian,
}

impl ImpactCategory {
    /// Snake-case name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Healthcare => "healthcare",
            Self::Finance => "finance",
            Self::Legal => "legal",
            Self::Climate => "climate",
            Self::Humanitarian => "humanitarian",
        }
    }
}

impl fmt::Display for ImpactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scrutiny level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImpactTier {
    #[default]
    Standard,
    Elevated,
    Critical,
}

impl ImpactTier {
    /// Category present means at least elevated; score above 0.8 means critical
    #[must_use]
    pub fn derive(category: Option<ImpactCategory>, score: f64) -> Self {
        if score > 0.8 {
            Self::Critical
        } else if category.is_some() {
            Self::Elevated
        } else {
            Self::Standard
        }
    }

    /// Added to the validator's confidence
    #[must_use]
    pub fn confidence_penalty(self) -> f64 {
        match self {
            Self::Standard => 0.0,
            Self::Elevated => -0.05,
            Self::Critical => -0.10,
        }
    }

    /// Checks an answer at this tier must pass
    #[must_use]
    pub fn required_checks(self) -> BTreeSet<RequiredCheck> {
        use RequiredCheck::{AlternativeMethod, ExactCertificate, NumericSpotCheck, Sanity, Substitution};
        match self {
            Self::Standard => BTreeSet::from([Sanity]),
            Self::Elevated => BTreeSet::from([Sanity, AlternativeMethod]),
            Self::Critical => BTreeSet::from([
                Sanity,
                Substitution,
                NumericSpotCheck,
                AlternativeMethod,
                ExactCertificate,
            ]),
        }
    }

    /// Snake-case name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Elevated => "elevated",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ImpactTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Verification checks an impact tier can demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredCheck {
    Sanity,
    Substitution,
    NumericSpotCheck,
    AlternativeMethod,
    ExactCertificate,
}

impl RequiredCheck {
    /// Snake-case name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sanity => "sanity",
            Self::Substitution => "substitution",
            Self::NumericSpotCheck => "numeric_spot_check",
            Self::AlternativeMethod => "alternative_method",
            Self::ExactCertificate => "exact_certificate",
        }
    }
}

impl fmt::Display for RequiredCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How consequential a query is
///
/// Tier, penalty and required checks always follow from category and score:
/// deserialising and `rederived` both recompute them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ImpactRecord")]
pub struct ImpactAssessment {
    pub category: Option<ImpactCategory>,
    /// In `[0, 1]`
    pub score: f64,
    pub tier: ImpactTier,
    /// Zero or negative
    pub confidence_penalty: f64,
    pub required_checks: BTreeSet<RequiredCheck>,
    pub matched_keywords: Vec<String>,
}

impl ImpactAssessment {
    /// Assessment with tier, penalty and required checks derived from the score
    #[must_use]
    pub fn new(category: Option<ImpactCategory>, score: f64) -> Self {
        let score = score.clamp(0.0, 1.0);
        let tier = ImpactTier::derive(category, score);
        Self {
            category,
            score,
            tier,
            confidence_penalty: tier.confidence_penalty(),
            required_checks: tier.required_checks(),
            matched_keywords: Vec::new(),
        }
    }

    /// No category, no penalty
    #[must_use]
    pub fn standard() -> Self {
        Self::new(None, 0.0)
    }

    /// Same category, score and keywords with every derived field recomputed
    #[must_use]
    pub fn rederived(&self) -> Self {
        Self {
            matched_keywords: self.matched_keywords.clone(),
            ..Self::new(self.category, self.score)
        }
    }

    /// Whether the tier is above standard
    #[inline]
    #[must_use]
    pub fn is_high_impact(&self) -> bool {
        self.tier >= ImpactTier::Elevated
    }
}

/// Wire form; derived fields in the input are ignored
#[derive(Deserialize)]
struct ImpactRecord {
    category: Option<ImpactCategory>,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    matched_keywords: Vec<String>,
}

impl From<ImpactRecord> for ImpactAssessment {
    fn from(record: ImpactRecord) -> Self {
        Self {
            matched_keywords: record.matched_keywords,
            ..Self::new(record.category, record.score)
        }
    }
}

impl Default for ImpactAssessment {
    fn default() -> Self {
        Self::standard()
    }
}

/// One row of the classification table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpactRule {
    pub category: ImpactCategory,
    pub base_score: f64,
    pub keywords: &'static [&'static str],
}

/// Keyword rules, checked in order; the highest base score wins
pub const IMPACT_RULES: &[ImpactRule] = &[
    ImpactRule {
        category: ImpactCategory::Healthcare,
        base_score: 0.7,
        keywords: &[
            "drug", "dosage", "dose", "patient", "medical", "medication", "clinical", "hospital",
            "treatment", "toxicity", "disease", "vaccine", "diagnosis", "therapy",
        ],
    },
    ImpactRule {
        category: ImpactCategory::Humanitarian,
        base_score: 0.7,
        keywords: &[
            "refugee", "famine", "disaster", "evacuation", "shelter", "humanitarian", "relief",
            "displaced", "aid",
        ],
    },
    ImpactRule {
        category: ImpactCategory::Finance,
        base_score: 0.6,
        keywords: &[
            "loan", "mortgage", "interest", "investment", "portfolio", "pension", "tax", "credit",
            "stock", "dividend", "retirement",
        ],
    },
    ImpactRule {
        category: ImpactCategory::Legal,
        base_score: 0.6,
        keywords: &[
            "legal", "contract", "liability", "court", "lawsuit", "compliance", "regulation",
            "sentencing", "statute",
        ],
    },
    ImpactRule {
        category: ImpactCategory::Climate,
        base_score: 0.5,
        keywords: &[
            "climate", "emissions", "emission", "carbon", "warming", "co2", "greenhouse", "sea-level",
        ],
    },
];

/// Words that raise the score of a matched category
pub const SEVERITY_KEYWORDS: &[&str] = &[
    "lethal",
    "fatal",
    "life-threatening",
    "emergency",
    "critical",
    "irreversible",
];

const SEVERITY_BOOST: f64 = 0.2;

/// Lower-cased words, keeping inner hyphens
fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .map(|w| w.trim_matches('-').to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Exact word or its plural
fn mentions(words: &[String], keyword: &str) -> bool {
    words
        .iter()
        .any(|w| w == keyword || w.strip_suffix('s').is_some_and(|stem| stem == keyword))
}

/// Rule-table classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct ImpactAssessor;

impl ImpactAssessor {
    /// Assessor with the built-in rule table
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Classify `text`
    #[must_use]
    pub fn assess(&self, text: &str) -> ImpactAssessment {
        let words = words(text);
        let mut best: Option<(&ImpactRule, Vec<String>)> = None;
        for rule in IMPACT_RULES {
            let matched: Vec<String> = rule
                .keywords
                .iter()
                .filter(|k| mentions(&words, k))
                .map(|k| format!("{}:{k}", rule.category))
                .collect();
            if matched.is_empty() {
                continue;
            }
            if best.as_ref().map_or(true, |(b, _)| rule.base_score > b.base_score) {
                best = Some((rule, matched));
            }
        }

        let Some((rule, mut matched)) = best else {
            return ImpactAssessment::standard();
        };
        let severity: Vec<&str> = SEVERITY_KEYWORDS
            .iter()
            .copied()
            .filter(|k| mentions(&words, k))
            .collect();
        let score = if severity.is_empty() {
            rule.base_score
        } else {
            rule.base_score + SEVERITY_BOOST
        };
        matched.extend(severity.iter().map(|k| format!("severity:{k}")));

        let mut assessment = ImpactAssessment::new(Some(rule.category), score);
        assessment.matched_keywords = matched;
        tracing::debug!(
            category = %rule.category,
            score = assessment.score,
            tier = %assessment.tier,
            "impact assessed"
        );
        assessment
    }
}

/// Signed agreement authorising critical-impact use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Treaty {
    pub id: String,
    pub active: bool,
}

/// Caller-supplied governance overrides
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GovernanceContext {
    /// Replaces the keyword classification when present
    pub impact: Option<ImpactAssessment>,
    pub treaty: Option<Treaty>,
    /// Refuse the run outright
    pub block_reason: Option<String>,
}

impl GovernanceContext {
    /// Context with no impact, treaty or block
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Supply an assessment; it is re-derived before use
    #[must_use]
    pub fn with_impact(mut self, impact: ImpactAssessment) -> Self {
        self.impact = Some(impact);
        self
    }

    /// Attach a treaty
    #[must_use]
    pub fn with_treaty(mut self, treaty: Treaty) -> Self {
        self.treaty = Some(treaty);
        self
    }

    /// Block every run with `reason`
    #[must_use]
    pub fn blocked(mut self, reason: impl Into<String>) -> Self {
        self.block_reason = Some(reason.into());
        self
    }

    /// Whether an active treaty is attached
    #[must_use]
    pub fn has_active_treaty(&self) -> bool {
        self.treaty.as_ref().is_some_and(|t| t.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn dosage_query_is_healthcare() {
        let a = ImpactAssessor::new().assess("optimize drug dosage to maximize absorption minus toxicity");
        assert_eq!(a.category, Some(ImpactCategory::Healthcare));
        assert_eq!(a.tier, ImpactTier::Elevated);
        assert_eq!(a.confidence_penalty, -0.05);
        assert!(a.required_checks.contains(&RequiredCheck::AlternativeMethod));
        assert!(a.matched_keywords.contains(&"healthcare:dosage".to_string()));
    }

    #[test]
    fn severity_escalates_to_critical() {
        let a = ImpactAssessor::new().assess("lethal dose threshold for a patient");
        assert!((a.score - 0.9).abs() < 1e-12);
        assert_eq!(a.tier, ImpactTier::Critical);
        assert_eq!(a.required_checks.len(), 5);
        assert_eq!(a.confidence_penalty, -0.10);
    }

    #[test]
    fn plain_math_is_standard() {
        let a = ImpactAssessor::new().assess("solve x^2 - 4 = 0");
        assert_eq!(a, ImpactAssessment::standard());
        assert_eq!(a.required_checks, BTreeSet::from([RequiredCheck::Sanity]));
    }

    #[test]
    fn severity_alone_has_no_category() {
        let a = ImpactAssessor::new().assess("find the critical points of x^3 - 3x");
        assert_eq!(a.category, None);
        assert_eq!(a.tier, ImpactTier::Standard);
    }

    #[test]
    fn every_rule_is_reachable() {
        let assessor = ImpactAssessor::new();
        for rule in IMPACT_RULES {
            for keyword in rule.keywords {
                assert!(assessor.assess(keyword).category.is_some(), "{keyword}");
            }
        }
        assert_eq!(
            assessor.assess("mortgage interest").category,
            Some(ImpactCategory::Finance)
        );
        assert_eq!(assessor.assess("carbon emissions").category, Some(ImpactCategory::Climate));
        assert_eq!(assessor.assess("contract liability").category, Some(ImpactCategory::Legal));
        assert_eq!(
            assessor.assess("refugee shelter capacity").category,
            Some(ImpactCategory::Humanitarian)
        );
    }

    #[test]
    fn plurals_match() {
        let a = ImpactAssessor::new().assess("number of patients per ward");
        assert_eq!(a.category, Some(ImpactCategory::Healthcare));
    }

    #[test]
    fn tier_derivation() {
        assert_eq!(ImpactTier::derive(None, 0.85), ImpactTier::Critical);
        assert_eq!(ImpactTier::derive(Some(ImpactCategory::Climate), 0.5), ImpactTier::Elevated);
        assert_eq!(ImpactTier::derive(None, 0.3), ImpactTier::Standard);
    }

    #[test]
    fn treaty_must_be_active() {
        let ctx = GovernanceContext::new().with_treaty(Treaty {
            id: "t-1".into(),
            active: false,
        });
        assert!(!ctx.has_active_treaty());
    }

    #[test]
    fn derived_fields_cannot_be_forged() {
        let mut forged = ImpactAssessment::new(Some(ImpactCategory::Healthcare), 0.95);
        forged.tier = ImpactTier::Standard;
        forged.confidence_penalty = 0.5;
        forged.required_checks.clear();

        let fixed = forged.rederived();
        assert_eq!(fixed.tier, ImpactTier::Critical);
        assert_eq!(fixed.confidence_penalty, -0.10);
        assert!(fixed.required_checks.contains(&RequiredCheck::ExactCertificate));
    }

    #[test]
    fn deserialising_recomputes_the_tier() {
        let json = r#"{
            "category": "healthcare",
            "score": 0.95,
            "tier": "standard",
            "confidence_penalty": 0.5,
            "required_checks": [],
            "matched_keywords": ["healthcare:drug"]
        }"#;
        let a: ImpactAssessment = serde_json::from_str(json).unwrap();
        assert_eq!(a.tier, ImpactTier::Critical);
        assert_eq!(a.confidence_penalty, -0.10);
        assert_eq!(a.matched_keywords, vec!["healthcare:drug".to_string()]);
    }
}
