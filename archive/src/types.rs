//! Core value types shared by the archive, ledger and engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upper bound of every evaluation dimension and of the PoC score.
pub const SCORE_MAX: u32 = 10_000;

/// Contribution category with an associated reward multiplier.
///
/// Declaration order is tier order: Gold ranks above Silver above Copper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metal {
    /// Discovery work
    Gold,
    /// Applied work
    Silver,
    /// Alignment and support work
    Copper,
}

impl Metal {
    /// All metals in tier order.
    pub const ALL: [Metal; 3] = [Metal::Gold, Metal::Silver, Metal::Copper];

    /// Get the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Metal::Gold => "gold",
            Metal::Silver => "silver",
            Metal::Copper => "copper",
        }
    }
}

impl fmt::Display for Metal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metal {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gold" => Ok(Metal::Gold),
            "silver" => Ok(Metal::Silver),
            "copper" => Ok(Metal::Copper),
            other => Err(UnknownVariant {
                kind: "metal",
                value: other.to_string(),
            }),
        }
    }
}

/// Token distribution phase.
///
/// Declaration order is rank order: Founder is the highest epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Epoch {
    Founder,
    Pioneer,
    Community,
    Ecosystem,
}

impl Epoch {
    /// All epochs in rank order.
    pub const ALL: [Epoch; 4] = [
        Epoch::Founder,
        Epoch::Pioneer,
        Epoch::Community,
        Epoch::Ecosystem,
    ];

    /// Get the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Epoch::Founder => "founder",
            Epoch::Pioneer => "pioneer",
            Epoch::Community => "community",
            Epoch::Ecosystem => "ecosystem",
        }
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Epoch {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "founder" => Ok(Epoch::Founder),
            "pioneer" => Ok(Epoch::Pioneer),
            "community" => Ok(Epoch::Community),
            "ecosystem" => Ok(Epoch::Ecosystem),
            other => Err(UnknownVariant {
                kind: "epoch",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle status of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    /// Stored, not yet handed in for evaluation
    Draft,
    /// Handed in, waiting for evaluation
    Submitted,
    /// External evaluation in progress
    Evaluating,
    /// Judged and eligible for allocation
    Qualified,
    /// Judged (or found redundant) and not eligible
    Unqualified,
    /// Evaluator could not be reached or understood; may be resubmitted
    EvaluationFailed,
    /// Terminal: retired from active use
    Archived,
    /// Terminal: replaced by a newer submission
    Superseded,
}

impl SubmissionStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [SubmissionStatus; 8] = [
        SubmissionStatus::Draft,
        SubmissionStatus::Submitted,
        SubmissionStatus::Evaluating,
        SubmissionStatus::Qualified,
        SubmissionStatus::Unqualified,
        SubmissionStatus::EvaluationFailed,
        SubmissionStatus::Archived,
        SubmissionStatus::Superseded,
    ];

    /// Whether `next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: SubmissionStatus) -> bool {
        use SubmissionStatus::*;
        matches!(
            (self, next),
            (Draft, Submitted)
                | (Submitted, Evaluating)
                // redundancy short-circuit
                | (Submitted, Unqualified)
                | (Evaluating, Qualified)
                | (Evaluating, Unqualified)
                | (Evaluating, EvaluationFailed)
                | (EvaluationFailed, Submitted)
                | (EvaluationFailed, Archived)
                | (Qualified, Archived)
                | (Qualified, Superseded)
                | (Unqualified, Archived)
                | (Unqualified, Superseded)
        )
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, SubmissionStatus::Archived | SubmissionStatus::Superseded)
    }

    /// Get the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Draft => "DRAFT",
            SubmissionStatus::Submitted => "SUBMITTED",
            SubmissionStatus::Evaluating => "EVALUATING",
            SubmissionStatus::Qualified => "QUALIFIED",
            SubmissionStatus::Unqualified => "UNQUALIFIED",
            SubmissionStatus::EvaluationFailed => "EVALUATION_FAILED",
            SubmissionStatus::Archived => "ARCHIVED",
            SubmissionStatus::Superseded => "SUPERSEDED",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        SubmissionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| UnknownVariant {
                kind: "status",
                value: s.to_string(),
            })
    }
}

/// Parse failure for one of the enums above.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Evaluation dimensions, each in `0..=SCORE_MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scores {
    pub coherence: u32,
    pub density: u32,
    pub novelty: u32,
}

/// A dimension was outside `0..=SCORE_MAX`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Score {dimension} out of range: {value} (max 10000)")]
pub struct ScoreOutOfRange {
    pub dimension: &'static str,
    pub value: u64,
}

impl Scores {
    /// Create validated scores.
    pub fn new(coherence: u32, density: u32, novelty: u32) -> Result<Self, ScoreOutOfRange> {
        for (dimension, value) in [
            ("coherence", coherence),
            ("density", density),
            ("novelty", novelty),
        ] {
            if value > SCORE_MAX {
                return Err(ScoreOutOfRange {
                    dimension,
                    value: value as u64,
                });
            }
        }
        Ok(Self {
            coherence,
            density,
            novelty,
        })
    }

    /// Composite Proof-of-Contribution score.
    ///
    /// Multiplicative: a zero in any dimension yields zero.
    /// `coherence * density * novelty / SCORE_MAX^2`, truncated.
    pub fn poc_score(&self) -> u32 {
        let product = self.coherence as u64 * self.density as u64 * self.novelty as u64;
        let scale = SCORE_MAX as u64 * SCORE_MAX as u64;
        (product / scale) as u32
    }
}
