//! Simulator log classification.
//!
//! The simulator reports non-fatal problems as Geant4 exception blocks in
//! its text log:
//!
//! ```text
//! -------- WWWW ------- G4Exception-START -------- WWWW -------
//! *** G4Exception : GeomNav1002
//!       issued by : G4Navigator::ComputeStep()
//! Track stuck or not moving.
//! -------- WWWW -------- G4Exception-END --------- WWWW -------
//! ```
//!
//! Blocks opened with `EEEE` markers are fatal. Which [`Diagnostic`] a
//! warning block maps to depends only on the issuing component, through an
//! [`ExceptionRule`] table. This text is owned by an external tool and may
//! change between releases, so the aggregator only ever sees the
//! [`LogClassifier`] trait and the rules can be swapped without touching it.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

const START_MARKER: &str = "G4Exception-START";
const END_MARKER: &str = "G4Exception-END";
const FATAL_MARKER: &str = "EEEE";
const CODE_PREFIX: &str = "*** G4Exception :";
const ISSUER_PREFIX: &str = "issued by :";

/// Secondary ("soft") problem found in a simulator log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Diagnostic {
    Overlaps,
    StuckParticle,
    TrackingWarning,
    FatalException,
    NanChord,
}

impl Diagnostic {
    pub const ALL: &[Self] = &[
        Self::Overlaps,
        Self::StuckParticle,
        Self::TrackingWarning,
        Self::FatalException,
        Self::NanChord,
    ];

    /// Numeric code kept stable across report formats.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Overlaps => 4,
            Self::StuckParticle => 5,
            Self::TrackingWarning => 6,
            Self::FatalException => 8,
            Self::NanChord => 9,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Overlaps => "overlaps",
            Self::StuckParticle => "stuck_particle",
            Self::TrackingWarning => "tracking_warning",
            Self::FatalException => "fatal_exception",
            Self::NanChord => "nan_chord",
        }
    }

    /// A fatal exception makes the run a hard failure even if the
    /// comparison passed.
    #[must_use]
    pub const fn is_hard(self) -> bool {
        matches!(self, Self::FatalException)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionSeverity {
    Warning,
    Fatal,
}

/// One exception block lifted out of a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionBlock {
    pub severity: ExceptionSeverity,
    /// Exception code, e.g. `GeomNav1002`.
    pub code: Option<String>,
    /// Issuing component, e.g. `G4Navigator::ComputeStep()`.
    pub issuer: Option<String>,
    /// Remaining body lines.
    pub message: Vec<String>,
    /// False when the log ended before the END marker.
    pub terminated: bool,
}

/// Extract every exception block in order of appearance.
///
/// An unterminated block at the end of the text is still returned; a
/// simulator killed mid-exception is exactly the case worth reporting.
#[must_use]
pub fn parse_exception_blocks(text: &str) -> Vec<ExceptionBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<ExceptionBlock> = None;

    for line in text.lines() {
        if line.contains(START_MARKER) {
            if let Some(open) = current.take() {
                blocks.push(open);
            }
            let severity = if line.contains(FATAL_MARKER) {
                ExceptionSeverity::Fatal
            } else {
                ExceptionSeverity::Warning
            };
            current = Some(ExceptionBlock {
                severity,
                code: None,
                issuer: None,
                message: Vec::new(),
                terminated: false,
            });
            continue;
        }
        let Some(block) = current.as_mut() else {
            continue;
        };
        if line.contains(END_MARKER) {
            block.terminated = true;
            if let Some(done) = current.take() {
                blocks.push(done);
            }
            continue;
        }
        let trimmed = line.trim();
        if let Some(code) = trimmed.strip_prefix(CODE_PREFIX) {
            block.code = Some(code.trim().to_owned());
        } else if let Some(issuer) = trimmed.strip_prefix(ISSUER_PREFIX) {
            block.issuer = Some(issuer.trim().to_owned());
        } else if !trimmed.is_empty() {
            block.message.push(trimmed.to_owned());
        }
    }
    if let Some(open) = current {
        blocks.push(open);
    }
    blocks
}

/// Maps an issuing component to a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRule {
    /// Substring matched against the `issued by` field.
    pub issuer_contains: String,
    pub diagnostic: Diagnostic,
}

impl ExceptionRule {
    #[must_use]
    pub fn new(issuer_contains: &str, diagnostic: Diagnostic) -> Self {
        Self {
            issuer_contains: issuer_contains.to_owned(),
            diagnostic,
        }
    }
}

/// Turns simulator log text into diagnostics.
pub trait LogClassifier: Send + Sync {
    /// Distinct diagnostics found in `log_text`, sorted.
    fn classify(&self, log_text: &str) -> Vec<Diagnostic>;
}

/// Rule-table classifier for Geant4 exception blocks.
#[derive(Debug, Clone)]
pub struct Geant4ExceptionClassifier {
    rules: Vec<ExceptionRule>,
}

impl Default for Geant4ExceptionClassifier {
    fn default() -> Self {
        Self::with_rules(default_rules())
    }
}

impl Geant4ExceptionClassifier {
    /// Classifier using `rules`; the first matching rule wins.
    #[must_use]
    pub fn with_rules(rules: Vec<ExceptionRule>) -> Self {
        Self { rules }
    }

    #[must_use]
    pub fn rules(&self) -> &[ExceptionRule] {
        &self.rules
    }

    /// Diagnostic for one block, if any rule applies.
    #[must_use]
    pub fn classify_block(&self, block: &ExceptionBlock) -> Option<Diagnostic> {
        if block.severity == ExceptionSeverity::Fatal {
            return Some(Diagnostic::FatalException);
        }
        let issuer = block.issuer.as_deref()?;
        self.rules
            .iter()
            .find(|rule| issuer.contains(&rule.issuer_contains))
            .map(|rule| rule.diagnostic)
    }
}

impl LogClassifier for Geant4ExceptionClassifier {
    fn classify(&self, log_text: &str) -> Vec<Diagnostic> {
        parse_exception_blocks(log_text)
            .iter()
            .filter_map(|block| self.classify_block(block))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Rules for the exception issuers seen in component tests.
#[must_use]
pub fn default_rules() -> Vec<ExceptionRule> {
    vec![
        ExceptionRule::new("G4PVPlacement::CheckOverlaps", Diagnostic::Overlaps),
        ExceptionRule::new("G4Navigator::ComputeStep", Diagnostic::StuckParticle),
        ExceptionRule::new("G4ChordFinder", Diagnostic::NanChord),
        ExceptionRule::new("G4MagInt_Driver", Diagnostic::NanChord),
        ExceptionRule::new("G4MagIntegratorDriver", Diagnostic::NanChord),
        ExceptionRule::new("G4PropagatorInField", Diagnostic::TrackingWarning),
        ExceptionRule::new("G4Transportation", Diagnostic::TrackingWarning),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warning_block(code: &str, issuer: &str) -> String {
        format!(
            "-------- WWWW ------- G4Exception-START -------- WWWW -------\n\
             *** G4Exception : {code}\n      issued by : {issuer}\n\
             Something happened.\n\
             *** This is just a warning message. ***\n\
             -------- WWWW -------- G4Exception-END --------- WWWW -------\n"
        )
    }

    #[test]
    fn clean_log_has_no_diagnostics() {
        let log = "BDSIM run start\nEvent 0\nEvent 1\nBDSIM run end\n";
        assert!(Geant4ExceptionClassifier::default().classify(log).is_empty());
    }

    #[test]
    fn parses_code_issuer_and_message() {
        let log = warning_block("GeomNav1002", "G4Navigator::ComputeStep()");
        let blocks = parse_exception_blocks(&log);
        assert_eq!(blocks.len(), 1);
        let block = &blocks[0];
        assert_eq!(block.severity, ExceptionSeverity::Warning);
        assert_eq!(block.code.as_deref(), Some("GeomNav1002"));
        assert_eq!(block.issuer.as_deref(), Some("G4Navigator::ComputeStep()"));
        assert!(block.terminated);
        assert_eq!(block.message[0], "Something happened.");
    }

    #[test]
    fn classifies_by_issuer() {
        let classifier = Geant4ExceptionClassifier::default();
        let cases = [
            ("G4PVPlacement::CheckOverlaps()", Diagnostic::Overlaps),
            ("G4Navigator::ComputeStep()", Diagnostic::StuckParticle),
            (
                "G4PropagatorInField::ComputeStep()",
                Diagnostic::TrackingWarning,
            ),
            (
                "G4Transportation::AlongStepGetPhysicalInteractionLength()",
                Diagnostic::TrackingWarning,
            ),
            ("G4ChordFinder::FindNextChord()", Diagnostic::NanChord),
            ("G4MagInt_Driver::AccurateAdvance()", Diagnostic::NanChord),
        ];
        for (issuer, expected) in cases {
            let actual = classifier.classify(&warning_block("X0001", issuer));
            assert_eq!(
                actual,
                vec![expected],
                "case=issuer issuer={issuer} expected={expected} actual={actual:?}"
            );
        }
    }

    #[test]
    fn fatal_marker_wins_over_issuer() {
        let log = "-------- EEEE ------- G4Exception-START -------- EEEE -------\n\
                   *** G4Exception : Run0001\n      issued by : G4Navigator::ComputeStep()\n\
                   *** Fatal Exception *** core dump ***\n\
                   -------- EEEE -------- G4Exception-END --------- EEEE -------\n";
        assert_eq!(
            Geant4ExceptionClassifier::default().classify(log),
            vec![Diagnostic::FatalException]
        );
    }

    #[test]
    fn diagnostics_are_deduplicated_and_sorted() {
        let mut log = String::new();
        log.push_str(&warning_block("A", "G4Transportation::Step()"));
        log.push_str(&warning_block("B", "G4PVPlacement::CheckOverlaps()"));
        log.push_str(&warning_block("C", "G4Transportation::Step()"));
        assert_eq!(
            Geant4ExceptionClassifier::default().classify(&log),
            vec![Diagnostic::Overlaps, Diagnostic::TrackingWarning]
        );
    }

    #[test]
    fn unknown_issuer_is_ignored() {
        let log = warning_block("Had001", "G4HadronicProcess::PostStepDoIt()");
        assert!(Geant4ExceptionClassifier::default().classify(&log).is_empty());
    }

    #[test]
    fn unterminated_block_is_reported() {
        let log = "-------- WWWW ------- G4Exception-START -------- WWWW -------\n\
                   *** G4Exception : GeomVol1002\n      issued by : G4PVPlacement::CheckOverlaps()\n";
        let blocks = parse_exception_blocks(log);
        assert_eq!(blocks.len(), 1);
        assert!(!blocks[0].terminated);
        assert_eq!(
            Geant4ExceptionClassifier::default().classify(log),
            vec![Diagnostic::Overlaps]
        );
    }

    #[test]
    fn custom_rules_replace_defaults() {
        let classifier = Geant4ExceptionClassifier::with_rules(vec![ExceptionRule::new(
            "G4HadronicProcess",
            Diagnostic::TrackingWarning,
        )]);
        let log = warning_block("Had001", "G4HadronicProcess::PostStepDoIt()");
        assert_eq!(classifier.classify(&log), vec![Diagnostic::TrackingWarning]);
        let overlap = warning_block("GeomVol1002", "G4PVPlacement::CheckOverlaps()");
        assert!(classifier.classify(&overlap).is_empty());
    }
}
