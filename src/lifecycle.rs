//! Per-bibcode lifecycle.
//!
//! ```text
//! UNSEEN ─┬─▶ NEW ──────┐
//!         ├─▶ UPDATED ──┼─▶ EXTRACTING ─┬─▶ EXTRACTED ─▶ WRITTEN
//!         ├─▶ UNCHANGED │               └─▶ FAILED
//!         └─▶ FAILED    └─▶ FAILED (unroutable)
//! ```
//!
//! `WRITTEN`, `FAILED` and `UNCHANGED` are terminal. `EXTRACTED → FAILED`
//! covers a publication failure.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::detect::DetectorReport;
use crate::models::{Classification, Stage};
use crate::sink::SinkReport;
use crate::writer::WriterReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BibcodeState {
    Unseen,
    New,
    Updated,
    Unchanged,
    Extracting,
    Extracted,
    Failed,
    Written,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("illegal transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: BibcodeState,
    pub to: BibcodeState,
}

impl BibcodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BibcodeState::Written | BibcodeState::Failed | BibcodeState::Unchanged
        )
    }

    pub fn advance(self, to: BibcodeState) -> Result<BibcodeState, InvalidTransition> {
        use BibcodeState::*;
        let allowed = matches!(
            (self, to),
            (Unseen, New | Updated | Unchanged | Failed)
                | (New | Updated, Extracting | Failed)
                | (Extracting, Extracted | Failed)
                | (Extracted, Written | Failed)
        );
        if allowed {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BibcodeState::Unseen => "UNSEEN",
            BibcodeState::New => "NEW",
            BibcodeState::Updated => "UPDATED",
            BibcodeState::Unchanged => "UNCHANGED",
            BibcodeState::Extracting => "EXTRACTING",
            BibcodeState::Extracted => "EXTRACTED",
            BibcodeState::Failed => "FAILED",
            BibcodeState::Written => "WRITTEN",
        }
    }
}

impl fmt::Display for BibcodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Classification> for BibcodeState {
    fn from(c: Classification) -> Self {
        match c {
            Classification::New => BibcodeState::New,
            Classification::DifferingFullText => BibcodeState::Updated,
            Classification::NoChange => BibcodeState::Unchanged,
        }
    }
}

/// Current state of every bibcode seen in a run.
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    states: BTreeMap<String, BibcodeState>,
}

impl Ledger {
    pub fn state(&self, bibcode: &str) -> BibcodeState {
        self.states
            .get(bibcode)
            .copied()
            .unwrap_or(BibcodeState::Unseen)
    }

    /// Walk `bibcode` through `path`, stopping at the first illegal step.
    pub fn advance(&mut self, bibcode: &str, path: &[BibcodeState]) -> Result<(), InvalidTransition> {
        let mut state = self.state(bibcode);
        for next in path {
            state = state.advance(*next)?;
        }
        self.states.insert(bibcode.to_string(), state);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BibcodeState)> {
        self.states.iter()
    }

    pub fn counts(&self) -> BTreeMap<BibcodeState, usize> {
        let mut counts = BTreeMap::new();
        for state in self.states.values() {
            *counts.entry(*state).or_insert(0) += 1;
        }
        counts
    }

    /// Bibcodes that never reached a terminal state.
    pub fn unfinished(&self) -> Vec<&str> {
        self.states
            .iter()
            .filter(|(_, s)| !s.is_terminal())
            .map(|(b, _)| b.as_str())
            .collect()
    }

    /// Replay stage outcomes in causal order: classify, fail or publish.
    /// Payload rejections are line-level and do not enter the ledger.
    pub fn replay(detector: &DetectorReport, writers: &[WriterReport], sink: &SinkReport) -> Self {
        use BibcodeState::*;
        let mut ledger = Ledger::default();

        for (bibcode, classification) in &detector.outcomes {
            ledger.step(bibcode, &[(*classification).into()]);
        }
        for failure in &sink.failures {
            // Rejected lines never became work items; they stay in the sink only.
            let path: &[BibcodeState] = match failure.stage {
                Stage::Payload => continue,
                Stage::Check | Stage::Route => &[Failed],
                Stage::Extract => &[Extracting, Failed],
                Stage::Write => &[Extracting, Extracted, Failed],
            };
            ledger.step(&failure.bibcode, path);
        }
        for writer in writers {
            for (bibcode, _) in &writer.written {
                ledger.step(bibcode, &[Extracting, Extracted, Written]);
            }
        }
        ledger
    }

    fn step(&mut self, bibcode: &str, path: &[BibcodeState]) {
        if let Err(e) = self.advance(bibcode, path) {
            tracing::warn!(%bibcode, error = %e, "inconsistent stage outcomes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::models::FailureReport;
    use BibcodeState::*;

    #[test]
    fn legal_paths_reach_terminal_states() {
        assert_eq!(
            Unseen
                .advance(New)
                .and_then(|s| s.advance(Extracting))
                .and_then(|s| s.advance(Extracted))
                .and_then(|s| s.advance(Written)),
            Ok(Written)
        );
        assert_eq!(Unseen.advance(Unchanged), Ok(Unchanged));
        assert_eq!(Updated.advance(Failed), Ok(Failed));
    }

    #[test]
    fn terminal_states_cannot_be_left() {
        for terminal in [Written, Failed, Unchanged] {
            assert!(terminal.is_terminal());
            for next in [Unseen, New, Updated, Extracting, Extracted, Written, Failed] {
                assert!(terminal.advance(next).is_err());
            }
        }
    }

    #[test]
    fn skipping_extraction_is_illegal() {
        let err = New.advance(Written).unwrap_err();
        assert_eq!(err.to_string(), "illegal transition NEW -> WRITTEN");
    }

    #[test]
    fn replay_assigns_terminal_states() {
        let detector = DetectorReport {
            outcomes: vec![
                ("a".to_string(), Classification::New),
                ("b".to_string(), Classification::DifferingFullText),
                ("c".to_string(), Classification::NoChange),
            ],
            ..Default::default()
        };
        let writer = WriterReport {
            written: vec![("a".to_string(), Classification::New)],
            ..Default::default()
        };
        let sink = SinkReport {
            failures: vec![FailureReport::new(
                "b",
                Stage::Extract,
                &PipelineError::NotFound {
                    path: "/gone".to_string(),
                },
            )],
        };

        let ledger = Ledger::replay(&detector, &[writer], &sink);
        assert_eq!(ledger.state("a"), Written);
        assert_eq!(ledger.state("b"), Failed);
        assert_eq!(ledger.state("c"), Unchanged);
        assert_eq!(ledger.state("zzz"), Unseen);
        assert!(ledger.unfinished().is_empty());
        assert_eq!(ledger.counts()[&Written], 1);
    }

    #[test]
    fn rejected_lines_stay_out_of_the_ledger() {
        let detector = DetectorReport {
            outcomes: vec![("dup".to_string(), Classification::New)],
            ..Default::default()
        };
        let writer = WriterReport {
            written: vec![("dup".to_string(), Classification::New)],
            ..Default::default()
        };
        let rejected = |bibcode: &str, line: usize| {
            FailureReport::new(
                bibcode,
                Stage::Payload,
                &PipelineError::Validation {
                    line,
                    message: "missing bibcode".to_string(),
                },
            )
        };
        let sink = SinkReport {
            failures: vec![rejected("line:3", 3), rejected("dup", 4)],
        };

        let ledger = Ledger::replay(&detector, &[writer], &sink);
        assert_eq!(ledger.state("dup"), Written);
        assert_eq!(ledger.state("line:3"), Unseen);
        assert_eq!(ledger.iter().count(), 1);
        assert!(!ledger.counts().contains_key(&Failed));
    }
}
