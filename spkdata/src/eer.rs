//! Equal error rate estimation over scored verification trials.

use crate::error::{Result, SpkDataError};
use crate::trials::parse_label;

/// A similarity score with the trial's ground truth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored {
    pub score: f64,
    pub is_target: bool,
}

impl Scored {
    pub fn new(score: f64, is_target: bool) -> Self {
        Self { score, is_target }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EerResult {
    /// Rate in `[0, 1]` where false accepts and false rejects balance.
    pub eer: f64,
    /// Scores at or above this value are accepted as targets.
    pub threshold: f64,
}

/// Estimates the equal error rate of a scored trial list.
pub trait EerEstimator {
    fn estimate(&self, scores: &[Scored]) -> Result<EerResult>;
}

/// Sweeps every distinct score as a threshold and picks the one where the
/// false-accept and false-reject rates are closest. Higher scores mean
/// "more likely the same speaker".
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepEer;

impl EerEstimator for SweepEer {
    fn estimate(&self, scores: &[Scored]) -> Result<EerResult> {
        let targets = scores.iter().filter(|s| s.is_target).count();
        let nontargets = scores.len() - targets;
        if targets == 0 || nontargets == 0 {
            return Err(SpkDataError::InvalidScores(format!(
                "need both classes, got {targets} targets and {nontargets} non-targets"
            )));
        }
        if let Some(bad) = scores.iter().find(|s| !s.score.is_finite()) {
            return Err(SpkDataError::InvalidScores(format!("non-finite score {}", bad.score)));
        }

        let mut sorted = scores.to_vec();
        sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

        let (nt, nn) = (targets as f64, nontargets as f64);
        let mut accepted_targets = 0usize;
        let mut accepted_nontargets = 0usize;
        let mut best = EerResult {
            eer: 0.5,
            threshold: f64::INFINITY,
        };
        let mut best_gap = f64::INFINITY;

        let mut i = 0;
        while i < sorted.len() {
            let threshold = sorted[i].score;
            // Ties are accepted together.
            while i < sorted.len() && sorted[i].score == threshold {
                if sorted[i].is_target {
                    accepted_targets += 1;
                } else {
                    accepted_nontargets += 1;
                }
                i += 1;
            }
            let far = accepted_nontargets as f64 / nn;
            let frr = (targets - accepted_targets) as f64 / nt;
            let gap = (far - frr).abs();
            if gap < best_gap {
                best_gap = gap;
                best = EerResult {
                    eer: (far + frr) / 2.0,
                    threshold,
                };
            }
        }
        Ok(best)
    }
}

/// Parses `<score> <target|nontarget|1|0>` lines.
pub fn parse_scores(text: &str) -> Result<Vec<Scored>> {
    let mut out = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (score, label) = match tokens.as_slice() {
            [] => continue,
            [score, label] => (*score, *label),
            _ => {
                return Err(SpkDataError::MalformedIndexEntry {
                    line: i + 1,
                    reason: format!("expected 2 tokens, got {}", tokens.len()),
                })
            }
        };
        let score: f64 = score.parse().map_err(|_| SpkDataError::MalformedIndexEntry {
            line: i + 1,
            reason: format!("bad score {score:?}"),
        })?;
        out.push(Scored::new(score, parse_label(i + 1, label)?));
    }
    Ok(out)
}
