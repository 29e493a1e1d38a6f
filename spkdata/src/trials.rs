//! Verification trial lists and the target-preserving partitioner.
//!
//! A [`TrialList`] is always canonical: every target pair precedes every
//! non-target pair, relative order preserved within each group, and the
//! number of targets is tracked alongside the pairs.

use std::fmt::Write as _;
use std::path::Path;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

use crate::corpus::SpeakerCorpus;
use crate::error::{Result, SpkDataError};
use crate::index::{read_text, write_text};
use crate::types::{SpeakerLabel, UtteranceId};

/// Two utterances and whether they share a speaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialPair {
    pub uid_a: UtteranceId,
    pub uid_b: UtteranceId,
    pub is_target: bool,
}

impl TrialPair {
    pub fn new(uid_a: impl Into<String>, uid_b: impl Into<String>, is_target: bool) -> Self {
        Self {
            uid_a: uid_a.into(),
            uid_b: uid_b.into(),
            is_target,
        }
    }
}

/// A canonical trial list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrialList {
    pairs: Vec<TrialPair>,
    num_positive: usize,
}

impl TrialList {
    /// Canonicalizes `pairs` with a stable targets-first sort.
    pub fn new(mut pairs: Vec<TrialPair>) -> Self {
        pairs.sort_by_key(|p| !p.is_target);
        let num_positive = pairs.iter().take_while(|p| p.is_target).count();
        Self {
            pairs,
            num_positive,
        }
    }

    pub fn pairs(&self) -> &[TrialPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn num_positive(&self) -> usize {
        self.num_positive
    }

    pub fn num_negative(&self) -> usize {
        self.pairs.len() - self.num_positive
    }

    pub fn positives(&self) -> &[TrialPair] {
        &self.pairs[..self.num_positive]
    }

    pub fn negatives(&self) -> &[TrialPair] {
        &self.pairs[self.num_positive..]
    }

    /// Reduces the list to exactly `num` pairs with about `fraction` targets.
    ///
    /// When `fraction * num` exceeds the available targets, every target is
    /// kept and the rest is filled with shuffled non-targets. Otherwise
    /// `round(fraction * num)` shuffled targets and shuffled non-targets fill
    /// the result; if non-targets run short, extra targets make up the
    /// difference. Targets always precede non-targets in the result.
    pub fn partition<R: Rng + ?Sized>(&self, num: usize, fraction: f64, rng: &mut R) -> Result<TrialList> {
        if num > self.len() {
            return Err(SpkDataError::InsufficientTrials {
                requested: num,
                available: self.len(),
            });
        }

        let want = fraction * num as f64;
        let (positives, negatives) = if want > self.num_positive as f64 {
            let positives = self.positives().to_vec();
            let negatives = sample_shuffled(self.negatives(), num - self.num_positive, rng);
            (positives, negatives)
        } else {
            let k = (want.round() as usize).max(num.saturating_sub(self.num_negative()));
            let positives = sample_shuffled(self.positives(), k, rng);
            let negatives = sample_shuffled(self.negatives(), num - k, rng);
            (positives, negatives)
        };

        let num_positive = positives.len();
        let mut pairs = positives;
        pairs.extend(negatives);
        let out = TrialList {
            pairs,
            num_positive,
        };

        debug_assert_eq!(out.len(), num, "partition length");
        debug_assert_eq!(
            out.pairs.iter().filter(|p| p.is_target).count(),
            out.num_positive,
            "partition positive count"
        );
        info!(
            pairs = out.len(),
            positives = out.num_positive,
            "partitioned trials"
        );
        Ok(out)
    }
}

fn sample_shuffled<R: Rng + ?Sized>(pool: &[TrialPair], k: usize, rng: &mut R) -> Vec<TrialPair> {
    let mut idx: Vec<usize> = (0..pool.len()).collect();
    idx.shuffle(rng);
    idx.truncate(k);
    idx.into_iter().map(|i| pool[i].clone()).collect()
}

pub(crate) fn parse_label(line: usize, label: &str) -> Result<bool> {
    match label {
        "target" | "1" => Ok(true),
        "nontarget" | "0" => Ok(false),
        _ => Err(SpkDataError::InvalidTrialLabel {
            line,
            label: label.to_string(),
        }),
    }
}

/// Parses `<uid-a> <uid-b> <target|nontarget|1|0>` lines.
pub fn parse_trials(text: &str) -> Result<TrialList> {
    let mut pairs = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            [] => continue,
            [a, b, label] => pairs.push(TrialPair::new(*a, *b, parse_label(i + 1, label)?)),
            _ => {
                return Err(SpkDataError::MalformedIndexEntry {
                    line: i + 1,
                    reason: format!("expected 3 tokens, got {}", tokens.len()),
                })
            }
        }
    }
    let list = TrialList::new(pairs);
    info!(
        pairs = list.len(),
        positives = list.num_positive(),
        "loaded trials"
    );
    Ok(list)
}

/// Renders a trial list in canonical order.
pub fn write_trials(list: &TrialList) -> String {
    let mut out = String::new();
    for p in list.pairs() {
        let label = if p.is_target { "target" } else { "nontarget" };
        let _ = writeln!(out, "{} {} {}", p.uid_a, p.uid_b, label);
    }
    out
}

pub fn load_trials(path: &Path) -> Result<TrialList> {
    parse_trials(&read_text(path)?)
}

pub fn save_trials(path: &Path, list: &TrialList) -> Result<()> {
    write_text(path, &write_trials(list))
}

/// Builds training trials from the corpus' training pools.
///
/// For every speaker, `per_speaker` times: draw an evaluation utterance, pair
/// it with a different utterance of the same speaker (target), and with one
/// random utterance from each of `negatives_per_target` distinct other
/// speakers (non-target). Speakers with a single training utterance only
/// yield non-target pairs.
pub fn generate_trials<R: Rng + ?Sized>(
    corpus: &SpeakerCorpus,
    per_speaker: usize,
    negatives_per_target: usize,
    rng: &mut R,
) -> TrialList {
    let n = corpus.num_speakers();
    let mut pairs = Vec::new();
    for label in 0..n {
        let utts = corpus.train_utterances(label);
        if utts.len() < 2 {
            debug!(speaker = corpus.speaker_of_label(label), "single utterance, no target trials");
        }
        let mut others: Vec<usize> = (0..n).filter(|&l| l != label).collect();
        for _ in 0..per_speaker {
            let e = rng.gen_range(0..utts.len());
            let eval = &utts[e];
            if utts.len() > 1 {
                // Skip over the evaluation index to draw a distinct partner.
                let mut p = rng.gen_range(0..utts.len() - 1);
                if p >= e {
                    p += 1;
                }
                pairs.push(TrialPair::new(eval.clone(), utts[p].clone(), true));
            }

            others.shuffle(rng);
            for &other in others.iter().take(negatives_per_target) {
                let pool = corpus.train_utterances(other);
                let partner = &pool[rng.gen_range(0..pool.len())];
                pairs.push(TrialPair::new(eval.clone(), partner.clone(), false));
            }
        }
    }
    let list = TrialList::new(pairs);
    info!(
        pairs = list.len(),
        positives = list.num_positive(),
        "generated training trials"
    );
    list
}

/// One evaluation utterance scored against an enrollment set.
///
/// `labels[0]` is the evaluation speaker; `labels[i + 1]` is the speaker of
/// `enroll[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialTuple {
    pub eval: UtteranceId,
    pub enroll: Vec<UtteranceId>,
    pub is_target: bool,
    pub labels: Vec<SpeakerLabel>,
}

/// Builds enrollment tuples from the corpus' training pools.
///
/// Mirrors [`generate_trials`] with `num_enroll` enrollment utterances per
/// trial instead of one partner. Enrollment members are drawn with
/// replacement: for a target tuple from the evaluation speaker's other
/// utterances, for each non-target tuple from one of `negatives_per_target`
/// distinct other speakers. Target tuples come first in the result.
pub fn generate_tuples<R: Rng + ?Sized>(
    corpus: &SpeakerCorpus,
    per_speaker: usize,
    num_enroll: usize,
    negatives_per_target: usize,
    rng: &mut R,
) -> Result<Vec<TrialTuple>> {
    if num_enroll == 0 {
        return Err(SpkDataError::Config("num_enroll must be positive".into()));
    }
    let n = corpus.num_speakers();
    let mut targets = Vec::new();
    let mut nontargets = Vec::new();
    for label in 0..n {
        let utts = corpus.train_utterances(label);
        let mut others: Vec<usize> = (0..n).filter(|&l| l != label).collect();
        for _ in 0..per_speaker {
            let e = rng.gen_range(0..utts.len());
            let eval = &utts[e];
            if utts.len() > 1 {
                let enroll = (0..num_enroll)
                    .map(|_| {
                        let mut p = rng.gen_range(0..utts.len() - 1);
                        if p >= e {
                            p += 1;
                        }
                        utts[p].clone()
                    })
                    .collect();
                targets.push(TrialTuple {
                    eval: eval.clone(),
                    enroll,
                    is_target: true,
                    labels: vec![label; num_enroll + 1],
                });
            }

            others.shuffle(rng);
            for &other in others.iter().take(negatives_per_target) {
                let pool = corpus.train_utterances(other);
                let enroll = (0..num_enroll)
                    .map(|_| pool[rng.gen_range(0..pool.len())].clone())
                    .collect();
                let mut labels = vec![other; num_enroll + 1];
                labels[0] = label;
                nontargets.push(TrialTuple {
                    eval: eval.clone(),
                    enroll,
                    is_target: false,
                    labels,
                });
            }
        }
    }
    info!(
        targets = targets.len(),
        nontargets = nontargets.len(),
        num_enroll,
        "generated training tuples"
    );
    targets.append(&mut nontargets);
    Ok(targets)
}

/// Renders tuples as `<eval> <enroll>... <1|0> <label>...`, one per line.
pub fn write_tuples(tuples: &[TrialTuple]) -> String {
    let mut out = String::new();
    for t in tuples {
        out.push_str(&t.eval);
        for uid in &t.enroll {
            out.push(' ');
            out.push_str(uid);
        }
        let _ = write!(out, " {}", u8::from(t.is_target));
        for label in &t.labels {
            let _ = write!(out, " {label}");
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::tests::{fixture, synthetic_loader};
    use crate::corpus::CorpusBuilder;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn list(targets: usize, nontargets: usize) -> TrialList {
        let mut pairs = Vec::new();
        for i in 0..nontargets {
            pairs.push(TrialPair::new(format!("n{i}a"), format!("n{i}b"), false));
        }
        for i in 0..targets {
            pairs.push(TrialPair::new(format!("t{i}a"), format!("t{i}b"), true));
        }
        TrialList::new(pairs)
    }

    fn is_canonical(l: &TrialList) -> bool {
        let first_neg = l.pairs().iter().position(|p| !p.is_target).unwrap_or(l.len());
        l.pairs()[first_neg..].iter().all(|p| !p.is_target)
    }

    #[test]
    fn canonical_order_is_stable() {
        let l = TrialList::new(vec![
            TrialPair::new("x", "y", false),
            TrialPair::new("a", "b", true),
            TrialPair::new("p", "q", false),
            TrialPair::new("c", "d", true),
        ]);
        let ids: Vec<&str> = l.pairs().iter().map(|p| p.uid_a.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "x", "p"]);
        assert_eq!(l.num_positive(), 2);
    }

    #[test]
    fn partition_scenario() {
        let trials = list(3, 7);
        let mut rng = StdRng::seed_from_u64(0);
        let out = trials.partition(5, 0.3, &mut rng).unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(out.num_positive(), 2);
        assert!(is_canonical(&out));
        assert_eq!(out.positives().len(), 2);
        assert!(out.positives().iter().all(|p| p.is_target));
    }

    #[test]
    fn partition_keeps_all_targets_when_scarce() {
        let trials = list(2, 8);
        let mut rng = StdRng::seed_from_u64(3);
        let out = trials.partition(10, 0.3, &mut rng).unwrap();
        assert_eq!(out.len(), 10);
        assert_eq!(out.num_positive(), 2);
        assert_eq!(out.positives(), trials.positives());
    }

    #[test]
    fn partition_tops_up_targets_when_nontargets_are_scarce() {
        let trials = list(10, 1);
        let mut rng = StdRng::seed_from_u64(3);
        let out = trials.partition(5, 0.3, &mut rng).unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(out.num_positive(), 4);
        assert!(is_canonical(&out));
    }

    #[test]
    fn partition_rejects_oversized_request() {
        let trials = list(1, 2);
        let mut rng = StdRng::seed_from_u64(0);
        let err = trials.partition(4, 0.3, &mut rng).unwrap_err();
        assert!(matches!(
            err,
            SpkDataError::InsufficientTrials { requested: 4, available: 3 }
        ));
    }

    #[test]
    fn partition_length_and_ratio_hold_for_every_size() {
        for (targets, nontargets) in [(3, 7), (0, 12), (12, 0), (5, 40), (40, 5)] {
            let trials = list(targets, nontargets);
            for n in 0..=trials.len() {
                let mut rng = StdRng::seed_from_u64(n as u64);
                let out = trials.partition(n, 0.3, &mut rng).unwrap();
                assert_eq!(out.len(), n);
                assert!(is_canonical(&out));
                let counted = out.pairs().iter().filter(|p| p.is_target).count();
                assert_eq!(counted, out.num_positive());

                let want = 0.3 * n as f64;
                if want > targets as f64 {
                    assert_eq!(counted, targets);
                } else {
                    let rounded = want.round() as usize;
                    assert_eq!(counted, rounded.max(n.saturating_sub(nontargets)));
                }
            }
        }
    }

    #[test]
    fn partition_can_be_repeated() {
        let trials = list(20, 80);
        let mut rng = StdRng::seed_from_u64(1);
        let once = trials.partition(50, 0.3, &mut rng).unwrap();
        let twice = once.partition(20, 0.3, &mut rng).unwrap();
        assert_eq!(twice.len(), 20);
        assert_eq!(twice.num_positive(), 6);
    }

    #[test]
    fn parse_trial_labels() {
        let l = parse_trials("a b nontarget\nc d target\n\ne f 1\ng h 0\n").unwrap();
        assert_eq!(l.len(), 4);
        assert_eq!(l.num_positive(), 2);
        assert_eq!(l.pairs()[0], TrialPair::new("c", "d", true));
        assert_eq!(l.pairs()[1], TrialPair::new("e", "f", true));
        assert_eq!(l.pairs()[2], TrialPair::new("a", "b", false));
    }

    #[test]
    fn parse_trials_rejects_bad_lines() {
        assert!(matches!(
            parse_trials("a b maybe\n"),
            Err(SpkDataError::InvalidTrialLabel { line: 1, .. })
        ));
        assert!(matches!(
            parse_trials("a b\n"),
            Err(SpkDataError::MalformedIndexEntry { line: 1, .. })
        ));
    }

    #[test]
    fn write_then_parse() {
        let l = list(2, 3);
        assert_eq!(parse_trials(&write_trials(&l)).unwrap(), l);
    }

    #[test]
    fn generated_tuples_carry_member_labels() {
        let (index, g, u) = fixture("A a1 a2 a3\nB b1 b2\nC c1\n", 10);
        let mut rng = StdRng::seed_from_u64(9);
        let (corpus, _) = CorpusBuilder::new(&index, &g, &u)
            .loader(synthetic_loader())
            .build(&mut rng)
            .unwrap();

        let tuples = generate_tuples(&corpus, 3, 4, 1, &mut rng).unwrap();
        // A and B yield 3 target tuples each, C none; every draw adds one non-target.
        assert_eq!(tuples.iter().filter(|t| t.is_target).count(), 6);
        assert_eq!(tuples.len(), 6 + 9);
        assert!(tuples[..6].iter().all(|t| t.is_target));
        for t in &tuples {
            assert_eq!(t.enroll.len(), 4);
            assert_eq!(t.labels.len(), 5);
            assert_eq!(corpus.label_of(&corpus.utt2spk()[&t.eval]), Some(t.labels[0]));
            for (uid, label) in t.enroll.iter().zip(&t.labels[1..]) {
                assert_eq!(corpus.label_of(&corpus.utt2spk()[uid]), Some(*label));
                assert_eq!(*label == t.labels[0], t.is_target);
                assert_ne!(uid, &t.eval);
            }
        }
    }

    #[test]
    fn tuple_lines() {
        let t = TrialTuple {
            eval: "a1".into(),
            enroll: vec!["b1".into(), "b2".into()],
            is_target: false,
            labels: vec![0, 1, 1],
        };
        assert_eq!(write_tuples(&[t]), "a1 b1 b2 0 0 1 1\n");
    }

    #[test]
    fn zero_enrollment_is_rejected() {
        let (index, g, u) = fixture("A a1 a2\n", 10);
        let mut rng = StdRng::seed_from_u64(0);
        let (corpus, _) = CorpusBuilder::new(&index, &g, &u)
            .loader(synthetic_loader())
            .build(&mut rng)
            .unwrap();
        assert!(matches!(
            generate_tuples(&corpus, 1, 0, 1, &mut rng),
            Err(SpkDataError::Config(_))
        ));
    }

    #[test]
    fn generated_trials_respect_membership() {
        let (index, g, u) = fixture("A a1 a2 a3\nB b1 b2\nC c1\n", 10);
        let mut rng = StdRng::seed_from_u64(4);
        let (corpus, _) = CorpusBuilder::new(&index, &g, &u)
            .loader(synthetic_loader())
            .build(&mut rng)
            .unwrap();

        let trials = generate_trials(&corpus, 4, 2, &mut rng);
        // A and B yield 4 targets each, C none; every draw yields 2 non-targets.
        assert_eq!(trials.num_positive(), 8);
        assert_eq!(trials.num_negative(), 3 * 4 * 2);
        for p in trials.pairs() {
            let sa = &corpus.utt2spk()[&p.uid_a];
            let sb = &corpus.utt2spk()[&p.uid_b];
            assert_eq!(sa == sb, p.is_target);
            assert_ne!(p.uid_a, p.uid_b);
        }
    }
}
