//! Text indexes: `<id> <locator>`, `<speaker> <id>...` and `<id> <speaker>`.
//!
//! Duplicate policy: a key repeated with an identical value is accepted once,
//! which keeps merges of overlapping shard indexes idempotent. A key repeated
//! with a different value is rejected with [`SpkDataError::DuplicateKey`].

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::error::{Result, SpkDataError};
use crate::locator::Locator;
use crate::types::{SpeakerId, UtteranceId};

/// Utterance id to storage locator.
pub type LocatorIndex = BTreeMap<UtteranceId, Locator>;

/// Speaker id to its utterances, in file order.
pub type Grouping = BTreeMap<SpeakerId, Vec<UtteranceId>>;

/// Utterance id to speaker id.
pub type Utt2Spk = BTreeMap<UtteranceId, SpeakerId>;

fn insert_unique<V: PartialEq>(map: &mut BTreeMap<String, V>, key: &str, value: V) -> Result<()> {
    match map.entry(key.to_string()) {
        Entry::Vacant(e) => {
            e.insert(value);
            Ok(())
        }
        Entry::Occupied(e) if *e.get() == value => Ok(()),
        Entry::Occupied(_) => Err(SpkDataError::DuplicateKey {
            key: key.to_string(),
        }),
    }
}

/// Yields `(line_number, tokens)` for every non-blank line.
fn tokenized(text: &str) -> impl Iterator<Item = (usize, Vec<&str>)> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.split_whitespace().collect::<Vec<_>>()))
        .filter(|(_, tokens)| !tokens.is_empty())
}

fn expect_pair<'a>(line: usize, tokens: &[&'a str]) -> Result<(&'a str, &'a str)> {
    match tokens {
        [a, b] => Ok((*a, *b)),
        _ => Err(SpkDataError::MalformedIndexEntry {
            line,
            reason: format!("expected 2 tokens, got {}", tokens.len()),
        }),
    }
}

/// Parses a locator index (`feats.scp`).
pub fn parse(text: &str) -> Result<LocatorIndex> {
    let mut index = LocatorIndex::new();
    for (line, tokens) in tokenized(text) {
        let (uid, locator) = expect_pair(line, &tokens)?;
        insert_unique(&mut index, uid, Locator::parse(locator))?;
    }
    Ok(index)
}

/// Parses a speaker grouping (`spk2utt`).
///
/// A speaker line without utterances is kept with an empty list; corpus
/// construction rejects it.
pub fn parse_grouping(text: &str) -> Result<Grouping> {
    let mut grouping = Grouping::new();
    for (_, tokens) in tokenized(text) {
        let speaker = tokens[0];
        let mut seen = BTreeSet::new();
        let mut utts = Vec::with_capacity(tokens.len() - 1);
        for &uid in &tokens[1..] {
            if !seen.insert(uid) {
                return Err(SpkDataError::DuplicateKey {
                    key: uid.to_string(),
                });
            }
            utts.push(uid.to_string());
        }
        match grouping.entry(speaker.to_string()) {
            Entry::Vacant(e) => {
                e.insert(utts);
            }
            Entry::Occupied(_) => {
                return Err(SpkDataError::DuplicateKey {
                    key: speaker.to_string(),
                })
            }
        }
    }
    Ok(grouping)
}

/// Parses an utterance-to-speaker mapping (`utt2spk`).
pub fn parse_utt2spk(text: &str) -> Result<Utt2Spk> {
    let mut map = Utt2Spk::new();
    for (line, tokens) in tokenized(text) {
        let (uid, speaker) = expect_pair(line, &tokens)?;
        insert_unique(&mut map, uid, speaker.to_string())?;
    }
    Ok(map)
}

/// Checks that a grouping and an utt2spk mapping describe the same membership.
pub fn cross_check(grouping: &Grouping, utt2spk: &Utt2Spk) -> Result<()> {
    let mut grouped = 0usize;
    for (speaker, utts) in grouping {
        for uid in utts {
            grouped += 1;
            match utt2spk.get(uid) {
                Some(s) if s == speaker => {}
                Some(s) => {
                    return Err(SpkDataError::GroupingMismatch {
                        uid: uid.clone(),
                        reason: format!("grouped under {speaker:?}, utt2spk says {s:?}"),
                    })
                }
                None => {
                    return Err(SpkDataError::GroupingMismatch {
                        uid: uid.clone(),
                        reason: format!("grouped under {speaker:?}, missing from utt2spk"),
                    })
                }
            }
        }
    }
    if grouped != utt2spk.len() {
        // Counts differ, so some utt2spk entry is not grouped (or grouped twice).
        let mut members: BTreeMap<&str, usize> = BTreeMap::new();
        for utts in grouping.values() {
            for uid in utts {
                *members.entry(uid.as_str()).or_default() += 1;
            }
        }
        if let Some((uid, _)) = members.iter().find(|(_, n)| **n > 1) {
            return Err(SpkDataError::GroupingMismatch {
                uid: uid.to_string(),
                reason: "grouped under more than one speaker".into(),
            });
        }
        if let Some(uid) = utt2spk.keys().find(|u| !members.contains_key(u.as_str())) {
            return Err(SpkDataError::GroupingMismatch {
                uid: uid.clone(),
                reason: "present in utt2spk but not grouped".into(),
            });
        }
    }
    Ok(())
}

/// Inverts an utt2spk mapping into a grouping. Utterances are listed in
/// lexicographic order.
pub fn grouping_from_utt2spk(utt2spk: &Utt2Spk) -> Grouping {
    let mut grouping = Grouping::new();
    for (uid, speaker) in utt2spk {
        grouping.entry(speaker.clone()).or_default().push(uid.clone());
    }
    grouping
}

/// Derives speakers from the id naming convention `<speaker><sep><rest>`.
/// An id without the separator is its own speaker.
pub fn utt2spk_from_naming<'a>(ids: impl IntoIterator<Item = &'a str>, sep: char) -> Utt2Spk {
    ids.into_iter()
        .map(|uid| {
            let speaker = uid.split(sep).next().unwrap_or(uid);
            (uid.to_string(), speaker.to_string())
        })
        .collect()
}

/// Merges shard indexes under the duplicate policy.
pub fn merge_indexes(parts: impl IntoIterator<Item = LocatorIndex>) -> Result<LocatorIndex> {
    let mut merged = LocatorIndex::new();
    for part in parts {
        for (uid, locator) in part {
            insert_unique(&mut merged, &uid, locator)?;
        }
    }
    Ok(merged)
}

pub fn write_index(index: &LocatorIndex) -> String {
    let mut out = String::new();
    for (uid, locator) in index {
        let _ = writeln!(out, "{uid} {locator}");
    }
    out
}

pub fn write_grouping(grouping: &Grouping) -> String {
    let mut out = String::new();
    for (speaker, utts) in grouping {
        out.push_str(speaker);
        for uid in utts {
            out.push(' ');
            out.push_str(uid);
        }
        out.push('\n');
    }
    out
}

pub fn write_utt2spk(utt2spk: &Utt2Spk) -> String {
    let mut out = String::new();
    for (uid, speaker) in utt2spk {
        let _ = writeln!(out, "{uid} {speaker}");
    }
    out
}

pub(crate) fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| SpkDataError::io(path, e))
}

pub(crate) fn write_text(path: &Path, text: &str) -> Result<()> {
    fs::write(path, text).map_err(|e| SpkDataError::io(path, e))
}

pub fn load_index(path: &Path) -> Result<LocatorIndex> {
    parse(&read_text(path)?)
}

pub fn load_grouping(path: &Path) -> Result<Grouping> {
    parse_grouping(&read_text(path)?)
}

pub fn load_utt2spk(path: &Path) -> Result<Utt2Spk> {
    parse_utt2spk(&read_text(path)?)
}

pub fn save_index(path: &Path, index: &LocatorIndex) -> Result<()> {
    write_text(path, &write_index(index))
}

pub fn save_grouping(path: &Path, grouping: &Grouping) -> Result<()> {
    write_text(path, &write_grouping(grouping))
}

pub fn save_utt2spk(path: &Path, utt2spk: &Utt2Spk) -> Result<()> {
    write_text(path, &write_utt2spk(utt2spk))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_locator_index() {
        let text = "a1 data/feat.0.ark:12\nb1 data/feat.0.ark:512\n\nc1 data/c1.fm\n";
        let index = parse(text).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index["a1"], Locator::new("data/feat.0.ark", 12));
        assert_eq!(index["c1"], Locator::whole_file("data/c1.fm"));
    }

    #[test]
    fn parse_rejects_wrong_token_count() {
        let err = parse("a1 x:1\nb1\n").unwrap_err();
        assert!(matches!(err, SpkDataError::MalformedIndexEntry { line: 2, .. }));

        let err = parse("a1 x:1 extra\n").unwrap_err();
        assert!(matches!(err, SpkDataError::MalformedIndexEntry { line: 1, .. }));
    }

    #[test]
    fn parse_rejects_diverging_duplicate() {
        let err = parse("a1 x.ark:1\na1 x.ark:2\n").unwrap_err();
        assert!(matches!(err, SpkDataError::DuplicateKey { ref key } if key == "a1"));
    }

    #[test]
    fn parse_accepts_identical_duplicate() {
        let index = parse("a1 x.ark:1\na1 x.ark:1\n").unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn parse_grouping_trims_line_endings() {
        let g = parse_grouping("A a1 a2 a3\r\nB b1 b2  \n").unwrap();
        assert_eq!(g["A"], vec!["a1", "a2", "a3"]);
        assert_eq!(g["B"], vec!["b1", "b2"]);
    }

    #[test]
    fn parse_grouping_keeps_empty_speaker() {
        let g = parse_grouping("A\nB b1\n").unwrap();
        assert!(g["A"].is_empty());
    }

    #[test]
    fn parse_grouping_rejects_repeated_speaker() {
        let err = parse_grouping("A a1\nA a2\n").unwrap_err();
        assert!(matches!(err, SpkDataError::DuplicateKey { ref key } if key == "A"));
    }

    #[test]
    fn cross_check_agrees() {
        let g = parse_grouping("A a1 a2\nB b1\n").unwrap();
        let u = parse_utt2spk("a1 A\na2 A\nb1 B\n").unwrap();
        cross_check(&g, &u).unwrap();
    }

    #[test]
    fn cross_check_reports_wrong_speaker() {
        let g = parse_grouping("A a1 a2\nB b1\n").unwrap();
        let u = parse_utt2spk("a1 A\na2 B\nb1 B\n").unwrap();
        let err = cross_check(&g, &u).unwrap_err();
        assert!(matches!(err, SpkDataError::GroupingMismatch { ref uid, .. } if uid == "a2"));
    }

    #[test]
    fn cross_check_reports_ungrouped_utterance() {
        let g = parse_grouping("A a1\n").unwrap();
        let u = parse_utt2spk("a1 A\nz9 A\n").unwrap();
        let err = cross_check(&g, &u).unwrap_err();
        assert!(matches!(err, SpkDataError::GroupingMismatch { ref uid, .. } if uid == "z9"));
    }

    #[test]
    fn cross_check_reports_double_membership() {
        let g = parse_grouping("A a1\nB a1\n").unwrap();
        let u = parse_utt2spk("a1 A\n").unwrap();
        assert!(cross_check(&g, &u).is_err());
    }

    #[test]
    fn naming_convention() {
        let u = utt2spk_from_naming(["id001-abc-0001", "id002-x-1", "solo"], '-');
        assert_eq!(u["id001-abc-0001"], "id001");
        assert_eq!(u["id002-x-1"], "id002");
        assert_eq!(u["solo"], "solo");

        let g = grouping_from_utt2spk(&u);
        assert_eq!(g.len(), 3);
        assert_eq!(g["id001"], vec!["id001-abc-0001"]);
    }

    #[test]
    fn write_then_parse_keeps_entries() {
        let index = parse("b1 s.ark:9\na1 s.ark:3\n").unwrap();
        let text = write_index(&index);
        assert_eq!(text, "a1 s.ark:3\nb1 s.ark:9\n");

        let g = parse_grouping("B b1\nA a2 a1\n").unwrap();
        assert_eq!(write_grouping(&g), "A a2 a1\nB b1\n");
        assert_eq!(parse_grouping(&write_grouping(&g)).unwrap(), g);
    }

    #[test]
    fn merge_shards() {
        let a = parse("a1 s0.ark:3\n").unwrap();
        let b = parse("b1 s1.ark:3\na1 s0.ark:3\n").unwrap();
        let merged = merge_indexes([a.clone(), b]).unwrap();
        assert_eq!(merged.len(), 2);

        let c = parse("a1 s2.ark:3\n").unwrap();
        assert!(merge_indexes([a, c]).is_err());
    }
}
