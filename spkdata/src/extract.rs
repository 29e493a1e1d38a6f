//! Sharded bulk feature extraction and store validation.
//!
//! Extraction fans recordings out over a bounded pool. Each shard owns its
//! own store file and text indexes, so shards never share a writer:
//!
//! ```text
//! out_dir/feat.<i>.ark  feat.<i>.scp  utt2num_frames.<i>  utt2dur.<i>
//! ```
//!
//! When every shard is done the per-shard indexes are merged into
//! `feats.scp`, `utt2num_frames` and `utt2dur`.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::resolve_workers;
use crate::error::{Result, SpkDataError};
use crate::index::{merge_indexes, save_index, write_text, LocatorIndex};
use crate::loader::{FeatureExtractor, FeatureLoader};
use crate::store::StoreWriter;
use crate::types::UtteranceId;

/// One recording to extract.
#[derive(Debug, Clone)]
pub struct ExtractJob {
    pub uid: UtteranceId,
    pub source: PathBuf,
}

impl ExtractJob {
    pub fn new(uid: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            uid: uid.into(),
            source: source.into(),
        }
    }
}

/// An utterance that could not be processed, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct UttFailure {
    pub uid: UtteranceId,
    pub reason: String,
}

/// Aggregate result of [`extract_sharded`].
#[derive(Debug, Default)]
pub struct ExtractReport {
    pub locators: LocatorIndex,
    pub num_frames: BTreeMap<UtteranceId, usize>,
    pub durations: BTreeMap<UtteranceId, f64>,
    pub failures: Vec<UttFailure>,
}

#[derive(Default)]
struct ShardOutput {
    locators: LocatorIndex,
    num_frames: BTreeMap<UtteranceId, usize>,
    durations: BTreeMap<UtteranceId, f64>,
    failures: Vec<UttFailure>,
}

/// Extracts every job into `shards` private store shards under `out_dir`.
///
/// Per-utterance failures (extractor errors, non-finite features) are
/// collected into the report and never abort the batch. A failed store write
/// aborts the whole call, since the shard's remaining offsets can no longer
/// be trusted. Cancellation is checked between utterances and aborts with
/// [`SpkDataError::Cancelled`]. `progress`, when given, is incremented once
/// per processed job.
pub fn extract_sharded(
    jobs: &[ExtractJob],
    out_dir: &Path,
    shards: usize,
    extractor: &dyn FeatureExtractor,
    cancel: Option<&CancellationToken>,
    progress: Option<&AtomicUsize>,
) -> Result<ExtractReport> {
    let mut seen = HashSet::with_capacity(jobs.len());
    for job in jobs {
        if !seen.insert(job.uid.as_str()) {
            return Err(SpkDataError::DuplicateKey {
                key: job.uid.clone(),
            });
        }
    }

    let shards = shards.clamp(1, jobs.len().max(1));
    let per_shard = jobs.len().div_ceil(shards).max(1);
    info!(jobs = jobs.len(), shards, out_dir = %out_dir.display(), "extracting features");

    let pool = ThreadPoolBuilder::new()
        .num_threads(shards)
        .build()
        .map_err(|e| SpkDataError::Config(format!("worker pool: {e}")))?;

    let outputs: Result<Vec<ShardOutput>> = pool.install(|| {
        jobs.par_chunks(per_shard)
            .enumerate()
            .map(|(i, chunk)| run_shard(i, chunk, out_dir, extractor, cancel, progress))
            .collect()
    });
    let outputs = outputs?;

    let mut report = ExtractReport::default();
    let mut parts = Vec::with_capacity(outputs.len());
    for out in outputs {
        parts.push(out.locators);
        report.num_frames.extend(out.num_frames);
        report.durations.extend(out.durations);
        report.failures.extend(out.failures);
    }
    report.locators = merge_indexes(parts)?;

    save_index(&out_dir.join("feats.scp"), &report.locators)?;
    write_text(&out_dir.join("utt2num_frames"), &render(&report.num_frames))?;
    write_text(&out_dir.join("utt2dur"), &render(&report.durations))?;

    if !report.failures.is_empty() {
        warn!(failures = report.failures.len(), "some utterances failed to extract");
    }
    info!(
        extracted = report.locators.len(),
        failed = report.failures.len(),
        "extraction finished"
    );
    Ok(report)
}

fn run_shard(
    shard: usize,
    jobs: &[ExtractJob],
    out_dir: &Path,
    extractor: &dyn FeatureExtractor,
    cancel: Option<&CancellationToken>,
    progress: Option<&AtomicUsize>,
) -> Result<ShardOutput> {
    let mut writer = StoreWriter::create(out_dir.join(format!("feat.{shard}.ark")))?;
    let mut out = ShardOutput::default();

    for job in jobs {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(SpkDataError::Cancelled);
        }
        let appended = extractor
            .extract(&job.source)
            .and_then(|ex| writer.append(&job.uid, &ex.features).map(|rec| (rec, ex)));
        match appended {
            Ok((rec, ex)) => {
                out.num_frames.insert(job.uid.clone(), ex.features.nrows());
                out.durations.insert(job.uid.clone(), ex.duration_secs);
                out.locators.insert(job.uid.clone(), rec.locator);
            }
            // Later offsets in this shard would be wrong.
            Err(e) if writer.is_poisoned() => {
                warn!(shard, uid = %job.uid, error = %e, "store write failed, abandoning shard");
                return Err(e);
            }
            Err(e) => {
                debug!(uid = %job.uid, error = %e, "extraction failed");
                out.failures.push(UttFailure {
                    uid: job.uid.clone(),
                    reason: e.to_string(),
                });
            }
        }
        if let Some(p) = progress {
            p.fetch_add(1, Ordering::Relaxed);
        }
    }

    writer.finish()?;
    save_index(&out_dir.join(format!("feat.{shard}.scp")), &out.locators)?;
    write_text(&out_dir.join(format!("utt2num_frames.{shard}")), &render(&out.num_frames))?;
    write_text(&out_dir.join(format!("utt2dur.{shard}")), &render(&out.durations))?;
    info!(
        shard,
        extracted = out.locators.len(),
        failed = out.failures.len(),
        "shard done"
    );
    Ok(out)
}

fn render<V: std::fmt::Display>(map: &BTreeMap<UtteranceId, V>) -> String {
    let mut text = String::new();
    for (uid, v) in map {
        let _ = writeln!(text, "{uid} {v}");
    }
    text
}

/// Result of [`check_store`].
#[derive(Debug, Default)]
pub struct CheckReport {
    /// Utterances that read back cleanly with the common dimension.
    pub ok: usize,
    /// Dimension fixed by the first readable utterance in key order.
    pub feat_dim: Option<usize>,
    pub failures: Vec<UttFailure>,
}

/// Reads every locator in `index` on `workers` threads (zero means the
/// available parallelism) and checks that all matrices share one feature
/// dimension. Unreadable entries are reported,
/// not raised.
pub fn check_store(index: &LocatorIndex, loader: &dyn FeatureLoader, workers: usize) -> Result<CheckReport> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(resolve_workers(workers))
        .build()
        .map_err(|e| SpkDataError::Config(format!("worker pool: {e}")))?;

    let entries: Vec<_> = index.iter().collect();
    let dims: Vec<(&UtteranceId, Result<usize>)> = pool.install(|| {
        entries
            .par_iter()
            .map(|(uid, locator)| (*uid, loader.load(locator).map(|m| m.ncols())))
            .collect()
    });

    let mut report = CheckReport::default();
    for (uid, dim) in dims {
        let outcome = dim.and_then(|got| {
            let expected = *report.feat_dim.get_or_insert(got);
            if got != expected {
                return Err(SpkDataError::InconsistentFeatureDimension {
                    uid: uid.clone(),
                    expected,
                    got,
                });
            }
            Ok(())
        });
        match outcome {
            Ok(()) => report.ok += 1,
            Err(e) => report.failures.push(UttFailure {
                uid: uid.clone(),
                reason: e.to_string(),
            }),
        }
    }
    info!(
        ok = report.ok,
        failed = report.failures.len(),
        feat_dim = report.feat_dim,
        "checked feature store"
    );
    Ok(report)
}
