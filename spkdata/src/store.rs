//! Append-only binary matrix store.
//!
//! A store file is a sequence of self-describing records:
//!
//! ```text
//! [4B magic "SPKM"] [4B keyLen] [keyLen bytes key]
//! [4B format tag "FM32"] [4B frames] [4B featDim]
//! [frames x featDim x 4B float32 payload, row-major]
//! ```
//!
//! All multi-byte values are little-endian. Locators written to the companion
//! text index point at the first payload byte. The shape block (tag, frames,
//! featDim) always occupies the [`SHAPE_HEADER_LEN`] bytes directly before the
//! payload, so a reader positioned by a locator never needs to know the key
//! length.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ndarray::Array2;

use crate::error::{Result, SpkDataError};
use crate::index::{save_index, LocatorIndex};
use crate::locator::Locator;
use crate::types::FeatureMatrix;

const RECORD_MAGIC: [u8; 4] = *b"SPKM";
const FORMAT_F32: [u8; 4] = *b"FM32";

/// Bytes between the end of the key and the payload: tag, frames, featDim.
pub const SHAPE_HEADER_LEN: u64 = 12;

/// Offsets of a record produced by [`StoreWriter::append`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendedRecord {
    /// First byte of the record (the magic).
    pub header_offset: u64,
    /// First byte of the float payload.
    pub payload_offset: u64,
    /// Locator to store in the companion index; points at the payload.
    pub locator: Locator,
}

/// Sequential writer for one store file.
///
/// The companion index is only valid after [`StoreWriter::finish`] returns.
pub struct StoreWriter {
    path: PathBuf,
    out: BufWriter<File>,
    pos: u64,
    // Set once a write fails; the file may then hold a partial record.
    poisoned: bool,
}

impl StoreWriter {
    /// Creates (or truncates) a store file.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path).map_err(|e| SpkDataError::io(&path, e))?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
            pos: 0,
            poisoned: false,
        })
    }

    /// Opens a store file for appending after its existing records.
    pub fn open_append(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SpkDataError::io(&path, e))?;
        let pos = file
            .metadata()
            .map_err(|e| SpkDataError::io(&path, e))?
            .len();
        Ok(Self {
            path,
            out: BufWriter::new(file),
            pos,
            poisoned: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current write cursor, i.e. the header offset of the next record.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// True once a write has failed. A poisoned writer refuses further
    /// records because the file cursor no longer matches [`Self::position`].
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Serializes `matrix` under `key` at the write cursor.
    ///
    /// Validation errors ([`SpkDataError::NonFiniteValue`], oversized shapes)
    /// leave the writer usable. An I/O error poisons it.
    pub fn append(&mut self, key: &str, matrix: &FeatureMatrix) -> Result<AppendedRecord> {
        if self.poisoned {
            return Err(SpkDataError::io(
                &self.path,
                std::io::Error::other("store writer is poisoned by an earlier write failure"),
            ));
        }
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(SpkDataError::NonFiniteValue {
                key: key.to_string(),
            });
        }
        let (frames, dim) = matrix.dim();
        let too_large = |what: &str| SpkDataError::StoreCorrupt {
            path: self.path.clone(),
            offset: self.pos,
            reason: format!("{what} does not fit in 32 bits"),
        };
        let key_len = u32::try_from(key.len()).map_err(|_| too_large("key length"))?;
        let frames32 = u32::try_from(frames).map_err(|_| too_large("frame count"))?;
        let dim32 = u32::try_from(dim).map_err(|_| too_large("feature dimension"))?;

        let header_offset = self.pos;
        let mut header = Vec::with_capacity(8 + key.len() + SHAPE_HEADER_LEN as usize);
        header.extend_from_slice(&RECORD_MAGIC);
        header.extend_from_slice(&key_len.to_le_bytes());
        header.extend_from_slice(key.as_bytes());
        header.extend_from_slice(&FORMAT_F32);
        header.extend_from_slice(&frames32.to_le_bytes());
        header.extend_from_slice(&dim32.to_le_bytes());

        let written = self.out.write_all(&header).and_then(|()| {
            matrix
                .iter()
                .try_for_each(|v| self.out.write_all(&v.to_le_bytes()))
        });
        if let Err(e) = written {
            self.poisoned = true;
            return Err(SpkDataError::io(&self.path, e));
        }

        let payload_offset = header_offset + header.len() as u64;
        self.pos = payload_offset + (frames * dim * 4) as u64;

        Ok(AppendedRecord {
            header_offset,
            payload_offset,
            locator: Locator::new(self.path.clone(), payload_offset),
        })
    }

    /// Flushes buffered records and syncs the file to disk.
    pub fn finish(self) -> Result<PathBuf> {
        let path = self.path;
        if self.poisoned {
            return Err(SpkDataError::io(
                &path,
                std::io::Error::other("store holds a partial record"),
            ));
        }
        let file = self
            .out
            .into_inner()
            .map_err(|e| SpkDataError::io(&path, e.into_error()))?;
        file.sync_all().map_err(|e| SpkDataError::io(&path, e))?;
        Ok(path)
    }
}

/// A record returned by [`StoreReader::records`].
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub key: String,
    pub locator: Locator,
    pub matrix: FeatureMatrix,
}

/// Random-access reader over one store file.
pub struct StoreReader {
    path: PathBuf,
    file: BufReader<File>,
    len: u64,
}

impl StoreReader {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| SpkDataError::io(&path, e))?;
        let len = file
            .metadata()
            .map_err(|e| SpkDataError::io(&path, e))?
            .len();
        Ok(Self {
            path,
            file: BufReader::new(file),
            len,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn corrupt(&self, offset: u64, reason: impl Into<String>) -> SpkDataError {
        SpkDataError::StoreCorrupt {
            path: self.path.clone(),
            offset,
            reason: reason.into(),
        }
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        if offset + buf.len() as u64 > self.len {
            return Err(self.corrupt(offset, "record truncated"));
        }
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| SpkDataError::io(&self.path, e))?;
        self.file
            .read_exact(buf)
            .map_err(|e| SpkDataError::io(&self.path, e))
    }

    fn read_u32_at(&mut self, offset: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact_at(offset, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Reads the matrix whose payload starts at `offset`.
    pub fn read_at(&mut self, offset: u64) -> Result<FeatureMatrix> {
        if offset > self.len {
            return Err(SpkDataError::LocatorOutOfRange {
                path: self.path.clone(),
                offset,
                len: self.len,
            });
        }
        if offset < SHAPE_HEADER_LEN {
            return Err(self.corrupt(offset, "offset precedes the shape header"));
        }

        let shape_at = offset - SHAPE_HEADER_LEN;
        let mut tag = [0u8; 4];
        self.read_exact_at(shape_at, &mut tag)?;
        if tag != FORMAT_F32 {
            return Err(self.corrupt(offset, format!("unknown format tag {tag:?}")));
        }
        let frames = self.read_u32_at(shape_at + 4)? as usize;
        let dim = self.read_u32_at(shape_at + 8)? as usize;

        let n_bytes = frames
            .checked_mul(dim)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| self.corrupt(offset, format!("shape {frames}x{dim} overflows")))?;
        // The shape comes from disk; size it against the file before allocating.
        let fits = u64::try_from(n_bytes)
            .ok()
            .and_then(|n| offset.checked_add(n))
            .is_some_and(|end| end <= self.len);
        if !fits {
            return Err(self.corrupt(offset, format!("shape {frames}x{dim} runs past end of file")));
        }
        let mut raw = vec![0u8; n_bytes];
        self.read_exact_at(offset, &mut raw)?;

        let mut data = Vec::with_capacity(frames * dim);
        for chunk in raw.chunks_exact(4) {
            let v = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            if !v.is_finite() {
                return Err(self.corrupt(offset, "payload holds a non-finite value"));
            }
            data.push(v);
        }
        Array2::from_shape_vec((frames, dim), data).map_err(|e| self.corrupt(offset, e.to_string()))
    }

    /// Parses the record header at `header_offset`, returning the key and the
    /// payload offset.
    fn read_header(&mut self, header_offset: u64) -> Result<(String, u64)> {
        let mut magic = [0u8; 4];
        self.read_exact_at(header_offset, &mut magic)?;
        if magic != RECORD_MAGIC {
            return Err(self.corrupt(header_offset, format!("invalid magic {magic:?}")));
        }
        let key_len = self.read_u32_at(header_offset + 4)? as u64;
        if header_offset + 8 + key_len + SHAPE_HEADER_LEN > self.len {
            return Err(self.corrupt(header_offset, format!("key length {key_len} past end of file")));
        }
        let mut key = vec![0u8; key_len as usize];
        self.read_exact_at(header_offset + 8, &mut key)?;
        let key = String::from_utf8(key).map_err(|e| self.corrupt(header_offset, e.to_string()))?;
        Ok((key, header_offset + 8 + key_len + SHAPE_HEADER_LEN))
    }

    /// Reads the first record of the file (store-per-file mode).
    pub fn read_first(&mut self) -> Result<(String, FeatureMatrix)> {
        let (key, payload) = self.read_header(0)?;
        let matrix = self.read_at(payload)?;
        Ok((key, matrix))
    }

    /// Iterates every record from the start of the file.
    pub fn records(&mut self) -> Records<'_> {
        Records {
            reader: self,
            next: 0,
            failed: false,
        }
    }
}

/// Sequential iterator over a store's records. Stops after the first error.
pub struct Records<'a> {
    reader: &'a mut StoreReader,
    next: u64,
    failed: bool,
}

impl Iterator for Records<'_> {
    type Item = Result<StoredRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next >= self.reader.len {
            return None;
        }
        let result = self.reader.read_header(self.next).and_then(|(key, payload)| {
            let matrix = self.reader.read_at(payload)?;
            self.next = payload + (matrix.len() * 4) as u64;
            Ok(StoredRecord {
                key,
                locator: Locator::new(self.reader.path.clone(), payload),
                matrix,
            })
        });
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

/// Reads the matrix a locator points at.
pub fn read_matrix(locator: &Locator) -> Result<FeatureMatrix> {
    let mut reader = StoreReader::open(&locator.path)?;
    match locator.offset {
        Some(offset) => reader.read_at(offset),
        None => reader.read_first().map(|(_, m)| m),
    }
}

/// Writes `items` to a fresh store, finishes it, then writes the companion
/// index. Returns the index that was written.
pub fn write_matrices<'a, I>(store_path: &Path, index_path: &Path, items: I) -> Result<LocatorIndex>
where
    I: IntoIterator<Item = (&'a str, &'a FeatureMatrix)>,
{
    let mut writer = StoreWriter::create(store_path)?;
    let mut index = BTreeMap::new();
    for (key, matrix) in items {
        if index.contains_key(key) {
            return Err(SpkDataError::DuplicateKey {
                key: key.to_string(),
            });
        }
        let rec = writer.append(key, matrix)?;
        index.insert(key.to_string(), rec.locator);
    }
    writer.finish()?;
    save_index(index_path, &index)?;
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample(frames: usize, dim: usize, seed: f32) -> FeatureMatrix {
        Array2::from_shape_fn((frames, dim), |(i, j)| seed + i as f32 * 0.5 - j as f32 * 0.25)
    }

    #[test]
    fn append_returns_payload_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feat.ark");
        let mut w = StoreWriter::create(&path).unwrap();

        let rec = w.append("utt-1", &sample(3, 2, 1.0)).unwrap();
        assert_eq!(rec.header_offset, 0);
        // magic + keyLen + key + shape header
        assert_eq!(rec.payload_offset, 4 + 4 + 5 + SHAPE_HEADER_LEN);
        assert_eq!(rec.locator.offset, Some(rec.payload_offset));

        let rec2 = w.append("u2", &sample(1, 2, 0.0)).unwrap();
        assert_eq!(rec2.header_offset, rec.payload_offset + 3 * 2 * 4);
        assert_eq!(w.position(), rec2.payload_offset + 2 * 4);
        w.finish().unwrap();
    }

    #[test]
    fn read_back_bit_for_bit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feat.ark");
        let a = sample(7, 5, -3.25);
        let b = array![[f32::MIN_POSITIVE, -0.0, 1e-30], [f32::MAX, f32::MIN, 0.1]];

        let mut w = StoreWriter::create(&path).unwrap();
        let la = w.append("a", &a).unwrap().locator;
        let lb = w.append("b-with-a-longer-key", &b).unwrap().locator;
        w.finish().unwrap();

        let ra = read_matrix(&la).unwrap();
        let rb = read_matrix(&lb).unwrap();
        assert_eq!(ra.dim(), (7, 5));
        let bits = |m: &FeatureMatrix| m.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&ra), bits(&a));
        assert_eq!(bits(&rb), bits(&b));
    }

    #[test]
    fn append_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feat.ark");
        let mut w = StoreWriter::create(&path).unwrap();
        w.append("a", &sample(2, 3, 0.0)).unwrap();
        w.finish().unwrap();

        let mut w = StoreWriter::open_append(&path).unwrap();
        let start = w.position();
        let rec = w.append("b", &sample(4, 3, 9.0)).unwrap();
        assert_eq!(rec.header_offset, start);
        w.finish().unwrap();

        let mut r = StoreReader::open(&path).unwrap();
        let keys: Vec<String> = r.records().map(|rec| rec.unwrap().key).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(r.read_at(rec.payload_offset).unwrap(), sample(4, 3, 9.0));
    }

    #[test]
    fn whole_file_locator_reads_first_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a1.fm");
        let mut w = StoreWriter::create(&path).unwrap();
        w.append("a1", &sample(4, 2, 2.0)).unwrap();
        w.finish().unwrap();

        let m = read_matrix(&Locator::whole_file(&path)).unwrap();
        assert_eq!(m, sample(4, 2, 2.0));
    }

    #[test]
    fn out_of_range_locator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feat.ark");
        let mut w = StoreWriter::create(&path).unwrap();
        w.append("a", &sample(1, 1, 0.0)).unwrap();
        w.finish().unwrap();

        let err = read_matrix(&Locator::new(&path, 10_000)).unwrap_err();
        assert!(matches!(err, SpkDataError::LocatorOutOfRange { offset: 10_000, .. }));
    }

    #[test]
    fn misaligned_locator_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feat.ark");
        let mut w = StoreWriter::create(&path).unwrap();
        let rec = w.append("a", &sample(2, 2, 0.0)).unwrap();
        w.finish().unwrap();

        let err = read_matrix(&Locator::new(&path, rec.payload_offset - 1)).unwrap_err();
        assert!(matches!(err, SpkDataError::StoreCorrupt { .. }));
        let err = read_matrix(&Locator::new(&path, 3)).unwrap_err();
        assert!(matches!(err, SpkDataError::StoreCorrupt { .. }));
    }

    #[test]
    fn truncated_payload_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feat.ark");
        let mut w = StoreWriter::create(&path).unwrap();
        let rec = w.append("a", &sample(8, 4, 0.0)).unwrap();
        w.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 6]).unwrap();
        let err = read_matrix(&rec.locator).unwrap_err();
        assert!(matches!(err, SpkDataError::StoreCorrupt { .. }));
    }

    #[test]
    fn huge_shape_is_corrupt_not_allocated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feat.ark");
        let mut w = StoreWriter::create(&path).unwrap();
        let rec = w.append("a", &sample(2, 2, 0.0)).unwrap();
        w.finish().unwrap();

        let mut f = OpenOptions::new().write(true).open(&path).unwrap();
        f.seek(SeekFrom::Start(rec.payload_offset - 8)).unwrap();
        f.write_all(&0xFFFF_FFFFu32.to_le_bytes()).unwrap();
        f.write_all(&0x0010_0000u32.to_le_bytes()).unwrap();
        drop(f);

        let err = read_matrix(&rec.locator).unwrap_err();
        assert!(matches!(err, SpkDataError::StoreCorrupt { .. }), "{err}");

        let mut r = StoreReader::open(&path).unwrap();
        let mut records = r.records();
        assert!(matches!(records.next(), Some(Err(SpkDataError::StoreCorrupt { .. }))));
        assert!(records.next().is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_write_poisons_writer() {
        let mut w = StoreWriter::create("/dev/full").unwrap();
        // Larger than the write buffer, so the payload hits the device.
        let err = w.append("big", &sample(4096, 4, 0.0)).unwrap_err();
        assert!(matches!(err, SpkDataError::Io { .. }));
        assert!(w.is_poisoned());
        assert_eq!(w.position(), 0);

        let err = w.append("small", &sample(1, 1, 0.0)).unwrap_err();
        assert!(matches!(err, SpkDataError::Io { .. }));
        assert!(w.finish().is_err());
    }

    #[test]
    fn non_finite_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = StoreWriter::create(dir.path().join("feat.ark")).unwrap();
        let err = w.append("nan", &array![[1.0, f32::NAN]]).unwrap_err();
        assert!(matches!(err, SpkDataError::NonFiniteValue { .. }));
        assert_eq!(w.position(), 0);
        assert!(!w.is_poisoned());
        assert_eq!(w.append("ok", &sample(1, 1, 0.0)).unwrap().header_offset, 0);
    }

    #[test]
    fn write_matrices_writes_index_after_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("xvector.ark");
        let scp = dir.path().join("xvector.scp");
        let a = sample(1, 8, 0.0);
        let b = sample(1, 8, 1.0);

        let index = write_matrices(&store, &scp, [("u1", &a), ("u2", &b)]).unwrap();
        let loaded = crate::index::load_index(&scp).unwrap();
        assert_eq!(loaded, index);
        assert_eq!(read_matrix(&loaded["u2"]).unwrap(), b);

        let err = write_matrices(&store, &scp, [("u1", &a), ("u1", &b)]).unwrap_err();
        assert!(matches!(err, SpkDataError::DuplicateKey { .. }));
    }
}
