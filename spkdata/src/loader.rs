use std::path::Path;

use crate::error::Result;
use crate::locator::Locator;
use crate::store::read_matrix;
use crate::types::FeatureMatrix;

/// Loads the feature matrix a locator points at.
///
/// Implementations must be safe for concurrent use; the corpus calls the
/// loader from pool threads during eager builds and from sampling workers in
/// lazy mode.
pub trait FeatureLoader: Send + Sync {
    fn load(&self, locator: &Locator) -> Result<FeatureMatrix>;
}

/// Reads from the binary matrix store.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreLoader;

impl FeatureLoader for StoreLoader {
    fn load(&self, locator: &Locator) -> Result<FeatureMatrix> {
        read_matrix(locator)
    }
}

/// Adapts a closure into a [`FeatureLoader`].
pub struct FnLoader<F>(pub F);

impl<F> FeatureLoader for FnLoader<F>
where
    F: Fn(&Locator) -> Result<FeatureMatrix> + Send + Sync,
{
    fn load(&self, locator: &Locator) -> Result<FeatureMatrix> {
        (self.0)(locator)
    }
}

/// Output of the upstream feature-extraction stage for one recording.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub features: FeatureMatrix,
    pub duration_secs: f64,
}

/// Turns a raw recording into features (filterbank computation lives
/// outside this crate).
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, source: &Path) -> Result<Extracted>;
}

impl<F> FeatureExtractor for F
where
    F: Fn(&Path) -> Result<Extracted> + Send + Sync,
{
    fn extract(&self, source: &Path) -> Result<Extracted> {
        self(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreWriter;
    use ndarray::Array2;

    #[test]
    fn fn_loader_delegates() {
        let loader = FnLoader(|loc: &Locator| -> Result<FeatureMatrix> {
            let frames = loc.offset.unwrap_or(1) as usize;
            Ok(Array2::zeros((frames, 3)))
        });
        let m = loader.load(&Locator::new("x", 5)).unwrap();
        assert_eq!(m.dim(), (5, 3));
    }

    #[test]
    fn store_loader_reads_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = StoreWriter::create(dir.path().join("f.ark")).unwrap();
        let rec = w.append("k", &Array2::from_elem((2, 2), 0.5)).unwrap();
        w.finish().unwrap();
        assert_eq!(StoreLoader.load(&rec.locator).unwrap()[[1, 1]], 0.5);
    }
}
