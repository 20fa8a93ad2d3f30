//! Versioned model bundles and their on-disk store.
//!
//! A bundle is immutable once written. The feature-name list is part of the
//! bundle, so serving aligns on exactly the columns the estimators were fitted
//! with. Saves go to `<file>.tmp-<uuid>` and are renamed over the target, so a
//! concurrent reader sees either the old bundle or the new one, never a
//! partial file.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::errors::AppError;

/// Bumped whenever the serialized layout changes.
pub const FORMAT_VERSION: u32 = 2;
/// Reads of a bundle pair before a run mismatch is reported.
const PAIR_LOAD_ATTEMPTS: usize = 2;

/// A model type that can be persisted in a bundle.
pub trait BundleModel: Serialize + DeserializeOwned {
    /// File name inside the model directory.
    const FILE_NAME: &'static str;

    /// Check that every estimator expects exactly `n_features` inputs.
    fn check_feature_count(&self, n_features: usize) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModelBundle<M> {
    pub format_version: u32,
    pub bundle_id: Uuid,
    /// Shared by every bundle written from one training run.
    pub training_run: Uuid,
    pub trained_at: DateTime<Utc>,
    /// Ordered feature names the estimators were fitted on.
    pub feature_names: Vec<String>,
    pub model: M,
}

impl<M: BundleModel> TrainedModelBundle<M> {
    pub fn new(feature_names: Vec<String>, model: M) -> Self {
        let bundle_id = Uuid::new_v4();
        Self {
            format_version: FORMAT_VERSION,
            bundle_id,
            training_run: bundle_id,
            trained_at: Utc::now(),
            feature_names,
            model,
        }
    }

    pub fn in_training_run(mut self, run: Uuid) -> Self {
        self.training_run = run;
        self
    }

    /// Reject bundles that cannot be aligned safely against serving data.
    pub fn validate(&self) -> Result<(), String> {
        if self.format_version != FORMAT_VERSION {
            return Err(format!(
                "format version {} (expected {})",
                self.format_version, FORMAT_VERSION
            ));
        }
        if self.feature_names.is_empty() {
            return Err("empty feature list".to_string());
        }
        let mut seen = BTreeSet::new();
        if let Some(dup) = self.feature_names.iter().find(|n| !seen.insert(n.as_str())) {
            return Err(format!("duplicate feature name '{}'", dup));
        }
        self.model.check_feature_count(self.feature_names.len())
    }
}

/// Write `bytes` to `<path>.tmp-<uuid>` and rename it over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let tmp = stage(path, bytes)?;
    commit(&tmp, path)
}

/// Write `bytes` next to `path` under a unique temporary name.
fn stage(path: &Path, bytes: &[u8]) -> Result<PathBuf, AppError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| AppError::InvalidInput(format!("'{}' is not a file path", path.display())))?;
    let tmp = path.with_file_name(format!("{}.tmp-{}", file_name, Uuid::new_v4()));
    if let Err(e) = std::fs::write(&tmp, bytes) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(tmp)
}

fn commit(tmp: &Path, path: &Path) -> Result<(), AppError> {
    std::fs::rename(tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(tmp);
        AppError::from(e)
    })
}

/// Directory holding one bundle file per model type.
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for<M: BundleModel>(&self) -> PathBuf {
        self.dir.join(M::FILE_NAME)
    }

    /// Persist a bundle, replacing any previous one atomically. Returns the
    /// final path.
    pub fn save<M: BundleModel>(&self, bundle: &TrainedModelBundle<M>) -> Result<PathBuf, AppError> {
        let path = self.path_for::<M>();
        bundle.validate().map_err(|reason| AppError::incompatible(&path, reason))?;
        std::fs::create_dir_all(&self.dir)?;

        let json = serde_json::to_vec(bundle)?;
        write_atomic(&path, &json)?;
        tracing::info!(
            "Saved {} bundle {} ({} features) to {}",
            M::FILE_NAME,
            bundle.bundle_id,
            bundle.feature_names.len(),
            path.display()
        );
        Ok(path)
    }

    /// Persist two bundles from the same training run. Both files are fully
    /// written before either is renamed into place, so the window where a
    /// reader can see one new and one old bundle is two renames wide;
    /// [`ModelStore::load_pair`] detects and retries that case.
    pub fn save_pair<A: BundleModel, B: BundleModel>(
        &self,
        first: &TrainedModelBundle<A>,
        second: &TrainedModelBundle<B>,
    ) -> Result<(PathBuf, PathBuf), AppError> {
        let (path_a, path_b) = (self.path_for::<A>(), self.path_for::<B>());
        if first.training_run != second.training_run {
            return Err(AppError::incompatible(
                &path_b,
                format!(
                    "training run {} does not match {} of {}",
                    second.training_run,
                    first.training_run,
                    A::FILE_NAME
                ),
            ));
        }
        first.validate().map_err(|reason| AppError::incompatible(&path_a, reason))?;
        second.validate().map_err(|reason| AppError::incompatible(&path_b, reason))?;
        std::fs::create_dir_all(&self.dir)?;

        let tmp_a = stage(&path_a, &serde_json::to_vec(first)?)?;
        let tmp_b = match serde_json::to_vec(second)
            .map_err(AppError::from)
            .and_then(|json| stage(&path_b, &json))
        {
            Ok(tmp) => tmp,
            Err(e) => {
                let _ = std::fs::remove_file(&tmp_a);
                return Err(e);
            }
        };
        if let Err(e) = commit(&tmp_a, &path_a) {
            let _ = std::fs::remove_file(&tmp_b);
            return Err(e);
        }
        commit(&tmp_b, &path_b)?;
        tracing::info!(
            "Saved training run {} to {} and {}",
            first.training_run,
            path_a.display(),
            path_b.display()
        );
        Ok((path_a, path_b))
    }

    /// Load two bundles written by [`ModelStore::save_pair`]. A mismatched
    /// training run is retried once, in case a save was mid-swap.
    pub fn load_pair<A: BundleModel, B: BundleModel>(
        &self,
    ) -> Result<(TrainedModelBundle<A>, TrainedModelBundle<B>), AppError> {
        let mut attempt = 0;
        loop {
            let first = self.load::<A>()?;
            let second = self.load::<B>()?;
            if first.training_run == second.training_run {
                return Ok((first, second));
            }
            attempt += 1;
            if attempt >= PAIR_LOAD_ATTEMPTS {
                return Err(AppError::incompatible(
                    &self.path_for::<B>(),
                    format!(
                        "training run {} does not match {} of {}",
                        second.training_run,
                        first.training_run,
                        A::FILE_NAME
                    ),
                ));
            }
            tracing::warn!("Bundles from different training runs, reloading");
        }
    }

    pub fn load<M: BundleModel>(&self) -> Result<TrainedModelBundle<M>, AppError> {
        Self::load_from(&self.path_for::<M>())
    }

    /// Load and validate a bundle from an explicit path.
    pub fn load_from<M: BundleModel>(path: &Path) -> Result<TrainedModelBundle<M>, AppError> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::ModelNotTrained(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let bundle: TrainedModelBundle<M> = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::incompatible(path, format!("unreadable bundle: {}", e)))?;
        bundle.validate().map_err(|reason| AppError::incompatible(path, reason))?;
        tracing::debug!(
            "Loaded bundle {} trained at {} from {}",
            bundle.bundle_id,
            bundle.trained_at,
            path.display()
        );
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Dummy {
        width: usize,
        weights: Vec<f64>,
    }

    impl BundleModel for Dummy {
        const FILE_NAME: &'static str = "dummy.json";

        fn check_feature_count(&self, n_features: usize) -> Result<(), String> {
            if self.width == n_features {
                Ok(())
            } else {
                Err(format!("width {} vs {}", self.width, n_features))
            }
        }
    }

    fn test_dir() -> PathBuf {
        std::env::temp_dir().join(format!("weather_mos_bundle_{}", Uuid::new_v4()))
    }

    fn dummy(names: &[&str]) -> TrainedModelBundle<Dummy> {
        TrainedModelBundle::new(
            names.iter().map(|s| s.to_string()).collect(),
            Dummy {
                width: names.len(),
                weights: vec![0.1, 1.0 / 3.0, -2.5e-7],
            },
        )
    }

    #[test]
    fn test_save_load_roundtrip_is_exact() {
        let store = ModelStore::new(test_dir());
        let bundle = dummy(&["a", "b"]);
        let path = store.save(&bundle).unwrap();
        assert!(path.ends_with("dummy.json"));
        let loaded: TrainedModelBundle<Dummy> = store.load().unwrap();
        assert_eq!(loaded, bundle);
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_missing_bundle_is_not_trained() {
        let store = ModelStore::new(test_dir());
        let err = store.load::<Dummy>().unwrap_err();
        assert!(err.is_untrained(), "got {}", err);
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let store = ModelStore::new(test_dir());
        store.save(&dummy(&["a"])).unwrap();
        store.save(&dummy(&["a", "b"])).unwrap();
        let names: Vec<String> = std::fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["dummy.json".to_string()]);
        let loaded: TrainedModelBundle<Dummy> = store.load().unwrap();
        assert_eq!(loaded.feature_names.len(), 2);
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_rejects_duplicate_and_mismatched_features() {
        let mut dup = dummy(&["a", "b"]);
        dup.feature_names = vec!["a".into(), "a".into()];
        assert!(dup.validate().unwrap_err().contains("duplicate"));

        let mut narrow = dummy(&["a", "b"]);
        narrow.feature_names.pop();
        assert!(narrow.validate().is_err());
    }

    #[test]
    fn test_load_rejects_wrong_version() {
        let store = ModelStore::new(test_dir());
        let mut bundle = dummy(&["a"]);
        store.save(&bundle).unwrap();
        bundle.format_version = FORMAT_VERSION + 1;
        std::fs::write(store.path_for::<Dummy>(), serde_json::to_vec(&bundle).unwrap()).unwrap();
        let err = store.load::<Dummy>().unwrap_err();
        assert!(matches!(err, AppError::IncompatibleBundle { .. }), "got {}", err);
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let store = ModelStore::new(test_dir());
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.path_for::<Dummy>(), b"{not json").unwrap();
        let err = store.load::<Dummy>().unwrap_err();
        assert!(matches!(err, AppError::IncompatibleBundle { .. }));
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Companion {
        width: usize,
    }

    impl BundleModel for Companion {
        const FILE_NAME: &'static str = "companion.json";

        fn check_feature_count(&self, n_features: usize) -> Result<(), String> {
            if self.width == n_features {
                Ok(())
            } else {
                Err(format!("width {} vs {}", self.width, n_features))
            }
        }
    }

    fn companion(names: &[&str]) -> TrainedModelBundle<Companion> {
        TrainedModelBundle::new(
            names.iter().map(|s| s.to_string()).collect(),
            Companion { width: names.len() },
        )
    }

    #[test]
    fn test_save_pair_then_load_pair() {
        let store = ModelStore::new(test_dir());
        let run = Uuid::new_v4();
        let first = dummy(&["a", "b"]).in_training_run(run);
        let second = companion(&["a", "b"]).in_training_run(run);
        store.save_pair(&first, &second).unwrap();

        let (a, b) = store.load_pair::<Dummy, Companion>().unwrap();
        assert_eq!(a, first);
        assert_eq!(b, second);
        let mut names: Vec<String> = std::fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["companion.json".to_string(), "dummy.json".to_string()]);
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_save_pair_rejects_different_runs() {
        let store = ModelStore::new(test_dir());
        let err = store.save_pair(&dummy(&["a"]), &companion(&["a"])).unwrap_err();
        assert!(matches!(err, AppError::IncompatibleBundle { .. }), "got {}", err);
        assert!(!store.dir().exists(), "nothing written");
    }

    #[test]
    fn test_load_pair_rejects_mixed_runs() {
        let store = ModelStore::new(test_dir());
        let old_run = Uuid::new_v4();
        store
            .save_pair(
                &dummy(&["a"]).in_training_run(old_run),
                &companion(&["a"]).in_training_run(old_run),
            )
            .unwrap();
        // Only the first bundle of a newer run has landed.
        store.save(&dummy(&["a"]).in_training_run(Uuid::new_v4())).unwrap();

        let err = store.load_pair::<Dummy, Companion>().unwrap_err();
        assert!(matches!(err, AppError::IncompatibleBundle { .. }), "got {}", err);
        assert!(err.to_string().contains("training run"));
        let _ = std::fs::remove_dir_all(store.dir());
    }
}
