use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{FormerError, Result};
use crate::llm::backend::Backend;
use crate::llm::tensor::Tensor;

/// Joins a parameter name onto a dotted prefix; an empty prefix adds nothing.
pub fn scoped(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// On-disk form of a single named tensor
#[derive(Debug, Serialize, Deserialize)]
struct StoredTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

/// A named collection of weight tensors.
///
/// Components write their parameters into a store with `export` and are rebuilt
/// from one with `from_store`. Names are dotted paths such as
/// `blk.0.attention.to_keys.weight`.
#[derive(Debug, Default)]
pub struct WeightStore {
    tensors: BTreeMap<String, Tensor>,
}

impl WeightStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.tensors.insert(name.into(), tensor);
    }

    /// Get a tensor by name
    pub fn get(&self, name: &str) -> Result<&Tensor> {
        self.tensors
            .get(name)
            .ok_or_else(|| FormerError::MissingTensor(name.to_string()))
    }

    /// Get a copy of a tensor, checking it has the expected shape
    pub fn get_shaped(&self, name: &str, expected: &[usize]) -> Result<Tensor> {
        let tensor = self.get(name)?;
        if tensor.shape() != expected {
            return Err(FormerError::shape(name, expected, tensor.shape()));
        }
        Ok(tensor.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Tensor names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    /// Total number of scalar parameters held
    pub fn parameter_count(&self) -> usize {
        self.tensors.values().map(Tensor::size).sum()
    }

    /// Write every tensor to `path` as JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let stored: BTreeMap<&str, StoredTensor> = self
            .tensors
            .iter()
            .map(|(name, tensor)| {
                let entry = StoredTensor {
                    shape: tensor.shape().to_vec(),
                    data: tensor.data().to_vec(),
                };
                (name.as_str(), entry)
            })
            .collect();

        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &stored)?;

        info!("Saved {} tensors to {}", self.tensors.len(), path.display());
        Ok(())
    }

    /// Read a store previously written with [`WeightStore::save`]
    pub fn load(path: &Path, backend: Arc<dyn Backend>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let stored: BTreeMap<String, StoredTensor> = serde_json::from_reader(reader)?;

        let mut store = Self::new();
        for (name, entry) in stored {
            debug!("Loading tensor: {} {:?}", name, entry.shape);
            let tensor = Tensor::new(entry.data, entry.shape, Arc::clone(&backend))?;
            store.insert(name, tensor);
        }

        info!("Loaded {} tensors from {}", store.len(), path.display());
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::backend::create_backend;

    #[test]
    fn test_missing_tensor() {
        let store = WeightStore::new();
        assert!(matches!(store.get("nope"), Err(FormerError::MissingTensor(_))));
    }

    #[test]
    fn test_get_shaped_checks_shape() {
        let mut store = WeightStore::new();
        store.insert("w", Tensor::zeros(vec![2, 3], create_backend()));

        assert!(store.get_shaped("w", &[2, 3]).is_ok());
        assert!(matches!(
            store.get_shaped("w", &[3, 2]),
            Err(FormerError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_save_and_load() {
        let backend = create_backend();
        let mut store = WeightStore::new();
        store.insert(
            "a.weight",
            Tensor::new(vec![1.0, -2.5, 3.25, 0.0], vec![2, 2], Arc::clone(&backend)).unwrap(),
        );
        store.insert(
            "a.bias",
            Tensor::new(vec![0.5, 0.75], vec![2], Arc::clone(&backend)).unwrap(),
        );

        let path = std::env::temp_dir().join(format!("former-store-{}.json", std::process::id()));
        store.save(&path).unwrap();
        let loaded = WeightStore::load(&path, backend).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.names().collect::<Vec<_>>(), vec!["a.bias", "a.weight"]);
        assert_eq!(loaded.get("a.weight").unwrap().data(), &[1.0, -2.5, 3.25, 0.0]);
        assert_eq!(loaded.get("a.weight").unwrap().shape(), &[2, 2]);
    }
}
