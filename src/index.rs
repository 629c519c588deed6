//! Persisted flat L2 vector index with a parallel metadata array.
//!
//! A [`VectorIndex`] lives in `<project>/.openbook/vector_index/` as two
//! artifacts:
//!
//! - `index.bin` — header followed by `count × dims` little-endian `f32`s
//! - `metadata.json` — JSON array of `{text, source}`, one per vector row
//!
//! # `index.bin` layout
//!
//! ```text
//! offset  size  field
//! 0       4     magic "OBVX"
//! 4       4     format version (u32 LE)
//! 8       4     dims (u32 LE)
//! 12      8     row count (u64 LE)
//! 20      ...   vectors
//! ```
//!
//! Each artifact is replaced atomically (temp file, fsync, rename), but the
//! pair is not. The row count in the header lets [`VectorIndex::ensure_loaded`]
//! detect a torn pair and report it as [`EngineError::Corrupt`].
//!
//! The index starts `Unloaded` and loads lazily on first use. Search is an
//! exact scan by squared Euclidean distance.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::embedding::{self, blob_to_vec, squared_l2, vec_to_blob, Embedder};
use crate::error::{EngineError, Result};
use crate::models::{Chunk, MetadataRecord, QueryResult};

pub const INDEX_FILE: &str = "index.bin";
pub const METADATA_FILE: &str = "metadata.json";

const MAGIC: [u8; 4] = *b"OBVX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 20;

#[derive(Debug, Default)]
struct FlatIndex {
    dims: usize,
    /// Row-major, `metadata.len() * dims` values.
    vectors: Vec<f32>,
    metadata: Vec<MetadataRecord>,
}

impl FlatIndex {
    fn empty(dims: usize) -> Self {
        Self {
            dims,
            ..Self::default()
        }
    }

    fn count(&self) -> usize {
        self.metadata.len()
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.vectors[i * self.dims..(i + 1) * self.dims]
    }
}

pub struct VectorIndex {
    dir: PathBuf,
    embedder: Box<dyn Embedder>,
    state: Option<FlatIndex>,
}

impl VectorIndex {
    /// Creates an unloaded index rooted at `dir`. Nothing is read until
    /// the first operation that needs the data.
    pub fn new(dir: impl Into<PathBuf>, embedder: Box<dyn Embedder>) -> Self {
        Self {
            dir: dir.into(),
            embedder,
            state: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.state.is_some()
    }

    /// Dimensionality of the index, fixed by the bound embedder.
    pub fn dims(&self) -> usize {
        self.embedder.dims()
    }

    pub fn count(&mut self) -> Result<usize> {
        Ok(self.loaded()?.count())
    }

    /// Loads the persisted artifacts, or starts empty if there are none.
    /// Idempotent.
    pub fn ensure_loaded(&mut self) -> Result<()> {
        if self.state.is_some() {
            return Ok(());
        }

        let index_path = self.dir.join(INDEX_FILE);
        let meta_path = self.dir.join(METADATA_FILE);
        let dims = self.embedder.dims();

        let state = match (index_path.exists(), meta_path.exists()) {
            (true, true) => {
                let state = read_artifacts(&index_path, &meta_path, dims)?;
                tracing::info!(
                    dir = %self.dir.display(),
                    vectors = state.count(),
                    dims,
                    "vector index loaded"
                );
                state
            }
            (false, false) => {
                tracing::debug!(dir = %self.dir.display(), "no vector index on disk, starting empty");
                FlatIndex::empty(dims)
            }
            (true, false) => {
                return Err(EngineError::Corrupt(format!(
                    "{} exists without {}",
                    INDEX_FILE, METADATA_FILE
                )))
            }
            (false, true) => {
                return Err(EngineError::Corrupt(format!(
                    "{} exists without {}",
                    METADATA_FILE, INDEX_FILE
                )))
            }
        };

        self.state = Some(state);
        Ok(())
    }

    /// Embeds `chunks`, appends them, and persists. Returns the number of
    /// rows added. Nothing is mutated unless every vector has the index's
    /// dimensionality.
    pub fn add_documents(&mut self, chunks: &[Chunk]) -> Result<usize> {
        self.ensure_loaded()?;
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts)?;
        if vectors.len() != chunks.len() {
            return Err(EngineError::transport(
                "embedding",
                format!("expected {} embeddings, got {}", chunks.len(), vectors.len()),
            ));
        }

        let dims = self.dims();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(EngineError::DimensionMismatch {
                expected: dims,
                actual: bad.len(),
            });
        }

        let state = self.loaded_mut()?;
        let (prev_vectors, prev_rows) = (state.vectors.len(), state.metadata.len());
        for (chunk, vector) in chunks.iter().zip(vectors) {
            state.vectors.extend(vector);
            state.metadata.push(MetadataRecord::from(chunk));
        }

        if let Err(e) = self.persist() {
            // Keep memory in step with what is on disk
            let state = self.loaded_mut()?;
            state.vectors.truncate(prev_vectors);
            state.metadata.truncate(prev_rows);
            return Err(e);
        }

        Ok(chunks.len())
    }

    /// The `k` nearest rows to `text`, closest first.
    ///
    /// An empty index or `k == 0` returns no results without calling the
    /// embedder.
    pub fn query(&mut self, text: &str, k: usize) -> Result<Vec<QueryResult>> {
        self.ensure_loaded()?;
        if k == 0 || self.loaded()?.count() == 0 {
            return Ok(Vec::new());
        }

        let query = embedding::embed_query(self.embedder.as_ref(), text)?;
        let state = self.loaded()?;
        if query.len() != state.dims {
            return Err(EngineError::DimensionMismatch {
                expected: state.dims,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = (0..state.count())
            .map(|i| (i, squared_l2(&query, state.row(i))))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        Ok(scored
            .into_iter()
            .take(k)
            .filter_map(|(i, distance)| {
                state.metadata.get(i).map(|m| QueryResult {
                    metadata: m.clone(),
                    distance,
                })
            })
            .collect())
    }

    /// Writes both artifacts. A no-op while unloaded.
    pub fn persist(&self) -> Result<()> {
        let state = match &self.state {
            Some(state) => state,
            None => return Ok(()),
        };

        std::fs::create_dir_all(&self.dir)
            .map_err(|e| EngineError::persistence(&self.dir, e))?;

        let mut index_bytes = Vec::with_capacity(HEADER_LEN + state.vectors.len() * 4);
        index_bytes.extend_from_slice(&MAGIC);
        index_bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        index_bytes.extend_from_slice(&(state.dims as u32).to_le_bytes());
        index_bytes.extend_from_slice(&(state.count() as u64).to_le_bytes());
        index_bytes.extend_from_slice(&vec_to_blob(&state.vectors));

        let meta_bytes = serde_json::to_vec(&state.metadata)
            .map_err(|e| EngineError::persistence(self.dir.join(METADATA_FILE), e))?;

        write_atomic(&self.dir.join(INDEX_FILE), &index_bytes)?;
        write_atomic(&self.dir.join(METADATA_FILE), &meta_bytes)?;

        tracing::debug!(vectors = state.count(), "vector index persisted");
        Ok(())
    }

    /// Drops every row and persists the empty index.
    pub fn clear(&mut self) -> Result<()> {
        self.state = Some(FlatIndex::empty(self.embedder.dims()));
        self.persist()
    }

    /// Rows in insertion order.
    pub fn metadata(&mut self) -> Result<&[MetadataRecord]> {
        Ok(&self.loaded()?.metadata)
    }

    fn loaded(&mut self) -> Result<&FlatIndex> {
        self.ensure_loaded()?;
        self.state
            .as_ref()
            .ok_or_else(|| EngineError::Corrupt("index failed to load".into()))
    }

    fn loaded_mut(&mut self) -> Result<&mut FlatIndex> {
        self.ensure_loaded()?;
        self.state
            .as_mut()
            .ok_or_else(|| EngineError::Corrupt("index failed to load".into()))
    }
}

fn read_artifacts(index_path: &Path, meta_path: &Path, dims: usize) -> Result<FlatIndex> {
    let bytes = std::fs::read(index_path).map_err(|e| EngineError::persistence(index_path, e))?;
    if bytes.len() < HEADER_LEN {
        return Err(EngineError::Corrupt(format!(
            "{} is truncated ({} bytes)",
            INDEX_FILE,
            bytes.len()
        )));
    }
    if bytes[0..4] != MAGIC {
        return Err(EngineError::Corrupt(format!("{} has a bad magic", INDEX_FILE)));
    }

    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != FORMAT_VERSION {
        return Err(EngineError::Corrupt(format!(
            "unsupported index format version {}",
            version
        )));
    }

    let stored_dims = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    if stored_dims != dims {
        return Err(EngineError::DimensionMismatch {
            expected: stored_dims,
            actual: dims,
        });
    }

    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&bytes[12..HEADER_LEN]);
    let count = u64::from_le_bytes(count_bytes) as usize;

    let body = &bytes[HEADER_LEN..];
    let expected_len = count
        .checked_mul(dims)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| EngineError::Corrupt("row count overflows".into()))?;
    if body.len() != expected_len {
        return Err(EngineError::Corrupt(format!(
            "{} holds {} bytes of vectors, header promises {}",
            INDEX_FILE,
            body.len(),
            expected_len
        )));
    }

    let meta_bytes = std::fs::read(meta_path).map_err(|e| EngineError::persistence(meta_path, e))?;
    let metadata: Vec<MetadataRecord> = serde_json::from_slice(&meta_bytes)
        .map_err(|e| EngineError::Corrupt(format!("{} is unreadable: {}", METADATA_FILE, e)))?;

    if metadata.len() != count {
        return Err(EngineError::Corrupt(format!(
            "index has {} vectors but metadata has {} records",
            count,
            metadata.len()
        )));
    }

    Ok(FlatIndex {
        dims,
        vectors: blob_to_vec(body),
        metadata,
    })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let write = || -> std::io::Result<()> {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        std::fs::rename(&temp_path, path)?;
        sync_dir(path.parent().unwrap_or_else(|| Path::new(".")))
    };
    write().map_err(|e| EngineError::persistence(path, e))
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> std::io::Result<()> {
    File::open(path)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Puts the text length in the first component so distances are predictable.
    struct FeatureEmbedder {
        dims: usize,
        calls: Arc<AtomicUsize>,
    }

    impl Embedder for FeatureEmbedder {
        fn model_name(&self) -> &str {
            "feature"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; self.dims];
                    v[0] = t.len() as f32;
                    v
                })
                .collect())
        }
    }

    struct WrongDims;

    impl Embedder for WrongDims {
        fn model_name(&self) -> &str {
            "wrong"
        }
        fn dims(&self) -> usize {
            3
        }
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 2.0]).collect())
        }
    }

    fn index_with(dir: &Path, dims: usize) -> (VectorIndex, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let embedder = FeatureEmbedder {
            dims,
            calls: calls.clone(),
        };
        (VectorIndex::new(dir, Box::new(embedder)), calls)
    }

    fn chunk(text: &str, source: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            source: source.to_string(),
            position: 0,
        }
    }

    #[test]
    fn test_starts_unloaded_and_loads_empty() {
        let tmp = TempDir::new().unwrap();
        let (mut index, _) = index_with(tmp.path(), 3);
        assert!(!index.is_loaded());
        index.ensure_loaded().unwrap();
        index.ensure_loaded().unwrap();
        assert!(index.is_loaded());
        assert_eq!(index.count().unwrap(), 0);
    }

    #[test]
    fn test_query_on_empty_index_skips_embedder() {
        let tmp = TempDir::new().unwrap();
        let (mut index, calls) = index_with(tmp.path(), 3);
        assert!(index.query("anything", 5).unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_add_then_query_orders_by_distance() {
        let tmp = TempDir::new().unwrap();
        let (mut index, _) = index_with(tmp.path(), 3);
        let added = index
            .add_documents(&[chunk("aaaa", "a.txt"), chunk("aa", "b.txt"), chunk("aaaaaaaa", "c.txt")])
            .unwrap();
        assert_eq!(added, 3);

        let hits = index.query("aaa", 2).unwrap();
        assert_eq!(hits.len(), 2);
        // distance to "aaaa" and "aa" is 1.0 each; ties resolve by row order
        assert_eq!(hits[0].metadata.source, "a.txt");
        assert_eq!(hits[1].metadata.source, "b.txt");
        assert_eq!(hits[0].distance, 1.0);

        assert!(index.query("aaa", 0).unwrap().is_empty());
        assert_eq!(index.query("aaa", 10).unwrap().len(), 3);
    }

    #[test]
    fn test_reload_preserves_rows_and_metadata() {
        let tmp = TempDir::new().unwrap();
        {
            let (mut index, _) = index_with(tmp.path(), 4);
            index.add_documents(&[chunk("one", "a.txt")]).unwrap();
            index.add_documents(&[chunk("three", "b.txt")]).unwrap();
        }
        let (mut index, _) = index_with(tmp.path(), 4);
        assert_eq!(index.count().unwrap(), 2);
        assert_eq!(index.metadata().unwrap()[1].text, "three");
        let hits = index.query("three", 1).unwrap();
        assert_eq!(hits[0].metadata.source, "b.txt");
        assert_eq!(hits[0].distance, 0.0);
    }

    #[test]
    fn test_dimension_mismatch_rejected_before_mutation() {
        let tmp = TempDir::new().unwrap();
        let mut index = VectorIndex::new(tmp.path(), Box::new(WrongDims));
        let err = index.add_documents(&[chunk("x", "a.txt")]).unwrap_err();
        assert!(matches!(
            err,
            EngineError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(index.count().unwrap(), 0);
        assert!(!tmp.path().join(INDEX_FILE).exists());
    }

    #[test]
    fn test_reopen_with_other_dims_is_mismatch() {
        let tmp = TempDir::new().unwrap();
        {
            let (mut index, _) = index_with(tmp.path(), 4);
            index.add_documents(&[chunk("one", "a.txt")]).unwrap();
        }
        let (mut index, _) = index_with(tmp.path(), 8);
        assert!(matches!(
            index.ensure_loaded(),
            Err(EngineError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_single_artifact_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        {
            let (mut index, _) = index_with(tmp.path(), 3);
            index.add_documents(&[chunk("one", "a.txt")]).unwrap();
        }
        std::fs::remove_file(tmp.path().join(METADATA_FILE)).unwrap();
        let (mut index, _) = index_with(tmp.path(), 3);
        assert!(matches!(index.ensure_loaded(), Err(EngineError::Corrupt(_))));
    }

    #[test]
    fn test_torn_pair_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        {
            let (mut index, _) = index_with(tmp.path(), 3);
            index.add_documents(&[chunk("one", "a.txt")]).unwrap();
        }
        let stale = serde_json::to_vec(&Vec::<MetadataRecord>::new()).unwrap();
        std::fs::write(tmp.path().join(METADATA_FILE), stale).unwrap();

        let (mut index, _) = index_with(tmp.path(), 3);
        let err = index.ensure_loaded().unwrap_err();
        assert!(err.to_string().contains("metadata has 0 records"));
    }

    #[test]
    fn test_bad_magic_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(INDEX_FILE), b"NOPE0000000000000000").unwrap();
        std::fs::write(tmp.path().join(METADATA_FILE), b"[]").unwrap();
        let (mut index, _) = index_with(tmp.path(), 3);
        assert!(matches!(index.ensure_loaded(), Err(EngineError::Corrupt(_))));
    }

    #[test]
    fn test_clear_empties_and_persists() {
        let tmp = TempDir::new().unwrap();
        {
            let (mut index, _) = index_with(tmp.path(), 3);
            index.add_documents(&[chunk("one", "a.txt")]).unwrap();
            index.clear().unwrap();
        }
        let (mut index, _) = index_with(tmp.path(), 3);
        assert_eq!(index.count().unwrap(), 0);
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let tmp = TempDir::new().unwrap();
        let (mut index, _) = index_with(tmp.path(), 3);
        index.add_documents(&[chunk("one", "a.txt")]).unwrap();
        let names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert!(names.iter().all(|n| !n.ends_with(".tmp")), "{:?}", names);
    }
}
