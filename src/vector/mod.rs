//! Columnar in-memory vector index with lazy deletion.
//!
//! All vectors of a project live in one contiguous buffer of
//! `capacity × dimension` elements (single or half precision), with a
//! parallel metadata vector and an `id → slot` map. Removal only marks a
//! slot; compaction rebuilds the buffer once deletions pass a ratio
//! threshold. Search scores every live slot in parallel and re-ranks by a
//! weighted combination of cosine, importance, and recency.

pub mod rank;
pub mod simd;

use chrono::{DateTime, Utc};
use half::f16;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::config::Precision;
use crate::constants::COMPACT_DELETED_RATIO;
use crate::error::EngineError;
use rank::Scored;

/// One row of the index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    pub id: String,
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    /// Raw embedding blob; length is `dimension × sizeof(precision)`.
    pub embedding: Vec<u8>,
    pub precision: Precision,
    pub kind_tag: String,
    pub modified_at: DateTime<Utc>,
}

/// A search hit. `score` is the raw cosine similarity; the ordering of the
/// returned list reflects the combined (re-ranked) score.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: String,
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    pub kind_tag: String,
    pub score: f32,
}

enum VectorBuffer {
    F32(Vec<f32>),
    F16(Vec<f16>),
}

impl VectorBuffer {
    fn new(precision: Precision) -> Self {
        match precision {
            Precision::Single => VectorBuffer::F32(Vec::new()),
            Precision::Half => VectorBuffer::F16(Vec::new()),
        }
    }

    fn resize(&mut self, elements: usize) {
        match self {
            VectorBuffer::F32(v) => v.resize(elements, 0.0),
            VectorBuffer::F16(v) => v.resize(elements, f16::ZERO),
        }
    }

    fn write_slot(&mut self, slot: usize, dimension: usize, blob: &[u8]) {
        let base = slot * dimension;
        match self {
            VectorBuffer::F32(v) => {
                for (i, value) in simd::blob_to_f32(blob).into_iter().enumerate() {
                    v[base + i] = value;
                }
            }
            VectorBuffer::F16(v) => {
                for (i, value) in simd::blob_to_f16(blob).into_iter().enumerate() {
                    v[base + i] = value;
                }
            }
        }
    }
}

/// Columnar vector index for one project.
pub struct VectorIndex {
    dimension: usize,
    precision: Precision,
    buffer: VectorBuffer,
    /// Capacity in vectors, not elements.
    capacity: usize,
    entries: Vec<VectorEntry>,
    id_to_slot: HashMap<String, usize>,
    deleted: HashSet<usize>,
}

impl VectorIndex {
    pub fn new(dimension: usize, precision: Precision) -> Self {
        Self {
            dimension,
            precision,
            buffer: VectorBuffer::new(precision),
            capacity: 0,
            entries: Vec::new(),
            id_to_slot: HashMap::new(),
            deleted: HashSet::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Number of live (searchable) vectors.
    pub fn live_count(&self) -> usize {
        self.id_to_slot.len()
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }

    /// Total occupied slots, live and deleted.
    pub fn slot_count(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.id_to_slot.contains_key(id)
    }

    fn expected_blob_len(&self) -> usize {
        self.dimension * self.precision.element_size()
    }

    fn validate(&self, entry: &VectorEntry) -> Result<(), EngineError> {
        if entry.precision != self.precision {
            return Err(EngineError::invariant(format!(
                "entry precision {} does not match index precision {}",
                entry.precision.as_str(),
                self.precision.as_str()
            )));
        }
        if entry.embedding.len() != self.expected_blob_len() {
            return Err(EngineError::invariant(format!(
                "embedding blob of {} bytes for {}, expected {}",
                entry.embedding.len(),
                entry.id,
                self.expected_blob_len()
            )));
        }
        Ok(())
    }

    /// Grow buffer capacity to at least `needed` vectors, by 1.5× steps.
    fn ensure_capacity(&mut self, needed: usize) {
        if needed <= self.capacity {
            return;
        }
        let new_capacity = needed.max(self.capacity + self.capacity / 2).max(8);
        self.buffer.resize(new_capacity * self.dimension);
        self.capacity = new_capacity;
    }

    /// Insert one entry, reusing a deleted slot when one exists. Replaces
    /// any live entry with the same id.
    pub fn add(&mut self, entry: VectorEntry) -> Result<(), EngineError> {
        self.validate(&entry)?;

        if let Some(&slot) = self.id_to_slot.get(&entry.id) {
            self.buffer.write_slot(slot, self.dimension, &entry.embedding);
            self.entries[slot] = entry;
            return Ok(());
        }

        let slot = if let Some(&reuse) = self.deleted.iter().next() {
            self.deleted.remove(&reuse);
            reuse
        } else {
            self.ensure_capacity(self.entries.len() + 1);
            self.entries.len()
        };

        self.buffer.write_slot(slot, self.dimension, &entry.embedding);
        self.id_to_slot.insert(entry.id.clone(), slot);
        if slot == self.entries.len() {
            self.entries.push(entry);
        } else {
            self.entries[slot] = entry;
        }
        Ok(())
    }

    /// Insert many entries, growing capacity once up front.
    pub fn append_batch(&mut self, entries: Vec<VectorEntry>) -> Result<usize, EngineError> {
        let fresh = entries
            .iter()
            .filter(|e| !self.id_to_slot.contains_key(&e.id))
            .count()
            .saturating_sub(self.deleted.len());
        self.ensure_capacity(self.entries.len() + fresh);

        let count = entries.len();
        for entry in entries {
            self.add(entry)?;
        }
        Ok(count)
    }

    /// Mark one id deleted. Returns whether it was present.
    pub fn remove_by_id(&mut self, id: &str) -> bool {
        match self.id_to_slot.remove(id) {
            Some(slot) => {
                self.deleted.insert(slot);
                true
            }
            None => false,
        }
    }

    /// Mark every slot whose path matches as deleted; compact when the
    /// deleted ratio passes the threshold.
    pub fn remove_by_path(&mut self, path: &str) -> usize {
        let ids: Vec<String> = self
            .id_to_slot
            .iter()
            .filter(|(_, &slot)| self.entries[slot].path == path)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &ids {
            self.remove_by_id(id);
        }

        if !self.entries.is_empty() {
            let ratio = self.deleted.len() as f64 / self.entries.len() as f64;
            if ratio > COMPACT_DELETED_RATIO {
                self.compact();
            }
        }

        ids.len()
    }

    /// Rebuild buffer and metadata into tightly sized allocations,
    /// reassigning slot indices. Afterwards there are no deleted slots.
    pub fn compact(&mut self) {
        let live: Vec<usize> = (0..self.entries.len())
            .filter(|slot| !self.deleted.contains(slot))
            .collect();

        let mut buffer = VectorBuffer::new(self.precision);
        buffer.resize(live.len() * self.dimension);
        let mut entries = Vec::with_capacity(live.len());
        let mut id_to_slot = HashMap::with_capacity(live.len());

        for (new_slot, &old_slot) in live.iter().enumerate() {
            let entry = self.entries[old_slot].clone();
            buffer.write_slot(new_slot, self.dimension, &entry.embedding);
            id_to_slot.insert(entry.id.clone(), new_slot);
            entries.push(entry);
        }

        debug!(
            "Compacted index: {} live slots, {} reclaimed",
            live.len(),
            self.entries.len() - live.len()
        );

        self.capacity = live.len();
        self.buffer = buffer;
        self.entries = entries;
        self.id_to_slot = id_to_slot;
        self.deleted.clear();
    }

    /// Drop everything, keeping dimension and precision.
    pub fn clear(&mut self) {
        self.buffer = VectorBuffer::new(self.precision);
        self.capacity = 0;
        self.entries.clear();
        self.id_to_slot.clear();
        self.deleted.clear();
    }

    /// Cosine top-K over all live slots.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, EngineError> {
        self.search_filtered(query, k, |_| true)
    }

    /// Cosine top-K over live slots passing `filter`.
    ///
    /// Scoring runs in parallel over the worker pool; selection uses an
    /// online bubble for small k and a stable sort otherwise. The returned
    /// `score` is the raw cosine; ordering follows the combined score.
    pub fn search_filtered<F>(
        &self,
        query: &[f32],
        k: usize,
        filter: F,
    ) -> Result<Vec<SearchResult>, EngineError>
    where
        F: Fn(&VectorEntry) -> bool + Sync,
    {
        if query.len() != self.dimension {
            return Err(EngineError::invariant(format!(
                "query of {} dims against index of {}",
                query.len(),
                self.dimension
            )));
        }
        if k == 0 || self.id_to_slot.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let slots: Vec<usize> = (0..self.entries.len())
            .filter(|slot| !self.deleted.contains(slot))
            .filter(|&slot| filter(&self.entries[slot]))
            .collect();

        let query_f16 = match self.precision {
            Precision::Half => simd::query_to_f16(query),
            Precision::Single => Vec::new(),
        };

        let scored: Vec<Scored> = slots
            .par_iter()
            .map(|&slot| {
                let cosine = match &self.buffer {
                    VectorBuffer::F32(v) => {
                        let base = slot * self.dimension;
                        simd::cosine_f32(query, &v[base..base + self.dimension])
                    }
                    VectorBuffer::F16(v) => {
                        let base = slot * self.dimension;
                        simd::cosine_f16(&query_f16, &v[base..base + self.dimension])
                    }
                };
                let entry = &self.entries[slot];
                let importance = rank::importance(&entry.kind_tag, &entry.path, &entry.text);
                let recency = rank::recency_factor(entry.modified_at, now);
                Scored {
                    slot,
                    cosine,
                    combined: rank::combined_score(cosine, importance, recency),
                }
            })
            .collect();

        let top = rank::select_top_k(scored, k);
        Ok(top
            .into_iter()
            .map(|s| {
                let entry = &self.entries[s.slot];
                SearchResult {
                    id: entry.id.clone(),
                    path: entry.path.clone(),
                    start_line: entry.start_line,
                    end_line: entry.end_line,
                    text: entry.text.clone(),
                    kind_tag: entry.kind_tag.clone(),
                    score: s.cosine,
                }
            })
            .collect())
    }

    /// Iterate live entries (stats and tests).
    pub fn live_entries(&self) -> impl Iterator<Item = &VectorEntry> {
        self.id_to_slot.values().map(move |&slot| &self.entries[slot])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, path: &str, vector: &[f32]) -> VectorEntry {
        VectorEntry {
            id: id.to_string(),
            path: path.to_string(),
            start_line: 1,
            end_line: 5,
            text: format!("text of {}", id),
            embedding: simd::f32_to_blob(vector),
            precision: Precision::Single,
            kind_tag: "method".to_string(),
            modified_at: Utc::now(),
        }
    }

    fn half_entry(id: &str, vector: &[f32]) -> VectorEntry {
        let halves: Vec<f16> = vector.iter().map(|&v| f16::from_f32(v)).collect();
        VectorEntry {
            id: id.to_string(),
            path: "/p/a.cs".to_string(),
            start_line: 1,
            end_line: 5,
            text: String::new(),
            embedding: simd::f16_to_blob(&halves),
            precision: Precision::Half,
            kind_tag: "method".to_string(),
            modified_at: Utc::now(),
        }
    }

    #[test]
    fn test_add_and_search() {
        let mut index = VectorIndex::new(4, Precision::Single);
        index.add(entry("a", "/p/a.cs", &[1.0, 0.0, 0.0, 0.0])).unwrap();
        index.add(entry("b", "/p/b.cs", &[0.0, 1.0, 0.0, 0.0])).unwrap();

        let results = index.search(&[0.9, 0.1, 0.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut index = VectorIndex::new(4, Precision::Single);
        let bad = entry("x", "/p/x.cs", &[1.0, 2.0]);
        assert!(matches!(
            index.add(bad),
            Err(EngineError::IndexInvariant(_))
        ));

        let err = index.search(&[1.0, 2.0], 3).unwrap_err();
        assert!(matches!(err, EngineError::IndexInvariant(_)));
    }

    #[test]
    fn test_precision_mismatch_rejected() {
        let mut index = VectorIndex::new(4, Precision::Single);
        assert!(index.add(half_entry("h", &[1.0, 0.0, 0.0, 0.0])).is_err());
    }

    #[test]
    fn test_slot_reuse_after_remove() {
        let mut index = VectorIndex::new(4, Precision::Single);
        index.add(entry("a", "/p/a.cs", &[1.0, 0.0, 0.0, 0.0])).unwrap();
        index.add(entry("b", "/p/b.cs", &[0.0, 1.0, 0.0, 0.0])).unwrap();
        assert!(index.remove_by_id("a"));
        assert_eq!(index.deleted_count(), 1);

        index.add(entry("c", "/p/c.cs", &[0.0, 0.0, 1.0, 0.0])).unwrap();
        // Deleted slot was reused: no growth of the slot array.
        assert_eq!(index.slot_count(), 2);
        assert_eq!(index.deleted_count(), 0);
        assert_eq!(index.live_count(), 2);
    }

    #[test]
    fn test_metadata_invariant() {
        let mut index = VectorIndex::new(4, Precision::Single);
        for i in 0..10 {
            let v = [i as f32, 1.0, 0.0, 0.0];
            index.add(entry(&format!("id{}", i), "/p/a.cs", &v)).unwrap();
        }
        index.remove_by_id("id3");
        index.remove_by_id("id7");

        // len(metadata) == len(id_map) + |deleted|
        assert_eq!(
            index.slot_count(),
            index.live_count() + index.deleted_count()
        );
    }

    #[test]
    fn test_remove_by_path_and_compaction() {
        let mut index = VectorIndex::new(4, Precision::Single);
        for i in 0..8 {
            let path = if i < 4 { "/p/a.cs" } else { "/p/b.cs" };
            let v = [i as f32 + 1.0, 1.0, 0.0, 0.0];
            index.add(entry(&format!("id{}", i), path, &v)).unwrap();
        }

        // Removing half the slots exceeds the 0.25 ratio → auto-compaction.
        let removed = index.remove_by_path("/p/a.cs");
        assert_eq!(removed, 4);
        assert_eq!(index.deleted_count(), 0, "compacted");
        assert_eq!(index.slot_count(), 4);

        let results = index.search(&[1.0, 1.0, 0.0, 0.0], 10).unwrap();
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.path == "/p/b.cs"));
    }

    #[test]
    fn test_compact_invariant() {
        let mut index = VectorIndex::new(4, Precision::Single);
        for i in 0..6 {
            let v = [1.0, i as f32, 0.0, 0.0];
            index.add(entry(&format!("id{}", i), "/p/a.cs", &v)).unwrap();
        }
        index.remove_by_id("id1");
        index.compact();
        assert_eq!(index.deleted_count(), 0);
        assert_eq!(index.slot_count(), 5);
        // Search still works over reassigned slots.
        assert_eq!(index.search(&[1.0, 0.0, 0.0, 0.0], 10).unwrap().len(), 5);
    }

    #[test]
    fn test_k_zero_and_k_over_live() {
        let mut index = VectorIndex::new(4, Precision::Single);
        index.add(entry("a", "/p/a.cs", &[1.0, 0.0, 0.0, 0.0])).unwrap();

        assert!(index.search(&[1.0, 0.0, 0.0, 0.0], 0).unwrap().is_empty());
        let all = index.search(&[1.0, 0.0, 0.0, 0.0], 50).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_half_precision_search() {
        let mut index = VectorIndex::new(4, Precision::Half);
        index.add(half_entry("a", &[1.0, 0.0, 0.0, 0.0])).unwrap();
        index.add(half_entry("b", &[0.0, 1.0, 0.0, 0.0])).unwrap();

        let results = index.search(&[0.9, 0.1, 0.0, 0.0], 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
    }

    #[test]
    fn test_filtered_search() {
        let mut index = VectorIndex::new(4, Precision::Single);
        let mut auth = entry("a", "/p/a.cs", &[1.0, 0.0, 0.0, 0.0]);
        auth.kind_tag = "method-auth".to_string();
        index.add(auth).unwrap();
        index.add(entry("b", "/p/b.cs", &[1.0, 0.0, 0.0, 0.0])).unwrap();

        let results = index
            .search_filtered(&[1.0, 0.0, 0.0, 0.0], 10, |e| {
                e.kind_tag.ends_with("-auth")
            })
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
    }

    #[test]
    fn test_replace_existing_id() {
        let mut index = VectorIndex::new(4, Precision::Single);
        index.add(entry("a", "/p/a.cs", &[1.0, 0.0, 0.0, 0.0])).unwrap();
        index.add(entry("a", "/p/a.cs", &[0.0, 1.0, 0.0, 0.0])).unwrap();
        assert_eq!(index.live_count(), 1);

        let results = index.search(&[0.0, 1.0, 0.0, 0.0], 1).unwrap();
        assert!((results[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_append_batch() {
        let mut index = VectorIndex::new(4, Precision::Single);
        let batch: Vec<VectorEntry> = (0..50)
            .map(|i| entry(&format!("id{}", i), "/p/a.cs", &[i as f32, 1.0, 0.0, 0.0]))
            .collect();
        assert_eq!(index.append_batch(batch).unwrap(), 50);
        assert_eq!(index.live_count(), 50);
    }
}
