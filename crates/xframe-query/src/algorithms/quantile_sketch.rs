//! Greenwald-Khanna streaming approximate quantile sketch over composite
//! sort keys.
//!
//! Maintains a sorted summary of observed keys such that any quantile
//! query has error at most `epsilon * N` where N is the number of keys
//! inserted. Memory usage is O(1/epsilon * log(epsilon * N)). The global
//! min and max are tracked exactly, so `query(0.0)` and `query(1.0)` are
//! always exact.
//!
//! Keys are tuples of values compared componentwise under per-component
//! ascending flags, matching the external sort's ordering.
//!
//! Reference: Greenwald & Khanna, "Space-Efficient Online Computation of
//! Quantile Summaries", SIGMOD 2001.

use std::cmp::Ordering;
use std::sync::Arc;

use xframe_types::value::{compare_values, Value};

/// Composite ordering under per-component ascending flags.
pub fn compare_keys(a: &[Value], b: &[Value], ascending: &[bool]) -> Ordering {
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let ord = compare_values(x, y);
        let ord = if ascending.get(i).copied().unwrap_or(true) {
            ord
        } else {
            ord.reverse()
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// A single tuple in the GK summary.
#[derive(Clone, Debug)]
struct GkTuple {
    key: Vec<Value>,
    /// Rank difference between this tuple and its predecessor.
    g: usize,
    /// Maximum possible error in this tuple's rank.
    delta: usize,
}

pub struct QuantileSketch {
    tuples: Vec<GkTuple>,
    count: usize,
    epsilon: f64,
    ascending: Arc<[bool]>,
    min_key: Option<Vec<Value>>,
    max_key: Option<Vec<Value>>,
    buffer: Vec<Vec<Value>>,
    buffer_capacity: usize,
}

impl QuantileSketch {
    /// Create a sketch with the given error bound and key ordering.
    pub fn new(epsilon: f64, ascending: Arc<[bool]>) -> Self {
        let buffer_capacity = ((1.0 / (2.0 * epsilon)).ceil() as usize).max(1);
        QuantileSketch {
            tuples: Vec::new(),
            count: 0,
            epsilon,
            ascending,
            min_key: None,
            max_key: None,
            buffer: Vec::with_capacity(buffer_capacity),
            buffer_capacity,
        }
    }

    fn cmp(&self, a: &[Value], b: &[Value]) -> Ordering {
        compare_keys(a, b, &self.ascending)
    }

    /// Insert a key into the sketch.
    pub fn insert(&mut self, key: Vec<Value>) {
        match &self.min_key {
            None => {
                self.min_key = Some(key.clone());
                self.max_key = Some(key.clone());
            }
            Some(cur_min) => {
                if self.cmp(&key, cur_min) == Ordering::Less {
                    self.min_key = Some(key.clone());
                } else if self.cmp(&key, self.max_key.as_ref().unwrap()) == Ordering::Greater {
                    self.max_key = Some(key.clone());
                }
            }
        }

        self.buffer.push(key);
        if self.buffer.len() >= self.buffer_capacity {
            self.flush_buffer();
        }
    }

    fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let mut buf = std::mem::take(&mut self.buffer);
        let ascending = self.ascending.clone();
        buf.sort_by(|a, b| compare_keys(a, b, &ascending));
        for key in buf {
            self.insert_one(key);
        }
        self.compress();
    }

    fn insert_one(&mut self, key: Vec<Value>) {
        self.count += 1;

        if self.tuples.is_empty() {
            self.tuples.push(GkTuple {
                key,
                g: 1,
                delta: 0,
            });
            return;
        }

        let pos = self
            .tuples
            .iter()
            .position(|t| self.cmp(&key, &t.key) != Ordering::Greater);

        match pos {
            Some(0) => self.tuples.insert(
                0,
                GkTuple {
                    key,
                    g: 1,
                    delta: 0,
                },
            ),
            None => self.tuples.push(GkTuple {
                key,
                g: 1,
                delta: 0,
            }),
            Some(i) => {
                let delta = self.band_width().saturating_sub(1);
                self.tuples.insert(i, GkTuple { key, g: 1, delta });
            }
        }
    }

    /// Maximum band width: floor(2 * epsilon * count).
    fn band_width(&self) -> usize {
        (2.0 * self.epsilon * self.count as f64).floor() as usize
    }

    /// Merge adjacent tuples where the error bound permits.
    fn compress(&mut self) {
        if self.tuples.len() < 3 {
            return;
        }
        let threshold = self.band_width();
        let mut i = self.tuples.len() - 2;
        while i > 0 {
            let g_sum = self.tuples[i].g + self.tuples[i + 1].g;
            if g_sum + self.tuples[i + 1].delta <= threshold {
                self.tuples[i + 1].g = g_sum;
                self.tuples.remove(i);
            }
            i -= 1;
        }
    }

    /// Flush buffered keys; call before querying.
    pub fn finish(&mut self) {
        self.flush_buffer();
    }

    /// Total number of keys inserted.
    pub fn count(&self) -> usize {
        self.count + self.buffer.len()
    }

    /// Exact minimum and maximum observed keys.
    pub fn min_key(&self) -> Option<&[Value]> {
        self.min_key.as_deref()
    }

    pub fn max_key(&self) -> Option<&[Value]> {
        self.max_key.as_deref()
    }

    /// Approximate `quantile`-th key (quantile in `[0, 1]`; 0 and 1 are
    /// exact).
    pub fn query(&self, quantile: f64) -> Option<Vec<Value>> {
        let total = self.count();
        if total == 0 {
            return None;
        }
        if quantile <= 0.0 {
            return self.min_key.clone();
        }
        if quantile >= 1.0 {
            return self.max_key.clone();
        }

        if self.tuples.is_empty() {
            // Everything is still buffered.
            let mut sorted = self.buffer.clone();
            sorted.sort_by(|a, b| self.cmp(a, b));
            let idx = ((quantile * (sorted.len() as f64 - 1.0)).round() as usize)
                .min(sorted.len() - 1);
            return Some(sorted[idx].clone());
        }

        let desired = ((quantile * self.count as f64).ceil() as usize).clamp(1, self.count);
        let tolerance = (self.epsilon * self.count as f64).ceil() as usize;

        let mut rank = 0usize;
        let mut best_idx = 0usize;
        let mut best_dist = usize::MAX;
        for (i, tuple) in self.tuples.iter().enumerate() {
            rank += tuple.g;
            let dist = rank.abs_diff(desired);
            if dist <= tolerance && dist < best_dist {
                best_dist = dist;
                best_idx = i;
            }
        }
        Some(self.tuples[best_idx].key.clone())
    }

    /// `num_partitions - 1` cut keys dividing the distribution into
    /// roughly equal partitions.
    pub fn quantiles(&self, num_partitions: usize) -> Vec<Vec<Value>> {
        if num_partitions <= 1 || self.count() == 0 {
            return Vec::new();
        }
        let flushed = self.flushed_copy();
        (1..num_partitions)
            .filter_map(|i| flushed.query(i as f64 / num_partitions as f64))
            .collect()
    }

    /// Merge another sketch (same ordering) into this one.
    pub fn merge(&mut self, other: &QuantileSketch) {
        if let Some(other_min) = &other.min_key {
            match &self.min_key {
                None => {
                    self.min_key = Some(other_min.clone());
                    self.max_key = other.max_key.clone();
                }
                Some(cur_min) => {
                    if self.cmp(other_min, cur_min) == Ordering::Less {
                        self.min_key = Some(other_min.clone());
                    }
                    let other_max = other.max_key.as_ref().unwrap();
                    if self.cmp(other_max, self.max_key.as_ref().unwrap()) == Ordering::Greater
                    {
                        self.max_key = Some(other_max.clone());
                    }
                }
            }
        }

        self.flush_buffer();
        for key in &other.buffer {
            self.insert(key.clone());
        }
        self.flush_buffer();

        if other.tuples.is_empty() {
            return;
        }
        if self.tuples.is_empty() {
            self.tuples = other.tuples.clone();
            self.count += other.count;
            return;
        }

        // Merge the two sorted tuple lists.
        let mut merged = Vec::with_capacity(self.tuples.len() + other.tuples.len());
        let (mut i, mut j) = (0, 0);
        while i < self.tuples.len() && j < other.tuples.len() {
            if self.cmp(&self.tuples[i].key, &other.tuples[j].key) != Ordering::Greater {
                merged.push(self.tuples[i].clone());
                i += 1;
            } else {
                merged.push(other.tuples[j].clone());
                j += 1;
            }
        }
        merged.extend_from_slice(&self.tuples[i..]);
        merged.extend_from_slice(&other.tuples[j..]);

        self.tuples = merged;
        self.count += other.count;
        self.compress();
    }

    fn flushed_copy(&self) -> QuantileSketch {
        let mut copy = QuantileSketch {
            tuples: self.tuples.clone(),
            count: self.count,
            epsilon: self.epsilon,
            ascending: self.ascending.clone(),
            min_key: self.min_key.clone(),
            max_key: self.max_key.clone(),
            buffer: Vec::new(),
            buffer_capacity: self.buffer_capacity,
        };
        for key in &self.buffer {
            copy.insert(key.clone());
        }
        copy.flush_buffer();
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asc(n: usize) -> Arc<[bool]> {
        Arc::from(vec![true; n])
    }

    fn int_key(i: i64) -> Vec<Value> {
        vec![Value::Integer(i)]
    }

    #[test]
    fn test_basic_quantiles() {
        let mut sketch = QuantileSketch::new(0.01, asc(1));
        for i in 0..10_000 {
            sketch.insert(int_key(i));
        }
        sketch.finish();

        assert_eq!(sketch.query(0.0), Some(int_key(0)));
        assert_eq!(sketch.query(1.0), Some(int_key(9999)));

        match &sketch.query(0.5).unwrap()[0] {
            Value::Integer(v) => assert!((v - 5000).unsigned_abs() < 200, "median off: {}", v),
            _ => panic!("expected integer"),
        }
    }

    #[test]
    fn test_partition_cuts() {
        let mut sketch = QuantileSketch::new(0.01, asc(1));
        for i in 0..10_000 {
            sketch.insert(int_key(i));
        }
        sketch.finish();

        let cuts = sketch.quantiles(10);
        assert_eq!(cuts.len(), 9);
        for (i, cut) in cuts.iter().enumerate() {
            let expected = ((i + 1) * 1000) as i64;
            match &cut[0] {
                Value::Integer(v) => assert!(
                    (*v - expected).unsigned_abs() < 200,
                    "cut {} off: {} vs {}",
                    i,
                    v,
                    expected
                ),
                _ => panic!("expected integer cut"),
            }
        }
    }

    #[test]
    fn test_merge() {
        let mut s1 = QuantileSketch::new(0.01, asc(1));
        let mut s2 = QuantileSketch::new(0.01, asc(1));
        for i in 0..5000 {
            s1.insert(int_key(i));
        }
        for i in 5000..10_000 {
            s2.insert(int_key(i));
        }
        s1.finish();
        s2.finish();
        s1.merge(&s2);

        assert_eq!(s1.count(), 10_000);
        assert_eq!(s1.query(0.0), Some(int_key(0)));
        assert_eq!(s1.query(1.0), Some(int_key(9999)));
        match &s1.query(0.5).unwrap()[0] {
            Value::Integer(v) => assert!((v - 5000).unsigned_abs() < 300),
            _ => panic!("expected integer"),
        }
    }

    #[test]
    fn test_composite_descending_keys() {
        let ascending: Arc<[bool]> = Arc::from(vec![true, false]);
        let mut sketch = QuantileSketch::new(0.05, ascending.clone());
        for i in 0..100 {
            sketch.insert(vec![Value::Integer(i % 10), Value::Integer(i)]);
        }
        sketch.finish();

        // Under (asc, desc): the minimum is (0, highest second component).
        let min = sketch.query(0.0).unwrap();
        assert_eq!(min[0], Value::Integer(0));
        assert_eq!(min[1], Value::Integer(90));

        let max = sketch.query(1.0).unwrap();
        assert_eq!(max[0], Value::Integer(9));
        assert_eq!(max[1], Value::Integer(9));
    }

    #[test]
    fn test_na_sorts_first() {
        let mut sketch = QuantileSketch::new(0.1, asc(1));
        sketch.insert(int_key(5));
        sketch.insert(vec![Value::Undefined]);
        sketch.insert(int_key(1));
        sketch.finish();

        assert_eq!(sketch.query(0.0), Some(vec![Value::Undefined]));
        assert_eq!(sketch.query(1.0), Some(int_key(5)));
    }

    #[test]
    fn test_empty_and_single() {
        let sketch = QuantileSketch::new(0.01, asc(1));
        assert_eq!(sketch.count(), 0);
        assert_eq!(sketch.query(0.5), None);
        assert!(sketch.quantiles(4).is_empty());

        let mut one = QuantileSketch::new(0.01, asc(1));
        one.insert(int_key(42));
        one.finish();
        assert_eq!(one.query(0.0), Some(int_key(42)));
        assert_eq!(one.query(0.7), Some(int_key(42)));
    }

    #[test]
    fn test_compare_keys_prefix() {
        let a = vec![Value::Integer(1)];
        let b = vec![Value::Integer(1), Value::Integer(2)];
        assert_eq!(compare_keys(&a, &b, &[true, true]), Ordering::Less);
        assert_eq!(compare_keys(&b, &b, &[true, true]), Ordering::Equal);
    }
}
