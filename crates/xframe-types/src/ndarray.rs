//! Strided n-dimensional arrays of f64.
//!
//! An `NdArray` views a shared element buffer through `(shape, stride,
//! start)`. The same buffer may be viewed by several arrays with different
//! strides, so not every element of the buffer is necessarily reachable.
//!
//! Two normal forms exist:
//! - [`NdArray::canonicalize`] repacks into a dense buffer with ascending
//!   strides (`stride[0] == 1`), losing the caller's axis order;
//! - [`NdArray::compact`] repacks densely but preserves the relative order
//!   of the caller's strides. Serialization uses `compact` so user-visible
//!   stride semantics survive a round-trip.

use std::sync::Arc;

use crate::error::{Result, XFrameError};

#[derive(Debug, Clone)]
pub struct NdArray {
    elements: Arc<[f64]>,
    shape: Vec<usize>,
    stride: Vec<usize>,
    start: usize,
}

impl NdArray {
    /// Create an array view, validating shape/stride/start against the
    /// element buffer.
    pub fn new(
        elements: Arc<[f64]>,
        shape: Vec<usize>,
        stride: Vec<usize>,
        start: usize,
    ) -> Result<Self> {
        let nd = NdArray {
            elements,
            shape,
            stride,
            start,
        };
        if !nd.is_valid() {
            return Err(XFrameError::OutOfRange(format!(
                "ndarray shape {:?} / stride {:?} / start {} exceeds buffer of {} elements",
                nd.shape,
                nd.stride,
                nd.start,
                nd.elements.len()
            )));
        }
        Ok(nd)
    }

    /// Create a dense canonical array from a flat buffer and a shape.
    pub fn dense(elements: Vec<f64>, shape: Vec<usize>) -> Result<Self> {
        let stride = canonical_stride(&shape);
        Self::new(Arc::from(elements), shape, stride, 0)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn stride(&self) -> &[usize] {
        &self.stride
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn elements(&self) -> &[f64] {
        &self.elements
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of indexable elements: the product of the shape. May be less
    /// than `elements().len()` for strided views.
    pub fn num_elements(&self) -> usize {
        if self.shape.is_empty() {
            return 0;
        }
        self.shape.iter().product()
    }

    /// One past the largest reachable linear offset, relative to `start`.
    fn last_index(&self) -> usize {
        if self.shape.is_empty() {
            return 0;
        }
        let mut last = 0;
        for (d, s) in self.shape.iter().zip(self.stride.iter()) {
            last += (d - 1) * s;
        }
        last + 1
    }

    /// True when every indexable position lands inside the element buffer.
    pub fn is_valid(&self) -> bool {
        if self.shape.len() != self.stride.len() {
            return false;
        }
        if self.shape.iter().any(|&d| d == 0) || self.shape.is_empty() {
            return true; // empty arrays are vacuously valid
        }
        self.num_elements() <= self.elements.len()
            && self.start + self.last_index() <= self.elements.len()
    }

    /// True when every buffer element is reachable exactly once.
    pub fn is_full(&self) -> bool {
        self.start == 0
            && self.num_elements() == self.elements.len()
            && self.last_index() == self.elements.len()
    }

    fn has_canonical_stride(&self) -> bool {
        self.stride.windows(2).all(|w| w[0] <= w[1])
    }

    /// Canonical: full, `start == 0`, strides non-decreasing.
    pub fn is_canonical(&self) -> bool {
        self.is_full() && self.has_canonical_stride()
    }

    /// Element at an N-d index. Index validity is the caller's burden.
    pub fn at(&self, index: &[usize]) -> f64 {
        let mut off = self.start;
        for (i, s) in index.iter().zip(self.stride.iter()) {
            off += i * s;
        }
        self.elements[off]
    }

    /// Iterate elements in canonical index order (dimension 0 fastest).
    pub fn iter_elements(&self) -> impl Iterator<Item = f64> + '_ {
        IndexIter::new(&self.shape).map(|idx| self.at(&idx))
    }

    /// Repack into canonical form: dense buffer, ascending strides,
    /// `start == 0`. Axis identity of equal-stride dims follows index order.
    pub fn canonicalize(&self) -> NdArray {
        if self.is_canonical() {
            return self.clone();
        }
        let stride = canonical_stride(&self.shape);
        let elems: Vec<f64> = self.iter_elements().collect();
        NdArray {
            elements: Arc::from(elems),
            shape: self.shape.clone(),
            stride,
            start: 0,
        }
    }

    /// Repack densely while preserving the relative order of the caller's
    /// strides, dropping unreachable buffer elements. `start` becomes 0 and
    /// `elements().len() == num_elements()`.
    pub fn compact(&self) -> NdArray {
        if self.is_full() {
            return NdArray {
                elements: self.elements.clone(),
                shape: self.shape.clone(),
                stride: self.stride.clone(),
                start: 0,
            };
        }

        // Rank dimensions by current stride; the lowest-stride dimension
        // stays fastest in the packed buffer.
        let mut order: Vec<usize> = (0..self.shape.len()).collect();
        order.sort_by_key(|&i| (self.stride[i], i));

        let mut new_stride = vec![0usize; self.shape.len()];
        let mut acc = 1usize;
        for &dim in &order {
            new_stride[dim] = acc;
            acc *= self.shape[dim];
        }

        let total = self.num_elements();
        let mut elems = vec![0.0f64; total];
        for idx in IndexIter::new(&self.shape) {
            let mut dst = 0;
            for (i, s) in idx.iter().zip(new_stride.iter()) {
                dst += i * s;
            }
            elems[dst] = self.at(&idx);
        }

        NdArray {
            elements: Arc::from(elems),
            shape: self.shape.clone(),
            stride: new_stride,
            start: 0,
        }
    }
}

impl PartialEq for NdArray {
    fn eq(&self, other: &Self) -> bool {
        if self.shape != other.shape {
            return false;
        }
        self.iter_elements()
            .zip(other.iter_elements())
            .all(|(a, b)| (a.is_nan() && b.is_nan()) || a == b)
    }
}

/// Ascending canonical strides for a shape: `[1, d0, d0*d1, ...]`.
fn canonical_stride(shape: &[usize]) -> Vec<usize> {
    let mut stride = vec![0usize; shape.len()];
    let mut acc = 1usize;
    for (s, d) in stride.iter_mut().zip(shape.iter()) {
        *s = acc;
        acc *= d;
    }
    stride
}

/// Odometer over an index space, dimension 0 fastest.
struct IndexIter {
    shape: Vec<usize>,
    next: Option<Vec<usize>>,
}

impl IndexIter {
    fn new(shape: &[usize]) -> Self {
        let next = if shape.is_empty() || shape.contains(&0) {
            None
        } else {
            Some(vec![0; shape.len()])
        };
        IndexIter {
            shape: shape.to_vec(),
            next,
        }
    }
}

impl Iterator for IndexIter {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let current = self.next.clone()?;
        // advance the odometer
        let idx = self.next.as_mut().unwrap();
        let mut done = true;
        for (i, d) in idx.iter_mut().zip(self.shape.iter()) {
            *i += 1;
            if *i < *d {
                done = false;
                break;
            }
            *i = 0;
        }
        if done {
            self.next = None;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_is_canonical() {
        let nd = NdArray::dense(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]).unwrap();
        assert!(nd.is_valid());
        assert!(nd.is_canonical());
        assert_eq!(nd.stride(), &[1, 2]);
        assert_eq!(nd.num_elements(), 6);
        assert_eq!(nd.at(&[1, 2]), 6.0);
    }

    #[test]
    fn test_invalid_stride_rejected() {
        let res = NdArray::new(Arc::from(vec![1.0, 2.0, 3.0]), vec![2, 2], vec![1, 2], 0);
        assert!(res.is_err());
    }

    #[test]
    fn test_strided_view_and_canonicalize() {
        // Transposed view of a 2x3 row-major buffer: shape [3,2], stride [2,1].
        let buf: Arc<[f64]> = Arc::from(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let nd = NdArray::new(buf, vec![3, 2], vec![2, 1], 0).unwrap();
        assert!(!nd.is_canonical());
        assert_eq!(nd.at(&[0, 0]), 1.0);
        assert_eq!(nd.at(&[1, 0]), 3.0);
        assert_eq!(nd.at(&[0, 1]), 2.0);

        let canon = nd.canonicalize();
        assert!(canon.is_canonical());
        assert_eq!(canon.shape(), nd.shape());
        // Same logical content.
        for idx in [[0, 0], [1, 0], [2, 1]] {
            assert_eq!(canon.at(&idx), nd.at(&idx));
        }
    }

    #[test]
    fn test_compact_preserves_stride_order() {
        // A view skipping every other element: shape [3], stride [2].
        let buf: Arc<[f64]> = Arc::from(vec![1.0, -1.0, 2.0, -1.0, 3.0]);
        let nd = NdArray::new(buf, vec![3], vec![2], 0).unwrap();
        let compacted = nd.compact();
        assert_eq!(compacted.elements(), &[1.0, 2.0, 3.0]);
        assert_eq!(compacted.stride(), &[1]);
        assert_eq!(compacted.start(), 0);
        assert_eq!(nd, compacted);
    }

    #[test]
    fn test_compact_keeps_descending_strides_descending() {
        // Row-major 2x2 view (stride [2,1]) over a 2x2 buffer.
        let buf: Arc<[f64]> = Arc::from(vec![1.0, 2.0, 3.0, 4.0]);
        let nd = NdArray::new(buf, vec![2, 2], vec![2, 1], 0).unwrap();
        let compacted = nd.compact();
        // Stride rank order preserved: dim 0 still the slower one.
        assert!(compacted.stride()[0] > compacted.stride()[1]);
        assert_eq!(nd, compacted);

        let canon = nd.canonicalize();
        assert!(canon.stride()[0] <= canon.stride()[1]);
        assert_eq!(nd, canon);
    }

    #[test]
    fn test_start_offset_view() {
        let buf: Arc<[f64]> = Arc::from(vec![0.0, 0.0, 1.0, 2.0, 3.0]);
        let nd = NdArray::new(buf, vec![3], vec![1], 2).unwrap();
        assert_eq!(nd.at(&[0]), 1.0);
        let compacted = nd.compact();
        assert_eq!(compacted.start(), 0);
        assert_eq!(compacted.elements(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_empty_array() {
        let nd = NdArray::dense(vec![], vec![]).unwrap();
        assert!(nd.is_valid());
        assert_eq!(nd.num_elements(), 0);
        assert_eq!(nd.iter_elements().count(), 0);
    }
}
