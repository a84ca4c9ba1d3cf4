use ndarray::Slice;

use crate::{EngineErr, Result};

/// A half-open box `[ul, lr)` inside an array of shape `array_shape`.
///
/// Extents are how the engine talks about tiles and about the regions a tile
/// computation needs from its inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileExtent {
    ul: Vec<usize>,
    lr: Vec<usize>,
    array_shape: Vec<usize>,
}

impl TileExtent {
    /// Creates a new `TileExtent`.
    ///
    /// # Arguments
    /// * `ul` - The upper left (inclusive) corner.
    /// * `lr` - The lower right (exclusive) corner.
    /// * `array_shape` - The shape of the array this extent lives in.
    ///
    /// # Returns
    /// An error if the corners don't satisfy `ul <= lr <= array_shape` on every axis.
    pub fn new(ul: Vec<usize>, lr: Vec<usize>, array_shape: Vec<usize>) -> Result<Self> {
        let valid = ul.len() == lr.len()
            && lr.len() == array_shape.len()
            && ul
                .iter()
                .zip(&lr)
                .zip(&array_shape)
                .all(|((u, l), s)| u <= l && l <= s);

        if !valid {
            return Err(EngineErr::InvalidExtent {
                ul,
                lr,
                array_shape,
            });
        }

        Ok(Self {
            ul,
            lr,
            array_shape,
        })
    }

    /// Builds an extent whose corners are already known to be valid.
    pub(crate) fn from_parts(ul: Vec<usize>, lr: Vec<usize>, array_shape: Vec<usize>) -> Self {
        debug_assert!(ul.len() == lr.len() && lr.len() == array_shape.len());
        Self {
            ul,
            lr,
            array_shape,
        }
    }

    /// The extent covering the whole of an array.
    pub fn full(array_shape: &[usize]) -> Self {
        Self {
            ul: vec![0; array_shape.len()],
            lr: array_shape.to_vec(),
            array_shape: array_shape.to_vec(),
        }
    }

    pub fn ul(&self) -> &[usize] {
        &self.ul
    }

    pub fn lr(&self) -> &[usize] {
        &self.lr
    }

    pub fn array_shape(&self) -> &[usize] {
        &self.array_shape
    }

    pub fn ndim(&self) -> usize {
        self.ul.len()
    }

    /// Returns the shape of the region.
    pub fn shape(&self) -> Vec<usize> {
        self.ul.iter().zip(&self.lr).map(|(u, l)| l - u).collect()
    }

    /// Returns the amount of elements in the region.
    pub fn size(&self) -> usize {
        self.shape().iter().product()
    }

    /// Computes the overlap of two extents of the same array.
    ///
    /// # Returns
    /// `None` if they don't overlap.
    pub fn intersection(&self, other: &TileExtent) -> Option<TileExtent> {
        if self.array_shape != other.array_shape {
            return None;
        }

        let mut ul = Vec::with_capacity(self.ndim());
        let mut lr = Vec::with_capacity(self.ndim());

        for axis in 0..self.ndim() {
            let lo = self.ul[axis].max(other.ul[axis]);
            let hi = self.lr[axis].min(other.lr[axis]);
            if lo >= hi {
                return None;
            }

            ul.push(lo);
            lr.push(hi);
        }

        Some(TileExtent {
            ul,
            lr,
            array_shape: self.array_shape.clone(),
        })
    }

    /// Expresses `self` relative to the origin of `outer`.
    ///
    /// `self` must lie within `outer`, the resulting extent lives in an array shaped like `outer`.
    pub fn offset_from(&self, outer: &TileExtent) -> TileExtent {
        let ul = self.ul.iter().zip(&outer.ul).map(|(a, o)| a - o).collect();
        let lr = self.lr.iter().zip(&outer.ul).map(|(a, o)| a - o).collect();

        TileExtent {
            ul,
            lr,
            array_shape: outer.shape(),
        }
    }

    /// The region as one `Slice` per axis.
    pub fn to_slice(&self) -> Vec<Slice> {
        self.ul
            .iter()
            .zip(&self.lr)
            .map(|(&u, &l)| Slice::from(u..l))
            .collect()
    }

    /// Row-major position of the upper left corner within the array.
    pub fn ravelled_pos(&self) -> usize {
        ravelled_pos(&self.ul, &self.array_shape)
    }

    /// Removes `axis` from the extent.
    pub fn drop_axis(&self, axis: usize) -> TileExtent {
        let mut ext = self.clone();
        ext.ul.remove(axis);
        ext.lr.remove(axis);
        ext.array_shape.remove(axis);
        ext
    }

    /// Inserts a new `axis` spanning `0..len`.
    pub fn insert_axis(&self, axis: usize, len: usize) -> TileExtent {
        let mut ext = self.clone();
        ext.ul.insert(axis, 0);
        ext.lr.insert(axis, len);
        ext.array_shape.insert(axis, len);
        ext
    }
}

/// Row-major position of `idx` in an array of shape `shape`.
pub fn ravelled_pos(idx: &[usize], shape: &[usize]) -> usize {
    idx.iter()
        .zip(shape)
        .fold(0, |pos, (&i, &dim)| pos * dim + i)
}

/// Inverse of `ravelled_pos`.
pub fn unravelled_pos(mut pos: usize, shape: &[usize]) -> Vec<usize> {
    let mut idx = vec![0; shape.len()];
    for (axis, &dim) in shape.iter().enumerate().rev() {
        if dim == 0 {
            continue;
        }

        idx[axis] = pos % dim;
        pos /= dim;
    }

    idx
}
