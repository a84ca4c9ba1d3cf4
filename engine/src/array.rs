use std::sync::Arc;

use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, AxisDescription, IxDyn, Slice};
use rayon::prelude::*;

use crate::{Context, EngineErr, Result, extent::TileExtent, tiling};

/// A block of an array together with the region of the array it holds.
#[derive(Debug, Clone)]
pub struct Tile {
    extent: TileExtent,
    data: ArrayD<f32>,
}

impl Tile {
    /// Creates a new `Tile`.
    ///
    /// # Returns
    /// An error if `data` isn't shaped like `extent`.
    pub fn new(extent: TileExtent, data: ArrayD<f32>) -> Result<Self> {
        if data.shape() != extent.shape().as_slice() {
            return Err(EngineErr::ShapeMismatch {
                op: "tile",
                lhs: data.shape().to_vec(),
                rhs: extent.shape(),
            });
        }

        Ok(Self { extent, data })
    }

    pub fn extent(&self) -> &TileExtent {
        &self.extent
    }

    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }
}

/// An immutable, tiled, materialised array.
///
/// Cloning is cheap: tiles are shared.
#[derive(Debug, Clone)]
pub struct DistArray {
    shape: Vec<usize>,
    tiles: Arc<[Tile]>,
}

impl DistArray {
    /// Assembles a `DistArray` from tiles that partition `shape`.
    pub(crate) fn from_tiles(shape: Vec<usize>, tiles: Vec<Tile>) -> Self {
        Self {
            shape,
            tiles: Arc::from(tiles),
        }
    }

    /// Splits a dense array into tiles following the context's tiling.
    ///
    /// # Arguments
    /// * `ctx` - The engine context, dictates the tile size.
    /// * `data` - The dense array.
    pub fn from_array(ctx: &Context, data: ArrayD<f32>) -> Self {
        let shape = data.shape().to_vec();
        let extents = tiling::split(&shape, ctx.tile_size());

        let tiles = ctx.install(|| {
            extents
                .into_par_iter()
                .map(|extent| {
                    let data = view(&data, &extent).to_owned();
                    Tile { extent, data }
                })
                .collect()
        });

        Self::from_tiles(shape, tiles)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Returns the amount of elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn num_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// Copies a region of the array, gathering it from every tile it overlaps.
    ///
    /// # Arguments
    /// * `extent` - The region to copy, must belong to an array shaped like this one.
    ///
    /// # Returns
    /// A dense array shaped like `extent`.
    pub fn fetch(&self, extent: &TileExtent) -> Result<ArrayD<f32>> {
        if extent.array_shape() != self.shape.as_slice() {
            return Err(EngineErr::ShapeMismatch {
                op: "fetch",
                lhs: extent.array_shape().to_vec(),
                rhs: self.shape.clone(),
            });
        }

        Ok(self.gather(extent))
    }

    /// Gathers the whole array into a dense one.
    pub fn glom(&self) -> ArrayD<f32> {
        self.gather(&TileExtent::full(&self.shape))
    }

    fn gather(&self, extent: &TileExtent) -> ArrayD<f32> {
        if let Some(tile) = self.tiles.iter().find(|t| &t.extent == extent) {
            return tile.data.clone();
        }

        let mut out = ArrayD::zeros(IxDyn(&extent.shape()));
        if out.is_empty() {
            return out;
        }

        for tile in self.tiles.iter() {
            let Some(overlap) = tile.extent.intersection(extent) else {
                continue;
            };

            let src = view(&tile.data, &overlap.offset_from(&tile.extent));
            view_mut(&mut out, &overlap.offset_from(extent)).assign(&src);
        }

        out
    }
}

/// Views the region `extent` of `data`, `extent` being local to `data`.
pub(crate) fn view<'a>(data: &'a ArrayD<f32>, extent: &TileExtent) -> ArrayViewD<'a, f32> {
    let slices = extent.to_slice();
    data.slice_each_axis(|ax: AxisDescription| slices[ax.axis.index()])
}

/// Mutable counterpart of `view`.
pub(crate) fn view_mut<'a>(
    data: &'a mut ArrayD<f32>,
    extent: &TileExtent,
) -> ArrayViewMutD<'a, f32> {
    let slices: Vec<Slice> = extent.to_slice();
    data.slice_each_axis_mut(|ax: AxisDescription| slices[ax.axis.index()])
}

#[cfg(test)]
mod tests {
    use ndarray::{Array, ArrayD, IxDyn};

    use super::*;
    use crate::EngineConfig;

    fn ctx(tile_size: usize) -> Context {
        Context::new(EngineConfig::default().with_tile_size(tile_size).with_seed(7)).unwrap()
    }

    fn range(shape: &[usize]) -> ArrayD<f32> {
        let n: usize = shape.iter().product();
        Array::from_shape_vec(IxDyn(shape), (0..n).map(|i| i as f32).collect()).unwrap()
    }

    #[test]
    fn round_trips_through_tiles() {
        let ctx = ctx(7);
        let data = range(&[6, 5]);
        let arr = DistArray::from_array(&ctx, data.clone());

        assert!(arr.num_tiles() > 1);
        assert_eq!(arr.glom(), data);
    }

    #[test]
    fn fetch_spans_tile_boundaries() {
        let ctx = ctx(4);
        let data = range(&[8, 8]);
        let arr = DistArray::from_array(&ctx, data.clone());

        let extent = TileExtent::new(vec![1, 3], vec![6, 7], vec![8, 8]).unwrap();
        let region = arr.fetch(&extent).unwrap();

        assert_eq!(region.shape(), &[5, 4]);
        assert_eq!(region, view(&data, &extent).to_owned());
    }

    #[test]
    fn fetch_rejects_foreign_extent() {
        let ctx = ctx(4);
        let arr = DistArray::from_array(&ctx, range(&[4, 4]));
        let extent = TileExtent::full(&[4, 5]);
        assert!(arr.fetch(&extent).is_err());
    }

    #[test]
    fn zero_dimensional_array() {
        let ctx = ctx(4);
        let data = ndarray::arr0(3.5f32).into_dyn();
        let arr = DistArray::from_array(&ctx, data.clone());

        assert_eq!(arr.num_tiles(), 1);
        assert_eq!(arr.len(), 1);
        assert_eq!(arr.glom(), data);
    }

    #[test]
    fn tile_rejects_mismatched_data() {
        let res = Tile::new(TileExtent::full(&[2, 2]), range(&[2, 3]));
        assert!(res.is_err());
    }
}
