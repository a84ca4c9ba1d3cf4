use std::ops::Range;

use crate::extent::TileExtent;

/// Splits `total` elements in `parts` contiguous ranges and returns the `idx`-th one.
///
/// Ranges are disjoint, cover `0..total` and their sizes differ by at most 1.
pub fn balanced_range(total: usize, idx: usize, parts: usize) -> Range<usize> {
    let base = total / parts;
    let rem = total % parts;

    let start = idx * base + idx.min(rem);
    let extra = usize::from(idx < rem);
    start..start + base + extra
}

/// Partitions an array of `shape` into a row-major grid of tiles holding at most `max_elems`
/// elements each.
///
/// The axis with the longest tile side is split in two until the tiles are small enough, so
/// tiles stay roughly square. An axis is never split below one element per tile.
pub fn split(shape: &[usize], max_elems: usize) -> Vec<TileExtent> {
    let max_elems = max_elems.max(1);
    let mut parts = vec![1usize; shape.len()];

    let side = |axis: usize, parts: &[usize]| shape[axis].div_ceil(parts[axis]);

    loop {
        let tile_elems: usize = (0..shape.len()).map(|axis| side(axis, &parts)).product();
        if tile_elems <= max_elems {
            break;
        }

        let Some(axis) = (0..shape.len())
            .filter(|&axis| side(axis, &parts) > 1)
            .max_by_key(|&axis| (side(axis, &parts), usize::MAX - axis))
        else {
            break;
        };

        parts[axis] = (parts[axis] * 2).min(shape[axis]);
    }

    let ranges: Vec<Vec<Range<usize>>> = (0..shape.len())
        .map(|axis| {
            (0..parts[axis])
                .map(|idx| balanced_range(shape[axis], idx, parts[axis]))
                .collect()
        })
        .collect();

    let mut extents = Vec::with_capacity(parts.iter().product());
    let mut cursor = vec![0usize; shape.len()];

    loop {
        let ul = (0..shape.len()).map(|a| ranges[a][cursor[a]].start).collect();
        let lr = (0..shape.len()).map(|a| ranges[a][cursor[a]].end).collect();
        extents.push(TileExtent::from_parts(ul, lr, shape.to_vec()));

        // row-major odometer
        let mut axis = shape.len();
        loop {
            if axis == 0 {
                return extents;
            }

            axis -= 1;
            cursor[axis] += 1;
            if cursor[axis] < parts[axis] {
                break;
            }

            cursor[axis] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covered(shape: &[usize], tiles: &[TileExtent]) -> Vec<usize> {
        let mut hits = vec![0; shape.iter().product()];
        for tile in tiles {
            let tile_shape = tile.shape();
            for local in 0..tile.size() {
                let idx = crate::extent::unravelled_pos(local, &tile_shape);
                let global: Vec<_> = idx.iter().zip(tile.ul()).map(|(i, u)| i + u).collect();
                hits[crate::extent::ravelled_pos(&global, shape)] += 1;
            }
        }

        hits
    }

    #[test]
    fn balanced_ranges() {
        assert_eq!(balanced_range(10, 0, 3), 0..4);
        assert_eq!(balanced_range(10, 1, 3), 4..7);
        assert_eq!(balanced_range(10, 2, 3), 7..10);
    }

    #[test]
    fn small_array_is_a_single_tile() {
        let tiles = split(&[3, 4], 100);
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0], TileExtent::full(&[3, 4]));
    }

    #[test]
    fn tiles_are_bounded_disjoint_and_cover() {
        let shape = [100, 50];
        let tiles = split(&shape, 500);

        assert!(tiles.len() > 1);
        assert!(tiles.iter().all(|t| t.size() <= 500));
        assert!(covered(&shape, &tiles).iter().all(|&h| h == 1));
    }

    #[test]
    fn ragged_shapes_are_covered() {
        let shape = [7, 13, 3];
        let tiles = split(&shape, 10);

        assert!(tiles.iter().all(|t| t.size() <= 10));
        assert!(covered(&shape, &tiles).iter().all(|&h| h == 1));
    }

    #[test]
    fn rows_longer_than_the_limit_are_split() {
        let tiles = split(&[1, 1000], 100);
        assert!(tiles.len() >= 10);
        assert!(tiles.iter().all(|t| t.size() <= 100));
    }

    #[test]
    fn zero_dimensional_and_empty_arrays() {
        assert_eq!(split(&[], 4).len(), 1);

        let tiles = split(&[0, 5], 4);
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].size(), 0);
    }
}
