//! §4.1: a matrix tile whose row span crosses the ruled plane's row
//! boundary decomposes into two rects. `Access` only carries one region,
//! so `matrix_access` must reject such a tile instead of silently
//! tracking only its left half.

use xkrt::runtime::matrix_access;
use xkrt::{AccessMode, MatrixTile};

#[test]
#[should_panic(expected = "wraps the row boundary")]
fn wrapping_tile_is_rejected_rather_than_silently_truncated() {
    let _ = env_logger::try_init();
    // row_bytes = ld * s = 4; offset_m*s = 2, width = m*s = 4, so
    // off + width = 6 > row_bytes: this tile wraps into a second row.
    let tile = MatrixTile { base: 0, ld: 4, s: 1, offset_m: 2, offset_n: 0, m: 4, n: 2 };
    let _ = matrix_access(AccessMode::R, &tile);
}

#[test]
fn single_band_tile_is_accepted() {
    let _ = env_logger::try_init();
    // off + width = 0 + 2 <= row_bytes (4): fits in one band.
    let tile = MatrixTile { base: 0, ld: 4, s: 1, offset_m: 0, offset_n: 0, m: 2, n: 2 };
    let access = matrix_access(AccessMode::R, &tile);
    assert_eq!(access.region.row().len(), 2);
    assert_eq!(access.region.col().len(), 2);
}
