//! K-dimensional hyperrectangles and the 1-D/2-D decompositions used to map
//! flat byte ranges and matrix tiles onto the ruled plane the coherency and
//! dependency trees index (§4.1).

use std::cmp::{max, min};

/// A half-open integer interval `[a, b)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    pub a: i64,
    pub b: i64,
}

impl Interval {
    pub const fn new(a: i64, b: i64) -> Self {
        Interval { a, b }
    }

    pub fn is_empty(&self) -> bool {
        self.b <= self.a
    }

    pub fn len(&self) -> i64 {
        (self.b - self.a).max(0)
    }

    pub fn intersects(&self, other: &Interval) -> bool {
        self.a < other.b && other.a < self.b
    }

    pub fn includes(&self, other: &Interval) -> bool {
        !other.is_empty() && self.a <= other.a && other.b <= self.b
    }

    pub fn intersection(&self, other: &Interval) -> Interval {
        Interval::new(max(self.a, other.a), min(self.b, other.b))
    }

    /// Splits into two halves at the midpoint (the low half gets the
    /// extra unit on an odd length), used by moldable task splitting
    /// (§4.7: `access::split(mode=halves)`).
    pub fn split_half(&self) -> (Interval, Interval) {
        let mid = self.a + (self.b - self.a + 1) / 2;
        (Interval::new(self.a, mid), Interval::new(mid, self.b))
    }

    /// Signed distance along this axis between two disjoint intervals: 0 if
    /// they touch or overlap, otherwise the gap between them.
    pub fn distance(&self, other: &Interval) -> i64 {
        if self.b <= other.a {
            other.a - self.b
        } else if other.b <= self.a {
            self.a - other.b
        } else {
            0
        }
    }
}

/// A K-tuple of half-open integer intervals: the Cartesian product forming
/// an axis-aligned hyperrectangle. Axis 0 is always the byte/row axis for
/// the ruled-plane rects used by §4.1's decompositions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hyperrect<const K: usize> {
    pub axes: [Interval; K],
}

impl<const K: usize> Hyperrect<K> {
    pub fn new(axes: [Interval; K]) -> Self {
        Hyperrect { axes }
    }

    /// Non-empty iff every axis interval is non-empty.
    pub fn is_empty(&self) -> bool {
        self.axes.iter().any(Interval::is_empty)
    }

    pub fn intersects(&self, other: &Hyperrect<K>) -> bool {
        self.axes
            .iter()
            .zip(other.axes.iter())
            .all(|(a, b)| a.intersects(b))
    }

    pub fn includes(&self, other: &Hyperrect<K>) -> bool {
        self.axes
            .iter()
            .zip(other.axes.iter())
            .all(|(a, b)| a.includes(b))
    }

    pub fn intersection(&self, other: &Hyperrect<K>) -> Hyperrect<K> {
        let mut axes = self.axes;
        for (a, (sa, oa)) in axes.iter_mut().zip(self.axes.iter().zip(other.axes.iter())) {
            *a = sa.intersection(oa);
        }
        Hyperrect::new(axes)
    }

    /// Axis-wise signed distance between two (presumed disjoint along at
    /// least one axis) hyperrects.
    pub fn distance_manhattan(&self, other: &Hyperrect<K>) -> i64 {
        self.axes
            .iter()
            .zip(other.axes.iter())
            .map(|(a, b)| a.distance(b).abs())
            .sum()
    }
}

pub type Rect2 = Hyperrect<2>;

impl Rect2 {
    pub fn new2(row: Interval, col: Interval) -> Rect2 {
        Hyperrect::new([row, col])
    }

    pub fn row(&self) -> Interval {
        self.axes[0]
    }

    pub fn col(&self) -> Interval {
        self.axes[1]
    }
}

/// A flat `[a, a+size)` byte range ruled over a `(ld * sizeof_elem)`-wide
/// plane, as at most three 2-D rects: a head partial row, a full-width
/// middle band, and a tail partial row. Any of the three may be empty.
///
/// `ld` is the leading dimension in elements, `s` is `sizeof_elem`. Axis 0
/// of the resulting rects is the byte offset within a row; axis 1 is the
/// row index.
pub fn interval_to_rects(a: i64, size: i64, ld: i64, s: i64) -> [Rect2; 3] {
    assert!(size > 0 && ld > 0 && s > 0);
    let row_bytes = ld * s;
    let b = a + size;

    let row0 = a / row_bytes;
    let off0 = a % row_bytes;
    let row_last = (b - 1) / row_bytes;
    let off_last_end = b - row_last * row_bytes;

    if row0 == row_last {
        // Entirely within a single row: just a head rect.
        let head = Rect2::new2(Interval::new(off0, off_last_end), Interval::new(row0, row0 + 1));
        return [head, empty_rect2(), empty_rect2()];
    }

    let head = if off0 == 0 {
        empty_rect2()
    } else {
        Rect2::new2(Interval::new(off0, row_bytes), Interval::new(row0, row0 + 1))
    };

    let middle_start = if off0 == 0 { row0 } else { row0 + 1 };
    let middle = if middle_start < row_last {
        Rect2::new2(Interval::new(0, row_bytes), Interval::new(middle_start, row_last))
    } else {
        empty_rect2()
    };

    let tail = if off_last_end == row_bytes {
        empty_rect2()
    } else {
        Rect2::new2(Interval::new(0, off_last_end), Interval::new(row_last, row_last + 1))
    };

    [head, middle, tail]
}

fn empty_rect2() -> Rect2 {
    Rect2::new2(Interval::new(0, 0), Interval::new(0, 0))
}

/// A 2-D matrix tile as described in §3: a column-major view of `m` rows by
/// `n` columns of `sizeof_elem`-sized elements, living at byte `base +
/// offset_m*s + offset_n*ld*s`, with leading dimension `ld` (elements).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixTile {
    pub base: i64,
    pub ld: i64,
    pub s: i64,
    pub offset_m: i64,
    pub offset_n: i64,
    pub m: i64,
    pub n: i64,
}

impl MatrixTile {
    /// Byte address of the upper-left corner of the tile.
    pub fn addr(&self) -> i64 {
        self.base + self.offset_m * self.s + self.offset_n * self.ld * self.s
    }

    fn row_bytes(&self) -> i64 {
        self.ld * self.s
    }
}

/// `matrix_to_rects`: a tile fits in a single band of the ruled plane iff
/// `(addr mod ld*s) + m*s <= ld*s`; otherwise it wraps and is represented
/// as a left-of-wrap and a right-of-wrap rect.
pub fn matrix_to_rects(t: &MatrixTile) -> [Rect2; 2] {
    assert!(t.m > 0 && t.n > 0 && t.s > 0 && t.ld > 0);
    let row_bytes = t.row_bytes();
    let addr = t.addr();
    let off = addr.rem_euclid(row_bytes);
    let row0 = addr.div_euclid(row_bytes);
    let width = t.m * t.s;

    if off + width <= row_bytes {
        let r = Rect2::new2(Interval::new(off, off + width), Interval::new(row0, row0 + t.n));
        [r, empty_rect2()]
    } else {
        let left = Rect2::new2(Interval::new(off, row_bytes), Interval::new(row0, row0 + t.n));
        let right_width = width - (row_bytes - off);
        let right = Rect2::new2(Interval::new(0, right_width), Interval::new(row0 + 1, row0 + 1 + t.n));
        [left, right]
    }
}

/// Inverse of the single-rect branch of `matrix_to_rects`.
pub fn matrix_from_rect(r: &Rect2, ld: i64, s: i64) -> MatrixTile {
    let row0 = r.col().a;
    let off = r.row().a;
    MatrixTile {
        base: 0,
        ld,
        s,
        offset_m: off / s,
        offset_n: row0,
        m: r.row().len() / s,
        n: r.col().len(),
    }
}

/// Inverse of the wrapping branch of `matrix_to_rects`: merges a
/// left-of-wrap and right-of-wrap rect pair back into one tile.
pub fn matrix_from_rects(r0: &Rect2, r1: &Rect2, ld: i64, s: i64) -> MatrixTile {
    if r1.is_empty() {
        return matrix_from_rect(r0, ld, s);
    }
    let row_bytes = ld * s;
    let row0 = r0.col().a;
    let off = r0.row().a;
    let width = (row_bytes - off) + r1.row().len();
    MatrixTile {
        base: 0,
        ld,
        s,
        offset_m: off / s,
        offset_n: row0,
        m: width / s,
        n: r0.col().len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_single_row() {
        let rs = interval_to_rects(4, 10, 100, 1);
        assert!(!rs[0].is_empty());
        assert!(rs[1].is_empty());
        assert!(rs[2].is_empty());
        assert_eq!(rs[0].row(), Interval::new(4, 14));
        assert_eq!(rs[0].col(), Interval::new(0, 1));
    }

    #[test]
    fn interval_spans_multiple_rows_disjoint() {
        let ld = 16;
        let s = 1;
        let a = 10;
        let size = 40; // spans rows 0,1,2
        let rs = interval_to_rects(a, size, ld, s);
        let mut total = 0i64;
        for r in &rs {
            if r.is_empty() {
                continue;
            }
            total += r.row().len() * (r.col().b - r.col().a);
        }
        assert_eq!(total, size);
        // pairwise disjoint in the ruled plane
        for i in 0..3 {
            for j in (i + 1)..3 {
                if rs[i].is_empty() || rs[j].is_empty() {
                    continue;
                }
                assert!(!rs[i].intersects(&rs[j]));
            }
        }
    }

    #[test]
    fn interval_exact_row_boundaries() {
        let rs = interval_to_rects(0, 32, 16, 1);
        // exactly two full rows, head and tail both degenerate
        assert!(rs[0].is_empty());
        assert!(rs[2].is_empty());
        assert_eq!(rs[1].col(), Interval::new(0, 2));
    }

    #[test]
    fn matrix_single_band_roundtrip() {
        let t = MatrixTile {
            base: 0,
            ld: 64,
            s: 4,
            offset_m: 2,
            offset_n: 3,
            m: 10,
            n: 5,
        };
        let rects = matrix_to_rects(&t);
        assert!(rects[1].is_empty());
        let back = matrix_from_rects(&rects[0], &rects[1], t.ld, t.s);
        assert_eq!(back.offset_m, t.offset_m);
        assert_eq!(back.offset_n, t.offset_n);
        assert_eq!(back.m, t.m);
        assert_eq!(back.n, t.n);
    }

    #[test]
    fn matrix_wrapping_roundtrip() {
        let t = MatrixTile {
            base: 0,
            ld: 16,
            s: 4,
            offset_m: 12,
            offset_n: 0,
            m: 8, // 12+8=20 elems > ld=16, wraps
            n: 3,
        };
        let rects = matrix_to_rects(&t);
        assert!(!rects[1].is_empty());
        let back = matrix_from_rects(&rects[0], &rects[1], t.ld, t.s);
        assert_eq!(back.offset_m, t.offset_m);
        assert_eq!(back.offset_n, t.offset_n);
        assert_eq!(back.m, t.m);
        assert_eq!(back.n, t.n);
    }
}
