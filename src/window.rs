//! Window algebra
//!
//! A [`Window`] is a half-open rectangle in pixel space, `rows
//! row_start..row_stop` by `cols col_start..col_stop`. Edges may be
//! fractional (for example when projected from world bounds) and may lie
//! outside a dataset's extent. [`Window::round`] snaps edges to whole
//! pixels before a window is handed to a codec.

use std::fmt;
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::transform::Affine;

/// Edges within this distance of a whole pixel are treated as whole
/// before floor/ceil, absorbing float noise from projected bounds.
const ROUND_PRECISION: f64 = 1e-6;

/// World-space bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl Bounds {
    pub fn new(left: f64, bottom: f64, right: f64, top: f64) -> Self {
        Self { left, bottom, right, top }
    }

    fn from_points(points: &[(f64, f64)]) -> Self {
        let mut bounds = Bounds::new(f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for &(x, y) in points {
            bounds.left = bounds.left.min(x);
            bounds.right = bounds.right.max(x);
            bounds.bottom = bounds.bottom.min(y);
            bounds.top = bounds.top.max(y);
        }
        bounds
    }
}

/// Rounding applied to each window edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOp {
    Floor,
    Ceil,
    Nearest,
}

impl RoundOp {
    fn apply(self, value: f64) -> f64 {
        let nearest = value.round();
        let value = if (value - nearest).abs() < ROUND_PRECISION { nearest } else { value };
        match self {
            RoundOp::Floor => value.floor(),
            RoundOp::Ceil => value.ceil(),
            RoundOp::Nearest => value.round(),
        }
    }
}

/// Rectangular region of a pixel grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    row_start: f64,
    row_stop: f64,
    col_start: f64,
    col_stop: f64,
}

impl Window {
    /// Creates a window, rejecting inverted or non-finite edges
    pub fn new(row_start: f64, row_stop: f64, col_start: f64, col_stop: f64) -> Result<Self> {
        let edges = [row_start, row_stop, col_start, col_stop];
        if edges.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidWindow(format!("non-finite edge in {:?}", edges)));
        }
        if row_start > row_stop {
            return Err(Error::InvalidWindow(format!("row range ({}, {})", row_start, row_stop)));
        }
        if col_start > col_stop {
            return Err(Error::InvalidWindow(format!("col range ({}, {})", col_start, col_stop)));
        }
        Ok(Self { row_start, row_stop, col_start, col_stop })
    }

    /// Creates a window from an upper left offset and a size
    pub fn from_offsets(col_off: f64, row_off: f64, width: f64, height: f64) -> Result<Self> {
        Self::new(row_off, row_off + height, col_off, col_off + width)
    }

    /// The window covering a whole `height` x `width` grid
    pub fn full(height: usize, width: usize) -> Self {
        Self {
            row_start: 0.0,
            row_stop: height as f64,
            col_start: 0.0,
            col_stop: width as f64,
        }
    }

    /// Evaluates slice-style ranges against a grid size
    ///
    /// `None` means the start (or end) of the axis and negative values count
    /// back from the end, so `(Some(-10), None)` is the last ten rows.
    pub fn from_slices(
        rows: (Option<i64>, Option<i64>),
        cols: (Option<i64>, Option<i64>),
        height: usize,
        width: usize,
    ) -> Result<Self> {
        fn eval(bound: Option<i64>, default: i64, size: i64) -> i64 {
            match bound {
                None => default,
                Some(v) if v < 0 => v + size,
                Some(v) => v,
            }
        }
        let (h, w) = (height as i64, width as i64);
        let r0 = eval(rows.0, 0, h);
        let r1 = eval(rows.1, h, h);
        let c0 = eval(cols.0, 0, w);
        let c1 = eval(cols.1, w, w);
        Self::new(r0 as f64, r1 as f64, c0 as f64, c1 as f64)
    }

    /// Projects world `bounds` into fractional pixel space through the
    /// inverse of `transform`
    pub fn from_bounds(bounds: &Bounds, transform: &Affine) -> Result<Self> {
        let inverse = transform.invert()?;
        let corners = [
            inverse.apply(bounds.left, bounds.top),
            inverse.apply(bounds.right, bounds.top),
            inverse.apply(bounds.left, bounds.bottom),
            inverse.apply(bounds.right, bounds.bottom),
        ];
        let pixel = Bounds::from_points(&corners);
        Self::new(pixel.bottom, pixel.top, pixel.left, pixel.right)
    }

    pub fn row_start(&self) -> f64 {
        self.row_start
    }

    pub fn row_stop(&self) -> f64 {
        self.row_stop
    }

    pub fn col_start(&self) -> f64 {
        self.col_start
    }

    pub fn col_stop(&self) -> f64 {
        self.col_stop
    }

    pub fn col_off(&self) -> f64 {
        self.col_start
    }

    pub fn row_off(&self) -> f64 {
        self.row_start
    }

    pub fn width(&self) -> f64 {
        self.col_stop - self.col_start
    }

    pub fn height(&self) -> f64 {
        self.row_stop - self.row_start
    }

    /// True for zero-area windows
    pub fn is_empty(&self) -> bool {
        self.width() == 0.0 || self.height() == 0.0
    }

    /// True when all edges are whole pixels
    pub fn is_integral(&self) -> bool {
        [self.row_start, self.row_stop, self.col_start, self.col_stop]
            .iter()
            .all(|v| v.fract() == 0.0)
    }

    /// Applies `op` to each edge independently
    ///
    /// If rounding would invert an edge pair the stop edge is clamped to the
    /// start, producing a zero-width window.
    pub fn round(&self, op: RoundOp) -> Window {
        self.round_edges(op, op)
    }

    /// Floors start edges and ceils stop edges, never shrinking the window
    pub fn round_outward(&self) -> Window {
        self.round_edges(RoundOp::Floor, RoundOp::Ceil)
    }

    fn round_edges(&self, start_op: RoundOp, stop_op: RoundOp) -> Window {
        let row_start = start_op.apply(self.row_start);
        let col_start = start_op.apply(self.col_start);
        Window {
            row_start,
            row_stop: stop_op.apply(self.row_stop).max(row_start),
            col_start,
            col_stop: stop_op.apply(self.col_stop).max(col_start),
        }
    }

    pub fn intersects(&self, other: &Window) -> bool {
        self.row_start.max(other.row_start) <= self.row_stop.min(other.row_stop)
            && self.col_start.max(other.col_start) <= self.col_stop.min(other.col_stop)
    }

    /// The overlapping region; windows that only touch give a zero-area result
    pub fn intersection(&self, other: &Window) -> Result<Window> {
        if !self.intersects(other) {
            return Err(Error::DisjointWindows);
        }
        Ok(Window {
            row_start: self.row_start.max(other.row_start),
            row_stop: self.row_stop.min(other.row_stop),
            col_start: self.col_start.max(other.col_start),
            col_stop: self.col_stop.min(other.col_stop),
        })
    }

    /// The outermost extent covered by both windows
    pub fn union(&self, other: &Window) -> Window {
        Window {
            row_start: self.row_start.min(other.row_start),
            row_stop: self.row_stop.max(other.row_stop),
            col_start: self.col_start.min(other.col_start),
            col_stop: self.col_stop.max(other.col_stop),
        }
    }

    /// True when `other` lies entirely within this window
    pub fn contains(&self, other: &Window) -> bool {
        other.row_start >= self.row_start
            && other.row_stop <= self.row_stop
            && other.col_start >= self.col_start
            && other.col_stop <= self.col_stop
    }

    /// Clamps every edge into a `height` x `width` grid
    pub fn crop(&self, height: usize, width: usize) -> Window {
        let (h, w) = (height as f64, width as f64);
        let row_start = self.row_start.clamp(0.0, h);
        let col_start = self.col_start.clamp(0.0, w);
        Window {
            row_start,
            row_stop: self.row_stop.clamp(0.0, h).max(row_start),
            col_start,
            col_stop: self.col_stop.clamp(0.0, w).max(col_start),
        }
    }

    /// Transform of the sub-grid this window selects from a grid georeferenced
    /// by `transform`
    pub fn transform(&self, transform: &Affine) -> Affine {
        transform.compose(&Affine::translation(self.col_start, self.row_start))
    }

    /// World bounds of this window
    pub fn bounds(&self, transform: &Affine) -> Bounds {
        Bounds::from_points(&[
            transform.apply(self.col_start, self.row_start),
            transform.apply(self.col_stop, self.row_start),
            transform.apply(self.col_start, self.row_stop),
            transform.apply(self.col_stop, self.row_stop),
        ])
    }

    /// Output shape `(rows, cols)` of a boundless read of this window
    pub fn boundless_shape(&self) -> (usize, usize) {
        (self.height().round() as usize, self.width().round() as usize)
    }

    /// Integer row and column ranges, if the window is integral and non-negative
    pub fn to_ranges(&self) -> Option<(std::ops::Range<usize>, std::ops::Range<usize>)> {
        if !self.is_integral() || self.row_start < 0.0 || self.col_start < 0.0 {
            return None;
        }
        Some((
            self.row_start as usize..self.row_stop as usize,
            self.col_start as usize..self.col_stop as usize,
        ))
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Window(rows {}..{}, cols {}..{})",
            self.row_start, self.row_stop, self.col_start, self.col_stop
        )
    }
}

/// Innermost extent covered by all `windows`
pub fn intersection(windows: &[Window]) -> Result<Window> {
    let (first, rest) = windows
        .split_first()
        .ok_or_else(|| Error::InvalidWindow("no windows to intersect".to_string()))?;
    rest.iter().try_fold(*first, |acc, w| acc.intersection(w))
}

/// Outermost extent covered by any of `windows`
pub fn union(windows: &[Window]) -> Option<Window> {
    let (first, rest) = windows.split_first()?;
    Some(rest.iter().fold(*first, |acc, w| acc.union(w)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn win(r0: f64, r1: f64, c0: f64, c1: f64) -> Window {
        Window::new(r0, r1, c0, c1).unwrap()
    }

    #[test]
    fn test_new_rejects_inverted() {
        assert!(matches!(Window::new(5.0, 4.0, 0.0, 1.0), Err(Error::InvalidWindow(_))));
        assert!(Window::new(0.0, 1.0, 3.0, 2.0).is_err());
        assert!(Window::new(0.0, f64::NAN, 0.0, 1.0).is_err());
        assert!(Window::new(2.0, 2.0, 0.0, 0.0).unwrap().is_empty());
    }

    #[test]
    fn test_from_bounds_fractional() {
        let t = Affine::from_bounds(0.0, 100.0, 2.0, 2.0);
        let w = Window::from_bounds(&Bounds::new(3.0, 89.0, 8.0, 97.0), &t).unwrap();
        assert_eq!(w, win(1.5, 5.5, 1.5, 4.0));
    }

    #[test]
    fn test_from_bounds_singular() {
        let t = Affine::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        let result = Window::from_bounds(&Bounds::new(0.0, 0.0, 1.0, 1.0), &t);
        assert!(matches!(result, Err(Error::SingularTransform(_))));
    }

    #[test]
    fn test_round_ops() {
        let w = win(1.5, 5.5, 1.2, 3.7);
        assert_eq!(w.round(RoundOp::Floor), win(1.0, 5.0, 1.0, 3.0));
        assert_eq!(w.round(RoundOp::Ceil), win(2.0, 6.0, 2.0, 4.0));
        assert_eq!(w.round(RoundOp::Nearest), win(2.0, 6.0, 1.0, 4.0));
        assert_eq!(w.round_outward(), win(1.0, 6.0, 1.0, 4.0));
    }

    #[test]
    fn test_round_clamps_inverted_pair() {
        let w = win(1.2, 1.8, 0.0, 4.0);
        let rounded = w.round_edges(RoundOp::Ceil, RoundOp::Floor);
        assert_eq!(rounded.row_start(), 2.0);
        assert_eq!(rounded.row_stop(), 2.0);
        assert!(rounded.is_empty());
    }

    #[test]
    fn test_round_absorbs_float_noise() {
        let w = win(0.0, 299.99999999, 0.0, 100.0000000001);
        assert_eq!(w.round_outward(), win(0.0, 300.0, 0.0, 100.0));
    }

    #[test]
    fn test_intersection() {
        let a = win(0.0, 10.0, 0.0, 10.0);
        let b = win(5.0, 15.0, 2.0, 4.0);
        assert_eq!(a.intersection(&b).unwrap(), win(5.0, 10.0, 2.0, 4.0));
    }

    #[test]
    fn test_intersection_touching_is_zero_area() {
        let a = win(0.0, 10.0, 0.0, 10.0);
        let b = win(10.0, 20.0, 0.0, 10.0);
        let touching = a.intersection(&b).unwrap();
        assert!(touching.is_empty());
        assert_eq!(touching.height(), 0.0);
    }

    #[test]
    fn test_intersection_disjoint() {
        let a = win(0.0, 10.0, 0.0, 10.0);
        let b = win(11.0, 20.0, 0.0, 10.0);
        assert!(matches!(a.intersection(&b), Err(Error::DisjointWindows)));
        assert!(intersection(&[a, win(0.0, 5.0, 0.0, 5.0), b]).is_err());
    }

    #[test]
    fn test_union() {
        let u = union(&[win(0.0, 1.0, 0.0, 1.0), win(5.0, 6.0, -2.0, 0.5)]).unwrap();
        assert_eq!(u, win(0.0, 6.0, -2.0, 1.0));
        assert!(union(&[]).is_none());
    }

    #[test]
    fn test_contains_and_crop() {
        let full = Window::full(100, 200);
        assert!(full.contains(&win(10.0, 20.0, 30.0, 40.0)));
        assert!(!full.contains(&win(-1.0, 20.0, 30.0, 40.0)));
        assert_eq!(win(-5.0, 120.0, 190.0, 260.0).crop(100, 200), win(0.0, 100.0, 190.0, 200.0));
        assert!(win(150.0, 160.0, 0.0, 10.0).crop(100, 200).is_empty());
    }

    #[test]
    fn test_transform_consistency() {
        let t = Affine::new(300.04, 0.0, 101985.0, 0.0, -300.04, 2826915.0);
        for w in [win(300.0, 400.0, 200.0, 400.0), win(-3.0, 2.0, -7.5, 1.0)] {
            let wt = w.transform(&t);
            assert_eq!(wt.apply(0.0, 0.0), t.apply(w.col_start(), w.row_start()));
        }
    }

    #[test]
    fn test_bounds_round_trip() {
        let t = Affine::from_bounds(100.0, 200.0, 2.0, 2.0);
        let w = win(10.0, 20.0, 5.0, 15.0);
        let b = w.bounds(&t);
        assert_eq!(b, Bounds::new(110.0, 160.0, 130.0, 180.0));
        assert_eq!(Window::from_bounds(&b, &t).unwrap(), w);
    }

    #[test]
    fn test_boundless_shape() {
        assert_eq!(win(-10.0, 5.0, 790.0, 800.0).boundless_shape(), (15, 10));
        assert_eq!(win(3.0, 3.0, 0.0, 1.0).boundless_shape(), (0, 1));
    }

    #[test]
    fn test_from_slices_negative() {
        let w = Window::from_slices((Some(-10), None), (None, Some(-1)), 100, 50).unwrap();
        assert_eq!(w, win(90.0, 100.0, 0.0, 49.0));
        assert!(Window::from_slices((Some(5), Some(2)), (None, None), 10, 10).is_err());
    }

    #[test]
    fn test_to_ranges() {
        assert_eq!(win(1.0, 3.0, 2.0, 4.0).to_ranges(), Some((1..3, 2..4)));
        assert_eq!(win(1.5, 3.0, 2.0, 4.0).to_ranges(), None);
        assert_eq!(win(-1.0, 3.0, 2.0, 4.0).to_ranges(), None);
    }
}
