//! Desktop-space rectangles.
//!
//! Every rectangle in this crate lives in virtual desktop coordinates: the origin may be negative
//! (a display placed left of or above the primary one), the extent never is.
use std::fmt;

use crate::error::Error;

/// A rectangle in desktop coordinates with a signed origin and an unsigned extent.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Default, Hash)]
pub struct Rect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Rect {
    /// Constructs a new rectangle from its origin and extent.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Constructs a rectangle from its four edges.
    ///
    /// Returns [`Error::InvalidDesktopRect`] unless `left < right` and `top < bottom`.
    #[inline]
    pub fn from_edges(left: i32, top: i32, right: i32, bottom: i32) -> Result<Self, Error> {
        if left >= right || top >= bottom {
            return Err(Error::InvalidDesktopRect { left, top, right, bottom });
        }

        Ok(Self {
            x: left,
            y: top,
            width: right.abs_diff(left),
            height: bottom.abs_diff(top),
        })
    }

    /// Right edge (exclusive), widened so it cannot overflow.
    #[inline]
    #[must_use]
    pub const fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Bottom edge (exclusive), widened so it cannot overflow.
    #[inline]
    #[must_use]
    pub const fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Whether the rectangle covers no pixels.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the two rectangles share at least one pixel.
    ///
    /// Rectangles that only touch along an edge do not intersect.
    #[inline]
    #[must_use]
    pub const fn intersects(&self, other: &Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && (self.x as i64) < other.right()
            && (other.x as i64) < self.right()
            && (self.y as i64) < other.bottom()
            && (other.y as i64) < self.bottom()
    }

    /// Offset of this rectangle's origin relative to `target`'s origin.
    ///
    /// This is where a buffer covering `self` lands inside a destination that shows `target`.
    #[inline]
    #[must_use]
    pub const fn offset_from(&self, target: &Self) -> (i64, i64) {
        (self.x as i64 - target.x as i64, self.y as i64 - target.y as i64)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Computes the bounding union of all `rects`.
///
/// The accumulation is seeded from the first rectangle, so the union never drifts toward the
/// desktop origin when every display sits away from it.
///
/// # Errors
///
/// Returns [`Error::InvalidDesktopRect`] when `rects` is empty or the union is degenerate.
pub fn bounding_rect<I>(rects: I) -> Result<Rect, Error>
where
    I: IntoIterator<Item = Rect>,
{
    let mut rects = rects.into_iter();
    let Some(first) = rects.next() else {
        return Err(Error::InvalidDesktopRect { left: 0, top: 0, right: 0, bottom: 0 });
    };

    let mut left = i64::from(first.x);
    let mut top = i64::from(first.y);
    let mut right = first.right();
    let mut bottom = first.bottom();

    for rect in rects {
        left = left.min(i64::from(rect.x));
        top = top.min(i64::from(rect.y));
        right = right.max(rect.right());
        bottom = bottom.max(rect.bottom());
    }

    // Desktop coordinates come from 32-bit RECTs, anything outside that range is corrupt input.
    match [left, top, right, bottom].map(i32::try_from) {
        [Ok(left), Ok(top), Ok(right), Ok(bottom)] => Rect::from_edges(left, top, right, bottom),
        _ => {
            let saturate = |value: i64| value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
            Err(Error::InvalidDesktopRect {
                left: saturate(left),
                top: saturate(top),
                right: saturate(right),
                bottom: saturate(bottom),
            })
        }
    }
}
