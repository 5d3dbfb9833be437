//! Logical geometry primitives.

use std::cmp;
use std::fmt::{self, Display, Formatter};

/// Point in logical display coordinates.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

/// Size in logical display coordinates.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Size {
    pub w: i32,
    pub h: i32,
}

impl Size {
    pub const fn new(w: i32, h: i32) -> Self {
        Self { w, h }
    }

    /// Swap width and height.
    pub fn transposed(self) -> Self {
        Self { w: self.h, h: self.w }
    }
}

impl From<(i32, i32)> for Size {
    fn from((w, h): (i32, i32)) -> Self {
        Self { w, h }
    }
}

/// Axis-aligned rectangle in logical display coordinates.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub loc: Point,
    pub size: Size,
}

impl Rect {
    pub fn new(loc: impl Into<Point>, size: impl Into<Size>) -> Self {
        Self { loc: loc.into(), size: size.into() }
    }

    /// Rectangle at the origin.
    pub fn from_size(size: impl Into<Size>) -> Self {
        Self { loc: Point::default(), size: size.into() }
    }

    /// Left edge.
    pub fn left(&self) -> i32 {
        self.loc.x
    }

    /// Top edge.
    pub fn top(&self) -> i32 {
        self.loc.y
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i32 {
        self.loc.x + self.size.w
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i32 {
        self.loc.y + self.size.h
    }

    /// Check for a degenerate rectangle.
    pub fn is_empty(&self) -> bool {
        self.size.w <= 0 || self.size.h <= 0
    }

    /// Check if a point falls inside this rectangle.
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.left()
            && point.x < self.right()
            && point.y >= self.top()
            && point.y < self.bottom()
    }

    /// Overlap between two rectangles.
    pub fn intersection(&self, other: Rect) -> Option<Rect> {
        let left = cmp::max(self.left(), other.left());
        let top = cmp::max(self.top(), other.top());
        let right = cmp::min(self.right(), other.right());
        let bottom = cmp::min(self.bottom(), other.bottom());

        if left >= right || top >= bottom {
            return None;
        }

        Some(Rect::new((left, top), (right - left, bottom - top)))
    }

    /// Shrink each edge by the supplied insets, clamping to empty.
    pub fn inset(&self, insets: Insets) -> Rect {
        let left = self.left() + insets.left;
        let top = self.top() + insets.top;
        let width = cmp::max(0, self.size.w - insets.left - insets.right);
        let height = cmp::max(0, self.size.h - insets.top - insets.bottom);
        Rect::new((left, top), (width, height))
    }

    /// Insets of an inner rectangle relative to this one.
    pub fn insets_of(&self, inner: Rect) -> Insets {
        Insets {
            left: inner.left() - self.left(),
            top: inner.top() - self.top(),
            right: self.right() - inner.right(),
            bottom: self.bottom() - inner.bottom(),
        }
    }
}

impl Display for Rect {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{} {}x{}]", self.loc.x, self.loc.y, self.size.w, self.size.h)
    }
}

/// Per-edge logical insets.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Insets {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Insets {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    /// Per-edge maximum of two inset sets.
    pub fn max(self, other: Insets) -> Insets {
        Insets {
            left: cmp::max(self.left, other.left),
            top: cmp::max(self.top, other.top),
            right: cmp::max(self.right, other.right),
            bottom: cmp::max(self.bottom, other.bottom),
        }
    }

    /// Rotate the insets counter-clockwise with the display content.
    pub fn rotated(self, rotation: Rotation) -> Insets {
        match rotation {
            Rotation::Rotation0 => self,
            Rotation::Rotation90 => Insets::new(self.top, self.right, self.bottom, self.left),
            Rotation::Rotation180 => Insets::new(self.right, self.bottom, self.left, self.top),
            Rotation::Rotation270 => Insets::new(self.bottom, self.left, self.top, self.right),
        }
    }
}

/// Display content rotation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Rotation {
    /// Natural orientation.
    #[default]
    Rotation0,

    /// Rotated 90° counter-clockwise.
    Rotation90,

    /// Upside down.
    Rotation180,

    /// Rotated 270° counter-clockwise.
    Rotation270,
}

impl Rotation {
    /// Check if the rotation swaps display width and height.
    pub fn is_sideways(self) -> bool {
        matches!(self, Rotation::Rotation90 | Rotation::Rotation270)
    }
}
