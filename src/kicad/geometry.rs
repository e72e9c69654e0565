//! Coordinates, placements and the library-to-document transform.
//!
//! # Coordinate Systems
//!
//! Schematic and board documents use millimetres with Y pointing down.
//! Symbol libraries draw with Y pointing up, so every library-local offset is
//! flipped before rotation, mirroring and translation are applied.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::edit::format_coord;
use super::sexpr::Node;

/// Tolerance for treating two coordinates as the same electrical point.
///
/// KiCad snaps to a 50 mil (1.27 mm) grid by default and writes at most four
/// decimals, so 10 µm separates distinct points while absorbing rounding.
pub const COORD_EPSILON: f64 = 0.01;

/// A 2D point in document units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
}

impl Point {
    /// Creates a point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Reads the first two numeric arguments of a node such as `(at x y …)`
    /// or `(xy x y)`.
    #[must_use]
    pub fn from_node(node: &Node) -> Option<Self> {
        Some(Self::new(node.arg_f64(0)?, node.arg_f64(1)?))
    }

    /// True when both coordinates are within [`COORD_EPSILON`].
    #[must_use]
    pub fn approx_eq(self, other: Self) -> bool {
        (self.x - other.x).abs() <= COORD_EPSILON && (self.y - other.y).abs() <= COORD_EPSILON
    }

    /// Returns the point shifted by `(dx, dy)`.
    #[must_use]
    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    /// Rotates about the origin by `degrees`, counter-clockwise as seen on a
    /// Y-down canvas (KiCad's convention for board items).
    #[must_use]
    pub fn rotated(self, degrees: f64) -> Self {
        if degrees.abs() < f64::EPSILON {
            return self;
        }
        let (sin, cos) = degrees.to_radians().sin_cos();
        Self::new(
            self.x.mul_add(cos, self.y * sin),
            (-self.x).mul_add(sin, self.y * cos),
        )
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", format_coord(self.x), format_coord(self.y))
    }
}

/// Cardinal symbol rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(into = "f64")]
pub enum Rotation {
    /// 0°
    #[default]
    R0,
    /// 90° counter-clockwise
    R90,
    /// 180°
    R180,
    /// 270° counter-clockwise
    R270,
}

impl Rotation {
    /// Converts an angle in degrees, snapping to the nearest cardinal angle.
    ///
    /// Schematic symbols only rotate in 90° steps; anything else is logged and
    /// snapped.
    #[must_use]
    pub fn from_degrees(degrees: f64) -> Self {
        let normalised = degrees.rem_euclid(360.0);
        let quarter = (normalised / 90.0).round();
        if (normalised - quarter * 90.0).abs() > COORD_EPSILON {
            warn!(degrees, "Non-cardinal symbol rotation, snapping");
        }
        // quarter is in 0..=4
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let quarter = quarter as u32;
        match quarter % 4 {
            1 => Self::R90,
            2 => Self::R180,
            3 => Self::R270,
            _ => Self::R0,
        }
    }

    /// The angle in degrees.
    #[must_use]
    pub const fn degrees(self) -> f64 {
        match self {
            Self::R0 => 0.0,
            Self::R90 => 90.0,
            Self::R180 => 180.0,
            Self::R270 => 270.0,
        }
    }
}

impl From<Rotation> for f64 {
    fn from(r: Rotation) -> Self {
        r.degrees()
    }
}

/// Mirror axis of a placed symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mirror {
    /// Not mirrored.
    #[default]
    None,
    /// Mirrored about the X axis (Y negated).
    X,
    /// Mirrored about the Y axis (X negated).
    Y,
}

impl Mirror {
    /// Parses the argument of `(mirror x|y)`.
    #[must_use]
    pub fn from_token(token: Option<&str>) -> Self {
        match token {
            Some("x") => Self::X,
            Some("y") => Self::Y,
            _ => Self::None,
        }
    }

    /// The token KiCad writes, if any.
    #[must_use]
    pub const fn token(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::X => Some("x"),
            Self::Y => Some("y"),
        }
    }
}

/// Position, rotation and mirror of a placed symbol instance.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Placement {
    /// Anchor position in document units.
    pub position: Point,
    /// Cardinal rotation.
    pub rotation: Rotation,
    /// Mirror axis.
    pub mirror: Mirror,
}

impl Placement {
    /// Reads `(at x y [angle])` and `(mirror …)` from a symbol instance node.
    #[must_use]
    pub fn from_node(node: &Node) -> Option<Self> {
        let at = node.child("at")?;
        Some(Self {
            position: Point::from_node(at)?,
            rotation: Rotation::from_degrees(at.arg_f64(2).unwrap_or(0.0)),
            mirror: Mirror::from_token(node.child_str("mirror")),
        })
    }

    /// Maps a library-local point (Y up) to document space (Y down).
    ///
    /// Order: flip Y, rotate counter-clockwise, mirror, translate.
    #[must_use]
    pub fn transform(&self, local: Point) -> Point {
        let flipped = Point::new(local.x, -local.y);
        let rotated = match self.rotation {
            Rotation::R0 => flipped,
            Rotation::R90 => Point::new(flipped.y, -flipped.x),
            Rotation::R180 => Point::new(-flipped.x, -flipped.y),
            Rotation::R270 => Point::new(-flipped.y, flipped.x),
        };
        let mirrored = match self.mirror {
            Mirror::None => rotated,
            Mirror::X => Point::new(rotated.x, -rotated.y),
            Mirror::Y => Point::new(-rotated.x, rotated.y),
        };
        mirrored.offset(self.position.x, self.position.y)
    }
}
