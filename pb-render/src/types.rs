use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Shape family the renderer may place on each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Shape {
    #[default]
    Any,
    Triangle,
    Rectangle,
    Ellipse,
    Circle,
    RotatedRectangle,
    Bezier,
    RotatedEllipse,
    Polygon,
}

impl Shape {
    pub const ALL: [Shape; 9] = [
        Shape::Any,
        Shape::Triangle,
        Shape::Rectangle,
        Shape::Ellipse,
        Shape::Circle,
        Shape::RotatedRectangle,
        Shape::Bezier,
        Shape::RotatedEllipse,
        Shape::Polygon,
    ];

    pub fn from_index(index: i64) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    /// Mode number understood by the `primitive` command line.
    pub fn index(self) -> u8 {
        match self {
            Shape::Any => 0,
            Shape::Triangle => 1,
            Shape::Rectangle => 2,
            Shape::Ellipse => 3,
            Shape::Circle => 4,
            Shape::RotatedRectangle => 5,
            Shape::Bezier => 6,
            Shape::RotatedEllipse => 7,
            Shape::Polygon => 8,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Shape::Any => "All",
            Shape::Triangle => "Triangles",
            Shape::Rectangle => "Rectangles",
            Shape::Ellipse => "Ellipses",
            Shape::Circle => "Circles",
            Shape::RotatedRectangle => "Rotated rectangles",
            Shape::Bezier => "Bezier curves",
            Shape::RotatedEllipse => "Rotated ellipses",
            Shape::Polygon => "Polygons",
        }
    }
}

impl TryFrom<u8> for Shape {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_index(i64::from(value)).ok_or_else(|| format!("unknown shape index {value}"))
    }
}

impl From<Shape> for u8 {
    fn from(value: Shape) -> Self {
        value.index()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extension {
    #[default]
    Jpg,
    Png,
    Svg,
    Gif,
}

impl Extension {
    pub const ALL: [Extension; 4] = [
        Extension::Jpg,
        Extension::Png,
        Extension::Svg,
        Extension::Gif,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Extension::Jpg => "jpg",
            Extension::Png => "png",
            Extension::Svg => "svg",
            Extension::Gif => "gif",
        }
    }
}

impl FromStr for Extension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ext| ext.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unsupported extension {s:?}"))
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of one rendering. Plain value: copy it, never share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderConfig {
    pub shape: Shape,
    pub iterations: u32,
    pub repeat: u32,
    /// 0 lets the renderer pick alpha per shape.
    pub alpha: u8,
    pub extension: Extension,
    /// Long side of the output raster, in pixels.
    pub output_size: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            shape: Shape::Any,
            iterations: 200,
            repeat: 1,
            alpha: 128,
            extension: Extension::Jpg,
            output_size: 1280,
        }
    }
}
