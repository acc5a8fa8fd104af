//! Core value types shared by the engine, the capability layer and the
//! boundary layer.
//!
//! Parameters use an enum-based value type:
//! - Closed set of shapes: JSON-compatible scalars, arrays and maps
//! - Untagged serde representation so request bodies stay natural
//! - Typed accessors keep parsing code free of pattern-matching noise

use image::{ColorType, DynamicImage, GenericImageView};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A parameter value attached to a task descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean flag
    Boolean(bool),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit floating point number
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Ordered list of values
    Array(Vec<ParamValue>),
    /// Key-value map
    Map(IndexMap<String, ParamValue>),
    /// Explicit null
    None,
}

impl ParamValue {
    /// Short name of the value's shape, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Boolean(_) => "boolean",
            ParamValue::Integer(_) => "integer",
            ParamValue::Float(_) => "float",
            ParamValue::String(_) => "string",
            ParamValue::Array(_) => "array",
            ParamValue::Map(_) => "map",
            ParamValue::None => "null",
        }
    }

    /// Try to get this value as an integer.
    ///
    /// Floats with no fractional part are accepted, since JSON clients
    /// frequently send `5.0` where an integer is meant.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ParamValue::Integer(i) => Some(*i),
            ParamValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    /// Try to get this value as a float.
    /// Integers are automatically converted to floats.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Float(f) => Some(*f),
            ParamValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_string(&self) -> Option<&str> {
        if let ParamValue::String(s) = self {
            Some(s)
        } else {
            None
        }
    }

    /// Try to get this value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        if let ParamValue::Boolean(b) = self {
            Some(*b)
        } else {
            None
        }
    }

    /// Try to get this value as an array reference.
    pub fn as_array(&self) -> Option<&Vec<ParamValue>> {
        if let ParamValue::Array(arr) = self {
            Some(arr)
        } else {
            None
        }
    }

    /// Interpret this value as a 2D point, either `[x, y]` or `{"x": .., "y": ..}`.
    pub fn as_point(&self) -> Option<(f64, f64)> {
        match self {
            ParamValue::Array(arr) if arr.len() == 2 => {
                Some((arr[0].as_float()?, arr[1].as_float()?))
            }
            ParamValue::Map(map) => Some((map.get("x")?.as_float()?, map.get("y")?.as_float()?)),
            _ => None,
        }
    }

    /// Check if this value is null.
    pub fn is_none(&self) -> bool {
        matches!(self, ParamValue::None)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Boolean(b) => write!(f, "{}", b),
            ParamValue::Integer(i) => write!(f, "{}", i),
            ParamValue::Float(fl) => write!(f, "{:.4}", fl),
            ParamValue::String(s) => write!(f, "\"{}\"", s),
            ParamValue::Array(arr) => write!(f, "Array[{}]", arr.len()),
            ParamValue::Map(map) => write!(f, "Map{{{} entries}}", map.len()),
            ParamValue::None => write!(f, "null"),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Integer(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Integer(value as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Boolean(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::String(value)
    }
}

/// Height, width and channel count of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageShape {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Number of color channels
    pub channels: u8,
}

impl fmt::Display for ImageShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

/// Immutable image handle.
///
/// Pixel data lives behind an `Arc` so handing an image to many concurrent
/// tasks costs a reference count, not a copy. Nothing can mutate the shared
/// buffer: operations produce new images, and [`ImageValue::into_image`]
/// clones only when the buffer is still shared.
#[derive(Debug, Clone)]
pub struct ImageValue {
    data: Arc<DynamicImage>,
}

impl ImageValue {
    /// Create a new ImageValue from a DynamicImage.
    pub fn new(image: DynamicImage) -> Self {
        Self {
            data: Arc::new(image),
        }
    }

    /// Load an image from a file path.
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self, image::ImageError> {
        Ok(Self::new(image::open(path)?))
    }

    /// Decode an image from an in-memory encoded buffer (PNG, JPEG, ...).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, image::ImageError> {
        Ok(Self::new(image::load_from_memory(bytes)?))
    }

    /// Get a shared reference to the underlying image.
    pub fn image(&self) -> &DynamicImage {
        self.data.as_ref()
    }

    /// Take ownership of the underlying image.
    ///
    /// If the image is shared, this will clone it.
    pub fn into_image(self) -> DynamicImage {
        Arc::try_unwrap(self.data).unwrap_or_else(|arc| (*arc).clone())
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.data.width()
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.data.height()
    }

    /// Shape of the image.
    pub fn shape(&self) -> ImageShape {
        let (width, height) = self.data.dimensions();
        ImageShape {
            width,
            height,
            channels: self.data.color().channel_count(),
        }
    }

    /// Color layout of the pixel buffer.
    pub fn color_type(&self) -> ColorType {
        self.data.color()
    }

    /// Whether two handles point at the same pixel buffer.
    pub fn shares_buffer_with(&self, other: &ImageValue) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl PartialEq for ImageValue {
    fn eq(&self, other: &Self) -> bool {
        self.shares_buffer_with(other)
            || (self.data.dimensions() == other.data.dimensions()
                && self.data.color() == other.data.color()
                && self.data.as_bytes() == other.data.as_bytes())
    }
}

impl From<DynamicImage> for ImageValue {
    fn from(image: DynamicImage) -> Self {
        Self::new(image)
    }
}
