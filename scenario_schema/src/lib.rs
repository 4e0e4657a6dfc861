//! Data contracts shared by the large-area initializer and its backends.
//!
//! Everything here is plain data with serde derives so that requests,
//! responses and merged results can be logged or written out as JSON.

use std::collections::BTreeMap;
use std::fmt;

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// A point in map coordinates (metres).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2})", self.x, self.y)
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self::new(x, y)
    }
}

/// Kinematic state of a single agent at one time step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub center: Point,
    /// Heading in radians, 0 along +x and pi/2 along +y.
    pub orientation: f64,
    /// Speed in m/s.
    pub speed: f64,
}

impl AgentState {
    pub fn new(x: f64, y: f64, orientation: f64, speed: f64) -> Self {
        Self {
            center: Point::new(x, y),
            orientation,
            speed,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    #[default]
    Car,
    Pedestrian,
}

/// Static per-agent attributes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentAttributes {
    pub length: f64,
    pub width: f64,
    pub rear_axis_offset: f64,
    #[serde(default)]
    pub agent_type: AgentType,
}

impl AgentAttributes {
    pub fn new(length: f64, width: f64, rear_axis_offset: f64) -> Self {
        Self {
            length,
            width,
            rear_axis_offset,
            agent_type: AgentType::Car,
        }
    }
}

/// Opaque continuation state produced by the remote model for one agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecurrentState(pub Vec<f32>);

impl RecurrentState {
    pub fn zeroed(dim: usize) -> Self {
        Self(vec![0.0; dim])
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficLightState {
    #[default]
    None,
    Green,
    Yellow,
    Red,
}

pub type TrafficLightId = String;

/// States of every traffic light at a location for one time step.
pub type TrafficLightStates = BTreeMap<TrafficLightId, TrafficLightState>;

/// Continuation state for a single traffic light controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightRecurrentState {
    pub state: f32,
    pub time_remaining: f32,
}

/// Rendered top-down view of a map patch.
///
/// Off-road surface is drawn in pure black, so the share of non-black
/// pixels approximates how much of the patch is drivable.
#[derive(Debug, Clone, PartialEq)]
pub struct Birdview {
    image: RgbImage,
}

impl Birdview {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    /// Build from raw, row-major RGB8 bytes. Returns `None` when the buffer
    /// length does not match `width * height * 3`.
    pub fn from_rgb(width: u32, height: u32, bytes: Vec<u8>) -> Option<Self> {
        RgbImage::from_raw(width, height, bytes).map(Self::new)
    }

    /// A uniformly coloured patch.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self::new(RgbImage::from_pixel(width, height, image::Rgb(rgb)))
    }

    /// Decode an encoded (PNG or JPEG) rendering.
    pub fn decode(bytes: &[u8]) -> Result<Self, image::ImageError> {
        let image = image::load_from_memory(bytes)?.to_rgb8();
        Ok(Self::new(image))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.image.width()) * u64::from(self.image.height())
    }

    /// Iterate over every pixel as `[r, g, b]`.
    pub fn pixels(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
        self.image.pixels().map(|pixel| pixel.0)
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}
