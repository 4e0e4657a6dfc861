//! Seams to the remote services the initializer depends on.
//!
//! Transport, authentication and transport-level retries live behind these
//! traits. The orchestrator only distinguishes a placement failure (worth
//! another attempt) from everything else (surfaced unchanged).

use scenario_schema::{
    AgentAttributes, AgentState, Birdview, LightRecurrentState, Point, RecurrentState,
    TrafficLightStates,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeRequest {
    pub location: String,
    /// Outer list over time steps, inner over agents. The large-area
    /// initializer only ever sends a single time step.
    pub states_history: Option<Vec<Vec<AgentState>>>,
    pub agent_attributes: Vec<AgentAttributes>,
    pub traffic_light_state_history: Option<Vec<TrafficLightStates>>,
    /// Point the service should place new agents around.
    pub location_of_interest: Option<Point>,
    pub random_seed: Option<u64>,
    pub get_infractions: bool,
    pub model_version: Option<String>,
}

impl InitializeRequest {
    /// Number of agents with a supplied state in the latest time step.
    pub fn conditional_count(&self) -> usize {
        self.states_history
            .as_ref()
            .and_then(|history| history.last())
            .map_or(0, Vec::len)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitializeResponse {
    pub agent_states: Vec<AgentState>,
    pub agent_attributes: Vec<AgentAttributes>,
    pub recurrent_states: Vec<RecurrentState>,
    pub traffic_lights_states: Option<TrafficLightStates>,
    pub light_recurrent_states: Option<Vec<LightRecurrentState>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationInfoRequest {
    pub location: String,
    /// Edge length in metres of the rendered birdview.
    pub rendering_fov: Option<u32>,
    pub rendering_center: Option<Point>,
}

#[derive(Debug, Clone)]
pub struct LocationInfo {
    pub birdview: Birdview,
    /// Convex boundary of the supported area, when the service knows it.
    pub bounding_polygon: Option<Vec<Point>>,
    pub map_center: Point,
    pub map_fov: f64,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// No feasible placement for the requested agents. Retrying with a
    /// different sample may succeed.
    #[error("initialization infeasible: {message}")]
    Infeasible { message: String },
    /// The service could not be reached or rejected the request outright.
    #[error("backend unavailable: {message}")]
    Unavailable { message: String },
}

impl BackendError {
    pub fn infeasible(message: impl Into<String>) -> Self {
        Self::Infeasible {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Infeasible { .. })
    }
}

/// Remote per-region initialization.
pub trait RegionInitializer {
    fn initialize(&self, request: &InitializeRequest) -> Result<InitializeResponse, BackendError>;
}

/// Remote map metadata and rendering.
pub trait MapInfo {
    fn location_info(&self, request: &LocationInfoRequest) -> Result<LocationInfo, BackendError>;
}

impl<T: RegionInitializer + ?Sized> RegionInitializer for &T {
    fn initialize(&self, request: &InitializeRequest) -> Result<InitializeResponse, BackendError> {
        (**self).initialize(request)
    }
}

impl<T: MapInfo + ?Sized> MapInfo for &T {
    fn location_info(&self, request: &LocationInfoRequest) -> Result<LocationInfo, BackendError> {
        (**self).location_info(request)
    }
}
