//! Offline stand-in for the remote services.
//!
//! Responses are a pure function of the request, so runs that share a seed
//! reproduce exactly. Nothing here models traffic realistically; it only
//! respects the shape of the real protocol.

use std::f64::consts::TAU;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use scenario_schema::{
    AgentState, Birdview, LightRecurrentState, Point, RecurrentState, TrafficLightStates,
};

use crate::backend::{
    BackendError, InitializeRequest, InitializeResponse, LocationInfo, LocationInfoRequest,
    MapInfo, RegionInitializer,
};

pub const MOCK_RECURRENT_DIM: usize = 128;
const BIRDVIEW_EDGE: u32 = 64;
const ROAD_PIXEL: [u8; 3] = [128, 128, 128];
const PLACEMENT_RING: (f64, f64) = (5.0, 30.0);

type RatioFn = Arc<dyn Fn(Point) -> f64 + Send + Sync>;

pub struct MockBackend {
    ratio: RatioFn,
    max_agents_per_call: Option<usize>,
    traffic_lights: Option<TrafficLightStates>,
    bounding_polygon: Option<Vec<Point>>,
    map_center: Point,
    map_fov: f64,
    initialize_calls: AtomicUsize,
    location_info_calls: AtomicUsize,
}

impl fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockBackend")
            .field("max_agents_per_call", &self.max_agents_per_call)
            .field("traffic_lights", &self.traffic_lights)
            .field("map_center", &self.map_center)
            .field("map_fov", &self.map_fov)
            .field("initialize_calls", &self.initialize_calls())
            .finish_non_exhaustive()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl MockBackend {
    /// Every rendered region reports `drivable_ratio` of road.
    pub fn new(drivable_ratio: f64) -> Self {
        let ratio = drivable_ratio.clamp(0.0, 1.0);
        Self {
            ratio: Arc::new(move |_| ratio),
            max_agents_per_call: None,
            traffic_lights: None,
            bounding_polygon: None,
            map_center: Point::default(),
            map_fov: 200.0,
            initialize_calls: AtomicUsize::new(0),
            location_info_calls: AtomicUsize::new(0),
        }
    }

    /// Drivable ratio chosen per rendering centre. Values are clamped to
    /// `[0, 1]`.
    pub fn with_ratio_fn<F>(mut self, ratio: F) -> Self
    where
        F: Fn(Point) -> f64 + Send + Sync + 'static,
    {
        self.ratio = Arc::new(move |center| ratio(center).clamp(0.0, 1.0));
        self
    }

    /// Requests naming more than `limit` agents fail as infeasible.
    pub fn with_max_agents_per_call(mut self, limit: usize) -> Self {
        self.max_agents_per_call = Some(limit);
        self
    }

    pub fn with_traffic_lights(mut self, lights: TrafficLightStates) -> Self {
        self.traffic_lights = Some(lights);
        self
    }

    /// Axis-aligned map square of side `fov` around `center`, reported as
    /// the location's bounding polygon.
    pub fn with_map_square(mut self, center: Point, fov: f64) -> Self {
        let half = fov / 2.0;
        self.map_center = center;
        self.map_fov = fov;
        self.bounding_polygon = Some(vec![
            center.offset(-half, -half),
            center.offset(half, -half),
            center.offset(half, half),
            center.offset(-half, half),
        ]);
        self
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::Relaxed)
    }

    pub fn location_info_calls(&self) -> usize {
        self.location_info_calls.load(Ordering::Relaxed)
    }

    fn render(&self, center: Point) -> Birdview {
        let pixels = (BIRDVIEW_EDGE * BIRDVIEW_EDGE) as usize;
        let road = ((self.ratio)(center) * pixels as f64).round() as usize;
        let mut bytes = Vec::with_capacity(pixels * 3);
        for pixel in 0..pixels {
            let rgb = if pixel < road { ROAD_PIXEL } else { [0, 0, 0] };
            bytes.extend_from_slice(&rgb);
        }
        Birdview::from_rgb(BIRDVIEW_EDGE, BIRDVIEW_EDGE, bytes)
            .unwrap_or_else(|| Birdview::filled(BIRDVIEW_EDGE, BIRDVIEW_EDGE, [0, 0, 0]))
    }
}

/// Fold the focus point into the seed so that regions sharing a run seed
/// still get distinct placements.
fn placement_seed(seed: u64, focus: Point) -> u64 {
    seed ^ focus.x.to_bits().rotate_left(17) ^ focus.y.to_bits().rotate_left(41)
}

impl RegionInitializer for MockBackend {
    fn initialize(&self, request: &InitializeRequest) -> Result<InitializeResponse, BackendError> {
        self.initialize_calls.fetch_add(1, Ordering::Relaxed);
        let wanted = request.agent_attributes.len();
        if let Some(limit) = self.max_agents_per_call {
            if wanted > limit {
                return Err(BackendError::infeasible(format!(
                    "{wanted} agents requested, at most {limit} fit"
                )));
            }
        }

        let mut states: Vec<AgentState> = request
            .states_history
            .as_ref()
            .and_then(|history| history.last().cloned())
            .unwrap_or_default();
        if states.len() > wanted {
            return Err(BackendError::unavailable(format!(
                "{} conditioning states but only {wanted} attribute records",
                states.len()
            )));
        }

        let focus = request.location_of_interest.unwrap_or_default();
        let mut rng = ChaCha8Rng::seed_from_u64(placement_seed(
            request.random_seed.unwrap_or_default(),
            focus,
        ));
        while states.len() < wanted {
            let angle = rng.gen_range(0.0..TAU);
            let radius = rng.gen_range(PLACEMENT_RING.0..PLACEMENT_RING.1);
            states.push(AgentState::new(
                focus.x + radius * angle.cos(),
                focus.y + radius * angle.sin(),
                rng.gen_range(-std::f64::consts::PI..std::f64::consts::PI),
                rng.gen_range(0.0..12.0),
            ));
        }

        let light_recurrent_states = self.traffic_lights.as_ref().map(|lights| {
            lights
                .keys()
                .map(|_| LightRecurrentState {
                    state: 0.0,
                    time_remaining: 10.0,
                })
                .collect()
        });

        Ok(InitializeResponse {
            recurrent_states: vec![RecurrentState::zeroed(MOCK_RECURRENT_DIM); states.len()],
            agent_attributes: request.agent_attributes.clone(),
            agent_states: states,
            traffic_lights_states: self.traffic_lights.clone(),
            light_recurrent_states,
        })
    }
}

impl MapInfo for MockBackend {
    fn location_info(&self, request: &LocationInfoRequest) -> Result<LocationInfo, BackendError> {
        self.location_info_calls.fetch_add(1, Ordering::Relaxed);
        let center = request.rendering_center.unwrap_or(self.map_center);
        Ok(LocationInfo {
            birdview: self.render(center),
            bounding_polygon: self.bounding_polygon.clone(),
            map_center: self.map_center,
            map_fov: self.map_fov,
        })
    }
}

#[cfg(test)]
mod tests {
    use scenario_schema::{AgentAttributes, TrafficLightState};

    use super::*;
    use crate::allocation::drivable_ratio;

    fn request(attrs: usize, seed: u64) -> InitializeRequest {
        InitializeRequest {
            location: "mock:grid".into(),
            states_history: Some(vec![vec![AgentState::new(1.0, 1.0, 0.0, 0.0)]]),
            agent_attributes: vec![AgentAttributes::new(4.5, 1.9, 1.35); attrs],
            traffic_light_state_history: None,
            location_of_interest: Some(Point::new(10.0, -10.0)),
            random_seed: Some(seed),
            get_infractions: false,
            model_version: None,
        }
    }

    #[test]
    fn echoes_conditioning_then_places_the_rest() {
        let mock = MockBackend::default();
        let response = mock.initialize(&request(4, 3)).expect("feasible");
        assert_eq!(response.agent_states.len(), 4);
        assert_eq!(response.agent_states[0].center, Point::new(1.0, 1.0));
        assert_eq!(response.recurrent_states[0].values().len(), MOCK_RECURRENT_DIM);
        for state in &response.agent_states[1..] {
            let dx = state.center.x - 10.0;
            let dy = state.center.y + 10.0;
            let distance = (dx * dx + dy * dy).sqrt();
            assert!(distance >= PLACEMENT_RING.0 && distance < PLACEMENT_RING.1);
        }
        assert_eq!(mock.initialize_calls(), 1);
    }

    #[test]
    fn placements_repeat_for_the_same_seed() {
        let mock = MockBackend::default();
        let a = mock.initialize(&request(6, 11)).expect("feasible");
        let b = mock.initialize(&request(6, 11)).expect("feasible");
        let c = mock.initialize(&request(6, 12)).expect("feasible");
        assert_eq!(a, b);
        assert_ne!(a.agent_states, c.agent_states);
    }

    #[test]
    fn capacity_limit_is_infeasible() {
        let mock = MockBackend::default().with_max_agents_per_call(3);
        let err = mock.initialize(&request(4, 0)).expect_err("too many");
        assert!(err.is_recoverable());
        assert!(mock.initialize(&request(3, 0)).is_ok());
    }

    #[test]
    fn birdview_reflects_ratio_per_center() {
        let mock =
            MockBackend::new(0.0).with_ratio_fn(|center| if center.x < 0.0 { 0.25 } else { 0.75 });
        let west = mock
            .location_info(&LocationInfoRequest {
                location: "mock:grid".into(),
                rendering_fov: Some(100),
                rendering_center: Some(Point::new(-50.0, 0.0)),
            })
            .expect("info");
        let east = mock
            .location_info(&LocationInfoRequest {
                location: "mock:grid".into(),
                rendering_fov: Some(100),
                rendering_center: Some(Point::new(50.0, 0.0)),
            })
            .expect("info");
        assert_eq!(drivable_ratio(&west.birdview, 0), 0.25);
        assert_eq!(drivable_ratio(&east.birdview, 0), 0.75);
        assert_eq!(mock.location_info_calls(), 2);
    }

    #[test]
    fn traffic_lights_come_with_recurrent_states() {
        let lights = TrafficLightStates::from([
            ("1".to_string(), TrafficLightState::Green),
            ("2".to_string(), TrafficLightState::Red),
        ]);
        let mock = MockBackend::default().with_traffic_lights(lights.clone());
        let response = mock.initialize(&request(1, 0)).expect("feasible");
        assert_eq!(response.traffic_lights_states, Some(lights));
        assert_eq!(response.light_recurrent_states.map(|s| s.len()), Some(2));
    }
}
