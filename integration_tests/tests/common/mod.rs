#![allow(dead_code)]

use std::sync::Mutex;

use large_init::{
    BackendError, InitializeRequest, InitializeResponse, Region, RegionInitializer,
};
use scenario_schema::{AgentAttributes, AgentState, Point, RecurrentState};

pub const LOCATION: &str = "test:crossroads";

type Script = dyn Fn(&InitializeRequest, usize) -> Result<InitializeResponse, BackendError> + Send + Sync;

/// Backend driven by a closure that sees every request and its call
/// index. All requests are recorded for later inspection.
pub struct ScriptedBackend {
    script: Box<Script>,
    requests: Mutex<Vec<InitializeRequest>>,
}

impl ScriptedBackend {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&InitializeRequest, usize) -> Result<InitializeResponse, BackendError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always succeeds with [`echo`].
    pub fn echoing() -> Self {
        Self::new(|request, _| Ok(echo(request)))
    }

    /// Infeasible whenever the request asks for any agent without a state.
    pub fn refusing_new_agents() -> Self {
        Self::new(|request, _| {
            if request.agent_attributes.len() > request.conditional_count() {
                Err(BackendError::infeasible("no free space"))
            } else {
                Ok(echo(request))
            }
        })
    }

    pub fn requests(&self) -> Vec<InitializeRequest> {
        self.requests.lock().expect("request log").clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("request log").len()
    }
}

impl RegionInitializer for ScriptedBackend {
    fn initialize(&self, request: &InitializeRequest) -> Result<InitializeResponse, BackendError> {
        let call = {
            let mut log = self.requests.lock().expect("request log");
            log.push(request.clone());
            log.len() - 1
        };
        (self.script)(request, call)
    }
}

/// Echo the conditioning states back and place every new agent on the
/// focus point, shifted one metre east per agent.
pub fn echo(request: &InitializeRequest) -> InitializeResponse {
    let focus = request.location_of_interest.unwrap_or_default();
    let mut states = request
        .states_history
        .as_ref()
        .and_then(|history| history.last().cloned())
        .unwrap_or_default();
    let mut step = 0.0;
    while states.len() < request.agent_attributes.len() {
        states.push(AgentState::new(focus.x + step, focus.y, 0.0, 3.0));
        step += 1.0;
    }
    InitializeResponse {
        recurrent_states: (0..states.len())
            .map(|i| RecurrentState(vec![i as f32; 4]))
            .collect(),
        agent_attributes: request.agent_attributes.clone(),
        agent_states: states,
        traffic_lights_states: None,
        light_recurrent_states: None,
    }
}

pub fn car() -> AgentAttributes {
    AgentAttributes::new(4.5, 1.9, 1.35)
}

pub fn agent_at(x: f64, y: f64) -> AgentState {
    AgentState::new(x, y, 0.0, 0.0)
}

/// Region of the default size holding `placed` agents plus `pending`
/// attribute-only requests.
pub fn region(center: (f64, f64), placed: &[(f64, f64)], pending: usize) -> Region {
    let states: Vec<_> = placed.iter().map(|&(x, y)| agent_at(x, y)).collect();
    let attributes = vec![car(); states.len() + pending];
    Region::with_agents(Point::new(center.0, center.1), 100.0, states, attributes)
        .expect("valid test region")
}

pub fn conditioning_centers(request: &InitializeRequest) -> Vec<Point> {
    request
        .states_history
        .as_ref()
        .and_then(|history| history.last())
        .map(|states| states.iter().map(|state| state.center).collect())
        .unwrap_or_default()
}
