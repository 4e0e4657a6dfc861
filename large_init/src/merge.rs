use scenario_schema::{
    AgentAttributes, AgentState, LightRecurrentState, RecurrentState, TrafficLightStates,
};
use serde::{Deserialize, Serialize};

use crate::region::Region;
use crate::stitching::RegionOutcome;

/// Every region's realized agents flattened into one index-aligned set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalResult {
    pub agent_states: Vec<AgentState>,
    pub agent_attributes: Vec<AgentAttributes>,
    pub recurrent_states: Vec<RecurrentState>,
    pub traffic_light_state_history: Option<Vec<TrafficLightStates>>,
    pub light_recurrent_states: Option<Vec<LightRecurrentState>>,
    /// One entry per input region, in input order.
    pub region_outcomes: Vec<RegionOutcome>,
}

impl GlobalResult {
    pub fn agent_count(&self) -> usize {
        self.agent_states.len()
    }
}

/// Concatenate realized agents region by region. Pending attributes are
/// dropped.
pub fn merge(regions: &[Region]) -> GlobalResult {
    let total: usize = regions.iter().map(Region::realized_count).sum();
    let mut result = GlobalResult {
        agent_states: Vec::with_capacity(total),
        agent_attributes: Vec::with_capacity(total),
        recurrent_states: Vec::with_capacity(total),
        ..GlobalResult::default()
    };
    for region in regions {
        result.agent_states.extend_from_slice(region.agent_states());
        result
            .agent_attributes
            .extend_from_slice(region.realized_attributes());
        result
            .recurrent_states
            .extend_from_slice(region.recurrent_states());
    }
    result
}
