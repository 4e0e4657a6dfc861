use scenario_schema::{AgentAttributes, AgentState, Point, RecurrentState};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Edge length of the largest square the remote service initializes in one call.
pub const DEFAULT_REGION_SIZE: f64 = 100.0;

/// Square catchment area and the agents assigned to it.
///
/// `agent_attributes` may run ahead of `agent_states`: entries past
/// `agent_states.len()` are pending requests that initialization will
/// realize. Realized entries keep the same index across all three lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RegionRecord")]
pub struct Region {
    center: Point,
    size: f64,
    agent_states: Vec<AgentState>,
    agent_attributes: Vec<AgentAttributes>,
    recurrent_states: Vec<RecurrentState>,
}

#[derive(Debug, Error, PartialEq)]
pub enum RegionError {
    #[error("region size must be positive and finite, got {0}")]
    InvalidSize(f64),
    #[error("region has {states} agent states but only {attributes} attribute records")]
    MoreStatesThanAttributes { states: usize, attributes: usize },
    #[error("region has {states} agent states but {recurrent} recurrent states")]
    RecurrentStateMismatch { states: usize, recurrent: usize },
}

/// Wire shape of a [`Region`]; validated on the way in.
#[derive(Deserialize)]
struct RegionRecord {
    center: Point,
    size: f64,
    #[serde(default)]
    agent_states: Vec<AgentState>,
    #[serde(default)]
    agent_attributes: Vec<AgentAttributes>,
    #[serde(default)]
    recurrent_states: Vec<RecurrentState>,
}

impl TryFrom<RegionRecord> for Region {
    type Error = RegionError;

    fn try_from(record: RegionRecord) -> Result<Self, Self::Error> {
        let states = record.agent_states.len();
        let recurrent = record.recurrent_states.len();
        // recurrent states are either absent or one per placed agent
        if recurrent != 0 && recurrent != states {
            return Err(RegionError::RecurrentStateMismatch { states, recurrent });
        }
        let mut region = Region::with_agents(
            record.center,
            record.size,
            record.agent_states,
            record.agent_attributes,
        )?;
        region.recurrent_states = record.recurrent_states;
        Ok(region)
    }
}

impl Region {
    /// Empty square region. Only the grid builder calls this, after it has
    /// validated the size itself.
    pub(crate) fn square(center: Point, size: f64) -> Self {
        Self {
            center,
            size,
            agent_states: Vec::new(),
            agent_attributes: Vec::new(),
            recurrent_states: Vec::new(),
        }
    }

    pub fn with_default_size(center: Point) -> Self {
        Self::square(center, DEFAULT_REGION_SIZE)
    }

    /// Region carrying caller-supplied agents. The first `states.len()`
    /// attributes describe placed agents; any extra ones are pending.
    pub fn with_agents(
        center: Point,
        size: f64,
        states: Vec<AgentState>,
        attributes: Vec<AgentAttributes>,
    ) -> Result<Self, RegionError> {
        if !(size.is_finite() && size > 0.0) {
            return Err(RegionError::InvalidSize(size));
        }
        if states.len() > attributes.len() {
            return Err(RegionError::MoreStatesThanAttributes {
                states: states.len(),
                attributes: attributes.len(),
            });
        }
        Ok(Self {
            center,
            size,
            agent_states: states,
            agent_attributes: attributes,
            recurrent_states: Vec::new(),
        })
    }

    pub fn center(&self) -> Point {
        self.center
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    pub fn agent_states(&self) -> &[AgentState] {
        &self.agent_states
    }

    pub fn agent_attributes(&self) -> &[AgentAttributes] {
        &self.agent_attributes
    }

    pub fn recurrent_states(&self) -> &[RecurrentState] {
        &self.recurrent_states
    }

    pub fn realized_count(&self) -> usize {
        self.agent_states.len()
    }

    pub fn pending_count(&self) -> usize {
        self.agent_attributes.len() - self.agent_states.len()
    }

    /// Placed plus pending agents.
    pub fn requested_count(&self) -> usize {
        self.agent_attributes.len()
    }

    pub fn realized_attributes(&self) -> &[AgentAttributes] {
        &self.agent_attributes[..self.agent_states.len()]
    }

    pub fn pending_attributes(&self) -> &[AgentAttributes] {
        &self.agent_attributes[self.agent_states.len()..]
    }

    /// Queue attribute-only requests to be realized by initialization.
    pub fn extend_pending<I>(&mut self, attributes: I)
    where
        I: IntoIterator<Item = AgentAttributes>,
    {
        self.agent_attributes.extend(attributes);
    }

    /// Drop every agent, placed or pending.
    pub fn clear_agents(&mut self) {
        self.agent_states.clear();
        self.agent_attributes.clear();
        self.recurrent_states.clear();
    }

    /// Append one realized agent. Its attributes are slotted in front of any
    /// pending entries so realized indices stay aligned.
    pub fn insert_agent(
        &mut self,
        state: AgentState,
        attributes: AgentAttributes,
        recurrent: RecurrentState,
    ) {
        let slot = self.agent_states.len();
        self.agent_attributes.insert(slot, attributes);
        self.agent_states.push(state);
        self.recurrent_states.push(recurrent);
    }

    /// Closed square footprint test.
    pub fn contains(&self, point: Point) -> bool {
        let half = self.size / 2.0;
        (point.x - self.center.x).abs() <= half && (point.y - self.center.y).abs() <= half
    }

    /// Whether `point` falls strictly inside the square of side
    /// `size + buffer` centred on this region.
    pub fn within_field_of_view(&self, point: Point, buffer: f64) -> bool {
        let half = (self.size + buffer) / 2.0;
        (self.center.x - half < point.x && point.x < self.center.x + half)
            && (self.center.y - half < point.y && point.y < self.center.y + half)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn car() -> AgentAttributes {
        AgentAttributes::new(4.5, 1.9, 1.35)
    }

    #[test]
    fn with_agents_rejects_more_states_than_attributes() {
        let states = vec![AgentState::new(0.0, 0.0, 0.0, 0.0); 2];
        let err = Region::with_agents(Point::default(), 100.0, states, vec![car()])
            .expect_err("two states, one attribute");
        assert_eq!(
            err,
            RegionError::MoreStatesThanAttributes {
                states: 2,
                attributes: 1
            }
        );
    }

    #[test]
    fn with_agents_rejects_bad_size() {
        let err = Region::with_agents(Point::default(), 0.0, Vec::new(), Vec::new())
            .expect_err("zero size");
        assert_eq!(err, RegionError::InvalidSize(0.0));
    }

    #[test]
    fn deserialize_rejects_inconsistent_regions() {
        let more_states = r#"{
            "center": {"x": 0.0, "y": 0.0},
            "size": 100.0,
            "agent_states": [{"center": {"x": 1.0, "y": 1.0}, "orientation": 0.0, "speed": 0.0}],
            "agent_attributes": []
        }"#;
        let err = serde_json::from_str::<Region>(more_states).expect_err("1 state, 0 attributes");
        assert!(err.to_string().contains("only 0 attribute records"));

        let negative = r#"{"center": {"x": 0.0, "y": 0.0}, "size": -5.0}"#;
        let err = serde_json::from_str::<Region>(negative).expect_err("negative size");
        assert!(err.to_string().contains("-5"));

        let orphan_recurrent = r#"{
            "center": {"x": 0.0, "y": 0.0},
            "size": 100.0,
            "recurrent_states": [[0.0, 1.0]]
        }"#;
        assert!(serde_json::from_str::<Region>(orphan_recurrent).is_err());
    }

    #[test]
    fn serialized_region_reads_back() {
        let mut region = Region::with_agents(
            Point::new(3.0, 4.0),
            80.0,
            Vec::new(),
            vec![car()],
        )
        .expect("valid region");
        region.insert_agent(
            AgentState::new(3.0, 5.0, 0.0, 1.0),
            car(),
            RecurrentState::zeroed(2),
        );
        let json = serde_json::to_string(&region).expect("serialize");
        let back: Region = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, region);
        assert_eq!(back.pending_count(), 1);
    }

    #[test]
    fn insert_keeps_pending_behind_realized() {
        let mut region = Region::with_default_size(Point::new(10.0, 10.0));
        region.extend_pending([car(), car()]);
        assert_eq!(region.pending_count(), 2);

        let placed = AgentAttributes::new(3.0, 1.5, 1.0);
        region.insert_agent(
            AgentState::new(10.0, 12.0, 0.0, 3.0),
            placed,
            RecurrentState::zeroed(4),
        );

        assert_eq!(region.realized_count(), 1);
        assert_eq!(region.pending_count(), 2);
        assert_eq!(region.realized_attributes(), &[placed]);
        assert_eq!(region.pending_attributes(), &[car(), car()]);
        assert_eq!(region.recurrent_states().len(), 1);
    }

    #[test]
    fn clear_drops_everything() {
        let mut region = Region::with_agents(
            Point::default(),
            100.0,
            vec![AgentState::new(1.0, 1.0, 0.0, 0.0)],
            vec![car(), car()],
        )
        .expect("valid region");
        region.clear_agents();
        assert_eq!(region.requested_count(), 0);
        assert!(region.agent_states().is_empty());
    }

    #[test]
    fn field_of_view_is_strict_and_buffered() {
        let region = Region::with_default_size(Point::new(0.0, 0.0));
        // Half of 100 + 20 is 60.
        assert!(region.within_field_of_view(Point::new(59.9, -59.9), 20.0));
        assert!(!region.within_field_of_view(Point::new(60.0, 0.0), 20.0));
        assert!(!region.within_field_of_view(Point::new(55.0, 0.0), 0.0));
        assert!(region.contains(Point::new(50.0, -50.0)));
        assert!(!region.contains(Point::new(50.1, 0.0)));
    }
}
