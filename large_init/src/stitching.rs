//! Region-by-region initialization with cross-region conditioning.
//!
//! Regions are processed strictly in input order. Each request carries the
//! already-realized agents of other regions that sit near the current one,
//! so independently generated neighbourhoods agree at their seams. A region
//! processed later sees the output of earlier ones, never the reverse.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use scenario_schema::{AgentAttributes, AgentState, LightRecurrentState, Point, TrafficLightStates};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, InitializeRequest, InitializeResponse, RegionInitializer};
use crate::config::LargeInitConfig;
use crate::merge::{merge, GlobalResult};
use crate::region::Region;

/// Attempt budget per region, sized to the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    attempts_per_num_regions: usize,
}

impl RetryPolicy {
    pub fn new(attempts_per_num_regions: usize) -> Self {
        Self {
            attempts_per_num_regions: attempts_per_num_regions.max(1),
        }
    }

    /// `1 + region_count / attempts_per_num_regions`.
    pub fn attempts_for(&self, region_count: usize) -> u32 {
        let extra = region_count / self.attempts_per_num_regions;
        u32::try_from(extra).unwrap_or(u32::MAX - 1) + 1
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(15)
    }
}

/// Cooperative stop flag, checked before each region.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegionOutcome {
    /// Nothing was requested; the initializer was not called.
    Skipped,
    Succeeded { attempts: u32 },
    /// Every attempt failed; only the region's predetermined agents were kept.
    Degraded { attempts: u32, kept: usize },
    /// Every attempt failed and there was nothing predetermined to keep.
    Emptied { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StitchProgress {
    pub index: usize,
    pub total: usize,
    pub center: Point,
    pub outcome: RegionOutcome,
}

#[derive(Debug, Clone)]
pub struct StitchOptions {
    /// Abort the whole run when any region exhausts its attempts.
    pub strict: bool,
    pub retry: RetryPolicy,
    pub fov_buffer: f64,
    /// Base seed. Attempt `k` of a region is sent `seed + k - 1`, so a retry
    /// never repeats the exact request that just failed.
    pub random_seed: Option<u64>,
    pub get_infractions: bool,
    pub model_version: Option<String>,
    pub cancel: Option<CancelToken>,
    pub progress: Option<Sender<StitchProgress>>,
}

impl Default for StitchOptions {
    fn default() -> Self {
        Self::from_config(&LargeInitConfig::default())
    }
}

impl StitchOptions {
    pub fn from_config(config: &LargeInitConfig) -> Self {
        Self {
            strict: false,
            retry: config.retry_policy(),
            fov_buffer: config.fov_buffer,
            random_seed: None,
            get_infractions: false,
            model_version: None,
            cancel: None,
            progress: None,
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.random_seed = seed;
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_progress(mut self, sender: Sender<StitchProgress>) -> Self {
        self.progress = Some(sender);
        self
    }
}

#[derive(Debug, Error)]
pub enum StitchError {
    #[error(
        "unable to initialize region {index} at {center} with size {size} in {location} \
         after {attempts} attempts"
    )]
    RegionExhausted {
        location: String,
        index: usize,
        center: Point,
        size: f64,
        attempts: u32,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("stitching cancelled after {processed} regions")]
    Cancelled { processed: usize },
}

/// Light state shared by every region of one run. The first response that
/// reports lights wins unless the caller supplied a history up front.
#[derive(Debug, Default)]
struct RunContext {
    traffic_light_history: Option<Vec<TrafficLightStates>>,
    light_recurrent_states: Option<Vec<LightRecurrentState>>,
}

impl RunContext {
    fn capture_lights(&mut self, index: usize, response: &InitializeResponse) {
        if self.traffic_light_history.is_some() {
            return;
        }
        if let Some(lights) = &response.traffic_lights_states {
            info!(
                target: "large_init::stitch",
                index,
                lights = lights.len(),
                "traffic_lights.captured"
            );
            self.traffic_light_history = Some(vec![lights.clone()]);
            self.light_recurrent_states = response.light_recurrent_states.clone();
        }
    }
}

/// Agents sent with one region's request, in request order: neighbours
/// from other regions, then the region's placed agents, then its pending
/// attribute-only entries.
#[derive(Debug)]
struct ConditioningSet {
    states: Vec<AgentState>,
    attributes: Vec<AgentAttributes>,
    out_of_region: usize,
    predetermined: usize,
    pending: usize,
}

impl ConditioningSet {
    fn assemble(regions: &[Region], index: usize, fov_buffer: f64) -> Self {
        let current = &regions[index];
        let mut states = Vec::new();
        let mut attributes = Vec::new();
        for (_, other) in regions.iter().enumerate().filter(|(j, _)| *j != index) {
            for (state, attrs) in other.agent_states().iter().zip(other.realized_attributes()) {
                if current.within_field_of_view(state.center, fov_buffer) {
                    states.push(*state);
                    attributes.push(*attrs);
                }
            }
        }
        let out_of_region = states.len();

        states.extend_from_slice(current.agent_states());
        attributes.extend_from_slice(current.agent_attributes());

        Self {
            states,
            attributes,
            out_of_region,
            predetermined: current.realized_count(),
            pending: current.pending_count(),
        }
    }

    /// Agents the region itself asks for.
    fn requested(&self) -> usize {
        self.predetermined + self.pending
    }
}

struct RegionJob {
    index: usize,
    center: Point,
    size: f64,
    set: ConditioningSet,
    request: InitializeRequest,
}

enum RegionPhase {
    Pending,
    Attempting(u32),
    Exhausted(u32),
}

enum Resolution {
    Skipped,
    Succeeded {
        response: InitializeResponse,
        attempts: u32,
    },
    Degraded {
        response: InitializeResponse,
        attempts: u32,
    },
    Emptied {
        attempts: u32,
    },
    /// Only reachable in strict mode.
    Failed {
        attempts: u32,
    },
}

enum Step {
    Next(RegionPhase),
    Done(Resolution),
}

struct Stitcher<'a, B: ?Sized> {
    backend: &'a B,
    location: &'a str,
    options: &'a StitchOptions,
    max_attempts: u32,
}

impl<B: RegionInitializer + ?Sized> Stitcher<'_, B> {
    fn job(&self, regions: &[Region], index: usize, ctx: &RunContext) -> RegionJob {
        let region = &regions[index];
        let set = ConditioningSet::assemble(regions, index, self.options.fov_buffer);
        let request = InitializeRequest {
            location: self.location.to_string(),
            states_history: (!set.states.is_empty()).then(|| vec![set.states.clone()]),
            agent_attributes: set.attributes.clone(),
            traffic_light_state_history: ctx.traffic_light_history.clone(),
            location_of_interest: Some(region.center()),
            random_seed: self.options.random_seed,
            get_infractions: self.options.get_infractions,
            model_version: self.options.model_version.clone(),
        };
        RegionJob {
            index,
            center: region.center(),
            size: region.size(),
            set,
            request,
        }
    }

    fn advance(
        &self,
        phase: RegionPhase,
        job: &RegionJob,
        region: &mut Region,
    ) -> Result<Step, StitchError> {
        match phase {
            RegionPhase::Pending => {
                if job.set.requested() == 0 {
                    return Ok(Step::Done(Resolution::Skipped));
                }
                region.clear_agents();
                Ok(Step::Next(RegionPhase::Attempting(1)))
            }
            RegionPhase::Attempting(attempt) => {
                let mut request = job.request.clone();
                request.random_seed = request
                    .random_seed
                    .map(|seed| seed.wrapping_add(u64::from(attempt - 1)));
                match self.backend.initialize(&request) {
                    Ok(response) => Ok(Step::Done(Resolution::Succeeded {
                        response,
                        attempts: attempt,
                    })),
                    Err(err) if err.is_recoverable() => {
                        debug!(
                            target: "large_init::stitch",
                            index = job.index,
                            attempt,
                            error = %err,
                            "region.attempt_failed"
                        );
                        if attempt < self.max_attempts {
                            Ok(Step::Next(RegionPhase::Attempting(attempt + 1)))
                        } else {
                            Ok(Step::Next(RegionPhase::Exhausted(attempt)))
                        }
                    }
                    Err(err) => Err(err.into()),
                }
            }
            RegionPhase::Exhausted(attempts) => {
                if self.options.strict {
                    return Ok(Step::Done(Resolution::Failed { attempts }));
                }
                if job.set.predetermined == 0 {
                    warn!(
                        target: "large_init::stitch",
                        index = job.index,
                        center = %job.center,
                        attempts,
                        "region.emptied"
                    );
                    return Ok(Step::Done(Resolution::Emptied { attempts }));
                }
                let mut request = job.request.clone();
                request
                    .agent_attributes
                    .truncate(job.set.out_of_region + job.set.predetermined);
                warn!(
                    target: "large_init::stitch",
                    index = job.index,
                    center = %job.center,
                    attempts,
                    predetermined = job.set.predetermined,
                    dropped = job.set.pending,
                    "region.degraded"
                );
                let response = self.backend.initialize(&request)?;
                Ok(Step::Done(Resolution::Degraded { response, attempts }))
            }
        }
    }

    fn run_region(
        &self,
        regions: &mut [Region],
        index: usize,
        ctx: &mut RunContext,
    ) -> Result<RegionOutcome, StitchError> {
        let job = self.job(regions, index, ctx);
        let region = &mut regions[index];

        let mut phase = RegionPhase::Pending;
        let resolution = loop {
            match self.advance(phase, &job, region)? {
                Step::Next(next) => phase = next,
                Step::Done(resolution) => break resolution,
            }
        };

        let outcome = match resolution {
            Resolution::Skipped => {
                debug!(target: "large_init::stitch", index, "region.skipped");
                RegionOutcome::Skipped
            }
            Resolution::Succeeded { response, attempts } => {
                write_back(region, &response, job.set.out_of_region);
                ctx.capture_lights(index, &response);
                RegionOutcome::Succeeded { attempts }
            }
            Resolution::Degraded { response, attempts } => {
                let kept = write_back(region, &response, job.set.out_of_region);
                ctx.capture_lights(index, &response);
                RegionOutcome::Degraded { attempts, kept }
            }
            Resolution::Emptied { attempts } => RegionOutcome::Emptied { attempts },
            Resolution::Failed { attempts } => {
                return Err(StitchError::RegionExhausted {
                    location: self.location.to_string(),
                    index,
                    center: job.center,
                    size: job.size,
                    attempts,
                })
            }
        };
        Ok(outcome)
    }
}

/// Copy the response's agents into `region`, skipping the leading
/// `out_of_region` entries that belong to other regions. Returns how many
/// agents were written.
fn write_back(region: &mut Region, response: &InitializeResponse, out_of_region: usize) -> usize {
    let agents = response
        .agent_states
        .iter()
        .zip(&response.agent_attributes)
        .zip(&response.recurrent_states)
        .skip(out_of_region);
    let mut written = 0;
    for ((state, attrs), recurrent) in agents {
        region.insert_agent(*state, *attrs, recurrent.clone());
        written += 1;
    }
    written
}

/// Initialize every region in order and merge the result.
///
/// `regions` is rewritten in place: pending agents are realized (or dropped
/// when a region degrades) and every processed region ends up with one
/// recurrent state per agent. On error the regions processed so far keep
/// their new contents and no merged result is produced.
pub fn stitch<B: RegionInitializer + ?Sized>(
    backend: &B,
    location: &str,
    regions: &mut [Region],
    traffic_light_history: Option<Vec<TrafficLightStates>>,
    options: &StitchOptions,
) -> Result<GlobalResult, StitchError> {
    let stitcher = Stitcher {
        backend,
        location,
        options,
        max_attempts: options.retry.attempts_for(regions.len()),
    };
    let mut ctx = RunContext {
        traffic_light_history,
        light_recurrent_states: None,
    };
    let total = regions.len();
    let mut outcomes = Vec::with_capacity(total);

    for index in 0..total {
        if options
            .cancel
            .as_ref()
            .is_some_and(CancelToken::is_cancelled)
        {
            warn!(
                target: "large_init::stitch",
                processed = index,
                total,
                "stitch.cancelled"
            );
            return Err(StitchError::Cancelled { processed: index });
        }

        let outcome = stitcher.run_region(regions, index, &mut ctx)?;
        let center = regions[index].center();
        info!(
            target: "large_init::stitch",
            index,
            total,
            center = %center,
            agents = regions[index].realized_count(),
            outcome = ?outcome,
            "region.processed"
        );
        if let Some(progress) = &options.progress {
            let sent = progress.send(StitchProgress {
                index,
                total,
                center,
                outcome,
            });
            if sent.is_err() {
                debug!(
                    target: "large_init::stitch",
                    index,
                    "progress.receiver_dropped"
                );
            }
        }
        outcomes.push(outcome);
    }

    let mut result = merge(regions);
    result.traffic_light_state_history = ctx.traffic_light_history;
    result.light_recurrent_states = ctx.light_recurrent_states;
    result.region_outcomes = outcomes;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use scenario_schema::RecurrentState;

    use super::*;

    fn car() -> AgentAttributes {
        AgentAttributes::new(4.5, 1.9, 1.35)
    }

    /// Echoes conditioning states and places new agents at the focus point.
    #[derive(Default)]
    struct Echo {
        fail_first: RefCell<u32>,
        requests: RefCell<Vec<InitializeRequest>>,
    }

    impl RegionInitializer for Echo {
        fn initialize(
            &self,
            request: &InitializeRequest,
        ) -> Result<InitializeResponse, BackendError> {
            self.requests.borrow_mut().push(request.clone());
            let mut remaining = self.fail_first.borrow_mut();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BackendError::infeasible("no room"));
            }
            let focus = request.location_of_interest.unwrap_or_default();
            let mut states = request
                .states_history
                .as_ref()
                .and_then(|history| history.last().cloned())
                .unwrap_or_default();
            while states.len() < request.agent_attributes.len() {
                states.push(AgentState::new(focus.x, focus.y, 0.0, 1.0));
            }
            Ok(InitializeResponse {
                recurrent_states: vec![RecurrentState::zeroed(2); states.len()],
                agent_attributes: request.agent_attributes.clone(),
                agent_states: states,
                traffic_lights_states: None,
                light_recurrent_states: None,
            })
        }
    }

    #[test]
    fn attempts_scale_with_batch() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts_for(1), 1);
        assert_eq!(policy.attempts_for(14), 1);
        assert_eq!(policy.attempts_for(15), 2);
        assert_eq!(policy.attempts_for(47), 4);
        assert_eq!(RetryPolicy::new(0).attempts_for(3), 4);
    }

    #[test]
    fn conditioning_orders_neighbours_then_own_agents() {
        let mut west = Region::with_default_size(Point::new(0.0, 0.0));
        west.insert_agent(
            AgentState::new(45.0, 0.0, 0.0, 0.0),
            car(),
            RecurrentState::zeroed(2),
        );
        west.insert_agent(
            AgentState::new(-40.0, 0.0, 0.0, 0.0),
            car(),
            RecurrentState::zeroed(2),
        );
        let east = Region::with_agents(
            Point::new(50.0, 0.0),
            100.0,
            vec![AgentState::new(70.0, 0.0, 0.0, 0.0)],
            vec![car(), car()],
        )
        .expect("valid region");

        let set = ConditioningSet::assemble(&[west, east], 1, 20.0);
        assert_eq!(set.out_of_region, 1);
        assert_eq!(set.predetermined, 1);
        assert_eq!(set.pending, 1);
        assert_eq!(set.states[0].center, Point::new(45.0, 0.0));
        assert_eq!(set.states[1].center, Point::new(70.0, 0.0));
        assert_eq!(set.attributes.len(), 3);
    }

    #[test]
    fn empty_region_is_skipped_without_a_call() {
        let backend = Echo::default();
        let mut regions = vec![Region::with_default_size(Point::default())];
        let result = stitch(
            &backend,
            "carla:Town03",
            &mut regions,
            None,
            &StitchOptions::default(),
        )
        .expect("stitch succeeds");
        assert!(backend.requests.borrow().is_empty());
        assert_eq!(result.region_outcomes, vec![RegionOutcome::Skipped]);
    }

    #[test]
    fn retries_vary_the_seed() {
        let backend = Echo {
            fail_first: RefCell::new(1),
            ..Echo::default()
        };
        let mut region = Region::with_default_size(Point::default());
        region.extend_pending([car()]);
        let mut regions = vec![region];
        let options = StitchOptions {
            retry: RetryPolicy::new(1),
            ..StitchOptions::default()
        }
        .with_seed(Some(40));

        let result =
            stitch(&backend, "carla:Town03", &mut regions, None, &options).expect("stitch");
        let seeds: Vec<_> = backend
            .requests
            .borrow()
            .iter()
            .map(|request| request.random_seed)
            .collect();
        assert_eq!(seeds, vec![Some(40), Some(41)]);
        assert_eq!(
            result.region_outcomes,
            vec![RegionOutcome::Succeeded { attempts: 2 }]
        );
        assert_eq!(result.agent_count(), 1);
    }

    #[test]
    fn unavailable_backend_is_not_retried() {
        struct Down;
        impl RegionInitializer for Down {
            fn initialize(
                &self,
                _request: &InitializeRequest,
            ) -> Result<InitializeResponse, BackendError> {
                Err(BackendError::unavailable("connection refused"))
            }
        }
        let mut region = Region::with_default_size(Point::default());
        region.extend_pending([car()]);
        let err = stitch(
            &Down,
            "carla:Town03",
            &mut [region],
            None,
            &StitchOptions::default(),
        )
        .expect_err("backend down");
        assert!(matches!(
            err,
            StitchError::Backend(BackendError::Unavailable { .. })
        ));
    }

    #[test]
    fn dropped_progress_receiver_does_not_abort() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        drop(receiver);
        let mut region = Region::with_default_size(Point::default());
        region.extend_pending([car()]);
        let result = stitch(
            &Echo::default(),
            "carla:Town03",
            &mut [region],
            None,
            &StitchOptions::default().with_progress(sender),
        )
        .expect("progress is best effort");
        assert_eq!(
            result.region_outcomes,
            vec![RegionOutcome::Succeeded { attempts: 1 }]
        );
    }

    #[test]
    fn cancelled_token_stops_before_first_region() {
        let token = CancelToken::new();
        token.cancel();
        let mut region = Region::with_default_size(Point::default());
        region.extend_pending([car()]);
        let backend = Echo::default();
        let err = stitch(
            &backend,
            "carla:Town03",
            &mut [region],
            None,
            &StitchOptions::default().with_cancel(token),
        )
        .expect_err("cancelled");
        assert!(matches!(err, StitchError::Cancelled { processed: 0 }));
        assert!(backend.requests.borrow().is_empty());
    }
}
