use rand::distributions::{Distribution, WeightedError, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use scenario_schema::{AgentAttributes, Birdview};
use thiserror::Error;

use crate::backend::{BackendError, LocationInfoRequest, MapInfo};
use crate::region::Region;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("no drivable surface in any of the {regions} regions at {location}")]
    NoDrivableArea { location: String, regions: usize },
    #[error("invalid drivable-area weights: {0}")]
    Weights(#[from] WeightedError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Share of `birdview` pixels that are not off-road. A pixel is off-road
/// when the sum of its channels is at most `offroad_threshold`.
pub fn drivable_ratio(birdview: &Birdview, offroad_threshold: u16) -> f64 {
    let total = birdview.pixel_count();
    if total == 0 {
        return 0.0;
    }
    let offroad = birdview
        .pixels()
        .filter(|[r, g, b]| u16::from(*r) + u16::from(*g) + u16::from(*b) <= offroad_threshold)
        .count() as u64;
    (total - offroad) as f64 / total as f64
}

/// Copy `regions` and append `total_agents` pending agents, assigned by
/// weighted sampling with replacement over each region's drivable ratio.
///
/// A region with little road can receive nothing. Seeding fixes the counts
/// for a given sequence of map responses; without a seed the generator is
/// drawn from system entropy.
pub fn allocate_by_drivable_area<M: MapInfo + ?Sized>(
    map: &M,
    location: &str,
    regions: &[Region],
    total_agents: usize,
    seed: Option<u64>,
    template: AgentAttributes,
    offroad_threshold: u16,
) -> Result<Vec<Region>, AllocationError> {
    let mut ratios = Vec::with_capacity(regions.len());
    for (index, region) in regions.iter().enumerate() {
        let info = map.location_info(&LocationInfoRequest {
            location: location.to_string(),
            rendering_fov: Some(region.size().round() as u32),
            rendering_center: Some(region.center()),
        })?;
        let ratio = drivable_ratio(&info.birdview, offroad_threshold);
        tracing::debug!(
            target: "large_init::allocation",
            index,
            center = %region.center(),
            ratio,
            "region.drivable_ratio"
        );
        ratios.push(ratio);
    }

    let mut rng = match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };
    let counts = sample_counts(&ratios, total_agents, &mut rng).map_err(|err| match err {
        WeightedError::NoItem | WeightedError::AllWeightsZero => AllocationError::NoDrivableArea {
            location: location.to_string(),
            regions: regions.len(),
        },
        other => AllocationError::Weights(other),
    })?;

    tracing::info!(
        target: "large_init::allocation",
        location,
        regions = regions.len(),
        total_agents,
        "allocation.completed"
    );

    Ok(regions
        .iter()
        .zip(counts)
        .map(|(region, count)| {
            let mut region = region.clone();
            region.extend_pending(std::iter::repeat(template).take(count));
            region
        })
        .collect())
}

/// Multinomial draw of `total` items over `ratios`, returning per-index counts.
pub fn sample_counts<R: Rng + ?Sized>(
    ratios: &[f64],
    total: usize,
    rng: &mut R,
) -> Result<Vec<usize>, WeightedError> {
    let sum: f64 = ratios.iter().sum();
    if ratios.is_empty() {
        return Err(WeightedError::NoItem);
    }
    if sum.is_nan() || sum <= 0.0 {
        return Err(WeightedError::AllWeightsZero);
    }
    let weights: Vec<f64> = ratios.iter().map(|ratio| ratio / sum).collect();
    let distribution = WeightedIndex::new(&weights)?;

    let mut counts = vec![0usize; ratios.len()];
    for _ in 0..total {
        counts[distribution.sample(rng)] += 1;
    }
    Ok(counts)
}
