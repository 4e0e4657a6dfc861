use scenario_schema::{Point, TrafficLightStates};

use crate::allocation::allocate_by_drivable_area;
use crate::backend::{LocationInfoRequest, MapInfo, RegionInitializer};
use crate::config::LargeInitConfig;
use crate::grid::{build_grid, AreaShape};
use crate::merge::GlobalResult;
use crate::region::Region;
use crate::stitching::{stitch, StitchOptions};
use crate::LargeInitError;

/// Grid over an area and spread agents across it by drivable surface.
///
/// Without `area` the extent is the bounding box of the location's
/// bounding polygon. Without `total_agents` every region is budgeted
/// `default_agents_per_region` on average.
pub fn regions_default<M: MapInfo + ?Sized>(
    map: &M,
    location: &str,
    total_agents: Option<usize>,
    area: Option<AreaShape>,
    map_center: Point,
    seed: Option<u64>,
    config: &LargeInitConfig,
) -> Result<Vec<Region>, LargeInitError> {
    let area = match area {
        Some(area) => area,
        None => {
            let info = map.location_info(&LocationInfoRequest {
                location: location.to_string(),
                rendering_fov: None,
                rendering_center: Some(map_center),
            })?;
            info.bounding_polygon
                .as_deref()
                .and_then(AreaShape::bounding)
                .ok_or_else(|| LargeInitError::MissingBoundingPolygon {
                    location: location.to_string(),
                })?
        }
    };

    let grid = build_grid(area, map_center, config.grid_stride, config.region_size)?;
    let total = total_agents.unwrap_or(config.default_agents_per_region * grid.len());
    tracing::info!(
        target: "large_init::allocation",
        location,
        width = area.width,
        height = area.height,
        regions = grid.len(),
        total_agents = total,
        "regions_default.planned"
    );

    let regions = allocate_by_drivable_area(
        map,
        location,
        &grid,
        total,
        seed,
        config.default_vehicle,
        config.birdview_offroad_threshold,
    )?;
    Ok(regions)
}

/// `regions_default` followed by `stitch` against one backend.
#[allow(clippy::too_many_arguments)]
pub fn initialize_area<B>(
    backend: &B,
    location: &str,
    total_agents: Option<usize>,
    area: Option<AreaShape>,
    map_center: Point,
    traffic_light_history: Option<Vec<TrafficLightStates>>,
    config: &LargeInitConfig,
    options: &StitchOptions,
) -> Result<(Vec<Region>, GlobalResult), LargeInitError>
where
    B: RegionInitializer + MapInfo + ?Sized,
{
    let mut regions = regions_default(
        backend,
        location,
        total_agents,
        area,
        map_center,
        options.random_seed,
        config,
    )?;
    let result = stitch(backend, location, &mut regions, traffic_light_history, options)?;
    Ok((regions, result))
}
