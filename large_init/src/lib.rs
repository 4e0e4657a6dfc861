//! Large-area agent initialization.
//!
//! The remote initializer only places agents inside a small square. To
//! populate a whole map the area is tiled with overlapping [`Region`]s
//! ([`build_grid`]), agents are spread over them by drivable surface
//! ([`allocate_by_drivable_area`]), and the regions are initialized one by
//! one with their neighbours' agents as conditioning ([`stitch`]) before
//! being flattened into a single [`GlobalResult`].

pub mod allocation;
pub mod backend;
pub mod config;
pub mod grid;
mod merge;
pub mod mock;
mod pipeline;
pub mod region;
pub mod stitching;

use thiserror::Error;

pub use allocation::{allocate_by_drivable_area, drivable_ratio, AllocationError};
pub use backend::{
    BackendError, InitializeRequest, InitializeResponse, LocationInfo, LocationInfoRequest,
    MapInfo, RegionInitializer,
};
pub use config::{load_large_init_config_from_env, LargeInitConfig, LargeInitConfigError};
pub use grid::{build_grid, AreaShape, GridError};
pub use merge::{merge, GlobalResult};
pub use mock::MockBackend;
pub use pipeline::{initialize_area, regions_default};
pub use region::{Region, RegionError, DEFAULT_REGION_SIZE};
pub use stitching::{
    stitch, CancelToken, RegionOutcome, RetryPolicy, StitchError, StitchOptions, StitchProgress,
};

#[derive(Debug, Error)]
pub enum LargeInitError {
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Region(#[from] RegionError),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Stitch(#[from] StitchError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("location {location} reports no bounding polygon; pass an explicit area")]
    MissingBoundingPolygon { location: String },
}
