//! Multi-agent crowd simulation over an abstract navigation mesh
//!
//! Moves a fixed pool of agents across a shared walkable surface toward
//! individually requested targets, avoiding moving neighbors and static
//! geometry while bounding per-tick planning cost. Navigation-mesh access
//! goes through the [`NavQuery`] trait, so any polygon mesh that can
//! answer nearest-polygon, path, raycast, and wall queries can host a
//! crowd.
//!
//! # Components
//!
//! - [`Crowd`] - agent pool and the per-tick update pipeline
//! - [`PathCorridor`] - polygon corridor an agent follows and re-shortens
//! - [`PathQueue`] - time-sliced pool of asynchronous path requests
//! - [`ProximityGrid`] - spatial hash for neighbor lookups
//! - [`LocalBoundary`] - cached wall segments around an agent
//! - [`ObstacleAvoidanceQuery`] - sampling-based velocity selection
//!
//! # Example
//!
//! ```ignore
//! use nav_crowd::{AgentParams, Crowd};
//!
//! let mut crowd = Crowd::new(&nav, 128, 0.6)?;
//! let idx = crowd.add_agent(&spawn_pos, &AgentParams::default())?;
//! crowd.request_move_target(idx, target_poly, &target_pos)?;
//! loop {
//!     crowd.update(1.0 / 60.0, None)?;
//! }
//! ```

pub mod crowd;
pub mod local_boundary;
pub mod nav_query;
pub mod obstacle_avoidance;
pub mod path_corridor;
pub mod path_queue;
pub mod proximity_grid;

#[cfg(test)]
mod test_nav;

pub use crowd::{
    Agent, AgentParams, AgentState, Crowd, CrowdStatistics, Neighbor, TargetState,
    UpdateFlags, MAX_AVOIDANCE_PROFILES, MAX_QUERY_FILTERS,
};
pub use local_boundary::LocalBoundary;
pub use nav_query::{
    NavQuery, PathPlan, PlanStatus, PolyRef, QueryFilter, RaycastHit, StraightPathPoint,
    STRAIGHTPATH_END, STRAIGHTPATH_OFFMESH_CONNECTION, STRAIGHTPATH_START,
};
pub use obstacle_avoidance::{
    ObstacleAvoidanceDebugData, ObstacleAvoidanceParams, ObstacleAvoidanceQuery, SampleRecord,
};
pub use path_corridor::{Corner, PathCorridor};
pub use path_queue::{PathQueue, PathQueueRef, QueryStatus, PATHQ_INVALID};
pub use proximity_grid::ProximityGrid;

pub use nav_common::{Error, Result};
