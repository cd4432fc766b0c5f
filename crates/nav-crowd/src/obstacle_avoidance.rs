//! Sampling-based local obstacle avoidance
//!
//! Candidate velocities are scored against the nearby moving circles and
//! static wall segments; the candidate with the lowest penalty wins. The
//! penalty combines time-to-impact with how far the candidate strays from
//! the desired and current velocities. Two samplers share the scoring:
//! a uniform grid over the reachable velocity disc and an adaptive
//! pattern that zooms in around the best sample over several passes.

use nav_common::math::{intersect_ray_circle_2d, sweep_circle_segment_2d};
use nav_common::vector::{vdist_2d, vlen_2d, vsub};

/// Maximum circle obstacles per query
pub const MAX_OBSTACLE_CIRCLES: usize = 6;
/// Maximum segment obstacles per query
pub const MAX_OBSTACLE_SEGMENTS: usize = 8;

/// A moving circular obstacle (another agent)
#[derive(Debug, Clone, Copy, Default)]
pub struct ObstacleCircle {
    /// Position
    pub p: [f32; 3],
    /// Current velocity
    pub vel: [f32; 3],
    /// Desired velocity
    pub dvel: [f32; 3],
    /// Radius
    pub rad: f32,
}

/// A static wall segment, walkable side on the left of `p -> q`
#[derive(Debug, Clone, Copy, Default)]
pub struct ObstacleSegment {
    pub p: [f32; 3],
    pub q: [f32; 3],
    /// The querying agent already touches this segment
    pub touch: bool,
}

/// Tuning parameters for one avoidance quality profile
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct ObstacleAvoidanceParams {
    /// Penalty weight for deviating from the desired velocity
    pub weight_des_vel: f32,
    /// Penalty weight for deviating from the current velocity
    pub weight_cur_vel: f32,
    /// Penalty weight for a short time to impact
    pub weight_toi: f32,
    /// Time horizon in seconds; impacts beyond it are ignored
    pub horiz_time: f32,
    /// Samples per axis of the grid sampler (odd keeps zero on-grid)
    pub grid_size: u8,
    /// Samples per ring of the adaptive sampler
    pub adaptive_divs: u8,
    /// Rings per pass of the adaptive sampler
    pub adaptive_rings: u8,
    /// Refinement passes of the adaptive sampler
    pub adaptive_depth: u8,
}

impl Default for ObstacleAvoidanceParams {
    fn default() -> Self {
        Self {
            weight_des_vel: 2.0,
            weight_cur_vel: 0.75,
            weight_toi: 2.5,
            horiz_time: 2.5,
            grid_size: 33,
            adaptive_divs: 7,
            adaptive_rings: 2,
            adaptive_depth: 5,
        }
    }
}

/// One scored velocity sample captured for debugging
#[derive(Debug, Clone, Copy)]
pub struct SampleRecord {
    /// Candidate velocity
    pub vel: [f32; 3],
    /// Total penalty
    pub penalty: f32,
    /// Desired-velocity deviation term
    pub vpen: f32,
    /// Current-velocity deviation term
    pub vcpen: f32,
    /// Time-to-impact term
    pub tpen: f32,
}

/// Collects every scored sample of a velocity query
#[derive(Debug, Default)]
pub struct ObstacleAvoidanceDebugData {
    samples: Vec<SampleRecord>,
}

impl ObstacleAvoidanceDebugData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }

    pub fn samples(&self) -> &[SampleRecord] {
        &self.samples
    }

    fn record(&mut self, sample: SampleRecord) {
        self.samples.push(sample);
    }
}

/// Obstacle set and scoring state for one agent's velocity selection
#[derive(Debug)]
pub struct ObstacleAvoidanceQuery {
    params: ObstacleAvoidanceParams,
    circles: [ObstacleCircle; MAX_OBSTACLE_CIRCLES],
    ncircles: usize,
    segments: [ObstacleSegment; MAX_OBSTACLE_SEGMENTS],
    nsegments: usize,
}

impl Default for ObstacleAvoidanceQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl ObstacleAvoidanceQuery {
    pub fn new() -> Self {
        Self {
            params: ObstacleAvoidanceParams::default(),
            circles: [ObstacleCircle::default(); MAX_OBSTACLE_CIRCLES],
            ncircles: 0,
            segments: [ObstacleSegment::default(); MAX_OBSTACLE_SEGMENTS],
            nsegments: 0,
        }
    }

    /// Drops all registered obstacles
    pub fn reset(&mut self) {
        self.ncircles = 0;
        self.nsegments = 0;
    }

    /// Registers a moving circle obstacle; ignored beyond capacity
    pub fn add_circle(&mut self, p: &[f32; 3], rad: f32, vel: &[f32; 3], dvel: &[f32; 3]) {
        if self.ncircles >= MAX_OBSTACLE_CIRCLES {
            return;
        }
        self.circles[self.ncircles] = ObstacleCircle {
            p: *p,
            vel: *vel,
            dvel: *dvel,
            rad,
        };
        self.ncircles += 1;
    }

    /// Registers a wall segment obstacle; ignored beyond capacity
    pub fn add_segment(&mut self, p: &[f32; 3], q: &[f32; 3]) {
        if self.nsegments >= MAX_OBSTACLE_SEGMENTS {
            return;
        }
        self.segments[self.nsegments] = ObstacleSegment {
            p: *p,
            q: *q,
            touch: false,
        };
        self.nsegments += 1;
    }

    pub fn circle_count(&self) -> usize {
        self.ncircles
    }

    pub fn segment_count(&self) -> usize {
        self.nsegments
    }

    /// Marks segments the agent is already in contact with. Touching
    /// segments are scored by direction rather than by sweep, since the
    /// sweep would report an immediate hit for every candidate.
    fn prepare(&mut self, pos: &[f32; 3], rad: f32) {
        for seg in &mut self.segments[..self.nsegments] {
            let (dist_sqr, _) = nav_common::math::dist_pt_seg_sqr_2d(pos, &seg.p, &seg.q);
            seg.touch = dist_sqr < (rad + 0.01) * (rad + 0.01);
        }
    }

    /// Scores one candidate velocity; lower is better.
    fn process_sample(
        &self,
        vcand: &[f32; 3],
        pos: &[f32; 3],
        rad: f32,
        vel: &[f32; 3],
        dvel: &[f32; 3],
        debug: &mut Option<&mut ObstacleAvoidanceDebugData>,
    ) -> f32 {
        let vpen = self.params.weight_des_vel * vdist_2d(vcand, dvel);
        let vcpen = self.params.weight_cur_vel * vdist_2d(vcand, vel);

        let mut tmin = self.params.horiz_time;

        for circle in &self.circles[..self.ncircles] {
            // Relative velocity of the candidate against the obstacle.
            let vab = vsub(vcand, &circle.vel);
            let relp = vsub(&circle.p, pos);
            if let Some(t) = intersect_ray_circle_2d(&vab, &relp, circle.rad + rad) {
                if t > 0.0 && t < tmin {
                    tmin = t;
                }
            }
        }

        for seg in &self.segments[..self.nsegments] {
            if seg.touch {
                // Already against the wall: candidates heading into it
                // collide immediately, the rest pass freely.
                let d = vsub(&seg.q, &seg.p);
                let n = [d[2], 0.0, -d[0]];
                if nav_common::vector::vdot_2d(&n, vcand) > 0.0 {
                    tmin = 0.0;
                }
                continue;
            }
            let p = vsub(&seg.p, pos);
            let q = vsub(&seg.q, pos);
            if let Some(t) = sweep_circle_segment_2d(vcand, &p, &q, rad) {
                if t < tmin {
                    tmin = t;
                }
            }
        }

        let tpen = if tmin < self.params.horiz_time {
            let mut pen = self.params.weight_toi * (1.0 / tmin.max(0.001));
            if tmin < 0.01 {
                pen *= 10.0;
            }
            pen
        } else {
            0.0
        };

        let penalty = vpen + vcpen + tpen;
        if let Some(dd) = debug.as_deref_mut() {
            dd.record(SampleRecord {
                vel: *vcand,
                penalty,
                vpen,
                vcpen,
                tpen,
            });
        }
        penalty
    }

    /// Picks a velocity by scoring a uniform grid over the square
    /// `[-max_speed, max_speed]` in both planar axes, rejecting samples
    /// outside the reachable disc. Returns the chosen velocity and the
    /// number of samples scored.
    #[allow(clippy::too_many_arguments)]
    pub fn sample_velocity_grid(
        &mut self,
        pos: &[f32; 3],
        rad: f32,
        max_speed: f32,
        vel: &[f32; 3],
        dvel: &[f32; 3],
        params: &ObstacleAvoidanceParams,
        mut debug: Option<&mut ObstacleAvoidanceDebugData>,
    ) -> ([f32; 3], usize) {
        self.params = *params;
        self.prepare(pos, rad);
        if let Some(dd) = debug.as_deref_mut() {
            dd.reset();
        }

        let n = self.params.grid_size.max(2) as usize;
        let cs = max_speed * 2.0 / (n - 1) as f32;
        let half = cs * 0.5;

        let mut best = *dvel;
        let mut best_penalty = f32::MAX;
        let mut nsamples = 0;

        for y in 0..n {
            for x in 0..n {
                let vcand = [
                    x as f32 * cs - max_speed,
                    0.0,
                    y as f32 * cs - max_speed,
                ];
                if vlen_2d(&vcand) > max_speed + half {
                    continue;
                }
                let penalty = self.process_sample(&vcand, pos, rad, vel, dvel, &mut debug);
                nsamples += 1;
                if penalty < best_penalty {
                    best_penalty = penalty;
                    best = vcand;
                }
            }
        }

        (best, nsamples)
    }

    /// Picks a velocity with an adaptive ring pattern centered on the
    /// desired velocity, halving the pattern radius and recentering on
    /// the best sample each pass. Returns the chosen velocity and the
    /// number of samples scored.
    #[allow(clippy::too_many_arguments)]
    pub fn sample_velocity_adaptive(
        &mut self,
        pos: &[f32; 3],
        rad: f32,
        max_speed: f32,
        vel: &[f32; 3],
        dvel: &[f32; 3],
        params: &ObstacleAvoidanceParams,
        mut debug: Option<&mut ObstacleAvoidanceDebugData>,
    ) -> ([f32; 3], usize) {
        self.params = *params;
        self.prepare(pos, rad);
        if let Some(dd) = debug.as_deref_mut() {
            dd.reset();
        }

        let divs = self.params.adaptive_divs.clamp(1, 32) as usize;
        let rings = self.params.adaptive_rings.clamp(1, 4) as usize;
        let depth = self.params.adaptive_depth.max(1) as usize;

        let mut center = *dvel;
        let mut pattern_radius = max_speed;
        let mut best = *dvel;
        let mut best_penalty = f32::MAX;
        let mut nsamples = 0;

        for _ in 0..depth {
            let mut pass_best = center;
            let mut pass_best_penalty = f32::MAX;

            let mut score = |vcand: [f32; 3],
                             this: &Self,
                             debug: &mut Option<&mut ObstacleAvoidanceDebugData>,
                             nsamples: &mut usize| {
                if vlen_2d(&vcand) > max_speed + 0.001 {
                    return None;
                }
                *nsamples += 1;
                Some(this.process_sample(&vcand, pos, rad, vel, dvel, debug))
            };

            if let Some(p) = score(center, self, &mut debug, &mut nsamples) {
                if p < pass_best_penalty {
                    pass_best_penalty = p;
                    pass_best = center;
                }
            }

            for ring in 1..=rings {
                let ring_radius = pattern_radius * ring as f32 / rings as f32;
                let samples_in_ring = divs * ring;
                for s in 0..samples_in_ring {
                    let angle = std::f32::consts::TAU * s as f32 / samples_in_ring as f32;
                    let vcand = [
                        center[0] + angle.cos() * ring_radius,
                        0.0,
                        center[2] + angle.sin() * ring_radius,
                    ];
                    if let Some(p) = score(vcand, self, &mut debug, &mut nsamples) {
                        if p < pass_best_penalty {
                            pass_best_penalty = p;
                            pass_best = vcand;
                        }
                    }
                }
            }

            if pass_best_penalty < best_penalty {
                best_penalty = pass_best_penalty;
                best = pass_best;
            }
            center = pass_best;
            pattern_radius *= 0.5;
        }

        (best, nsamples)
    }
}
