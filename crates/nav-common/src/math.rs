//! 2D (xz-plane) geometry used by steering and obstacle avoidance

/// Squares a value
#[inline]
pub fn sqr(x: f32) -> f32 {
    x * x
}

/// Signed area of the triangle (a, b, c) projected to the xz-plane.
/// Positive when c lies to the left of the directed line a -> b.
#[inline]
pub fn tri_area_2d(a: &[f32; 3], b: &[f32; 3], c: &[f32; 3]) -> f32 {
    let abx = b[0] - a[0];
    let abz = b[2] - a[2];
    let acx = c[0] - a[0];
    let acz = c[2] - a[2];
    abx * acz - abz * acx
}

/// Squared distance from `pt` to the segment `[p, q]` in the xz-plane,
/// along with the clamped parameter of the closest point.
pub fn dist_pt_seg_sqr_2d(pt: &[f32; 3], p: &[f32; 3], q: &[f32; 3]) -> (f32, f32) {
    let pqx = q[0] - p[0];
    let pqz = q[2] - p[2];
    let dx = pt[0] - p[0];
    let dz = pt[2] - p[2];
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);
    let dx = p[0] + t * pqx - pt[0];
    let dz = p[2] + t * pqz - pt[2];
    (dx * dx + dz * dz, t)
}

/// Intersects a ray starting at the origin with direction `dir` against a
/// circle at `center` with radius `rad`, all in the xz-plane. Returns the
/// smallest non-negative hit time.
pub fn intersect_ray_circle_2d(dir: &[f32; 3], center: &[f32; 3], rad: f32) -> Option<f32> {
    let a = dir[0] * dir[0] + dir[2] * dir[2];
    if a < 1e-8 {
        return None;
    }
    let b = 2.0 * (dir[0] * center[0] + dir[2] * center[2]);
    let c = center[0] * center[0] + center[2] * center[2] - rad * rad;
    // b is negated relative to the usual form: solve a t^2 - b t + c = 0
    let discr = b * b - 4.0 * a * c;
    if discr < 0.0 {
        return None;
    }
    let sqrt_discr = discr.sqrt();
    let t0 = (b - sqrt_discr) / (2.0 * a);
    let t1 = (b + sqrt_discr) / (2.0 * a);
    if t0 >= 0.0 {
        Some(t0)
    } else if t1 >= 0.0 {
        Some(t1)
    } else {
        None
    }
}

/// First time at which a point moving from the origin with velocity `vel`
/// comes within `rad` of the segment `[p, q]` (xz-plane sweep test).
///
/// Checks the two endpoint circles and the two offset edges of the
/// inflated segment; returns the smallest non-negative crossing time.
pub fn sweep_circle_segment_2d(vel: &[f32; 3], p: &[f32; 3], q: &[f32; 3], rad: f32) -> Option<f32> {
    let mut best: Option<f32> = None;
    let mut consider = |t: f32| {
        if t >= 0.0 && best.is_none_or(|b| t < b) {
            best = Some(t);
        }
    };

    if let Some(t) = intersect_ray_circle_2d(vel, p, rad) {
        consider(t);
    }
    if let Some(t) = intersect_ray_circle_2d(vel, q, rad) {
        consider(t);
    }

    let dx = q[0] - p[0];
    let dz = q[2] - p[2];
    let seg_len = (dx * dx + dz * dz).sqrt();
    if seg_len > 1e-6 {
        // Unit normal of the segment; crossing happens where the signed
        // distance to the segment line equals +-rad.
        let nx = dz / seg_len;
        let nz = -dx / seg_len;
        let vn = vel[0] * nx + vel[2] * nz;
        if vn.abs() > 1e-8 {
            let pn = p[0] * nx + p[2] * nz;
            for offset in [rad, -rad] {
                let t = (pn + offset) / vn;
                if t >= 0.0 {
                    // Reject crossings beyond the segment extent.
                    let hx = vel[0] * t - p[0];
                    let hz = vel[2] * t - p[2];
                    let along = (hx * dx + hz * dz) / seg_len;
                    if (0.0..=seg_len).contains(&along) {
                        consider(t);
                    }
                }
            }
        }
    }

    best
}
