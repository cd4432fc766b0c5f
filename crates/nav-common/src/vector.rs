//! Vector helpers for `[f32; 3]` positions
//!
//! Crowd simulation state is stored as plain `[f32; 3]` arrays; these
//! helpers cover the handful of operations the hot paths need. The `y`
//! component is height, the xz-plane is the walkable surface.

/// Adds two vectors
#[inline]
pub fn vadd(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

/// Subtracts `b` from `a`
#[inline]
pub fn vsub(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// Scales a vector by a scalar
#[inline]
pub fn vscale(v: &[f32; 3], s: f32) -> [f32; 3] {
    [v[0] * s, v[1] * s, v[2] * s]
}

/// `a + b * s`
#[inline]
pub fn vmad(a: &[f32; 3], b: &[f32; 3], s: f32) -> [f32; 3] {
    [a[0] + b[0] * s, a[1] + b[1] * s, a[2] + b[2] * s]
}

/// Linear interpolation between two points
#[inline]
pub fn vlerp(a: &[f32; 3], b: &[f32; 3], t: f32) -> [f32; 3] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

/// Length of a vector
#[inline]
pub fn vlen(v: &[f32; 3]) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Squared length of a vector
#[inline]
pub fn vlen_sqr(v: &[f32; 3]) -> f32 {
    v[0] * v[0] + v[1] * v[1] + v[2] * v[2]
}

/// Distance between two points
#[inline]
pub fn vdist(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    vlen(&vsub(b, a))
}

/// Squared distance between two points
#[inline]
pub fn vdist_sqr(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    vlen_sqr(&vsub(b, a))
}

/// Distance between two points in the xz-plane
#[inline]
pub fn vdist_2d(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    let dx = b[0] - a[0];
    let dz = b[2] - a[2];
    (dx * dx + dz * dz).sqrt()
}

/// Squared distance between two points in the xz-plane
#[inline]
pub fn vdist_2d_sqr(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    let dx = b[0] - a[0];
    let dz = b[2] - a[2];
    dx * dx + dz * dz
}

/// Length of a vector in the xz-plane
#[inline]
pub fn vlen_2d(v: &[f32; 3]) -> f32 {
    (v[0] * v[0] + v[2] * v[2]).sqrt()
}

/// Dot product of two vectors in the xz-plane
#[inline]
pub fn vdot_2d(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    a[0] * b[0] + a[2] * b[2]
}

/// Normalizes a vector in place; leaves near-zero vectors untouched
#[inline]
pub fn vnormalize(v: &mut [f32; 3]) {
    let len = vlen(v);
    if len > 1e-4 {
        let inv = 1.0 / len;
        v[0] *= inv;
        v[1] *= inv;
        v[2] *= inv;
    }
}

/// Normalizes a vector in the xz-plane, zeroing the y component
#[inline]
pub fn vnormalize_2d(v: &[f32; 3]) -> [f32; 3] {
    let len = vlen_2d(v);
    if len > 1e-4 {
        [v[0] / len, 0.0, v[2] / len]
    } else {
        [0.0, 0.0, 0.0]
    }
}

/// Converts to a [`glam::Vec3`] for interop with consumer math
#[inline]
pub fn to_vec3(v: &[f32; 3]) -> glam::Vec3 {
    glam::Vec3::from_array(*v)
}

/// Converts from a [`glam::Vec3`]
#[inline]
pub fn from_vec3(v: glam::Vec3) -> [f32; 3] {
    v.to_array()
}
