// mesh.rs — sphere tessellated into latitude/longitude triangle strips
//
// All strips live in one arena: a flat position array and a flat texcoord array,
// with each strip addressing a contiguous vertex range of both.

use std::ops::Range;

use crate::maths::{
    int_pow, NINETY_DEGREES, ONE_EIGHTY_DEGREES, ONE_TWENTY_DEGREES, THREE_SIXTY_DEGREES,
};

pub const MAXIMUM_ALLOWED_DEPTH: i32 = 5;

/// Strips per depth level, from the icosahedron's five faces around a pole.
const VERTEX_MAGIC_NUMBER: i32 = 5;

pub type Vertex3 = [f32; 3];
pub type TexCoord2 = [f32; 2];

/// One triangle-strip band of the sphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strip {
    first: u32,
    count: u32,
}

impl Strip {
    /// Vertex range inside the mesh arena, ready for a draw call.
    pub fn vertices(&self) -> Range<u32> {
        self.first..self.first + self.count
    }

    #[cfg(test)]
    pub fn vertex_count(&self) -> u32 {
        self.count
    }

    #[cfg(test)]
    fn indices(&self) -> Range<usize> {
        self.first as usize..(self.first + self.count) as usize
    }
}

#[derive(Debug, Clone)]
pub struct SphereMesh {
    positions: Vec<Vertex3>,
    tex_coords: Vec<TexCoord2>,
    strips: Vec<Strip>,
}

impl SphereMesh {
    /// Tessellates a sphere of `radius`; `depth` is clamped to `1..=MAXIMUM_ALLOWED_DEPTH`.
    pub fn build(depth: i32, radius: f32) -> Self {
        let depth = depth.clamp(1, MAXIMUM_ALLOWED_DEPTH);

        let total_strips = int_pow(2, depth - 1) * VERTEX_MAGIC_NUMBER;
        let vertices_per_strip = int_pow(2, depth) * 3;
        let altitude_step = ONE_TWENTY_DEGREES / int_pow(2, depth) as f64;
        let azimuth_step = THREE_SIXTY_DEGREES / total_strips as f64;
        let radius_f64 = radius as f64;

        let total_vertices = (total_strips * vertices_per_strip) as usize;
        let mut positions = Vec::with_capacity(total_vertices);
        let mut tex_coords = Vec::with_capacity(total_vertices);
        let mut strips = Vec::with_capacity(total_strips as usize);

        for strip in 0..total_strips {
            let first = positions.len() as u32;
            let mut altitude = NINETY_DEGREES;
            let mut azimuth = strip as f64 * azimuth_step;

            for _ in 0..vertices_per_strip / 2 {
                positions.push(sphere_point(radius_f64, altitude, azimuth));
                tex_coords.push(sphere_tex_coord(altitude, azimuth));

                altitude -= altitude_step;
                azimuth -= azimuth_step / 2.0;
                positions.push(sphere_point(radius_f64, altitude, azimuth));
                tex_coords.push(sphere_tex_coord(altitude, azimuth));

                azimuth += azimuth_step;
            }

            strips.push(Strip {
                first,
                count: vertices_per_strip as u32,
            });
        }

        log::debug!(
            "sphere mesh built: depth={} radius={} strips={} vertices/strip={}",
            depth,
            radius,
            total_strips,
            vertices_per_strip
        );

        Self {
            positions,
            tex_coords,
            strips,
        }
    }

    pub fn strips(&self) -> &[Strip] {
        &self.strips
    }

    /// The whole position arena, for a single buffer upload.
    pub fn positions(&self) -> &[Vertex3] {
        &self.positions
    }

    pub fn tex_coords(&self) -> &[TexCoord2] {
        &self.tex_coords
    }

    #[cfg(test)]
    pub fn strip_positions(&self, strip: &Strip) -> &[Vertex3] {
        &self.positions[strip.indices()]
    }

    #[cfg(test)]
    pub fn strip_tex_coords(&self, strip: &Strip) -> &[TexCoord2] {
        &self.tex_coords[strip.indices()]
    }
}

fn sphere_point(radius: f64, altitude: f64, azimuth: f64) -> Vertex3 {
    let y = radius * altitude.sin();
    let h = radius * altitude.cos();
    let z = h * azimuth.sin();
    let x = h * azimuth.cos();
    [x as f32, y as f32, z as f32]
}

/// `u` follows the unwrapped azimuth, so it stays continuous along a strip that crosses
/// the 0/2π meridian and may leave [0, 1] there; the sampler repeats it.
fn sphere_tex_coord(altitude: f64, azimuth: f64) -> TexCoord2 {
    let u = 1.0 - azimuth / THREE_SIXTY_DEGREES;
    let v = 1.0 - (altitude + NINETY_DEGREES) / ONE_EIGHTY_DEGREES;
    [u as f32, v.clamp(0.0, 1.0) as f32]
}
