// ============================================================================
// candidate.rs — TriEvo
// One triangle of the population, laid out to match the WGSL `Candidate`.
// ============================================================================

use bytemuck::{Pod, Zeroable};

/// A triangle with integer pixel-space vertices and an RGBA colour.
///
/// WGSL layout: three `vec2<i32>` (24 bytes), 8 bytes of padding so the
/// `vec4<f32>` colour starts on a 16-byte boundary, 48 bytes total.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Candidate {
    pub vertices: [[i32; 2]; 3],
    pub _pad: [i32; 2],
    pub color: [f32; 4],
}

impl Candidate {
    pub fn new(vertices: [[i32; 2]; 3], color: [f32; 4]) -> Self {
        Self {
            vertices,
            _pad: [0; 2],
            color,
        }
    }
}
