//! GPU layouts of the uniform blocks (std140 compatible)

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

use super::settings::MAX_LIGHTS;

/// Group 0, binding 0 of the skybox and model programs
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TransformUniform {
    pub view_projection: Mat4,
    pub sky_projection: Mat4,
    pub scene_rotation: Mat4,
}

impl Default for TransformUniform {
    fn default() -> Self {
        Self {
            view_projection: Mat4::IDENTITY,
            sky_projection: Mat4::IDENTITY,
            scene_rotation: Mat4::IDENTITY,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct LightUniform {
    pub direction: Vec4,
    pub radiance: Vec4,
}

/// Group 0, binding 1 of the model program
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct ShadingUniform {
    pub lights: [LightUniform; MAX_LIGHTS],
    pub eye_position: Vec4,
}

/// Roughness of one prefiltered mip level
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PrefilterUniform {
    pub roughness: f32,
    pub _padding: [f32; 3],
}

impl PrefilterUniform {
    pub fn new(roughness: f32) -> Self {
        Self {
            roughness,
            _padding: [0.0; 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_sizes_match_shader_layout() {
        assert_eq!(std::mem::size_of::<TransformUniform>(), 3 * 64);
        assert_eq!(std::mem::size_of::<ShadingUniform>(), MAX_LIGHTS * 32 + 16);
        assert_eq!(std::mem::size_of::<PrefilterUniform>(), 16);
    }
}
