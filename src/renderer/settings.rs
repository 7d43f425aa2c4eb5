//! Camera and scene state read by the renderer each frame

use glam::Vec3;

/// Number of directional light slots in the scene and the shading uniform block
pub const MAX_LIGHTS: usize = 3;

/// Viewer state. Angles are in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSettings {
    pub pitch: f32,
    pub yaw: f32,
    pub distance: f32,
    pub fov: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            pitch: 0.0,
            yaw: 0.0,
            distance: 150.0,
            fov: 45.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub direction: Vec3,
    pub radiance: Vec3,
    pub enabled: bool,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            direction: Vec3::NEG_Z,
            radiance: Vec3::ZERO,
            enabled: false,
        }
    }
}

/// Scene rotation (degrees) and the fixed set of lights
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneSettings {
    pub pitch: f32,
    pub yaw: f32,
    pub lights: [Light; MAX_LIGHTS],
}

impl Default for SceneSettings {
    /// Three unit-radiance lights, all switched off
    fn default() -> Self {
        let light = |i: usize| Light {
            direction: Vec3::new(
                if i == 1 { 1.0 } else { -1.0 },
                if i == 2 { -1.0 } else { 0.0 },
                0.0,
            )
            .normalize(),
            radiance: Vec3::ONE,
            enabled: false,
        };
        Self {
            pitch: 0.0,
            yaw: 0.0,
            lights: [light(0), light(1), light(2)],
        }
    }
}

impl SceneSettings {
    /// Flip light `index` on or off; out of range indices are ignored
    pub fn toggle_light(&mut self, index: usize) {
        if let Some(light) = self.lights.get_mut(index) {
            light.enabled = !light.enabled;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_lights() {
        let scene = SceneSettings::default();
        assert!(scene.lights.iter().all(|l| !l.enabled && l.radiance == Vec3::ONE));
        assert_eq!(scene.lights[0].direction, Vec3::new(-1.0, 0.0, 0.0));
        assert_eq!(scene.lights[1].direction, Vec3::new(1.0, 0.0, 0.0));
        let d = scene.lights[2].direction;
        assert!((d - Vec3::new(-1.0, -1.0, 0.0).normalize()).length() < 1e-6);
    }

    #[test]
    fn test_toggle_light() {
        let mut scene = SceneSettings::default();
        scene.toggle_light(1);
        assert!(scene.lights[1].enabled);
        scene.toggle_light(1);
        assert!(!scene.lights[1].enabled);
        scene.toggle_light(MAX_LIGHTS);
    }
}
