//! Mouse and keyboard control of the camera and scene
//!
//! Left drag orbits the camera, right drag rotates the scene, the wheel moves
//! the camera in and out and F1 to F3 switch the lights.

use winit::event::MouseButton;
use winit::keyboard::KeyCode;

use crate::renderer::settings::{CameraSettings, SceneSettings};

/// Degrees per pixel of mouse motion
pub const ROTATION_SPEED: f32 = 1.0;
/// Distance per scroll line
pub const DISTANCE_ADJUST_SPEED: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    None,
    RotatingView,
    RotatingScene,
}

/// Camera and scene state plus the input handling that mutates it
#[derive(Debug, Clone, Default)]
pub struct Viewer {
    pub camera: CameraSettings,
    pub scene: SceneSettings,
    mode: InputMode,
    last_cursor: Option<(f64, f64)>,
}

impl Viewer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    /// Whether the cursor should be hidden and grabbed
    pub fn is_rotating(&self) -> bool {
        self.mode != InputMode::None
    }

    pub fn on_mouse_move(&mut self, x: f64, y: f64) {
        if let Some((last_x, last_y)) = self.last_cursor {
            let dx = (x - last_x) as f32;
            let dy = (y - last_y) as f32;
            match self.mode {
                InputMode::RotatingView => {
                    self.camera.yaw += ROTATION_SPEED * dx;
                    self.camera.pitch += ROTATION_SPEED * dy;
                }
                InputMode::RotatingScene => {
                    self.scene.yaw += ROTATION_SPEED * dx;
                    self.scene.pitch += ROTATION_SPEED * dy;
                }
                InputMode::None => {}
            }
        }
        self.last_cursor = Some((x, y));
    }

    /// Returns true when the input mode changed
    pub fn on_mouse_button(&mut self, button: MouseButton, pressed: bool) -> bool {
        let previous = self.mode;
        match (button, pressed) {
            (MouseButton::Left, true) if self.mode == InputMode::None => {
                self.mode = InputMode::RotatingView;
            }
            (MouseButton::Right, true) if self.mode == InputMode::None => {
                self.mode = InputMode::RotatingScene;
            }
            (MouseButton::Left | MouseButton::Right, false) => {
                self.mode = InputMode::None;
            }
            _ => {}
        }
        previous != self.mode
    }

    pub fn on_mouse_scroll(&mut self, delta_y: f32) {
        self.camera.distance += DISTANCE_ADJUST_SPEED * -delta_y;
    }

    pub fn on_key(&mut self, key: KeyCode, pressed: bool) {
        if !pressed {
            return;
        }
        match key {
            KeyCode::F1 => self.scene.toggle_light(0),
            KeyCode::F2 => self.scene.toggle_light(1),
            KeyCode::F3 => self.scene.toggle_light(2),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_left_drag_rotates_camera() {
        let mut viewer = Viewer::new();
        viewer.on_mouse_move(100.0, 100.0);
        assert!(viewer.on_mouse_button(MouseButton::Left, true));
        assert_eq!(viewer.mode(), InputMode::RotatingView);
        viewer.on_mouse_move(110.0, 95.0);
        assert_eq!(viewer.camera.yaw, 10.0);
        assert_eq!(viewer.camera.pitch, -5.0);
        assert_eq!(viewer.scene.yaw, 0.0);
    }

    #[test]
    fn test_right_drag_rotates_scene() {
        let mut viewer = Viewer::new();
        viewer.on_mouse_move(0.0, 0.0);
        viewer.on_mouse_button(MouseButton::Right, true);
        viewer.on_mouse_move(3.0, 4.0);
        assert_eq!((viewer.scene.yaw, viewer.scene.pitch), (3.0, 4.0));
        assert_eq!(viewer.camera, CameraSettings::default());
    }

    #[test]
    fn test_motion_without_button_is_ignored() {
        let mut viewer = Viewer::new();
        viewer.on_mouse_move(0.0, 0.0);
        viewer.on_mouse_move(50.0, 50.0);
        assert_eq!(viewer.camera, CameraSettings::default());
    }

    #[test]
    fn test_second_button_does_not_switch_mode() {
        let mut viewer = Viewer::new();
        viewer.on_mouse_button(MouseButton::Left, true);
        assert!(!viewer.on_mouse_button(MouseButton::Right, true));
        assert_eq!(viewer.mode(), InputMode::RotatingView);
        assert!(viewer.on_mouse_button(MouseButton::Right, false));
        assert_eq!(viewer.mode(), InputMode::None);
        assert!(!viewer.is_rotating());
    }

    #[rstest]
    #[case(1.0, 146.0)]
    #[case(-2.0, 158.0)]
    fn test_scroll_adjusts_distance(#[case] delta: f32, #[case] expected: f32) {
        let mut viewer = Viewer::new();
        viewer.on_mouse_scroll(delta);
        assert_eq!(viewer.camera.distance, expected);
    }

    #[rstest]
    #[case(KeyCode::F1, 0)]
    #[case(KeyCode::F2, 1)]
    #[case(KeyCode::F3, 2)]
    fn test_function_keys_toggle_lights(#[case] key: KeyCode, #[case] index: usize) {
        let mut viewer = Viewer::new();
        viewer.on_key(key, true);
        viewer.on_key(key, false);
        for (i, light) in viewer.scene.lights.iter().enumerate() {
            assert_eq!(light.enabled, i == index);
        }
    }
}
