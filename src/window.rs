//! Window management using winit

use std::sync::Arc;

use winit::{
    dpi::PhysicalSize,
    event::{ElementState, Event, KeyEvent, MouseScrollDelta, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    keyboard::{KeyCode, PhysicalKey},
    window::{CursorGrabMode, Window as WinitWindow, WindowBuilder},
};

use crate::backend::wgpu_backend::WgpuBackend;
use crate::error::{RendererError, RendererResult};
use crate::renderer::{Renderer, RendererInterface};
use crate::viewer::Viewer;
use crate::RendererConfig;

/// Create the fixed-size application window
pub fn create_window(
    event_loop: &EventLoop<()>,
    title: &str,
    width: u32,
    height: u32,
) -> RendererResult<Arc<WinitWindow>> {
    let window = WindowBuilder::new()
        .with_title(title)
        .with_inner_size(PhysicalSize::new(width, height))
        .with_resizable(false)
        .build(event_loop)
        .map_err(|e| RendererError::Initialization(format!("failed to create window: {}", e)))?;
    Ok(Arc::new(window))
}

fn set_cursor_captured(window: &WinitWindow, captured: bool) {
    if captured {
        let grabbed = window
            .set_cursor_grab(CursorGrabMode::Confined)
            .or_else(|_| window.set_cursor_grab(CursorGrabMode::Locked));
        if let Err(e) = grabbed {
            log::debug!("Cursor grab unavailable: {}", e);
        }
    } else if let Err(e) = window.set_cursor_grab(CursorGrabMode::None) {
        log::debug!("Cursor release failed: {}", e);
    }
    window.set_cursor_visible(!captured);
}

fn handle_window_event(
    event: &WindowEvent,
    window: &WinitWindow,
    viewer: &mut Viewer,
    elwt: &EventLoopWindowTarget<()>,
) {
    match event {
        WindowEvent::CloseRequested => elwt.exit(),
        WindowEvent::KeyboardInput {
            event:
                KeyEvent {
                    physical_key: PhysicalKey::Code(code),
                    state,
                    ..
                },
            ..
        } => {
            if *code == KeyCode::Escape && *state == ElementState::Pressed {
                elwt.exit();
            } else {
                viewer.on_key(*code, *state == ElementState::Pressed);
            }
        }
        WindowEvent::CursorMoved { position, .. } => {
            viewer.on_mouse_move(position.x, position.y);
        }
        WindowEvent::MouseInput { state, button, .. } => {
            if viewer.on_mouse_button(*button, *state == ElementState::Pressed) {
                set_cursor_captured(window, viewer.is_rotating());
            }
        }
        WindowEvent::MouseWheel { delta, .. } => {
            let dy = match delta {
                MouseScrollDelta::LineDelta(_, y) => *y,
                MouseScrollDelta::PixelDelta(pos) => pos.y as f32,
            };
            viewer.on_mouse_scroll(dy);
        }
        _ => {}
    }
}

/// Open the window and drive the renderer until the window is closed
pub fn run(config: RendererConfig) -> RendererResult<()> {
    let event_loop = EventLoop::new()
        .map_err(|e| RendererError::Initialization(format!("failed to create event loop: {}", e)))?;
    let window = create_window(&event_loop, &config.title, config.width, config.height)?;

    let (width, height, samples) = (config.width, config.height, config.samples);
    let mut renderer: Renderer<WgpuBackend> = Renderer::new(config);
    renderer.initialize(Arc::clone(&window), width, height, samples)?;
    renderer.setup()?;

    let mut viewer = Viewer::new();
    let mut failure: Option<RendererError> = None;

    event_loop
        .run(|event, elwt| {
            elwt.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => {
                    handle_window_event(&event, &window, &mut viewer, elwt);
                }
                Event::AboutToWait => {
                    if let Err(e) = renderer.render(&viewer.camera, &viewer.scene) {
                        failure = Some(e);
                        elwt.exit();
                    }
                }
                _ => {}
            }
        })
        .map_err(|e| RendererError::Initialization(format!("event loop failed: {}", e)))?;

    renderer.shutdown();
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
