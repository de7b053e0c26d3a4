// main.rs — windowed host: side-by-side stereo photo sphere with mouse look

mod config;
mod error;
mod gpu;
mod head;
mod maths;
mod mesh;
mod renderer;
mod stereo;
mod texture;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use winit::{
    dpi::{LogicalSize, PhysicalPosition},
    event::*,
    event_loop::{ControlFlow, EventLoop},
    window::{Fullscreen, Window, WindowBuilder},
};

use config::Cli;
use error::RenderError;
use gpu::ShaderCode;
use head::HeadTracker;
use renderer::WgpuBackend;
use stereo::StereoRenderer;
use texture::PhotoRotation;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("photo_sphere=info"))
        .init();

    let cli = Cli::parse();
    let config = config::resolve(&cli)?;
    let shader = ShaderCode::load(config.shader.as_deref())?;
    let photos = PhotoRotation::new(config.photos.clone())?;
    log::info!("{} photo(s) in rotation", photos.len());

    let event_loop = EventLoop::new();
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Photo Sphere")
            .with_inner_size(LogicalSize::new(1280, 720))
            .build(&event_loop)
            .context("failed to create window")?,
    );

    let mut head = HeadTracker::new(config.ipd, config.sensitivity);
    if config.fullscreen {
        head.is_fullscreen = true;
        window.set_fullscreen(Some(Fullscreen::Borderless(None)));
    }

    let backend = pollster::block_on(WgpuBackend::new(window.clone()))?;
    let mut renderer = StereoRenderer::new(backend, config.renderer_settings(), shader, photos);
    renderer.on_surface_created()?;
    let size = window.inner_size();
    renderer.on_surface_changed(size.width, size.height)?;

    let fov_degrees = config.fov_degrees;
    let mut mouse_pressed = false;
    let mut last_mouse_pos: Option<PhysicalPosition<f64>> = None;

    let mut last_frame_time = Instant::now();
    let mut frame_count = 0u32;

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;

        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => {
                    *control_flow = ControlFlow::Exit;
                }

                WindowEvent::Resized(new_size) => {
                    let result = renderer.on_surface_changed(new_size.width, new_size.height);
                    report(result, control_flow);
                }

                WindowEvent::ScaleFactorChanged { new_inner_size, .. } => {
                    let result =
                        renderer.on_surface_changed(new_inner_size.width, new_inner_size.height);
                    report(result, control_flow);
                }

                WindowEvent::KeyboardInput { input, .. } => {
                    if input.state == ElementState::Pressed {
                        match input.virtual_keycode {
                            Some(VirtualKeyCode::Space | VirtualKeyCode::Return) => {
                                renderer.on_trigger();
                            }
                            Some(VirtualKeyCode::R) => head.reset(),
                            Some(VirtualKeyCode::F11) => toggle_fullscreen(&window, &mut head),
                            Some(VirtualKeyCode::Escape) => {
                                *control_flow = ControlFlow::Exit;
                            }
                            _ => {}
                        }
                    }
                }

                WindowEvent::MouseInput { state, button, .. } => match button {
                    MouseButton::Left => {
                        mouse_pressed = state == ElementState::Pressed;
                        if !mouse_pressed {
                            last_mouse_pos = None;
                        }
                    }
                    MouseButton::Right if state == ElementState::Pressed => {
                        renderer.on_trigger();
                    }
                    _ => {}
                },

                WindowEvent::CursorMoved { position, .. } => {
                    if mouse_pressed {
                        if let Some(last_pos) = last_mouse_pos {
                            let dx = (position.x - last_pos.x) as f32;
                            let dy = (position.y - last_pos.y) as f32;
                            let size = window.inner_size();
                            // Each eye gets half the window width.
                            head.drag(
                                dx,
                                dy,
                                (size.width / 2) as f32,
                                size.height as f32,
                                fov_degrees,
                            );
                        }
                        last_mouse_pos = Some(position);
                    }
                }

                _ => {}
            },

            Event::RedrawRequested(_) => {
                frame_count += 1;
                let now = Instant::now();
                let elapsed = now.duration_since(last_frame_time).as_secs_f32();
                if elapsed >= 1.0 {
                    log::debug!("{:.1} fps", frame_count as f32 / elapsed);
                    frame_count = 0;
                    last_frame_time = now;
                }

                report(render_frame(&mut renderer, &head), control_flow);
            }

            Event::MainEventsCleared => {
                window.request_redraw();
            }

            _ => {}
        }
    });
}

/// One stereo frame: clear, both eyes, present.
///
/// A recoverable eye error (a photo that failed to load on trigger) still lets
/// the frame finish before it is reported.
fn render_frame(
    renderer: &mut StereoRenderer<WgpuBackend>,
    head: &HeadTracker,
) -> Result<(), RenderError> {
    renderer.on_new_frame()?;

    let mut deferred = None;
    for eye in head.eyes() {
        match renderer.on_draw_eye(&eye) {
            Ok(()) => {}
            Err(err) if !err.is_fatal() => deferred = Some(err),
            Err(err) => return Err(err),
        }
    }

    renderer.on_finish_frame()?;
    deferred.map_or(Ok(()), Err)
}

/// Logs a render error; fatal ones stop the event loop.
fn report(result: Result<(), RenderError>, control_flow: &mut ControlFlow) {
    match result {
        Ok(()) => {}
        Err(err) if !err.is_fatal() => log::warn!("{}", err),
        Err(err) => {
            log::error!("{}", err);
            *control_flow = ControlFlow::ExitWithCode(1);
        }
    }
}

fn toggle_fullscreen(window: &Window, head: &mut HeadTracker) {
    head.is_fullscreen = !head.is_fullscreen;
    if head.is_fullscreen {
        window.set_fullscreen(Some(Fullscreen::Borderless(None)));
    } else {
        window.set_fullscreen(None);
    }
}
