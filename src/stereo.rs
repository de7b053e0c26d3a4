// stereo.rs — per-frame, per-eye render driver
//
// Lifecycle: on_surface_created → on_surface_changed → { on_new_frame →
// on_draw_eye(left) → on_draw_eye(right) → on_finish_frame }*. The trigger may be
// raised from any thread and is consumed at the end of an eye draw.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use glam::{Mat4, Vec3};

use crate::error::RenderError;
use crate::gpu::{EyeDrawList, GraphicsBackend, ShaderCode, Viewport};
use crate::mesh::SphereMesh;
use crate::texture::{PhotoRotation, TextureManager};

/// Set-once, take-once flag shared between the input side and the render thread.
#[derive(Debug, Clone, Default)]
pub struct TriggerHandle {
    raised: Arc<AtomicBool>,
}

impl TriggerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    /// Clears the flag, returning whether it was raised.
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::AcqRel)
    }

    #[cfg(test)]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EyeKind {
    Left,
    Right,
}

/// One eye as supplied by the head tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Eye {
    pub kind: EyeKind,
    pub view: Mat4,
}

/// Eye-independent camera, refreshed every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub matrix: Mat4,
}

impl CameraState {
    /// Looks from `(0, 0, camera_z)` at the origin with +Y up.
    pub fn look_at_center(camera_z: f32) -> Self {
        Self {
            matrix: Mat4::look_at_rh(Vec3::new(0.0, 0.0, camera_z), Vec3::ZERO, Vec3::Y),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMatrices {
    pub view: Mat4,
    pub view_projection: Mat4,
}

impl FrameMatrices {
    pub fn compose(eye_view: Mat4, camera: &CameraState, projection: Mat4) -> Self {
        let view = eye_view * camera.matrix;
        Self {
            view,
            view_projection: projection * view,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub depth: i32,
    pub radius: f32,
    pub camera_z: f32,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub clear_color: [f32; 4],
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            depth: 5,
            radius: 5.0,
            camera_z: 0.5,
            fov_y_degrees: 90.0,
            near: 1.0,
            far: 10.0,
            clear_color: [1.0, 1.0, 0.0, 1.0],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SurfaceLayout {
    width: u32,
    height: u32,
    projection: Mat4,
}

impl SurfaceLayout {
    fn viewport(&self, kind: EyeKind) -> Viewport {
        let half = self.width / 2;
        match kind {
            EyeKind::Left => Viewport {
                x: 0,
                y: 0,
                width: half,
                height: self.height,
            },
            EyeKind::Right => Viewport {
                x: half,
                y: 0,
                width: self.width - half,
                height: self.height,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Idle,
    /// Inside a frame; `false` when the backend had no target to draw into.
    Frame(bool),
}

pub struct StereoRenderer<B: GraphicsBackend> {
    backend: B,
    settings: RendererSettings,
    shader: ShaderCode,
    mesh: SphereMesh,
    textures: TextureManager,
    photos: PhotoRotation,
    trigger: TriggerHandle,
    camera: CameraState,
    layout: Option<SurfaceLayout>,
    phase: Phase,
}

impl<B: GraphicsBackend> StereoRenderer<B> {
    /// Builds the sphere mesh; nothing touches the GPU until `on_surface_created`.
    pub fn new(
        backend: B,
        settings: RendererSettings,
        shader: ShaderCode,
        photos: PhotoRotation,
    ) -> Self {
        let mesh = SphereMesh::build(settings.depth, settings.radius);
        let camera = CameraState::look_at_center(settings.camera_z);
        Self {
            backend,
            settings,
            shader,
            mesh,
            textures: TextureManager::new(),
            photos,
            trigger: TriggerHandle::new(),
            camera,
            layout: None,
            phase: Phase::Uninitialized,
        }
    }

    /// Handle for raising the trigger from another thread.
    #[cfg(test)]
    pub fn trigger_handle(&self) -> TriggerHandle {
        self.trigger.clone()
    }

    #[cfg(test)]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[cfg(test)]
    pub fn mesh(&self) -> &SphereMesh {
        &self.mesh
    }

    #[cfg(test)]
    pub fn textures(&self) -> &TextureManager {
        &self.textures
    }

    #[cfg(test)]
    pub fn camera(&self) -> &CameraState {
        &self.camera
    }

    #[cfg(test)]
    pub fn projection(&self) -> Option<Mat4> {
        self.layout.map(|l| l.projection)
    }

    /// Links the program, uploads the mesh and binds the first loadable photo.
    pub fn on_surface_created(&mut self) -> Result<(), RenderError> {
        log::info!("surface created");
        self.backend.link_program(&self.shader)?;
        self.backend.upload_mesh(&self.mesh)?;

        let mut last_error = None;
        for _ in 0..self.photos.len() {
            let source = self.photos.advance().to_path_buf();
            match self.textures.swap(&mut self.backend, &source) {
                Ok(_) => {
                    last_error = None;
                    break;
                }
                Err(err) if !err.is_fatal() => {
                    log::warn!("skipping photo: {}", err);
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        if let Some(err) = last_error {
            return Err(err);
        }

        self.phase = Phase::Idle;
        Ok(())
    }

    /// Resizes the backend and fixes the projection for the new eye aspect.
    pub fn on_surface_changed(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.backend.resize(width, height)?;

        let mut layout = SurfaceLayout {
            width,
            height,
            projection: Mat4::IDENTITY,
        };
        let aspect = layout.viewport(EyeKind::Left).aspect();
        layout.projection = Mat4::perspective_rh(
            self.settings.fov_y_degrees.to_radians(),
            aspect,
            self.settings.near,
            self.settings.far,
        );
        self.layout = Some(layout);
        log::info!("surface changed: {}x{} (eye aspect {:.3})", width, height, aspect);
        Ok(())
    }

    /// Refreshes the camera and clears the frame once before any eye draw.
    pub fn on_new_frame(&mut self) -> Result<(), RenderError> {
        if self.phase == Phase::Uninitialized || self.layout.is_none() {
            return Err(RenderError::NotReady("on_new_frame"));
        }
        self.camera = CameraState::look_at_center(self.settings.camera_z);
        let has_target = self.backend.begin_frame(self.settings.clear_color)?;
        self.phase = Phase::Frame(has_target);
        Ok(())
    }

    /// Draws every strip for one eye, then applies a pending trigger.
    pub fn on_draw_eye(&mut self, eye: &Eye) -> Result<(), RenderError> {
        let Phase::Frame(has_target) = self.phase else {
            return Err(RenderError::NotReady("on_draw_eye"));
        };
        let layout = self.layout.ok_or(RenderError::NotReady("on_draw_eye"))?;
        let texture = self
            .textures
            .handle()
            .ok_or(RenderError::NotReady("on_draw_eye"))?;

        if has_target {
            let matrices = FrameMatrices::compose(eye.view, &self.camera, layout.projection);
            self.backend.draw_eye(&EyeDrawList {
                viewport: layout.viewport(eye.kind),
                view_projection: matrices.view_projection,
                texture,
                strips: self.mesh.strips(),
            })?;
        }

        if self.trigger.take() {
            let source = self.photos.advance().to_path_buf();
            log::info!("trigger consumed, swapping to {}", source.display());
            self.textures.swap(&mut self.backend, &source)?;
        }
        Ok(())
    }

    /// Presents the frame after both eyes.
    pub fn on_finish_frame(&mut self) -> Result<(), RenderError> {
        let Phase::Frame(has_target) = self.phase else {
            return Err(RenderError::NotReady("on_finish_frame"));
        };
        self.phase = Phase::Idle;
        if has_target {
            self.backend.end_frame()?;
        }
        Ok(())
    }

    pub fn on_trigger(&self) {
        log::debug!("trigger raised");
        self.trigger.raise();
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use image::{Rgba, RgbaImage};

    use super::*;
    use crate::error::{GraphicsApiError, ShaderCompileError};
    use crate::gpu::testing::{Call, RecordingBackend};

    fn photos(dir: &Path, names: &[&str]) -> PhotoRotation {
        let paths: Vec<PathBuf> = names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                RgbaImage::from_pixel(4, 2, Rgba([1, 2, 3, 255]))
                    .save(&path)
                    .unwrap();
                path
            })
            .collect();
        PhotoRotation::new(paths).unwrap()
    }

    fn settings(depth: i32) -> RendererSettings {
        RendererSettings {
            depth,
            ..RendererSettings::default()
        }
    }

    fn ready_renderer(dir: &Path, names: &[&str]) -> StereoRenderer<RecordingBackend> {
        let mut renderer = StereoRenderer::new(
            RecordingBackend::default(),
            settings(1),
            ShaderCode::builtin(),
            photos(dir, names),
        );
        renderer.on_surface_created().unwrap();
        renderer.on_surface_changed(1280, 720).unwrap();
        renderer
    }

    fn eyes() -> [Eye; 2] {
        [
            Eye {
                kind: EyeKind::Left,
                view: Mat4::from_translation(Vec3::new(0.032, 0.0, 0.0)),
            },
            Eye {
                kind: EyeKind::Right,
                view: Mat4::from_translation(Vec3::new(-0.032, 0.0, 0.0)),
            },
        ]
    }

    fn draw_frame(renderer: &mut StereoRenderer<RecordingBackend>) -> Result<(), RenderError> {
        renderer.on_new_frame()?;
        for eye in eyes() {
            renderer.on_draw_eye(&eye)?;
        }
        renderer.on_finish_frame()
    }

    fn bound_source(renderer: &StereoRenderer<RecordingBackend>) -> PathBuf {
        renderer.textures().bound().unwrap().source.clone()
    }

    #[test]
    fn trigger_flag_is_consumed_once() {
        let trigger = TriggerHandle::new();
        assert!(!trigger.take());
        trigger.raise();
        trigger.raise();
        assert!(trigger.is_raised());
        assert!(trigger.take());
        assert!(!trigger.take());
    }

    #[test]
    fn trigger_crosses_threads() {
        let trigger = TriggerHandle::new();
        let remote = trigger.clone();
        std::thread::spawn(move || remote.raise()).join().unwrap();
        assert!(trigger.take());
    }

    #[test]
    fn matrices_compose_eye_camera_projection() {
        let camera = CameraState::look_at_center(0.5);
        let eye_view = Mat4::from_rotation_y(0.3);
        let projection = Mat4::perspective_rh(90f32.to_radians(), 1.5, 1.0, 10.0);

        let m = FrameMatrices::compose(eye_view, &camera, projection);
        assert_eq!(m.view, eye_view * camera.matrix);
        assert_eq!(m.view_projection, projection * eye_view * camera.matrix);
    }

    #[test]
    fn camera_sits_on_z_axis_looking_at_origin() {
        let camera = CameraState::look_at_center(0.5);
        let origin_in_view = camera.matrix.transform_point3(Vec3::ZERO);
        assert!((origin_in_view - Vec3::new(0.0, 0.0, -0.5)).length() < 1e-6);
    }

    #[test]
    fn surface_created_links_uploads_and_binds_first_photo() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = ready_renderer(dir.path(), &["a.png", "b.png"]);
        let calls = &renderer.backend().calls;

        assert_eq!(calls[0], Call::LinkProgram);
        assert_eq!(calls[1], Call::UploadMesh { vertices: 30 });
        assert_eq!(bound_source(&renderer), dir.path().join("a.png"));
        assert_eq!(renderer.backend().live.len(), 1);
    }

    #[test]
    fn surface_created_skips_unreadable_photos() {
        let dir = tempfile::tempdir().unwrap();
        photos(dir.path(), &["b.png"]);
        let rotation =
            PhotoRotation::new(vec![dir.path().join("gone.png"), dir.path().join("b.png")])
                .unwrap();

        let mut renderer = StereoRenderer::new(
            RecordingBackend::default(),
            settings(1),
            ShaderCode::builtin(),
            rotation,
        );
        renderer.on_surface_created().unwrap();
        assert_eq!(bound_source(&renderer), dir.path().join("b.png"));
    }

    #[test]
    fn surface_created_fails_when_no_photo_loads() {
        let dir = tempfile::tempdir().unwrap();
        let rotation = PhotoRotation::new(vec![dir.path().join("gone.png")]).unwrap();
        let mut renderer = StereoRenderer::new(
            RecordingBackend::default(),
            settings(1),
            ShaderCode::builtin(),
            rotation,
        );
        let err = renderer.on_surface_created().unwrap_err();
        assert!(matches!(err, RenderError::Texture(_)));
        assert!(matches!(
            renderer.on_new_frame(),
            Err(RenderError::NotReady(_))
        ));
    }

    #[test]
    fn shader_failure_is_fatal_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = RecordingBackend::default();
        backend.fail_link = true;
        let mut renderer = StereoRenderer::new(
            backend,
            settings(1),
            ShaderCode::builtin(),
            photos(dir.path(), &["a.png"]),
        );
        let err = renderer.on_surface_created().unwrap_err();
        assert!(matches!(err, RenderError::Shader(ShaderCompileError::Link(_))));
        assert!(err.is_fatal());
        assert!(renderer.backend().live.is_empty());
    }

    #[test]
    fn projection_uses_half_width_aspect() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = ready_renderer(dir.path(), &["a.png"]);
        let expected = Mat4::perspective_rh(90f32.to_radians(), 640.0 / 720.0, 1.0, 10.0);
        assert_eq!(renderer.projection(), Some(expected));
    }

    #[test]
    fn zero_sized_surface_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut renderer = ready_renderer(dir.path(), &["a.png"]);
        let before = renderer.projection();
        renderer.on_surface_changed(0, 720).unwrap();
        assert_eq!(renderer.projection(), before);
    }

    #[test]
    fn failed_resize_is_fatal_and_keeps_the_old_projection() {
        let dir = tempfile::tempdir().unwrap();
        let mut renderer = ready_renderer(dir.path(), &["a.png"]);
        let before = renderer.projection();
        renderer.backend.fail_resize = true;

        let err = renderer.on_surface_changed(800, 600).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            RenderError::Graphics(GraphicsApiError::Validation { label: "resize", .. })
        ));
        assert_eq!(renderer.projection(), before);
    }

    #[test]
    fn frame_clears_once_and_draws_every_strip_per_eye() {
        let dir = tempfile::tempdir().unwrap();
        let mut renderer = ready_renderer(dir.path(), &["a.png"]);
        draw_frame(&mut renderer).unwrap();

        let backend = renderer.backend();
        assert_eq!(
            backend.count(|c| matches!(c, Call::BeginFrame(_))),
            1
        );
        assert_eq!(backend.count(|c| *c == Call::EndFrame), 1);

        let draws = backend.draws();
        assert_eq!(draws.len(), 2);
        let expected_strips: Vec<_> = renderer.mesh().strips().iter().map(|s| s.vertices()).collect();
        let projection = renderer.projection().unwrap();
        for (call, eye) in draws.iter().zip(eyes()) {
            let Call::DrawEye {
                viewport,
                view_projection,
                strips,
                ..
            } = call
            else {
                unreachable!()
            };
            assert_eq!(strips, &expected_strips);
            assert!(strips.iter().all(|r| r.len() == 6));
            assert_eq!(viewport.width, 640);
            assert_eq!(
                *view_projection,
                FrameMatrices::compose(eye.view, renderer.camera(), projection).view_projection
            );
        }
        let Call::DrawEye { viewport: right, .. } = draws[1] else {
            unreachable!()
        };
        assert_eq!(right.x, 640);

        let begin = backend
            .calls
            .iter()
            .position(|c| matches!(c, Call::BeginFrame(_)))
            .unwrap();
        let first_draw = backend
            .calls
            .iter()
            .position(|c| matches!(c, Call::DrawEye { .. }))
            .unwrap();
        assert!(begin < first_draw);
    }

    #[test]
    fn trigger_swaps_after_the_eye_draw() {
        let dir = tempfile::tempdir().unwrap();
        let mut renderer = ready_renderer(dir.path(), &["a.png", "b.png", "c.png"]);
        let first = renderer.textures().handle().unwrap();

        renderer.on_trigger();
        renderer.on_new_frame().unwrap();
        let [left, right] = eyes();
        renderer.on_draw_eye(&left).unwrap();
        let second = renderer.textures().handle().unwrap();
        assert_ne!(first, second);
        renderer.on_draw_eye(&right).unwrap();
        renderer.on_finish_frame().unwrap();

        // Left eye drew the old photo, right eye the new one, and only one swap happened.
        let textures: Vec<_> = renderer
            .backend()
            .draws()
            .iter()
            .map(|c| match c {
                Call::DrawEye { texture, .. } => *texture,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(textures, vec![first, second]);
        assert_eq!(bound_source(&renderer), dir.path().join("b.png"));
        assert_eq!(renderer.backend().live.len(), 1);
    }

    #[test]
    fn three_triggers_cycle_back_to_first_photo() {
        let dir = tempfile::tempdir().unwrap();
        let mut renderer = ready_renderer(dir.path(), &["a.png", "b.png", "c.png"]);
        let trigger = renderer.trigger_handle();

        for _ in 0..3 {
            trigger.raise();
            draw_frame(&mut renderer).unwrap();
        }
        assert_eq!(bound_source(&renderer), dir.path().join("a.png"));
        assert_eq!(renderer.backend().live.len(), 1);
    }

    #[test]
    fn rejected_photo_keeps_current_texture() {
        let dir = tempfile::tempdir().unwrap();
        let mut renderer = ready_renderer(dir.path(), &["a.png", "b.png"]);
        let current = renderer.textures().handle().unwrap();
        std::fs::remove_file(dir.path().join("b.png")).unwrap();

        renderer.on_trigger();
        renderer.on_new_frame().unwrap();
        let err = renderer.on_draw_eye(&eyes()[0]).unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(renderer.textures().handle(), Some(current));
        assert_eq!(renderer.backend().live.len(), 1);

        // The frame carries on with the old photo.
        renderer.on_draw_eye(&eyes()[1]).unwrap();
        renderer.on_finish_frame().unwrap();
        assert_eq!(renderer.backend().draws().len(), 2);
    }

    #[test]
    fn graphics_error_is_fatal_and_leaves_trigger_pending() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = RecordingBackend::default();
        backend.fail_draws = true;
        let mut renderer = StereoRenderer::new(
            backend,
            settings(1),
            ShaderCode::builtin(),
            photos(dir.path(), &["a.png", "b.png"]),
        );
        renderer.on_surface_created().unwrap();
        renderer.on_surface_changed(800, 600).unwrap();
        renderer.on_trigger();

        renderer.on_new_frame().unwrap();
        let err = renderer.on_draw_eye(&eyes()[0]).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            RenderError::Graphics(GraphicsApiError::Validation { .. })
        ));
        assert!(renderer.trigger_handle().is_raised());
    }

    #[test]
    fn frame_without_target_skips_draws_but_consumes_trigger() {
        let dir = tempfile::tempdir().unwrap();
        let mut renderer = ready_renderer(dir.path(), &["a.png", "b.png"]);
        renderer.backend.no_frame_target = true;

        renderer.on_trigger();
        draw_frame(&mut renderer).unwrap();
        assert!(renderer.backend().draws().is_empty());
        assert_eq!(renderer.backend().count(|c| *c == Call::EndFrame), 0);
        assert_eq!(bound_source(&renderer), dir.path().join("b.png"));
    }

    #[test]
    fn draw_before_new_frame_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut renderer = ready_renderer(dir.path(), &["a.png"]);
        assert!(matches!(
            renderer.on_draw_eye(&eyes()[0]),
            Err(RenderError::NotReady("on_draw_eye"))
        ));
        assert!(matches!(
            renderer.on_finish_frame(),
            Err(RenderError::NotReady("on_finish_frame"))
        ));
    }
}
