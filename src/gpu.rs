// gpu.rs — the graphics services the stereo renderer drives
//
// `renderer::WgpuBackend` is the production implementation; tests use
// `testing::RecordingBackend`.

use std::path::Path;

use glam::Mat4;
use image::RgbaImage;

use crate::error::{GraphicsApiError, ShaderCompileError};
use crate::mesh::{SphereMesh, Strip};

pub const POSITION_ATTRIBUTE: &str = "a_Position";
pub const TEX_COORD_ATTRIBUTE: &str = "a_TexCoordinate";
pub const MVP_UNIFORM: &str = "u_MVPMatrix";

pub const VERTEX_ENTRY_POINT: &str = "vs_main";
pub const FRAGMENT_ENTRY_POINT: &str = "fs_main";

const BUILTIN_SHADER: &str = include_str!("sphere.wgsl");

/// Opaque handle to an uploaded photo texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(u64);

impl TextureHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// WGSL module holding both the vertex and fragment stage.
#[derive(Debug, Clone)]
pub struct ShaderCode {
    pub label: String,
    pub wgsl: String,
}

impl ShaderCode {
    pub fn builtin() -> Self {
        Self {
            label: "sphere.wgsl".to_string(),
            wgsl: BUILTIN_SHADER.to_string(),
        }
    }

    /// Reads `path` when given, otherwise falls back to the built-in sphere shader.
    pub fn load(path: Option<&Path>) -> Result<Self, ShaderCompileError> {
        let Some(path) = path else {
            return Ok(Self::builtin());
        };

        let wgsl = std::fs::read_to_string(path).map_err(|source| ShaderCompileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let code = Self {
            label: path.display().to_string(),
            wgsl,
        };
        code.check_entry_points()?;
        log::info!("using shader {}", code.label);
        Ok(code)
    }

    pub fn check_entry_points(&self) -> Result<(), ShaderCompileError> {
        for entry in [VERTEX_ENTRY_POINT, FRAGMENT_ENTRY_POINT] {
            if !self.wgsl.contains(&format!("fn {}", entry)) {
                return Err(ShaderCompileError::MissingEntryPoint(entry));
            }
        }
        Ok(())
    }
}

/// Everything one eye submits: one triangle-strip draw per strip, all with the same
/// view-projection and texture.
#[derive(Debug, Clone, Copy)]
pub struct EyeDrawList<'a> {
    pub viewport: Viewport,
    pub view_projection: Mat4,
    pub texture: TextureHandle,
    pub strips: &'a [Strip],
}

pub trait TextureUploader {
    fn max_texture_dimension(&self) -> u32;

    fn upload_texture(
        &mut self,
        label: &str,
        image: &RgbaImage,
    ) -> Result<TextureHandle, GraphicsApiError>;

    /// Releasing a handle that is unknown or already released does nothing.
    fn release_texture(&mut self, handle: TextureHandle) -> Result<(), GraphicsApiError>;
}

pub trait GraphicsBackend: TextureUploader {
    /// Builds the sphere program and resolves its attribute and uniform slots.
    fn link_program(&mut self, shader: &ShaderCode) -> Result<(), ShaderCompileError>;

    /// Uploads the mesh arena once; strips are drawn as ranges of it.
    fn upload_mesh(&mut self, mesh: &SphereMesh) -> Result<(), GraphicsApiError>;

    fn resize(&mut self, width: u32, height: u32) -> Result<(), GraphicsApiError>;

    /// Acquires the frame target and clears colour and depth.
    /// `Ok(false)` means no target is available this frame and eye draws are skipped.
    fn begin_frame(&mut self, clear_color: [f32; 4]) -> Result<bool, GraphicsApiError>;

    fn draw_eye(&mut self, eye: &EyeDrawList<'_>) -> Result<(), GraphicsApiError>;

    fn end_frame(&mut self) -> Result<(), GraphicsApiError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_shader_has_both_stages() {
        let shader = ShaderCode::builtin();
        assert!(shader.check_entry_points().is_ok());
        assert!(shader.wgsl.contains("u_mvp_matrix"));
    }

    #[test]
    fn load_without_path_uses_builtin() {
        let shader = ShaderCode::load(None).unwrap();
        assert_eq!(shader.label, "sphere.wgsl");
    }

    #[test]
    fn load_reads_shader_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.wgsl");
        std::fs::write(&path, ShaderCode::builtin().wgsl).unwrap();

        let shader = ShaderCode::load(Some(&path)).unwrap();
        assert!(shader.label.ends_with("custom.wgsl"));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ShaderCode::load(Some(&dir.path().join("nope.wgsl"))).unwrap_err();
        assert!(matches!(err, ShaderCompileError::Read { .. }));
    }

    #[test]
    fn load_rejects_shader_without_fragment_stage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vertex_only.wgsl");
        std::fs::write(&path, "@vertex fn vs_main() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }").unwrap();

        let err = ShaderCode::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ShaderCompileError::MissingEntryPoint("fs_main")));
    }

    #[test]
    fn drawing_before_link_reports_missing_program() {
        let mut backend = testing::RecordingBackend::default();
        let image = RgbaImage::new(2, 1);
        let texture = backend.upload_texture("photo", &image).unwrap();
        let mesh = SphereMesh::build(1, 1.0);

        let err = backend
            .draw_eye(&EyeDrawList {
                viewport: Viewport { x: 0, y: 0, width: 10, height: 10 },
                view_projection: Mat4::IDENTITY,
                texture,
                strips: mesh.strips(),
            })
            .unwrap_err();
        assert!(matches!(err, GraphicsApiError::ProgramMissing { label: "draw_eye" }));
        assert!(backend.draws().is_empty());
    }

    #[test]
    fn viewport_aspect_handles_zero_height() {
        let vp = Viewport { x: 0, y: 0, width: 640, height: 0 };
        assert_eq!(vp.aspect(), 1.0);
        let vp = Viewport { x: 640, y: 0, width: 640, height: 720 };
        assert!((vp.aspect() - 640.0 / 720.0).abs() < 1e-6);
    }
}
