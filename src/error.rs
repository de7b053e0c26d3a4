// error.rs — failure taxonomy for the render path

use std::path::PathBuf;

use crate::gpu::TextureHandle;

/// A graphics call reported an error. The context is assumed corrupted afterwards.
#[derive(Debug, thiserror::Error)]
pub enum GraphicsApiError {
    #[error("{label}: validation error: {message}")]
    Validation { label: &'static str, message: String },

    #[error("{label}: out of GPU memory")]
    OutOfMemory { label: &'static str },

    #[error("{label}: surface error: {source}")]
    Surface {
        label: &'static str,
        #[source]
        source: wgpu::SurfaceError,
    },

    #[error("{label}: {handle:?} is not a live texture")]
    UnknownTexture {
        label: &'static str,
        handle: TextureHandle,
    },

    #[error("{label}: sphere mesh has not been uploaded")]
    MeshMissing { label: &'static str },

    #[error("{label}: sphere program has not been linked")]
    ProgramMissing { label: &'static str },
}

/// A photo could not be turned into a texture. Recoverable: the previous binding stays.
#[derive(Debug, thiserror::Error)]
pub enum TextureLoadError {
    #[error("photo {path:?} could not be opened: {source}")]
    Missing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("photo {path:?} could not be decoded: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("photo {path:?} has no pixels")]
    Empty { path: PathBuf },

    #[error("no photos to show")]
    NoPhotos,
}

#[derive(Debug, thiserror::Error)]
pub enum ShaderCompileError {
    #[error("shader source {path:?} could not be read: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shader source is missing entry point `{0}`")]
    MissingEntryPoint(&'static str),

    #[error("shader program failed to build: {0}")]
    Link(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Graphics(#[from] GraphicsApiError),

    #[error(transparent)]
    Shader(#[from] ShaderCompileError),

    #[error(transparent)]
    Texture(#[from] TextureLoadError),

    #[error("{0} called before the surface was ready")]
    NotReady(&'static str),
}

impl RenderError {
    /// Only a rejected photo leaves the renderer usable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RenderError::Texture(_))
    }
}
