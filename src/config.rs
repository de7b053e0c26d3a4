// config.rs — viewer settings from an optional JSON file, overridden by the command line
//
// File format (every field optional):
// {
//   "photos": ["sphere1.jpg", "sphere2.jpg"],
//   "depth": 5, "radius": 5.0, "camera_z": 0.5,
//   "fov_degrees": 90.0, "near": 1.0, "far": 10.0,
//   "clear_color": [1.0, 1.0, 0.0, 1.0],
//   "ipd": 0.064, "sensitivity": 1.0,
//   "shader": "custom.wgsl", "fullscreen": false
// }
// Relative paths in the file resolve against the file's directory.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::stereo::RendererSettings;

#[derive(Debug, Parser)]
#[command(name = "photo-sphere")]
#[command(about = "Stereo photo sphere viewer; the trigger (Space/Enter/right click) shows the next photo")]
pub struct Cli {
    /// Photos shown in order, wrapping around
    pub photos: Vec<PathBuf>,

    /// JSON settings file
    #[arg(long, env = "PHOTO_SPHERE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Sphere subdivision depth (clamped to 1..=5)
    #[arg(long)]
    pub depth: Option<i32>,

    /// Sphere radius
    #[arg(long)]
    pub radius: Option<f32>,

    /// WGSL shader replacing the built-in one
    #[arg(long)]
    pub shader: Option<PathBuf>,

    /// Start fullscreen
    #[arg(long)]
    pub fullscreen: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config {path:?} could not be read: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config {path:?} is not valid: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewerConfig {
    pub photos: Vec<PathBuf>,
    pub depth: i32,
    pub radius: f32,
    pub camera_z: f32,
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub clear_color: [f32; 4],
    pub ipd: f32,
    pub sensitivity: f32,
    pub shader: Option<PathBuf>,
    pub fullscreen: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        let render = RendererSettings::default();
        Self {
            photos: Vec::new(),
            depth: render.depth,
            radius: render.radius,
            camera_z: render.camera_z,
            fov_degrees: render.fov_y_degrees,
            near: render.near,
            far: render.far,
            clear_color: render.clear_color,
            ipd: 0.064,
            sensitivity: 1.0,
            shader: None,
            fullscreen: false,
        }
    }
}

impl ViewerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(base) = path.parent() {
            config.photos = config.photos.iter().map(|p| base.join(p)).collect();
            config.shader = config.shader.as_ref().map(|p| base.join(p));
        }
        Ok(config)
    }

    /// Command-line values win over the file; positional photos replace the file's list.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if !cli.photos.is_empty() {
            self.photos = cli.photos.clone();
        }
        if let Some(depth) = cli.depth {
            self.depth = depth;
        }
        if let Some(radius) = cli.radius {
            self.radius = radius;
        }
        if let Some(shader) = &cli.shader {
            self.shader = Some(shader.clone());
        }
        if cli.fullscreen {
            self.fullscreen = true;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.photos.is_empty() {
            return Err(ConfigError::Invalid("at least one photo is required".into()));
        }
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "radius must be positive, got {}",
                self.radius
            )));
        }
        // The camera looks at the sphere centre from inside the sphere.
        if !(self.camera_z != 0.0 && self.camera_z.abs() < self.radius) {
            return Err(ConfigError::Invalid(format!(
                "camera_z must be non-zero and inside the sphere (|camera_z| < {}), got {}",
                self.radius, self.camera_z
            )));
        }
        if !(self.fov_degrees > 0.0 && self.fov_degrees < 180.0) {
            return Err(ConfigError::Invalid(format!(
                "fov_degrees must be in (0, 180), got {}",
                self.fov_degrees
            )));
        }
        if !(self.near > 0.0 && self.near < self.far) {
            return Err(ConfigError::Invalid(format!(
                "clip planes need 0 < near < far, got near={} far={}",
                self.near, self.far
            )));
        }
        Ok(())
    }

    pub fn renderer_settings(&self) -> RendererSettings {
        RendererSettings {
            depth: self.depth,
            radius: self.radius,
            camera_z: self.camera_z,
            fov_y_degrees: self.fov_degrees,
            near: self.near,
            far: self.far,
            clear_color: self.clear_color,
        }
    }
}

/// Loads the file named on the command line (if any), applies overrides and validates.
pub fn resolve(cli: &Cli) -> Result<ViewerConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => ViewerConfig::load(path)?,
        None => ViewerConfig::default(),
    };
    config.apply_cli(cli);
    config.validate()?;
    Ok(config)
}
