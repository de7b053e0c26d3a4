// texture.rs — photo decoding and the single bound sphere texture

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use image::io::Reader as ImageReader;
use image::{Rgba, RgbaImage};

use crate::error::{RenderError, TextureLoadError};
use crate::gpu::{TextureHandle, TextureUploader};

/// Fixed round-robin order of photos shown on the sphere.
#[derive(Debug, Clone)]
pub struct PhotoRotation {
    photos: Vec<PathBuf>,
    next: usize,
}

impl PhotoRotation {
    pub fn new(photos: Vec<PathBuf>) -> Result<Self, TextureLoadError> {
        if photos.is_empty() {
            return Err(TextureLoadError::NoPhotos);
        }
        Ok(Self { photos, next: 0 })
    }

    /// Returns the next photo and moves the rotation on, wrapping at the end.
    pub fn advance(&mut self) -> &Path {
        let index = self.next % self.photos.len();
        self.next = (index + 1) % self.photos.len();
        &self.photos[index]
    }

    pub fn len(&self) -> usize {
        self.photos.len()
    }
}

/// Opens and decodes a photo, guessing the format from its content.
pub fn decode_photo(path: &Path) -> Result<RgbaImage, TextureLoadError> {
    let file = File::open(path).map_err(|source| TextureLoadError::Missing {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);

    let decoded = ImageReader::new(reader)
        .with_guessed_format()
        .map_err(image::ImageError::IoError)
        .and_then(|mut r| {
            r.no_limits();
            r.decode()
        })
        .map_err(|source| TextureLoadError::Decode {
            path: path.to_path_buf(),
            source,
        })?;

    let rgba = decoded.to_rgba8();
    if rgba.width() == 0 || rgba.height() == 0 {
        return Err(TextureLoadError::Empty {
            path: path.to_path_buf(),
        });
    }
    log::debug!(
        "decoded {}: {}x{}",
        path.display(),
        rgba.width(),
        rgba.height()
    );
    Ok(rgba)
}

/// Scales the image down so neither side exceeds the GPU's 2D texture limit.
pub fn fit_to_gpu(img: RgbaImage, max_dimension: u32) -> RgbaImage {
    let (src_w, src_h) = img.dimensions();
    if src_w <= max_dimension && src_h <= max_dimension {
        return img;
    }

    let scale = (max_dimension as f32 / src_w.max(src_h) as f32).min(1.0);
    let new_w = ((src_w as f32 * scale) as u32).clamp(1, max_dimension);
    let new_h = ((src_h as f32 * scale) as u32).clamp(1, max_dimension);
    log::info!(
        "photo {}x{} exceeds GPU limit {}, scaled to {}x{}",
        src_w,
        src_h,
        max_dimension,
        new_w,
        new_h
    );
    image::imageops::resize(&img, new_w, new_h, image::imageops::FilterType::Lanczos3)
}

/// Pads photos shorter than 2:1 with black at the top so they cover the lower part
/// of an equirectangular canvas.
pub fn pad_to_equirect(img: RgbaImage) -> RgbaImage {
    let (src_w, src_h) = img.dimensions();
    let target_h = src_w / 2;
    if target_h == 0 || src_h >= target_h {
        return img;
    }

    let mut canvas = RgbaImage::from_pixel(src_w, target_h, Rgba([0, 0, 0, 255]));
    image::imageops::replace(&mut canvas, &img, 0, i64::from(target_h - src_h));
    canvas
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundTexture {
    pub handle: TextureHandle,
    pub source: PathBuf,
}

/// Owns the one texture bound while rendering.
#[derive(Debug, Default)]
pub struct TextureManager {
    bound: Option<BoundTexture>,
}

impl TextureManager {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn bound(&self) -> Option<&BoundTexture> {
        self.bound.as_ref()
    }

    pub fn handle(&self) -> Option<TextureHandle> {
        self.bound.as_ref().map(|b| b.handle)
    }

    /// Decodes `source` and uploads it. The returned handle is not bound.
    pub fn load(
        &self,
        gpu: &mut impl TextureUploader,
        source: &Path,
    ) -> Result<TextureHandle, RenderError> {
        let rgba = decode_photo(source)?;
        let rgba = pad_to_equirect(fit_to_gpu(rgba, gpu.max_texture_dimension()));
        let label = source.display().to_string();
        Ok(gpu.upload_texture(&label, &rgba)?)
    }

    /// Frees `handle`. Releasing the bound handle leaves nothing bound; releasing twice
    /// is a no-op.
    pub fn release(
        &mut self,
        gpu: &mut impl TextureUploader,
        handle: TextureHandle,
    ) -> Result<(), RenderError> {
        if self.handle() == Some(handle) {
            if let Some(bound) = self.bound.take() {
                log::debug!("unbound photo {}", bound.source.display());
            }
        }
        gpu.release_texture(handle)?;
        Ok(())
    }

    /// Replaces the bound texture with `source`.
    ///
    /// The new photo is uploaded before the old handle is released, so a failure keeps
    /// the previous binding intact.
    pub fn swap(
        &mut self,
        gpu: &mut impl TextureUploader,
        source: &Path,
    ) -> Result<TextureHandle, RenderError> {
        let handle = self.load(gpu, source)?;

        if let Some(previous) = self.handle() {
            self.release(gpu, previous)?;
        }
        self.bound = Some(BoundTexture {
            handle,
            source: source.to_path_buf(),
        });
        log::info!("bound photo {}", source.display());
        Ok(handle)
    }
}
