use image::{GrayImage, ImageFormat, Luma};
use qrcode::{Color, EcLevel, QrCode};
use std::io::Cursor;

#[derive(Debug, thiserror::Error)]
pub enum QrError {
    #[error("nothing to encode")]
    EmptyInput,
    #[error("QR encoding failed: {0}")]
    Encode(String),
    #[error("PNG encoding failed: {0}")]
    Png(#[from] image::ImageError),
}

/// Turns a URL into a PNG raster.
pub trait QrEncoder {
    fn encode_png(&self, text: &str) -> Result<Vec<u8>, QrError>;
}

/// `qrcode`-backed encoder at error-correction level H, black on white.
#[derive(Debug, Clone, Copy)]
pub struct QrCodeEncoder {
    /// Quiet zone in modules.
    pub margin: u32,
    /// The raster is scaled by whole pixels until it is at least this wide.
    pub min_pixels: u32,
}

impl Default for QrCodeEncoder {
    fn default() -> Self {
        Self { margin: 1, min_pixels: 256 }
    }
}

impl QrCodeEncoder {
    pub fn render(&self, text: &str) -> Result<GrayImage, QrError> {
        if text.is_empty() {
            return Err(QrError::EmptyInput);
        }

        let code = QrCode::with_error_correction_level(text.as_bytes(), EcLevel::H)
            .map_err(|err| QrError::Encode(err.to_string()))?;
        let modules = code.width() as u32;
        let colors = code.to_colors();

        let side = modules + self.margin * 2;
        let scale = self.min_pixels.div_ceil(side.max(1)).max(1);
        let pixels = side * scale;

        let image = GrayImage::from_fn(pixels, pixels, |x, y| {
            let module_x = (x / scale).checked_sub(self.margin).filter(|mx| *mx < modules);
            let module_y = (y / scale).checked_sub(self.margin).filter(|my| *my < modules);

            let dark = match (module_x, module_y) {
                (Some(mx), Some(my)) => {
                    matches!(colors.get((my * modules + mx) as usize), Some(Color::Dark))
                }
                _ => false,
            };

            if dark {
                Luma([0u8])
            } else {
                Luma([255u8])
            }
        });

        Ok(image)
    }
}

impl QrEncoder for QrCodeEncoder {
    fn encode_png(&self, text: &str) -> Result<Vec<u8>, QrError> {
        let image = self.render(text)?;

        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageFormat::Png)?;

        Ok(buf.into_inner())
    }
}
