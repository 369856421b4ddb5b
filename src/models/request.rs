use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Video generation models offered by the remote service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, EnumString, PartialEq, Eq, Default)]
pub enum VideoModel {
    #[default]
    #[strum(serialize = "sora-2")]
    #[serde(rename = "sora-2")]
    Sora2,
    #[strum(serialize = "sora-2-pro")]
    #[serde(rename = "sora-2-pro")]
    Sora2Pro,
}

/// Output sizes accepted by the remote service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, EnumString, PartialEq, Eq, Default)]
pub enum Resolution {
    #[default]
    #[strum(serialize = "1280x720")]
    #[serde(rename = "1280x720")]
    Landscape720,
    #[strum(serialize = "720x1280")]
    #[serde(rename = "720x1280")]
    Portrait720,
    #[strum(serialize = "1024x1024")]
    #[serde(rename = "1024x1024")]
    Square1024,
    #[strum(serialize = "1080x1920")]
    #[serde(rename = "1080x1920")]
    Portrait1080,
    #[strum(serialize = "1920x1080")]
    #[serde(rename = "1920x1080")]
    Landscape1080,
}

/// Image uploaded alongside the prompt to steer the first frame.
#[derive(Debug, Clone, Validate)]
pub struct ReferenceImage {
    #[garde(length(min = 1, max = 255))]
    pub file_name: String,

    #[garde(length(min = 1, max = 10485760), custom(supported_image))]
    pub bytes: Vec<u8>,
}

impl ReferenceImage {
    /// MIME type sniffed from the image header, for the multipart part.
    pub fn mime_type(&self) -> &'static str {
        match image::guess_format(&self.bytes) {
            Ok(image::ImageFormat::Png) => "image/png",
            Ok(image::ImageFormat::Jpeg) => "image/jpeg",
            Ok(image::ImageFormat::WebP) => "image/webp",
            _ => "application/octet-stream",
        }
    }
}

fn supported_image(bytes: &[u8], _: &()) -> garde::Result {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png | image::ImageFormat::Jpeg) => Ok(()),
        Ok(other) => Err(garde::Error::new(format!(
            "unsupported reference image format {other:?}; use PNG or JPEG"
        ))),
        Err(_) => Err(garde::Error::new("reference image is not a recognizable image")),
    }
}

fn not_blank(value: &str, _: &()) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("prompt cannot be empty"));
    }
    Ok(())
}

/// A prompt plus generation settings, as composed on the create page.
#[derive(Debug, Clone, Validate)]
pub struct CreateVideoRequest {
    #[garde(length(chars, max = 4000), custom(not_blank))]
    pub prompt: String,

    #[garde(skip)]
    pub model: VideoModel,

    /// Clip length in seconds.
    #[garde(range(min = 2, max = 25))]
    pub seconds: u32,

    #[garde(skip)]
    pub resolution: Resolution,

    #[garde(dive)]
    pub reference_image: Option<ReferenceImage>,
}

impl CreateVideoRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: VideoModel::default(),
            seconds: 8,
            resolution: Resolution::default(),
            reference_image: None,
        }
    }

    pub fn trimmed_prompt(&self) -> &str {
        self.prompt.trim()
    }
}
