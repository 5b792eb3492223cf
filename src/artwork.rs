use eframe::egui::ColorImage;
use reqwest::Client;
use std::time::Duration;

use crate::error::{Result, VibifyError};

/// Decode downloaded album art into an image egui can upload
pub fn decode_artwork(bytes: &[u8]) -> Result<ColorImage> {
    let image = image::load_from_memory(bytes)?.to_rgba8();
    let size = [image.width() as usize, image.height() as usize];
    let pixels = image.into_raw();
    Ok(ColorImage::from_rgba_unmultiplied(size, &pixels))
}

/// Downloads album art, remembering the last image so an unchanged track is
/// not fetched again on every poll
pub struct ArtworkFetcher {
    http_client: Client,
    last: Option<(String, ColorImage)>,
}

impl ArtworkFetcher {
    pub fn new() -> Result<Self> {
        let http_client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            http_client,
            last: None,
        })
    }

    /// Whether `url` is the image fetched last
    pub fn is_current(&self, url: &str) -> bool {
        self.last.as_ref().is_some_and(|(last, _)| last == url)
    }

    pub async fn fetch(&mut self, url: &str) -> Result<ColorImage> {
        if let Some((last_url, image)) = &self.last {
            if last_url == url {
                log::debug!("Artwork cache hit: {}", url);
                return Ok(image.clone());
            }
        }

        log::debug!("Fetching artwork: {}", url);
        let response = self.http_client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(VibifyError::ArtworkError(format!(
                "Artwork request returned status: {}",
                response.status()
            )));
        }

        let bytes = response.bytes().await?;
        let image = decode_artwork(&bytes)?;
        self.last = Some((url.to_string(), image.clone()));
        Ok(image)
    }
}
