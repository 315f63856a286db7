//! # Images
//!
//! Local disk object store for submission photos and avatars.
//!
//! Files land flat under the upload directory and are served read-only at `/images/<name>`
//! by the router, with `X-Content-Type-Options: nosniff`. Names are generated server side.
//! The extension comes from the accepted format, never from the client's file name, and
//! the bytes must start with that format's signature.
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    utils::Upload,
};

pub const IMAGES_ROUTE: &str = "/images";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
}

impl ImageFormat {
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type.split(';').next()?.trim().to_ascii_lowercase();

        match essence.as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
            Self::Webp => "webp",
        }
    }

    /// Checks the file signature.
    pub fn matches(&self, bytes: &[u8]) -> bool {
        match self {
            Self::Png => bytes.starts_with(b"\x89PNG\r\n\x1a\n"),
            Self::Jpeg => bytes.starts_with(&[0xff, 0xd8, 0xff]),
            Self::Gif => bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a"),
            Self::Webp => bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP",
        }
    }
}

pub struct ImageStore {
    root: PathBuf,
    public_url: String,
    max_bytes: usize,
}

impl ImageStore {
    pub async fn new(
        root: impl Into<PathBuf>,
        public_url: &str,
        max_bytes: usize,
    ) -> AppResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        info!("Storing images under {}", root.display());

        Ok(Self {
            root,
            public_url: public_url.trim_end_matches('/').to_string(),
            max_bytes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn validate(&self, upload: &Upload) -> AppResult<ImageFormat> {
        let format = upload
            .content_type
            .as_deref()
            .and_then(ImageFormat::from_content_type)
            .ok_or_else(|| AppError::invalid("Please select a PNG, JPEG, GIF or WebP image"))?;

        if upload.bytes.len() > self.max_bytes {
            return Err(AppError::invalid(format!(
                "Image must be less than {}MB",
                self.max_bytes.div_ceil(1024 * 1024)
            )));
        }

        if !format.matches(&upload.bytes) {
            return Err(AppError::invalid("File content does not match its image type"));
        }

        Ok(format)
    }

    /// Writes a submission photo, returns its public URL.
    pub async fn put_submission_image(
        &self,
        owner: Uuid,
        slot: usize,
        upload: &Upload,
    ) -> AppResult<String> {
        let format = self.validate(upload)?;
        let name = format!(
            "{owner}_{}_{slot}.{}",
            Utc::now().timestamp_millis(),
            format.extension()
        );

        self.put(&name, upload).await
    }

    /// Writes an account avatar, returns its public URL.
    pub async fn put_avatar(&self, owner: Uuid, upload: &Upload) -> AppResult<String> {
        let format = self.validate(upload)?;
        let name = format!(
            "avatar_{owner}_{}.{}",
            Utc::now().timestamp_millis(),
            format.extension()
        );

        self.put(&name, upload).await
    }

    async fn put(&self, name: &str, upload: &Upload) -> AppResult<String> {
        fs::write(self.root.join(name), &upload.bytes).await?;

        #[cfg(feature = "verbose")]
        info!(
            "Stored {name} ({} bytes, sent as {:?})",
            upload.bytes.len(),
            upload.file_name
        );

        Ok(format!("{}{IMAGES_ROUTE}/{name}", self.public_url))
    }
}
