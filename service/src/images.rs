//! Signature image intake.
//!
//! Images arrive as `data:` URLs from the signing pad. They are decoded and
//! written to disk before the ledger is touched, so a bad image never leaves
//! a signature row behind. The bytes are stored as sent.

use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use petition_core::PetitionError;

/// Public URL prefix under which stored signatures are served.
pub const SIGNATURES_URL_PREFIX: &str = "/signatures";

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("unsupported signature image: {0}")]
    Unsupported(String),

    #[error("signature image is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("signature image content does not match its declared type")]
    Mismatch,

    #[error("failed to store signature image: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ImageError> for PetitionError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::Io(e) => PetitionError::storage_with_source("signature image write failed", e),
            other => PetitionError::validation(other.to_string()),
        }
    }
}

/// Where signature images are persisted.
pub trait SignatureImageStore: Send + Sync {
    /// Persist an image given as a data URL and return its reference.
    fn store_data_url(&self, data_url: &str) -> Result<String, ImageError>;

    /// Remove a previously stored image. Missing images are not an error.
    fn discard(&self, image_ref: &str) -> Result<(), ImageError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageKind {
    Png,
    Jpeg,
}

impl ImageKind {
    fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "image/png" => Some(Self::Png),
            "image/jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    fn matches(self, bytes: &[u8]) -> bool {
        match self {
            Self::Png => bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]),
            Self::Jpeg => bytes.starts_with(&[0xFF, 0xD8, 0xFF]),
        }
    }
}

/// Split `data:image/png;base64,<payload>` into kind and decoded bytes.
fn decode_data_url(data_url: &str) -> Result<(ImageKind, Vec<u8>), ImageError> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| ImageError::Unsupported("expected a data: URL".to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| ImageError::Unsupported("missing payload".to_string()))?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| ImageError::Unsupported("payload must be base64".to_string()))?;
    let kind = ImageKind::from_mime(mime)
        .ok_or_else(|| ImageError::Unsupported(format!("type {mime}")))?;

    let bytes = STANDARD.decode(payload.trim())?;
    if !kind.matches(&bytes) {
        return Err(ImageError::Mismatch);
    }
    Ok((kind, bytes))
}

/// Stores images as `<dir>/<uuid>.<ext>`.
#[derive(Debug, Clone)]
pub struct FsImageStore {
    dir: PathBuf,
}

impl FsImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SignatureImageStore for FsImageStore {
    fn store_data_url(&self, data_url: &str) -> Result<String, ImageError> {
        let (kind, bytes) = decode_data_url(data_url)?;

        std::fs::create_dir_all(&self.dir)?;
        let filename = format!("{}.{}", uuid::Uuid::new_v4(), kind.extension());
        std::fs::write(self.dir.join(&filename), &bytes)?;

        tracing::debug!(filename = %filename, bytes = bytes.len(), "Signature image stored");
        Ok(format!("{SIGNATURES_URL_PREFIX}/{filename}"))
    }

    fn discard(&self, image_ref: &str) -> Result<(), ImageError> {
        let Some(filename) = image_ref
            .strip_prefix(SIGNATURES_URL_PREFIX)
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            return Ok(());
        };
        if filename.contains('/') || filename.contains("..") {
            return Ok(());
        }

        match std::fs::remove_file(self.dir.join(filename)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
