//! Local image storage.
//!
//! Clients send images inline as `data:<mime>;base64,<payload>` strings. The
//! store decodes them, writes one file per upload under `base_path`, and
//! hands back the public URL the file is served from (`/media/<file>`).

use std::path::{Component, Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ServerError;

/// Image types accepted for upload, as (mime, file extension).
const IMAGE_TYPES: &[(&str, &str)] = &[
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
];

/// Route prefix the stored files are served under.
pub const MEDIA_ROUTE: &str = "/media";

#[derive(Debug, Clone)]
pub struct BlobStore {
    base_path: PathBuf,
    max_size: usize,
    public_base_url: String,
}

/// An image decoded from a client payload, ready to be written.
#[derive(Debug)]
struct DecodedImage {
    bytes: Vec<u8>,
    extension: &'static str,
}

impl BlobStore {
    pub async fn new(
        base_path: PathBuf,
        max_size: usize,
        public_base_url: impl Into<String>,
    ) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::Internal(format!(
                "Failed to create media directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Blob store initialized");

        Ok(Self {
            base_path,
            max_size,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Store raw image data and return its public URL.
    pub async fn upload(&self, raw: &str) -> Result<String, ServerError> {
        let image = self.decode(raw)?;
        let file_name = format!("{}.{}", Uuid::new_v4(), image.extension);
        let path = self.safe_path(&file_name)?;

        fs::write(&path, &image.bytes)
            .await
            .map_err(|e| ServerError::Upload(format!("Failed to write {file_name}: {e}")))?;

        debug!(file = %file_name, size = image.bytes.len(), "Stored image");
        Ok(format!("{}{}/{}", self.public_base_url, MEDIA_ROUTE, file_name))
    }

    /// Read a stored file back, with the content type derived from its name.
    pub async fn get(&self, file_name: &str) -> Result<(Vec<u8>, &'static str), ServerError> {
        let path = self.safe_path(file_name)?;
        let content_type = content_type_for(file_name)
            .ok_or_else(|| ServerError::NotFound(format!("media {file_name}")))?;

        match fs::read(&path).await {
            Ok(bytes) => Ok((bytes, content_type)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ServerError::NotFound(format!("media {file_name}")))
            }
            Err(e) => Err(ServerError::Internal(format!("Failed to read {file_name}: {e}"))),
        }
    }

    fn decode(&self, raw: &str) -> Result<DecodedImage, ServerError> {
        let raw = raw.trim();
        let (mime, payload) = match raw.strip_prefix("data:") {
            Some(rest) => {
                let (meta, payload) = rest
                    .split_once(',')
                    .ok_or_else(|| ServerError::BadRequest("Malformed data URI".into()))?;
                let mime = meta
                    .strip_suffix(";base64")
                    .ok_or_else(|| ServerError::BadRequest("Data URI must be base64".into()))?;
                (Some(mime), payload)
            }
            None => (None, raw),
        };

        // Quick bound check before decoding: base64 inflates by 4/3.
        if payload.len() / 4 * 3 > self.max_size + 3 {
            return Err(ServerError::ImageTooLarge {
                size: payload.len() / 4 * 3,
                max: self.max_size,
            });
        }

        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| ServerError::BadRequest(format!("Invalid base64 image: {e}")))?;

        if bytes.is_empty() {
            return Err(ServerError::BadRequest("Empty image".into()));
        }
        if bytes.len() > self.max_size {
            return Err(ServerError::ImageTooLarge {
                size: bytes.len(),
                max: self.max_size,
            });
        }

        let extension = match mime {
            Some(mime) => IMAGE_TYPES
                .iter()
                .find(|(m, _)| m.eq_ignore_ascii_case(mime))
                .map(|(_, ext)| *ext)
                .ok_or_else(|| ServerError::BadRequest(format!("Unsupported image type {mime}")))?,
            None => sniff_extension(&bytes)
                .ok_or_else(|| ServerError::BadRequest("Unrecognized image data".into()))?,
        };

        Ok(DecodedImage { bytes, extension })
    }

    /// Resolve a file name inside `base_path`, rejecting anything that is not
    /// a single plain path component.
    fn safe_path(&self, file_name: &str) -> Result<PathBuf, ServerError> {
        let mut components = Path::new(file_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if !file_name.contains('\\') => {
                Ok(self.base_path.join(name))
            }
            _ => Err(ServerError::BadRequest("Path traversal detected".into())),
        }
    }
}

fn content_type_for(file_name: &str) -> Option<&'static str> {
    let ext = file_name.rsplit_once('.')?.1;
    IMAGE_TYPES
        .iter()
        .find(|(_, e)| e.eq_ignore_ascii_case(ext))
        .map(|(mime, _)| *mime)
}

/// Recognize an image by its magic bytes when no mime type was supplied.
fn sniff_extension(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpg")
    } else if bytes.starts_with(b"GIF8") {
        Some("gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("webp")
    } else {
        None
    }
}
