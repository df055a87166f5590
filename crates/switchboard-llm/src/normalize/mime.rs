//! MIME type detection for inlined media

use std::sync::Arc;

use crate::types::MediaKind;

/// Content type that carries no information about the payload
const GENERIC_CONTENT_TYPE: &str = "application/octet-stream";

/// Decides the MIME type of a fetched media payload
///
/// An explicit MIME type on the part always wins and never reaches a strategy.
pub trait MimeStrategy: Send + Sync {
    /// Detect from the source URL and the response `Content-Type`, if any
    fn detect(&self, url: &str, content_type: Option<&str>) -> String;
}

/// Content-type first, then file extension, then a fixed fallback
#[derive(Debug, Clone, Copy)]
pub struct ExtensionMime {
    table: &'static [(&'static str, &'static str)],
    fallback: &'static str,
}

impl ExtensionMime {
    pub const IMAGE: Self = Self::new(
        &[
            ("jpg", "image/jpeg"),
            ("jpeg", "image/jpeg"),
            ("png", "image/png"),
            ("gif", "image/gif"),
            ("webp", "image/webp"),
            ("bmp", "image/bmp"),
            ("heic", "image/heic"),
            ("heif", "image/heif"),
            ("svg", "image/svg+xml"),
        ],
        "image/jpeg",
    );

    pub const AUDIO: Self = Self::new(
        &[
            ("mp3", "audio/mpeg"),
            ("wav", "audio/wav"),
            ("ogg", "audio/ogg"),
            ("flac", "audio/flac"),
            ("m4a", "audio/mp4"),
            ("aac", "audio/aac"),
            ("weba", "audio/webm"),
        ],
        "audio/mpeg",
    );

    pub const VIDEO: Self = Self::new(
        &[
            ("mp4", "video/mp4"),
            ("mov", "video/quicktime"),
            ("webm", "video/webm"),
            ("mpeg", "video/mpeg"),
            ("mpg", "video/mpeg"),
            ("avi", "video/x-msvideo"),
            ("mkv", "video/x-matroska"),
            ("3gp", "video/3gpp"),
        ],
        "video/mp4",
    );

    pub const FILE: Self = Self::new(
        &[
            ("pdf", "application/pdf"),
            ("txt", "text/plain"),
            ("md", "text/markdown"),
            ("csv", "text/csv"),
            ("html", "text/html"),
            ("json", "application/json"),
            ("doc", "application/msword"),
            ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
            ("xls", "application/vnd.ms-excel"),
            ("xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        ],
        "application/pdf",
    );

    pub const fn new(table: &'static [(&'static str, &'static str)], fallback: &'static str) -> Self {
        Self { table, fallback }
    }

    pub const fn fallback(&self) -> &'static str {
        self.fallback
    }

    fn by_extension(&self, url: &str) -> Option<&'static str> {
        let path = url::Url::parse(url).map_or_else(|_| url.to_owned(), |parsed| parsed.path().to_owned());
        let file_name = path.rsplit('/').next()?;
        let (_, extension) = file_name.rsplit_once('.')?;
        let extension = extension.to_ascii_lowercase();

        self.table
            .iter()
            .find(|(ext, _)| *ext == extension)
            .map(|(_, mime)| *mime)
    }
}

impl MimeStrategy for ExtensionMime {
    fn detect(&self, url: &str, content_type: Option<&str>) -> String {
        if let Some(mime) = content_type.and_then(essence) {
            return mime;
        }

        self.by_extension(url).unwrap_or(self.fallback).to_owned()
    }
}

/// Strip parameters from a `Content-Type`, dropping generic or empty values
fn essence(content_type: &str) -> Option<String> {
    let mime = content_type.split(';').next()?.trim().to_ascii_lowercase();

    if mime.is_empty() || mime == GENERIC_CONTENT_TYPE {
        None
    } else {
        Some(mime)
    }
}

/// One detection strategy per media kind
#[derive(Clone)]
pub struct MimeStrategies {
    pub image: Arc<dyn MimeStrategy>,
    pub audio: Arc<dyn MimeStrategy>,
    pub video: Arc<dyn MimeStrategy>,
    pub file: Arc<dyn MimeStrategy>,
}

impl MimeStrategies {
    pub fn for_kind(&self, kind: MediaKind) -> &dyn MimeStrategy {
        match kind {
            MediaKind::Image => self.image.as_ref(),
            MediaKind::Audio => self.audio.as_ref(),
            MediaKind::Video => self.video.as_ref(),
            MediaKind::File => self.file.as_ref(),
        }
    }

    /// Replace the strategy used for one kind
    #[must_use]
    pub fn with(mut self, kind: MediaKind, strategy: Arc<dyn MimeStrategy>) -> Self {
        match kind {
            MediaKind::Image => self.image = strategy,
            MediaKind::Audio => self.audio = strategy,
            MediaKind::Video => self.video = strategy,
            MediaKind::File => self.file = strategy,
        }
        self
    }
}

impl Default for MimeStrategies {
    fn default() -> Self {
        Self {
            image: Arc::new(ExtensionMime::IMAGE),
            audio: Arc::new(ExtensionMime::AUDIO),
            video: Arc::new(ExtensionMime::VIDEO),
            file: Arc::new(ExtensionMime::FILE),
        }
    }
}

impl std::fmt::Debug for MimeStrategies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MimeStrategies").finish_non_exhaustive()
    }
}
