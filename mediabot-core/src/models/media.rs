use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Instagram,
    Facebook,
    TikTok,
    Generic,
}

/// URL substring policy. Order matters: the first matching row wins.
const PLATFORM_PATTERNS: &[(&str, Platform)] = &[
    ("instagram.com", Platform::Instagram),
    ("facebook.com", Platform::Facebook),
    ("fb.watch", Platform::Facebook),
    ("tiktok.com", Platform::TikTok),
];

impl Platform {
    pub fn from_url(url: &str) -> Platform {
        let lowered = url.to_lowercase();
        PLATFORM_PATTERNS
            .iter()
            .find(|(pattern, _)| lowered.contains(pattern))
            .map(|(_, platform)| *platform)
            .unwrap_or(Platform::Generic)
    }

    pub fn patterns(&self) -> Vec<&'static str> {
        PLATFORM_PATTERNS
            .iter()
            .filter(|(_, p)| p == self)
            .map(|(pattern, _)| *pattern)
            .collect()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::Instagram => "Instagram",
            Platform::Facebook => "Facebook",
            Platform::TikTok => "TikTok",
            Platform::Generic => "Generic",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub platform: Platform,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into().trim().to_string();
        let platform = Platform::from_url(&url);
        Self { url, platform }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Video,
    Photo,
    Animation,
}

impl MediaKind {
    pub fn from_path(path: &Path) -> MediaKind {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "gif" => MediaKind::Animation,
            "jpg" | "jpeg" | "png" | "webp" | "heic" => MediaKind::Photo,
            _ => MediaKind::Video,
        }
    }
}

/// A media file written by a resolver into the downloads directory.
///
/// The ref owns its file. `cleanup` removes it explicitly; dropping a ref that was
/// never cleaned up removes the file as well, so no path outlives its ref.
#[derive(Debug)]
pub struct LocalMediaRef {
    path: PathBuf,
    kind: MediaKind,
    released: bool,
}

impl LocalMediaRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let kind = MediaKind::from_path(&path);
        Self {
            path,
            kind,
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn cleanup(mut self) -> std::io::Result<()> {
        self.released = true;
        remove_if_present(&self.path)
    }
}

impl Drop for LocalMediaRef {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = remove_if_present(&self.path) {
            tracing::warn!("failed to remove {}: {}", self.path.display(), e);
        }
    }
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[derive(Debug)]
pub struct DownloadResult {
    pub items: Vec<LocalMediaRef>,
    pub caption: String,
    pub is_multiple: bool,
}

impl DownloadResult {
    pub fn single(item: LocalMediaRef, caption: impl Into<String>) -> Self {
        Self {
            items: vec![item],
            caption: caption.into(),
            is_multiple: false,
        }
    }

    /// Builds a carousel result. An empty item list is reported as `NoMediaFound`.
    pub fn carousel(
        items: Vec<LocalMediaRef>,
        caption: impl Into<String>,
    ) -> Result<Self, PipelineError> {
        if items.is_empty() {
            return Err(PipelineError::NoMediaFound(
                "carousel produced no files".to_string(),
            ));
        }
        Ok(Self {
            items,
            caption: caption.into(),
            is_multiple: true,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.items.iter().map(|i| i.path().to_path_buf()).collect()
    }
}
