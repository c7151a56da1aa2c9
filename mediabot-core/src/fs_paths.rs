use std::path::PathBuf;

use crate::models::media::Platform;

pub trait AppPaths: Send + Sync {
    fn downloads_dir(&self) -> PathBuf;
    fn data_dir(&self) -> PathBuf;
    fn secrets_dir(&self) -> PathBuf;
    fn bin_dir(&self) -> PathBuf;

    fn cookies_file(&self, platform: Platform) -> Option<PathBuf> {
        let name = match platform {
            Platform::Instagram => "instagram_cookies.txt",
            Platform::Facebook => "facebook_cookies.txt",
            Platform::TikTok => "tiktok_cookies.txt",
            Platform::Generic => return None,
        };
        Some(self.secrets_dir().join(name))
    }
}

/// Layout rooted at a single base directory:
/// `downloads/`, `data/`, `secrets/` and `bin/`.
#[derive(Debug, Clone)]
pub struct ServerPaths {
    base: PathBuf,
}

impl ServerPaths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn from_env() -> Self {
        if let Ok(dir) = std::env::var("MEDIABOT_HOME") {
            return Self::new(dir);
        }
        let base = dirs::data_dir()
            .map(|d| d.join("mediabot"))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(base)
    }

    pub fn base(&self) -> &std::path::Path {
        &self.base
    }
}

impl AppPaths for ServerPaths {
    fn downloads_dir(&self) -> PathBuf {
        self.base.join("downloads")
    }

    fn data_dir(&self) -> PathBuf {
        self.base.join("data")
    }

    fn secrets_dir(&self) -> PathBuf {
        self.base.join("secrets")
    }

    fn bin_dir(&self) -> PathBuf {
        self.base.join("bin")
    }
}
