//! Deterministic on-disk layout for downloaded series.
//!
//! ```text
//! {root}/{slug}/cover.{ext}
//! {root}/{slug}/chapter_{number}/{index:03}.{ext}
//! ```
//!
//! Paths are a pure function of (slug, chapter number, index), which is what
//! keeps concurrent writers off each other's files.

use std::path::{Path, PathBuf};

use super::error::DownloadError;

/// Default output root.
pub const DEFAULT_OUTPUT_DIR: &str = "downloads";

/// Root directory plus the naming rules beneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_DIR)
    }
}

impl OutputLayout {
    /// Creates a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The output root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{slug}`
    #[must_use]
    pub fn series_dir(&self, slug: &str) -> PathBuf {
        self.root.join(sanitize_segment(slug))
    }

    /// `{root}/{slug}/cover.{ext}`
    #[must_use]
    pub fn cover_path(&self, slug: &str, ext: &str) -> PathBuf {
        self.series_dir(slug).join(format!("cover.{ext}"))
    }

    /// `{root}/{slug}/chapter_{number}`
    #[must_use]
    pub fn chapter_dir(&self, slug: &str, number: &str) -> PathBuf {
        self.series_dir(slug)
            .join(sanitize_segment(&format!("chapter_{number}")))
    }

    /// `{root}/{slug}/chapter_{number}/{index:03}.{ext}`
    #[must_use]
    pub fn asset_path(&self, slug: &str, number: &str, index: usize, ext: &str) -> PathBuf {
        self.chapter_dir(slug, number)
            .join(format!("{index:03}.{ext}"))
    }
}

/// Picks the stored image extension for a URL.
///
/// `.jpg`/`.jpeg` map to `jpg`, `.png` to `png`, anything else to `webp`.
#[must_use]
pub fn image_extension(url: &str) -> &'static str {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase());

    if path.ends_with(".jpg") || path.ends_with(".jpeg") {
        "jpg"
    } else if path.ends_with(".png") {
        "png"
    } else {
        "webp"
    }
}

/// Makes a single path component out of untrusted text.
///
/// Path separators, reserved characters and control characters become `_`;
/// an empty result or a bare `.`/`..` becomes `_`.
#[must_use]
pub fn sanitize_segment(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match sanitized.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => sanitized,
    }
}

/// Creates `dir` and any missing parents.
///
/// # Errors
///
/// Returns [`DownloadError::Io`] carrying the directory path.
pub async fn ensure_dir(dir: &Path) -> Result<(), DownloadError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| DownloadError::io(dir, e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = OutputLayout::new("/data");
        assert_eq!(layout.series_dir("solo"), PathBuf::from("/data/solo"));
        assert_eq!(
            layout.cover_path("solo", "jpg"),
            PathBuf::from("/data/solo/cover.jpg")
        );
        assert_eq!(
            layout.chapter_dir("solo", "10.5"),
            PathBuf::from("/data/solo/chapter_10.5")
        );
        assert_eq!(
            layout.asset_path("solo", "3", 7, "webp"),
            PathBuf::from("/data/solo/chapter_3/007.webp")
        );
        assert_eq!(
            layout.asset_path("solo", "3", 123, "webp"),
            PathBuf::from("/data/solo/chapter_3/123.webp")
        );
    }

    #[test]
    fn test_layout_default_root() {
        assert_eq!(OutputLayout::default().root(), Path::new("downloads"));
    }

    #[test]
    fn test_slug_cannot_escape_root() {
        let layout = OutputLayout::new("/data");
        assert_eq!(layout.series_dir(".."), PathBuf::from("/data/_"));
        assert_eq!(layout.series_dir("a/../b"), PathBuf::from("/data/a_.._b"));
        assert_eq!(
            layout.chapter_dir("s", "1/2"),
            PathBuf::from("/data/s/chapter_1_2")
        );
    }

    #[test]
    fn test_sanitize_segment() {
        assert_eq!(sanitize_segment("omniscient-reader"), "omniscient-reader");
        assert_eq!(sanitize_segment("a:b*c?"), "a_b_c_");
        assert_eq!(sanitize_segment("  "), "_");
        assert_eq!(sanitize_segment("."), "_");
    }

    #[test]
    fn test_image_extension() {
        assert_eq!(image_extension("https://cdn.test/cover.jpg"), "jpg");
        assert_eq!(image_extension("https://cdn.test/cover.JPEG"), "jpg");
        assert_eq!(image_extension("https://cdn.test/cover.png?w=300"), "png");
        assert_eq!(image_extension("https://cdn.test/cover.webp"), "webp");
        assert_eq!(image_extension("https://cdn.test/cover"), "webp");
        assert_eq!(image_extension("relative/x.png"), "png");
    }

    #[tokio::test]
    async fn test_ensure_dir_creates_parents() {
        let temp = tempfile::TempDir::new().unwrap();
        let nested = temp.path().join("a/b/c");
        ensure_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
        // Idempotent
        ensure_dir(&nested).await.unwrap();
    }
}
