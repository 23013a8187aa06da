//! Origin path resolution for original files and rendered derivatives
//!
//! Image derivatives live under `<derivative dir>/<preset>/<original path>`,
//! optionally with a stream scheme segment after the preset
//! (`styles/thumbnail/public/photo.jpg`). The origin may never have rendered
//! that preset, so for derivatives the proxy fetches the original file and
//! leaves rendering to the local site.

use crate::config::ProxyConfig;
use crate::store::LocalStore;
use tracing::debug;

/// What to fetch from the origin for a relative path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginDecision {
    /// Fetch this relative path unchanged
    UseAsIs(String),
    /// Fetch the original of a derivative; rendering regenerates the
    /// derivative once the original is local
    UseOriginalAndDefer(String),
    /// The original is already local, nothing to fetch
    AlreadyResolvable,
}

impl OriginDecision {
    /// Relative path that should be fetched, if any
    pub fn fetch_path(&self) -> Option<&str> {
        match self {
            OriginDecision::UseAsIs(path) | OriginDecision::UseOriginalAndDefer(path) => Some(path),
            OriginDecision::AlreadyResolvable => None,
        }
    }
}

/// Extract the original path from a derivative path
///
/// A derivative is a path with a segment equal to one of `derivative_dirs`,
/// followed by a preset segment and at least one more segment. Matching is
/// segment-exact: `mystyles/a.jpg` or `styles.jpg` are not derivatives.
///
/// Returns `None` for paths that are not derivatives.
pub fn original_path(
    relative_path: &str,
    derivative_dirs: &[String],
    scheme_segments: &[String],
) -> Option<String> {
    let segments: Vec<&str> = relative_path.split('/').collect();

    let index = segments
        .iter()
        .enumerate()
        .position(|(i, segment)| {
            i + 2 < segments.len() && derivative_dirs.iter().any(|dir| dir == segment)
        })?;

    let mut rest = &segments[index + 2..];
    if rest.len() > 1 && scheme_segments.iter().any(|scheme| scheme == rest[0]) {
        rest = &rest[1..];
    }

    let original: Vec<&str> = segments[..index].iter().chain(rest.iter()).copied().collect();
    Some(original.join("/"))
}

/// Decide which relative path to fetch for a request
///
/// Local existence of the original is checked through `store`.
pub async fn resolve(
    relative_path: &str,
    config: &ProxyConfig,
    store: &dyn LocalStore,
) -> OriginDecision {
    if !config.use_derivative_root {
        return OriginDecision::UseAsIs(relative_path.to_string());
    }

    let original = match original_path(
        relative_path,
        &config.derivative_dirs,
        &config.derivative_scheme_segments,
    ) {
        Some(original) => original,
        None => return OriginDecision::UseAsIs(relative_path.to_string()),
    };

    if store.exists(&original).await {
        debug!(
            "Derivative {} can be rendered from local original {}",
            relative_path, original
        );
        OriginDecision::AlreadyResolvable
    } else {
        debug!(
            "Derivative {} needs original {} from origin",
            relative_path, original
        );
        OriginDecision::UseOriginalAndDefer(original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn dirs() -> Vec<String> {
        vec!["styles".to_string(), "imagecache".to_string()]
    }

    fn schemes() -> Vec<String> {
        vec!["public".to_string()]
    }

    #[test]
    fn test_original_path_styles() {
        assert_eq!(
            original_path("styles/thumbnail/photo.jpg", &dirs(), &schemes()).as_deref(),
            Some("photo.jpg")
        );
        assert_eq!(
            original_path("imagecache/large/2024/photo.jpg", &dirs(), &schemes()).as_deref(),
            Some("2024/photo.jpg")
        );
    }

    #[test]
    fn test_original_path_strips_scheme_segment() {
        assert_eq!(
            original_path("styles/thumbnail/public/photo.jpg", &dirs(), &schemes()).as_deref(),
            Some("photo.jpg")
        );
        // A lone "public" file name is the original itself
        assert_eq!(
            original_path("styles/thumbnail/public", &dirs(), &schemes()).as_deref(),
            Some("public")
        );
    }

    #[test]
    fn test_original_path_keeps_leading_segments() {
        assert_eq!(
            original_path("gallery/styles/medium/photo.jpg", &dirs(), &schemes()).as_deref(),
            Some("gallery/photo.jpg")
        );
    }

    #[test]
    fn test_original_path_segment_exact() {
        assert_eq!(original_path("mystyles/thumbnail/photo.jpg", &dirs(), &schemes()), None);
        assert_eq!(original_path("styles.jpg", &dirs(), &schemes()), None);
        assert_eq!(original_path("photos/styles-guide.pdf", &dirs(), &schemes()), None);
    }

    #[test]
    fn test_original_path_needs_preset_and_file() {
        assert_eq!(original_path("styles/photo.jpg", &dirs(), &schemes()), None);
        assert_eq!(original_path("styles", &dirs(), &schemes()), None);
    }

    #[test]
    fn test_original_path_first_match_wins() {
        assert_eq!(
            original_path("styles/a/styles/b/photo.jpg", &dirs(), &schemes()).as_deref(),
            Some("styles/b/photo.jpg")
        );
    }

    #[tokio::test]
    async fn test_resolve_plain_file() {
        let store = MemoryStore::new();
        let config = ProxyConfig::default();
        let decision = resolve("a.png", &config, &store).await;
        assert_eq!(decision, OriginDecision::UseAsIs("a.png".to_string()));
        assert_eq!(decision.fetch_path(), Some("a.png"));
    }

    #[tokio::test]
    async fn test_resolve_derivative_with_local_original() {
        let store = MemoryStore::new();
        store.insert("photo.jpg", b"jpeg".to_vec());
        let config = ProxyConfig::default();

        let decision = resolve("styles/thumbnail/photo.jpg", &config, &store).await;
        assert_eq!(decision, OriginDecision::AlreadyResolvable);
        assert_eq!(decision.fetch_path(), None);
    }

    #[tokio::test]
    async fn test_resolve_derivative_without_local_original() {
        let store = MemoryStore::new();
        let config = ProxyConfig::default();

        let decision = resolve("styles/thumbnail/photo.jpg", &config, &store).await;
        assert_eq!(
            decision,
            OriginDecision::UseOriginalAndDefer("photo.jpg".to_string())
        );
    }

    #[tokio::test]
    async fn test_resolve_without_derivative_root() {
        let store = MemoryStore::new();
        store.insert("photo.jpg", b"jpeg".to_vec());
        let config = ProxyConfig {
            use_derivative_root: false,
            ..Default::default()
        };

        let decision = resolve("styles/thumbnail/photo.jpg", &config, &store).await;
        assert_eq!(
            decision,
            OriginDecision::UseAsIs("styles/thumbnail/photo.jpg".to_string())
        );
    }
}
