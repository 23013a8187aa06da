//! Request classification against the public file namespace

use tracing::debug;

/// Result of matching a request path against the local file namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The request addresses a file inside the namespace
    Relative(String),
    /// The request is outside the namespace (or cannot name a file in it)
    NotInNamespace,
}

impl Classification {
    /// The relative path, if the request is inside the namespace
    pub fn relative_path(&self) -> Option<&str> {
        match self {
            Classification::Relative(path) => Some(path),
            Classification::NotInNamespace => None,
        }
    }
}

/// Classify a request path
///
/// The namespace must match on a whole segment boundary: with namespace
/// `files`, `files/a.png` matches and `filesxyz/a.png` does not. Leading
/// and trailing slashes on either argument are ignored.
///
/// Remainders that are empty or contain empty, `.` or `..` segments never
/// match, so a relative path always stays inside the namespace.
pub fn classify(request_path: &str, local_namespace: &str) -> Classification {
    let path = request_path.trim_matches('/');
    let namespace = local_namespace.trim_matches('/');

    if namespace.is_empty() {
        return Classification::NotInNamespace;
    }

    let remainder = match path.strip_prefix(namespace) {
        Some(rest) => match rest.strip_prefix('/') {
            Some(rest) => rest,
            None => {
                debug!(
                    "Not in namespace: path={} shares a prefix with namespace={} but not a segment",
                    request_path, namespace
                );
                return Classification::NotInNamespace;
            }
        },
        None => return Classification::NotInNamespace,
    };

    if !is_safe_relative(remainder) {
        debug!(
            "Not in namespace: path={} has no usable relative part",
            request_path
        );
        return Classification::NotInNamespace;
    }

    Classification::Relative(remainder.to_string())
}

/// Check that a relative path is non-empty and free of traversal segments
pub fn is_safe_relative(relative: &str) -> bool {
    !relative.is_empty()
        && relative
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}
