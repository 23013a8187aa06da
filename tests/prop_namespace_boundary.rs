// Property: classification respects the public file namespace
//
// A request path is inside the namespace only when the namespace matches
// on a whole segment boundary, and the relative path handed on never
// contains empty, `.` or `..` segments.

use proptest::prelude::*;
use stage_file_proxy::{classify, Classification};

fn segment() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-][a-zA-Z0-9_.-]{0,11}".prop_filter("not a dot segment", |s| s != "." && s != "..")
}

fn segments(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(segment(), 1..max)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Any clean relative path under the namespace is recovered unchanged
    #[test]
    fn prop_relative_path_recovered(
        namespace in segments(4),
        relative in segments(6),
    ) {
        let namespace = namespace.join("/");
        let relative = relative.join("/");
        let request = format!("/{}/{}", namespace, relative);

        prop_assert_eq!(
            classify(&request, &namespace),
            Classification::Relative(relative.clone())
        );
        // Surrounding slashes on the namespace do not matter
        prop_assert_eq!(
            classify(&request, &format!("/{}/", namespace)),
            Classification::Relative(relative)
        );
    }

    /// A path that only shares a string prefix with the namespace is outside it
    #[test]
    fn prop_prefix_without_boundary_rejected(
        namespace in segments(4),
        suffix in "[a-z0-9]{1,6}",
        relative in segments(4),
    ) {
        let namespace = namespace.join("/");
        let request = format!("/{}{}/{}", namespace, suffix, relative.join("/"));

        prop_assert_eq!(classify(&request, &namespace), Classification::NotInNamespace);
    }

    /// Traversal and empty segments never produce a relative path
    #[test]
    fn prop_unsafe_remainder_rejected(
        namespace in segments(3),
        before in prop::collection::vec(segment(), 0..3),
        bad in prop::sample::select(vec!["", ".", ".."]),
        after in segments(3),
    ) {
        let namespace = namespace.join("/");
        let mut parts = before;
        parts.push(bad.to_string());
        parts.extend(after);
        let request = format!("/{}/{}", namespace, parts.join("/"));

        prop_assert_eq!(classify(&request, &namespace), Classification::NotInNamespace);
    }

    /// Whatever comes back is a clean relative path
    #[test]
    fn prop_relative_is_always_clean(request in "/[a-z./]{0,40}") {
        if let Classification::Relative(relative) = classify(&request, "files") {
            prop_assert!(!relative.is_empty());
            for part in relative.split('/') {
                prop_assert!(!part.is_empty() && part != "." && part != "..");
            }
        }
    }
}
