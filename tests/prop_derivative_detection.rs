// Property: derivative paths resolve to their original file
//
// `<prefix>/<derivative dir>/<preset>/[scheme/]<path>` maps to
// `<prefix>/<path>`; paths without a derivative directory segment are
// fetched as they are.

use proptest::prelude::*;
use stage_file_proxy::origin_resolver::original_path;

fn dirs() -> Vec<String> {
    vec!["styles".to_string(), "imagecache".to_string()]
}

fn schemes() -> Vec<String> {
    vec!["public".to_string()]
}

/// Segments that can never be mistaken for a derivative marker or scheme
fn plain_segment() -> impl Strategy<Value = String> {
    "[a-z0-9_-]{1,10}".prop_filter("reserved segment", |s| {
        s != "styles" && s != "imagecache" && s != "public"
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// A derivative path maps back to its original
    #[test]
    fn prop_derivative_maps_to_original(
        prefix in prop::collection::vec(plain_segment(), 0..3),
        dir in prop::sample::select(vec!["styles", "imagecache"]),
        preset in plain_segment(),
        with_scheme in any::<bool>(),
        original in prop::collection::vec(plain_segment(), 1..4),
    ) {
        let mut parts: Vec<String> = prefix.clone();
        parts.push(dir.to_string());
        parts.push(preset);
        if with_scheme {
            parts.push("public".to_string());
        }
        parts.extend(original.iter().cloned());

        let mut expected = prefix;
        expected.extend(original);

        prop_assert_eq!(
            original_path(&parts.join("/"), &dirs(), &schemes()),
            Some(expected.join("/"))
        );
    }

    /// Paths without a derivative directory segment are not derivatives
    #[test]
    fn prop_plain_path_not_derivative(parts in prop::collection::vec(plain_segment(), 1..6)) {
        prop_assert_eq!(original_path(&parts.join("/"), &dirs(), &schemes()), None);
    }

    /// A derivative directory needs a preset and a file after it
    #[test]
    fn prop_marker_needs_preset_and_file(
        prefix in prop::collection::vec(plain_segment(), 0..3),
        preset in plain_segment(),
    ) {
        let mut bare = prefix.clone();
        bare.push("styles".to_string());
        prop_assert_eq!(original_path(&bare.join("/"), &dirs(), &schemes()), None);

        bare.push(preset);
        prop_assert_eq!(original_path(&bare.join("/"), &dirs(), &schemes()), None);
    }

    /// Derivative markers only match whole segments
    #[test]
    fn prop_marker_is_segment_exact(
        extra in "[a-z]{1,4}",
        preset in plain_segment(),
        file in plain_segment(),
    ) {
        let path = format!("{}styles/{}/{}", extra, preset, file);
        prop_assert_eq!(original_path(&path, &dirs(), &schemes()), None);
    }
}
