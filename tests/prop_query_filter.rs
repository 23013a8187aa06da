// Property: only safe query parameters reach a redirect location
//
// Filtering keeps clean parameters in their original order, always drops
// the `q` route parameter, and drops any
// parameter carrying a URL scheme, a protocol-relative prefix or a control
// character in its key or value.

use proptest::prelude::*;
use stage_file_proxy::url_builder::{append_query, filter_query, parse_query};

fn clean_token() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,12}"
}

/// Keys that survive filtering (`q` is always dropped)
fn clean_key() -> impl Strategy<Value = String> {
    clean_token().prop_filter("excluded key", |k| k != "q")
}

fn unsafe_value() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z]{1,8}".prop_map(|host| format!("http://{}.example", host)),
        "[a-z]{1,8}".prop_map(|host| format!("https://{}.example", host)),
        "[a-z]{1,8}".prop_map(|host| format!("//{}.example", host)),
        "[a-z]{1,8}".prop_map(|host| format!("\\\\{}", host)),
        "[a-z]{1,8}".prop_map(|code| format!("javascript:{}", code)),
        "[a-z]{1,8}".prop_map(|text| format!("{}\r\nLocation: x", text)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Clean parameters pass through unchanged and in order
    #[test]
    fn prop_clean_parameters_kept(
        query in prop::collection::vec((clean_key(), clean_token()), 0..8),
    ) {
        prop_assert_eq!(filter_query(query.clone()), query);
    }

    /// Unsafe parameters are dropped wherever they appear
    #[test]
    fn prop_unsafe_parameters_dropped(
        clean in prop::collection::vec((clean_key(), clean_token()), 0..6),
        bad in prop::collection::vec((clean_token(), unsafe_value()), 1..4),
        position in any::<prop::sample::Index>(),
    ) {
        let mut query = clean.clone();
        let at = position.index(query.len() + 1);
        for (offset, pair) in bad.into_iter().enumerate() {
            query.insert(at + offset, pair);
        }

        prop_assert_eq!(filter_query(query), clean);
    }

    /// A filtered query serializes and parses back to the same pairs
    #[test]
    fn prop_location_query_parses_back(
        query in prop::collection::vec((clean_key(), "[ a-zA-Z0-9_.~-]{0,12}"), 1..6),
    ) {
        let filtered = filter_query(query);
        let mut location = "/files/a.png".to_string();
        append_query(&mut location, &filtered);

        let raw = location.split_once('?').map(|(_, q)| q);
        prop_assert_eq!(parse_query(raw), filtered);
    }
}
