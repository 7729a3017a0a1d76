// Stable, sanitized names and integer identifiers derived from logical names.
//
// All functions here are pure: same input always yields the same output,
// no I/O, no global state.

pub const FIRST_TABLE_ID: u32 = 101;
pub const INTERFACE_PREFIX: &str = "wg-egress-";
pub const DNS_SET_PREFIX: &str = "dns_";

/// Lowercase, map `[a-z0-9_]` to themselves, `-` to `_`, everything else to
/// `_`. Idempotent: `sanitize(sanitize(s)) == sanitize(s)`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            let lower = c.to_ascii_lowercase();
            match lower {
                'a'..='z' | '0'..='9' | '_' => lower,
                '-' => '_',
                _ => '_',
            }
        })
        .collect()
}

pub fn interface_name(node_name: &str) -> String {
    format!("{INTERFACE_PREFIX}{}", sanitize(node_name))
}

pub fn dns_set_name(policy_name: &str) -> String {
    format!("{DNS_SET_PREFIX}{}", sanitize(policy_name))
}

/// `tableID = 101 + index_in_request_order`.
pub fn table_id(index: usize) -> u32 {
    FIRST_TABLE_ID + index as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case("eu-west" => "eu_west")]
    #[test_case("Corp Net" => "corp_net")]
    #[test_case("already_ok" => "already_ok")]
    #[test_case("a--b" => "a__b")]
    #[test_case("" => "")]
    fn sanitize_cases(input: &str) -> String {
        sanitize(input)
    }

    #[test]
    fn sanitize_is_idempotent() {
        for s in ["eu-west", "Corp.Net!!", "already_ok", "", "MiXeD-123"] {
            let once = sanitize(s);
            assert_eq!(sanitize(&once), once);
        }
    }

    #[test]
    fn sanitize_only_produces_valid_chars() {
        let out = sanitize("Weird!!Name--With.Dots");
        assert!(out.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
    }

    #[test]
    fn interface_name_is_prefixed_and_sanitized() {
        assert_eq!(interface_name("eu-west"), "wg-egress-eu_west");
    }

    #[test]
    fn dns_set_name_is_prefixed_and_sanitized() {
        assert_eq!(dns_set_name("ads"), "dns_ads");
        assert_eq!(dns_set_name("Ads Policy"), "dns_ads_policy");
    }

    #[test]
    fn table_id_starts_at_101() {
        assert_eq!(table_id(0), 101);
        assert_eq!(table_id(1), 102);
    }

    proptest! {
        #[test]
        fn sanitize_is_idempotent_for_any_input(s in ".*") {
            let once = sanitize(&s);
            prop_assert_eq!(sanitize(&once), once);
        }

        #[test]
        fn sanitize_only_produces_valid_chars_for_any_input(s in ".*") {
            let out = sanitize(&s);
            prop_assert!(out.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
        }

        #[test]
        fn sanitize_preserves_length(s in "[a-zA-Z0-9_-]*") {
            prop_assert_eq!(sanitize(&s).chars().count(), s.chars().count());
        }
    }
}
