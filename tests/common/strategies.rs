use proptest::prelude::*;

/// Keys spread over a few namespaces, some sharing a hash tag
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "(user|order|session):[a-z0-9]{1,6}",
        "\\{tenant[0-9]\\}:(user|order):[0-9]{1,3}",
    ]
}

pub fn key_set_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::hash_set(key_strategy(), 0..60).prop_map(|keys| keys.into_iter().collect())
}

/// Namespace patterns the enumeration tests query with
pub fn namespace_pattern_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("*".to_string()),
        Just("user:*".to_string()),
        Just("order:*".to_string()),
        Just("session:?".to_string()),
        Just("{tenant1}:*".to_string()),
        Just("*:1*".to_string()),
        Just("nothing:*".to_string()),
    ]
}

/// Glob patterns built only from `*`, `?` and two literals
pub fn simple_glob_strategy() -> impl Strategy<Value = String> {
    "[ab*?]{0,7}"
}

pub fn subject_strategy() -> impl Strategy<Value = String> {
    "[ab]{0,8}"
}

pub fn shard_count_strategy() -> impl Strategy<Value = usize> {
    1usize..=6
}
