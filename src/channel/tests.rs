use super::*;

#[test]
fn test_exact_match() {
    assert!(matches("/foo/bar", "/foo/bar"));
    assert!(!matches("/foo/bar", "/foo/baz"));
    assert!(!matches("/foo/bar", "/foo/bar/baz"));
    assert!(!matches("/foo", "/foobar"));
}

#[test]
fn test_single_level_wildcard() {
    assert!(matches("/foo/*", "/foo/bar"));
    assert!(matches("/foo/*", "/foo/baz"));
    assert!(!matches("/foo/*", "/foo"));
    assert!(!matches("/foo/*", "/foo/bar/baz"));
    assert!(!matches("/foo/*", "/foobar/baz"));
    assert!(matches("/*", "/foo"));
    assert!(!matches("/*", "/foo/bar"));
}

#[test]
fn test_multi_level_wildcard_matches_prefix_and_descendants() {
    let pattern = "/foo/**";
    assert!(matches(pattern, "/foo"));
    assert!(matches(pattern, "/foo/bar"));
    assert!(matches(pattern, "/foo/bar/baz"));
    assert!(matches(pattern, "/foo/a/b/c/d/e"));
    assert!(!matches(pattern, "/foobar"));
    assert!(!matches(pattern, "/foobar/baz"));
    assert!(!matches(pattern, "/other/foo"));
    assert!(matches("/**", "/anything/at/all"));
}

#[test]
fn test_deep_wildcard_holds_at_every_depth() {
    let mut channel = String::from("/root");
    for depth in 0..10 {
        assert!(matches("/root/**", &channel), "depth {depth}");
        channel.push_str(&format!("/level{depth}"));
    }
}

#[test]
fn test_is_parent() {
    assert!(is_parent("/foo/*", "/foo/bar"));
    assert!(is_parent("/foo/**", "/foo/bar/baz"));
    assert!(is_parent("/foo/**", "/foo/bar/*"));
    assert!(is_parent("/foo/**", "/foo/bar/**"));
    assert!(!is_parent("/foo/*", "/foo/bar/baz"));
    assert!(!is_parent("/foo/*", "/foo/**"));
    assert!(!is_parent("/foo/*", "/foo/*"));
    assert!(!is_parent("/foo/bar", "/foo/bar"));
    assert!(!is_parent("/foo/bar", "/foo/bar/baz"));
}

#[test]
fn test_validate_accepts_well_formed_channels() {
    assert!(validate("/foo").is_ok());
    assert!(validate("/foo/bar").is_ok());
    assert!(validate("/foo/*").is_ok());
    assert!(validate("/foo/**").is_ok());
    assert!(validate("/**").is_ok());
}

#[test]
fn test_validate_rejects_malformed_channels() {
    for bad in ["", "foo", "/", "/foo//bar", "/foo/", "/foo/*/bar", "/foo/b*r", "/foo/***"] {
        assert!(
            matches!(validate(bad), Err(CometError::InvalidChannel(_))),
            "{bad:?} should be rejected"
        );
    }
}

#[test]
fn test_channel_kinds() {
    assert!(is_wildcard("/foo/*"));
    assert!(is_wildcard("/foo/**"));
    assert!(!is_wildcard("/foo"));
    assert!(is_meta("/meta/connect"));
    assert!(!is_meta("/metadata"));
}
