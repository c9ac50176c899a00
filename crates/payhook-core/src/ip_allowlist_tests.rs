use super::*;

fn allowlist(entries: &[&str]) -> IpAllowlist {
    let owned: Vec<String> = entries.iter().map(|e| e.to_string()).collect();
    IpAllowlist::parse(&owned).unwrap()
}

#[test]
fn test_empty_allowlist_allows_everything() {
    let list = IpAllowlist::parse(&[]).unwrap();
    assert!(!list.is_restricted());
    assert!(list.is_allowed("203.0.113.9"));
    assert!(list.is_allowed("not-an-ip"));
}

#[test]
fn test_disabled_config_allows_everything() {
    let config = WebhookSecurityConfig {
        enable_ip_allowlist: false,
        allowed_ips: vec!["10.0.0.1".to_string()],
        ..Default::default()
    };
    let list = IpAllowlist::from_config(&config).unwrap();
    assert!(list.is_allowed("192.168.1.1"));
}

#[test]
fn test_exact_match() {
    let list = allowlist(&["13.124.18.147"]);
    assert!(list.is_allowed("13.124.18.147"));
    assert!(!list.is_allowed("13.124.18.148"));
}

#[test]
fn test_ipv4_cidr_block() {
    let list = allowlist(&["203.0.113.0/24"]);
    assert!(list.is_allowed("203.0.113.0"));
    assert!(list.is_allowed("203.0.113.255"));
    assert!(!list.is_allowed("203.0.114.1"));
}

#[test]
fn test_non_octet_prefix() {
    let list = allowlist(&["10.0.0.0/13"]);
    assert!(list.is_allowed("10.7.255.255"));
    assert!(!list.is_allowed("10.8.0.0"));
}

#[test]
fn test_zero_prefix_matches_whole_family() {
    let list = allowlist(&["0.0.0.0/0"]);
    assert!(list.is_allowed("198.51.100.7"));
    assert!(!list.is_allowed("2001:db8::1"));
}

#[test]
fn test_ipv6_block() {
    let list = allowlist(&["2001:db8::/32"]);
    assert!(list.is_allowed("2001:db8:1234::1"));
    assert!(!list.is_allowed("2001:db9::1"));
}

#[test]
fn test_ipv4_mapped_source_matches_ipv4_entry() {
    let list = allowlist(&["10.0.0.1"]);
    assert!(list.is_allowed("::ffff:10.0.0.1"));
}

#[test]
fn test_unparseable_source_rejected_when_restricted() {
    let list = allowlist(&["10.0.0.1"]);
    assert!(!list.is_allowed("unknown"));
    assert!(!list.is_allowed(""));
}

#[test]
fn test_invalid_entries_are_configuration_errors() {
    for bad in ["10.0.0.0/99", "not-an-ip", "10.0.0.0/abc", "fe80::/129"] {
        let result = IpAllowlist::parse(&[bad.to_string()]);
        assert!(
            matches!(result, Err(ConfigError::InvalidAllowlistEntry { ref entry, .. }) if entry == bad),
            "entry '{}' should be rejected",
            bad
        );
    }
}

#[test]
fn test_entries_render_normalised() {
    let list = allowlist(&[" 10.0.0.1 ", "192.168.0.0/16"]);
    assert_eq!(list.entries(), vec!["10.0.0.1", "192.168.0.0/16"]);
}
