//! Unit tests for endpoint parsing.

use super::*;

#[test]
fn valid_addresses_round_trip() {
    let cases = [
        ("127.0.0.1:22", "127.0.0.1", 22),
        ("10.0.0.5:5432", "10.0.0.5", 5432),
        ("[::1]:2222", "::1", 2222),
        ("[fe80::1]:65535", "fe80::1", 65535),
        ("localhost:0", "localhost", 0),
        ("db-01.internal.example:3306", "db-01.internal.example", 3306),
        ("Bastion.Example.COM:22", "Bastion.Example.COM", 22),
    ];
    for (input, host, port) in cases {
        let parsed = parse_endpoint(input).unwrap_or_else(|err| panic!("{input}: {err}"));
        assert_eq!(parsed.host_string(), host, "host for {input}");
        assert_eq!(parsed.port(), port, "port for {input}");
        assert_eq!(parsed.to_string(), input, "display for {input}");
        assert_eq!(parsed.to_string().parse::<EndpointAddress>().unwrap(), parsed);
    }
}

#[test]
fn ip_literals_become_socket_addrs() {
    let v4: EndpointAddress = "192.0.2.7:8080".parse().unwrap();
    assert_eq!(v4.socket_addr(), Some("192.0.2.7:8080".parse().unwrap()));
    let v6: EndpointAddress = "[2001:db8::2]:443".parse().unwrap();
    assert_eq!(v6.socket_addr(), Some("[2001:db8::2]:443".parse().unwrap()));
    let name: EndpointAddress = "example.org:80".parse().unwrap();
    assert_eq!(name.socket_addr(), None);
    assert_eq!(name.host(), &Host::Name("example.org".into()));
}

#[test]
fn surrounding_whitespace_is_ignored() {
    let parsed = parse_endpoint("  127.0.0.1:9000 \n").unwrap();
    assert_eq!(parsed.to_string(), "127.0.0.1:9000");
}

#[test]
fn malformed_addresses_are_rejected() {
    let cases = [
        ("", AddressErrorKind::Empty),
        ("   ", AddressErrorKind::Empty),
        ("localhost", AddressErrorKind::MissingPort),
        ("localhost:", AddressErrorKind::MissingPort),
        (":80", AddressErrorKind::EmptyHost),
        ("localhost:65536", AddressErrorKind::InvalidPort("65536".into())),
        ("localhost:-1", AddressErrorKind::InvalidPort("-1".into())),
        ("localhost:+22", AddressErrorKind::InvalidPort("+22".into())),
        ("localhost:http", AddressErrorKind::InvalidPort("http".into())),
        ("::1:22", AddressErrorKind::UnbracketedIpv6),
        ("[::1]", AddressErrorKind::MissingPort),
        ("[::1]22", AddressErrorKind::MissingPort),
        ("[::1:22", AddressErrorKind::UnterminatedBracket),
        ("[10.0.0.1]:22", AddressErrorKind::InvalidHost("10.0.0.1".into())),
        ("bad_host:80", AddressErrorKind::InvalidHost("bad_host".into())),
        ("-lead.example:80", AddressErrorKind::InvalidHost("-lead.example".into())),
        ("double..dot:80", AddressErrorKind::InvalidHost("double..dot".into())),
        ("10.0.0.300:80", AddressErrorKind::InvalidHost("10.0.0.300".into())),
    ];
    for (input, kind) in cases {
        match parse_endpoint(input) {
            Ok(parsed) => panic!("{input:?} unexpectedly parsed as {parsed}"),
            Err(err) => {
                assert_eq!(err.kind, kind, "kind for {input:?}");
                assert_eq!(err.input, input);
            }
        }
    }
}

#[test]
fn overlong_hostname_is_rejected() {
    let label = "a".repeat(64);
    let err = parse_endpoint(&format!("{label}.example:22")).unwrap_err();
    assert!(matches!(err.kind, AddressErrorKind::InvalidHost(_)));
}

#[test]
fn error_message_names_the_input() {
    let err = parse_endpoint("db:99999").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("\"db:99999\""), "{message}");
    assert!(message.contains("0-65535"), "{message}");
}
