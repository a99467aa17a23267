//! Tests for server configuration validation.

use std::time::Duration;

use horizon_lattice_datagram::{
    DEFAULT_QUEUE_CAPACITY, DEFAULT_REQUEST_WORKERS, DatagramError, DatagramServer, NetworkFamily,
    PoolConfig, ServerConfig, StdBinder, VerbatimWriter, process_fn,
};

fn complete(network: &str) -> ServerConfig {
    ServerConfig::new(network, ":0")
        .binder(StdBinder)
        .request_handler(process_fn(|_request| Ok(None)))
        .response_handler(VerbatimWriter)
}

fn rejected_field(config: ServerConfig) -> &'static str {
    match DatagramServer::new("TEST", config) {
        Err(DatagramError::InvalidConfig { field, .. }) => field,
        Err(other) => panic!("expected InvalidConfig, got {other:?}"),
        Ok(_) => panic!("configuration was accepted"),
    }
}

#[test]
fn test_complete_config_accepted() {
    for network in ["udp", "udp4", "udp6"] {
        let server = DatagramServer::new("TEST", complete(network)).unwrap();
        assert_eq!(server.network().as_str(), network);
        assert_eq!(server.bind_address(), ":0");
    }
}

#[test]
fn test_missing_capabilities() {
    let no_binder = ServerConfig::new("udp4", ":0")
        .request_handler(process_fn(|_request| Ok(None)))
        .response_handler(VerbatimWriter);
    assert_eq!(rejected_field(no_binder), "binder");

    let no_request_handler = ServerConfig::new("udp4", ":0")
        .binder(StdBinder)
        .response_handler(VerbatimWriter);
    assert_eq!(rejected_field(no_request_handler), "request_handler");

    let no_response_handler = ServerConfig::new("udp4", ":0")
        .binder(StdBinder)
        .request_handler(process_fn(|_request| Ok(None)));
    assert_eq!(rejected_field(no_response_handler), "response_handler");
}

#[test]
fn test_unknown_network() {
    assert_eq!(rejected_field(complete("tcp")), "network");
    assert_eq!(rejected_field(complete("")), "network");
    assert_eq!(rejected_field(complete("UDP4")), "network");
}

#[test]
fn test_empty_name_rejected() {
    let err = DatagramServer::new("", complete("udp")).unwrap_err();
    assert!(matches!(err, DatagramError::InvalidConfig { field: "name", .. }));
}

#[test]
fn test_zero_pool_values_rejected() {
    let cases = [
        (PoolConfig::new().request_workers(0), "request_workers"),
        (PoolConfig::new().response_workers(0), "response_workers"),
        (PoolConfig::new().request_queue_capacity(0), "request_queue_capacity"),
        (PoolConfig::new().response_queue_capacity(0), "response_queue_capacity"),
        (PoolConfig::new().recv_buffer_size(0), "recv_buffer_size"),
        (
            PoolConfig::new().max_consecutive_read_errors(0),
            "max_consecutive_read_errors",
        ),
        (PoolConfig::new().poll_interval(Duration::ZERO), "poll_interval"),
        (PoolConfig::new().write_timeout(Duration::ZERO), "write_timeout"),
    ];

    for (pool, field) in cases {
        assert_eq!(rejected_field(complete("udp4").pool(pool)), field);
    }
}

#[test]
fn test_zero_grace_period_allowed() {
    let pool = PoolConfig::new().grace_period(Duration::ZERO);
    assert!(DatagramServer::new("TEST", complete("udp4").pool(pool)).is_ok());
}

#[test]
fn test_invalid_config_message() {
    let err = DatagramServer::new("TEST", complete("sctp")).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("network"), "{message}");
    assert!(message.contains("sctp"), "{message}");
}

#[test]
fn test_pool_config_serde() {
    let pool = PoolConfig::new()
        .request_workers(8)
        .write_timeout(Duration::from_millis(250));

    let json = serde_json::to_string(&pool).unwrap();
    let parsed: PoolConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, pool);

    // Missing fields fall back to defaults.
    let partial: PoolConfig = serde_json::from_str(r#"{"response_workers": 2}"#).unwrap();
    assert_eq!(partial.response_workers, 2);
    assert_eq!(partial.request_workers, DEFAULT_REQUEST_WORKERS);
    assert_eq!(partial.request_queue_capacity, DEFAULT_QUEUE_CAPACITY);
    assert_eq!(partial.write_timeout, None);
}

#[test]
fn test_network_family_serde() {
    assert_eq!(serde_json::to_string(&NetworkFamily::Udp6).unwrap(), "\"udp6\"");

    let family: NetworkFamily = serde_json::from_str("\"udp4\"").unwrap();
    assert_eq!(family, NetworkFamily::Udp4);

    assert!(serde_json::from_str::<NetworkFamily>("\"tcp\"").is_err());
}

#[test]
fn test_config_debug_hides_capabilities() {
    let output = format!("{:?}", complete("udp4"));
    assert!(output.contains("ServerConfig"));
    assert!(output.contains("binder: true"));
}
