use std::time::Duration;
use tempfile::TempDir;
use fastsync_peer::config::{self, Config, PeerConfig};

#[test]
fn test_defaults() {
    let cfg = PeerConfig::default();
    assert_eq!(cfg.timeout(), Duration::from_secs(15));
    assert_eq!(cfg.min_recv_rate, 7_680);
    assert_eq!(cfg.sample_rate(), Duration::from_secs(1));
    assert_eq!(cfg.window_size(), Duration::from_secs(40));
}

#[test]
fn test_empty_file_uses_defaults() {
    let cfg = config::load_from_str("").expect("empty config is valid");
    assert_eq!(cfg.peer, PeerConfig::default());
    assert!(!cfg.metrics.enabled);
    assert_eq!(cfg.log.level, "info");
}

#[test]
fn test_partial_peer_section() {
    let cfg = config::load_from_str("[peer]\ntimeout_ms = 2\nmin_recv_rate = 100\n").unwrap();
    assert_eq!(cfg.peer.timeout(), Duration::from_millis(2));
    assert_eq!(cfg.peer.min_recv_rate, 100);
    assert_eq!(cfg.peer.window_size_ms, 40_000, "unset fields keep defaults");
}

#[test]
fn test_load_from_file_and_round_trip() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("config.toml");
    let mut original = Config::default();
    original.peer.sample_rate_ms = 250;
    original.metrics.enabled = true;
    std::fs::write(&path, config::to_toml(&original).unwrap()).unwrap();

    let loaded = config::load(&path).expect("load written config");
    assert_eq!(loaded.peer, original.peer);
    assert!(loaded.metrics.enabled);
    assert_eq!(loaded.metrics.bind, original.metrics.bind);
}

#[test]
fn test_errors_carry_context() {
    let err = config::load("/definitely/not/here.toml").unwrap_err();
    assert!(err.to_string().contains("couldn't read config file"));

    let err = config::load_from_str("[peer]\ntimeout_ms = \"soon\"").unwrap_err();
    assert!(err.to_string().contains("invalid TOML"));
}
