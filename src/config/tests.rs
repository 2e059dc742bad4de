//! Config module tests

use super::*;

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("TEST_VAR_SIMPLE", "hello");
    let result = substitute_env_vars("value = \"${TEST_VAR_SIMPLE}\"");
    assert_eq!(result, "value = \"hello\"");
    std::env::remove_var("TEST_VAR_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    // Unset var should use default
    std::env::remove_var("TEST_VAR_UNSET");
    let result = substitute_env_vars("value = \"${TEST_VAR_UNSET:-default_value}\"");
    assert_eq!(result, "value = \"default_value\"");

    // Set var should use env value
    std::env::set_var("TEST_VAR_SET", "env_value");
    let result = substitute_env_vars("value = \"${TEST_VAR_SET:-default_value}\"");
    assert_eq!(result, "value = \"env_value\"");
    std::env::remove_var("TEST_VAR_SET");
}

#[test]
fn test_substitute_env_vars_missing_no_default() {
    std::env::remove_var("TEST_VAR_MISSING");
    let result = substitute_env_vars("value = \"${TEST_VAR_MISSING}\"");
    assert_eq!(result, "value = \"\"");
}

#[test]
fn test_load_config_with_env_substitution() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("canmq_test_config.toml");

    std::env::set_var("TEST_BROKER_HOST", "10.1.2.3");

    let config_content = r#"
[broker]
host = "${TEST_BROKER_HOST}"
port = ${TEST_BROKER_PORT:-1884}
"#;

    std::fs::write(&config_path, config_content).unwrap();

    let config = Config::load(&config_path).unwrap();
    assert_eq!(config.broker.host, "10.1.2.3");
    assert_eq!(config.broker.port, 1884); // Uses default

    std::env::remove_var("TEST_BROKER_HOST");
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.can.interface, "can0");
    assert_eq!(config.broker.host, "localhost");
    assert_eq!(config.broker.port, 1883);
    assert_eq!(config.broker.keepalive, 20);
    assert!(config.gateway.read);
    assert!(config.gateway.write);
    assert_eq!(config.gateway.qos, 0);
    assert!(!config.gateway.retain);
    assert_eq!(
        config.gateway.suppression_capacity,
        crate::suppress::DEFAULT_CAPACITY
    );
}

#[test]
fn test_parse_minimal_config() {
    let toml = r#"
[can]
interface = "vcan0"
"#;

    let config = Config::parse(toml).unwrap();
    assert_eq!(config.can.interface, "vcan0");
    assert_eq!(config.broker.port, 1883);
}

#[test]
fn test_parse_full_config() {
    let toml = r#"
[log]
level = "debug"

[can]
interface = "can1"

[broker]
host = "broker.local"
port = 8883
username = "gw"
password = "secret"
client_id = "canmq-lab"
keepalive = 10
reconnect_interval = 2
max_reconnect_interval = 30

[gateway]
topic_prefix = "plant/line4/can1"
read = true
write = false
qos = 1
retain = false
suppression_capacity = 64
"#;

    let config = Config::parse(toml).unwrap();
    assert_eq!(config.log.level, "debug");
    assert_eq!(config.can.interface, "can1");
    assert_eq!(config.broker.host, "broker.local");
    assert_eq!(config.broker.username.as_deref(), Some("gw"));
    assert_eq!(config.broker.effective_client_id(), "canmq-lab");
    assert_eq!(config.topic_prefix(), "plant/line4/can1");
    assert!(!config.gateway.write);
    assert_eq!(config.gateway.qos, 1);
    assert_eq!(config.gateway.suppression_capacity, 64);
}

#[test]
fn test_default_client_id_uses_pid() {
    let config = Config::default();
    assert_eq!(
        config.broker.effective_client_id(),
        format!("canmq-{}", std::process::id())
    );
}

#[test]
fn test_default_topic_prefix_is_host_and_interface() {
    let config = Config::default();
    let prefix = config.topic_prefix();
    assert!(prefix.starts_with("can/"));
    assert!(prefix.ends_with("/can0"));
    // Hostname segment is lowercased
    assert_eq!(prefix, prefix.to_lowercase());
}

#[test]
fn test_validation_rejects_qos_2() {
    let toml = r#"
[gateway]
qos = 2
"#;

    assert!(matches!(
        Config::parse(toml),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_validation_rejects_zero_capacity() {
    let toml = r#"
[gateway]
suppression_capacity = 0
"#;

    assert!(matches!(
        Config::parse(toml),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_validation_rejects_both_directions_disabled() {
    let toml = r#"
[gateway]
read = false
write = false
"#;

    assert!(matches!(
        Config::parse(toml),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_validation_rejects_empty_interface() {
    let toml = r#"
[can]
interface = ""
"#;

    assert!(matches!(
        Config::parse(toml),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_validation_rejects_trailing_slash_prefix() {
    let toml = r#"
[gateway]
topic_prefix = "can/host/can0/"
"#;

    assert!(matches!(
        Config::parse(toml),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let config = Config::load("/nonexistent/canmq.toml").unwrap();
    assert_eq!(config.can.interface, "can0");
    assert_eq!(config.broker.port, 1883);
}

#[test]
fn test_broker_durations() {
    let config = Config::default();
    assert_eq!(
        config.broker.reconnect_interval_duration(),
        std::time::Duration::from_secs(5)
    );
    assert_eq!(
        config.broker.max_reconnect_interval_duration(),
        std::time::Duration::from_secs(60)
    );
    assert_eq!(
        config.broker.connect_timeout_duration(),
        std::time::Duration::from_secs(30)
    );
}
