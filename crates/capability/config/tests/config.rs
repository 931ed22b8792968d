use agent_config::{AcquisitionMode, AppConfig, ConfigError};
use std::sync::Mutex;

// 环境变量为进程级共享状态，串行执行。
static ENV_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn load_config_from_env() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::set_var("AGENT_DEVICE_CONFIG", "/etc/agent/device.json");
        std::env::set_var("AGENT_MODE", "subscribe");
        std::env::set_var("AGENT_POLL_INTERVAL_MS", "2500");
        std::env::set_var("AGENT_OPCUA_USERNAME", "operator");
        std::env::remove_var("AGENT_OPCUA_PASSWORD");
    }

    let config = AppConfig::from_env().expect("config");
    assert_eq!(config.device_config.to_str(), Some("/etc/agent/device.json"));
    assert_eq!(config.mode, AcquisitionMode::Subscribe);
    assert_eq!(config.poll_interval_ms, 2500);
    assert_eq!(config.opcua_username.as_deref(), Some("operator"));
    assert!(config.opcua_password.is_none());
}

#[test]
fn rejects_unknown_mode() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    unsafe {
        std::env::set_var("AGENT_DEVICE_CONFIG", "/etc/agent/device.json");
        std::env::set_var("AGENT_MODE", "push");
        std::env::remove_var("AGENT_POLL_INTERVAL_MS");
    }

    let err = AppConfig::from_env().expect_err("invalid mode");
    assert!(matches!(err, ConfigError::Invalid(key, value) if key == "AGENT_MODE" && value == "push"));

    unsafe {
        std::env::remove_var("AGENT_MODE");
    }
}
