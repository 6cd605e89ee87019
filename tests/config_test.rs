use std::io::Write;
use std::time::Duration;

use imagegate::{Config, ErrorCategory, ImageGateway, Secrets};
use tempfile::NamedTempFile;

fn write_temp(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn load_full_config_from_file() {
    let file = write_temp(
        r#"
        [rate_limit]
        capacity = 5
        window_secs = 30
        sweep_interval_secs = 120

        [retry]
        max_attempts = 3

        [dedup]
        max_entries = 50

        [generation]
        default_num_images = 2
        per_call_timeout_secs = 45
        max_prompt_len = 500

        [provider]
        endpoint = "https://images.example.com/v1/generate"
        timeout_secs = 90
        "#,
    );

    let config = Config::load(Some(file.path())).unwrap();
    let rate_limit = config.rate_limit.to_config();
    assert_eq!(rate_limit.capacity, 5);
    assert_eq!(rate_limit.window, Duration::from_secs(30));
    assert_eq!(config.rate_limit.sweep_interval(), Duration::from_secs(120));
    assert_eq!(config.retry.to_config().max_attempts, 3);
    assert_eq!(config.dedup.to_config().max_entries, 50);

    let generation = config.generation.to_config();
    assert_eq!(generation.default_num_images, 2);
    assert_eq!(generation.per_call_timeout, Duration::from_secs(45));
    assert_eq!(generation.max_prompt_len, 500);
    assert_eq!(config.provider.timeout_secs, Some(90));
}

#[test]
fn malformed_config_is_configuration_error() {
    let file = write_temp("[rate_limit]\ncapacity = \"lots\"\n");
    let err = Config::load(Some(file.path())).unwrap_err();
    assert_eq!(err.category(), Some(ErrorCategory::Configuration));
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[cfg(unix)]
#[test]
fn secrets_with_open_permissions_are_rejected() {
    use std::os::unix::fs::PermissionsExt;

    let file = write_temp("[provider]\napi_key = \"sk-test\"\n");
    std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644)).unwrap();

    let err = Secrets::load_from_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("insecure permissions"));
}

#[cfg(unix)]
#[test]
fn secrets_with_private_permissions_load() {
    use std::os::unix::fs::PermissionsExt;

    let file = write_temp("[provider]\napi_key = \"sk-test\"\n");
    std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600)).unwrap();

    let secrets = Secrets::load_from_file(file.path()).unwrap();
    assert_eq!(secrets.api_key().as_deref(), Some("sk-test"));
}

#[cfg(feature = "http")]
#[test]
fn gateway_from_config_requires_endpoint() {
    let err = ImageGateway::from_config(&Config::default(), &Secrets::default())
        .err()
        .unwrap();
    assert_eq!(err.category(), Some(ErrorCategory::Configuration));
}

#[cfg(feature = "http")]
#[test]
fn gateway_from_config_applies_settings() {
    let file = write_temp(
        r#"
        [rate_limit]
        capacity = 1
        sweep_interval_secs = 15

        [generation]
        default_num_images = 3

        [provider]
        endpoint = "http://127.0.0.1:9/v1/generate"
        "#,
    );
    let config = Config::load(Some(file.path())).unwrap();
    let gateway = ImageGateway::from_config(&config, &Secrets::default()).unwrap();

    assert_eq!(gateway.generation_config().default_num_images, 3);
    assert_eq!(gateway.sweep_interval(), Duration::from_secs(15));
    assert!(gateway.check_rate_limit("a").allowed);
    assert!(!gateway.check_rate_limit("a").allowed);
}

#[cfg(feature = "http")]
#[test]
fn zero_default_image_count_is_configuration_error() {
    let file = write_temp(
        r#"
        [generation]
        default_num_images = 0

        [provider]
        endpoint = "http://127.0.0.1:9/v1/generate"
        "#,
    );
    let config = Config::load(Some(file.path())).unwrap();
    let err = ImageGateway::from_config(&config, &Secrets::default())
        .err()
        .unwrap();
    assert_eq!(err.category(), Some(ErrorCategory::Configuration));
    assert!(err.to_string().contains("default_num_images"));
}
