use std::time::Duration;

use validator::Validate;

use super::{RoundSettings, Settings};

#[test]
fn test_settings_new() {
    let settings = Settings::new("configs/config.toml").unwrap();
    assert!(settings.round.min_clients >= 1);
    assert!(settings.sites.data_dir.ends_with("test_data"));
    assert!(Settings::new("").is_err());
}

#[test]
fn test_round_defaults() {
    let round = RoundSettings::default();
    assert!(round.validate().is_ok());
    assert_eq!(round.grace_period(), Duration::from_secs(10));
    assert_eq!(round.timeout(), None);
    assert_eq!(round.poll_interval(), Duration::from_millis(500));
    assert!(!round.ignore_result_error);
}

#[test]
fn test_validate_round() {
    assert!(RoundSettings {
        min_clients: 0,
        ..RoundSettings::default()
    }
    .validate()
    .is_err());
    assert!(RoundSettings {
        poll_interval: 0,
        ..RoundSettings::default()
    }
    .validate_round()
    .is_err());
    assert!(RoundSettings {
        timeout: 1,
        poll_interval: 1_500,
        ..RoundSettings::default()
    }
    .validate_round()
    .is_err());

    let round = RoundSettings {
        timeout: 30,
        ..RoundSettings::default()
    };
    assert!(round.validate().is_ok());
    assert_eq!(round.timeout(), Some(Duration::from_secs(30)));
}
