use leadintel::config::{ConfigError, ConfigLoader};
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    let keys: Vec<String> = env::vars()
        .map(|(key, _)| key)
        .filter(|key| key.starts_with("LEADINTEL_"))
        .collect();
    unsafe {
        for key in keys {
            env::remove_var(key);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

fn loader(dir: &TempDir) -> ConfigLoader {
    ConfigLoader::with_base_dir(PathBuf::from(dir.path()))
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    let cfg = loader(&temp_dir).load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.scheduler.default_interval_minutes, 60);
    assert_eq!(cfg.discovery.min_engagement_score, 60);
    assert!(cfg.discovery.enabled);
    assert_eq!(cfg.scoring.thresholds.hot, 80);
    assert!(cfg.providers.is_empty());
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "LEADINTEL_LOG_LEVEL=warn\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "LEADINTEL_LOG_LEVEL=debug\nLEADINTEL_DISCOVERY_POLL_INTERVAL_SECONDS=30\n",
    );
    write_env_file(&temp_dir, ".env.test.local", "LEADINTEL_LOG_LEVEL=trace\n");

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "LEADINTEL_PROFILE=test\nLEADINTEL_LOG_LEVEL=error\n",
    );

    let cfg = loader(&temp_dir)
        .load()
        .expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.log_level, "trace");
    assert_eq!(cfg.discovery.poll_interval_seconds, 30);
    clear_env();
}

#[test]
fn process_env_overrides_files() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "LEADINTEL_ADAPTER_TIMEOUT_MS=2500\nLEADINTEL_DISCOVERY_ENABLED=true\n",
    );
    unsafe {
        env::set_var("LEADINTEL_DISCOVERY_ENABLED", "false");
    }

    let cfg = loader(&temp_dir).load().unwrap();

    assert_eq!(cfg.adapter.timeout_ms, 2500);
    assert!(!cfg.discovery.enabled);
    clear_env();
}

#[test]
fn provider_settings_are_grouped_by_id() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "LEADINTEL_PROVIDER_CRM_API_BASE=https://crm.example.com\n\
         LEADINTEL_PROVIDER_CRM_API_KEY=secret-crm\n\
         LEADINTEL_PROVIDER_CRM_INTERVAL_MINUTES=15\n\
         LEADINTEL_PROVIDER_WEB_KIND=analytics\n",
    );

    let cfg = loader(&temp_dir).load().unwrap();

    let crm = &cfg.providers["crm"];
    assert_eq!(crm.get("api_base"), Some("https://crm.example.com"));
    assert_eq!(crm.get("api_key"), Some("secret-crm"));
    assert_eq!(crm.parse::<u32>("interval_minutes"), Some(15));
    assert_eq!(cfg.providers["web"].get("kind"), Some("analytics"));

    let redacted = cfg.redacted_json().unwrap();
    assert!(!redacted.contains("secret-crm"));
    assert!(redacted.contains("https://crm.example.com"));
    clear_env();
}

#[test]
fn rate_limit_overrides_and_scoring_settings_load() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "LEADINTEL_RATE_LIMIT_OVERRIDE_ADS_BASE_SECONDS=30\n\
         LEADINTEL_RATE_LIMIT_OVERRIDE_ADS_MAX_SECONDS=600\n\
         LEADINTEL_SCORING_HOT_THRESHOLD=85\n\
         LEADINTEL_SCORING_FIT_TIERS=1000:95,100:75\n",
    );

    let cfg = loader(&temp_dir).load().unwrap();

    let ads = &cfg.rate_limit_policy.provider_overrides["ads"];
    assert_eq!(ads.base_seconds, Some(30));
    assert_eq!(ads.max_seconds, Some(600));
    assert_eq!(ads.jitter_factor, None);
    assert_eq!(cfg.scoring.thresholds.hot, 85);
    assert_eq!(cfg.scoring.fit_tiers.len(), 2);
    assert_eq!(cfg.scoring.fit_tiers[0].score, 95);
    clear_env();
}

#[test]
fn invalid_settings_fail_validation() {
    let _guard = env_guard();

    let cases: [(&str, fn(&ConfigError) -> bool); 4] = [
        ("LEADINTEL_SCORING_WEIGHT_INTENT=0.9\n", |err| {
            matches!(err, ConfigError::InvalidScoring { .. })
        }),
        ("LEADINTEL_PROVIDER_CRM_INTERVAL_MINUTES=2\n", |err| {
            matches!(err, ConfigError::InvalidProviderInterval { .. })
        }),
        ("LEADINTEL_DISCOVERY_POLL_INTERVAL_SECONDS=0\n", |err| {
            matches!(err, ConfigError::InvalidDiscoveryPollInterval)
        }),
        ("LEADINTEL_SCORING_FIT_TIERS=lots:90\n", |err| {
            matches!(err, ConfigError::InvalidFitTier { .. })
        }),
    ];

    for (contents, expected) in cases {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        write_env_file(&temp_dir, ".env", contents);

        let err = loader(&temp_dir).load().unwrap_err();
        assert!(expected(&err), "unexpected error for {contents:?}: {err}");
    }
    clear_env();
}
