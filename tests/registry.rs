use chrono::{DateTime, Local, TimeDelta, TimeZone};
use model_gateway::config::GatewayConfig;
use model_gateway::credential::{
    CredentialRegistry, CredentialState, FailureEffect, NoEligibleReason, Outcome, ProviderFamily,
};
use model_gateway::retry::{FailureCategory, TransportKind};

const POOL: &str = r#"
    [[claude]]
    id = "backup"
    base_url = "https://backup.example.com"
    api_key = "sk-backup"
    priority = 2

    [[claude]]
    id = "primary"
    base_url = "https://primary.example.com"
    api_key = "sk-primary"
    priority = 1

    [[claude]]
    id = "twin"
    base_url = "https://twin.example.com"
    api_key = "sk-twin"
    priority = 2

    [[claude]]
    id = "office-hours"
    base_url = "https://office.example.com"
    api_key = "sk-office"
    priority = 0
    schedule = [{ days = ["mon", "tue", "wed", "thu", "fri"], start = "09:00", end = "18:00" }]

    [[codex]]
    id = "future"
    base_url = "https://codex.example.com"
    api_key = "sk-codex"
    activate_at = "2030-01-01T00:00:00+00:00"

    [health]
    error_threshold = 2
    cooldown_secs = 300
"#;

fn registry() -> CredentialRegistry {
    let config = GatewayConfig::parse(POOL).unwrap();
    config.validate().unwrap();
    CredentialRegistry::new(config.claude, config.codex, config.health.policy())
}

fn local(y: i32, m: u32, d: u32, h: u32) -> DateTime<Local> {
    Local.with_ymd_and_hms(y, m, d, h, 0, 0).single().unwrap()
}

fn ids(registry: &CredentialRegistry, now: DateTime<Local>) -> Vec<String> {
    registry
        .candidates_at(ProviderFamily::Claude, now)
        .iter()
        .map(|c| c.id().to_string())
        .collect()
}

#[test]
fn test_priority_order_with_stable_ties() {
    let registry = registry();
    // Monday 2025-01-06 10:00, inside office hours
    assert_eq!(
        ids(&registry, local(2025, 1, 6, 10)),
        vec!["office-hours", "primary", "backup", "twin"]
    );
    // Saturday: the scheduled credential drops out
    assert_eq!(ids(&registry, local(2025, 1, 11, 10)), vec!["primary", "backup", "twin"]);
}

#[test]
fn test_threshold_cooldown_and_recovery() {
    let registry = registry();
    let now = local(2025, 1, 11, 10);
    let failure = Outcome::Failure(FailureCategory::Status(503));

    assert_eq!(
        registry.report_outcome_at(ProviderFamily::Claude, "primary", failure, now),
        Some(FailureEffect::Counted(1))
    );
    let effect = registry.report_outcome_at(ProviderFamily::Claude, "primary", failure, now);
    assert_eq!(effect, Some(FailureEffect::CooldownEntered(now + TimeDelta::seconds(300))));
    assert_eq!(ids(&registry, now), vec!["backup", "twin"]);

    // failures while cooling neither count nor extend
    let later = now + TimeDelta::seconds(100);
    assert_eq!(
        registry.report_outcome_at(ProviderFamily::Claude, "primary", failure, later),
        Some(FailureEffect::IgnoredWhileCooling)
    );
    assert_eq!(
        registry.health(ProviderFamily::Claude, "primary").unwrap().cooldown_until,
        Some(now + TimeDelta::seconds(300))
    );

    // eligible again exactly at expiry, with a clean counter
    let expiry = now + TimeDelta::seconds(300);
    assert_eq!(ids(&registry, expiry), vec!["primary", "backup", "twin"]);
    assert_eq!(registry.health(ProviderFamily::Claude, "primary").unwrap().error_count, 0);
}

#[test]
fn test_success_resets_count_but_not_cooldown() {
    let registry = registry();
    let now = local(2025, 1, 11, 10);
    let failure = Outcome::Failure(FailureCategory::Transport(TransportKind::Connect));

    registry.report_outcome_at(ProviderFamily::Claude, "backup", failure, now);
    registry.report_outcome_at(ProviderFamily::Claude, "backup", Outcome::Success, now);
    assert_eq!(registry.health(ProviderFamily::Claude, "backup").unwrap().error_count, 0);

    registry.report_outcome_at(ProviderFamily::Claude, "backup", failure, now);
    registry.report_outcome_at(ProviderFamily::Claude, "backup", failure, now);
    registry.report_outcome_at(ProviderFamily::Claude, "backup", Outcome::Success, now);
    let health = registry.health(ProviderFamily::Claude, "backup").unwrap();
    assert_eq!(health.cooldown_until, Some(now + TimeDelta::seconds(300)));
    assert!(!ids(&registry, now).contains(&"backup".to_string()));
}

#[test]
fn test_pending_activation_reason() {
    let registry = registry();
    let now = local(2025, 1, 11, 10);
    let err = registry.select_at(ProviderFamily::Codex, now).unwrap_err();
    assert!(matches!(err, NoEligibleReason::AwaitingActivation { .. }));
    assert!(err.to_string().contains("billing activation"));

    let after = local(2030, 1, 2, 12);
    assert_eq!(registry.candidates_at(ProviderFamily::Codex, after).len(), 1);
}

#[test]
fn test_status_rows_cover_every_credential() {
    let registry = registry();
    let now = local(2025, 1, 11, 10);
    registry.report_outcome_at(
        ProviderFamily::Claude,
        "twin",
        Outcome::Failure(FailureCategory::Status(401)),
        now,
    );

    let rows = registry.statuses_at(now);
    assert_eq!(rows.len(), 5);
    let office = rows.iter().find(|r| r.id == "office-hours").unwrap();
    assert_eq!(office.state, CredentialState::ScheduleExcluded);
    let twin = rows.iter().find(|r| r.id == "twin").unwrap();
    assert_eq!(twin.error_count, 1);

    let json = serde_json::to_value(&rows).unwrap();
    assert_eq!(json[0]["state"], "schedule_excluded");
}

#[test]
fn test_disabled_credentials_are_never_selected() {
    let config = GatewayConfig::parse(
        r#"
        [[codex]]
        id = "off"
        base_url = "https://codex.example.com"
        api_key = "sk"
        enabled = false
        "#,
    )
    .unwrap();
    let registry = CredentialRegistry::new(config.claude, config.codex, config.health.policy());
    assert_eq!(
        registry.select_at(ProviderFamily::Codex, Local::now()).unwrap_err(),
        NoEligibleReason::AllDisabled
    );
}
