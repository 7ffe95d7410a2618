use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged runtime configuration.
///
/// Merge order (after DB connection): CLI > ENV > DB, then persisted back to DB.
/// Held by the process behind an `ArcSwap` so readers never block a reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Stored as a hash, never plaintext.
    pub admin_key_hash: String,
    /// Default outbound proxy for upstream egress, used when an account has none bound.
    pub proxy: Option<String>,
    pub dsn: String,
    pub event_redact_sensitive: bool,

    /// §4.1 session cache defaults, both overridable at runtime.
    pub session_ttl_secs: u64,
    pub session_renewal_threshold_secs: u64,
    /// §3 unavailable-mark default TTL.
    pub unavailable_mark_ttl_secs: u64,
    /// §4.1 concurrency defaults when an Account/User record leaves the field unset.
    pub default_account_concurrency: u32,
    pub default_user_concurrency: u32,

    /// §4.5 retry engine.
    pub retry_max_attempts: u32,

    /// §4.9 health-check service.
    pub health_normal_interval_secs: u64,
    pub health_problem_interval_secs: u64,
    pub health_max_parallel_probes: u32,
    pub health_consecutive_error_threshold: u32,
    pub health_rate_limit_reset_secs: u64,
    pub health_backoff_factor: f64,
    pub health_backoff_max_secs: u64,
    pub health_suspended_confirm_threshold: u32,
    pub health_banned_probe_interval_secs: u64,
    pub oauth_refresh_cooldown_secs: u64,
    pub oauth_auto_refresh_enabled: bool,

    /// §4.8 client filter.
    pub client_filter_enabled: bool,
    pub client_filter_strict_claude_code: bool,
    pub client_filter_dice_threshold: f64,
    pub client_filter_default_allow_unknown: bool,

    /// §4.6 stream forwarder tail size.
    pub stream_tail_bytes: usize,

    /// §9 Open Question: precedence between per-minute key rate limiting and
    /// per-user concurrency under mixed pressure. `true` = rate-limit first.
    pub rate_limit_before_concurrency: bool,

    /// §9 Open Question: whether the Responses route rewrites `instructions`
    /// for non-Codex callers with the built-in Codex prompt.
    pub codex_instructions_rewrite: bool,
}

/// Optional layer used for merging global config from CLI/env/DB sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub admin_key_hash: Option<String>,
    pub proxy: Option<String>,
    pub dsn: Option<String>,
    pub event_redact_sensitive: Option<bool>,
    pub session_ttl_secs: Option<u64>,
    pub session_renewal_threshold_secs: Option<u64>,
    pub unavailable_mark_ttl_secs: Option<u64>,
    pub default_account_concurrency: Option<u32>,
    pub default_user_concurrency: Option<u32>,
    pub retry_max_attempts: Option<u32>,
    pub health_normal_interval_secs: Option<u64>,
    pub health_problem_interval_secs: Option<u64>,
    pub health_max_parallel_probes: Option<u32>,
    pub health_consecutive_error_threshold: Option<u32>,
    pub health_rate_limit_reset_secs: Option<u64>,
    pub health_backoff_factor: Option<f64>,
    pub health_backoff_max_secs: Option<u64>,
    pub health_suspended_confirm_threshold: Option<u32>,
    pub health_banned_probe_interval_secs: Option<u64>,
    pub oauth_refresh_cooldown_secs: Option<u64>,
    pub oauth_auto_refresh_enabled: Option<bool>,
    pub client_filter_enabled: Option<bool>,
    pub client_filter_strict_claude_code: Option<bool>,
    pub client_filter_dice_threshold: Option<f64>,
    pub client_filter_default_allow_unknown: Option<bool>,
    pub stream_tail_bytes: Option<usize>,
    pub rate_limit_before_concurrency: Option<bool>,
    pub codex_instructions_rewrite: Option<bool>,
}

macro_rules! overlay_field {
    ($self:ident, $other:ident, $($field:ident),+ $(,)?) => {
        $(
            if $other.$field.is_some() {
                $self.$field = $other.$field;
            }
        )+
    };
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        overlay_field!(
            self,
            other,
            host,
            port,
            admin_key_hash,
            proxy,
            dsn,
            event_redact_sensitive,
            session_ttl_secs,
            session_renewal_threshold_secs,
            unavailable_mark_ttl_secs,
            default_account_concurrency,
            default_user_concurrency,
            retry_max_attempts,
            health_normal_interval_secs,
            health_problem_interval_secs,
            health_max_parallel_probes,
            health_consecutive_error_threshold,
            health_rate_limit_reset_secs,
            health_backoff_factor,
            health_backoff_max_secs,
            health_suspended_confirm_threshold,
            health_banned_probe_interval_secs,
            oauth_refresh_cooldown_secs,
            oauth_auto_refresh_enabled,
            client_filter_enabled,
            client_filter_strict_claude_code,
            client_filter_dice_threshold,
            client_filter_default_allow_unknown,
            stream_tail_bytes,
            rate_limit_before_concurrency,
            codex_instructions_rewrite,
        );
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8787),
            admin_key_hash: self
                .admin_key_hash
                .ok_or(GlobalConfigError::MissingField("admin_key_hash"))?,
            proxy: self.proxy,
            dsn: self.dsn.ok_or(GlobalConfigError::MissingField("dsn"))?,
            event_redact_sensitive: self.event_redact_sensitive.unwrap_or(true),
            session_ttl_secs: self.session_ttl_secs.unwrap_or(60 * 60),
            session_renewal_threshold_secs: self
                .session_renewal_threshold_secs
                .unwrap_or(14 * 60),
            unavailable_mark_ttl_secs: self.unavailable_mark_ttl_secs.unwrap_or(5 * 60),
            default_account_concurrency: self.default_account_concurrency.unwrap_or(5),
            default_user_concurrency: self.default_user_concurrency.unwrap_or(10),
            retry_max_attempts: self.retry_max_attempts.unwrap_or(3),
            health_normal_interval_secs: self.health_normal_interval_secs.unwrap_or(5 * 60),
            health_problem_interval_secs: self.health_problem_interval_secs.unwrap_or(60),
            health_max_parallel_probes: self.health_max_parallel_probes.unwrap_or(5),
            health_consecutive_error_threshold: self
                .health_consecutive_error_threshold
                .unwrap_or(5),
            health_rate_limit_reset_secs: self.health_rate_limit_reset_secs.unwrap_or(30 * 60),
            health_backoff_factor: self.health_backoff_factor.unwrap_or(1.5),
            health_backoff_max_secs: self.health_backoff_max_secs.unwrap_or(30 * 60),
            health_suspended_confirm_threshold: self
                .health_suspended_confirm_threshold
                .unwrap_or(3),
            health_banned_probe_interval_secs: self
                .health_banned_probe_interval_secs
                .unwrap_or(60 * 60),
            oauth_refresh_cooldown_secs: self.oauth_refresh_cooldown_secs.unwrap_or(30 * 60),
            oauth_auto_refresh_enabled: self.oauth_auto_refresh_enabled.unwrap_or(true),
            client_filter_enabled: self.client_filter_enabled.unwrap_or(true),
            client_filter_strict_claude_code: self
                .client_filter_strict_claude_code
                .unwrap_or(false),
            client_filter_dice_threshold: self.client_filter_dice_threshold.unwrap_or(0.7),
            client_filter_default_allow_unknown: self
                .client_filter_default_allow_unknown
                .unwrap_or(true),
            stream_tail_bytes: self.stream_tail_bytes.unwrap_or(2048),
            rate_limit_before_concurrency: self.rate_limit_before_concurrency.unwrap_or(true),
            codex_instructions_rewrite: self.codex_instructions_rewrite.unwrap_or(true),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            admin_key_hash: Some(value.admin_key_hash),
            proxy: value.proxy,
            dsn: Some(value.dsn),
            event_redact_sensitive: Some(value.event_redact_sensitive),
            session_ttl_secs: Some(value.session_ttl_secs),
            session_renewal_threshold_secs: Some(value.session_renewal_threshold_secs),
            unavailable_mark_ttl_secs: Some(value.unavailable_mark_ttl_secs),
            default_account_concurrency: Some(value.default_account_concurrency),
            default_user_concurrency: Some(value.default_user_concurrency),
            retry_max_attempts: Some(value.retry_max_attempts),
            health_normal_interval_secs: Some(value.health_normal_interval_secs),
            health_problem_interval_secs: Some(value.health_problem_interval_secs),
            health_max_parallel_probes: Some(value.health_max_parallel_probes),
            health_consecutive_error_threshold: Some(value.health_consecutive_error_threshold),
            health_rate_limit_reset_secs: Some(value.health_rate_limit_reset_secs),
            health_backoff_factor: Some(value.health_backoff_factor),
            health_backoff_max_secs: Some(value.health_backoff_max_secs),
            health_suspended_confirm_threshold: Some(value.health_suspended_confirm_threshold),
            health_banned_probe_interval_secs: Some(value.health_banned_probe_interval_secs),
            oauth_refresh_cooldown_secs: Some(value.oauth_refresh_cooldown_secs),
            oauth_auto_refresh_enabled: Some(value.oauth_auto_refresh_enabled),
            client_filter_enabled: Some(value.client_filter_enabled),
            client_filter_strict_claude_code: Some(value.client_filter_strict_claude_code),
            client_filter_dice_threshold: Some(value.client_filter_dice_threshold),
            client_filter_default_allow_unknown: Some(value.client_filter_default_allow_unknown),
            stream_tail_bytes: Some(value.stream_tail_bytes),
            rate_limit_before_concurrency: Some(value.rate_limit_before_concurrency),
            codex_instructions_rewrite: Some(value.codex_instructions_rewrite),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_patch() -> GlobalConfigPatch {
        GlobalConfigPatch {
            admin_key_hash: Some("hash".to_string()),
            dsn: Some("sqlite://:memory:".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let patch = GlobalConfigPatch::default();
        assert!(matches!(
            patch.into_config(),
            Err(GlobalConfigError::MissingField("admin_key_hash"))
        ));
    }

    #[test]
    fn defaults_fill_unset_fields() {
        let config = base_patch().into_config().unwrap();
        assert_eq!(config.port, 8787);
        assert_eq!(config.default_account_concurrency, 5);
        assert_eq!(config.retry_max_attempts, 3);
    }

    #[test]
    fn overlay_prefers_incoming_values() {
        let mut merged = GlobalConfigPatch::from(base_patch().into_config().unwrap());
        merged.overlay(GlobalConfigPatch {
            port: Some(9000),
            ..Default::default()
        });
        let config = merged.into_config().unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.admin_key_hash, "hash");
    }
}
