use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub migration_dir: Option<String>,
    pub query_timeout: Duration,
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
}

/// How handlers treat a request whose token subject differs from the user id
/// it targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityPolicy {
    /// Reject with 403.
    Strict,
    /// Log the mismatch and carry on.
    Permissive,
}

impl std::str::FromStr for IdentityPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "permissive" => Ok(Self::Permissive),
            other => anyhow::bail!("unknown identity policy `{other}`"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromoConfig {
    pub code: String,
    pub bonus: i64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub identity_policy: IdentityPolicy,
    pub promo: PromoConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars<F>(var: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database = DatabaseConfig {
            url: var("DSN").context("DSN must be set")?,
            migration_dir: var("GOOSE_MIGRATION_DIR").filter(|d| !d.trim().is_empty()),
            query_timeout: Duration::from_millis(parse_or(&var, "DB_QUERY_TIMEOUT_MS", 3_000)?),
            connect_attempts: parse_or(&var, "DB_CONNECT_ATTEMPTS", 10)?,
            connect_backoff: Duration::from_millis(parse_or(&var, "DB_CONNECT_BACKOFF_MS", 1_000)?),
        };
        let jwt = JwtConfig {
            secret: var("SECRET_KEY").context("SECRET_KEY must be set")?,
            ttl_minutes: parse_or(&var, "ACCESS_TTL_MINUTES", 15)?,
            refresh_ttl_minutes: parse_or(&var, "REFRESH_TTL_MINUTES", 60 * 24 * 14)?,
        };
        let identity_policy = match var("IDENTITY_POLICY") {
            Some(v) => v.parse()?,
            None => IdentityPolicy::Permissive,
        };
        let promo = PromoConfig {
            code: var("PROMO_CODE").unwrap_or_else(|| "KUARHODRON".into()),
            bonus: parse_or(&var, "PROMO_BONUS", 10_000)?,
        };

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&var, "PORT", 8080)?,
            database,
            jwt,
            identity_policy,
            promo,
        })
    }
}

fn parse_or<F, T>(var: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key} value `{raw}`: {e}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_required_vars_set() {
        let cfg = AppConfig::from_vars(lookup(&[
            ("DSN", "postgres://localhost/rewards"),
            ("SECRET_KEY", "s3cret"),
        ]))
        .expect("config");

        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.jwt.ttl_minutes, 15);
        assert_eq!(cfg.database.query_timeout, Duration::from_secs(3));
        assert_eq!(cfg.database.connect_attempts, 10);
        assert!(cfg.database.migration_dir.is_none());
        assert_eq!(cfg.identity_policy, IdentityPolicy::Permissive);
        assert_eq!(cfg.promo.code, "KUARHODRON");
        assert_eq!(cfg.promo.bonus, 10_000);
    }

    #[test]
    fn missing_dsn_is_an_error() {
        let err = AppConfig::from_vars(lookup(&[("SECRET_KEY", "s3cret")])).unwrap_err();
        assert!(err.to_string().contains("DSN"));
    }

    #[test]
    fn missing_secret_is_an_error() {
        let err = AppConfig::from_vars(lookup(&[("DSN", "postgres://x")])).unwrap_err();
        assert!(err.to_string().contains("SECRET_KEY"));
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = AppConfig::from_vars(lookup(&[
            ("DSN", "postgres://x"),
            ("SECRET_KEY", "k"),
            ("PORT", "9000"),
            ("GOOSE_MIGRATION_DIR", "db/migrations"),
            ("IDENTITY_POLICY", "Strict"),
            ("PROMO_CODE", "WATER"),
            ("PROMO_BONUS", "42"),
        ]))
        .expect("config");

        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.database.migration_dir.as_deref(), Some("db/migrations"));
        assert_eq!(cfg.identity_policy, IdentityPolicy::Strict);
        assert_eq!(cfg.promo.code, "WATER");
        assert_eq!(cfg.promo.bonus, 42);
    }

    #[test]
    fn bad_port_is_rejected() {
        let err = AppConfig::from_vars(lookup(&[
            ("DSN", "postgres://x"),
            ("SECRET_KEY", "k"),
            ("PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn unknown_identity_policy_is_rejected() {
        assert!("lenient".parse::<IdentityPolicy>().is_err());
    }
}
