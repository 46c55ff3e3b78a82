// crates/server/src/config.rs
//! Runtime configuration: command-line flags with environment fallbacks.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use crewdeck_observability::LogFormat;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 25;
pub const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";
const FALLBACK_ORIGIN: &str = "http://localhost:3000";

#[derive(Parser, Debug, Clone)]
#[command(name = "crewdeck")]
#[command(version)]
#[command(about = "Job lifecycle tracker with streaming progress for agent workflows")]
pub struct Config {
    /// Address to bind the HTTP server to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Maximum number of pending + running jobs before new ones are refused
    #[arg(long, env = "MAX_CONCURRENT_JOBS", default_value_t = DEFAULT_MAX_CONCURRENT_JOBS, value_parser = parse_max_jobs)]
    pub max_concurrent_jobs: usize,

    /// Pause between simulated workflow steps, in seconds
    #[arg(long = "step-delay", env = "SIMULATION_DELAY_SECONDS", default_value = "0.6", value_parser = parse_seconds)]
    pub step_delay: Duration,

    /// Hard limit on a single job's execution time, in seconds
    #[arg(long = "job-timeout", env = "JOB_TIMEOUT_SECONDS", default_value = "300", value_parser = parse_positive_seconds)]
    pub job_timeout: Duration,

    /// Comma-separated list of origins allowed to call the API ("*" for any)
    #[arg(long, env = "ALLOWED_ORIGINS", default_value = DEFAULT_ALLOWED_ORIGINS, value_parser = parse_origins)]
    pub allowed_origins: AllowedOrigins,

    /// Maximum length of any progress or error line, in characters
    #[arg(long = "sanitize-max-len", env = "SANITIZE_MAX_LENGTH", default_value_t = crewdeck_jobs::sanitize::DEFAULT_MAX_LEN)]
    pub sanitize_max_len: usize,

    /// Workflow used when a create request names none
    #[arg(long, env = "DEFAULT_WORKFLOW", default_value = "content")]
    pub default_workflow: String,

    /// Base URL of an external crew service; enables the `crew` workflow
    #[arg(long, env = "CREW_SERVICE_URL")]
    pub crew_service_url: Option<String>,

    /// Request timeout for the crew service, in seconds
    #[arg(long = "crew-service-timeout", env = "CREW_SERVICE_TIMEOUT_SECONDS", default_value = "60", value_parser = parse_positive_seconds)]
    pub crew_service_timeout: Duration,

    /// How long running jobs get to wind down on shutdown, in seconds
    #[arg(long = "shutdown-grace", env = "SHUTDOWN_GRACE_SECONDS", default_value = "10", value_parser = parse_seconds)]
    pub shutdown_grace: Duration,

    /// Log output format: compact or json
    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            step_delay: Duration::from_millis(600),
            job_timeout: Duration::from_secs(300),
            allowed_origins: AllowedOrigins::parse(DEFAULT_ALLOWED_ORIGINS),
            sanitize_max_len: crewdeck_jobs::sanitize::DEFAULT_MAX_LEN,
            default_workflow: "content".to_string(),
            crew_service_url: None,
            crew_service_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(10),
            log_format: LogFormat::Compact,
        }
    }
}

impl Config {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Origins the CORS layer lets through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    /// `*`: any origin, credentials disabled.
    Any,
    /// Normalized `scheme://authority` entries.
    List(Vec<String>),
}

impl AllowedOrigins {
    /// Parse a comma-separated origin list.
    ///
    /// Entries that are not `http(s)://host[:port]` are dropped; paths are
    /// stripped. An empty result falls back to the local dev frontend.
    pub fn parse(raw: &str) -> Self {
        let mut cleaned = Vec::new();
        for candidate in raw.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            if candidate == "*" {
                return AllowedOrigins::Any;
            }
            match normalize_origin(candidate) {
                Some(origin) => {
                    if !cleaned.contains(&origin) {
                        cleaned.push(origin);
                    }
                }
                None => tracing::warn!(origin = %candidate, "ignoring invalid allowed origin"),
            }
        }
        if cleaned.is_empty() {
            cleaned.push(FALLBACK_ORIGIN.to_string());
        }
        AllowedOrigins::List(cleaned)
    }
}

fn normalize_origin(candidate: &str) -> Option<String> {
    let (scheme, rest) = candidate.split_once("://")?;
    let scheme = scheme.to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return None;
    }
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let valid = !authority.is_empty()
        && !authority.contains('@')
        && authority
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'));
    valid.then(|| format!("{scheme}://{}", authority.to_ascii_lowercase()))
}

fn parse_origins(raw: &str) -> Result<AllowedOrigins, String> {
    Ok(AllowedOrigins::parse(raw))
}

fn parse_seconds(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("'{raw}' is not a number of seconds"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("'{raw}' must be a non-negative number of seconds"));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn parse_positive_seconds(raw: &str) -> Result<Duration, String> {
    let duration = parse_seconds(raw)?;
    if duration.is_zero() {
        return Err(format!("'{raw}' must be greater than zero"));
    }
    Ok(duration)
}

fn parse_max_jobs(raw: &str) -> Result<usize, String> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(format!("'{raw}' must be a whole number >= 1")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_origins_default_list() {
        assert_eq!(
            AllowedOrigins::parse(DEFAULT_ALLOWED_ORIGINS),
            AllowedOrigins::List(vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string()
            ])
        );
    }

    #[test]
    fn test_origins_wildcard_wins() {
        assert_eq!(
            AllowedOrigins::parse("http://a.test, *, http://b.test"),
            AllowedOrigins::Any
        );
    }

    #[test]
    fn test_origins_normalized_and_invalid_dropped() {
        assert_eq!(
            AllowedOrigins::parse("HTTPS://App.Example.com/dashboard?x=1, ftp://files.test, not a url, http://localhost:8080/"),
            AllowedOrigins::List(vec![
                "https://app.example.com".to_string(),
                "http://localhost:8080".to_string()
            ])
        );
    }

    #[test]
    fn test_origins_empty_falls_back() {
        let expected = AllowedOrigins::List(vec![FALLBACK_ORIGIN.to_string()]);
        assert_eq!(AllowedOrigins::parse(""), expected);
        assert_eq!(AllowedOrigins::parse(" , ,"), expected);
        assert_eq!(AllowedOrigins::parse("javascript:alert(1)"), expected);
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("0.6").unwrap(), Duration::from_millis(600));
        assert_eq!(parse_seconds("0").unwrap(), Duration::ZERO);
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("soon").is_err());
        assert!(parse_positive_seconds("0").is_err());
    }

    #[test]
    fn test_parse_max_jobs_rejects_zero() {
        assert_eq!(parse_max_jobs("3").unwrap(), 3);
        assert!(parse_max_jobs("0").is_err());
        assert!(parse_max_jobs("-2").is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = Config::try_parse_from([
            "crewdeck",
            "--port",
            "9001",
            "--max-concurrent-jobs",
            "2",
            "--step-delay",
            "0",
            "--allowed-origins",
            "*",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(config.port, 9001);
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.step_delay, Duration::ZERO);
        assert_eq!(config.allowed_origins, AllowedOrigins::Any);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_flag_value_is_rejected() {
        assert!(Config::try_parse_from(["crewdeck", "--max-concurrent-jobs", "0"]).is_err());
        assert!(Config::try_parse_from(["crewdeck", "--job-timeout", "0"]).is_err());
    }

    #[test]
    fn test_addr() {
        let config = Config {
            port: 1234,
            ..Config::default()
        };
        assert_eq!(config.addr().to_string(), "127.0.0.1:1234");
    }
}
