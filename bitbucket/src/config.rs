use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.bitbucket.org/";

pub const USERNAME_ENV: &str = "BITBUCKET_USERNAME";
pub const PASSWORD_ENV: &str = "BITBUCKET_PASSWORD";
pub const BASE_URL_ENV: &str = "BITBUCKET_BASE_URL";

/// Shortest wait after create that outlasts Bitbucket's listing cache.
/// Both the fixed delay and the poll deadline must be at least this long.
pub const MIN_SETTLE: Duration = Duration::from_secs(5);

/// Basic-auth credentials (username plus app password).
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitbucketConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub credentials: Option<Credentials>,
    pub user_agent: String,
}

impl Default for BitbucketConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            credentials: None,
            user_agent: format!("bitbucket-provider/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl BitbucketConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `BITBUCKET_USERNAME`, `BITBUCKET_PASSWORD` and
    /// `BITBUCKET_BASE_URL` when they are set and non-empty.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(base_url) = non_empty_env(BASE_URL_ENV) {
            config.base_url = base_url;
        }

        if let Some(username) = non_empty_env(USERNAME_ENV) {
            let password = non_empty_env(PASSWORD_ENV).unwrap_or_default();
            config.credentials = Some(Credentials::new(username, password));
        }

        config
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("Base URL cannot be empty".to_string());
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err("Base URL must start with http:// or https://".to_string());
        }

        if self.timeout.is_zero() {
            return Err("Timeout must be greater than 0".to_string());
        }

        if let Some(credentials) = &self.credentials {
            if credentials.username.is_empty() {
                return Err("Username cannot be empty when credentials are set".to_string());
            }
        }

        Ok(())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// How unexpected HTTP statuses on read, update and delete are reported.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatusPolicy {
    /// Leave the record untouched and report success.
    #[default]
    Lenient,
    /// Fail with [`crate::ProviderError::UnexpectedStatus`].
    Strict,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyStrategy {
    /// Sleep for `settle_delay`, then read once.
    FixedDelay,
    /// Re-list until the created variable shows up or `deadline` passes.
    #[default]
    Poll,
}

/// Read-after-create settings.
///
/// Bitbucket serves variable listings from a cache, so a freshly created
/// variable can be missing from the collection for a few seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyConfig {
    pub strategy: ConsistencyStrategy,
    /// Wait used by [`ConsistencyStrategy::FixedDelay`]
    pub settle_delay: Duration,
    /// Upper bound on the total time spent polling
    pub deadline: Duration,
    /// Base delay for exponential backoff (in milliseconds)
    pub base_delay_ms: u64,
    /// Maximum delay for exponential backoff (in milliseconds)
    pub max_delay_ms: u64,
    /// Jitter factor for randomizing poll delays (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            strategy: ConsistencyStrategy::Poll,
            settle_delay: Duration::from_secs(5),
            deadline: Duration::from_secs(10),
            base_delay_ms: 250,
            max_delay_ms: 2000,
            jitter_factor: 0.1,
        }
    }
}

impl ConsistencyConfig {
    pub fn fixed_delay(settle_delay: Duration) -> Self {
        Self {
            strategy: ConsistencyStrategy::FixedDelay,
            settle_delay,
            ..Default::default()
        }
    }

    pub fn poll(deadline: Duration) -> Self {
        Self {
            strategy: ConsistencyStrategy::Poll,
            deadline,
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Calculate delay for poll attempt with exponential backoff and jitter
    pub fn calculate_retry_delay(&self, attempt: u32) -> Duration {
        let base_delay = Duration::from_millis(self.base_delay_ms);
        let exponential_delay = base_delay.saturating_mul(2_u32.saturating_pow(attempt));
        let max_delay = Duration::from_millis(self.max_delay_ms);

        let delay = exponential_delay.min(max_delay);

        if self.jitter_factor > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter = rng.gen_range(0.0..=self.jitter_factor);
            let jitter_ms = (delay.as_millis() as f64 * jitter) as u64;
            delay + Duration::from_millis(jitter_ms)
        } else {
            delay
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err("Jitter factor must be between 0.0 and 1.0".to_string());
        }

        if self.base_delay_ms > self.max_delay_ms {
            return Err("Base delay cannot exceed max delay".to_string());
        }

        match self.strategy {
            ConsistencyStrategy::FixedDelay if self.settle_delay < MIN_SETTLE => {
                return Err(format!(
                    "Settle delay {:?} is shorter than the {:?} minimum",
                    self.settle_delay, MIN_SETTLE
                ));
            }
            ConsistencyStrategy::Poll if self.deadline < MIN_SETTLE => {
                return Err(format!(
                    "Poll deadline {:?} is shorter than the {:?} minimum",
                    self.deadline, MIN_SETTLE
                ));
            }
            ConsistencyStrategy::Poll if self.base_delay_ms == 0 => {
                return Err("Poll base delay must be greater than 0".to_string());
            }
            _ => {}
        }

        Ok(())
    }
}

/// Behaviour of the deployment-variable resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub consistency: ConsistencyConfig,
    pub status_policy: StatusPolicy,
    /// Listing pages followed through `next` before giving up on a lookup
    pub max_pages: u32,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            consistency: ConsistencyConfig::default(),
            status_policy: StatusPolicy::Lenient,
            max_pages: 50,
        }
    }
}

impl ResourceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_consistency(mut self, consistency: ConsistencyConfig) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_status_policy(mut self, status_policy: StatusPolicy) -> Self {
        self.status_policy = status_policy;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_pages == 0 {
            return Err("Max pages must be greater than 0".to_string());
        }

        self.consistency.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        std::env::remove_var(USERNAME_ENV);
        std::env::remove_var(PASSWORD_ENV);
        std::env::remove_var(BASE_URL_ENV);
    }

    #[test]
    fn test_default_config() {
        let config = BitbucketConfig::default();
        assert_eq!(config.base_url, "https://api.bitbucket.org/");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.credentials.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = BitbucketConfig::new()
            .with_base_url("http://localhost:8080")
            .with_credentials("user", "pass")
            .with_timeout(Duration::from_secs(5));

        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(
            config.credentials,
            Some(Credentials::new("user", "pass"))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = BitbucketConfig::default();

        config.base_url = "".to_string();
        assert!(config.validate().is_err());

        config.base_url = "api.bitbucket.org".to_string();
        assert!(config.validate().is_err());

        config.base_url = DEFAULT_BASE_URL.to_string();
        config.timeout = Duration::from_secs(0);
        assert!(config.validate().is_err());

        config.timeout = Duration::from_secs(30);
        config.credentials = Some(Credentials::new("", "secret"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_password_is_not_leaked() {
        let config = BitbucketConfig::default().with_credentials("user", "hunter2");

        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        std::env::set_var(USERNAME_ENV, "ci-bot");
        std::env::set_var(PASSWORD_ENV, "app-password");
        std::env::set_var(BASE_URL_ENV, "http://bitbucket.internal/");

        let config = BitbucketConfig::from_env();
        clear_env();

        assert_eq!(config.base_url, "http://bitbucket.internal/");
        assert_eq!(
            config.credentials,
            Some(Credentials::new("ci-bot", "app-password"))
        );
    }

    #[test]
    #[serial]
    fn test_from_env_without_variables() {
        clear_env();
        std::env::set_var(USERNAME_ENV, "");

        let config = BitbucketConfig::from_env();
        clear_env();

        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(config.credentials.is_none());
    }

    #[test]
    fn test_retry_delay_without_jitter() {
        let config = ConsistencyConfig::default()
            .with_backoff(100, 1000)
            .with_jitter(0.0);

        assert_eq!(config.calculate_retry_delay(0), Duration::from_millis(100));
        assert_eq!(config.calculate_retry_delay(1), Duration::from_millis(200));
        assert_eq!(config.calculate_retry_delay(3), Duration::from_millis(800));
        assert_eq!(config.calculate_retry_delay(4), Duration::from_millis(1000));
        assert_eq!(config.calculate_retry_delay(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_retry_delay_jitter_bounds() {
        let config = ConsistencyConfig::default()
            .with_backoff(100, 1000)
            .with_jitter(0.5);

        for _ in 0..20 {
            let delay = config.calculate_retry_delay(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_consistency_constructors() {
        let fixed = ConsistencyConfig::fixed_delay(Duration::from_secs(5));
        assert_eq!(fixed.strategy, ConsistencyStrategy::FixedDelay);
        assert_eq!(fixed.settle_delay, Duration::from_secs(5));

        let poll = ConsistencyConfig::poll(Duration::from_secs(20));
        assert_eq!(poll.strategy, ConsistencyStrategy::Poll);
        assert_eq!(poll.deadline, Duration::from_secs(20));
    }

    #[test]
    fn test_resource_config_validation() {
        assert!(ResourceConfig::default().validate().is_ok());
        assert!(ResourceConfig::default().with_max_pages(0).validate().is_err());

        let bad_jitter = ConsistencyConfig::default().with_jitter(1.5);
        assert!(ResourceConfig::default()
            .with_consistency(bad_jitter)
            .validate()
            .is_err());

        let inverted = ConsistencyConfig::default().with_backoff(500, 100);
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_settle_floor() {
        assert!(ConsistencyConfig::poll(MIN_SETTLE).validate().is_ok());
        assert!(ConsistencyConfig::fixed_delay(MIN_SETTLE).validate().is_ok());

        let short_poll = ConsistencyConfig::poll(Duration::from_millis(100));
        let err = short_poll.validate().unwrap_err();
        assert!(err.contains("deadline"));

        let short_fixed = ConsistencyConfig::fixed_delay(Duration::from_millis(4999));
        assert!(short_fixed.validate().is_err());

        // Only the active strategy's wait is checked.
        let mut poll = ConsistencyConfig::poll(Duration::from_secs(30));
        poll.settle_delay = Duration::ZERO;
        assert!(poll.validate().is_ok());

        assert!(ResourceConfig::default()
            .with_consistency(short_poll)
            .validate()
            .is_err());
    }

    #[test]
    fn test_status_policy_serialization() {
        assert_eq!(
            serde_json::to_string(&StatusPolicy::Strict).unwrap(),
            "\"strict\""
        );
        assert_eq!(StatusPolicy::default(), StatusPolicy::Lenient);
    }
}
