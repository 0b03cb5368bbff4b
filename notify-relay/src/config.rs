use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use notify_common::retry::RetryPolicy;
use url::Url;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,

    #[envconfig(from = "NVR_TYPE")]
    pub nvr_type: NvrSources,

    #[envconfig(from = "LINE_NOTIFY_TOKENS")]
    pub line_notify_tokens: TokenList,

    #[envconfig(
        from = "LINE_NOTIFY_API_URL",
        default = "https://notify-api.line.me/api/notify"
    )]
    pub line_notify_api_url: Url,

    /// Minimum seconds between two notifications for the same camera.
    #[envconfig(from = "SEND_INTERVAL", default = "1.5")]
    pub send_interval: IntervalSeconds,

    #[envconfig(from = "REQUEST_TIMEOUT_MS", default = "10000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(nested = true)]
    pub retry_policy: RetryPolicyConfig,

    #[envconfig(nested = true)]
    pub frigate: FrigateConfig,

    #[envconfig(nested = true)]
    pub mqtt: MqttConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Envconfig, Clone)]
pub struct RetryPolicyConfig {
    #[envconfig(from = "NOTIFY_MAX_RETRIES", default = "2")]
    pub max_retries: u32,

    #[envconfig(from = "NOTIFY_RETRY_BACKOFF_COEFFICIENT", default = "2")]
    pub backoff_coefficient: u32,

    #[envconfig(from = "NOTIFY_RETRY_INITIAL_INTERVAL_MS", default = "250")]
    pub initial_interval: EnvMsDuration,

    #[envconfig(from = "NOTIFY_RETRY_MAXIMUM_INTERVAL_MS", default = "2000")]
    pub maximum_interval: EnvMsDuration,
}

impl RetryPolicyConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            self.backoff_coefficient,
            self.initial_interval.0,
            Some(self.maximum_interval.0),
        )
    }
}

#[derive(Envconfig, Clone)]
pub struct FrigateConfig {
    #[envconfig(from = "FRIGATE_HOST", default = "localhost")]
    pub host: String,

    #[envconfig(from = "FRIGATE_PORT", default = "5000")]
    pub port: u16,
}

impl FrigateConfig {
    /// Root of the Frigate HTTP API, where event snapshots are served.
    pub fn api_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Envconfig, Clone)]
pub struct MqttConfig {
    #[envconfig(from = "MQTT_BROKER_ADDRESS", default = "localhost")]
    pub broker_address: String,

    #[envconfig(from = "MQTT_BROKER_PORT", default = "1883")]
    pub broker_port: u16,

    #[envconfig(from = "MQTT_USERNAME")]
    pub username: Option<String>,

    #[envconfig(from = "MQTT_PASSWORD")]
    pub password: Option<String>,

    #[envconfig(from = "MQTT_TOPIC", default = "frigate/events")]
    pub topic: String,

    #[envconfig(from = "MQTT_CLIENT_ID", default = "nvr-notify")]
    pub client_id: String,

    #[envconfig(from = "MQTT_KEEP_ALIVE_MS", default = "60000")]
    pub keep_alive: EnvMsDuration,

    #[envconfig(from = "MQTT_CONNECT_ATTEMPTS", default = "3")]
    pub connect_attempts: u32,

    #[envconfig(from = "MQTT_CONNECT_RETRY_DELAY_MS", default = "5000")]
    pub connect_retry_delay: EnvMsDuration,
}

impl MqttConfig {
    pub fn broker(&self) -> String {
        format!("{}:{}", self.broker_address, self.broker_port)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

/// A non-negative, finite number of seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalSeconds(pub f64);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseIntervalSecondsError;

impl FromStr for IntervalSeconds {
    type Err = ParseIntervalSecondsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().parse::<f64>() {
            Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Ok(IntervalSeconds(seconds)),
            _ => Err(ParseIntervalSecondsError),
        }
    }
}

/// Comma-separated notification tokens. Whitespace around tokens and empty
/// entries are ignored; at least one token is required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenList(pub Vec<String>);

#[derive(Debug, PartialEq, Eq)]
pub struct NoTokensError;

impl FromStr for TokenList {
    type Err = NoTokensError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<String> = s
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_owned)
            .collect();

        if tokens.is_empty() {
            Err(NoTokensError)
        } else {
            Ok(TokenList(tokens))
        }
    }
}

/// Which NVR integrations to run, e.g. `frigate`, `synology` or `frigate,synology`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NvrSources {
    pub frigate: bool,
    pub synology: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseNvrSourcesError {
    Unsupported(String),
    Empty,
}

impl FromStr for NvrSources {
    type Err = ParseNvrSourcesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut sources = NvrSources::default();

        for name in s.split(',').map(str::trim).filter(|name| !name.is_empty()) {
            match name.to_ascii_lowercase().as_str() {
                "frigate" => sources.frigate = true,
                "synology" => sources.synology = true,
                _ => return Err(ParseNvrSourcesError::Unsupported(name.to_owned())),
            }
        }

        if sources == NvrSources::default() {
            return Err(ParseNvrSourcesError::Empty);
        }

        Ok(sources)
    }
}
