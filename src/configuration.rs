use std::time::Duration;

use config::Config;
use config::ConfigError;
use secrecy::ExposeSecret;
use secrecy::Secret;
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_bool_from_anything;
use serde_aux::field_attributes::deserialize_number_from_string;
use sqlx::postgres::PgConnectOptions;
use sqlx::postgres::PgSslMode;

use crate::domain::AlertRecipient;

#[derive(Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub object_store: ObjectStoreSettings,
    pub email_client: EmailClientSettings,
    pub catchup: CatchupSettings,
    pub fanout: FanoutSettings,
}

#[derive(Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub base_url: String,
}

#[derive(Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub database_name: String,
    #[serde(deserialize_with = "deserialize_bool_from_anything")]
    pub require_ssl: bool,
}

impl DatabaseSettings {
    pub fn connection_without_db(&self) -> PgConnectOptions {
        let ssl_mode = match self.require_ssl {
            true => PgSslMode::Require,
            false => PgSslMode::Prefer,
        };
        PgConnectOptions::new()
            .host(&self.host)
            .username(&self.username)
            .password(self.password.expose_secret())
            .port(self.port)
            .ssl_mode(ssl_mode)
    }

    pub fn connection(&self) -> PgConnectOptions {
        self.connection_without_db().database(&self.database_name)
    }
}

/// Where the raw MIME blobs live. Credentials come from the ambient AWS
/// provider chain, not from this file.
#[derive(Deserialize, Clone)]
pub struct ObjectStoreSettings {
    pub bucket: String,
    /// Prepended when reconstructing a key from a bare message id
    #[serde(default)]
    pub key_prefix: String,
    pub region: String,
    /// S3-compatible stores (minio in tests) override the endpoint
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// The transactional-mail API used for operator alerts.
#[derive(Deserialize, Clone)]
pub struct EmailClientSettings {
    pub base_url: String,
    pub sender_email: String,
    pub authorization_token: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_milliseconds: u64,
}

impl EmailClientSettings {
    pub fn sender(&self) -> Result<AlertRecipient, String> {
        AlertRecipient::parse(self.sender_email.clone())
    }

    pub fn timeout(&self) -> Duration { Duration::from_millis(self.timeout_milliseconds) }
}

#[derive(Deserialize, Clone)]
pub struct CatchupSettings {
    /// Kill-switch: stops the scheduler without touching the deployment
    #[serde(default, deserialize_with = "deserialize_bool_from_anything")]
    pub disabled: bool,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_keys_per_run: i32,
    /// Restrict the listing to recently modified objects; 0 disables the
    /// restriction
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub only_last_hours: i64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub interval_seconds: u64,
}

impl CatchupSettings {
    pub fn max_keys(&self) -> i32 { self.max_keys_per_run.clamp(1, 100) }

    pub fn interval(&self) -> Duration { Duration::from_secs(self.interval_seconds.max(1)) }
}

#[derive(Deserialize, Clone)]
pub struct FanoutSettings {
    /// Operator address for delivery-timeout alerts; alerts are skipped when
    /// unset
    #[serde(default)]
    pub timeout_alert_email: Option<String>,
}

/// Layered configuration: `configuration/base.yaml`, then the
/// `APP_ENVIRONMENT` overlay (`local` by default), then `APP__`-prefixed
/// environment variables (`APP__CATCHUP__DISABLED=true`).
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let base_path = std::env::current_dir().expect("could not determine current directory");
    let cfg_dir = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(ConfigError::Message)?;

    let settings = Config::builder()
        .add_source(config::File::from(cfg_dir.join("base.yaml")))
        .add_source(config::File::from(cfg_dir.join(format!("{}.yaml", environment.as_str()))))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;
    settings.try_deserialize()
}

#[derive(Debug)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{other} is not a supported environment; use `local` or `production`"
            )),
        }
    }
}
