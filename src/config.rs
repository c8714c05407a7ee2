//! Runtime configuration, loaded from environment variables.

use crate::core::domain::{
    error::{SyncResult, ValidationError},
    value_object::InterfaceBlacklist,
};
use crate::core::infrastructure::worker_pool::default_parallelism;
use std::time::Duration;
use url::Url;

pub const DEFAULT_PVE_PORT: u16 = 8006;
pub const DEFAULT_HYPERVISOR_DEVICE_TYPE: &str = "proxmox-ve";
pub const DEFAULT_EXTERNAL_FIELD_SLUG: &str = "external";
pub const DEFAULT_GUEST_COMMAND_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_GUEST_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Token-bucket settings applied to outgoing API requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst_size: u32,
}

/// Connection settings of the Proxmox VE API (token authentication).
#[derive(Debug, Clone)]
pub struct PveConnectionConfig {
    pub host: String,
    pub port: u16,
    /// User including realm, e.g. `sync@pve`.
    pub user: String,
    pub token_name: String,
    pub token_value: String,
    pub verify_ssl: bool,
}

impl PveConnectionConfig {
    /// Base URL of the JSON API, ending in `/api2/json/`.
    pub fn base_url(&self) -> Result<Url, ValidationError> {
        let raw = format!("https://{}:{}/api2/json/", self.host, self.port);
        Url::parse(&raw)
            .map_err(|e| ValidationError::field("PVE_HOST", format!("Invalid host: {e}")))
    }

    /// Value of the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!(
            "PVEAPIToken={}!{}={}",
            self.user, self.token_name, self.token_value
        )
    }
}

/// Connection settings of the NetBox API.
#[derive(Debug, Clone)]
pub struct NetboxConnectionConfig {
    /// NetBox root URL, e.g. `https://netbox.example.com`.
    pub url: Url,
    pub token: String,
}

impl NetboxConnectionConfig {
    /// Base URL of the REST API, ending in `/api/`.
    pub fn api_url(&self) -> Result<Url, ValidationError> {
        let mut base = self.url.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        base.join("api/")
            .map_err(|e| ValidationError::field("NETBOX_HOST", format!("Invalid URL: {e}")))
    }
}

/// Settings of the reconciliation engine itself.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Device type slug identifying hypervisor nodes in the inventory.
    pub hypervisor_device_type: String,
    /// Slug of the boolean custom field marking externally managed records.
    pub external_field_slug: String,
    pub interface_blacklist: InterfaceBlacklist,
    pub guest_command_timeout: Duration,
    pub guest_poll_interval: Duration,
    pub max_parallelism: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            hypervisor_device_type: DEFAULT_HYPERVISOR_DEVICE_TYPE.to_string(),
            external_field_slug: DEFAULT_EXTERNAL_FIELD_SLUG.to_string(),
            interface_blacklist: InterfaceBlacklist::default(),
            guest_command_timeout: DEFAULT_GUEST_COMMAND_TIMEOUT,
            guest_poll_interval: DEFAULT_GUEST_POLL_INTERVAL,
            max_parallelism: default_parallelism(),
        }
    }
}

/// Complete configuration of one sync run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub pve: PveConnectionConfig,
    pub netbox: NetboxConnectionConfig,
    pub settings: SyncSettings,
    pub rate_limit: Option<RateLimitConfig>,
}

impl SyncConfig {
    /// Loads the configuration from the process environment, reading a
    /// `.env` file first if one exists.
    pub fn from_env() -> SyncResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> SyncResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let pve = PveConnectionConfig {
            host: vars.required("PVE_HOST")?,
            port: validate_port(vars.parsed("PVE_PORT")?.unwrap_or(DEFAULT_PVE_PORT))?,
            user: vars.required("PVE_USER")?,
            token_name: vars.required("PVE_TOKEN_NAME")?,
            token_value: vars.required("PVE_TOKEN_VALUE")?,
            verify_ssl: vars.flag("PVE_VERIFY_SSL")?.unwrap_or(false),
        };
        pve.base_url()?;

        let netbox = NetboxConnectionConfig {
            url: parse_netbox_url(&vars.required("NETBOX_HOST")?)?,
            token: vars.required("NETBOX_TOKEN")?,
        };

        let interface_blacklist = match vars.optional("INTERFACES_BLACKLIST") {
            Some(raw) => InterfaceBlacklist::new(raw.split(',').filter(|p| !p.trim().is_empty()))?,
            None => InterfaceBlacklist::default(),
        };

        let defaults = SyncSettings::default();
        let settings = SyncSettings {
            hypervisor_device_type: vars
                .optional("HYPERVISOR_DEVICE_TYPE")
                .unwrap_or(defaults.hypervisor_device_type),
            external_field_slug: vars
                .optional("EXTERNAL_FIELD_SLUG")
                .unwrap_or(defaults.external_field_slug),
            interface_blacklist,
            guest_command_timeout: vars
                .parsed("GUEST_COMMAND_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.guest_command_timeout),
            guest_poll_interval: vars
                .parsed("GUEST_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.guest_poll_interval),
            max_parallelism: validate_parallelism(
                vars.parsed("SYNC_MAX_PARALLELISM")?
                    .unwrap_or(defaults.max_parallelism),
            )?,
        };

        let rate_limit = match (
            vars.parsed::<u32>("API_RATE_LIMIT_RPS")?,
            vars.parsed::<u32>("API_RATE_LIMIT_BURST")?,
        ) {
            (Some(rps), burst) => Some(validate_rate_limit(RateLimitConfig {
                requests_per_second: rps,
                burst_size: burst.unwrap_or(rps),
            })?),
            (None, _) => None,
        };

        Ok(Self {
            pve,
            netbox,
            settings,
            rate_limit,
        })
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ValidationError> {
        self.optional(key)
            .ok_or_else(|| ValidationError::field(key, "Variable is required"))
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, ValidationError>
    where
        T::Err: std::fmt::Display,
    {
        self.optional(key)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|e| ValidationError::field(key, format!("Cannot parse '{raw}': {e}")))
            })
            .transpose()
    }

    fn flag(&self, key: &str) -> Result<Option<bool>, ValidationError> {
        self.optional(key)
            .map(|raw| match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ValidationError::field(key, format!("'{raw}' is not a boolean"))),
            })
            .transpose()
    }
}

/// Validates a port number.
pub(crate) fn validate_port(port: u16) -> Result<u16, ValidationError> {
    if port == 0 {
        return Err(ValidationError::field("PVE_PORT", "Port cannot be 0"));
    }
    Ok(port)
}

fn validate_parallelism(value: usize) -> Result<usize, ValidationError> {
    if value == 0 {
        return Err(ValidationError::field(
            "SYNC_MAX_PARALLELISM",
            "Parallelism must be at least 1",
        ));
    }
    Ok(value)
}

fn validate_rate_limit(config: RateLimitConfig) -> Result<RateLimitConfig, ValidationError> {
    if config.requests_per_second == 0 || config.burst_size == 0 {
        return Err(ValidationError::field(
            "API_RATE_LIMIT_RPS",
            "Rate and burst must be greater than 0",
        ));
    }
    Ok(config)
}

fn parse_netbox_url(raw: &str) -> Result<Url, ValidationError> {
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let url = Url::parse(&with_scheme)
        .map_err(|e| ValidationError::field("NETBOX_HOST", format!("Invalid URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::Format(format!(
            "NETBOX_HOST must use http or https, got '{}'",
            url.scheme()
        )));
    }
    Ok(url)
}
