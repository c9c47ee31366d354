//! Configuration module for finance-gateway.
//!
//! Every recognised option is a typed field with a default; the struct is
//! built once at start-up and shared read-only.

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::GatewayError;

pub const DEFAULT_GATEWAY_ID: &str = "divido-finance";
pub const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub common: core_config::Config,
    pub service_name: String,
    pub gateway: GatewaySettings,
    pub finance_api: FinanceApiConfig,
    pub database: Option<DatabaseConfig>,
    pub platform: PlatformConfig,
    pub admin: AdminConfig,
}

/// Merchant-facing gateway settings.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Payment-method id this gateway owns on orders.
    pub id: String,
    pub title: String,
    pub description: String,
    pub enabled: bool,
    /// Minimum financeable cart total, in major units.
    pub cart_threshold: Option<Decimal>,
    /// Maximum financeable cart total, in major units.
    pub max_loan_amount: Option<Decimal>,
    pub auto_fulfillment: bool,
    pub auto_refund: bool,
    pub auto_cancel: bool,
    pub plan_selection: PlanSelection,
    pub refine_list: Vec<String>,
    pub product_select: ProductSelect,
    /// Per-product minimum price when `product_select` is `Price`.
    pub price_threshold: Decimal,
    pub widget_mode: WidgetMode,
    pub widget_threshold: Option<Decimal>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            id: DEFAULT_GATEWAY_ID.to_string(),
            title: "Pay in instalments".to_string(),
            description: "Spread the cost of your purchase with finance".to_string(),
            enabled: false,
            cart_threshold: None,
            max_loan_amount: None,
            auto_fulfillment: true,
            auto_refund: true,
            auto_cancel: true,
            plan_selection: PlanSelection::All,
            refine_list: Vec::new(),
            product_select: ProductSelect::All,
            price_threshold: Decimal::ZERO,
            widget_mode: WidgetMode::Lightbox,
            widget_threshold: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSelection {
    All,
    Selection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductSelect {
    All,
    Price,
    Selected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetMode {
    Calculator,
    Lightbox,
    Disabled,
}

impl FromStr for PlanSelection {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "selection" => Ok(Self::Selection),
            other => Err(GatewayError::Configuration(format!(
                "unknown plan selection mode '{}'",
                other
            ))),
        }
    }
}

impl FromStr for ProductSelect {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "price" => Ok(Self::Price),
            "selected" => Ok(Self::Selected),
            other => Err(GatewayError::Configuration(format!(
                "unknown product selection mode '{}'",
                other
            ))),
        }
    }
}

impl FromStr for WidgetMode {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "calculator" => Ok(Self::Calculator),
            "" | "lightbox" => Ok(Self::Lightbox),
            "disabled" => Ok(Self::Disabled),
            other => Err(GatewayError::Configuration(format!(
                "unknown widget mode '{}'",
                other
            ))),
        }
    }
}

/// Remote finance provider environments, selected by the API key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Sandbox,
    Staging,
    Testing,
    Development,
}

impl Environment {
    /// Derive the environment from an API key such as `sandbox_abc123.xyz`.
    pub fn from_api_key(api_key: &str) -> Result<Self, GatewayError> {
        let prefix = api_key
            .split('_')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match prefix.as_str() {
            "live" | "production" => Ok(Self::Production),
            "sandbox" => Ok(Self::Sandbox),
            "staging" => Ok(Self::Staging),
            "testing" => Ok(Self::Testing),
            "dev" | "development" => Ok(Self::Development),
            "" => Err(GatewayError::Configuration("API key is not set".to_string())),
            other => Err(GatewayError::Configuration(format!(
                "API key prefix '{}' does not name a known environment",
                other
            ))),
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Production => "https://merchant.api.divido.com",
            Self::Sandbox => "https://merchant.api.sandbox.divido.net",
            Self::Staging => "https://merchant.api.staging.divido.net",
            Self::Testing => "https://merchant.api.testing.divido.net",
            Self::Development => "https://merchant.api.dev.divido.net",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FinanceApiConfig {
    pub api_key: Secret<String>,
    /// Explicit base URL; when absent it is derived from the API key.
    pub base_url: Option<String>,
    /// Shared HMAC secret; blank disables webhook verification and request signing.
    pub shared_secret: Secret<String>,
    pub request_timeout: Duration,
    /// Plan cache lifetime; plans are fetched per request when unset.
    pub plan_cache_ttl: Option<Duration>,
}

impl Default for FinanceApiConfig {
    fn default() -> Self {
        Self {
            api_key: Secret::new(String::new()),
            base_url: None,
            shared_secret: Secret::new(String::new()),
            request_timeout: Duration::from_secs(30),
            plan_cache_ttl: None,
        }
    }
}

impl FinanceApiConfig {
    pub fn has_api_key(&self) -> bool {
        !self.api_key.expose_secret().trim().is_empty()
    }

    pub fn shared_secret(&self) -> Option<&str> {
        let secret = self.shared_secret.expose_secret().as_str();
        (!secret.is_empty()).then_some(secret)
    }

    pub fn environment(&self) -> Result<Environment, GatewayError> {
        Environment::from_api_key(self.api_key.expose_secret())
    }

    /// The base URL requests go to, or a configuration failure when neither an
    /// override nor a recognisable API key is available.
    pub fn resolved_base_url(&self) -> Result<String, GatewayError> {
        match self.base_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(url.trim_end_matches('/').to_string()),
            _ => Ok(self.environment()?.default_base_url().to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub db_name: String,
}

/// Values reported to the provider for diagnostics and used to build return URLs.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub name: String,
    pub version: String,
    pub plugin_version: String,
    pub checkout_base_url: String,
    pub callback_url: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            name: "woocommerce".to_string(),
            version: "unknown".to_string(),
            plugin_version: PLUGIN_VERSION.to_string(),
            checkout_base_url: "http://localhost/checkout".to_string(),
            callback_url: "http://localhost:3003/webhooks/finance".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub token: Secret<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            token: Secret::new(String::new()),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        Self::from_env_with(common).map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))
    }

    fn from_env_with(common: core_config::Config) -> Result<Self, GatewayError> {
        let defaults = GatewaySettings::default();

        let gateway = GatewaySettings {
            id: env::var("FINANCE_GATEWAY_ID").unwrap_or(defaults.id),
            title: env::var("FINANCE_TITLE").unwrap_or(defaults.title),
            description: env::var("FINANCE_DESCRIPTION").unwrap_or(defaults.description),
            enabled: env_flag("FINANCE_ENABLED", false),
            cart_threshold: env_decimal("FINANCE_CART_THRESHOLD")?,
            max_loan_amount: env_decimal("FINANCE_MAX_LOAN_AMOUNT")?,
            auto_fulfillment: env_flag("FINANCE_AUTO_FULFILLMENT", true),
            auto_refund: env_flag("FINANCE_AUTO_REFUND", true),
            auto_cancel: env_flag("FINANCE_AUTO_CANCEL", true),
            plan_selection: env::var("FINANCE_PLAN_SELECTION")
                .unwrap_or_default()
                .parse()?,
            refine_list: env::var("FINANCE_PLAN_REFINE_LIST")
                .map(|s| parse_list(&s))
                .unwrap_or_default(),
            product_select: env::var("FINANCE_PRODUCT_SELECT")
                .unwrap_or_default()
                .parse()?,
            price_threshold: env_decimal("FINANCE_PRICE_THRESHOLD")?.unwrap_or_default(),
            widget_mode: env::var("FINANCE_WIDGET_MODE").unwrap_or_default().parse()?,
            widget_threshold: env_decimal("FINANCE_WIDGET_THRESHOLD")?,
        };

        let finance_api = FinanceApiConfig {
            api_key: Secret::new(env::var("FINANCE_API_KEY").unwrap_or_default()),
            base_url: env::var("FINANCE_API_URL").ok().filter(|s| !s.trim().is_empty()),
            shared_secret: Secret::new(env::var("FINANCE_SHARED_SECRET").unwrap_or_default()),
            request_timeout: Duration::from_secs(
                env::var("FINANCE_REQUEST_TIMEOUT_SECONDS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            plan_cache_ttl: env::var("FINANCE_PLAN_CACHE_SECONDS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        };

        let database = env::var("ORDER_DATABASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|url| DatabaseConfig {
                url: Secret::new(url),
                db_name: env::var("ORDER_DATABASE_NAME")
                    .unwrap_or_else(|_| "finance_gateway_db".to_string()),
            });

        let platform_defaults = PlatformConfig::default();
        let platform = PlatformConfig {
            name: env::var("PLATFORM_NAME").unwrap_or(platform_defaults.name),
            version: env::var("PLATFORM_VERSION").unwrap_or(platform_defaults.version),
            plugin_version: platform_defaults.plugin_version,
            checkout_base_url: env::var("CHECKOUT_BASE_URL")
                .unwrap_or(platform_defaults.checkout_base_url),
            callback_url: env::var("CALLBACK_URL").unwrap_or(platform_defaults.callback_url),
        };

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "finance-gateway".to_string()),
            gateway,
            finance_api,
            database,
            platform,
            admin: AdminConfig {
                token: Secret::new(env::var("FINANCE_ADMIN_TOKEN").unwrap_or_default()),
            },
        })
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| parse_flag(&v, default))
        .unwrap_or(default)
}

fn parse_flag(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" | "on" => true,
        "no" | "false" | "0" | "off" => false,
        _ => default,
    }
}

fn env_decimal(key: &str) -> Result<Option<Decimal>, GatewayError> {
    match env::var(key) {
        Ok(value) => parse_decimal(&value)
            .map_err(|e| GatewayError::Configuration(format!("{}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

/// Parse a money amount; blank means "not configured".
fn parse_decimal(value: &str) -> Result<Option<Decimal>, rust_decimal::Error> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    Decimal::from_str(value).map(Some)
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
