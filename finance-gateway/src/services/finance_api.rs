//! Finance provider merchant API client.
//!
//! Every call builds its path, serialises the body, sends it with the API key
//! header (and an HMAC signature when a shared secret is configured) and then
//! validates the response before handing the decoded JSON back.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use service_core::observability::TracedClientExt;
use service_core::utils::signature::sign_payload;
use std::fmt;
use thiserror::Error;

use crate::config::FinanceApiConfig;
use crate::models::{
    ActivationRequest, ApplicationPayload, CancellationRequest, PlanRecord, RefundRequest,
    RemoteApplication,
};
use crate::services::metrics::record_api_request;

pub const API_KEY_HEADER: &str = "X-DIVIDO-API-KEY";
pub const SIGNATURE_HEADER: &str = "X-Divido-Hmac-Sha256";

const DEFAULT_ERROR_MESSAGE: &str = "An error occured";
const UNEXPECTED_MESSAGE: &str =
    "An unexpected error occurred when contacting the finance provider";

/// Which call failed; attached to every client error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiContext {
    pub method: String,
    pub action: String,
}

impl fmt::Display for ApiContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.action)
    }
}

#[derive(Debug, Error)]
pub enum FinanceApiError {
    /// The provider answered with `error: true` and a code.
    #[error("{message} (code {code}, {context})")]
    BadResponse {
        code: String,
        message: String,
        context: ApiContext,
    },

    /// Transport failure, timeout, unexpected status or undecodable body.
    #[error("Unexpected response from finance API ({context}, status {status:?}): {message}")]
    UnexpectedResponse {
        status: Option<u16>,
        message: String,
        context: ApiContext,
    },

    #[error("Finance API is not configured: {0}")]
    NotConfigured(String),
}

impl FinanceApiError {
    pub fn public_message(&self) -> String {
        match self {
            FinanceApiError::BadResponse { message, .. } => message.clone(),
            FinanceApiError::UnexpectedResponse { .. } => UNEXPECTED_MESSAGE.to_string(),
            FinanceApiError::NotConfigured(_) => "Finance is currently unavailable".to_string(),
        }
    }

    pub fn context(&self) -> Option<&ApiContext> {
        match self {
            FinanceApiError::BadResponse { context, .. }
            | FinanceApiError::UnexpectedResponse { context, .. } => Some(context),
            FinanceApiError::NotConfigured(_) => None,
        }
    }

    pub fn is_bad_response(&self) -> bool {
        matches!(self, FinanceApiError::BadResponse { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
        }
    }
}

/// A remote operation: method, action name, path and the status it must return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint<'a> {
    Health,
    Environment,
    FinancePlans,
    GetApplication(&'a str),
    CreateApplication,
    UpdateApplication(&'a str),
    Activation(&'a str),
    Cancellation(&'a str),
    Refund(&'a str),
}

impl Endpoint<'_> {
    pub fn method(&self) -> HttpMethod {
        match self {
            Endpoint::Health
            | Endpoint::Environment
            | Endpoint::FinancePlans
            | Endpoint::GetApplication(_) => HttpMethod::Get,
            Endpoint::UpdateApplication(_) => HttpMethod::Patch,
            Endpoint::CreateApplication
            | Endpoint::Activation(_)
            | Endpoint::Cancellation(_)
            | Endpoint::Refund(_) => HttpMethod::Post,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Endpoint::Health => "HEALTH",
            Endpoint::Environment => "ENVIRONMENT",
            Endpoint::FinancePlans => "PLANS",
            Endpoint::GetApplication(_)
            | Endpoint::CreateApplication
            | Endpoint::UpdateApplication(_) => "APPLICATION",
            Endpoint::Activation(_) => "ACTIVATION",
            Endpoint::Cancellation(_) => "CANCELLATION",
            Endpoint::Refund(_) => "REFUND",
        }
    }

    pub fn path(&self) -> String {
        match self {
            Endpoint::Health => "/health".to_string(),
            Endpoint::Environment => "/environment".to_string(),
            Endpoint::FinancePlans => "/finance-plans".to_string(),
            Endpoint::GetApplication(id) => format!("/applications/{}", id),
            Endpoint::CreateApplication => "/applications".to_string(),
            Endpoint::UpdateApplication(id) => format!("/application/{}", id),
            Endpoint::Activation(id) => format!("/applications/{}/activations", id),
            Endpoint::Cancellation(id) => format!("/applications/{}/cancellations", id),
            Endpoint::Refund(id) => format!("/application/{}/refunds", id),
        }
    }

    pub fn expected_status(&self) -> u16 {
        match self.method() {
            HttpMethod::Get | HttpMethod::Patch => 200,
            HttpMethod::Post => 201,
        }
    }

    pub fn context(&self) -> ApiContext {
        ApiContext {
            method: self.method().as_str().to_string(),
            action: self.action().to_string(),
        }
    }
}

/// Check a raw response against the endpoint's contract.
///
/// A provider error body takes precedence over the status code.
pub fn validate_response(
    endpoint: &Endpoint<'_>,
    status: u16,
    body: &str,
) -> Result<Value, FinanceApiError> {
    let context = endpoint.context();
    let parsed = if body.trim().is_empty() {
        Ok(Value::Null)
    } else {
        serde_json::from_str::<Value>(body)
    };

    if let Ok(value) = &parsed {
        if value.get("error").and_then(Value::as_bool) == Some(true) {
            if let Some(code) = value.get("code").filter(|c| !c.is_null()) {
                let code = match code {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let message = value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_ERROR_MESSAGE)
                    .to_string();
                return Err(FinanceApiError::BadResponse {
                    code,
                    message,
                    context,
                });
            }
        }
    }

    if status != endpoint.expected_status() {
        return Err(FinanceApiError::UnexpectedResponse {
            status: Some(status),
            message: format!("expected status {}", endpoint.expected_status()),
            context,
        });
    }

    parsed.map_err(|e| FinanceApiError::UnexpectedResponse {
        status: Some(status),
        message: format!("invalid JSON body: {}", e),
        context,
    })
}

/// Decode the `.data` member of a validated response.
fn decode_data<T: DeserializeOwned>(
    endpoint: &Endpoint<'_>,
    mut value: Value,
) -> Result<T, FinanceApiError> {
    let data = value.get_mut("data").map(Value::take).unwrap_or(Value::Null);
    serde_json::from_value(data).map_err(|e| FinanceApiError::UnexpectedResponse {
        status: Some(endpoint.expected_status()),
        message: format!("malformed response data: {}", e),
        context: endpoint.context(),
    })
}

/// Operations the lifecycle engine needs from the finance provider.
#[async_trait]
pub trait FinanceApi: Send + Sync {
    /// `true` iff the provider answers 200 with the literal body `OK`.
    async fn health(&self) -> Result<bool, FinanceApiError>;

    async fn environment(&self) -> Result<String, FinanceApiError>;

    async fn finance_plans(&self) -> Result<Vec<PlanRecord>, FinanceApiError>;

    async fn get_application(&self, id: &str) -> Result<RemoteApplication, FinanceApiError>;

    async fn create_application(
        &self,
        payload: &ApplicationPayload,
    ) -> Result<RemoteApplication, FinanceApiError>;

    /// Full replace of an existing application; `payload.id` must be set.
    async fn update_application(
        &self,
        payload: &ApplicationPayload,
    ) -> Result<RemoteApplication, FinanceApiError>;

    async fn activate(
        &self,
        application_id: &str,
        request: &ActivationRequest,
    ) -> Result<Value, FinanceApiError>;

    async fn cancel(
        &self,
        application_id: &str,
        request: &CancellationRequest,
    ) -> Result<Value, FinanceApiError>;

    async fn refund(
        &self,
        application_id: &str,
        request: &RefundRequest,
    ) -> Result<Value, FinanceApiError>;
}

/// HTTP implementation of [`FinanceApi`].
#[derive(Clone)]
pub struct FinanceApiClient {
    client: Client,
    config: FinanceApiConfig,
    base_url: Option<String>,
}

impl FinanceApiClient {
    pub fn new(config: FinanceApiConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        let base_url = config.resolved_base_url().ok();

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    /// Check that an API key is set and a base URL could be resolved.
    pub fn is_configured(&self) -> bool {
        self.config.has_api_key() && self.base_url.is_some()
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    fn require_base_url(&self) -> Result<&str, FinanceApiError> {
        if !self.config.has_api_key() {
            return Err(FinanceApiError::NotConfigured(
                "API key is not set".to_string(),
            ));
        }
        match &self.base_url {
            Some(url) => Ok(url),
            None => Err(FinanceApiError::NotConfigured(
                self.config
                    .resolved_base_url()
                    .err()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "base URL could not be resolved".to_string()),
            )),
        }
    }

    async fn send_raw(
        &self,
        endpoint: &Endpoint<'_>,
        body: Option<String>,
    ) -> Result<(u16, String), FinanceApiError> {
        let base_url = self.require_base_url()?;
        let url = format!("{}{}", base_url, endpoint.path());
        let context = endpoint.context();

        let mut request = match endpoint.method() {
            HttpMethod::Get => self.client.traced_get(&url),
            HttpMethod::Post => self.client.traced_post(&url),
            HttpMethod::Patch => self.client.traced_patch(&url),
        }
        .header("Accept", "application/json")
        .header("Content-Type", "application/json")
        .header(API_KEY_HEADER, self.config.api_key.expose_secret());

        if let Some(body) = body {
            if let Some(secret) = self.config.shared_secret() {
                let signature = sign_payload(body.as_bytes(), secret).map_err(|e| {
                    FinanceApiError::UnexpectedResponse {
                        status: None,
                        message: format!("failed to sign request: {}", e),
                        context: context.clone(),
                    }
                })?;
                request = request.header(SIGNATURE_HEADER, &signature);
            }
            request = request.body(body);
        }

        let transport_error = |e: reqwest::Error| {
            let message = if e.is_timeout() {
                "request timed out".to_string()
            } else {
                e.to_string()
            };
            FinanceApiError::UnexpectedResponse {
                status: e.status().map(|s| s.as_u16()),
                message,
                context: context.clone(),
            }
        };

        let response = request.send().await.map_err(|e| {
            record_api_request(endpoint.action(), "transport_error");
            tracing::error!(
                method = endpoint.method().as_str(),
                action = endpoint.action(),
                error = %e,
                "Finance API request failed"
            );
            transport_error(e)
        })?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(transport_error)?;

        tracing::debug!(
            method = endpoint.method().as_str(),
            action = endpoint.action(),
            status,
            "Finance API response"
        );

        Ok((status, text))
    }

    async fn call(
        &self,
        endpoint: Endpoint<'_>,
        body: Option<String>,
    ) -> Result<Value, FinanceApiError> {
        let (status, text) = self.send_raw(&endpoint, body).await?;

        match validate_response(&endpoint, status, &text) {
            Ok(value) => {
                record_api_request(endpoint.action(), "ok");
                Ok(value)
            }
            Err(err) => {
                let result = if err.is_bad_response() {
                    "bad_response"
                } else {
                    "unexpected_response"
                };
                record_api_request(endpoint.action(), result);
                tracing::error!(
                    method = endpoint.method().as_str(),
                    action = endpoint.action(),
                    status,
                    error = %err,
                    "Finance API returned an error"
                );
                Err(err)
            }
        }
    }

    fn serialize<T: Serialize>(
        endpoint: &Endpoint<'_>,
        body: &T,
    ) -> Result<String, FinanceApiError> {
        serde_json::to_string(body).map_err(|e| FinanceApiError::UnexpectedResponse {
            status: None,
            message: format!("failed to serialise request: {}", e),
            context: endpoint.context(),
        })
    }
}

#[async_trait]
impl FinanceApi for FinanceApiClient {
    async fn health(&self) -> Result<bool, FinanceApiError> {
        let (status, body) = self.send_raw(&Endpoint::Health, None).await?;
        Ok(status == 200 && body == "OK")
    }

    async fn environment(&self) -> Result<String, FinanceApiError> {
        #[derive(serde::Deserialize)]
        struct EnvironmentData {
            environment: String,
        }

        let endpoint = Endpoint::Environment;
        let value = self.call(endpoint, None).await?;
        let data: EnvironmentData = decode_data(&endpoint, value)?;
        Ok(data.environment)
    }

    async fn finance_plans(&self) -> Result<Vec<PlanRecord>, FinanceApiError> {
        let endpoint = Endpoint::FinancePlans;
        let value = self.call(endpoint, None).await?;
        decode_data(&endpoint, value)
    }

    async fn get_application(&self, id: &str) -> Result<RemoteApplication, FinanceApiError> {
        let endpoint = Endpoint::GetApplication(id);
        let value = self.call(endpoint, None).await?;
        decode_data(&endpoint, value)
    }

    async fn create_application(
        &self,
        payload: &ApplicationPayload,
    ) -> Result<RemoteApplication, FinanceApiError> {
        let endpoint = Endpoint::CreateApplication;
        let body = Self::serialize(&endpoint, payload)?;
        let value = self.call(endpoint, Some(body)).await?;
        decode_data(&endpoint, value)
    }

    async fn update_application(
        &self,
        payload: &ApplicationPayload,
    ) -> Result<RemoteApplication, FinanceApiError> {
        let id = payload.id.as_deref().ok_or_else(|| {
            FinanceApiError::UnexpectedResponse {
                status: None,
                message: "application id is required for an update".to_string(),
                context: Endpoint::UpdateApplication("").context(),
            }
        })?;
        let endpoint = Endpoint::UpdateApplication(id);
        let body = Self::serialize(&endpoint, payload)?;
        let value = self.call(endpoint, Some(body)).await?;
        decode_data(&endpoint, value)
    }

    async fn activate(
        &self,
        application_id: &str,
        request: &ActivationRequest,
    ) -> Result<Value, FinanceApiError> {
        let endpoint = Endpoint::Activation(application_id);
        let body = Self::serialize(&endpoint, request)?;
        self.call(endpoint, Some(body)).await
    }

    async fn cancel(
        &self,
        application_id: &str,
        request: &CancellationRequest,
    ) -> Result<Value, FinanceApiError> {
        let endpoint = Endpoint::Cancellation(application_id);
        let body = Self::serialize(&endpoint, request)?;
        self.call(endpoint, Some(body)).await
    }

    async fn refund(
        &self,
        application_id: &str,
        request: &RefundRequest,
    ) -> Result<Value, FinanceApiError> {
        let endpoint = Endpoint::Refund(application_id);
        let body = Self::serialize(&endpoint, request)?;
        self.call(endpoint, Some(body)).await
    }
}
