//! In-process stand-ins used by unit tests.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

use crate::models::{
    ActivationRequest, ApplicationAmounts, ApplicationPayload, BillingDetails, CancellationRequest,
    CreditAmount, CurrencyRef, FinanceMeta, LenderRef, Order, OrderStatus, PlanRecord,
    RefundRequest, RemoteApplication, RemoteUrls,
};
use crate::services::finance_api::{Endpoint, FinanceApi, FinanceApiError};

#[derive(Default)]
struct State {
    plans: Vec<PlanRecord>,
    plans_unavailable: bool,
    plan_fetches: usize,
    applications: HashMap<String, RemoteApplication>,
    fail_next: Option<String>,
    calls: Vec<String>,
    last_body: Option<Value>,
    environment: Option<String>,
    environment_fetches: usize,
    next_id: usize,
}

#[derive(Default)]
pub struct FakeFinanceApi {
    state: Mutex<State>,
}

impl FakeFinanceApi {
    pub fn with_plans(plans: Vec<PlanRecord>) -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().plans = plans;
        fake
    }

    pub fn plans_unavailable(&self) {
        self.state.lock().unwrap().plans_unavailable = true;
    }

    pub fn plan_fetches(&self) -> usize {
        self.state.lock().unwrap().plan_fetches
    }

    pub fn set_environment(&self, environment: &str) {
        self.state.lock().unwrap().environment = Some(environment.to_string());
    }

    pub fn environment_fetches(&self) -> usize {
        self.state.lock().unwrap().environment_fetches
    }

    pub fn set_application(
        &self,
        id: &str,
        merchant_reference: &str,
        cancelable_amount: i64,
        refundable_amount: i64,
        lender: &str,
    ) {
        let application = RemoteApplication {
            id: id.to_string(),
            merchant_reference: merchant_reference.to_string(),
            amounts: ApplicationAmounts {
                cancelable_amount,
                refundable_amount,
            },
            currency: Some(CurrencyRef {
                id: "GBP".to_string(),
            }),
            lender: Some(LenderRef {
                app_name: lender.to_string(),
            }),
            finance_plan: None,
            urls: None,
        };
        self.state
            .lock()
            .unwrap()
            .applications
            .insert(id.to_string(), application);
    }

    /// The next provider call answers with a bad response carrying `message`.
    pub fn fail_next_with_bad_response(&self, message: &str) {
        self.state.lock().unwrap().fail_next = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn last_body(&self) -> Option<Value> {
        self.state.lock().unwrap().last_body.clone()
    }

    fn check(&self, endpoint: Endpoint<'_>) -> Result<(), FinanceApiError> {
        match self.state.lock().unwrap().fail_next.take() {
            Some(message) => Err(FinanceApiError::BadResponse {
                code: "400001".to_string(),
                message,
                context: endpoint.context(),
            }),
            None => Ok(()),
        }
    }

    fn record(&self, call: String, body: Value) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state.last_body = Some(body);
    }

    fn store_application(&self, id: String, payload: &ApplicationPayload) -> RemoteApplication {
        let application = RemoteApplication {
            id: id.clone(),
            merchant_reference: payload.merchant_reference.clone(),
            amounts: ApplicationAmounts::default(),
            currency: Some(CurrencyRef {
                id: "GBP".to_string(),
            }),
            lender: None,
            finance_plan: None,
            urls: Some(RemoteUrls {
                application_url: Some(format!("https://apply.example.test/{}", id)),
            }),
        };
        self.state
            .lock()
            .unwrap()
            .applications
            .insert(id, application.clone());
        application
    }
}

#[async_trait]
impl FinanceApi for FakeFinanceApi {
    async fn health(&self) -> Result<bool, FinanceApiError> {
        self.check(Endpoint::Health)?;
        Ok(true)
    }

    async fn environment(&self) -> Result<String, FinanceApiError> {
        self.check(Endpoint::Environment)?;
        let mut state = self.state.lock().unwrap();
        state.environment_fetches += 1;
        Ok(state
            .environment
            .clone()
            .unwrap_or_else(|| "sandbox".to_string()))
    }

    async fn finance_plans(&self) -> Result<Vec<PlanRecord>, FinanceApiError> {
        self.check(Endpoint::FinancePlans)?;
        let mut state = self.state.lock().unwrap();
        state.plan_fetches += 1;
        if state.plans_unavailable {
            return Err(FinanceApiError::UnexpectedResponse {
                status: Some(503),
                message: "unavailable".to_string(),
                context: Endpoint::FinancePlans.context(),
            });
        }
        Ok(state.plans.clone())
    }

    async fn get_application(&self, id: &str) -> Result<RemoteApplication, FinanceApiError> {
        self.check(Endpoint::GetApplication(id))?;
        self.state
            .lock()
            .unwrap()
            .applications
            .get(id)
            .cloned()
            .ok_or_else(|| FinanceApiError::BadResponse {
                code: "404001".to_string(),
                message: "Application not found".to_string(),
                context: Endpoint::GetApplication(id).context(),
            })
    }

    async fn create_application(
        &self,
        payload: &ApplicationPayload,
    ) -> Result<RemoteApplication, FinanceApiError> {
        self.check(Endpoint::CreateApplication)?;
        self.record("create".to_string(), serde_json::to_value(payload).unwrap());
        let id = {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            format!("app-{}", state.next_id)
        };
        Ok(self.store_application(id, payload))
    }

    async fn update_application(
        &self,
        payload: &ApplicationPayload,
    ) -> Result<RemoteApplication, FinanceApiError> {
        let id = payload.id.clone().unwrap_or_default();
        self.check(Endpoint::UpdateApplication(&id))?;
        self.record(format!("update:{}", id), serde_json::to_value(payload).unwrap());
        Ok(self.store_application(id, payload))
    }

    async fn activate(
        &self,
        application_id: &str,
        request: &ActivationRequest,
    ) -> Result<Value, FinanceApiError> {
        self.check(Endpoint::Activation(application_id))?;
        self.record(
            format!("activate:{}", application_id),
            serde_json::to_value(request).unwrap(),
        );
        Ok(json!({"data": {"id": "activation-1"}}))
    }

    async fn cancel(
        &self,
        application_id: &str,
        request: &CancellationRequest,
    ) -> Result<Value, FinanceApiError> {
        self.check(Endpoint::Cancellation(application_id))?;
        self.record(
            format!("cancel:{}", application_id),
            serde_json::to_value(request).unwrap(),
        );
        Ok(json!({"data": {"id": "cancellation-1"}}))
    }

    async fn refund(
        &self,
        application_id: &str,
        request: &RefundRequest,
    ) -> Result<Value, FinanceApiError> {
        self.check(Endpoint::Refund(application_id))?;
        self.record(
            format!("refund:{}", application_id),
            serde_json::to_value(request).unwrap(),
        );
        Ok(json!({"data": {"id": "refund-1"}}))
    }
}

pub fn plan_record(id: &str, active: bool, min: i64, max: i64) -> PlanRecord {
    PlanRecord {
        id: id.to_string(),
        description: format!("{} months", id),
        active,
        credit_amount: CreditAmount {
            minimum_amount: min,
            maximum_amount: max,
        },
    }
}

/// A pending order paid with the default gateway id.
pub fn order_fixture(id: &str, total: &str) -> Order {
    Order {
        id: id.to_string(),
        total: Decimal::from_str(total).unwrap(),
        currency: "GBP".to_string(),
        status: OrderStatus::PendingPayment,
        payment_method: crate::config::DEFAULT_GATEWAY_ID.to_string(),
        billing: BillingDetails {
            first_name: "Ann".to_string(),
            last_name: "Smith".to_string(),
            email: "ann@example.com".to_string(),
            country: "GB".to_string(),
            ..Default::default()
        },
        shipping: Default::default(),
        received_url: None,
        finance: FinanceMeta::default(),
        notes: vec![],
        paid_at: None,
    }
}
