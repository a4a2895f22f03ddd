use super::{parse_amount, GatewayError};
use crate::{config::BkashConfig, tracing::with_metrics};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{instrument, warn};

/// Input for `checkout/payment/create`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePayment {
    pub payer_reference: String,
    #[serde(rename = "callbackURL")]
    pub callback_url: String,
    pub amount: String,
    pub merchant_invoice_number: String,
}

#[derive(Debug, Clone)]
pub struct BkashCheckout {
    pub payment_id: String,
    pub bkash_url: String,
    pub raw: Value,
}

#[derive(Debug, Clone)]
pub struct BkashExecution {
    pub transaction_status: String,
    pub amount: Option<Decimal>,
    pub trx_id: Option<String>,
    pub raw: Value,
}

impl BkashExecution {
    pub fn is_completed(&self) -> bool {
        self.transaction_status == "Completed"
    }
}

/// bKash tokenized checkout client
#[derive(Clone)]
pub struct BkashClient {
    http: reqwest::Client,
    config: BkashConfig,
}

impl BkashClient {
    pub fn new(http: reqwest::Client, config: BkashConfig) -> Self {
        Self { http, config }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    #[instrument(skip(self))]
    async fn grant_token(&self) -> Result<String, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured("bkash"));
        }

        let url = self.url("/checkout/token/grant");
        let body = json!({
            "app_key": self.config.app_key,
            "app_secret": self.config.app_secret,
        });

        let (http, config, url, body) = (&self.http, &self.config, &url, &body);
        let response: Value = with_metrics("bkash.grant_token", move || async move {
            let response = http
                .post(url)
                .header("username", &config.username)
                .header("password", &config.password)
                .json(body)
                .send()
                .await?;
            read_json(response).await
        })
        .await?;

        response
            .get("id_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Malformed("token grant without id_token".into()))
    }

    /// Creates a checkout and returns the URL the customer is sent to
    #[instrument(skip(self, request), fields(invoice = %request.merchant_invoice_number))]
    pub async fn create_payment(&self, request: &CreatePayment) -> Result<BkashCheckout, GatewayError> {
        let token = self.grant_token().await?;
        let url = self.url("/checkout/payment/create");

        let mut body = serde_json::to_value(request)
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;
        if let Some(map) = body.as_object_mut() {
            map.insert("mode".into(), json!("0011"));
            map.insert("currency".into(), json!("BDT"));
            map.insert("intent".into(), json!("sale"));
        }

        let (http, app_key, url, token, body) =
            (&self.http, &self.config.app_key, &url, &token, &body);
        let response: Value = with_metrics("bkash.create_payment", move || async move {
            let response = http
                .post(url)
                .header("authorization", token)
                .header("x-app-key", app_key)
                .json(body)
                .send()
                .await?;
            read_json(response).await
        })
        .await?;

        check_status_code(&response)?;

        let payment_id = str_field(&response, "paymentID")
            .ok_or_else(|| GatewayError::Malformed("missing paymentID".into()))?;
        let bkash_url = str_field(&response, "bkashURL")
            .ok_or_else(|| GatewayError::Malformed("missing bkashURL".into()))?;

        Ok(BkashCheckout {
            payment_id,
            bkash_url,
            raw: response,
        })
    }

    /// Executes an authorized checkout after the customer returns
    #[instrument(skip(self))]
    pub async fn execute_payment(&self, payment_id: &str) -> Result<BkashExecution, GatewayError> {
        let token = self.grant_token().await?;
        let url = self.url("/checkout/payment/execute");
        let body = json!({ "paymentID": payment_id });

        let (http, app_key, url, token, body) =
            (&self.http, &self.config.app_key, &url, &token, &body);
        let response: Value = with_metrics("bkash.execute_payment", move || async move {
            let response = http
                .post(url)
                .header("authorization", token)
                .header("x-app-key", app_key)
                .json(body)
                .send()
                .await?;
            read_json(response).await
        })
        .await?;

        let transaction_status = str_field(&response, "transactionStatus").unwrap_or_else(|| {
            str_field(&response, "statusMessage").unwrap_or_else(|| "Unknown".to_string())
        });

        Ok(BkashExecution {
            transaction_status,
            amount: response.get("amount").and_then(parse_amount),
            trx_id: str_field(&response, "trxID"),
            raw: response,
        })
    }
}

fn check_status_code(body: &Value) -> Result<(), GatewayError> {
    match body.get("statusCode").and_then(Value::as_str) {
        None | Some("0000") => Ok(()),
        Some(code) => {
            let message = str_field(body, "statusMessage").unwrap_or_default();
            warn!(%code, %message, "bKash rejected the request");
            Err(GatewayError::Rejected(format!("{} {}", code, message).trim().to_string()))
        }
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, GatewayError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::Http {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| GatewayError::Malformed(e.to_string()))
}

fn str_field(body: &Value, key: &str) -> Option<String> {
    body.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_payment_serializes_bkash_field_names() {
        let request = CreatePayment {
            payer_reference: "01712345678".into(),
            callback_url: "http://localhost:8000/api/v1/payments/bkash/callback".into(),
            amount: "960.00".into(),
            merchant_invoice_number: "BS20240101120000123456".into(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["payerReference"], "01712345678");
        assert_eq!(value["callbackURL"], "http://localhost:8000/api/v1/payments/bkash/callback");
        assert_eq!(value["merchantInvoiceNumber"], "BS20240101120000123456");
    }

    #[test]
    fn non_zero_status_code_is_a_rejection() {
        let body = json!({"statusCode": "2023", "statusMessage": "Insufficient Balance"});
        assert!(matches!(
            check_status_code(&body),
            Err(GatewayError::Rejected(msg)) if msg == "2023 Insufficient Balance"
        ));
        assert!(check_status_code(&json!({"statusCode": "0000"})).is_ok());
        assert!(check_status_code(&json!({})).is_ok());
    }
}
