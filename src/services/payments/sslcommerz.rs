use super::{parse_amount, GatewayError};
use crate::{config::SslCommerzConfig, entities::order, tracing::with_metrics};
use md5::{Digest, Md5};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

const SESSION_PATH: &str = "/gwprocess/v4/api.php";
const VALIDATION_PATH: &str = "/validator/api/validationserverAPI.php";
const REFUND_PATH: &str = "/validator/api/merchantTransIDvalidationAPI.php";

/// Redirect and IPN targets handed to SSLCommerz when a session is opened
#[derive(Debug, Clone)]
pub struct SslCallbackUrls {
    pub success: String,
    pub fail: String,
    pub cancel: String,
    pub ipn: String,
}

#[derive(Debug, Clone)]
pub struct SslSession {
    pub gateway_url: String,
    pub session_key: Option<String>,
    pub raw: Value,
}

#[derive(Debug, Clone)]
pub struct SslValidation {
    pub status: String,
    pub tran_id: Option<String>,
    pub amount: Option<Decimal>,
    pub bank_tran_id: Option<String>,
    pub raw: Value,
}

impl SslValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self.status.as_str(), "VALID" | "VALIDATED")
    }
}

#[derive(Debug, Clone)]
pub struct SslRefund {
    pub status: String,
    pub refund_ref_id: Option<String>,
    pub raw: Value,
}

impl SslRefund {
    pub fn is_accepted(&self) -> bool {
        self.status.eq_ignore_ascii_case("success")
    }
}

/// Checks `verify_sign` on a callback payload.
///
/// The signed string is the store password followed by every other field except
/// `verify_sign` and `verify_key`, sorted by key and joined as `k=v` with `&`.
pub fn verify_signature(store_password: &str, fields: &BTreeMap<String, String>) -> bool {
    let (Some(sign), Some(key)) = (fields.get("verify_sign"), fields.get("verify_key")) else {
        return false;
    };
    if sign.is_empty() || key.is_empty() {
        return false;
    }

    let joined = fields
        .iter()
        .filter(|(k, _)| k.as_str() != "verify_sign" && k.as_str() != "verify_key")
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let digest = Md5::digest(format!("{}{}", store_password, joined).as_bytes());
    crate::auth::constant_time_eq(&hex::encode(digest), &sign.to_ascii_lowercase())
}

/// SSLCommerz hosted checkout client
#[derive(Clone)]
pub struct SslCommerzClient {
    http: reqwest::Client,
    config: SslCommerzConfig,
}

impl SslCommerzClient {
    pub fn new(http: reqwest::Client, config: SslCommerzConfig) -> Self {
        Self { http, config }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.store_id.is_empty() && !self.config.store_password.is_empty()
    }

    pub fn verify(&self, fields: &BTreeMap<String, String>) -> bool {
        verify_signature(&self.config.store_password, fields)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url().trim_end_matches('/'), path)
    }

    /// Opens a hosted payment session for an order
    #[instrument(skip(self, order, urls), fields(order_number = %order.order_number))]
    pub async fn create_session(
        &self,
        order: &order::Model,
        tran_id: &str,
        urls: &SslCallbackUrls,
    ) -> Result<SslSession, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured("sslcommerz"));
        }

        let form = session_form(&self.config, order, tran_id, urls);
        let url = self.url(SESSION_PATH);

        let (http, url, form) = (&self.http, &url, &form);
        let body: Value = with_metrics("sslcommerz.create_session", move || async move {
            let response = http.post(url).form(form).send().await?;
            read_json(response).await
        })
        .await?;

        if body.get("status").and_then(Value::as_str) != Some("SUCCESS") {
            let reason = body
                .get("failedreason")
                .and_then(Value::as_str)
                .unwrap_or("session rejected")
                .to_string();
            warn!(%reason, "SSLCommerz refused the session");
            return Err(GatewayError::Rejected(reason));
        }

        let gateway_url = body
            .get("GatewayPageURL")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::Malformed("missing GatewayPageURL".into()))?
            .to_string();
        let session_key = body
            .get("sessionkey")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(SslSession {
            gateway_url,
            session_key,
            raw: body,
        })
    }

    /// Asks SSLCommerz whether a `val_id` is genuine
    #[instrument(skip(self))]
    pub async fn validate(&self, val_id: &str) -> Result<SslValidation, GatewayError> {
        let url = self.url(VALIDATION_PATH);
        let query = [
            ("val_id", val_id),
            ("store_id", self.config.store_id.as_str()),
            ("store_passwd", self.config.store_password.as_str()),
            ("format", "json"),
        ];

        let (http, url, query) = (&self.http, &url, &query);
        let body: Value = with_metrics("sslcommerz.validate", move || async move {
            let response = http.get(url).query(query).send().await?;
            read_json(response).await
        })
        .await?;

        let status = body
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("INVALID")
            .to_string();
        debug!(%status, "SSLCommerz validation answered");

        Ok(SslValidation {
            status,
            tran_id: string_field(&body, "tran_id"),
            amount: body.get("amount").and_then(parse_amount),
            bank_tran_id: string_field(&body, "bank_tran_id"),
            raw: body,
        })
    }

    /// Requests a refund against the bank transaction of a completed payment
    #[instrument(skip(self))]
    pub async fn refund(
        &self,
        bank_tran_id: &str,
        amount: Decimal,
        remarks: &str,
    ) -> Result<SslRefund, GatewayError> {
        let url = self.url(REFUND_PATH);
        let form = [
            ("refund_amount", format!("{:.2}", amount)),
            ("refund_remarks", remarks.to_string()),
            ("bank_tran_id", bank_tran_id.to_string()),
            ("store_id", self.config.store_id.clone()),
            ("store_passwd", self.config.store_password.clone()),
        ];

        let (http, url, form) = (&self.http, &url, &form);
        let body: Value = with_metrics("sslcommerz.refund", move || async move {
            let response = http.post(url).form(form).send().await?;
            read_json(response).await
        })
        .await?;

        Ok(SslRefund {
            status: string_field(&body, "status").unwrap_or_else(|| "failed".into()),
            refund_ref_id: string_field(&body, "refund_ref_id"),
            raw: body,
        })
    }
}

fn session_form(
    config: &SslCommerzConfig,
    order: &order::Model,
    tran_id: &str,
    urls: &SslCallbackUrls,
) -> Vec<(&'static str, String)> {
    let email = order
        .email
        .clone()
        .unwrap_or_else(|| "customer@example.com".to_string());
    let line2 = order.address_line2.clone().unwrap_or_default();

    vec![
        ("store_id", config.store_id.clone()),
        ("store_passwd", config.store_password.clone()),
        ("total_amount", format!("{:.2}", order.total)),
        ("currency", "BDT".into()),
        ("tran_id", tran_id.to_string()),
        ("success_url", urls.success.clone()),
        ("fail_url", urls.fail.clone()),
        ("cancel_url", urls.cancel.clone()),
        ("ipn_url", urls.ipn.clone()),
        ("cus_name", order.full_name.clone()),
        ("cus_email", email),
        ("cus_add1", order.address_line1.clone()),
        ("cus_add2", line2.clone()),
        ("cus_city", order.city.clone()),
        ("cus_state", order.state.clone()),
        ("cus_postcode", order.postal_code.clone()),
        ("cus_country", order.country.clone()),
        ("cus_phone", order.phone.clone()),
        ("shipping_method", "YES".into()),
        ("ship_name", order.full_name.clone()),
        ("ship_add1", order.address_line1.clone()),
        ("ship_add2", line2),
        ("ship_city", order.city.clone()),
        ("ship_state", order.state.clone()),
        ("ship_postcode", order.postal_code.clone()),
        ("ship_country", order.country.clone()),
        ("product_name", format!("Order #{}", order.order_number)),
        ("product_category", "Books".into()),
        ("product_profile", "physical-goods".into()),
        ("value_a", order.order_number.clone()),
        ("value_b", order.user_id.to_string()),
    ]
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

fn string_field(body: &Value, key: &str) -> Option<String> {
    body.get(key).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed(password: &str, mut fields: BTreeMap<String, String>) -> BTreeMap<String, String> {
        let joined = fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let sign = hex::encode(Md5::digest(format!("{}{}", password, joined).as_bytes()));
        fields.insert("verify_sign".into(), sign);
        fields.insert("verify_key".into(), "amount,status,tran_id".into());
        fields
    }

    fn payload() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("tran_id".to_string(), "SSL-BS20240101120000123456-1a2b3c4d".to_string()),
            ("amount".to_string(), "960.00".to_string()),
            ("status".to_string(), "VALID".to_string()),
        ])
    }

    #[test]
    fn accepts_correct_signature() {
        let fields = signed("secret", payload());
        assert!(verify_signature("secret", &fields));
    }

    #[test]
    fn rejects_tampered_amount() {
        let mut fields = signed("secret", payload());
        fields.insert("amount".into(), "1.00".into());
        assert!(!verify_signature("secret", &fields));
    }

    #[test]
    fn rejects_wrong_password() {
        let fields = signed("secret", payload());
        assert!(!verify_signature("other", &fields));
    }

    #[test]
    fn missing_sign_or_key_is_invalid() {
        let mut fields = signed("secret", payload());
        fields.remove("verify_key");
        assert!(!verify_signature("secret", &fields));
        assert!(!verify_signature("secret", &payload()));
    }

    #[test]
    fn validation_status_values() {
        let v = |status: &str| SslValidation {
            status: status.into(),
            tran_id: None,
            amount: None,
            bank_tran_id: None,
            raw: Value::Null,
        };
        assert!(v("VALID").is_valid());
        assert!(v("VALIDATED").is_valid());
        assert!(!v("INVALID_TRANSACTION").is_valid());
    }
}
