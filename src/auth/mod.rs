//! Customer and staff identity.
//!
//! Sessions and login are owned by the storefront gateway in front of this
//! service; it forwards the signed-in customer as `x-customer-id`. Back-office
//! tools authenticate with the shared `x-staff-key`.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use tracing::warn;
use uuid::Uuid;

use crate::{errors::ApiError, AppState};

pub const CUSTOMER_ID_HEADER: &str = "x-customer-id";
pub const STAFF_KEY_HEADER: &str = "x-staff-key";

/// The customer a request acts on behalf of
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CustomerId(pub Uuid);

impl CustomerId {
    pub fn into_inner(self) -> Uuid {
        self.0
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for CustomerId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(CUSTOMER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        Uuid::parse_str(raw.trim())
            .map(CustomerId)
            .map_err(|_| ApiError::Unauthorized)
    }
}

/// A request from back-office tooling
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StaffUser;

impl StaffUser {
    /// Missing key is 401; a wrong key, or no key configured, is 403
    pub fn authorize(headers: &HeaderMap, configured: Option<&str>) -> Result<Self, ApiError> {
        let presented = headers
            .get(STAFF_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(ApiError::Unauthorized)?;

        match configured {
            Some(expected) if constant_time_eq(expected, presented) => Ok(StaffUser),
            _ => {
                warn!("Rejected staff request with an invalid key");
                Err(ApiError::Forbidden)
            }
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for StaffUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = AppState::from_ref(state);
        Self::authorize(&parts.headers, app.config.staff_api_key.as_deref())
    }
}

pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(header: Option<&str>) -> Result<CustomerId, ApiError> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(CUSTOMER_ID_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        CustomerId::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn parses_uuid_header() {
        let id = Uuid::new_v4();
        let customer = extract(Some(&id.to_string())).await.unwrap();
        assert_eq!(customer.into_inner(), id);
    }

    #[tokio::test]
    async fn rejects_missing_or_malformed_header() {
        assert!(matches!(extract(None).await, Err(ApiError::Unauthorized)));
        assert!(matches!(
            extract(Some("customer-7")).await,
            Err(ApiError::Unauthorized)
        ));
    }

    fn staff_headers(key: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(key) = key {
            headers.insert(STAFF_KEY_HEADER, key.parse().unwrap());
        }
        headers
    }

    #[test]
    fn staff_key_must_match_configured_secret() {
        let configured = Some("back-office-key-0001");
        assert_eq!(
            StaffUser::authorize(&staff_headers(Some("back-office-key-0001")), configured).unwrap(),
            StaffUser
        );
        assert!(matches!(
            StaffUser::authorize(&staff_headers(None), configured),
            Err(ApiError::Unauthorized)
        ));
        assert!(matches!(
            StaffUser::authorize(&staff_headers(Some("back-office-key-0002")), configured),
            Err(ApiError::Forbidden)
        ));
    }

    #[test]
    fn staff_routes_are_closed_without_a_configured_key() {
        assert!(matches!(
            StaffUser::authorize(&staff_headers(Some("anything-at-all-here")), None),
            Err(ApiError::Forbidden)
        ));
    }
}
