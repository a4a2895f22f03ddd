use crate::ApiResponse;
use axum::{http::StatusCode, response::Json};
use serde::Serialize;

/// 200 with the standard envelope
pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::success(data))
}

/// 200 with a customer-facing message next to the data
pub fn ok_with_message<T: Serialize>(data: T, message: impl Into<String>) -> Json<ApiResponse<T>> {
    Json(ApiResponse::with_message(data, message.into()))
}

/// 201 with the standard envelope
pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, Json(ApiResponse::success(data)))
}
