use axum::extract::FromRequest;

use crate::error::ApiError;

/// `Json` extractor whose rejections use the `{error, code}` body.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct AppJson<T>(pub T);
