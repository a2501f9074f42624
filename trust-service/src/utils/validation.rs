use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationErrors};

use crate::dtos::ErrorResponse;

/// JSON body that has passed its `validator` rules. Malformed bodies are a
/// 400; well-formed bodies that break a rule are a 422 naming the fields.
pub struct ValidatedJson<T>(pub T);

fn reject(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

fn describe(errors: &ValidationErrors) -> String {
    let mut fields: Vec<String> = errors
        .field_errors()
        .into_iter()
        .map(|(field, errs)| {
            let reasons: Vec<String> = errs
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect();
            format!("{}: {}", field, reasons.join(", "))
        })
        .collect();
    fields.sort();
    fields.join("; ")
}

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e: JsonRejection| {
                reject(StatusCode::BAD_REQUEST, format!("Invalid JSON body: {}", e.body_text()))
            })?;

        value.validate().map_err(|e| {
            reject(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("Validation failed: {}", describe(&e)),
            )
        })?;

        Ok(ValidatedJson(value))
    }
}
