// Validated JSON extractor for the assistant envelope
//
// Deserializes a request body, applies `Normalizable::normalize`, then runs
// the validator crate's `Validate`. Rejections use the gateway's error body
// shape: `{"error": "ValidationError", "details": "..."}`.

/// Trait for request types that need post-deserialization normalization
pub trait Normalizable {
    /// Normalize the request by applying defaults and transformations
    fn normalize(&mut self) {
        // Default: no-op
    }
}

#[cfg(feature = "axum")]
use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
#[cfg(feature = "axum")]
use serde::de::DeserializeOwned;
#[cfg(feature = "axum")]
use validator::Validate;

#[cfg(feature = "axum")]
use crate::assistant::ErrorBody;

/// Header repeating the error category, mirrored by the gateway's own errors.
#[cfg(feature = "axum")]
pub const ERROR_CODE_HEADER: &str = "x-assistant-error-code";

/// A JSON extractor that normalizes and validates the request body
///
/// # Example
///
/// ```rust,ignore
/// async fn assistant(
///     ValidatedJson(request): ValidatedJson<ActionRequest>,
/// ) -> Response {
///     dispatch(request).await
/// }
/// ```
#[cfg(feature = "axum")]
pub struct ValidatedJson<T>(pub T);

#[cfg(feature = "axum")]
fn validation_rejection(details: String) -> Response {
    let mut response = (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody::new("ValidationError", details)),
    )
        .into_response();
    response.headers_mut().insert(
        ERROR_CODE_HEADER,
        HeaderValue::from_static("ValidationError"),
    );
    response
}

#[cfg(feature = "axum")]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + Normalizable + Send,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(mut data) =
            Json::<T>::from_request(req, state)
                .await
                .map_err(|err: JsonRejection| {
                    let details = match err {
                        JsonRejection::JsonDataError(e) => format!("Invalid JSON data: {e}"),
                        JsonRejection::JsonSyntaxError(e) => format!("JSON syntax error: {e}"),
                        JsonRejection::MissingJsonContentType(_) => {
                            "Missing Content-Type: application/json header".to_string()
                        }
                        _ => format!("Failed to parse JSON: {err}"),
                    };
                    validation_rejection(details)
                })?;

        data.normalize();

        data.validate()
            .map_err(|errors| validation_rejection(errors.to_string()))?;

        Ok(ValidatedJson(data))
    }
}

#[cfg(feature = "axum")]
impl<T> std::ops::Deref for ValidatedJson<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(all(test, feature = "axum"))]
mod tests {
    use axum::body::{to_bytes, Body};
    use serde_json::Value;

    use super::*;
    use crate::assistant::ActionRequest;

    fn json_request(body: &str) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .uri("/api/assistant")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_valid_envelope_is_normalized() {
        let ValidatedJson(request) = ValidatedJson::<ActionRequest>::from_request(
            json_request(r#"{"action":"  translate ","payload":null}"#),
            &(),
        )
        .await
        .unwrap_or_else(|_| panic!("envelope should be accepted"));

        assert_eq!(request.action, "translate");
        assert!(request.payload.is_object());
    }

    #[tokio::test]
    async fn test_empty_action_is_rejected_with_error_body() {
        let rejection = ValidatedJson::<ActionRequest>::from_request(
            json_request(r#"{"action":"   ","payload":{}}"#),
            &(),
        )
        .await
        .err()
        .unwrap();

        assert_eq!(rejection.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            rejection.headers().get(ERROR_CODE_HEADER).unwrap(),
            "ValidationError"
        );
        let body = body_json(rejection).await;
        assert_eq!(body["error"], "ValidationError");
        assert!(body["details"].as_str().unwrap().contains("action"));
    }

    #[tokio::test]
    async fn test_syntax_error_is_rejected() {
        let rejection =
            ValidatedJson::<ActionRequest>::from_request(json_request("{not json"), &())
                .await
                .err()
                .unwrap();

        assert_eq!(rejection.status(), StatusCode::BAD_REQUEST);
        let body = body_json(rejection).await;
        assert!(body["details"]
            .as_str()
            .unwrap()
            .starts_with("JSON syntax error"));
    }
}
