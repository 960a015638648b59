use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

/// Uniform body shape every endpoint responds with.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub status_code: u16,
    pub data: Option<T>,
    pub message: String,
    pub success: bool,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(status: StatusCode, data: Option<T>, message: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            data,
            message: message.into(),
            success: status.as_u16() < 400,
        }
    }

    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, Some(data), message)
    }

    pub fn created(data: T, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CREATED, Some(data), message)
    }

    /// Duplicate-resource outcome. Reported through the normal response
    /// channel, not the error path.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, None, message)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> axum::response::Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_tracks_status_code() {
        let ok = ApiResponse::ok(1u32, "fine");
        assert!(ok.success);
        assert_eq!(ok.status_code, 200);

        let conflict = ApiResponse::<u32>::conflict("taken");
        assert!(!conflict.success);
        assert_eq!(conflict.status_code, 409);
    }

    #[test]
    fn envelope_serializes_camel_case() {
        let body = serde_json::to_value(ApiResponse::created("x", "made")).unwrap();
        assert_eq!(body["statusCode"], 201);
        assert_eq!(body["data"], "x");
        assert_eq!(body["message"], "made");
        assert_eq!(body["success"], true);
    }
}
