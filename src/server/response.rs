use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

use crate::result::Error;

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::MalformedRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            err if err.is_client_fault() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            Error::Io(_) | Error::Tool(_) => format!("Internal server error: {self}"),
            _ => self.to_string(),
        };

        if self.is_client_fault() {
            warn!("Request rejected ({status}): {detail}");
        } else {
            error!("Request failed ({status}): {detail}");
        }

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// A file to download, sent as the whole response body.
pub fn attachment(content_type: &'static str, filename: &str, body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={filename}"),
            ),
        ],
        body,
    )
        .into_response()
}
