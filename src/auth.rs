//! Principal extraction. Credentials are checked upstream by the identity
//! gateway; handlers trust the headers it forwards.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use crate::models::{Principal, Role};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug)]
pub struct Unauthenticated(String);

impl IntoResponse for Unauthenticated {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": "unauthenticated", "message": self.0 }));
        (StatusCode::UNAUTHORIZED, body).into_response()
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, Unauthenticated> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Unauthenticated(format!("{name} header missing")))
}

pub fn principal_from_headers(headers: &HeaderMap) -> Result<Principal, Unauthenticated> {
    let id = header(headers, USER_ID_HEADER)?
        .parse::<Uuid>()
        .map_err(|_| Unauthenticated(format!("{USER_ID_HEADER} is not a uuid")))?;
    let email = header(headers, USER_EMAIL_HEADER)?.to_string();
    let role = header(headers, USER_ROLE_HEADER)?
        .parse::<Role>()
        .map_err(Unauthenticated)?;
    Ok(Principal { id, email, role })
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = Unauthenticated;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        principal_from_headers(&parts.headers)
    }
}
