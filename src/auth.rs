use crate::errors::AppError;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

/// User id taken from `Authorization: Bearer <user-id>`.
///
/// Stands in for the session the OAuth layer would normally establish; the
/// token is trusted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        bearer_user(parts)
            .map(AuthUser)
            .ok_or_else(|| AppError::unauthorized("sign in required"))
    }
}

fn bearer_user(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/tasks");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn reads_bearer_token() {
        assert_eq!(bearer_user(&parts_with(Some("Bearer user-1"))).as_deref(), Some("user-1"));
        assert_eq!(bearer_user(&parts_with(Some("Bearer   "))), None);
        assert_eq!(bearer_user(&parts_with(Some("Basic abc"))), None);
        assert_eq!(bearer_user(&parts_with(None)), None);
    }
}
