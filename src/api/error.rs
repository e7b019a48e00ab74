use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use std::borrow::Cow;

use crate::ENV;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Bad Request: {0}")]
    BadRequest(Cow<'static, str>),
    #[error("Unauthorized: {0}")]
    Unauthorized(Cow<'static, str>),
    #[error("Forbidden: {0}")]
    Forbidden(Cow<'static, str>),
    #[error("Not Found: {0}")]
    NotFound(Cow<'static, str>),
    #[error("Conflict: {0}")]
    Conflict(Cow<'static, str>),
    #[error("Internal Server Error")]
    InternalServer,
}

#[derive(serde::Serialize)]
pub struct ErrorBody {
    pub message: Cow<'static, str>,
}

impl Error {
    pub fn unauthorized(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Forbidden(msg.into())
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match *self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::InternalServer => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let header = ("Access-Control-Allow-Origin", ENV.frontend_url.as_str());
        let mut res = HttpResponse::build(self.status_code());

        res.insert_header(header);
        res.insert_header(("Access-Control-Allow-Credentials", "true"));

        match self {
            Error::NotFound(msg)
            | Error::Conflict(msg)
            | Error::Unauthorized(msg)
            | Error::BadRequest(msg)
            | Error::Forbidden(msg) => res.json(ErrorBody { message: msg.clone() }),
            Error::InternalServer => {
                res.json(ErrorBody { message: "Internal Server Error".into() })
            }
        }
    }
}

/// Failures of the friendship subsystem.
///
/// Every variant renders as a single human readable message through `Display`,
/// which is what ends up in the panel's error notice.
#[derive(thiserror::Error, Debug)]
pub enum SystemError {
    #[error("{0}")]
    NoSession(Cow<'static, str>),
    #[error("{0}")]
    NotFound(Cow<'static, str>),
    #[error("{0}")]
    Validation(Cow<'static, str>),
    #[error("{0}")]
    Store(Cow<'static, str>),
    #[error("{}", conflict_message(.0))]
    Conflict(Option<DbErrorMeta>),
    #[error("Invalid session token")]
    JwtError(#[from] jsonwebtoken::errors::Error),
    #[error("Internal System Error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

fn conflict_message(meta: &Option<DbErrorMeta>) -> Cow<'static, str> {
    let Some(m) = meta else {
        return "Duplicate value".into();
    };

    match m.constraint.as_deref() {
        Some("friendship_pair_key" | "friendship_pkey") => {
            "A friendship between these users already exists".into()
        }
        Some(constraint) => {
            let field = constraint.split('_').next_back().unwrap_or("value");

            let mut chars = field.chars();
            let field = match chars.next() {
                Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
                None => "Value".to_string(),
            };

            format!("{field} already exists").into()
        }
        None => "Duplicate value".into(),
    }
}

#[derive(Debug)]
pub struct DbErrorMeta {
    pub constraint: Option<String>,
}

impl From<SystemError> for Error {
    fn from(value: SystemError) -> Self {
        match value {
            SystemError::NoSession(msg) => Error::Unauthorized(msg),
            SystemError::JwtError(_) => Error::Forbidden("Token Invalid or Expired".into()),
            SystemError::NotFound(msg) => Error::NotFound(msg),
            SystemError::Validation(msg) => Error::BadRequest(msg),
            SystemError::Conflict(meta) => Error::Conflict(conflict_message(&meta)),
            _ => {
                log::error!("Internal Server Error: {:?}", value);
                Error::InternalServer
            }
        }
    }
}

impl From<sqlx::Error> for SystemError {
    fn from(err: sqlx::Error) -> Self {
        log::error!("{:?}", err);
        if let sqlx::Error::Database(db_err) = &err {
            return match db_err.code().as_deref() {
                Some("23505") => SystemError::Conflict(Some(DbErrorMeta {
                    constraint: db_err.constraint().map(|s| s.to_string()),
                })),
                _ => {
                    log::error!("Unhandled DB error: {:?}", db_err);
                    SystemError::Store(db_err.message().to_string().into())
                }
            };
        }
        SystemError::Store(err.to_string().into())
    }
}

impl SystemError {
    pub fn no_session() -> Self {
        Self::NoSession("No active session, please sign in again".into())
    }

    pub fn not_found(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Validation(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_conflict_has_readable_message() {
        let err = SystemError::Conflict(Some(DbErrorMeta {
            constraint: Some("friendship_pair_key".into()),
        }));
        assert_eq!(err.to_string(), "A friendship between these users already exists");

        let same_direction =
            SystemError::Conflict(Some(DbErrorMeta { constraint: Some("friendship_pkey".into()) }));
        assert_eq!(same_direction.to_string(), "A friendship between these users already exists");
    }

    #[test]
    fn other_conflicts_name_the_field() {
        let err = SystemError::Conflict(Some(DbErrorMeta {
            constraint: Some("users_username".into()),
        }));
        assert_eq!(err.to_string(), "Username already exists");
        assert_eq!(SystemError::Conflict(None).to_string(), "Duplicate value");
    }

    #[test]
    fn messages_are_shown_verbatim() {
        assert_eq!(SystemError::not_found("User bob doesn't exist").to_string(), "User bob doesn't exist");
        assert_eq!(
            SystemError::no_session().to_string(),
            "No active session, please sign in again"
        );
    }

    #[test]
    fn session_errors_map_to_unauthorized() {
        let err: Error = SystemError::no_session().into();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        let err: Error = SystemError::Store("connection reset".into()).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
