use chrono::NaiveDate;

use crate::calendar::Day;
use crate::credentials::AuthError;
use crate::model::PackageId;
use crate::store::StoreError;

/// Coarse classification every caller-facing surface maps from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Unauthorized,
    Infrastructure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Validation => "validation",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Infrastructure => "infrastructure",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("package {package_id} not found for requested date {date}")]
    PackageNotFound { package_id: PackageId, date: NaiveDate },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("date unavailable, already reserved: package {package_id} on {date}")]
    DateUnavailable { package_id: PackageId, date: Day },
    #[error("{entity} already exists: {key}")]
    AlreadyExists { entity: &'static str, key: String },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{op} failed for {detail}: {source}")]
    Store {
        op: &'static str,
        detail: String,
        #[source]
        source: StoreError,
    },
    #[error("{0}")]
    Credentials(#[from] AuthError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::PackageNotFound { .. } | EngineError::NotFound { .. } => {
                ErrorKind::NotFound
            }
            EngineError::DateUnavailable { .. } | EngineError::AlreadyExists { .. } => {
                ErrorKind::Conflict
            }
            EngineError::Invalid { .. } => ErrorKind::Validation,
            EngineError::Unauthorized(_) => ErrorKind::Unauthorized,
            EngineError::Credentials(AuthError::InvalidToken) => ErrorKind::Unauthorized,
            EngineError::Credentials(AuthError::Signing(_) | AuthError::Hashing(_))
            | EngineError::Store { .. } => ErrorKind::Infrastructure,
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        EngineError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Tag a store failure with the operation and the identifiers involved.
pub(crate) fn store_err(
    op: &'static str,
    detail: impl Into<String>,
) -> impl FnOnce(StoreError) -> EngineError {
    let detail = detail.into();
    move |source| EngineError::Store { op, detail, source }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_not_found_names_date_and_package() {
        let err = EngineError::PackageNotFound {
            package_id: 9999,
            date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
        };
        let msg = err.to_string();
        assert!(msg.contains("9999") && msg.contains("2024-03-10"), "{msg}");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn store_failures_are_infrastructure_and_keep_context() {
        let err = store_err("create_order", "package 42 on 2024-03-10")(StoreError::Wal(
            "disk full".into(),
        ));
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        let msg = err.to_string();
        assert!(msg.contains("create_order") && msg.contains("package 42"), "{msg}");
        assert!(msg.contains("disk full"), "{msg}");
    }

    #[test]
    fn conflict_and_infrastructure_stay_apart() {
        let conflict = EngineError::DateUnavailable {
            package_id: 42,
            date: Day::parse("2024-03-10").unwrap(),
        };
        assert_eq!(conflict.kind(), ErrorKind::Conflict);
        assert!(conflict.to_string().contains("already reserved"));
        assert_eq!(
            EngineError::Credentials(AuthError::InvalidToken).kind(),
            ErrorKind::Unauthorized
        );
        assert_eq!(
            EngineError::Credentials(AuthError::Signing("x".into())).kind(),
            ErrorKind::Infrastructure
        );
        assert_eq!(
            EngineError::Credentials(AuthError::Hashing("x".into())).kind(),
            ErrorKind::Infrastructure
        );
    }
}
