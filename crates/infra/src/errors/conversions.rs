//! Conversions from external infrastructure errors into domain errors.

use haven_domain::HavenError;
use keyring::Error as KeyringError;
use reqwest::Error as HttpError;
use rusqlite::Error as SqlError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub HavenError);

impl From<InfraError> for HavenError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<HavenError> for InfraError {
    fn from(value: HavenError) -> Self {
        InfraError(value)
    }
}

trait IntoHavenError {
    fn into_haven(self) -> HavenError;
}

/// SQLCipher reports a wrong key as a corrupt or non-database file.
pub(crate) fn looks_like_wrong_key(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("not a database") || lower.contains("encrypted") || lower.contains("notadb")
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → HavenError */
/* -------------------------------------------------------------------------- */

impl IntoHavenError for SqlError {
    fn into_haven(self) -> HavenError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match (err.code, err.extended_code) {
                    (ErrorCode::DatabaseBusy, _) => HavenError::Storage("database is busy".into()),
                    (ErrorCode::DatabaseLocked, _) => {
                        HavenError::Storage("database is locked".into())
                    }
                    (ErrorCode::ConstraintViolation, 2067 | 1555) => {
                        HavenError::Storage("unique constraint violation".into())
                    }
                    (ErrorCode::NotADatabase, _) => HavenError::Storage(
                        "SQLCipher key rejected or database not encrypted".into(),
                    ),
                    (_, _) if looks_like_wrong_key(&message) => HavenError::Storage(
                        "SQLCipher key rejected or database not encrypted".into(),
                    ),
                    _ => HavenError::Storage(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => HavenError::NotFound("no rows returned by query".into()),
            RE::FromSqlConversionFailure(_, _, cause) => {
                HavenError::Storage(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, _, ty) => {
                HavenError::Storage(format!("invalid column type: {ty}"))
            }
            RE::Utf8Error(_) => HavenError::Storage("invalid UTF-8 returned from sqlite".into()),
            RE::InvalidPath(path) => HavenError::Storage(format!(
                "invalid database path: {}",
                path.to_string_lossy()
            )),
            other => HavenError::Storage(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        InfraError(value.into_haven())
    }
}

/* -------------------------------------------------------------------------- */
/* keyring::Error → HavenError */
/* -------------------------------------------------------------------------- */

impl IntoHavenError for KeyringError {
    fn into_haven(self) -> HavenError {
        use KeyringError::*;

        let description = self.to_string();

        match self {
            NoEntry => HavenError::NotFound("keychain entry not found".into()),
            BadEncoding(_) => {
                HavenError::Storage("credential in keychain is not valid UTF-8".into())
            }
            PlatformFailure(err) => HavenError::Storage(format!("keychain platform error: {err}")),
            NoStorageAccess(err) => {
                HavenError::Storage(format!("unable to access secure storage: {err}"))
            }
            _ => HavenError::Storage(description),
        }
    }
}

impl From<KeyringError> for InfraError {
    fn from(value: KeyringError) -> Self {
        InfraError(value.into_haven())
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → HavenError */
/* -------------------------------------------------------------------------- */

impl IntoHavenError for HttpError {
    fn into_haven(self) -> HavenError {
        if self.is_timeout() {
            return HavenError::ServerUnavailable {
                status: None,
                message: "HTTP request timed out".into(),
            };
        }

        if self.is_connect() {
            return HavenError::NetworkUnavailable(format!("HTTP connection failure: {self}"));
        }

        if let Some(status) = self.status() {
            let code = status.as_u16();
            let message =
                format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status"));
            return status_error(code, message);
        }

        if self.is_decode() || self.is_body() {
            return HavenError::ServerUnavailable { status: None, message: self.to_string() };
        }

        HavenError::NetworkUnavailable(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_haven())
    }
}

/// Classify a non-success HTTP status. 4xx is final, everything else is
/// worth retrying.
pub fn status_error(status: u16, message: String) -> HavenError {
    match status {
        400..=499 => HavenError::ServerRejected { status, message },
        _ => HavenError::ServerUnavailable { status: Some(status), message },
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
