//! Classification of MongoDB driver errors.
//!
//! Uses the driver's typed error kinds instead of string matching, so the
//! connection layer can tell an authentication failure from an unreachable
//! server and log messages stay on one line.

use mongodb::error::{Error, ErrorKind};

/// Coarse category of a driver error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MongoErrorClass {
    /// Credentials were rejected.
    Authentication,

    /// No server could be selected (unreachable, wrong host, timeout).
    ServerSelection,

    /// The server answered with an error code.
    Command { code: i32, name: Option<String> },

    /// Network I/O failed.
    Network,

    /// Anything else.
    Other,
}

/// Classify a driver error.
pub fn classify_mongodb_error(error: &Error) -> MongoErrorClass {
    match error.kind.as_ref() {
        ErrorKind::Authentication { .. } => MongoErrorClass::Authentication,
        ErrorKind::ServerSelection { .. } => MongoErrorClass::ServerSelection,
        ErrorKind::Command(command_error) => {
            // 18 is AuthenticationFailed, surfaced as a command error by some servers
            if command_error.code == 18 {
                return MongoErrorClass::Authentication;
            }
            MongoErrorClass::Command {
                code: command_error.code,
                name: code_name(command_error.code),
            }
        }
        ErrorKind::Io(_) => MongoErrorClass::Network,
        _ => MongoErrorClass::Other,
    }
}

/// One-line, human-readable description of a driver error.
pub fn describe_mongodb_error(error: &Error) -> String {
    match error.kind.as_ref() {
        ErrorKind::Authentication { message, .. } => format!("authentication failed: {message}"),
        ErrorKind::ServerSelection { message, .. } => {
            format!("server unreachable: {}", first_line(message))
        }
        ErrorKind::Command(command_error) => match code_name(command_error.code) {
            Some(name) => format!(
                "{name} ({}): {}",
                command_error.code, command_error.message
            ),
            None => format!("code {}: {}", command_error.code, command_error.message),
        },
        _ => first_line(&error.to_string()).to_string(),
    }
}

/// Names of the codes an export run is likely to see.
fn code_name(code: i32) -> Option<String> {
    let name = match code {
        13 => "Unauthorized",
        18 => "AuthenticationFailed",
        26 => "NamespaceNotFound",
        43 => "CursorNotFound",
        50 => "MaxTimeMSExpired",
        _ => return None,
    };
    Some(name.to_string())
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or(message)
}
