//! Normalization of provider-reported errors and transport failures.

use crate::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Phrase used for a status code missing from the table.
pub const UNREGISTERED_STATUS_PHRASE: &str = "???";
/// Phrase used when no HTTP status was received at all.
pub const MISSING_STATUS_PHRASE: &str = "Unknown";

/// Error shape returned when the provider reports a failure in its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResult {
    pub error: ProviderError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderError {
    pub code: Option<i64>,
    pub message: Option<String>,
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorResult {
    /// Extracts the `error` object of a payload, if it has one.
    ///
    /// Fields of the wrong type become `None`; `details` is kept verbatim.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let error = payload.get("error")?.as_object()?;
        Some(Self {
            error: ProviderError {
                code: error.get("code").and_then(Value::as_i64),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                status: error
                    .get("status")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                details: error.get("details").cloned(),
            },
        })
    }

    /// Like [`ErrorResult::from_payload`], also accepting the array-wrapped
    /// body the streaming endpoint returns (`[{"error": {...}}]`).
    pub fn from_body(body: &Value) -> Option<Self> {
        match body {
            Value::Array(items) => items.first().and_then(Self::from_payload),
            other => Self::from_payload(other),
        }
    }
}

/// Human phrase for an HTTP status, used only to build error messages.
pub fn status_phrase(status: Option<u16>) -> &'static str {
    match status {
        None => MISSING_STATUS_PHRASE,
        Some(code) => reason_phrase(code).unwrap_or(UNREGISTERED_STATUS_PHRASE),
    }
}

/// Builds the error a call rejects with when no structured error is available.
pub fn transport_error(status: Option<u16>, detail: Option<String>) -> Error {
    let phrase = status_phrase(status);
    let head = match status {
        Some(code) => format!("Gemini request failed: {} {}", code, phrase),
        None => format!("Gemini request failed: {}", phrase),
    };
    let message = match detail.as_deref().map(str::trim) {
        Some(detail) if !detail.is_empty() => format!("{}: {}", head, detail),
        _ => head,
    };

    tracing::error!("{}", message);
    Error::Transport {
        status,
        phrase,
        message,
    }
}

fn reason_phrase(code: u16) -> Option<&'static str> {
    let phrase = match code {
        100 => "Continue",
        101 => "Switching Protocols",
        102 => "Processing",
        103 => "Early Hints",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        207 => "Multi-Status",
        208 => "Already Reported",
        218 => "This Is Fine",
        226 => "IM Used",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        306 => "Switch Proxy",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        418 => "I'm a Teapot",
        419 => "Page Expired",
        420 => "Enhance Your Calm",
        421 => "Misdirected Request",
        422 => "Unprocessable Entity",
        423 => "Locked",
        424 => "Failed Dependency",
        425 => "Too Early",
        426 => "Upgrade Required",
        428 => "Precondition Required",
        429 => "Too Many Requests",
        430 => "Request Header Fields Too Large",
        431 => "Request Header Fields Too Large",
        440 => "Login Time-out",
        444 => "No Response",
        449 => "Retry With",
        450 => "Blocked by Windows Parental Controls",
        451 => "Unavailable For Legal Reasons",
        460 => "Client Closed Connection Prematurely",
        463 => "Too Many Forwarded IP Addresses",
        464 => "Incompatible Protocol",
        494 => "Request Header Too Large",
        495 => "SSL Certificate Error",
        496 => "SSL Certificate Required",
        497 => "HTTP Request Sent to HTTPS Port",
        498 => "Invalid Token",
        499 => "Client Closed Request",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        506 => "Variant Also Negotiates",
        507 => "Insufficient Storage",
        508 => "Loop Detected",
        509 => "Bandwidth Limit Exceeded",
        510 => "Not Extended",
        511 => "Network Authentication Required",
        520 => "Web Server Returned an Unknown Error",
        521 => "Web Server Is Down",
        522 => "Connection Timed Out",
        523 => "Origin Is Unreachable",
        524 => "A Timeout Occurred",
        525 => "SSL Handshake Failed",
        526 => "Invalid SSL Certificate",
        527 => "Railgun Error",
        529 => "Site Is Overloaded",
        530 => "Site Is Frozen",
        540 => "Temporarily Disabled",
        561 => "Unauthorized",
        598 => "Network Read Timeout Error",
        599 => "Network Connect Timeout Error",
        _ => return None,
    };
    Some(phrase)
}
