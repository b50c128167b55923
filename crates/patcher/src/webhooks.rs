//! GitHub webhook validation.
//!
//! Every request must name its event and delivery, carry a JSON body, and be
//! signed with the shared HMAC secret. Anything else is rejected before the
//! payload is looked at.

use axum::http::{header, HeaderMap, Method, StatusCode};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_HEADER: &str = "X-GitHub-Event";
pub const DELIVERY_HEADER: &str = "X-GitHub-Delivery";
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

/// A request that failed validation, and the status to answer it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: StatusCode,
    pub message: String,
}

impl Rejection {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Event kind and delivery id of an accepted webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub event_kind: String,
    pub event_guid: String,
}

/// Verify a GitHub `X-Hub-Signature-256` value (`sha256=<hex>`) against `body`.
#[must_use]
pub fn verify_signature(body: &[u8], signature: &str, secret: &[u8]) -> bool {
    let Some(hex_digest) = signature.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(signature_bytes) = hex::decode(hex_digest) else {
        return false;
    };

    let Some(computed) = digest(body, secret) else {
        return false;
    };

    computed.as_slice().ct_eq(&signature_bytes).into()
}

/// Signature header value for `body`, as GitHub would send it.
#[must_use]
pub fn sign(body: &[u8], secret: &[u8]) -> Option<String> {
    digest(body, secret).map(|d| format!("{SIGNATURE_PREFIX}{}", hex::encode(d)))
}

fn digest(body: &[u8], secret: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(body);
    Some(mac.finalize().into_bytes().to_vec())
}

/// Validate an incoming webhook request.
pub fn validate_webhook(
    method: &Method,
    headers: &HeaderMap,
    body: &[u8],
    secret: &[u8],
) -> Result<Delivery, Rejection> {
    if method != Method::POST {
        return Err(Rejection::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "405 Method not allowed",
        ));
    }

    let event_kind = header_value(headers, EVENT_HEADER).ok_or_else(|| {
        Rejection::new(
            StatusCode::BAD_REQUEST,
            format!("400 Bad Request: Missing {EVENT_HEADER} Header"),
        )
    })?;
    let event_guid = header_value(headers, DELIVERY_HEADER).ok_or_else(|| {
        Rejection::new(
            StatusCode::BAD_REQUEST,
            format!("400 Bad Request: Missing {DELIVERY_HEADER} Header"),
        )
    })?;

    let content_type = header_value(headers, header::CONTENT_TYPE.as_str()).unwrap_or_default();
    if !is_json(content_type) {
        return Err(Rejection::new(
            StatusCode::BAD_REQUEST,
            format!(
                "400 Bad Request: Hook only accepts content-type: application/json - \
                 please reconfigure this hook on GitHub (got {content_type:?})"
            ),
        ));
    }

    let signature = header_value(headers, SIGNATURE_HEADER).ok_or_else(|| {
        Rejection::new(
            StatusCode::FORBIDDEN,
            format!("403 Forbidden: Missing {SIGNATURE_HEADER}"),
        )
    })?;
    if !verify_signature(body, signature, secret) {
        return Err(Rejection::new(
            StatusCode::FORBIDDEN,
            "403 Forbidden: Invalid X-Hub-Signature-256",
        ));
    }

    Ok(Delivery {
        event_kind: event_kind.to_string(),
        event_guid: event_guid.to_string(),
    })
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn is_json(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}
