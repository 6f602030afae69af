//! Draft-Cavage HTTP Signatures (v10) as spoken by mainstream Fediverse
//! servers.
//!
//! Outbound: SHA-256 body digest, signing string over
//! `(request-target) host date digest`, RSA-SHA256 (PKCS#1 v1.5), and a
//! `Signature` header naming the actor's `#main-key`. This module owns the
//! full outgoing header set so the signed `Host` value is byte-for-byte the
//! one the transport sends.
//!
//! Inbound: parse the `Signature` header, reconstruct the signing string
//! from the received headers in their declared order, verify against the
//! sender's cached public key, and enforce the date-skew and body-digest
//! checks.

use axum::http::HeaderMap;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use sha2::{Digest, Sha256};
use time::{
    OffsetDateTime, PrimitiveDateTime, format_description::BorrowedFormatItem,
    macros::format_description,
};
use url::Url;

use crate::errors::AppError;
use crate::keys::{private_key_from_pem, public_key_from_pem};

/// Maximum allowed skew between the request `Date` header and now.
pub const MAX_DATE_SKEW_SECONDS: i64 = 30;

/// IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
const HTTP_DATE_FORMAT: &[BorrowedFormatItem<'_>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

pub fn format_http_date(at: OffsetDateTime) -> String {
    at.to_offset(time::UtcOffset::UTC)
        .format(&HTTP_DATE_FORMAT)
        .unwrap_or_default()
}

fn parse_http_date(value: &str) -> Result<OffsetDateTime, AppError> {
    PrimitiveDateTime::parse(value, &HTTP_DATE_FORMAT)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|_| AppError::SignatureInvalid("unparseable Date header".to_string()))
}

/// `SHA-256=<base64>` digest of the exact body bytes that go on the wire.
pub fn body_digest(body: &[u8]) -> String {
    let hash = Sha256::digest(body);
    format!("SHA-256={}", BASE64.encode(hash))
}

/// The `Host` value that both the signing string and the transport must use:
/// hostname plus port only when it is not the scheme default.
pub fn host_header(url: &Url) -> Result<String, AppError> {
    let host = url
        .host_str()
        .ok_or_else(|| AppError::Validation("inbox URL has no host".to_string()))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn request_target(method: &str, url: &Url) -> String {
    let mut target = format!("{} {}", method.to_lowercase(), url.path());
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }
    target
}

/// Complete header set for one signed outbound POST.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub host: String,
    pub date: String,
    pub digest: String,
    pub signature: String,
}

/// Sign an outbound request. `key_id` is the sender's published key id
/// (`{actor}#main-key`); the signing string covers
/// `(request-target) host date digest` in that order.
pub fn sign_request(
    key_id: &str,
    private_key_pem: &str,
    method: &str,
    url: &Url,
    body: &[u8],
    now: OffsetDateTime,
) -> Result<SignedHeaders, AppError> {
    let host = host_header(url)?;
    let date = format_http_date(now);
    let digest = body_digest(body);

    let signing_string = format!(
        "(request-target): {}\nhost: {}\ndate: {}\ndigest: {}",
        request_target(method, url),
        host,
        date,
        digest
    );

    let private_key = private_key_from_pem(private_key_pem)?;
    let signing_key = SigningKey::<Sha256>::new(private_key);
    let signature = signing_key.sign(signing_string.as_bytes());

    let signature = format!(
        "keyId=\"{key_id}\",algorithm=\"rsa-sha256\",headers=\"(request-target) host date digest\",signature=\"{}\"",
        BASE64.encode(signature.to_bytes())
    );

    Ok(SignedHeaders {
        host,
        date,
        digest,
        signature,
    })
}

/// Parsed `Signature` header.
#[derive(Debug, Clone)]
pub struct SignatureHeader {
    pub key_id: String,
    pub algorithm: Option<String>,
    pub headers: Vec<String>,
    pub signature: Vec<u8>,
}

impl SignatureHeader {
    /// Actor URI behind the key: the key id with its fragment stripped.
    pub fn actor_uri(&self) -> &str {
        self.key_id.split('#').next().unwrap_or(&self.key_id)
    }
}

/// Parse the comma-separated `key="value"` parts of a `Signature` header.
pub fn parse_signature_header(value: &str) -> Result<SignatureHeader, AppError> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;

    for part in split_signature_params(value) {
        let Some((name, raw)) = part.split_once('=') else {
            continue;
        };
        let unquoted = raw.trim().trim_matches('"');
        match name.trim() {
            "keyId" => key_id = Some(unquoted.to_string()),
            "algorithm" => algorithm = Some(unquoted.to_string()),
            "headers" => {
                headers = Some(
                    unquoted
                        .split_whitespace()
                        .map(|h| h.to_lowercase())
                        .collect::<Vec<_>>(),
                )
            }
            "signature" => {
                signature = Some(BASE64.decode(unquoted).map_err(|_| {
                    AppError::SignatureInvalid("signature is not valid base64".to_string())
                })?)
            }
            _ => {}
        }
    }

    let key_id =
        key_id.ok_or_else(|| AppError::SignatureInvalid("missing keyId".to_string()))?;
    let signature =
        signature.ok_or_else(|| AppError::SignatureInvalid("missing signature".to_string()))?;
    // Per draft-cavage, an absent headers list means the signature covers
    // only the Date header.
    let headers = headers.unwrap_or_else(|| vec!["date".to_string()]);

    Ok(SignatureHeader {
        key_id,
        algorithm,
        headers,
        signature,
    })
}

// Splits on commas outside of double quotes; base64 payloads may not
// contain commas, but quoted header lists keep this honest.
fn split_signature_params(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (i, c) in value.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(value[start..].trim());
    parts
}

/// Verify an inbound signed request against the sender's public key.
///
/// `method` and `path_and_query` describe the request line as received;
/// `headers` is the full received header map; `body` the exact received
/// bytes.
pub fn verify_request(
    parsed: &SignatureHeader,
    public_key_pem: &str,
    method: &str,
    path_and_query: &str,
    headers: &HeaderMap,
    body: &[u8],
    now: OffsetDateTime,
) -> Result<(), AppError> {
    // Date skew window, checked before any crypto.
    let date_value = headers
        .get("date")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::SignatureInvalid("missing Date header".to_string()))?;
    let date = parse_http_date(date_value)?;
    if (now - date).whole_seconds().abs() > MAX_DATE_SKEW_SECONDS {
        return Err(AppError::StaleRequest);
    }

    // The Digest header must match the body we actually received.
    if let Some(digest_value) = headers.get("digest").and_then(|v| v.to_str().ok()) {
        let expected = body_digest(body);
        if !digest_value.eq_ignore_ascii_case(&expected) {
            return Err(AppError::SignatureInvalid(
                "body does not match Digest header".to_string(),
            ));
        }
    } else if parsed.headers.iter().any(|h| h == "digest") {
        return Err(AppError::SignatureInvalid(
            "signature declares digest but header is absent".to_string(),
        ));
    }

    let mut lines = Vec::with_capacity(parsed.headers.len());
    for name in &parsed.headers {
        if name == "(request-target)" {
            lines.push(format!(
                "(request-target): {} {}",
                method.to_lowercase(),
                path_and_query
            ));
        } else {
            let value = headers
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    AppError::SignatureInvalid(format!("declared header '{name}' is absent"))
                })?;
            lines.push(format!("{name}: {}", value.trim()));
        }
    }
    let signing_string = lines.join("\n");

    let public_key = public_key_from_pem(public_key_pem)?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let signature = Signature::try_from(parsed.signature.as_slice())
        .map_err(|_| AppError::SignatureInvalid("malformed signature bytes".to_string()))?;

    verifying_key
        .verify(signing_string.as_bytes(), &signature)
        .map_err(|_| AppError::SignatureInvalid("signature verification failed".to_string()))
}
