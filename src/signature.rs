//! HTTP Signatures for ActivityPub
//!
//! Signing and verification per the draft-cavage HTTP signature scheme
//! as deployed by ActivityPub implementations: an RSA-SHA256 signature
//! over a canonical string of lowercased headers, bound to the request
//! body through the Digest header.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs1v15::Signature as Pkcs1v15Signature;
use rsa::pkcs8::DecodePublicKey;
use sha2::{Digest, Sha256};

use crate::error::{FederationError, Result};

/// Maximum tolerated clock skew for the Date header, in seconds.
const MAX_DATE_SKEW_SECONDS: i64 = 300;

/// Build the canonical signing string for a request.
///
/// Joins, in `header_order`, lines of the form `name: value` with
/// lowercased header names. The pseudo-header `(request-target)` expands
/// to `method path_and_query` with a lowercased method. The order is
/// preserved verbatim; the same order must appear in the `headers`
/// attribute of the resulting Signature header.
pub fn build_signing_string(
    method: &str,
    path_and_query: &str,
    headers: &[(String, String)],
    header_order: &[String],
) -> Result<String> {
    signing_string_with_lookup(method, path_and_query, header_order, |name| {
        headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    })
}

fn signing_string_with_lookup(
    method: &str,
    path_and_query: &str,
    header_order: &[String],
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String> {
    let mut lines = Vec::with_capacity(header_order.len());

    for name in header_order {
        let name = name.to_ascii_lowercase();
        let value = if name == "(request-target)" {
            format!("{} {}", method.to_ascii_lowercase(), path_and_query)
        } else {
            lookup(&name).ok_or_else(|| {
                FederationError::SignatureParse(format!("signed header missing: {name}"))
            })?
        };
        lines.push(format!("{name}: {value}"));
    }

    Ok(lines.join("\n"))
}

/// Sign a signing string with RSA-SHA256 (PKCS#1 v1.5).
///
/// Deterministic given key and input; returns the base64 signature.
pub fn sign(signing_string: &str, private_key_pem: &str) -> Result<String> {
    use rsa::pkcs8::DecodePrivateKey;
    use rsa::signature::{SignatureEncoding, Signer};

    let private_key = rsa::RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| FederationError::KeyEncoding(format!("invalid private key: {e}")))?;

    let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new(private_key);
    let signature = signing_key
        .try_sign(signing_string.as_bytes())
        .map_err(|e| FederationError::Internal(anyhow::anyhow!("signing failed: {e}")))?;

    Ok(BASE64.encode(signature.to_bytes()))
}

/// Verify a base64 RSA-SHA256 signature over a signing string.
///
/// Returns `Ok(false)` on a mismatched signature; errors only for
/// undecodable key or signature material. No partial matching.
pub fn verify(signing_string: &str, signature_b64: &str, public_key_pem: &str) -> Result<bool> {
    use rsa::signature::Verifier;

    let signature_bytes = BASE64
        .decode(signature_b64)
        .map_err(|_| FederationError::SignatureParse("signature is not valid base64".to_string()))?;

    let public_key = decode_public_key(public_key_pem)?;
    let verifying_key = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(public_key);

    let signature = match Pkcs1v15Signature::try_from(signature_bytes.as_slice()) {
        Ok(signature) => signature,
        Err(_) => return Ok(false),
    };

    Ok(verifying_key
        .verify(signing_string.as_bytes(), &signature)
        .is_ok())
}

/// Decode a PEM public key, accepting both SPKI and PKCS#1 forms.
///
/// Remote servers publish either `PUBLIC KEY` or `RSA PUBLIC KEY` blocks.
fn decode_public_key(pem: &str) -> Result<RsaPublicKey> {
    if let Ok(key) = RsaPublicKey::from_public_key_pem(pem) {
        return Ok(key);
    }

    RsaPublicKey::from_pkcs1_pem(pem)
        .map_err(|e| FederationError::KeyEncoding(format!("invalid public key: {e}")))
}

/// Format the single-line Signature header value.
///
/// `headers` is the space-joined lowercase header order; the algorithm
/// attribute is always emitted.
pub fn format_signature_header(
    key_id: &str,
    algorithm: &str,
    header_order: &[String],
    signature_b64: &str,
) -> String {
    let headers = header_order
        .iter()
        .map(|name| name.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    format!("keyId=\"{key_id}\",algorithm=\"{algorithm}\",headers=\"{headers}\",signature=\"{signature_b64}\"")
}

/// Parsed Signature header
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    /// Key ID (URL to public key)
    pub key_id: String,
    /// Algorithm attribute, if declared
    pub algorithm: Option<String>,
    /// Signed header names, in declared order
    pub headers: Vec<String>,
    /// Base64-encoded signature
    pub signature: String,
}

impl ParsedSignature {
    /// Declared algorithm, defaulting to rsa-sha256 semantics.
    pub fn algorithm(&self) -> &str {
        self.algorithm.as_deref().unwrap_or("rsa-sha256")
    }

    /// Actor URI the key belongs to (keyId with its fragment stripped).
    pub fn actor_uri(&self) -> &str {
        self.key_id.split('#').next().unwrap_or(&self.key_id)
    }
}

/// Parse a Signature header value
///
/// # Format
/// ```text
/// keyId="...",algorithm="...",headers="...",signature="..."
/// ```
///
/// keyId and signature are mandatory; a missing `headers` attribute
/// defaults to `date`, a missing `algorithm` to rsa-sha256 semantics.
/// Unknown attributes are ignored.
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers: Option<Vec<String>> = None;
    let mut signature = None;

    for part in header.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let Some((key, value)) = part.split_once('=') else {
            return Err(FederationError::SignatureParse(format!(
                "attribute is not key=\"value\": {part}"
            )));
        };

        let key = key.trim();
        let value = value.trim().trim_matches('"');

        match key {
            "keyId" => key_id = Some(value.to_string()),
            "algorithm" => algorithm = Some(value.to_string()),
            "headers" => {
                headers = Some(
                    value
                        .split_whitespace()
                        .map(|name| name.to_ascii_lowercase())
                        .collect(),
                );
            }
            "signature" => signature = Some(value.to_string()),
            _ => {} // Ignore unknown attributes
        }
    }

    let key_id = key_id
        .filter(|value| !value.is_empty())
        .ok_or_else(|| FederationError::SignatureParse("missing keyId".to_string()))?;
    let signature = signature
        .filter(|value| !value.is_empty())
        .ok_or_else(|| FederationError::SignatureParse("missing signature".to_string()))?;

    Ok(ParsedSignature {
        key_id,
        algorithm,
        headers: headers.unwrap_or_else(|| vec!["date".to_string()]),
        signature,
    })
}

/// Compute the Digest header value for a body
///
/// # Returns
/// `SHA-256=base64(sha256(body))`
pub fn compute_digest(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    format!("SHA-256={}", BASE64.encode(hasher.finalize()))
}

/// Headers produced for a signed outbound request
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    /// Signature header value
    pub signature: String,
    /// Date header value (IMF-fixdate)
    pub date: String,
    /// Digest header value (if body present)
    pub digest: Option<String>,
}

/// Sign an outbound HTTP request
///
/// Builds Date and (for bodies) Digest values, signs the canonical string
/// over `(request-target) host date [digest]`, and returns the headers to
/// attach. The `headers` attribute of the Signature header carries the
/// exact order that was signed.
pub fn sign_request(
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    private_key_pem: &str,
    key_id: &str,
) -> Result<SignatureHeaders> {
    let parsed_url = url::Url::parse(url)
        .map_err(|e| FederationError::InvalidActorUrl(format!("{url}: {e}")))?;

    let host = match (parsed_url.host_str(), parsed_url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => {
            return Err(FederationError::InvalidActorUrl(format!(
                "missing host in {url}"
            )));
        }
    };

    let path_and_query = match parsed_url.query() {
        Some(query) => format!("{}?{}", parsed_url.path(), query),
        None => parsed_url.path().to_string(),
    };

    let date = format_http_date(Utc::now());
    let digest = body.map(compute_digest);

    let mut headers = vec![
        ("host".to_string(), host),
        ("date".to_string(), date.clone()),
    ];
    let mut header_order = vec![
        "(request-target)".to_string(),
        "host".to_string(),
        "date".to_string(),
    ];

    if let Some(ref digest_value) = digest {
        headers.push(("digest".to_string(), digest_value.clone()));
        header_order.push("digest".to_string());
    }

    let signing_string = build_signing_string(method, &path_and_query, &headers, &header_order)?;
    let signature_b64 = sign(&signing_string, private_key_pem)?;

    Ok(SignatureHeaders {
        signature: format_signature_header(key_id, "rsa-sha256", &header_order, &signature_b64),
        date,
        digest,
    })
}

/// Format a timestamp as an IMF-fixdate, e.g. `Tue, 15 Nov 1994 08:12:31 GMT`.
pub fn format_http_date(when: DateTime<Utc>) -> String {
    when.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Verify an inbound request signature
///
/// The full inbound pipeline: parse the Signature header, require the
/// mandatory signed headers, check Date freshness, byte-compare the
/// Digest before any signature math, rebuild the signing string in the
/// declared order, and verify against `public_key_pem`.
///
/// A request with a body must declare and carry a matching `digest`
/// entry; the digest is what binds the signature to the payload.
pub fn verify_request(
    method: &str,
    path_and_query: &str,
    headers: &http::HeaderMap,
    body: Option<&[u8]>,
    public_key_pem: &str,
) -> Result<()> {
    let parsed = parse_signature_header(signature_header_str(headers)?)?;

    match parsed.algorithm() {
        // hs2019 senders negotiate rsa-sha256 in practice
        "rsa-sha256" | "hs2019" => {}
        other => {
            return Err(FederationError::SignatureVerification(format!(
                "unsupported algorithm: {other}"
            )));
        }
    }

    for required in ["(request-target)", "host", "date"] {
        if !parsed.headers.iter().any(|name| name == required) {
            return Err(FederationError::SignatureVerification(format!(
                "signed headers must include {required}"
            )));
        }
    }

    if body.is_some() && !parsed.headers.iter().any(|name| name == "digest") {
        return Err(FederationError::SignatureVerification(
            "request has a body but digest is not signed".to_string(),
        ));
    }

    check_date_skew(headers)?;

    if let Some(body_bytes) = body {
        let digest_header = header_str(headers, "digest")?;
        if digest_header != compute_digest(body_bytes) {
            return Err(FederationError::DigestMismatch);
        }
    }

    let signing_string =
        signing_string_with_lookup(method, path_and_query, &parsed.headers, |name| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.to_string())
        })?;

    if !verify(&signing_string, &parsed.signature, public_key_pem)? {
        return Err(FederationError::SignatureVerification(format!(
            "RSA verification failed for {}",
            parsed.key_id
        )));
    }

    Ok(())
}

fn signature_header_str(headers: &http::HeaderMap) -> Result<&str> {
    headers
        .get("signature")
        .ok_or_else(|| FederationError::SignatureParse("missing Signature header".to_string()))?
        .to_str()
        .map_err(|_| FederationError::SignatureParse("non-ASCII Signature header".to_string()))
}

fn header_str<'a>(headers: &'a http::HeaderMap, name: &str) -> Result<&'a str> {
    headers
        .get(name)
        .ok_or_else(|| FederationError::SignatureParse(format!("missing {name} header")))?
        .to_str()
        .map_err(|_| FederationError::SignatureParse(format!("non-ASCII {name} header")))
}

fn check_date_skew(headers: &http::HeaderMap) -> Result<()> {
    let date_str = header_str(headers, "date")?;
    let date = DateTime::parse_from_rfc2822(date_str).map_err(|_| {
        FederationError::SignatureVerification("Date header is not IMF-fixdate".to_string())
    })?;

    let skew = (Utc::now().timestamp() - date.timestamp()).abs();
    if skew > MAX_DATE_SKEW_SECONDS {
        return Err(FederationError::SignatureVerification(
            "Date header too old or in the future".to_string(),
        ));
    }

    Ok(())
}

/// Validate that a signature keyId belongs to the same actor as `actor_id`.
pub fn key_id_matches_actor(key_id: &str, actor_id: &str) -> bool {
    let key_actor = key_id.split('#').next().unwrap_or(key_id);
    let actor = actor_id.split('#').next().unwrap_or(actor_id);
    key_actor == actor
}
