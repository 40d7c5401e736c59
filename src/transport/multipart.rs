// transport/multipart.rs - Multipart Wire Codec
//
//! Builds and decodes the two-part `multipart/mixed` bodies carried by the
//! HTTP-MTP: part one is the envelope as `application/xml`, part two the
//! ACL text as `text/plain`, JADE style with no Content-Disposition.
//!
//! Decoding is deliberately tolerant. Peers reorder parts, vary header
//! casing, insert extra CR/LF breaks or drop trailing line terminators, so
//! parts are identified by Content-Type first, then by sniffing the payload
//! (`<?xml` vs `(`), then by position.

use crate::message::Envelope;

use super::TransportError;

const CRLF: &str = "\r\n";

/// Frame an envelope and ACL text into a multipart body.
///
/// Returns the body bytes and the `Content-Type` header value carrying the
/// generated boundary.
pub fn build_multipart(envelope: &Envelope, acl_text: &str) -> (Vec<u8>, String) {
    let boundary = format!(
        "BOUNDARY-{}",
        &uuid::Uuid::new_v4().simple().to_string()[..12]
    );

    let mut body = String::new();
    body.push_str("--");
    body.push_str(&boundary);
    body.push_str(CRLF);
    body.push_str("Content-Type: application/xml");
    body.push_str(CRLF);
    body.push_str(CRLF);
    body.push_str(&envelope.to_xml());
    body.push_str(CRLF);
    body.push_str("--");
    body.push_str(&boundary);
    body.push_str(CRLF);
    body.push_str("Content-Type: text/plain");
    body.push_str(CRLF);
    body.push_str(CRLF);
    body.push_str(acl_text);
    body.push_str(CRLF);
    body.push_str("--");
    body.push_str(&boundary);
    body.push_str("--");
    body.push_str(CRLF);

    let content_type = format!("multipart/mixed; boundary=\"{boundary}\"");
    (body.into_bytes(), content_type)
}

/// Pull the boundary parameter out of a `Content-Type` header value,
/// case-insensitively and with or without quotes
pub fn extract_boundary(content_type: &str) -> Option<String> {
    let lower = content_type.to_ascii_lowercase();
    let at = lower.find("boundary=")?;
    let rest = &content_type[at + "boundary=".len()..];
    let rest = rest.trim_start();
    let (value, _) = match rest.strip_prefix('"') {
        Some(quoted) => quoted.split_once('"').unwrap_or((quoted, "")),
        None => rest.split_once(';').unwrap_or((rest, "")),
    };
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Decode a raw multipart body into `(envelope_xml, acl_text)`.
///
/// Fails when fewer than two parts can be found; everything else is
/// resolved by preference, sniffing and position.
pub fn extract_envelope_acl(raw: &[u8], boundary: &str) -> Result<(String, String), TransportError> {
    let text = String::from_utf8_lossy(raw);
    let parts = split_parts(&text, boundary);
    if parts.len() < 2 {
        return Err(TransportError::Multipart(format!(
            "expected 2 multipart parts, found {}",
            parts.len()
        )));
    }

    let mut env_idx: Option<usize> = None;
    let mut acl_idx: Option<usize> = None;

    // Prefer declared Content-Type
    for (i, (headers, _)) in parts.iter().enumerate() {
        let lower = headers.to_ascii_lowercase();
        if env_idx.is_none() && lower.contains("application/xml") {
            env_idx = Some(i);
            continue;
        }
        if acl_idx.is_none() && lower.contains("text/plain") {
            acl_idx = Some(i);
        }
    }

    // Sniff payloads
    for (i, (_, body)) in parts.iter().enumerate() {
        if env_idx.is_none() && looks_like_envelope(body) {
            env_idx = Some(i);
            continue;
        }
        if acl_idx.is_none() && looks_like_acl(body) {
            acl_idx = Some(i);
        }
    }

    // Positional fallback: first part is the envelope, ACL is the last
    // part that is not it
    let env_idx = env_idx.unwrap_or(0);
    let acl_idx = acl_idx.unwrap_or_else(|| {
        (0..parts.len())
            .rev()
            .find(|&i| i != env_idx)
            .unwrap_or(parts.len() - 1)
    });

    let mut env_txt = parts[env_idx].1.trim().to_string();
    let mut acl_txt = parts[acl_idx].1.trim().to_string();

    // Sanity swap when the two ended up inverted
    if !looks_like_acl(&acl_txt) && looks_like_envelope(&acl_txt) && looks_like_acl(&env_txt) {
        std::mem::swap(&mut env_txt, &mut acl_txt);
    }

    Ok((env_txt, acl_txt))
}

/// Split on boundary markers into `(headers, payload)` pairs without
/// interpreting any header beyond its text
fn split_parts(text: &str, boundary: &str) -> Vec<(String, String)> {
    let marker = format!("--{boundary}");
    let mut parts = Vec::new();

    for chunk in text.trim().split(marker.as_str()) {
        let mut chunk = chunk.trim();
        if chunk.is_empty() || chunk == "--" {
            continue;
        }
        // Remnant of the final marker directly before an epilogue
        if let Some(rest) = chunk.strip_prefix("--") {
            chunk = rest.trim_start();
        }

        let (headers, payload) = if let Some(split) = chunk.split_once("\r\n\r\n") {
            split
        } else if let Some(split) = chunk.split_once("\n\n") {
            split
        } else {
            ("", chunk)
        };
        parts.push((
            headers.to_string(),
            payload.trim_end_matches(['\r', '\n']).to_string(),
        ));
    }

    parts
}

fn looks_like_envelope(body: &str) -> bool {
    body.trim_start().starts_with("<?xml")
}

fn looks_like_acl(body: &str) -> bool {
    body.trim_start().starts_with('(')
}
