//! Chunked session-cookie transport
//!
//! Session blobs can exceed the per-cookie size browsers accept, so the
//! blob is split into bounded chunks named `__session_data_<index>` and
//! reassembled on the way back. Transport does not guarantee delivery
//! order; reconstruction sorts by numeric index before concatenating.
//!
//! No chunks at all is the normal "not logged in" case and yields
//! `None`, distinct from a corrupted signature, which the codec reports
//! as a hard failure.

use crate::constants::{COOKIE_PATH, SESSION_COOKIE_NAME};
use chrono::{DateTime, Utc};

/// Split a blob into `(index, chunk)` pairs of at most `max_chunk_size`
/// bytes each, split on character boundaries
pub fn split(blob: &str, max_chunk_size: usize) -> Vec<(usize, String)> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for ch in blob.chars() {
        if !current.is_empty() && current.len() + ch.len_utf8() > max_chunk_size {
            chunks.push(current);
            current = String::new();
        }
        current.push(ch);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks.into_iter().enumerate().collect()
}

/// Reassemble a blob from chunks delivered in arbitrary order
///
/// Returns `None` when no chunks are present - the caller is simply not
/// logged in.
pub fn reconstruct(mut chunks: Vec<(usize, String)>) -> Option<String> {
    if chunks.is_empty() {
        return None;
    }
    chunks.sort_by_key(|(index, _)| *index);
    Some(chunks.into_iter().map(|(_, chunk)| chunk).collect())
}

/// Cookie name for a chunk index; a single-chunk session uses the bare name
pub fn chunk_cookie_name(index: usize, total: usize) -> String {
    if total <= 1 {
        SESSION_COOKIE_NAME.to_string()
    } else {
        format!("{SESSION_COOKIE_NAME}_{index}")
    }
}

/// Render Set-Cookie values for a session blob, chunking when needed
///
/// All cookies are HttpOnly, SameSite=Lax, scoped to the auth path, and
/// Secure when the deployment serves HTTPS.
pub fn session_cookies(
    blob: &str,
    max_chunk_size: usize,
    expires_at: DateTime<Utc>,
    secure: bool,
) -> Vec<String> {
    let chunks = split(blob, max_chunk_size);
    let total = chunks.len();
    let secure_flag = if secure { " Secure;" } else { "" };

    chunks
        .into_iter()
        .map(|(index, chunk)| {
            format!(
                "{}={}; Path={}; Expires={}; HttpOnly;{} SameSite=Lax",
                chunk_cookie_name(index, total),
                chunk,
                COOKIE_PATH,
                expires_at.to_rfc2822(),
                secure_flag,
            )
        })
        .collect()
}

/// Render Set-Cookie values that clear the named session cookies
pub fn clear_cookies<I: IntoIterator<Item = String>>(names: I, secure: bool) -> Vec<String> {
    let secure_flag = if secure { " Secure;" } else { "" };
    names
        .into_iter()
        .map(|name| {
            format!("{name}=; Path={COOKIE_PATH}; Max-Age=0; HttpOnly;{secure_flag} SameSite=Lax")
        })
        .collect()
}

/// Extract session chunks from a Cookie request header
///
/// Accepts both the bare cookie name (index 0) and indexed chunk names.
/// Cookies that merely share the prefix without a numeric suffix are
/// ignored.
pub fn collect_session_chunks(cookie_header: &str) -> Vec<(usize, String)> {
    cookie_header
        .split(';')
        .filter_map(|part| {
            let (name, value) = part.trim().split_once('=')?;
            if name == SESSION_COOKIE_NAME {
                return Some((0, value.to_string()));
            }
            let suffix = name.strip_prefix(SESSION_COOKIE_NAME)?.strip_prefix('_')?;
            let index: usize = suffix.parse().ok()?;
            Some((index, value.to_string()))
        })
        .collect()
}

/// Names of the session cookies present in a Cookie request header,
/// used to clear exactly what the client sent
pub fn session_cookie_names(cookie_header: &str) -> Vec<String> {
    cookie_header
        .split(';')
        .filter_map(|part| {
            let (name, _) = part.trim().split_once('=')?;
            let rest = name.strip_prefix(SESSION_COOKIE_NAME)?;
            let is_chunk = rest.is_empty()
                || rest
                    .strip_prefix('_')
                    .is_some_and(|index| index.parse::<usize>().is_ok());
            is_chunk.then(|| name.to_string())
        })
        .collect()
}
