//! Diagram text encoding for the render server URL scheme.
//!
//! The server addresses diagrams by a token embedded in the URL path:
//! `{base}/{format}/{token}`. The token is the raw-DEFLATE compression of the
//! source text re-encoded with the server's own base-64 variant (alphabet
//! `0-9 A-Z a-z - _`, no padding). This is the PlantUML wire convention, not
//! RFC 4648 base64, so the alphabet mapping is spelled out here.

use std::io::Write;

use flate2::Compression;
use flate2::write::DeflateEncoder;
use thiserror::Error;
use url::Url;

use crate::domain::{DiagramSource, ImageFormat};

const ENCODE_ALPHABET: &[u8; 64] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz-_";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid render server configuration: {reason}")]
    InvalidConfiguration { reason: String },
    #[error("failed to compress diagram source: {0}")]
    Compression(#[from] std::io::Error),
}

impl CodecError {
    pub(crate) fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}

/// Encode diagram source text into a URL-safe render token.
///
/// Deterministic and pure: the same input always yields the same token,
/// which the cache and URL-based sharing both rely on.
pub fn encode(source: &DiagramSource) -> Result<String, CodecError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(source.as_str().as_bytes())?;
    let deflated = encoder.finish()?;
    Ok(encode64(&deflated))
}

/// Compose the image-fetch URL for a diagram.
///
/// Pure string composition; fails with `InvalidConfiguration` when the base
/// is empty or not a valid absolute URL.
pub fn build_url(
    base: &str,
    source: &DiagramSource,
    format: ImageFormat,
) -> Result<Url, CodecError> {
    let trimmed = base.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(CodecError::invalid_configuration(
            "server base URL is empty",
        ));
    }

    let token = encode(source)?;
    let composed = format!("{trimmed}/{}/{token}", format.path_segment());
    Url::parse(&composed).map_err(|err| {
        CodecError::invalid_configuration(format!("cannot parse `{composed}`: {err}"))
    })
}

fn encode64(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);
    for chunk in data.chunks(3) {
        let b1 = chunk[0];
        let b2 = chunk.get(1).copied().unwrap_or(0);
        let b3 = chunk.get(2).copied().unwrap_or(0);
        out.push(encode6(b1 >> 2));
        out.push(encode6(((b1 & 0x03) << 4) | (b2 >> 4)));
        out.push(encode6(((b2 & 0x0F) << 2) | (b3 >> 6)));
        out.push(encode6(b3 & 0x3F));
    }
    out
}

fn encode6(bits: u8) -> char {
    ENCODE_ALPHABET[(bits & 0x3F) as usize] as char
}
