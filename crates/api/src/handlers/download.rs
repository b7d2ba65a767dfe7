//! Handler for `GET /download-proxy`.
//!
//! Streams a remote file back to the browser as an attachment, so the
//! frontend can save provider-hosted models despite cross-origin rules.
//! Targets on private, loopback or link-local addresses are refused unless
//! `DOWNLOAD_PROXY_ALLOW_PRIVATE` is set.

use std::net::IpAddr;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use manara_core::error::CoreError;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Fallback attachment name.
pub const DEFAULT_DOWNLOAD_NAME: &str = "download";

const MAX_FILENAME_CHARS: usize = 128;

const MAX_REDIRECTS: usize = 5;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub url: String,
    #[serde(default)]
    pub filename: Option<String>,
}

/// Reduce a client- or URL-supplied name to a safe attachment filename.
///
/// Keeps ASCII alphanumerics, `.`, `-`, `_` and spaces; everything else
/// becomes `_`. Leading dots are stripped so the result is never hidden or
/// a relative path component.
pub fn sanitize_filename(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILENAME_CHARS)
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').trim();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        DEFAULT_DOWNLOAD_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Whether `ip` is an address the proxy must not reach: loopback, private,
/// link-local, unspecified, broadcast or IPv6 unique-local.
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_private_ip(IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
    }
}

/// Parse a URL host that is an IP literal, with or without IPv6 brackets.
fn ip_literal(host: &str) -> Option<IpAddr> {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()
}

/// A host that is obviously local without resolving it.
fn is_private_literal(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost") || ip_literal(host).is_some_and(is_private_ip)
}

/// HTTP client for the download proxy.
///
/// Redirects are followed up to a limit, but never onto a literal private
/// address unless `allow_private` is set.
pub fn proxy_client(allow_private: bool) -> reqwest::Result<reqwest::Client> {
    let policy = reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        let private = attempt.url().host_str().is_some_and(is_private_literal);
        if private && !allow_private {
            tracing::warn!(url = %attempt.url(), "Refusing redirect to a private address");
            attempt.stop()
        } else {
            attempt.follow()
        }
    });
    reqwest::Client::builder().redirect(policy).build()
}

/// Reject `url` when its host is, or resolves to, a private address.
async fn ensure_public_target(url: &reqwest::Url) -> AppResult<()> {
    let host = url
        .host_str()
        .ok_or_else(|| AppError::BadRequest("url has no host".into()))?;
    let addrs: Vec<IpAddr> = match ip_literal(host) {
        Some(ip) => vec![ip],
        None => {
            let port = url.port_or_known_default().unwrap_or(80);
            tokio::net::lookup_host((host, port))
                .await
                .map_err(|e| {
                    tracing::warn!(host, error = %e, "Download proxy could not resolve host");
                    CoreError::Download(format!("Could not resolve {host}: {e}"))
                })?
                .map(|addr| addr.ip())
                .collect()
        }
    };

    if host.eq_ignore_ascii_case("localhost") || addrs.into_iter().any(is_private_ip) {
        tracing::warn!(url = %url, "Download proxy refused a private address");
        return Err(AppError::BadRequest(
            "Refusing to proxy to a private address".into(),
        ));
    }
    Ok(())
}

/// GET /download-proxy?url=&filename=
pub async fn download_proxy(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> AppResult<Response> {
    let url = reqwest::Url::parse(&query.url)
        .map_err(|e| AppError::BadRequest(format!("Invalid url: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::BadRequest(
            "Only http and https URLs can be proxied".into(),
        ));
    }
    if !state.config.proxy_allow_private {
        ensure_public_target(&url).await?;
    }

    let requested = query.filename.as_deref().filter(|f| !f.trim().is_empty());
    let fallback = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or(DEFAULT_DOWNLOAD_NAME)
        .to_string();
    let filename = sanitize_filename(requested.unwrap_or(&fallback));

    let response = state
        .http
        .get(url.clone())
        .timeout(state.config.storage.download_timeout)
        .send()
        .await
        .map_err(|e| {
            tracing::warn!(url = %url, error = %e, "Download proxy request failed");
            CoreError::Download(format!("Proxy request failed: {e}"))
        })?;

    let status = response.status();
    if !status.is_success() {
        tracing::warn!(url = %url, %status, "Download proxy upstream rejected request");
        return Err(CoreError::Download(format!("Upstream returned {status}")).into());
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    Ok((
        [
            (CONTENT_TYPE, content_type),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        Body::from_stream(response.bytes_stream()),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_safe_names() {
        assert_eq!(sanitize_filename("living-room_v2.glb"), "living-room_v2.glb");
        assert_eq!(sanitize_filename("My Model.glb"), "My Model.glb");
    }

    #[test]
    fn replaces_unsafe_characters() {
        assert_eq!(sanitize_filename("a\"b;c.glb"), "a_b_c.glb");
        assert_eq!(sanitize_filename("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_filename("salle à manger.glb"), "salle _ manger.glb");
    }

    #[test]
    fn empty_or_hidden_names_fall_back() {
        assert_eq!(sanitize_filename(""), DEFAULT_DOWNLOAD_NAME);
        assert_eq!(sanitize_filename("..."), DEFAULT_DOWNLOAD_NAME);
        assert_eq!(sanitize_filename("/"), DEFAULT_DOWNLOAD_NAME);
        assert_eq!(sanitize_filename(".env"), "env");
    }

    #[test]
    fn private_addresses_are_detected() {
        for ip in [
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.1",
            "192.168.1.10",
            "169.254.169.254",
            "0.0.0.0",
            "::1",
            "::",
            "fd00::1",
            "fe80::1",
            "::ffff:127.0.0.1",
        ] {
            assert!(is_private_ip(ip.parse().unwrap()), "{ip} should be private");
        }
    }

    #[test]
    fn public_addresses_are_allowed() {
        for ip in ["8.8.8.8", "151.101.1.69", "2606:4700::1111"] {
            assert!(!is_private_ip(ip.parse().unwrap()), "{ip} should be public");
        }
    }

    #[test]
    fn bracketed_and_named_local_hosts_are_private_literals() {
        assert!(is_private_literal("[::1]"));
        assert!(is_private_literal("LOCALHOST"));
        assert!(is_private_literal("127.0.0.1"));
        assert!(!is_private_literal("cdn.example.com"));
    }

    #[tokio::test]
    async fn loopback_target_is_refused() {
        let url = reqwest::Url::parse("http://127.0.0.1:9/model.glb").unwrap();

        let err = ensure_public_target(&url).await.unwrap_err();

        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn long_names_are_truncated() {
        assert_eq!(sanitize_filename(&"x".repeat(500)).len(), MAX_FILENAME_CHARS);
    }
}
