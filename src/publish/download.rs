//! Fetches a caller-supplied `video_url` for platforms that need the bytes.
//!
//! Downloads are capped at `video_download_max_bytes`, checked against
//! `Content-Length` first and then while streaming. Unless private hosts are
//! allowed, literal private addresses are refused up front and hostnames are
//! resolved through [`PublicOnlyResolver`], which also covers redirects.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect;
use tracing::warn;
use url::{Host, Url};

use super::PublishError;
use crate::config::AppConfig;

const MAX_REDIRECTS: usize = 10;
const DOWNLOAD_FAILED: &str = "video_url could not be downloaded";
const PRIVATE_HOST: &str = "video_url must point to a publicly reachable host";

/// Whether `ip` is loopback, private, link-local or otherwise not routable
/// on the public internet.
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_v4(&mapped);
            }
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00) == 0xfc00 // fc00::/7 unique local
                || (v6.segments()[0] & 0xffc0) == 0xfe80 // fe80::/10 link-local
        }
    }
}

fn is_private_v4(v4: &Ipv4Addr) -> bool {
    let [a, b, ..] = v4.octets();
    v4.is_private()
        || v4.is_loopback()
        || v4.is_link_local()
        || v4.is_broadcast()
        || v4.is_unspecified()
        || v4.is_documentation()
        || a == 0
        || (a == 100 && (64..128).contains(&b)) // 100.64.0.0/10 shared
}

fn literal_host_is_private(url: &Url) -> bool {
    match url.host() {
        Some(Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(Host::Domain(_)) => false,
        None => true,
    }
}

/// DNS resolver that drops private addresses from every lookup
#[derive(Debug, Default)]
pub struct PublicOnlyResolver;

impl Resolve for PublicOnlyResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_string();
        Box::pin(async move {
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
                .await
                .map_err(|err| -> Box<dyn std::error::Error + Send + Sync> { Box::new(err) })?
                .filter(|addr| {
                    let private = is_private_ip(&addr.ip());
                    if private {
                        warn!(%host, ip = %addr.ip(), "Refusing private address for video download");
                    }
                    !private
                })
                .collect();

            if addrs.is_empty() {
                let err: Box<dyn std::error::Error + Send + Sync> =
                    format!("{host} resolves only to private addresses").into();
                return Err(err);
            }
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok(addrs)
        })
    }
}

/// A fully buffered video
#[derive(Debug)]
pub struct DownloadedVideo {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Clone)]
pub struct VideoDownloader {
    client: reqwest::Client,
    max_bytes: u64,
    idle_timeout: Duration,
    allow_private: bool,
}

impl VideoDownloader {
    pub fn new(config: &AppConfig) -> Self {
        let allow_private = config.allow_private_video_hosts;
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.http_timeout())
            .user_agent(concat!("publisher/", env!("CARGO_PKG_VERSION")));

        if allow_private {
            builder = builder.redirect(redirect::Policy::limited(MAX_REDIRECTS));
        } else {
            builder = builder
                .dns_resolver(Arc::new(PublicOnlyResolver))
                .redirect(redirect::Policy::custom(|attempt| {
                    if attempt.previous().len() >= MAX_REDIRECTS {
                        attempt.error("too many redirects")
                    } else if literal_host_is_private(attempt.url()) {
                        attempt.stop()
                    } else {
                        attempt.follow()
                    }
                }));
        }

        let client = builder.build().unwrap_or_else(|err| {
            warn!(error = %err, "Falling back to default HTTP client for video downloads");
            reqwest::Client::new()
        });

        Self {
            client,
            max_bytes: config.video_download_max_bytes,
            idle_timeout: config.http_timeout(),
            allow_private,
        }
    }

    /// Downloads `video_url` into memory.
    ///
    /// Every failure is a [`PublishError::Validation`] with a fixed message;
    /// transport details are logged only.
    pub async fn download(&self, video_url: &str) -> Result<DownloadedVideo, PublishError> {
        let url = Url::parse(video_url)
            .map_err(|_| PublishError::Validation(DOWNLOAD_FAILED.to_string()))?;
        if !self.allow_private && literal_host_is_private(&url) {
            warn!(host = ?url.host_str(), "Refusing video_url on a private address");
            return Err(PublishError::Validation(PRIVATE_HOST.to_string()));
        }

        let mut response = self.client.get(url).send().await.map_err(|err| {
            warn!(error = %err, "Video download request failed");
            PublishError::Validation(DOWNLOAD_FAILED.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Video download returned a non-success status");
            return Err(PublishError::Validation(format!(
                "{DOWNLOAD_FAILED} (HTTP {})",
                status.as_u16()
            )));
        }

        if let Some(length) = response.content_length()
            && length > self.max_bytes
        {
            return Err(self.too_large());
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .filter(|value| value.starts_with("video/"))
            .unwrap_or("video/*")
            .to_string();

        let mut bytes = Vec::new();
        loop {
            let chunk = tokio::time::timeout(self.idle_timeout, response.chunk())
                .await
                .map_err(|_| {
                    warn!("Video download stalled");
                    PublishError::Validation(DOWNLOAD_FAILED.to_string())
                })?
                .map_err(|err| {
                    warn!(error = %err, "Video download body failed");
                    PublishError::Validation(DOWNLOAD_FAILED.to_string())
                })?;
            let Some(chunk) = chunk else {
                break;
            };
            if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(self.too_large());
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(DownloadedVideo {
            bytes,
            content_type,
        })
    }

    fn too_large(&self) -> PublishError {
        PublishError::Validation(format!(
            "video_url exceeds the {} byte download limit",
            self.max_bytes
        ))
    }
}
