//! Proxmox VE API client.
//!
//! Ticket based: one `POST /access/ticket` at connect time, then every
//! request carries the `PVEAuthCookie`, and POSTs also carry the CSRF
//! token. Tickets expire after two hours, so a ticket older than an hour is
//! renewed before the next cycle. Only the handful of endpoints a balancing
//! cycle needs are wrapped.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::cluster::types::{ClusterSnapshot, MigrationRequest, NodeMetrics, VmMetrics};
use crate::cluster::ClusterApi;
use crate::config::ProxmoxSettings;
use crate::errors::{BalancerResult, ConnectivityError, MigrationError};

const DEFAULT_PORT: u16 = 8006;
const CSRF_HEADER: &str = "csrfpreventiontoken";
const TICKET_RENEW_AFTER: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Ticket {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf_token: String,
}

struct Session {
    headers: HeaderMap,
    issued_at: Instant,
}

pub struct ProxmoxClient {
    http: reqwest::Client,
    base_url: String,
    host: String,
    settings: ProxmoxSettings,
    session: RwLock<Session>,
}

impl ProxmoxClient {
    /// Open a session against the configured API host.
    pub async fn connect(settings: &ProxmoxSettings) -> BalancerResult<Self> {
        let host = settings.api_host.trim().to_string();
        let timeout = Duration::from_secs(settings.timeout_secs);
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!settings.verify_ssl)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| classify(&host, &e))?;
        let base_url = api_base_url(&host);

        let headers = login(&http, &base_url, &host, settings).await?;
        info!(host = %host, user = %settings.api_user, "connected to Proxmox API");
        Ok(Self {
            http,
            base_url,
            host,
            settings: settings.clone(),
            session: RwLock::new(Session {
                headers,
                issued_at: Instant::now(),
            }),
        })
    }

    async fn session_headers(&self) -> HeaderMap {
        self.session.read().await.headers.clone()
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ConnectivityError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .headers(self.session_headers().await)
            .send()
            .await
            .map_err(|e| classify(&self.host, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectivityError::Api {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        let body: ApiResponse<T> = response.json().await.map_err(|e| classify(&self.host, &e))?;
        Ok(body.data)
    }
}

#[async_trait]
impl ClusterApi for ProxmoxClient {
    async fn refresh_session(&self) -> BalancerResult<()> {
        let issued_at = self.session.read().await.issued_at;
        if !ticket_is_stale(issued_at, Instant::now()) {
            return Ok(());
        }
        let headers = login(&self.http, &self.base_url, &self.host, &self.settings).await?;
        let mut session = self.session.write().await;
        session.headers = headers;
        session.issued_at = Instant::now();
        debug!(host = %self.host, "renewed API ticket");
        Ok(())
    }

    async fn snapshot(&self) -> BalancerResult<ClusterSnapshot> {
        let nodes: Vec<NodeMetrics> = self.get("/nodes").await?;
        let mut vms = Vec::new();

        for node in nodes.iter().filter(|n| n.is_online()) {
            let guests: Vec<VmMetrics> = self.get(&format!("/nodes/{}/qemu", node.node)).await?;
            debug!(node = %node.node, guests = guests.len(), "fetched guests");
            vms.extend(guests.into_iter().map(|mut vm| {
                vm.node = node.node.clone();
                vm
            }));
        }

        Ok(ClusterSnapshot { nodes, vms })
    }

    async fn migrate(&self, request: &MigrationRequest) -> Result<String, MigrationError> {
        let vmid = request.vmid;
        let url = format!("{}/nodes/{}/qemu/{}/migrate", self.base_url, request.origin, vmid);
        let online = if request.online { "1" } else { "0" };

        let response = self
            .http
            .post(url)
            .headers(self.session_headers().await)
            .form(&[("target", request.target.as_str()), ("online", online)])
            .send()
            .await
            .map_err(|e| MigrationError::Transport {
                vmid,
                message: error_chain(&e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(MigrationError::Rejected {
                vmid,
                status: status.as_u16(),
                message,
            });
        }

        let body: ApiResponse<String> = response.json().await.map_err(|e| MigrationError::Transport {
            vmid,
            message: error_chain(&e),
        })?;
        Ok(body.data)
    }
}

/// `POST /access/ticket` and turn the ticket into request headers.
async fn login(
    http: &reqwest::Client,
    base_url: &str,
    host: &str,
    settings: &ProxmoxSettings,
) -> BalancerResult<HeaderMap> {
    let path = "/access/ticket";
    let response = http
        .post(format!("{base_url}{path}"))
        .form(&[
            ("username", settings.api_user.as_str()),
            ("password", settings.api_pass.as_str()),
        ])
        .send()
        .await
        .map_err(|e| classify(host, &e))?;

    match response.status() {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            return Err(ConnectivityError::Authentication {
                user: settings.api_user.clone(),
            }
            .into());
        }
        status if !status.is_success() => {
            return Err(ConnectivityError::Api {
                status: status.as_u16(),
                path: path.to_string(),
            }
            .into());
        }
        _ => {}
    }

    let ticket: ApiResponse<Ticket> = response.json().await.map_err(|e| classify(host, &e))?;
    let headers = auth_headers(&ticket.data).map_err(|message| ConnectivityError::Transport {
        host: host.to_string(),
        message,
    })?;
    Ok(headers)
}

/// Tickets live for two hours; renew well before that.
fn ticket_is_stale(issued_at: Instant, now: Instant) -> bool {
    now.saturating_duration_since(issued_at) >= TICKET_RENEW_AFTER
}

fn auth_headers(ticket: &Ticket) -> Result<HeaderMap, String> {
    let mut headers = HeaderMap::new();
    let cookie = HeaderValue::from_str(&format!("PVEAuthCookie={}", ticket.ticket)).map_err(|e| e.to_string())?;
    let csrf = HeaderValue::from_str(&ticket.csrf_token).map_err(|e| e.to_string())?;
    headers.insert(COOKIE, cookie);
    headers.insert(CSRF_HEADER, csrf);
    Ok(headers)
}

/// `https://<host>[:8006]/api2/json`, adding the default port when the
/// configured host has none.
fn api_base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    let has_port = match host.rsplit_once(':') {
        Some((name, port)) => {
            !port.is_empty()
                && port.chars().all(|c| c.is_ascii_digit())
                && (!name.contains(':') || name.ends_with(']'))
        }
        None => false,
    };

    if has_port {
        format!("https://{host}/api2/json")
    } else if host.contains(':') && !host.starts_with('[') {
        // bare IPv6 literal
        format!("https://[{host}]:{DEFAULT_PORT}/api2/json")
    } else {
        format!("https://{host}:{DEFAULT_PORT}/api2/json")
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

fn classify(host: &str, err: &reqwest::Error) -> ConnectivityError {
    classify_message(host, &error_chain(err), err.is_timeout())
}

fn classify_message(host: &str, message: &str, timed_out: bool) -> ConnectivityError {
    let host = host.to_string();
    if timed_out {
        return ConnectivityError::Timeout { host };
    }
    let lower = message.to_ascii_lowercase();
    let message = message.to_string();
    if lower.contains("dns error")
        || lower.contains("failed to lookup address")
        || lower.contains("name or service not known")
        || lower.contains("no such host")
    {
        ConnectivityError::NameResolution { host, message }
    } else if lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl") {
        ConnectivityError::Tls { host, message }
    } else {
        ConnectivityError::Transport { host, message }
    }
}
