use crate::config::TransportConfig;
use crate::constants::{browser, network};
use crate::errors::BridgeError;
use crate::services::credentials::Credential;
use crate::services::logger::Logger;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, CONTENT_TYPE, COOKIE,
    RETRY_AFTER,
};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;

/// Browser identity presented on the wire. rustls cannot reproduce a
/// browser ClientHello byte for byte, so a profile pins the TLS floor and
/// the HTTP-level identity (UA, language, client hints).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserProfile {
    Chrome,
    Firefox,
    Safari,
    Edge,
}

impl BrowserProfile {
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        match raw.trim().to_lowercase().as_str() {
            "chrome" => Ok(BrowserProfile::Chrome),
            "firefox" => Ok(BrowserProfile::Firefox),
            "safari" => Ok(BrowserProfile::Safari),
            "edge" => Ok(BrowserProfile::Edge),
            other => Err(BridgeError::configuration(format!(
                "unknown TLS fingerprint profile '{}'",
                other
            ))
            .with_hint("Use one of: chrome, firefox, safari, edge.")),
        }
    }

    pub fn user_agent(self) -> &'static str {
        match self {
            BrowserProfile::Chrome => browser::CHROME_USER_AGENT,
            BrowserProfile::Firefox => browser::FIREFOX_USER_AGENT,
            BrowserProfile::Safari => browser::SAFARI_USER_AGENT,
            BrowserProfile::Edge => browser::EDGE_USER_AGENT,
        }
    }

    fn client_hints(self) -> &'static [(&'static str, &'static str)] {
        match self {
            BrowserProfile::Chrome => &[
                (
                    "sec-ch-ua",
                    "\"Chromium\";v=\"136\", \"Google Chrome\";v=\"136\", \"Not.A/Brand\";v=\"99\"",
                ),
                ("sec-ch-ua-mobile", "?0"),
                ("sec-ch-ua-platform", "\"Windows\""),
            ],
            BrowserProfile::Edge => &[
                (
                    "sec-ch-ua",
                    "\"Chromium\";v=\"136\", \"Microsoft Edge\";v=\"136\", \"Not.A/Brand\";v=\"99\"",
                ),
                ("sec-ch-ua-mobile", "?0"),
                ("sec-ch-ua-platform", "\"Windows\""),
            ],
            BrowserProfile::Firefox | BrowserProfile::Safari => &[],
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl RawResponse {
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    user_agent: String,
    profile: Option<BrowserProfile>,
    logger: Logger,
}

/// The xoxd value is usually copied already percent-encoded from the
/// browser; only raw values are encoded here.
pub fn session_cookie_header(cookie: &str) -> String {
    let value = if cookie.contains('%') {
        cookie.to_string()
    } else {
        url::form_urlencoded::byte_serialize(cookie.as_bytes()).collect::<String>()
    };
    format!("{}={}", browser::SESSION_COOKIE_NAME, value)
}

fn header_value(raw: &str, what: &str) -> Result<HeaderValue, BridgeError> {
    HeaderValue::from_str(raw)
        .map_err(|_| BridgeError::configuration(format!("{} contains characters not allowed in a header", what)))
}

impl HttpTransport {
    pub fn build(config: &TransportConfig, credential: &Credential) -> Result<Self, BridgeError> {
        let profile = config
            .tls_fingerprint
            .as_deref()
            .map(BrowserProfile::parse)
            .transpose()?;
        if profile.is_some() && config.proxy_url.is_some() {
            return Err(BridgeError::configuration(
                "SLACK_MCP_PROXY_URL cannot be combined with SLACK_MCP_CUSTOM_TLS_FINGERPRINT",
            ));
        }

        let user_agent = config
            .user_agent
            .clone()
            .or_else(|| profile.map(|p| p.user_agent().to_string()))
            .unwrap_or_else(|| browser::DEFAULT_USER_AGENT.to_string());

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(browser::ACCEPT_LANGUAGE));
        if let Some(profile) = profile {
            for (name, value) in profile.client_hints().iter().copied() {
                headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
            }
        }
        if let Some(cookie) = credential.session_cookie() {
            let mut value = header_value(&session_cookie_header(cookie), "SLACK_MCP_XOXD_TOKEN")?;
            value.set_sensitive(true);
            headers.insert(COOKIE, value);
        }

        let mut builder = Client::builder()
            .use_rustls_tls()
            .user_agent(user_agent.clone())
            .default_headers(headers)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_millis(network::TIMEOUT_CONNECTION_MS))
            .pool_idle_timeout(Duration::from_millis(network::POOL_IDLE_TIMEOUT_MS));

        if profile.is_some() {
            builder = builder.min_tls_version(reqwest::tls::Version::TLS_1_2);
        }
        if let Some(path) = &config.ca_override_path {
            let pem = std::fs::read(path).map_err(|err| {
                BridgeError::configuration(format!(
                    "failed to read SLACK_MCP_CA_OVERRIDE_PATH {}: {}",
                    path.display(),
                    err
                ))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|err| {
                BridgeError::configuration(format!("invalid PEM in SLACK_MCP_CA_OVERRIDE_PATH: {}", err))
            })?;
            builder = builder.add_root_certificate(cert);
        }
        if config.insecure_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }
        builder = match &config.proxy_url {
            Some(proxy) => builder.proxy(reqwest::Proxy::all(proxy.as_str()).map_err(|err| {
                BridgeError::configuration(format!("invalid SLACK_MCP_PROXY_URL: {}", err))
            })?),
            None => builder.no_proxy(),
        };

        let client = builder
            .build()
            .map_err(|err| BridgeError::configuration(format!("failed to build HTTP client: {}", err)))?;

        let logger = Logger::new("transport");
        if config.insecure_tls {
            logger.warn("TLS certificate verification is disabled", None);
        }
        logger.debug(
            "HTTP transport ready",
            Some(&serde_json::json!({
                "profile": profile.map(|p| format!("{:?}", p).to_lowercase()),
                "proxy": config.proxy_url.is_some(),
                "credential": credential.fingerprint(),
            })),
        );

        Ok(Self {
            client,
            user_agent,
            profile,
            logger,
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn profile(&self) -> Option<BrowserProfile> {
        self.profile
    }

    pub async fn post_form(
        &self,
        url: &str,
        fields: &[(String, String)],
        bearer: Option<&str>,
    ) -> Result<RawResponse, BridgeError> {
        let body = serde_urlencoded::to_string(fields)
            .map_err(|err| BridgeError::invalid_params(format!("cannot encode form body: {}", err)))?;
        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body);
        self.send(with_bearer(request, bearer)?).await
    }

    pub async fn post_json(
        &self,
        url: &str,
        body: &Value,
        bearer: Option<&str>,
    ) -> Result<RawResponse, BridgeError> {
        let request = self.client.post(url).json(body);
        self.send(with_bearer(request, bearer)?).await
    }

    async fn send(&self, request: RequestBuilder) -> Result<RawResponse, BridgeError> {
        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        let body = String::from_utf8_lossy(&bytes).into_owned();
        if status >= 400 {
            self.logger.debug(
                "Backend returned HTTP error",
                Some(&serde_json::json!({ "status": status })),
            );
        }
        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }
}

fn with_bearer(request: RequestBuilder, bearer: Option<&str>) -> Result<RequestBuilder, BridgeError> {
    match bearer {
        None => Ok(request),
        Some(token) => {
            let mut value = header_value(&format!("Bearer {}", token), "token")?;
            value.set_sensitive(true);
            Ok(request.header(AUTHORIZATION, value))
        }
    }
}

pub fn map_reqwest_error(err: reqwest::Error) -> BridgeError {
    if err.is_timeout() {
        return BridgeError::backend_timeout("request timed out");
    }
    if err.is_connect() {
        return BridgeError::backend_unavailable("connection failed");
    }
    // Strip the URL; query strings may carry tokens.
    BridgeError::backend_unavailable(err.without_url().to_string())
}

/// Accepts delta-seconds or an HTTP date.
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
    let trimmed = raw.trim();
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = chrono::DateTime::parse_from_rfc2822(trimmed).ok()?;
    let delta = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}
