use std::fmt;
use std::thread;
use std::time::Duration;

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use reqwest::Method;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::RegistryError;

const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn put(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self::new(Method::PUT, url).body(body)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

// The wire underneath the HTTP backends. `send` only fails when no
// response was obtained; status codes are left to the caller.
pub trait Transport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, RegistryError>;
}

pub struct ReqwestTransport {
    client: Client,
    credentials: Option<Credentials>,
    label: String,
}

impl ReqwestTransport {
    pub fn new(label: impl Into<String>, credentials: Option<Credentials>) -> Result<Self, RegistryError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("binreg/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RegistryError::Configuration(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| RegistryError::Configuration(err.to_string()))?;
        Ok(Self {
            client,
            credentials,
            label: label.into(),
        })
    }

    fn build(&self, request: &HttpRequest) -> reqwest::blocking::RequestBuilder {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        if let Some(credentials) = &self.credentials {
            builder = builder.basic_auth(&credentials.username, credentials.password.as_ref());
        }
        builder
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, RegistryError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(RegistryError::connection(&self.label, err.to_string()));
                }
            }
        }
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, RegistryError> {
        tracing::debug!(method = %request.method, url = %request.url, "http request");
        let response = self.send_with_retries(|| self.build(request))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|err| RegistryError::connection(&self.label, err.to_string()))?;
        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

pub fn check_status(
    label: &str,
    what: &str,
    response: HttpResponse,
) -> Result<HttpResponse, RegistryError> {
    match response.status {
        status if (200..300).contains(&status) => Ok(response),
        404 => Err(RegistryError::NotFound(what.to_string())),
        401 | 403 => Err(RegistryError::connection(
            label,
            format!("authentication rejected ({}) for {what}", response.status),
        )),
        status => Err(RegistryError::connection(
            label,
            format!("{what} returned status {status}: {}", truncate(&response.text())),
        )),
    }
}

pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

pub fn decode_segment(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

pub fn join_url(base: &str, segments: &[String]) -> String {
    let mut url = base.trim_end_matches('/').to_string();
    for segment in segments.iter().filter(|segment| !segment.is_empty()) {
        url.push('/');
        url.push_str(&encode_segment(segment));
    }
    url
}

pub fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

fn truncate(message: &str) -> String {
    const LIMIT: usize = 200;
    if message.chars().count() <= LIMIT {
        return message.trim().to_string();
    }
    let cut: String = message.chars().take(LIMIT).collect();
    format!("{}...", cut.trim())
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
