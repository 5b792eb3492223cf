use reqwest::Url;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{Result, VibifyError};

const SUCCESS_PAGE: &str =
    "<html><body><h1>Login complete! You can close this tab now.</h1></body></html>";
const FAILURE_PAGE: &str =
    "<html><body><h1>Login failed. You can close this tab and try again.</h1></body></html>";

/// Upper bound on the request head we are willing to read
const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Query parameters carried by the OAuth redirect
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

impl CallbackParams {
    /// Extract the OAuth parameters from a request target such as
    /// `/callback?code=abc&state=xyz`
    pub fn from_request_target(target: &str) -> Self {
        let mut params = Self::default();
        let url = if target.starts_with('/') {
            Url::parse(&format!("http://localhost{}", target))
        } else {
            Url::parse(target)
        };
        let Ok(url) = url else {
            return params;
        };

        for (key, value) in url.query_pairs() {
            let value = value.into_owned();
            match key.as_ref() {
                "code" if params.code.is_none() => params.code = Some(value),
                "state" if params.state.is_none() => params.state = Some(value),
                "error" if params.error.is_none() => params.error = Some(value),
                _ => {}
            }
        }

        params
    }

    /// Turn the parameters into the authorization code, checking the state
    /// value when one is expected
    pub fn into_code(self, expected_state: Option<&str>) -> Result<String> {
        if let Some(error) = self.error {
            return Err(VibifyError::CallbackError(format!(
                "Authorization was denied: {}",
                error
            )));
        }

        if let Some(expected) = expected_state {
            if self.state.as_deref() != Some(expected) {
                return Err(VibifyError::CallbackError(
                    "State parameter does not match the authorization request".to_string(),
                ));
            }
        }

        self.code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| VibifyError::CallbackError("Login failed, no code received".to_string()))
    }
}

/// One-shot HTTP listener for the OAuth redirect
pub struct CallbackListener {
    listener: TcpListener,
}

impl CallbackListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// Bind the host and port named by the redirect URI
    pub async fn for_redirect_uri(redirect_uri: &str) -> Result<Self> {
        let url = Url::parse(redirect_uri).map_err(|e| {
            VibifyError::CallbackError(format!("Invalid redirect URI {}: {}", redirect_uri, e))
        })?;
        let host = url.host_str().ok_or_else(|| {
            VibifyError::CallbackError(format!("Redirect URI {} has no host", redirect_uri))
        })?;
        let port = url.port_or_known_default().unwrap_or(8888);

        let addr = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| {
                VibifyError::CallbackError(format!("Could not resolve {}:{}", host, port))
            })?;

        let listener = Self::bind(addr).await.map_err(|e| {
            VibifyError::CallbackError(format!("Failed to listen on {}: {}", addr, e))
        })?;
        log::info!("Waiting for Spotify redirect on {}", addr);

        Ok(listener)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept exactly one request, answer it and return the authorization
    /// code. `timeout` covers the whole exchange, including reading the
    /// request. The listener is closed when this returns.
    pub async fn wait_for_code(
        self,
        expected_state: Option<&str>,
        timeout: Duration,
    ) -> Result<String> {
        tokio::time::timeout(timeout, accept_one(&self.listener, expected_state))
            .await
            .map_err(|_| {
                VibifyError::CallbackError(format!(
                    "No redirect received within {} seconds",
                    timeout.as_secs()
                ))
            })?
    }
}

async fn accept_one(listener: &TcpListener, expected_state: Option<&str>) -> Result<String> {
    let (stream, peer) = listener.accept().await?;
    log::debug!("Accepted OAuth redirect from {}", peer);
    handle_redirect(stream, expected_state).await
}

async fn handle_redirect(stream: TcpStream, expected_state: Option<&str>) -> Result<String> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    // Drain the headers so the browser sees a clean response
    let mut head_len = request_line.len();
    loop {
        let mut header = String::new();
        let n = reader.read_line(&mut header).await?;
        head_len += n;
        if n == 0 || header == "\r\n" || header == "\n" || head_len > MAX_HEAD_BYTES {
            break;
        }
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();

    let result = if method.eq_ignore_ascii_case("GET") {
        CallbackParams::from_request_target(target).into_code(expected_state)
    } else {
        Err(VibifyError::CallbackError(format!(
            "Unexpected {} request on the callback listener",
            method
        )))
    };

    let body = if result.is_ok() { SUCCESS_PAGE } else { FAILURE_PAGE };
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );

    let mut stream = reader.into_inner();
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        log::warn!("Failed to answer OAuth redirect: {}", e);
    }
    let _ = stream.shutdown().await;

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_extracts_code() {
        let params = CallbackParams::from_request_target("/callback?code=AQB%2Fxyz&state=s1");
        assert_eq!(params.code.as_deref(), Some("AQB/xyz"));
        assert_eq!(params.state.as_deref(), Some("s1"));
        assert_eq!(params.into_code(Some("s1")).unwrap(), "AQB/xyz");
    }

    #[test]
    fn test_root_path_without_state() {
        let params = CallbackParams::from_request_target("/?code=abc");
        assert_eq!(params.into_code(None).unwrap(), "abc");
    }

    #[test]
    fn test_missing_code() {
        let params = CallbackParams::from_request_target("/favicon.ico");
        assert_eq!(params, CallbackParams::default());
        assert!(params.into_code(None).is_err());
    }

    #[test]
    fn test_denied_authorization() {
        let params = CallbackParams::from_request_target("/callback?error=access_denied&state=s1");
        let err = params.into_code(Some("s1")).unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }

    #[test]
    fn test_state_mismatch() {
        let params = CallbackParams::from_request_target("/callback?code=abc&state=other");
        assert!(params.into_code(Some("s1")).is_err());
    }

    async fn send_request(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_listener_captures_one_redirect() {
        let listener = CallbackListener::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let wait = tokio::spawn(async move {
            listener
                .wait_for_code(Some("s1"), Duration::from_secs(5))
                .await
        });

        let response = send_request(
            addr,
            "GET /callback?code=the-code&state=s1 HTTP/1.1\r\nHost: localhost\r\n\r\n",
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("Login complete!"));
        assert_eq!(wait.await.unwrap().unwrap(), "the-code");

        // The listener is gone after the first request
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_listener_reports_failure_page() {
        let listener = CallbackListener::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let wait = tokio::spawn(async move {
            listener.wait_for_code(None, Duration::from_secs(5)).await
        });

        let response = send_request(addr, "GET /?error=access_denied HTTP/1.1\r\n\r\n").await;

        assert!(response.contains("Login failed"));
        assert!(wait.await.unwrap().is_err());
    }

    #[test]
    fn test_plus_and_fragment() {
        let params = CallbackParams::from_request_target("/callback?error=user+denied#frag");
        assert_eq!(params.error.as_deref(), Some("user denied"));
        assert_eq!(params.code, None);
    }

    #[tokio::test]
    async fn test_idle_connection_does_not_outlive_timeout() {
        let listener = CallbackListener::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        // Connected but silent, like a browser preconnect
        let _idle = TcpStream::connect(addr).await.unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(3),
            listener.wait_for_code(None, Duration::from_millis(200)),
        )
        .await
        .expect("wait_for_code ignored its own timeout");
        assert!(matches!(result, Err(VibifyError::CallbackError(_))));
    }

    #[tokio::test]
    async fn test_listener_times_out() {
        let listener = CallbackListener::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let result = listener
            .wait_for_code(None, Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(VibifyError::CallbackError(_))));
    }
}
