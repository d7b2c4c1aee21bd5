use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;

use certcheck_common::error::AppError;

/// Product-identifying User-Agent sent on revocation fetches
pub const USER_AGENT: &str = concat!("certcheck/", env!("CARGO_PKG_VERSION"));

/// Maximum accepted response body size (10 MB)
const MAX_RESPONSE_SIZE: u64 = 10 * 1024 * 1024;

/// Timeout-bounded HTTP operations used to fetch revocation data
pub trait HttpFetch: Send + Sync {
    /// GET a resource.
    ///
    /// Returns body on success, [`AppError::Timeout`] when timeout elapsed, otherwise it returns
    /// an error.
    fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, AppError>;

    /// POST a body.
    ///
    /// Returns response body on success, [`AppError::Timeout`] when timeout elapsed, otherwise
    /// it returns an error.
    fn post(
        &self,
        url: &str,
        content_type: &str,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, AppError>;
}

/// Blocking `reqwest` HTTP client
pub struct ReqwestHttpFetch {
    client: Client,
}

impl ReqwestHttpFetch {
    /// ReqwestHttpFetch constructor
    ///
    /// # Returns
    ///
    /// A [`Result`] containing a newly constructed [`ReqwestHttpFetch`] object.
    ///
    pub fn new() -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| {
                AppError::GenWithMsgAndErr("Failed to create HTTP client".to_string(), Box::new(err))
            })?;
        Ok(Self { client })
    }

    fn read_response(url: &str, response: Response) -> Result<Vec<u8>, AppError> {
        if !response.status().is_success() {
            return Err(AppError::General(format!(
                "Unsuccessful HTTP response: url={}, status={}",
                url,
                response.status()
            )));
        }
        if let Some(content_length) = response.content_length() {
            if content_length > MAX_RESPONSE_SIZE {
                return Err(AppError::General(format!(
                    "HTTP response too large: url={}, size={}",
                    url, content_length
                )));
            }
        }

        let body = response.bytes().map_err(|err| Self::map_error(url, err))?;
        if body.len() as u64 > MAX_RESPONSE_SIZE {
            return Err(AppError::General(format!(
                "HTTP response too large: url={}, size={}",
                url,
                body.len()
            )));
        }
        Ok(body.to_vec())
    }

    fn map_error(url: &str, err: reqwest::Error) -> AppError {
        if err.is_timeout() {
            AppError::Timeout(format!("HTTP request timed out: url={}", url))
        } else {
            AppError::GenWithMsgAndErr(format!("HTTP request failed: url={}", url), Box::new(err))
        }
    }
}

impl HttpFetch for ReqwestHttpFetch {
    fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, AppError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .map_err(|err| Self::map_error(url, err))?;
        Self::read_response(url, response)
    }

    fn post(
        &self,
        url: &str,
        content_type: &str,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, AppError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .timeout(timeout)
            .send()
            .map_err(|err| Self::map_error(url, err))?;
        Self::read_response(url, response)
    }
}

/// Unit tests
#[cfg(test)]
pub mod tests {

    use super::*;
    use mockall::mock;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    // mocks
    // =====

    mock! {
        pub HttpFetcher {}
        impl HttpFetch for HttpFetcher {
            fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, AppError>;
            fn post(&self, url: &str, content_type: &str, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, AppError>;
        }
    }

    // utils
    // =====

    /// Serve a single HTTP connection, returning the raw request received
    fn serve_once(response: &'static [u8], delay: Duration) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/resource", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = vec![0u8; 4096];
            let request_len = stream.read(&mut request).unwrap();
            thread::sleep(delay);
            let _ = stream.write_all(response);
            String::from_utf8_lossy(&request[..request_len]).to_string()
        });
        (url, handle)
    }

    // tests
    // =====

    #[test]
    fn reqwesthttpfetch_get_when_successful() {
        let (url, server) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\nConnection: close\r\n\r\nabc",
            Duration::ZERO,
        );

        let body = ReqwestHttpFetch::new()
            .unwrap()
            .get(&url, Duration::from_secs(5))
            .unwrap();

        assert_eq!(body, b"abc".to_vec());
        let request = server.join().unwrap().to_lowercase();
        assert!(request.starts_with("get /resource"));
        assert!(request.contains(&format!("user-agent: {}", USER_AGENT.to_lowercase())));
    }

    #[test]
    fn reqwesthttpfetch_post_when_successful() {
        let (url, server) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
            Duration::ZERO,
        );

        let body = ReqwestHttpFetch::new()
            .unwrap()
            .post(
                &url,
                "application/ocsp-request",
                vec![0x30, 0x00],
                Duration::from_secs(5),
            )
            .unwrap();

        assert_eq!(body, b"ok".to_vec());
        let request = server.join().unwrap().to_lowercase();
        assert!(request.starts_with("post /resource"));
        assert!(request.contains("content-type: application/ocsp-request"));
    }

    #[test]
    fn reqwesthttpfetch_get_when_unsuccessful_status() {
        let (url, server) = serve_once(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            Duration::ZERO,
        );

        let result = ReqwestHttpFetch::new()
            .unwrap()
            .get(&url, Duration::from_secs(5));

        match result {
            Err(err) => assert!(!err.is_timeout()),
            Ok(body) => panic!("Unexpected result: body={:?}", &body),
        }
        server.join().unwrap();
    }

    #[test]
    fn reqwesthttpfetch_get_when_timeout() {
        let (url, server) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            Duration::from_millis(1500),
        );

        let result = ReqwestHttpFetch::new()
            .unwrap()
            .get(&url, Duration::from_millis(200));

        match result {
            Err(err) => assert!(err.is_timeout(), "err={:?}", &err),
            Ok(body) => panic!("Unexpected result: body={:?}", &body),
        }
        server.join().unwrap();
    }
}
