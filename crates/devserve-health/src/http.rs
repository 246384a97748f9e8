//! HTTP health probe.

use crate::ProbeOutcome;
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::{Request, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Issue a GET request to `endpoint`; any 2xx status within
/// `probe_timeout` is healthy. Any other status, a connection error, an
/// unparsable endpoint, or a timeout is unhealthy.
pub async fn check_http(endpoint: &str, probe_timeout: Duration) -> ProbeOutcome {
    let uri: Uri = match endpoint.parse() {
        Ok(uri) => uri,
        Err(e) => {
            debug!("HTTP probe has invalid endpoint: {} - {}", endpoint, e);
            return ProbeOutcome::Unhealthy;
        }
    };

    let request = match Request::builder()
        .method(hyper::Method::GET)
        .uri(uri)
        .header("User-Agent", "devserve/0.1")
        .body(Empty::<Bytes>::new())
    {
        Ok(req) => req,
        Err(e) => {
            debug!("HTTP probe failed to build request: {} - {}", endpoint, e);
            return ProbeOutcome::Unhealthy;
        }
    };

    let client = Client::builder(TokioExecutor::new()).build_http();

    match timeout(probe_timeout, client.request(request)).await {
        Ok(Ok(response)) => {
            let status = response.status();
            if status.is_success() {
                debug!("HTTP probe succeeded: {} - {}", endpoint, status);
                ProbeOutcome::Healthy
            } else {
                debug!("HTTP probe got non-2xx: {} - {}", endpoint, status);
                ProbeOutcome::Unhealthy
            }
        }
        Ok(Err(e)) => {
            debug!("HTTP probe connection failed: {} - {}", endpoint, e);
            ProbeOutcome::Unhealthy
        }
        Err(_) => {
            debug!("HTTP probe timed out: {} ({:?})", endpoint, probe_timeout);
            ProbeOutcome::Unhealthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn one_shot_http_server(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                // Ignore the request bytes; answer unconditionally.
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        format!("http://{}/health", addr)
    }

    #[tokio::test]
    async fn test_http_probe_2xx() {
        let url =
            one_shot_http_server("HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok").await;
        assert_eq!(
            check_http(&url, Duration::from_secs(2)).await,
            ProbeOutcome::Healthy
        );
    }

    #[tokio::test]
    async fn test_http_probe_5xx() {
        let url = one_shot_http_server(
            "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\n\r\n",
        )
        .await;
        assert_eq!(
            check_http(&url, Duration::from_secs(2)).await,
            ProbeOutcome::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_http_probe_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = format!("http://{}/health", addr);
        assert_eq!(
            check_http(&url, Duration::from_secs(1)).await,
            ProbeOutcome::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_http_probe_invalid_url() {
        assert_eq!(
            check_http("not-a-valid-url", Duration::from_secs(1)).await,
            ProbeOutcome::Unhealthy
        );
    }
}
