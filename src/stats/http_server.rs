//! Minimal `/metrics` HTTP endpoint, served with bare `hyper` rather than a
//! web framework, matching the teacher's dependency footprint.

use std::convert::Infallible;
use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::util::outbound_ip;

use super::registry;

/// If `port == 0`, probe for a free port starting at 10000 instead of
/// letting the OS hand back an arbitrary ephemeral one.
fn resolve_port(port: u16) -> u16 {
    if port != 0 {
        return port;
    }

    for candidate in 10000..10100 {
        if std::net::TcpListener::bind(("0.0.0.0", candidate)).is_ok() {
            return candidate;
        }
    }

    warn!("no free port found starting at 10000, falling back to an OS-assigned one");
    0
}

fn resolve_host(host: Option<&str>) -> String {
    host.map(str::to_string)
        .or_else(outbound_ip)
        .unwrap_or_else(|| "0.0.0.0".into())
}

/// Serve `/metrics` until the process exits. Runs as a background task; a
/// bind failure is logged and the task exits rather than panicking the
/// caller's runtime.
pub async fn server(host: Option<&str>, port: u16) {
    let port = resolve_port(port);
    let host = resolve_host(host);
    let addr: SocketAddr = match format!("{}:{}", host, port).parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!("invalid metrics listen address \"{}:{}\": {}", host, port, err);
            return;
        }
    };

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind metrics server on {}: {}", addr, err);
            return;
        }
    };

    info!("metrics server listening on {}", addr);

    loop {
        let (stream, _) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!("metrics server accept error: {}", err);
                continue;
            }
        };

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            if let Err(err) = http1::Builder::new()
                .serve_connection(io, service_fn(handle))
                .await
            {
                warn!("metrics connection error: {}", err);
            }
        });
    }
}

async fn handle(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let body = if req.uri().path() == "/metrics" {
        registry().render()
    } else {
        String::new()
    };

    let status = if body.is_empty() && req.uri().path() != "/metrics" {
        hyper::StatusCode::NOT_FOUND
    } else {
        hyper::StatusCode::OK
    };

    let response = Response::builder()
        .status(status)
        .header("content-type", "text/plain; version=0.0.4")
        .body(Full::new(Bytes::from(body)))
        .expect("static response is always well-formed");

    Ok(response)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_resolve_port_keeps_explicit_port() {
        assert_eq!(resolve_port(9090), 9090);
    }

    #[test]
    fn test_resolve_host_falls_back_to_outbound_ip_or_default() {
        let host = resolve_host(None);
        assert!(!host.is_empty());
    }

    #[test]
    fn test_resolve_host_prefers_explicit_value() {
        assert_eq!(resolve_host(Some("127.0.0.1")), "127.0.0.1");
    }
}
