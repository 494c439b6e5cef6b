use futures::future;
use hyper::{Body, Request, Response, StatusCode};
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, instrument};

/// Serves the kubelet-facing probe endpoints: `/healthz` answers as long as
/// the process accepts connections, `/readyz` flips once the runtime is up.
#[instrument(skip(ready))]
pub(crate) async fn serve_probes(
    addr: SocketAddr,
    ready: watch::Receiver<bool>,
) -> Result<(), hyper::Error> {
    let server =
        hyper::server::Server::bind(&addr).serve(hyper::service::make_service_fn(move |_conn| {
            let ready = ready.clone();
            future::ok::<_, hyper::Error>(hyper::service::service_fn(
                move |req: Request<Body>| {
                    let response = match req.uri().path() {
                        "/healthz" => probe(&req, true),
                        "/readyz" => probe(&req, *ready.borrow()),
                        _ => not_found(),
                    };
                    future::ok::<_, hyper::Error>(response)
                },
            ))
        }));
    let addr = server.local_addr();
    info!(%addr, "HTTP probe server listening");
    server.await
}

/// Serves the Prometheus registry on `/metrics`.
#[instrument(skip(registry))]
pub(crate) async fn serve_metrics(
    addr: SocketAddr,
    registry: Arc<Registry>,
) -> Result<(), hyper::Error> {
    let server =
        hyper::server::Server::bind(&addr).serve(hyper::service::make_service_fn(move |_conn| {
            let registry = registry.clone();
            future::ok::<_, hyper::Error>(hyper::service::service_fn(
                move |req: Request<Body>| {
                    let response = match req.uri().path() {
                        "/metrics" => metrics(&registry),
                        _ => not_found(),
                    };
                    future::ok::<_, hyper::Error>(response)
                },
            ))
        }));
    let addr = server.local_addr();
    info!(%addr, "HTTP metrics server listening");
    server.await
}

fn metrics(registry: &Registry) -> Response<Body> {
    let mut buffer = String::new();
    match encode(&mut buffer, registry) {
        Ok(()) => Response::builder()
            .status(StatusCode::OK)
            .header(
                hyper::header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )
            .body(buffer.into())
            .unwrap(),
        Err(_) => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::default())
            .unwrap(),
    }
}

fn probe(req: &Request<Body>, ok: bool) -> Response<Body> {
    match *req.method() {
        hyper::Method::GET | hyper::Method::HEAD => {
            if ok {
                Response::builder()
                    .status(StatusCode::OK)
                    .header(hyper::header::CONTENT_TYPE, "text/plain")
                    .body("ok\n".into())
                    .unwrap()
            } else {
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .header(hyper::header::CONTENT_TYPE, "text/plain")
                    .body("not ready\n".into())
                    .unwrap()
            }
        }
        _ => Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .body(Body::default())
            .unwrap(),
    }
}

fn not_found() -> Response<Body> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::default())
        .unwrap()
}
