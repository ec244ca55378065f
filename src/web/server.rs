//! tiny_http front end
//!
//! A fixed pool of named worker threads pulls requests off one shared
//! listener and hands them to the [`Gateway`].

use std::io::Read;
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};

use tiny_http::{Header, Request, Response, Server};

use crate::web::gateway::{Gateway, ProxyRequest, ProxyResponse};
use crate::web::{Result, WebError};

/// Upper bound for request bodies read into memory
const MAX_BODY_SIZE: u64 = 10 * 1024 * 1024;

/// Read a request body of at most `limit` bytes.
///
/// An oversized body is refused as a whole, never truncated.
fn read_body<R: Read>(reader: R, content_length: Option<usize>, limit: u64) -> Result<Vec<u8>> {
    if content_length.map_or(false, |length| length as u64 > limit) {
        return Err(WebError::PayloadTooLarge(limit));
    }

    let mut body = Vec::new();
    reader
        .take(limit + 1)
        .read_to_end(&mut body)
        .map_err(|e| {
            log::info!("Failed to read request body: {:?}", e);
            WebError::BadRequest("unreadable request body".to_string())
        })?;

    if body.len() as u64 > limit {
        return Err(WebError::PayloadTooLarge(limit));
    }

    Ok(body)
}

fn to_proxy_request(request: &mut Request) -> Result<ProxyRequest> {
    let headers = request
        .headers()
        .iter()
        .map(|header| (header.field.as_str().to_string(), header.value.as_str().to_string()))
        .collect();

    let content_length = request.body_length();
    let body = read_body(request.as_reader(), content_length, MAX_BODY_SIZE)?;

    Ok(ProxyRequest {
        method: request.method().as_str().to_ascii_uppercase(),
        url: request.url().to_string(),
        headers,
        body,
    })
}

fn respond(request: Request, response: ProxyResponse) {
    let mut reply = Response::from_data(response.body).with_status_code(response.status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], response.content_type.as_bytes()) {
        reply = reply.with_header(header);
    }

    if let Err(e) = request.respond(reply) {
        log::warn!("Failed to send response: {:?}", e);
    }
}

fn handle_request(gateway: &Gateway, mut request: Request) {
    match to_proxy_request(&mut request) {
        Ok(proxy_request) => {
            log::debug!("{} {}", proxy_request.method, proxy_request.path());
            let response = gateway.handle(&proxy_request);
            respond(request, response);
        }
        Err(err) => {
            log::info!("Rejecting {} {}: {}", request.method(), request.url(), err);
            respond(request, ProxyResponse::from_error(&err));
        }
    }
}

pub struct ProxyServer {
    gateway: Arc<Gateway>,
    server: Arc<Server>,
    worker_threads: usize,
}

impl ProxyServer {
    pub fn bind(gateway: Gateway, listen: &str, worker_threads: usize) -> std::io::Result<ProxyServer> {
        let server = Server::http(listen).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::Other, format!("{}: {}", listen, e))
        })?;

        log::info!("Proxy listening on {}", listen);

        Ok(ProxyServer {
            gateway: Arc::new(gateway),
            server: Arc::new(server),
            worker_threads,
        })
    }

    pub fn spawn_workers(&self) -> std::io::Result<Vec<JoinHandle<()>>> {
        (0..self.worker_threads)
            .map(|thread_id| {
                let gateway = self.gateway.clone();
                let server = self.server.clone();
                let name = "ProxyWorker".to_string() + &thread_id.to_string();

                Builder::new().name(name).spawn(move || loop {
                    match server.recv() {
                        Ok(request) => handle_request(&gateway, request),
                        Err(e) => {
                            log::error!("Failed to accept request: {:?}", e);
                            break;
                        }
                    }
                })
            })
            .collect()
    }

    /// Serve until every worker has stopped
    pub fn run(self) -> std::io::Result<()> {
        for handle in self.spawn_workers()? {
            if handle.join().is_err() {
                log::error!("Proxy worker panicked");
            }
        }

        Ok(())
    }
}
