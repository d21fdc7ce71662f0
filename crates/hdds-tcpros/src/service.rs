// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service request/response exchange.
//!
//! One request per connection. After the header exchange the client sends
//! one framed request; the server answers with a status byte and a framed
//! body (the response on success, a UTF-8 error message otherwise) and
//! closes the connection.
//!
//! ```text
//! client                               server
//!   | header(service, md5sum, callerid) |
//!   |---------------------------------->|
//!   | header(md5sum, callerid, type,    |
//!   |        request_type, response_type)
//!   |<----------------------------------|
//!   | len(4B LE) | request              |
//!   |---------------------------------->|
//!   | ok(1B) | len(4B LE) | response    |
//!   |<----------------------------------|
//!   |              close                |
//! ```

use crate::client::{self, ClientOptions};
use crate::error::{Result, TcprosError};
use crate::frame::{self, STATUS_OK};
use crate::header::{fields, md5_compatible, ConnectionHeader, MD5_WILDCARD};
use crate::message::{RosMessage, RosService};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

type Handler = dyn Fn(&[u8]) -> std::result::Result<Vec<u8>, String> + Send + Sync;

/// A registered service: metadata plus a type-erased callback.
pub struct ServiceEntry {
    name: String,
    type_name: String,
    request_type: String,
    response_type: String,
    md5sum: String,
    handler: Arc<Handler>,
}

impl ServiceEntry {
    /// Wrap a typed callback. Errors returned by the callback are reported
    /// to the client as a failure status.
    pub fn new<S, F>(name: impl Into<String>, callback: F) -> Self
    where
        S: RosService,
        F: Fn(S::Request) -> std::result::Result<S::Response, String> + Send + Sync + 'static,
    {
        let handler = move |body: &[u8]| {
            let request = S::Request::from_bytes(body)
                .map_err(|e| format!("failed to decode request: {}", e))?;
            callback(request).map(|response| response.to_bytes())
        };

        Self {
            name: name.into(),
            type_name: S::TYPE_NAME.to_string(),
            request_type: <S::Request as RosMessage>::TYPE_NAME.to_string(),
            response_type: <S::Response as RosMessage>::TYPE_NAME.to_string(),
            md5sum: S::md5sum(),
            handler: Arc::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn md5sum(&self) -> &str {
        &self.md5sum
    }

    /// Validate a client handshake and build the reply header.
    pub fn negotiate(&self, request: &ConnectionHeader, caller_id: &str) -> Result<ConnectionHeader> {
        let theirs = request.require(fields::MD5SUM)?;
        if !md5_compatible(theirs, &self.md5sum) {
            return Err(TcprosError::malformed(format!(
                "md5 mismatch on service {}: client sent {}, service has {}",
                self.name, theirs, self.md5sum
            )));
        }

        Ok(ConnectionHeader::new()
            .with(fields::MD5SUM, self.md5sum.as_str())
            .with(fields::CALLERID, caller_id)
            .with(fields::TYPE, self.type_name.as_str())
            .with(fields::REQUEST_TYPE, self.request_type.as_str())
            .with(fields::RESPONSE_TYPE, self.response_type.as_str()))
    }

    /// Run the callback on a serialized request.
    pub fn invoke(&self, request: &[u8]) -> std::result::Result<Vec<u8>, String> {
        (*self.handler)(request)
    }
}

impl std::fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceEntry")
            .field("name", &self.name)
            .field("type", &self.type_name)
            .field("md5sum", &self.md5sum)
            .finish_non_exhaustive()
    }
}

/// Server path: reply, handle one request, close.
///
/// The connection is shut down whether or not the exchange succeeded.
pub(crate) async fn serve_request<S>(
    service: Arc<ServiceEntry>,
    reply: ConnectionHeader,
    mut stream: S,
    max_message_size: usize,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let result = exchange_request(&service, &reply, &mut stream, max_message_size).await;
    let _ = stream.shutdown().await;
    result
}

async fn exchange_request<S>(
    service: &Arc<ServiceEntry>,
    reply: &ConnectionHeader,
    stream: &mut S,
    max_message_size: usize,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    reply.write_to(stream).await?;

    let request = frame::expect_frame(stream, max_message_size).await?;

    // Callbacks are user code and may block.
    let handler = service.handler.clone();
    let outcome = match tokio::task::spawn_blocking(move || (*handler)(&request)).await {
        Ok(outcome) => outcome,
        Err(e) => Err(format!("service callback panicked: {}", e)),
    };

    match outcome {
        Ok(response) => {
            frame::write_service_reply(stream, true, &response).await?;
            debug!("Served {} ({} byte response)", service.name, response.len());
        }
        Err(message) => {
            warn!("Service {} failed: {}", service.name, message);
            frame::write_service_reply(stream, false, message.as_bytes()).await?;
        }
    }
    Ok(())
}

/// Client path: call `service` on `host:port` and return its response.
pub async fn call<S: RosService>(
    caller_id: &str,
    host: &str,
    port: u16,
    service: &str,
    request: &S::Request,
    options: &ClientOptions,
) -> Result<S::Response> {
    let mut stream = client::connect(host, port, options).await?;
    let result = call_on::<S, _>(&mut stream, caller_id, (host, port), service, request, options).await;
    let _ = stream.shutdown().await;
    result
}

/// Run one call over an already connected stream. The caller closes it.
pub async fn call_on<S, T>(
    stream: &mut T,
    caller_id: &str,
    peer: (&str, u16),
    service: &str,
    request: &S::Request,
    options: &ClientOptions,
) -> Result<S::Response>
where
    S: RosService,
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (host, port) = peer;

    ConnectionHeader::new()
        .with(fields::SERVICE, service)
        .with(fields::MD5SUM, S::md5sum())
        .with(fields::CALLERID, caller_id)
        .write_to(stream)
        .await?;

    let reply = ConnectionHeader::read_from(stream, options.max_header_size).await?;
    if let Some(message) = reply.get(fields::ERROR) {
        return Err(TcprosError::Rejected {
            peer: format!("{}:{}", host, port),
            message: message.to_string(),
        });
    }

    frame::write_frame(stream, &request.to_bytes()).await?;

    let status = stream.read_u8().await?;
    if status != STATUS_OK {
        let reason = match frame::read_frame(stream, options.max_message_size).await {
            Ok(Some(body)) if !body.is_empty() => String::from_utf8_lossy(&body).into_owned(),
            _ => format!("status byte {}", status),
        };
        return Err(TcprosError::ServiceCall {
            host: host.to_string(),
            port,
            request: format!("{:?}", request),
            reason,
        });
    }

    let body = frame::expect_frame(stream, options.max_message_size).await?;
    Ok(S::Response::from_bytes(&body)?)
}

/// Check that a TCPROS server answers on `host:port`.
///
/// Succeeds when the server closes the probe connection without replying.
pub async fn probe(
    caller_id: &str,
    host: &str,
    port: u16,
    service: &str,
    options: &ClientOptions,
) -> Result<()> {
    let mut stream = client::connect(host, port, options).await?;

    ConnectionHeader::new()
        .with(fields::PROBE, "1")
        .with(fields::SERVICE, service)
        .with(fields::MD5SUM, MD5_WILDCARD)
        .with(fields::CALLERID, caller_id)
        .write_to(&mut stream)
        .await?;

    let mut byte = [0u8; 1];
    let read = stream.read(&mut byte).await;
    let _ = stream.shutdown().await;
    match read? {
        0 => Ok(()),
        _ => Err(TcprosError::malformed(format!(
            "{}:{} replied to a probe",
            host, port
        ))),
    }
}
