//! One proxied connection.
//!
//! The session owns the two sockets and nothing else: startup and
//! authentication relay verbatim, the bootstrap loads the session's
//! electrified set and rules row, and from then on every complete frame is
//! a tick of the injector. The only two suspension points are the two
//! socket reads.

use crate::error::ProxyError;
use crate::generator::QueryGenerator;
use crate::injector::{Injector, Reaction, Source};
use bytes::BytesMut;
use electric_core::{ProxyConfig, TableName};
use electric_policy::Rules;
use electric_wire::backend::{self, BackendView, TxStatus};
use electric_wire::{Frame, FrameBuffer, frontend};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

// Startup-phase protocol codes (the first four payload bytes).
const PROTOCOL_V3: i32 = 196608;
const CANCEL_REQUEST: i32 = 80877102;
const SSL_REQUEST: i32 = 80877103;
const GSSENC_REQUEST: i32 = 80877104;

/// Drive one client connection to completion.
pub async fn run_session(
    mut client: TcpStream,
    config: &ProxyConfig,
    generator: Arc<dyn QueryGenerator>,
) -> Result<(), ProxyError> {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let upstream_addr = format!("{}:{}", config.upstream.host, config.upstream.port);
    let mut server =
        TcpStream::connect(&upstream_addr)
            .await
            .map_err(|e| ProxyError::UpstreamConnectFailed {
                address: upstream_addr.clone(),
                source: e,
            })?;

    tracing::debug!(%connection_id, upstream = %upstream_addr, "session connected");

    let mut client_buf = FrameBuffer::new_startup();
    let mut server_buf = FrameBuffer::new();

    // Phase 1: the client's untagged startup exchange.
    if !relay_startup(&mut client, &mut server, &mut client_buf).await? {
        return Ok(());
    }

    // Phase 2: authentication relays verbatim until the first
    // ReadyForQuery from the server.
    relay_authentication(&mut client, &mut server, &mut client_buf, &mut server_buf).await?;

    // Phase 3: load the session's electrified set and rules row before the
    // first client statement is serviced.
    let (electrified, rules) =
        bootstrap(&mut server, &mut server_buf, generator.as_ref()).await?;
    tracing::debug!(
        %connection_id,
        electrified_tables = electrified.len(),
        "session bootstrap complete"
    );

    let mut injector = Injector::new(
        config.features.clone(),
        rules,
        electrified,
        generator.clone(),
    );

    // The ReadyForQuery the client has been waiting for since auth.
    send_frames(&mut client, &[backend::ready_for_query(TxStatus::Idle)]).await?;

    // Phase 4: frame relay.
    let timeout = Duration::from_secs(config.query_timeout_secs);
    let trace = config.trace_frames;
    let mut client_bytes = BytesMut::with_capacity(8 * 1024);
    let mut server_bytes = BytesMut::with_capacity(8 * 1024);

    loop {
        let awaiting = injector.awaiting_server();
        let read = tokio::select! {
            read = client.read_buf(&mut client_bytes) => (Source::Client, read?),
            read = server.read_buf(&mut server_bytes) => (Source::Server, read?),
            _ = tokio::time::sleep(timeout), if awaiting => {
                return Err(ProxyError::Timeout {
                    seconds: config.query_timeout_secs,
                });
            }
        };

        match read {
            (Source::Client, 0) => {
                // Client hung up. Tell the server if a transaction is open.
                if injector.tx_status() != TxStatus::Idle {
                    send_frames(&mut server, &[frontend::terminate()]).await.ok();
                }
                tracing::debug!(%connection_id, "client closed the connection");
                return Ok(());
            }
            (Source::Server, 0) => {
                tracing::warn!(%connection_id, "server closed the connection");
                let goodbye = [
                    backend::error_response("08006", "server terminated connection"),
                    backend::ready_for_query(TxStatus::Idle),
                ];
                send_frames(&mut client, &goodbye).await.ok();
                return Ok(());
            }
            (Source::Client, _) => {
                client_buf.feed(&client_bytes.split());
                while let Some(frame) = client_buf.next_frame()? {
                    if trace {
                        tracing::trace!(%connection_id, tag = %(frame.tag as char), dir = "client", "frame");
                    }
                    let reaction = injector.handle(Source::Client, frame);
                    dispatch(&mut client, &mut server, reaction).await?;
                }
            }
            (Source::Server, _) => {
                server_buf.feed(&server_bytes.split());
                while let Some(frame) = server_buf.next_frame()? {
                    if trace {
                        tracing::trace!(%connection_id, tag = %(frame.tag as char), dir = "server", "frame");
                    }
                    let reaction = injector.handle(Source::Server, frame);
                    dispatch(&mut client, &mut server, reaction).await?;
                }
            }
        }
    }
}

/// Relay the untagged startup exchange. Returns false when the connection
/// is a cancel request and is already done.
async fn relay_startup(
    client: &mut TcpStream,
    server: &mut TcpStream,
    client_buf: &mut FrameBuffer,
) -> Result<bool, ProxyError> {
    let mut bytes = BytesMut::with_capacity(1024);
    loop {
        if client.read_buf(&mut bytes).await? == 0 {
            return Ok(false);
        }
        client_buf.feed(&bytes.split());
        while let Some(frame) = client_buf.next_frame()? {
            let code = startup_code(&frame);
            match code {
                Some(SSL_REQUEST) | Some(GSSENC_REQUEST) => {
                    // TLS termination belongs to the tunnel collaborator;
                    // this listener speaks plain frames.
                    client.write_all(b"N").await?;
                }
                Some(CANCEL_REQUEST) => {
                    send_frames(server, &[frame]).await?;
                    return Ok(false);
                }
                _ => {
                    if code != Some(PROTOCOL_V3) {
                        tracing::debug!(?code, "unusual startup protocol code, relaying anyway");
                    }
                    send_frames(server, &[frame]).await?;
                    client_buf.leave_startup();
                    return Ok(true);
                }
            }
        }
    }
}

fn startup_code(frame: &Frame) -> Option<i32> {
    let payload = &frame.payload;
    if payload.len() < 4 {
        return None;
    }
    Some(i32::from_be_bytes([
        payload[0], payload[1], payload[2], payload[3],
    ]))
}

/// Relay frames verbatim in both directions until the server reports
/// ReadyForQuery, which it withholds from the client (the session sends its
/// own once the bootstrap finishes).
async fn relay_authentication(
    client: &mut TcpStream,
    server: &mut TcpStream,
    client_buf: &mut FrameBuffer,
    server_buf: &mut FrameBuffer,
) -> Result<(), ProxyError> {
    let mut client_bytes = BytesMut::with_capacity(1024);
    let mut server_bytes = BytesMut::with_capacity(1024);
    loop {
        tokio::select! {
            read = client.read_buf(&mut client_bytes) => {
                if read? == 0 {
                    return Err(ProxyError::Bootstrap(
                        "client closed during authentication".to_string(),
                    ));
                }
                client_buf.feed(&client_bytes.split());
                let mut frames = Vec::new();
                while let Some(frame) = client_buf.next_frame()? {
                    frames.push(frame);
                }
                send_frames(server, &frames).await?;
            }
            read = server.read_buf(&mut server_bytes) => {
                if read? == 0 {
                    return Err(ProxyError::Bootstrap(
                        "server closed during authentication".to_string(),
                    ));
                }
                server_buf.feed(&server_bytes.split());
                let mut frames = Vec::new();
                while let Some(frame) = server_buf.next_frame()? {
                    if matches!(BackendView::decode(&frame), Ok(BackendView::ReadyForQuery(_))) {
                        send_frames(client, &frames).await?;
                        return Ok(());
                    }
                    frames.push(frame);
                }
                send_frames(client, &frames).await?;
            }
        }
    }
}

/// Load the electrified-table set and the persisted rules row. A missing
/// bookkeeping schema downgrades the session to pure pass-through state
/// rather than refusing the connection.
async fn bootstrap(
    server: &mut TcpStream,
    server_buf: &mut FrameBuffer,
    generator: &dyn QueryGenerator,
) -> Result<(HashSet<TableName>, Rules), ProxyError> {
    let electrified_rows =
        run_internal_query(server, server_buf, &generator.electrified_query()).await?;
    let electrified = match electrified_rows {
        Some(rows) => rows
            .into_iter()
            .filter_map(|row| match (row.first(), row.get(1)) {
                (Some(Some(schema)), Some(Some(name))) => {
                    Some(TableName::new(schema.clone(), name.clone()))
                }
                _ => None,
            })
            .collect(),
        None => {
            tracing::warn!("electrified-table bookkeeping unavailable, assuming none");
            HashSet::new()
        }
    };

    let rules_rows = run_internal_query(server, server_buf, &generator.load_rules_query()).await?;
    let rules = match rules_rows {
        Some(rows) => match rows.first().and_then(|row| row.first()).and_then(Clone::clone) {
            Some(json) => Rules::from_json(&json).unwrap_or_else(|err| {
                tracing::warn!(%err, "persisted rules row is malformed, starting empty");
                Rules::new()
            }),
            None => Rules::new(),
        },
        None => {
            tracing::warn!("permission-rules bookkeeping unavailable, starting empty");
            Rules::new()
        }
    };

    Ok((electrified, rules))
}

/// Run one internal simple query and collect its text rows. Returns `None`
/// when the server answered with an error instead.
async fn run_internal_query(
    server: &mut TcpStream,
    server_buf: &mut FrameBuffer,
    sql: &str,
) -> Result<Option<Vec<Vec<Option<String>>>>, ProxyError> {
    send_frames(server, &[frontend::query(sql)]).await?;

    let mut rows = Vec::new();
    let mut errored = false;
    let mut bytes = BytesMut::with_capacity(4 * 1024);
    loop {
        if server.read_buf(&mut bytes).await? == 0 {
            return Err(ProxyError::Bootstrap(
                "server closed during session bootstrap".to_string(),
            ));
        }
        server_buf.feed(&bytes.split());
        while let Some(frame) = server_buf.next_frame()? {
            match BackendView::decode(&frame)? {
                BackendView::DataRow(values) => rows.push(
                    values
                        .into_iter()
                        .map(|v| v.map(|b| String::from_utf8_lossy(&b).into_owned()))
                        .collect(),
                ),
                BackendView::ErrorResponse(fields) => {
                    tracing::debug!(message = %fields.message, "bootstrap query failed");
                    errored = true;
                }
                BackendView::ReadyForQuery(_) => {
                    return Ok(if errored { None } else { Some(rows) });
                }
                _ => {}
            }
        }
    }
}

async fn dispatch(
    client: &mut TcpStream,
    server: &mut TcpStream,
    reaction: Reaction,
) -> Result<(), ProxyError> {
    send_frames(server, &reaction.to_server).await?;
    send_frames(client, &reaction.to_client).await?;
    if reaction.shutdown {
        client.shutdown().await.ok();
        server.shutdown().await.ok();
    }
    Ok(())
}

async fn send_frames(socket: &mut TcpStream, frames: &[Frame]) -> Result<(), ProxyError> {
    if frames.is_empty() {
        return Ok(());
    }
    let mut out = BytesMut::new();
    for frame in frames {
        frame.encode(&mut out);
    }
    socket.write_all(&out).await?;
    Ok(())
}
