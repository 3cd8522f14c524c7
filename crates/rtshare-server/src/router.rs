//! Message router.
//!
//! One handler per [`MessageKind`]. Every handler returns exactly one direct
//! reply for the source connection; some also broadcast or forward. Registry
//! changes happen under a single write guard which is dropped before any
//! network write.

use std::sync::Arc;

use rtshare_proto::{MessageKind, Request, Response, Status};

use crate::{
    connection::Connection,
    error::HubError,
    hub::Hub,
    transfer::PendingTransfer,
};

/// Direct reply for the source connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Frame written back on the source connection
    pub response: Response,
    /// Close the source connection once the reply is written
    pub close: bool,
}

impl Reply {
    /// Reply and keep the connection open.
    pub fn send(response: Response) -> Self {
        Self { response, close: false }
    }

    /// Reply, then close the connection.
    pub fn then_close(response: Response) -> Self {
        Self { response, close: true }
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Self::send(response)
    }
}

/// Route one request from `conn`.
pub async fn dispatch(hub: &Hub, request: &Request, conn: &Arc<Connection>) -> Reply {
    let Some(kind) = request.message_kind() else {
        tracing::debug!(conn = %conn.id(), kind = %request.kind, "unknown request type");
        return Response::error(&request.kind, format!("Unknown type: {}", request.kind)).into();
    };

    tracing::trace!(conn = %conn.id(), %kind, payload = %request.payload, "dispatch");

    match kind {
        MessageKind::Join => handle_join(hub, request, conn).await.into(),
        MessageKind::Leave => handle_leave(hub, request, conn).await,
        MessageKind::Offer
        | MessageKind::Answer
        | MessageKind::Candidate
        | MessageKind::SendText => handle_forward(hub, kind, request, conn).await.into(),
        MessageKind::SendFile => handle_send_file(hub, request, conn).await.into(),
        MessageKind::AcceptFile => handle_accept_file(hub, request, conn).await.into(),
        MessageKind::DenyFile => handle_deny_file(hub, request, conn).await.into(),
    }
}

fn user_ids_json(ids: &[String]) -> String {
    serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string())
}

async fn handle_join(hub: &Hub, request: &Request, conn: &Arc<Connection>) -> Response {
    let kind = MessageKind::Join.as_str();
    let user_id = request.payload.as_str();

    if user_id.is_empty() {
        return Response::error(kind, "Missing user id");
    }

    let (binding, ids, ip) = {
        let mut state = hub.write().await;
        let binding = state.bind(user_id, conn.id());
        (binding, state.user_ids(), state.remote_ip(conn.id()).map(str::to_owned))
    };

    let Some(binding) = binding else {
        return Response::error(kind, "Connection closed");
    };

    if let Some(displaced) = binding.displaced {
        tracing::info!(user = user_id, conn = %conn.id(), %displaced, "user id taken over");
    }
    if let Some(previous) = &binding.previous_user {
        tracing::info!(user = user_id, conn = %conn.id(), %previous, "user renamed");
        hub.broadcast(&Response::user_left(previous), Some(conn.id())).await;
    }

    tracing::info!(user = user_id, conn = %conn.id(), "user joined");
    hub.broadcast(&Response::user_joined(user_id), Some(conn.id())).await;

    let response = Response::ok(kind)
        .with_message(format!("User {user_id} joined"))
        .with_data(user_ids_json(&ids));
    match ip {
        Some(ip) => response.with_ip(ip),
        None => response,
    }
}

async fn handle_leave(hub: &Hub, request: &Request, conn: &Arc<Connection>) -> Reply {
    let kind = MessageKind::Leave.as_str();
    let user_id = request.payload.as_str();

    let (released, ids) = {
        let mut state = hub.write().await;
        let released = state.unbind(user_id, conn.id());
        (released, state.user_ids())
    };

    let response = Response::ok(kind).with_message("Left").with_data(user_ids_json(&ids));

    if !released {
        return Reply::send(response);
    }

    tracing::info!(user = user_id, conn = %conn.id(), "user left");
    hub.broadcast(&Response::user_left(user_id), Some(conn.id())).await;
    Reply::then_close(response)
}

async fn handle_forward(
    hub: &Hub,
    kind: MessageKind,
    request: &Request,
    conn: &Arc<Connection>,
) -> Response {
    let (target, sender) = {
        let state = hub.read().await;
        (
            state.connection_for_user(&request.payload).cloned(),
            state.user_for_connection(conn.id()).unwrap_or_default().to_owned(),
        )
    };

    let Some(target) = target else {
        return Response::error(kind.as_str(), "User not found");
    };

    let message = Response::new(kind.as_str(), Status::Forward)
        .with_data(request.text.as_str())
        .with_sender(sender);

    match hub.deliver(&target, &message).await {
        Ok(()) => Response::ok(kind.as_str()).with_message("forwarded"),
        Err(HubError::Protocol(e)) => {
            tracing::error!(conn = %conn.id(), error = %e, "failed to encode forward");
            Response::error(kind.as_str(), "marshal error")
        },
        Err(_) => Response::error(kind.as_str(), "forward failed"),
    }
}

async fn handle_send_file(hub: &Hub, request: &Request, conn: &Arc<Connection>) -> Response {
    let kind = MessageKind::SendFile.as_str();
    let target_id = request.payload.as_str();

    let (sender, target, permitted) = {
        let state = hub.read().await;
        let sender = state.user_for_connection(conn.id()).map(str::to_owned);
        let target = state.connection_for_user(target_id).cloned();
        let permitted =
            sender.as_deref().is_some_and(|s| state.transfers().is_permitted(s, target_id));
        (sender, target, permitted)
    };

    let Some(sender) = sender else {
        return Response::error(kind, "Sender not joined");
    };
    let Some(target) = target else {
        return Response::error(kind, "User not found");
    };

    let delivery = Response::new(kind, Status::DataSend)
        .with_file(request.filename.as_str(), request.bytes.clone())
        .with_sender(sender.as_str());

    if permitted {
        return match hub.deliver(&target, &delivery).await {
            Ok(()) => {
                tracing::debug!(from = %sender, to = target_id, "file delivered directly");
                Response::ok(kind).with_message("File sent")
            },
            Err(_) => Response::error(kind, "forward failed"),
        };
    }

    let parked = hub.write().await.offer_transfer(PendingTransfer {
        offer: delivery,
        sender: conn.id(),
        receiver: target.id(),
    });
    if !parked {
        return Response::error(kind, "User not found");
    }

    let notice = Response::new(kind, Status::RequestSendFile)
        .with_file(request.filename.as_str(), Vec::new())
        .with_data(sender.as_str())
        .with_sender(sender.as_str());

    match hub.deliver(&target, &notice).await {
        Ok(()) => {
            tracing::debug!(
                from = %sender,
                to = target_id,
                file = %request.filename,
                "file request sent"
            );
            Response::ok(kind).with_message("File request sent")
        },
        Err(_) => Response::error(kind, "forward failed"),
    }
}

async fn handle_accept_file(hub: &Hub, request: &Request, conn: &Arc<Connection>) -> Response {
    let kind = MessageKind::AcceptFile.as_str();
    let offerer_id = request.payload.as_str();

    let accepted = {
        let mut state = hub.write().await;
        let Some(receiver_id) = state.user_for_connection(conn.id()).map(str::to_owned) else {
            return Response::error(kind, "Unknown user");
        };

        state.transfers_mut().grant(offerer_id, &receiver_id);
        state
            .connection_id_for_user(offerer_id)
            .and_then(|offerer| state.transfers_mut().accept(offerer, conn.id()))
    };

    match accepted {
        Some(transfer) => {
            tracing::debug!(from = offerer_id, conn = %conn.id(), "file request accepted");
            transfer.offer
        },
        None => Response::ok(kind).with_message("Accepted"),
    }
}

async fn handle_deny_file(hub: &Hub, request: &Request, conn: &Arc<Connection>) -> Response {
    let kind = MessageKind::DenyFile.as_str();
    let offerer_id = request.payload.as_str();

    let denied = {
        let mut state = hub.write().await;
        if state.user_for_connection(conn.id()).is_none() {
            return Response::error(kind, "Unknown user");
        }

        state.transfers_mut().revoke(offerer_id);
        state
            .connection_id_for_user(offerer_id)
            .is_some_and(|offerer| state.transfers_mut().deny(offerer, conn.id()))
    };

    if denied {
        tracing::debug!(from = offerer_id, conn = %conn.id(), "file request denied");
        Response::ok(kind).with_message("Denied")
    } else {
        Response::error(kind, "No pending file request")
    }
}
