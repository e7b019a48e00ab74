/// WebSocket HTTP handler for the live friends panel.
///
/// - Inbound:  client frame -> `ClientMessage` -> panel action
/// - Outbound: panel change -> `ServerMessage::Snapshot` -> client
///
/// Each connection counts as a live view; the panel is unmounted when the
/// user's last connection closes.
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_ws::{Message, MessageStream, Session};

use super::message::{ClientMessage, ServerMessage};
use crate::{
    middlewares::get_claims,
    modules::{
        friend::{handle::FriendsRegistry, panel::FriendsPanel, repository::FriendshipStore},
        user::repository::UserDirectory,
    },
};

/// Endpoint: GET /api/friends/live
pub async fn live_panel(
    req: HttpRequest,
    stream: web::Payload,
    registry: web::Data<FriendsRegistry>,
) -> Result<HttpResponse, Error> {
    let user_id = get_claims(&req)?.sub;
    let (response, mut ws_session, msg_stream) = actix_ws::handle(&req, stream)?;

    actix_web::rt::spawn(async move {
        let panel = registry.open_view(user_id).await;

        run_live_view(&panel, &mut ws_session, msg_stream).await;

        let _ = ws_session.close(None).await;
        registry.close_view(&panel);
        tracing::debug!("Live friends panel for {} closed", user_id);
    });

    Ok(response)
}

async fn run_live_view<R, U>(
    panel: &FriendsPanel<R, U>,
    ws_session: &mut Session,
    mut msg_stream: MessageStream,
) where
    R: FriendshipStore + 'static,
    U: UserDirectory + 'static,
{
    let mut updates = panel.updates();
    let first = ServerMessage::Snapshot { panel: updates.snapshot() };
    if !send(ws_session, &first).await {
        return;
    }

    loop {
        tokio::select! {
            msg = msg_stream.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => handle_client_message(panel, client_msg).await,
                            Err(e) => {
                                tracing::warn!(
                                    "Could not parse client message: {} - raw: {}",
                                    e,
                                    text.chars().take(100).collect::<String>()
                                );
                                Some(ServerMessage::Error { message: "Unknown message".into() })
                            }
                        };
                        if let Some(reply) = reply {
                            if !send(ws_session, &reply).await {
                                break;
                            }
                        }
                    }

                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_session.pong(&data).await {
                            tracing::error!("Could not send pong: {}", e);
                            break;
                        }
                    }

                    Some(Ok(Message::Close(reason))) => {
                        tracing::info!("WebSocket close frame: {:?}", reason);
                        break;
                    }

                    Some(Ok(Message::Binary(_))) => {
                        tracing::warn!("Binary messages are not supported");
                    }

                    Some(Ok(Message::Pong(_) | Message::Continuation(_) | Message::Nop)) => {}

                    Some(Err(e)) => {
                        tracing::error!("WebSocket protocol error: {}", e);
                        break;
                    }

                    None => break,
                }
            }

            changed = updates.changed() => {
                if !changed {
                    break;
                }
                let snapshot = ServerMessage::Snapshot { panel: updates.snapshot() };
                if !send(ws_session, &snapshot).await {
                    break;
                }
            }
        }
    }
}

async fn handle_client_message<R, U>(
    panel: &FriendsPanel<R, U>,
    msg: ClientMessage,
) -> Option<ServerMessage>
where
    R: FriendshipStore + 'static,
    U: UserDirectory + 'static,
{
    if let Err(e) = msg.validate() {
        tracing::debug!("Rejected client message {:?}: {}", msg, e);
        return Some(ServerMessage::Error { message: e.to_string() });
    }

    match msg {
        ClientMessage::SetInput { value } => panel.set_input(&value),
        ClientMessage::SubmitFriendRequest { username } => {
            if let Some(username) = username {
                panel.set_input(&username);
            }
            panel.submit_friend_request(&panel.input()).await;
        }
        ClientMessage::RespondToRequest { requester_id, accept } => {
            panel.respond_to_request(requester_id, accept).await;
        }
        ClientMessage::Refresh => panel.refresh().await,
        ClientMessage::Ping => return Some(ServerMessage::Pong),
    }
    // Panel changes reach the client through the update stream.
    None
}

async fn send(ws_session: &mut Session, msg: &ServerMessage) -> bool {
    let Some(json) = msg.to_json() else {
        return true;
    };
    if ws_session.text(json).await.is_err() {
        tracing::error!("Could not send message to WebSocket client");
        return false;
    }
    true
}
