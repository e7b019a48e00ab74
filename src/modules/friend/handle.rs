use actix_web::{delete, get, post, put, web, HttpRequest};
use uuid::Uuid;

use crate::{
    api::{error, success},
    middlewares::get_claims,
    modules::{
        friend::{
            model::{FriendInputBody, PanelSnapshot, SubmitFriendRequestBody},
            panel::{FriendsPanel, PanelRegistry},
            repository_pg::FriendshipStorePg,
        },
        user::repository_pg::UserDirectoryPg,
    },
    utils::ValidatedJson,
};

pub type FriendsRegistry = PanelRegistry<FriendshipStorePg, UserDirectoryPg>;
pub type FriendsPanelPg = FriendsPanel<FriendshipStorePg, UserDirectoryPg>;

async fn session_panel(
    registry: &FriendsRegistry,
    req: &HttpRequest,
) -> Result<FriendsPanelPg, error::Error> {
    let user_id = get_claims(req)?.sub;
    Ok(registry.panel_for(user_id).await)
}

#[get("/")]
pub async fn get_panel(
    registry: web::Data<FriendsRegistry>,
    req: HttpRequest,
) -> Result<success::Success<PanelSnapshot>, error::Error> {
    let panel = session_panel(&registry, &req).await?;
    Ok(success::Success::ok(Some(panel.snapshot())).message("Friends retrieved successfully"))
}

#[post("/refresh")]
pub async fn refresh_panel(
    registry: web::Data<FriendsRegistry>,
    req: HttpRequest,
) -> Result<success::Success<PanelSnapshot>, error::Error> {
    let panel = session_panel(&registry, &req).await?;
    panel.refresh().await;
    Ok(success::Success::ok(Some(panel.snapshot())))
}

#[put("/input")]
pub async fn set_friend_input(
    registry: web::Data<FriendsRegistry>,
    body: ValidatedJson<FriendInputBody>,
    req: HttpRequest,
) -> Result<success::Success<PanelSnapshot>, error::Error> {
    let panel = session_panel(&registry, &req).await?;
    panel.set_input(&body.0.value);
    Ok(success::Success::ok(Some(panel.snapshot())))
}

#[post("/requests")]
pub async fn submit_friend_request(
    registry: web::Data<FriendsRegistry>,
    body: ValidatedJson<SubmitFriendRequestBody>,
    req: HttpRequest,
) -> Result<success::Success<PanelSnapshot>, error::Error> {
    let panel = session_panel(&registry, &req).await?;
    if let Some(username) = &body.0.username {
        panel.set_input(username);
    }
    panel.submit_friend_request(&panel.input()).await;
    Ok(success::Success::ok(Some(panel.snapshot())))
}

#[post("/requests/{requester_id}/accept")]
pub async fn accept_friend_request(
    registry: web::Data<FriendsRegistry>,
    requester_id: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<success::Success<PanelSnapshot>, error::Error> {
    let panel = session_panel(&registry, &req).await?;
    panel.respond_to_request(*requester_id, true).await;
    Ok(success::Success::ok(Some(panel.snapshot())))
}

#[post("/requests/{requester_id}/decline")]
pub async fn decline_friend_request(
    registry: web::Data<FriendsRegistry>,
    requester_id: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<success::Success<PanelSnapshot>, error::Error> {
    let panel = session_panel(&registry, &req).await?;
    panel.respond_to_request(*requester_id, false).await;
    Ok(success::Success::ok(Some(panel.snapshot())))
}

#[delete("/session")]
pub async fn end_session(
    registry: web::Data<FriendsRegistry>,
    req: HttpRequest,
) -> Result<success::Success<()>, error::Error> {
    let user_id = get_claims(&req)?.sub;
    registry.unmount(&user_id);
    Ok(success::Success::no_content())
}
