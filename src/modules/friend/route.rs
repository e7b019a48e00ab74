use crate::modules::{friend::handle::*, websocket::handler::live_panel};
use actix_web::web::{get, scope, ServiceConfig};

pub fn configure(cfg: &mut ServiceConfig) {
    cfg.service(
        scope("/friends")
            .route("/live", get().to(live_panel))
            .service(get_panel)
            .service(refresh_panel)
            .service(set_friend_input)
            .service(submit_friend_request)
            .service(accept_friend_request)
            .service(decline_friend_request)
            .service(end_session),
    );
}
