pub mod user {
    pub mod schema;
    pub mod repository;
    pub mod repository_pg;
}

pub mod friend {
    pub mod schema;
    pub mod model;
    pub mod repository;
    pub mod repository_pg;
    pub mod policy;
    pub mod service;
    pub mod panel;
    pub mod handle;
    pub mod route;
}

pub mod websocket;
