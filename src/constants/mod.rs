pub struct Env {
    pub jwt_secret: String,
    pub jwt_audience: Option<String>,
    pub database_url: String,
    pub frontend_url: String,
    pub ip: String,
    pub port: u16,
    pub notice_duration_ms: u64,
    pub request_cooldown_secs: i64,
    pub panel_idle_secs: u64,
}

impl Env {
    fn new() -> Self {
        let jwt_secret = std::env::var("SECRET_KEY")
            .expect("SECRET_KEY must be set in .env file or environment variable");
        let jwt_audience = std::env::var("JWT_AUDIENCE").ok().filter(|aud| !aud.is_empty());

        let database_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set in .env file or environment variable");

        let frontend_url =
            std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
        let ip = std::env::var("IP").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .expect("PORT must be a valid u16 integer");

        let notice_duration_ms = std::env::var("NOTICE_DURATION_MS")
            .unwrap_or_else(|_| "1500".to_string())
            .parse::<u64>()
            .expect("NOTICE_DURATION_MS must be a valid u64 integer");
        let request_cooldown_secs = std::env::var("REQUEST_COOLDOWN_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse::<i64>()
            .expect("REQUEST_COOLDOWN_SECS must be a valid i64 integer");
        let panel_idle_secs = std::env::var("PANEL_IDLE_SECS")
            .unwrap_or_else(|_| "900".to_string())
            .parse::<u64>()
            .expect("PANEL_IDLE_SECS must be a valid u64 integer");

        Env {
            jwt_secret,
            jwt_audience,
            database_url,
            frontend_url,
            ip,
            port,
            notice_duration_ms,
            request_cooldown_secs,
            panel_idle_secs,
        }
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

/// Postgres NOTIFY channel fed by the `friendship` table trigger.
pub const FRIENDSHIP_CHANNEL: &str = "friendship_changes";
