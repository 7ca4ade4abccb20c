pub mod network {
    pub const DEFAULT_API_BASE_URL: &str = "https://slack.com/api";
    pub const DEFAULT_EDGE_BASE_URL: &str = "https://edgeapi.slack.com/cache";
    pub const TIMEOUT_API_REQUEST_MS: u64 = 30_000;
    pub const TIMEOUT_CONNECTION_MS: u64 = 5_000;
    pub const POOL_IDLE_TIMEOUT_MS: u64 = 90_000;
}

pub mod retry {
    /// Initial try plus one retry.
    pub const MAX_ATTEMPTS: usize = 2;
    pub const BASE_DELAY_MS: u64 = 250;
    pub const JITTER: f64 = 0.2;
    pub const DEFAULT_RETRY_AFTER_MS: u64 = 1_000;
    /// A backend hint above this is surfaced instead of slept through.
    pub const MAX_RETRY_AFTER_MS: u64 = 60_000;
    pub const STATUS_CODES: &[u16] = &[408, 500, 502, 503, 504];
}

pub mod pagination {
    pub const MAX_DIRECTORY_PAGES: usize = 500;
    pub const USERS_PAGE_SIZE: usize = 1_000;
    pub const CHANNELS_PAGE_SIZE: usize = 999;
    pub const CHANNEL_TYPES: &str = "public_channel,private_channel,mpim,im";
}

pub mod cache {
    pub const DEFAULT_TTL_MS: u64 = 3_600_000;
    pub const DEFAULT_MIN_FORCE_REFRESH_MS: u64 = 30_000;
    pub const FAILED_REFRESH_RETRY_MS: u64 = 60_000;
    pub const MIN_REFRESH_TICK_MS: u64 = 1_000;
    pub const PERSISTED_VERSION: u32 = 1;
    pub const USERS_FILE_NAME: &str = "users_cache.json";
    pub const CHANNELS_FILE_NAME: &str = "channels_cache_v2.json";
    pub const APP_DIR_NAME: &str = "slack-bridge";
}

pub mod rate_limit {
    pub const MINUTE_WINDOW_MS: u64 = 60_000;
    pub const SECOND_WINDOW_MS: u64 = 1_000;
    pub const BULK_PER_WINDOW: u32 = 20;
    pub const BULK_BURST: u32 = 3;
    pub const STANDARD_PER_WINDOW: u32 = 50;
    pub const STANDARD_BURST: u32 = 5;
    pub const BOOSTED_PER_WINDOW: u32 = 100;
    pub const BOOSTED_BURST: u32 = 10;
    /// Posting uses the one-second window.
    pub const POSTING_PER_WINDOW: u32 = 1;
    pub const POSTING_BURST: u32 = 1;
}

pub mod browser {
    pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";
    pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";
    pub const EDGE_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36 Edg/136.0.0.0";
    pub const FIREFOX_USER_AGENT: &str =
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:138.0) Gecko/20100101 Firefox/138.0";
    pub const SAFARI_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.4 Safari/605.1.15";
    pub const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
    pub const SESSION_COOKIE_NAME: &str = "d";
}

pub mod session_form {
    pub const REASON_FIELD: &str = "_x_reason";
    pub const MODE_FIELD: &str = "_x_mode";
    pub const SONIC_FIELD: &str = "_x_sonic";
    pub const APP_NAME_FIELD: &str = "_x_app_name";
    pub const MODE_VALUE: &str = "online";
    pub const SONIC_VALUE: &str = "true";
    pub const APP_NAME_VALUE: &str = "client";
}

pub mod backend_errors {
    pub const AUTH: &[&str] = &[
        "invalid_auth",
        "not_authed",
        "token_expired",
        "token_revoked",
        "account_inactive",
    ];
    pub const RATE_LIMITED: &str = "ratelimited";
}

pub mod search {
    pub const DEFAULT_LIMIT: usize = 10;
    pub const MAX_LIMIT: usize = 100;
}

pub mod limits {
    pub const LOG_BODY_SNIPPET_BYTES: usize = 512;
}

pub mod gates {
    pub const ADD_MESSAGE: &str = "SLACK_MCP_ADD_MESSAGE_TOOL";
    pub const REACTION: &str = "SLACK_MCP_REACTION_TOOL";
    pub const ATTACHMENT: &str = "SLACK_MCP_ATTACHMENT_TOOL";
    pub const SAVED_LIST: &str = "SLACK_MCP_SAVED_LIST_TOOL";
    pub const SAVED_COMPLETE: &str = "SLACK_MCP_SAVED_COMPLETE_TOOL";
    pub const ALL: &[&str] = &[ADD_MESSAGE, REACTION, ATTACHMENT, SAVED_LIST, SAVED_COMPLETE];
}
