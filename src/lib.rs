pub mod app;
pub mod config;
pub mod constants;
pub mod errors;
pub mod managers;

pub mod mcp {
    pub mod protocol;
    pub mod server;
}

pub mod services {
    pub mod cache_file;
    pub mod credentials;
    pub mod directory;
    pub mod directory_cache;
    pub mod directory_sources;
    pub mod logger;
    pub mod rate_limiter;
    pub mod refresh;
    pub mod router;
    pub mod transport;
}

pub mod utils {
    pub mod duration;
    pub mod feature_flags;
    pub mod fs_atomic;
    pub mod paths;
    pub mod redact;
}
