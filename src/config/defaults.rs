//! Default values for configuration

pub fn default_listen() -> String {
    "0.0.0.0".to_string()
}

pub fn default_port() -> u16 {
    8080
}

pub fn default_driver() -> String {
    "sqlite".to_string()
}

pub fn default_connection_string() -> String {
    "siteindex.db".to_string()
}

/// Requests per minute per source
pub fn default_speed() -> u32 {
    10
}

/// Combined byte budget for title + description + content per page
pub fn default_size_limit() -> usize {
    500_000
}

pub fn default_max_depth() -> i64 {
    5
}

/// Days between refreshes of an already-indexed page
pub fn default_refresh_min_age() -> i64 {
    30
}

/// Requests per minute to the embeddings API
pub fn default_embed_speed() -> u32 {
    30
}

pub fn default_embed_batch_size() -> i64 {
    32
}

/// Tokens per chunk
pub fn default_chunk_size() -> usize {
    200
}

/// Token overlap between adjacent chunks
pub fn default_chunk_overlap() -> usize {
    30
}
