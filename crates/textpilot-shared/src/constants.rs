/// Application name
pub const APP_NAME: &str = "TextPilot";

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8082;

/// Interval between QR stream frames while not ready
pub const QR_POLL_INTERVAL_MS: u64 = 3_000;

/// Interval between readiness stream frames while not ready
pub const READY_POLL_INTERVAL_MS: u64 = 1_000;

/// Number of recent message ids remembered by the broker for dedup
pub const DEFAULT_DEDUP_WINDOW: usize = 4_096;

/// SSE keep-alive comment interval in seconds
pub const SSE_KEEPALIVE_SECS: u64 = 15;

/// How long contact / profile picture lookups stay cached
pub const LOOKUP_CACHE_TTL_SECS: i64 = 300;

/// HTTP routes, shared by the server router and the client
pub mod routes {
    pub const HEALTH: &str = "/health";
    pub const INFO: &str = "/info";
    pub const STATUS: &str = "/whatsapp/status";
    pub const DISCONNECT: &str = "/whatsapp/disconnect";
    pub const STREAM_QR: &str = "/whatsapp/stream/qr";
    pub const STREAM_READY: &str = "/whatsapp/stream/ready";
    pub const STREAM_MESSAGES: &str = "/whatsapp/stream/messages";
    pub const STREAM_EVENTS: &str = "/whatsapp/stream/events";
    pub const MESSAGES: &str = "/whatsapp/messages";
    pub const MESSAGE_BY_ID: &str = "/whatsapp/messages/{id}";
    pub const CHATS: &str = "/whatsapp/chats";
    pub const CHAT_BY_ID: &str = "/whatsapp/chats/{id}";
    pub const CONTACT: &str = "/whatsapp/contacts/{id}";
    pub const CONTACT_PICTURE: &str = "/whatsapp/contacts/{id}/picture";

    /// Fill the `{id}` placeholder of a route template. The id is
    /// percent-encoded so it always stays a single path segment.
    pub fn with_id(template: &str, id: &str) -> String {
        template.replace("{id}", &urlencoding::encode(id))
    }

}
