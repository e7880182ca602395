// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8765;
pub const HEALTH_PATH: &str = "health";

// Moderation constants
pub const MAX_CONTEXT_MESSAGES: usize = 10;
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";
pub const DEFAULT_MODERATION_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_CLASSIFIER_TIMEOUT_SECS: u64 = 15;
pub const BAN_REASON: &str = "Harmful content detected";

// Transport constants
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
/// Inbound frame ceiling: base64 inflates the image limit by 4/3, plus JSON framing.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 10;

// WebSocket close codes
pub const POLICY_VIOLATION_CLOSE_CODE: u16 = 1008;
pub const BANNED_ON_CONNECT_REASON: &str = "IP banned";
