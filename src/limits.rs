//! Hard caps on request shapes and stored field sizes.

/// Max ids passed to one batched store lookup. Larger id sets are split.
pub const MAX_BATCH_IDS: usize = 10_000;

/// Venue listing page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_LIMIT: u32 = 10;

/// Largest page a venue listing may request.
pub const MAX_PAGE_LIMIT: u32 = 500;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_TEXT_LEN: usize = 8_192;
pub const MAX_URL_LEN: usize = 2_048;
pub const MAX_EMAIL_LEN: usize = 255;
pub const MAX_PASSWORD_LEN: usize = 1_024;
pub const MAX_TOKEN_LEN: usize = 4_096;
