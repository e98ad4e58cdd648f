/// Longest accepted requester name, in bytes.
pub const MAX_NAME_LEN: usize = 200;

/// Longest accepted contact address, in bytes.
pub const MAX_EMAIL_LEN: usize = 320;

/// Longest accepted free-text note, in bytes.
pub const MAX_NOTES_LEN: usize = 4_000;

/// Longest stay a single request may cover.
pub const MAX_STAY_NIGHTS: i64 = 366;

/// Longest administrator block, in days.
pub const MAX_BLOCK_DAYS: i64 = 3 * 366;
