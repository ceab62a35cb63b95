/// Longest accepted period, lane or stage name, in bytes.
pub const MAX_NAME_LEN: usize = 128;

/// Upper bound on rows per table.
pub const MAX_ROWS_PER_TABLE: usize = 1_000_000;

/// Largest page a period listing may request.
pub const MAX_PAGE_SIZE: usize = 100;

/// Page size used when a listing does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Longest SQL statement the wire layer will parse, in bytes.
pub const MAX_SQL_LEN: usize = 16 * 1024;
