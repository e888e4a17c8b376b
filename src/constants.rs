/// User agent string for HTTP requests
pub const USER_AGENT: &str = "mcp-rust-birding-server/0.1.0";

/// eBird API 2.0 base URL
pub const EBIRD_API_BASE: &str = "https://api.ebird.org/v2";

/// Header carrying the eBird API key
pub const EBIRD_TOKEN_HEADER: &str = "x-ebirdapitoken";

/// Nominatim / OpenStreetMap search base URL
pub const NOMINATIM_API_BASE: &str = "https://nominatim.openstreetmap.org";

/// Decimal places kept on resolved coordinates (~11 m)
pub const COORDINATE_PRECISION: i32 = 4;

/// Maximum length of a provider error body passed through to callers
pub const ERROR_DETAIL_LEN: usize = 300;

pub const DEFAULT_BACK_DAYS: u32 = 14;
pub const DEFAULT_MAX_RESULTS: u32 = 100;
pub const DEFAULT_RADIUS_KM: u32 = 25;
pub const DEFAULT_SUMMARY_CAP: usize = 15;
pub const DEFAULT_FANOUT: usize = 5;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_LOCALE: &str = "en";

pub const MAX_BACK_DAYS: u32 = 30;
pub const MAX_RADIUS_KM: u32 = 50;
pub const MAX_RESULTS: u32 = 10_000;

/// Upper bounds on retry settings
pub const MAX_RETRIES: u32 = 10;
pub const MAX_INITIAL_BACKOFF_MS: u64 = 60_000;
