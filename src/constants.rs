pub const DEFAULT_DB: &str = "mensa.sqlite";

pub const ETH_API_URL: &str = "https://idapps.ethz.ch";
pub const ETH_CLIENT_ID: &str = "ethz-wcms";
pub const ETH_INFO_URL: &str =
    "https://ethz.ch/de/campus/erleben/gastronomie-und-einkaufen/gastronomie/restaurants-und-cafeterias";

pub const UZH_API_URL: &str = "https://api.zfv.ch";
pub const UZH_ORGANISATION: &str = "uzh";
pub const UZH_INFO_URL: &str = "https://www.mensa.uzh.ch/de/menueplaene";

/// a fetch record younger than this counts as fresh
pub const REFRESH_THRESHOLD_HOURS: i64 = 12;
/// cached menus older than this are swept
pub const RETENTION_DAYS: i64 = 1;

pub const CONNECT_TIMEOUT_SECS: u64 = 5;
pub const REQUEST_TIMEOUT_SECS: u64 = 10;
