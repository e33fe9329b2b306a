pub mod time;

pub use time::{format_timestamp, now_millis, parse_limit, parse_timestamp};
