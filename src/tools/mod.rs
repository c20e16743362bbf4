//! Tools the assistants call.
//!
//! - Web search: the `SearchBackend` seam and its Tavily client
//! - Flight, accommodation and car rental: search plus mocked bookings
//! - EAM: work-request creation against the configured service
//! - Search and finance: document links and invoice lookups

use std::ops::RangeInclusive;

use chrono::NaiveDate;
use rand::Rng;

pub mod accommodation;
pub mod car_rental;
pub mod eam;
pub mod finance;
pub mod flight;
pub mod search;
pub mod web_search;

pub use accommodation::accommodation_toolkit;
pub use car_rental::car_rental_toolkit;
pub use eam::{
    eam_toolkit, Classification, EamClient, ModelClassifier, Priority, RequestType,
    WorkRequestClassifier,
};
pub use finance::finance_toolkit;
pub use flight::flight_toolkit;
pub use search::search_toolkit;
pub use web_search::{SearchBackend, SearchResult, StaticSearch, TavilyClient, UnconfiguredSearch};

/// `prefix` followed by a random number of exactly `digits` digits.
pub(crate) fn confirmation_code(prefix: &str, digits: u32) -> String {
    let low = 10u64.pow(digits.saturating_sub(1));
    let high = 10u64.pow(digits) - 1;
    format!("{prefix}{}", rand::thread_rng().gen_range(low..=high))
}

pub(crate) fn random_fee(range: RangeInclusive<u32>) -> u32 {
    rand::thread_rng().gen_range(range)
}

pub(crate) fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub(crate) fn plural(count: i64, word: &str) -> String {
    if count == 1 {
        word.to_string()
    } else {
        format!("{word}s")
    }
}

/// Whole days from `start` to `end`, both `YYYY-MM-DD`.
pub(crate) fn days_between(start: &str, end: &str) -> std::result::Result<i64, String> {
    let parse = |value: &str| {
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map_err(|err| format!("invalid date `{value}`: {err}"))
    };
    Ok((parse(end)? - parse(start)?).num_days())
}

/// Optional text argument, treating an empty string as absent.
pub(crate) fn given(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}
