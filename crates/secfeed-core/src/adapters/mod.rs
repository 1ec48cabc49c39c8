mod yahoo;

pub use yahoo::{YahooProvider, SUMMARY_MODULES};
