pub mod klines;
pub mod types;

pub use klines::{parse_klines_body, KlineApiClient};
pub use types::*;
