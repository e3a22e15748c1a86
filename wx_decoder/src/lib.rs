pub mod cloud;
pub mod metar;
pub mod taf;
pub mod weather;
pub mod wind;

pub use metar::{ParseError, ParsedMetar, parse_metar};
pub use taf::{ParsedTaf, parse_taf};
