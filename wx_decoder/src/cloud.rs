use std::fmt;

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take},
    character::complete::{alpha0, u32},
    combinator::{all_consuming, map_parser, value},
};
use serde::{Deserialize, Serialize};

/// Sky coverage of a single cloud layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloudCoverage {
    Few,                // FEW
    Scattered,          // SCT
    Broken,             // BKN
    Overcast,           // OVC
    VerticalVisibility, // VV
    Clear,              // SKC
}

impl CloudCoverage {
    pub const fn code(&self) -> &'static str {
        match self {
            CloudCoverage::Few => "FEW",
            CloudCoverage::Scattered => "SCT",
            CloudCoverage::Broken => "BKN",
            CloudCoverage::Overcast => "OVC",
            CloudCoverage::VerticalVisibility => "VV",
            CloudCoverage::Clear => "SKC",
        }
    }

    /// BKN and OVC count as a ceiling for big-change detection.
    pub const fn is_ceiling(&self) -> bool {
        matches!(self, CloudCoverage::Broken | CloudCoverage::Overcast)
    }
}

impl fmt::Display for CloudCoverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudLayer {
    pub coverage: CloudCoverage,
    pub base_ft: u32,
}

/// One cloud group, e.g. `FEW020`, `BKN040CB`, `VV008`. The height digits are
/// hundreds of feet; a trailing cloud type (CB, TCU) is accepted and dropped.
pub(crate) fn nom_cloud_layer(input: &str) -> IResult<&str, CloudLayer> {
    (
        alt((
            value(CloudCoverage::Few, tag("FEW")),
            value(CloudCoverage::Scattered, tag("SCT")),
            value(CloudCoverage::Broken, tag("BKN")),
            value(CloudCoverage::Overcast, tag("OVC")),
            value(CloudCoverage::VerticalVisibility, tag("VV")),
        )),
        map_parser(take(3usize), all_consuming(u32)),
        alpha0,
    )
        .map(|(coverage, hundreds, _cloud_type)| CloudLayer {
            coverage,
            base_ft: hundreds * 100,
        })
        .parse(input)
}
