use std::fmt;

use serde::{Deserialize, Serialize};

/// Phenomenon codes the pragmatic parser recognises. Intensity prefixes
/// (`+`/`-`) are stripped before matching and are not captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeatherCode {
    RA, // Rain
    SN, // Snow
    TS, // Thunderstorm
    BR, // Mist
    FG, // Fog
    DZ, // Drizzle
    PL, // Ice pellets
    SG, // Snow grains
    GR, // Hail
    GS, // Small hail / snow pellets
    UP, // Unknown precipitation
    HZ, // Haze
    FU, // Smoke
    VA, // Volcanic ash
    DU, // Widespread dust
    SA, // Sand
    PO, // Dust whirls
    SQ, // Squalls
    FC, // Funnel cloud
    SS, // Sandstorm
    DS, // Duststorm
    IC, // Ice crystals
    PE, // Ice pellets (legacy)
    SH, // Showers
    BL, // Blowing
    DR, // Drifting
    FZ, // Freezing
    MI, // Shallow
    BC, // Patches
    PR, // Partial
    VC, // In the vicinity
    RE, // Recent
}

impl WeatherCode {
    pub const fn code(&self) -> &'static str {
        match self {
            WeatherCode::RA => "RA",
            WeatherCode::SN => "SN",
            WeatherCode::TS => "TS",
            WeatherCode::BR => "BR",
            WeatherCode::FG => "FG",
            WeatherCode::DZ => "DZ",
            WeatherCode::PL => "PL",
            WeatherCode::SG => "SG",
            WeatherCode::GR => "GR",
            WeatherCode::GS => "GS",
            WeatherCode::UP => "UP",
            WeatherCode::HZ => "HZ",
            WeatherCode::FU => "FU",
            WeatherCode::VA => "VA",
            WeatherCode::DU => "DU",
            WeatherCode::SA => "SA",
            WeatherCode::PO => "PO",
            WeatherCode::SQ => "SQ",
            WeatherCode::FC => "FC",
            WeatherCode::SS => "SS",
            WeatherCode::DS => "DS",
            WeatherCode::IC => "IC",
            WeatherCode::PE => "PE",
            WeatherCode::SH => "SH",
            WeatherCode::BL => "BL",
            WeatherCode::DR => "DR",
            WeatherCode::FZ => "FZ",
            WeatherCode::MI => "MI",
            WeatherCode::BC => "BC",
            WeatherCode::PR => "PR",
            WeatherCode::VC => "VC",
            WeatherCode::RE => "RE",
        }
    }

    /// Look a bare code up in the lexicon. The caller strips intensity
    /// prefixes first; compound groups like `SHRA` are not split.
    pub fn from_code(token: &str) -> Option<Self> {
        Some(match token {
            "RA" => WeatherCode::RA,
            "SN" => WeatherCode::SN,
            "TS" => WeatherCode::TS,
            "BR" => WeatherCode::BR,
            "FG" => WeatherCode::FG,
            "DZ" => WeatherCode::DZ,
            "PL" => WeatherCode::PL,
            "SG" => WeatherCode::SG,
            "GR" => WeatherCode::GR,
            "GS" => WeatherCode::GS,
            "UP" => WeatherCode::UP,
            "HZ" => WeatherCode::HZ,
            "FU" => WeatherCode::FU,
            "VA" => WeatherCode::VA,
            "DU" => WeatherCode::DU,
            "SA" => WeatherCode::SA,
            "PO" => WeatherCode::PO,
            "SQ" => WeatherCode::SQ,
            "FC" => WeatherCode::FC,
            "SS" => WeatherCode::SS,
            "DS" => WeatherCode::DS,
            "IC" => WeatherCode::IC,
            "PE" => WeatherCode::PE,
            "SH" => WeatherCode::SH,
            "BL" => WeatherCode::BL,
            "DR" => WeatherCode::DR,
            "FZ" => WeatherCode::FZ,
            "MI" => WeatherCode::MI,
            "BC" => WeatherCode::BC,
            "PR" => WeatherCode::PR,
            "VC" => WeatherCode::VC,
            "RE" => WeatherCode::RE,
            _ => return None,
        })
    }
}

impl fmt::Display for WeatherCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexicon_round_trips() {
        for code in ["RA", "SN", "FG", "BR", "VC", "RE"] {
            assert_eq!(WeatherCode::from_code(code).unwrap().code(), code);
        }
    }

    #[test]
    fn compound_groups_are_not_codes() {
        assert_eq!(WeatherCode::from_code("SHRA"), None);
        assert_eq!(WeatherCode::from_code("+TSRA"), None);
        assert_eq!(WeatherCode::from_code("RMK"), None);
    }
}
