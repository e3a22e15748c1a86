use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take, take_while_m_n},
    character::complete::{char, u32},
    combinator::{all_consuming, map_parser, opt, value},
    sequence::preceded,
};

/// Surface wind as reported, e.g. `12015KT`, `12015G25KT`, `VRB05KT`.
/// A `VRB` direction is kept absent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wind {
    pub dir_deg: Option<u16>,
    pub speed_kt: f64,
    pub gust_kt: Option<f64>,
}

pub(crate) fn nom_wind(input: &str) -> IResult<&str, Wind> {
    (
        alt((
            value(None, tag("VRB")),
            map_parser(take(3usize), all_consuming(u32)).map(|d| Some((d % 360) as u16)),
        )),
        digits_2_3,
        opt(preceded(char('G'), digits_2_3)),
        tag("KT"),
    )
        .map(|(dir_deg, speed, gust, _)| Wind {
            dir_deg,
            speed_kt: f64::from(speed),
            gust_kt: gust.map(f64::from),
        })
        .parse(input)
}

fn digits_2_3(input: &str) -> IResult<&str, u32> {
    map_parser(
        take_while_m_n(2, 3, |c: char| c.is_ascii_digit()),
        all_consuming(u32),
    )
    .parse(input)
}

/// First token that parses as a wind group, with its position in the token
/// stream. Visibility matching starts right after it.
pub(crate) fn find_wind(tokens: &[&str]) -> Option<(usize, Wind)> {
    tokens.iter().enumerate().find_map(|(i, token)| {
        all_consuming(nom_wind)
            .parse(token)
            .ok()
            .map(|(_, wind)| (i, wind))
    })
}
