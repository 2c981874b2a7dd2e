//! WKT (Well-Known Text) parser/emitter built with `nom` combinators.

use nom::branch::alt;
use nom::bytes::complete::tag_no_case;
use nom::character::complete::{char, multispace0, multispace1};
use nom::combinator::{map, opt};
use nom::multi::separated_list1;
use nom::number::complete::double;
use nom::sequence::{delimited, pair, preceded};
use nom::IResult;

use crate::core::error::{Error, Result};
use crate::geo::geometry::{Coordinate, Geometry};

fn ws<'a>(input: &'a str) -> IResult<&'a str, &'a str> {
    multispace0(input)
}

fn coordinate(input: &str) -> IResult<&str, Coordinate> {
    let (input, x) = double(input)?;
    let (input, _) = multispace1(input)?;
    let (input, y) = double(input)?;
    let (input, z) = opt(preceded(multispace1, double))(input)?;
    Ok((input, match z {
        Some(z) => Coordinate::new_3d(x, y, z),
        None => Coordinate::new(x, y),
    }))
}

fn coordinate_list(input: &str) -> IResult<&str, Vec<Coordinate>> {
    delimited(
        pair(char('('), ws),
        separated_list1(delimited(ws, char(','), ws), coordinate),
        pair(ws, char(')')),
    )(input)
}

fn ring_list(input: &str) -> IResult<&str, Vec<Vec<Coordinate>>> {
    delimited(
        pair(char('('), ws),
        separated_list1(delimited(ws, char(','), ws), coordinate_list),
        pair(ws, char(')')),
    )(input)
}

fn z_suffix(input: &str) -> IResult<&str, bool> {
    map(opt(preceded(multispace1, tag_no_case("Z"))), |o| o.is_some())(input)
}

fn keyword<'a>(kw: &'static str) -> impl Fn(&'a str) -> IResult<&'a str, &'a str> {
    move |input| tag_no_case(kw)(input)
}

fn point_geom(input: &str) -> IResult<&str, Geometry> {
    let (input, _) = keyword("POINT")(input)?;
    let (input, _) = z_suffix(input)?;
    let (input, _) = ws(input)?;
    let (input, c) = delimited(pair(char('('), ws), coordinate, pair(ws, char(')')))(input)?;
    Ok((input, Geometry::Point(c)))
}

fn linestring_geom(input: &str) -> IResult<&str, Geometry> {
    let (input, _) = keyword("LINESTRING")(input)?;
    let (input, _) = z_suffix(input)?;
    let (input, _) = ws(input)?;
    let (input, cs) = coordinate_list(input)?;
    Ok((input, Geometry::LineString(cs)))
}

fn polygon_geom(input: &str) -> IResult<&str, Geometry> {
    let (input, _) = keyword("POLYGON")(input)?;
    let (input, _) = z_suffix(input)?;
    let (input, _) = ws(input)?;
    let (input, rings) = ring_list(input)?;
    Ok((input, Geometry::Polygon(rings)))
}

fn geometry(input: &str) -> IResult<&str, Geometry> {
    alt((point_geom, linestring_geom, polygon_geom))(input)
}

pub fn parse(input: &str) -> Result<Geometry> {
    let trimmed = input.trim();
    match geometry(trimmed) {
        Ok((rest, g)) if rest.trim().is_empty() => Ok(g),
        Ok((rest, _)) => Err(Error::validation(format!("wkt: trailing input `{}`", rest))),
        Err(e) => Err(Error::validation(format!("wkt: parse failure: {}", e))),
    }
}

fn fmt_coord(c: &Coordinate) -> String {
    match c.z {
        Some(z) => format!("{} {} {}", c.x, c.y, z),
        None => format!("{} {}", c.x, c.y),
    }
}

fn fmt_ring(ring: &[Coordinate]) -> String {
    format!("({})", ring.iter().map(fmt_coord).collect::<Vec<_>>().join(", "))
}

pub fn to_wkt(geom: &Geometry) -> String {
    match geom {
        Geometry::Point(c) => format!("POINT({})", fmt_coord(c)),
        Geometry::LineString(cs) => format!("LINESTRING{}", fmt_ring(cs)),
        Geometry::Polygon(rings) => {
            format!("POLYGON({})", rings.iter().map(|r| fmt_ring(r)).collect::<Vec<_>>().join(", "))
        }
        Geometry::MultiPoint(cs) => {
            format!("MULTIPOINT({})", cs.iter().map(fmt_coord).collect::<Vec<_>>().join(", "))
        }
        Geometry::MultiLineString(lines) => {
            format!("MULTILINESTRING({})", lines.iter().map(|l| fmt_ring(l)).collect::<Vec<_>>().join(", "))
        }
        Geometry::MultiPolygon(polys) => format!(
            "MULTIPOLYGON({})",
            polys
                .iter()
                .map(|p| format!("({})", p.iter().map(|r| fmt_ring(r)).collect::<Vec<_>>().join(", ")))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Geometry::GeometryCollection(gs) => format!(
            "GEOMETRYCOLLECTION({})",
            gs.iter().map(to_wkt).collect::<Vec<_>>().join(", ")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_point() {
        let g = parse("POINT(13.4 52.5)").unwrap();
        assert_eq!(g, Geometry::Point(Coordinate::new(13.4, 52.5)));
    }

    #[test]
    fn parse_polygon_roundtrip_to_wkt() {
        let wkt = "POLYGON((0 0, 4 0, 4 4, 0 4, 0 0))";
        let g = parse(wkt).unwrap();
        let back = to_wkt(&g);
        let reparsed = parse(&back).unwrap();
        assert_eq!(g, reparsed);
    }

    #[test]
    fn parse_linestring_z() {
        let g = parse("LINESTRING Z(0 0 1, 1 1 2)").unwrap();
        match g {
            Geometry::LineString(cs) => {
                assert_eq!(cs.len(), 2);
                assert_eq!(cs[0].z, Some(1.0));
            }
            _ => panic!("expected linestring"),
        }
    }

    #[test]
    fn garbage_input_is_error() {
        assert!(parse("NOT A GEOMETRY").is_err());
    }
}
