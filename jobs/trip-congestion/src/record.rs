use crate::counters::DropReason;
use chrono::NaiveDateTime;

/// Literal value found in the dropoff-latitude position of a header row.
pub const HEADER_SENTINEL: &str = "dropoff_latitude";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const MIN_FIELDS: usize = 15;
const IDX_DROPOFF_AT: usize = 1;
const IDX_DROPOFF_LAT: usize = 2;
const IDX_DROPOFF_LON: usize = 3;
const IDX_PICKUP_AT: usize = 12;
const IDX_PICKUP_LAT: usize = 13;
const IDX_PICKUP_LON: usize = 14;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

/// One validated trip. Lives only for the duration of one map invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct TripRecord {
    pub pickup_at: NaiveDateTime,
    pub dropoff_at: NaiveDateTime,
    pub pickup: Point,
    pub dropoff: Point,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ParsedLine {
    Header,
    Trip(TripRecord),
}

/// Extracts a trip from one comma-separated input line. Any failure — too few
/// fields, non-numeric coordinate, unparsable timestamp — yields a
/// `DropReason` for the caller to tally; nothing here can fail the job.
pub fn parse_line(line: &str) -> Result<ParsedLine, DropReason> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < MIN_FIELDS {
        return Err(DropReason::Malformed);
    }
    if fields[IDX_DROPOFF_LAT] == HEADER_SENTINEL {
        return Ok(ParsedLine::Header);
    }

    let dropoff = Point {
        lat: parse_coord(fields[IDX_DROPOFF_LAT])?,
        lon: parse_coord(fields[IDX_DROPOFF_LON])?,
    };
    let pickup = Point {
        lat: parse_coord(fields[IDX_PICKUP_LAT])?,
        lon: parse_coord(fields[IDX_PICKUP_LON])?,
    };
    let dropoff_at = parse_timestamp(fields[IDX_DROPOFF_AT])?;
    let pickup_at = parse_timestamp(fields[IDX_PICKUP_AT])?;

    Ok(ParsedLine::Trip(TripRecord {
        pickup_at,
        dropoff_at,
        pickup,
        dropoff,
    }))
}

fn parse_coord(field: &str) -> Result<f64, DropReason> {
    field.trim().parse().map_err(|_| DropReason::Malformed)
}

fn parse_timestamp(field: &str) -> Result<NaiveDateTime, DropReason> {
    NaiveDateTime::parse_from_str(field, TIMESTAMP_FORMAT).map_err(|_| DropReason::Malformed)
}
