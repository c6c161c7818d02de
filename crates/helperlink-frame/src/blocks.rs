//! Reusable nested sub-blocks.

use crate::error::{FrameError, Result};
use crate::fields::{FieldSet, Value};
use crate::fixed;

/// A GPS fix, carried as a nested block inside capture reports.
///
/// Coordinates use 3.7 fixed point, altitude 6.4, and the rates 3.6.
#[derive(Debug, Clone, PartialEq)]
pub struct GpsBlock {
    pub lat: f64,
    pub lon: f64,
    pub alt: Option<f64>,
    /// 0 = no fix, 2 = 2D, 3 = 3D.
    pub fix: u8,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub precision: Option<f64>,
    pub ts_sec: u64,
    pub ts_usec: u32,
    pub gps_type: String,
    pub name: String,
    pub uuid: Option<String>,
}

impl GpsBlock {
    const LAT: u8 = 1;
    const LON: u8 = 2;
    const ALT: u8 = 3;
    const FIX: u8 = 4;
    const SPEED: u8 = 5;
    const HEADING: u8 = 6;
    const PRECISION: u8 = 7;
    const TS_SEC: u8 = 8;
    const TS_USEC: u8 = 9;
    const TYPE: u8 = 10;
    const NAME: u8 = 11;
    const UUID: u8 = 12;

    pub fn to_fields(&self) -> Result<FieldSet> {
        let mut fields = FieldSet::new()
            .with(Self::LAT, Value::U32(fixed::encode_latlon(self.lat)?))
            .with(Self::LON, Value::U32(fixed::encode_latlon(self.lon)?))
            .with(Self::FIX, Value::U8(self.fix))
            .with(Self::TS_SEC, Value::U64(self.ts_sec))
            .with(Self::TS_USEC, Value::U32(self.ts_usec))
            .with(Self::TYPE, Value::Str(self.gps_type.clone()))
            .with(Self::NAME, Value::Str(self.name.clone()));
        if let Some(alt) = self.alt {
            fields.insert(Self::ALT, Value::U32(fixed::encode_altitude(alt)?));
        }
        for (id, rate) in [
            (Self::SPEED, self.speed),
            (Self::HEADING, self.heading),
            (Self::PRECISION, self.precision),
        ] {
            if let Some(rate) = rate {
                fields.insert(id, Value::U32(fixed::encode_rate(rate)?));
            }
        }
        if let Some(uuid) = &self.uuid {
            fields.insert(Self::UUID, Value::Str(uuid.clone()));
        }
        Ok(fields)
    }

    pub fn from_fields(fields: &FieldSet) -> Result<Self> {
        let required_u32 = |id: u8| -> Result<u32> {
            fields.u32(id)?.ok_or(FrameError::MissingField(id))
        };
        Ok(Self {
            lat: fixed::decode_latlon(required_u32(Self::LAT)?),
            lon: fixed::decode_latlon(required_u32(Self::LON)?),
            alt: fields.u32(Self::ALT)?.map(fixed::decode_altitude),
            fix: fields.u8(Self::FIX)?.unwrap_or(0),
            speed: fields.u32(Self::SPEED)?.map(fixed::decode_rate),
            heading: fields.u32(Self::HEADING)?.map(fixed::decode_rate),
            precision: fields.u32(Self::PRECISION)?.map(fixed::decode_rate),
            ts_sec: fields.u64(Self::TS_SEC)?.unwrap_or(0),
            ts_usec: fields.u32(Self::TS_USEC)?.unwrap_or(0),
            gps_type: fields.str(Self::TYPE)?.unwrap_or_default().to_string(),
            name: fields.str(Self::NAME)?.unwrap_or_default().to_string(),
            uuid: fields.str(Self::UUID)?.map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_body, decode_header, Frame, Generation, MAX_FRAME_SIZE};
    use crate::command::Command;
    use crate::fixed::{ALTITUDE_EPSILON, LATLON_EPSILON, RATE_EPSILON};

    fn fix() -> GpsBlock {
        GpsBlock {
            lat: -33.8688197,
            lon: 151.2092955,
            alt: Some(58.2),
            fix: 3,
            speed: Some(12.5),
            heading: Some(271.25),
            precision: None,
            ts_sec: 1_700_000_000,
            ts_usec: 250_000,
            gps_type: "gpsd".to_string(),
            name: "roof".to_string(),
            uuid: None,
        }
    }

    #[test]
    fn gps_block_survives_a_v3_frame() {
        let block = fix();
        let fields = FieldSet::new().with(1, Value::Block(block.to_fields().unwrap()));
        let frame = Frame::new(Generation::V3, Command::DataReport, 3, fields);
        let wire = frame.encode().unwrap();
        assert_eq!(wire.len() % 4, 0);

        let header = decode_header(&wire, MAX_FRAME_SIZE).unwrap();
        let decoded = decode_body(&header, &wire[header.header_len..]).unwrap();
        let inner = decoded.fields.block(1).unwrap().unwrap();
        let back = GpsBlock::from_fields(inner).unwrap();

        assert!((back.lat - block.lat).abs() <= LATLON_EPSILON);
        assert!((back.lon - block.lon).abs() <= LATLON_EPSILON);
        assert!((back.alt.unwrap() - 58.2).abs() <= ALTITUDE_EPSILON);
        assert!((back.heading.unwrap() - 271.25).abs() <= RATE_EPSILON);
        assert_eq!(back.precision, None);
        assert_eq!(back.fix, 3);
        assert_eq!(back.name, "roof");
    }

    #[test]
    fn gps_block_requires_coordinates() {
        let fields = FieldSet::new().with(4, Value::U8(2));
        assert!(matches!(
            GpsBlock::from_fields(&fields),
            Err(FrameError::MissingField(1))
        ));
    }

    #[test]
    fn out_of_range_coordinate_fails_encode() {
        let mut block = fix();
        block.lon = 200.0;
        assert!(block.to_fields().is_err());
    }
}
