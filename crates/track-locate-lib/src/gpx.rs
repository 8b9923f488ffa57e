//! GPX dialect decoder
//!
//! A concrete [`XmlVisitor`] that recognises the `gpx`/`trk`/`trkseg`/`trkpt`
//! vocabulary, materialises typed records and forwards balanced open/close
//! events for each structural level to a user-supplied [`GpxVisitor`]. Leaf
//! children of `trkpt` are routed into the current point record via the path
//! stack, so the whole decode stays single-pass and bounded-memory.

use std::collections::HashMap;
use std::fmt;
use std::io::BufRead;

use time::OffsetDateTime;

use crate::timeindex::{format_instant, parse_instant};
use crate::xml::{XmlContext, XmlParser, XmlVisitor};
use crate::{Error, Result};

/// Attributes of the GPX root element.
///
/// Lives from `gpx_open` to `gpx_close`; the decoder owns it in between.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gpx {
    pub xmlns: String,
    pub xsi: String,
    pub version: f32,
    pub creator: String,
    pub schema_location: String,
    /// Root-level timestamp, when the `time` attribute is present
    pub time: Option<OffsetDateTime>,
}

impl fmt::Display for Gpx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPX<C=[{}]>", self.creator)
    }
}

/// Structural marker for a `trk` element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Track;

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Track<>")
    }
}

/// Structural marker for a `trkseg` element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackSegment;

impl fmt::Display for TrackSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrackSegment<>")
    }
}

/// A single decoded fix.
///
/// `latitude` and `longitude` come from the `trkpt` attributes and are
/// required; everything else comes from optional leaf children and defaults
/// to its zero value when absent. A point without a timestamp is a valid
/// decode result but is excluded from temporal indexing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f32,
    pub course: f32,
    pub speed: f32,
    pub hdop: f32,
    pub src: String,
    pub satellite_count: u8,
    pub time: Option<OffsetDateTime>,
}

impl fmt::Display for TrackPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TrackPoint<LAT=({:.8}) LON=({:.8}) ELV=({:.6}) CRS=({:.6}) SPD=({:.6}) HDOP=({:.6}) SRC=[{}] SAT=({}) TIME=[{}]>",
            self.latitude,
            self.longitude,
            self.elevation,
            self.course,
            self.speed,
            self.hdop,
            self.src,
            self.satellite_count,
            self.time.map(format_instant).unwrap_or_default(),
        )
    }
}

/// Receiver for decoded GPX structure.
///
/// Every method defaults to a no-op, so a visitor implements exactly the
/// levels it cares about. Open/close calls are perfectly balanced for
/// well-formed input; the record passed to a close call is the same one
/// passed to the matching open call.
pub trait GpxVisitor {
    fn gpx_open(&mut self, _gpx: &Gpx) -> Result<()> {
        Ok(())
    }

    fn gpx_close(&mut self, _gpx: &Gpx) -> Result<()> {
        Ok(())
    }

    fn track_open(&mut self, _track: &Track) -> Result<()> {
        Ok(())
    }

    fn track_close(&mut self, _track: &Track) -> Result<()> {
        Ok(())
    }

    fn track_segment_open(&mut self, _segment: &TrackSegment) -> Result<()> {
        Ok(())
    }

    fn track_segment_close(&mut self, _segment: &TrackSegment) -> Result<()> {
        Ok(())
    }

    fn track_point_open(&mut self, _point: &TrackPoint) -> Result<()> {
        Ok(())
    }

    fn track_point_close(&mut self, _point: &TrackPoint) -> Result<()> {
        Ok(())
    }
}

/// Streaming GPX parser driving a [`GpxVisitor`].
///
/// Wraps an [`XmlParser`] with a dispatching visitor that tracks the current
/// record at each structural level. Elements outside the recognised grammar
/// traverse silently.
pub struct GpxParser<R: BufRead, V: GpxVisitor> {
    inner: XmlParser<R, GpxDispatch<V>>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<R: BufRead, V: GpxVisitor> GpxParser<R, V> {
    pub fn new(reader: R, visitor: V) -> Self {
        Self {
            inner: XmlParser::new(
                reader,
                GpxDispatch {
                    visitor,
                    current_gpx: None,
                    current_track: None,
                    current_segment: None,
                    current_point: None,
                },
            ),
        }
    }

    /// Consume the whole stream, dispatching to the visitor.
    pub fn parse(&mut self) -> Result<()> {
        #[cfg(feature = "profiling")]
        profiling::scope!("gpx::parse");
        self.inner.parse()
    }

    /// Borrow the visitor
    #[inline]
    pub fn visitor(&self) -> &V {
        &self.inner.visitor().visitor
    }

    /// Mutably borrow the visitor
    #[inline]
    pub fn visitor_mut(&mut self) -> &mut V {
        &mut self.inner.visitor_mut().visitor
    }

    /// Consume the parser, returning the visitor
    pub fn into_visitor(self) -> V {
        self.inner.into_visitor().visitor
    }
}

/// Internal XML visitor translating raw events into GPX structure.
struct GpxDispatch<V: GpxVisitor> {
    visitor: V,
    current_gpx: Option<Gpx>,
    current_track: Option<Track>,
    current_segment: Option<TrackSegment>,
    current_point: Option<TrackPoint>,
}

impl<V: GpxVisitor> GpxDispatch<V> {
    fn open_gpx(&mut self, attrs: &HashMap<String, String>) -> Result<()> {
        let gpx = Gpx {
            xmlns: attr_string(attrs, "xmlns"),
            xsi: attr_string(attrs, "xsi"),
            creator: attr_string(attrs, "creator"),
            schema_location: attr_string(attrs, "schemaLocation"),
            version: attrs
                .get("version")
                .map(|raw| parse_f32(raw))
                .transpose()?
                .unwrap_or_default(),
            time: attrs
                .get("time")
                .map(|raw| parse_instant(raw))
                .transpose()?,
        };
        self.visitor.gpx_open(&gpx)?;
        self.current_gpx = Some(gpx);
        Ok(())
    }

    fn open_point(&mut self, attrs: &HashMap<String, String>) -> Result<()> {
        let point = TrackPoint {
            latitude: parse_f64(attrs.get("lat").map(String::as_str).unwrap_or_default())?,
            longitude: parse_f64(attrs.get("lon").map(String::as_str).unwrap_or_default())?,
            ..TrackPoint::default()
        };
        self.visitor.track_point_open(&point)?;
        self.current_point = Some(point);
        Ok(())
    }

    fn point_value(&mut self, tag: &str, text: &str) -> Result<()> {
        let Some(point) = self.current_point.as_mut() else {
            return Ok(());
        };
        match tag {
            "ele" => point.elevation = parse_f32(text)?,
            "course" => point.course = parse_f32(text)?,
            "speed" => point.speed = parse_f32(text)?,
            "hdop" => point.hdop = parse_f32(text)?,
            "src" => point.src = text.to_string(),
            "sat" => point.satellite_count = parse_u8(text)?,
            "time" => point.time = Some(parse_instant(text)?),
            _ => {}
        }
        Ok(())
    }
}

impl<V: GpxVisitor> XmlVisitor for GpxDispatch<V> {
    fn handle_start(
        &mut self,
        tag: &str,
        attrs: &HashMap<String, String>,
        _ctx: &XmlContext,
    ) -> Result<()> {
        match tag {
            "gpx" => self.open_gpx(attrs)?,
            "trk" => {
                let track = Track;
                self.visitor.track_open(&track)?;
                self.current_track = Some(track);
            }
            "trkseg" => {
                let segment = TrackSegment;
                self.visitor.track_segment_open(&segment)?;
                self.current_segment = Some(segment);
            }
            "trkpt" => self.open_point(attrs)?,
            _ => {}
        }
        Ok(())
    }

    fn handle_end(&mut self, tag: &str, _ctx: &XmlContext) -> Result<()> {
        match tag {
            "gpx" => {
                if let Some(gpx) = self.current_gpx.take() {
                    self.visitor.gpx_close(&gpx)?;
                }
            }
            "trk" => {
                if let Some(track) = self.current_track.take() {
                    self.visitor.track_close(&track)?;
                }
            }
            "trkseg" => {
                if let Some(segment) = self.current_segment.take() {
                    self.visitor.track_segment_close(&segment)?;
                }
            }
            "trkpt" => {
                if let Some(point) = self.current_point.take() {
                    self.visitor.track_point_close(&point)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_value(&mut self, tag: &str, text: &str, ctx: &XmlContext) -> Result<()> {
        // The closing tag is already popped, so the top of the stack is its
        // parent. Only leaves directly under trkpt carry point data.
        if ctx.node_stack().peek_from_end(0) == Some("trkpt") {
            self.point_value(tag, text)?;
        }
        Ok(())
    }
}

fn attr_string(attrs: &HashMap<String, String>, key: &str) -> String {
    attrs.get(key).cloned().unwrap_or_default()
}

fn parse_f64(raw: &str) -> Result<f64> {
    raw.parse()
        .map_err(|_| Error::InvalidNumber(raw.to_string()))
}

fn parse_f32(raw: &str) -> Result<f32> {
    raw.parse()
        .map_err(|_| Error::InvalidNumber(raw.to_string()))
}

fn parse_u8(raw: &str) -> Result<u8> {
    raw.parse()
        .map_err(|_| Error::InvalidNumber(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn create_test_doc() -> &'static str {
        r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx xmlns="http://www.topografix.com/GPX/1/1"
     xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
     xsi:schemaLocation="http://www.topografix.com/GPX/1/1 http://www.topografix.com/GPX/1/1/gpx.xsd"
     creator="GPSLogger - http://gpslogger.mendhak.com/"
     version="1.1"
     time="2016-12-03T07:23:50Z">
  <trk>
    <name>20161203</name>
    <trkseg>
      <trkpt lat="48.457" lon="-122.341">
        <ele>206.0</ele>
        <time>2016-12-03T07:23:50Z</time>
        <src>gps</src>
        <sat>8</sat>
        <hdop>0.9</hdop>
        <course>83.5</course>
        <speed>1.25</speed>
      </trkpt>
      <trkpt lat="48.458" lon="-122.342">
        <ele>207.5</ele>
        <time>2016-12-03T07:29:20Z</time>
      </trkpt>
    </trkseg>
  </trk>
</gpx>"#
    }

    /// Collects every closed point.
    #[derive(Default)]
    struct PointCollector {
        points: Vec<TrackPoint>,
    }

    impl GpxVisitor for PointCollector {
        fn track_point_close(&mut self, point: &TrackPoint) -> Result<()> {
            self.points.push(point.clone());
            Ok(())
        }
    }

    fn decode_points(doc: &str) -> Result<Vec<TrackPoint>> {
        let mut parser = GpxParser::new(doc.as_bytes(), PointCollector::default());
        parser.parse()?;
        Ok(parser.into_visitor().points)
    }

    #[test]
    fn test_decode_track_points() {
        let points = decode_points(create_test_doc()).unwrap();
        assert_eq!(points.len(), 2);

        let first = &points[0];
        assert_eq!(first.latitude, 48.457);
        assert_eq!(first.longitude, -122.341);
        assert_eq!(first.elevation, 206.0);
        assert_eq!(first.course, 83.5);
        assert_eq!(first.speed, 1.25);
        assert_eq!(first.hdop, 0.9);
        assert_eq!(first.src, "gps");
        assert_eq!(first.satellite_count, 8);
        assert_eq!(first.time, Some(datetime!(2016-12-03 07:23:50 UTC)));

        let second = &points[1];
        assert_eq!(second.latitude, 48.458);
        assert_eq!(second.time, Some(datetime!(2016-12-03 07:29:20 UTC)));
        assert_eq!(second.src, "");
        assert_eq!(second.satellite_count, 0);
    }

    #[test]
    fn test_gpx_root_attributes() {
        #[derive(Default)]
        struct RootGrab {
            gpx: Option<Gpx>,
        }
        impl GpxVisitor for RootGrab {
            fn gpx_open(&mut self, gpx: &Gpx) -> Result<()> {
                self.gpx = Some(gpx.clone());
                Ok(())
            }
        }

        let mut parser = GpxParser::new(create_test_doc().as_bytes(), RootGrab::default());
        parser.parse().unwrap();
        let gpx = parser.into_visitor().gpx.unwrap();
        assert_eq!(gpx.xmlns, "http://www.topografix.com/GPX/1/1");
        assert_eq!(gpx.xsi, "http://www.w3.org/2001/XMLSchema-instance");
        assert_eq!(gpx.creator, "GPSLogger - http://gpslogger.mendhak.com/");
        assert_eq!(gpx.version, 1.1);
        assert_eq!(
            gpx.schema_location,
            "http://www.topografix.com/GPX/1/1 http://www.topografix.com/GPX/1/1/gpx.xsd"
        );
        assert_eq!(gpx.time, Some(datetime!(2016-12-03 07:23:50 UTC)));
    }

    #[test]
    fn test_open_close_balance() {
        #[derive(Default)]
        struct Balance {
            gpx: i32,
            track: i32,
            segment: i32,
            point: i32,
            opens: usize,
        }
        impl GpxVisitor for Balance {
            fn gpx_open(&mut self, _gpx: &Gpx) -> Result<()> {
                self.gpx += 1;
                Ok(())
            }
            fn gpx_close(&mut self, _gpx: &Gpx) -> Result<()> {
                self.gpx -= 1;
                Ok(())
            }
            fn track_open(&mut self, _track: &Track) -> Result<()> {
                self.track += 1;
                Ok(())
            }
            fn track_close(&mut self, _track: &Track) -> Result<()> {
                self.track -= 1;
                Ok(())
            }
            fn track_segment_open(&mut self, _segment: &TrackSegment) -> Result<()> {
                self.segment += 1;
                Ok(())
            }
            fn track_segment_close(&mut self, _segment: &TrackSegment) -> Result<()> {
                self.segment -= 1;
                Ok(())
            }
            fn track_point_open(&mut self, _point: &TrackPoint) -> Result<()> {
                self.point += 1;
                self.opens += 1;
                Ok(())
            }
            fn track_point_close(&mut self, _point: &TrackPoint) -> Result<()> {
                self.point -= 1;
                Ok(())
            }
        }

        let mut parser = GpxParser::new(create_test_doc().as_bytes(), Balance::default());
        parser.parse().unwrap();
        let balance = parser.into_visitor();
        assert_eq!(balance.gpx, 0);
        assert_eq!(balance.track, 0);
        assert_eq!(balance.segment, 0);
        assert_eq!(balance.point, 0);
        assert_eq!(balance.opens, 2);
    }

    #[test]
    fn test_point_without_timestamp() {
        let doc = r#"<gpx><trk><trkseg>
            <trkpt lat="1.5" lon="2.5"><ele>3.0</ele></trkpt>
        </trkseg></trk></gpx>"#;
        let points = decode_points(doc).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].time, None);
        assert_eq!(points[0].elevation, 3.0);
    }

    #[test]
    fn test_unknown_point_child_ignored() {
        let doc = r#"<gpx><trk><trkseg>
            <trkpt lat="1.5" lon="2.5"><geoidheight>52.0</geoidheight></trkpt>
        </trkseg></trk></gpx>"#;
        let points = decode_points(doc).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].latitude, 1.5);
    }

    #[test]
    fn test_self_closing_point() {
        let doc = r#"<gpx><trk><trkseg><trkpt lat="1.5" lon="2.5"/></trkseg></trk></gpx>"#;
        let points = decode_points(doc).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].longitude, 2.5);
        assert_eq!(points[0].time, None);
    }

    #[test]
    fn test_value_outside_point_not_routed() {
        // A <sat> leaf nested under <extensions> has a non-trkpt parent and
        // must not reach the open point record, even though the tag name
        // matches a recognised point child
        let doc = r#"<gpx><trk><trkseg>
            <trkpt lat="1.0" lon="2.0"><extensions><sat>9</sat></extensions></trkpt>
        </trkseg></trk></gpx>"#;
        let points = decode_points(doc).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].satellite_count, 0);
    }

    #[test]
    fn test_malformed_latitude_is_fatal() {
        let doc = r#"<gpx><trk><trkseg><trkpt lat="north" lon="2.5"/></trkseg></trk></gpx>"#;
        assert!(matches!(
            decode_points(doc),
            Err(Error::InvalidNumber(raw)) if raw == "north"
        ));
    }

    #[test]
    fn test_missing_latitude_is_fatal() {
        let doc = r#"<gpx><trk><trkseg><trkpt lon="2.5"/></trkseg></trk></gpx>"#;
        assert!(matches!(decode_points(doc), Err(Error::InvalidNumber(_))));
    }

    #[test]
    fn test_malformed_timestamp_is_fatal() {
        let doc = r#"<gpx><trk><trkseg>
            <trkpt lat="1.5" lon="2.5"><time>yesterday</time></trkpt>
        </trkseg></trk></gpx>"#;
        assert!(matches!(
            decode_points(doc),
            Err(Error::InvalidTimestamp(raw)) if raw == "yesterday"
        ));
    }

    #[test]
    fn test_malformed_satellite_count_is_fatal() {
        let doc = r#"<gpx><trk><trkseg>
            <trkpt lat="1.5" lon="2.5"><sat>300</sat></trkpt>
        </trkseg></trk></gpx>"#;
        assert!(matches!(decode_points(doc), Err(Error::InvalidNumber(_))));
    }

    #[test]
    fn test_visitor_abort_propagates() {
        struct AbortOnFirst {
            seen: usize,
        }
        impl GpxVisitor for AbortOnFirst {
            fn track_point_close(&mut self, _point: &TrackPoint) -> Result<()> {
                self.seen += 1;
                Err(Error::Visitor("stop after first point".to_string()))
            }
        }

        let mut parser = GpxParser::new(create_test_doc().as_bytes(), AbortOnFirst { seen: 0 });
        assert!(matches!(parser.parse(), Err(Error::Visitor(_))));
        assert_eq!(parser.into_visitor().seen, 1);
    }

    #[test]
    fn test_track_point_display() {
        let point = TrackPoint {
            latitude: 48.457,
            longitude: -122.341,
            src: "gps".to_string(),
            satellite_count: 8,
            time: Some(datetime!(2016-12-03 07:23:50 UTC)),
            ..TrackPoint::default()
        };
        let rendered = point.to_string();
        assert!(rendered.contains("LAT=(48.45700000)"));
        assert!(rendered.contains("LON=(-122.34100000)"));
        assert!(rendered.contains("SRC=[gps]"));
        assert!(rendered.contains("TIME=[2016-12-03T07:23:50Z]"));
    }
}
