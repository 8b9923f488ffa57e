//! GPX XML emission
//!
//! A thin builder over `quick_xml::Writer` producing indented GPX 1.1
//! documents. Structural nesting is the caller's responsibility; the writer
//! emits exactly what it is told, in order. Output re-parses with
//! [`GpxParser`](crate::gpx::GpxParser).

use std::io::Write;

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::Result;
use crate::gpx::TrackPoint;
use crate::timeindex::format_instant;

const XMLNS: &str = "http://www.topografix.com/GPX/1/1";
const XMLNS_GPXX: &str = "http://www.garmin.com/xmlschemas/GpxExtensions/v3";
const XMLNS_GPXTPX: &str = "http://www.garmin.com/xmlschemas/TrackPointExtension/v1";
const XMLNS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
const SCHEMA_LOCATION: &str = "http://www.topografix.com/GPX/1/1 \
    http://www.topografix.com/GPX/1/1/gpx.xsd \
    http://www.garmin.com/xmlschemas/GpxExtensions/v3 \
    http://www.garmin.com/xmlschemas/GpxExtensionsv3.xsd \
    http://www.garmin.com/xmlschemas/TrackPointExtension/v1 \
    http://www.garmin.com/xmlschemas/TrackPointExtensionv1.xsd";

/// Streaming GPX document writer with two-space indentation.
pub struct GpxWriter<W: Write> {
    writer: Writer<W>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<W: Write> GpxWriter<W> {
    /// Create a writer over `inner` and emit the XML declaration.
    pub fn new(inner: W) -> Result<Self> {
        let mut writer = Writer::new_with_indent(inner, b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(Self { writer })
    }

    /// Open the `gpx` root with the Topografix GPX 1.1 namespace set.
    pub fn begin_gpx(&mut self) -> Result<()> {
        let mut start = BytesStart::new("gpx");
        start.push_attribute(("xmlns", XMLNS));
        start.push_attribute(("xmlns:gpxx", XMLNS_GPXX));
        start.push_attribute(("xmlns:gpxtpx", XMLNS_GPXTPX));
        start.push_attribute(("xmlns:xsi", XMLNS_XSI));
        start.push_attribute(("xsi:schemaLocation", SCHEMA_LOCATION));
        self.writer.write_event(Event::Start(start))?;
        Ok(())
    }

    /// Close the root and hand back the inner writer.
    pub fn end_gpx(mut self) -> Result<W> {
        self.writer.write_event(Event::End(BytesEnd::new("gpx")))?;
        Ok(self.writer.into_inner())
    }

    pub fn begin_track(&mut self) -> Result<()> {
        self.writer
            .write_event(Event::Start(BytesStart::new("trk")))?;
        Ok(())
    }

    pub fn end_track(&mut self) -> Result<()> {
        self.writer.write_event(Event::End(BytesEnd::new("trk")))?;
        Ok(())
    }

    pub fn begin_segment(&mut self) -> Result<()> {
        self.writer
            .write_event(Event::Start(BytesStart::new("trkseg")))?;
        Ok(())
    }

    pub fn end_segment(&mut self) -> Result<()> {
        self.writer
            .write_event(Event::End(BytesEnd::new("trkseg")))?;
        Ok(())
    }

    /// Emit one `trkpt` with a leaf child per populated field.
    ///
    /// `lat` and `lon` are always written; the optional fields appear only
    /// when they differ from their zero value.
    pub fn write_point(&mut self, point: &TrackPoint) -> Result<()> {
        let mut start = BytesStart::new("trkpt");
        start.push_attribute(("lat", point.latitude.to_string().as_str()));
        start.push_attribute(("lon", point.longitude.to_string().as_str()));
        self.writer.write_event(Event::Start(start))?;

        if let Some(time) = point.time {
            self.write_leaf("time", &format_instant(time))?;
        }
        if point.elevation != 0.0 {
            self.write_leaf("ele", &point.elevation.to_string())?;
        }
        if point.course != 0.0 {
            self.write_leaf("course", &point.course.to_string())?;
        }
        if point.speed != 0.0 {
            self.write_leaf("speed", &point.speed.to_string())?;
        }
        if point.hdop != 0.0 {
            self.write_leaf("hdop", &point.hdop.to_string())?;
        }
        if !point.src.is_empty() {
            self.write_leaf("src", &point.src)?;
        }
        if point.satellite_count != 0 {
            self.write_leaf("sat", &point.satellite_count.to_string())?;
        }

        self.writer.write_event(Event::End(BytesEnd::new("trkpt")))?;
        Ok(())
    }

    fn write_leaf(&mut self, tag: &str, text: &str) -> Result<()> {
        self.writer
            .write_event(Event::Start(BytesStart::new(tag)))?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.writer.write_event(Event::End(BytesEnd::new(tag)))?;
        Ok(())
    }
}
