//! Streaming XML visitor
//!
//! This module decodes a byte stream into a lazy sequence of XML events and
//! dispatches them to a user-supplied [`XmlVisitor`] while maintaining a path
//! stack of the currently open elements and a two-event history.
//!
//! The history powers the leaf-value shortcut: when an element closes and the
//! preceding events were exactly (start, chardata), the captured text is
//! delivered once more through [`XmlVisitor::handle_value`], so handlers can
//! treat `<tag>text</tag>` as a single atomic event without tracking state
//! themselves.

use std::collections::HashMap;
use std::io::BufRead;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::Result;

/// The event kinds that participate in the parser's two-event history.
///
/// Comments, processing instructions and directives are delivered to the
/// visitor but deliberately excluded from the history, so they cannot break
/// the leaf-value shortcut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XmlPart {
    /// No event has been observed yet
    #[default]
    Initial,
    /// A start-element event
    StartTag,
    /// An end-element event
    EndTag,
    /// A character-data event
    CharData,
}

/// Stack of the names of the currently open elements.
///
/// The top of the stack is the deepest open element. Backed by a contiguous
/// `Vec`, so [`NodeStack::peek_from_end`] is O(1).
#[derive(Debug, Clone, Default)]
pub struct NodeStack {
    names: Vec<String>,
}

impl NodeStack {
    fn push(&mut self, name: String) {
        self.names.push(name);
    }

    fn pop(&mut self) -> Option<String> {
        self.names.pop()
    }

    /// Name of the element `i` levels above the top of the stack, or `None`
    /// if `i` exceeds the current depth. `peek_from_end(0)` is the top.
    #[inline]
    pub fn peek_from_end(&self, i: usize) -> Option<&str> {
        let idx = self.names.len().checked_sub(i + 1)?;
        self.names.get(idx).map(String::as_str)
    }

    /// Current element depth
    #[inline]
    pub fn depth(&self) -> usize {
        self.names.len()
    }

    /// Whether no element is open
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The open element names, outermost first
    #[inline]
    pub fn as_slice(&self) -> &[String] {
        &self.names
    }
}

/// The parser state observable from visitor callbacks: the path stack, the
/// two most recent event kinds, and the current character-data buffer.
#[derive(Debug, Default)]
pub struct XmlContext {
    stack: NodeStack,
    last: XmlPart,
    previous: XmlPart,
    chardata: String,
}

impl XmlContext {
    /// The path stack of currently open elements
    #[inline]
    pub fn node_stack(&self) -> &NodeStack {
        &self.stack
    }

    /// The most recent recorded event kind
    #[inline]
    pub fn last_state(&self) -> XmlPart {
        self.last
    }

    /// The event kind recorded before the most recent one
    #[inline]
    pub fn previous_state(&self) -> XmlPart {
        self.previous
    }

    /// The most recently captured character data (trimmed if auto-trim is on)
    #[inline]
    pub fn chardata(&self) -> &str {
        &self.chardata
    }

    fn record(&mut self, part: XmlPart) {
        self.previous = self.last;
        self.last = part;
    }
}

/// Receiver for the XML event stream.
///
/// The start/end/value methods are the core protocol and must be
/// implemented. The remaining methods cover margin character data, comments,
/// processing instructions and directives; they default to no-ops so a
/// visitor implements exactly the subset it cares about.
pub trait XmlVisitor {
    /// An element opened. `attrs` maps local attribute names (namespace
    /// prefixes stripped) to their unescaped values. The element itself is
    /// already on the path stack.
    fn handle_start(
        &mut self,
        tag: &str,
        attrs: &HashMap<String, String>,
        ctx: &XmlContext,
    ) -> Result<()>;

    /// An element closed. The element has already been popped, so the top of
    /// the path stack is its parent.
    fn handle_end(&mut self, tag: &str, ctx: &XmlContext) -> Result<()>;

    /// A `<tag>text</tag>` leaf closed; `text` is the captured character
    /// data. Fires after [`XmlVisitor::handle_end`] for the same element.
    fn handle_value(&mut self, tag: &str, text: &str, ctx: &XmlContext) -> Result<()>;

    /// Character data, delivered only when margin reporting is enabled.
    fn handle_chardata(&mut self, _text: &str, _ctx: &XmlContext) -> Result<()> {
        Ok(())
    }

    /// An XML comment.
    fn handle_comment(&mut self, _text: &str, _ctx: &XmlContext) -> Result<()> {
        Ok(())
    }

    /// A processing instruction. The XML declaration arrives here with
    /// target `xml`.
    fn handle_processing_instruction(
        &mut self,
        _target: &str,
        _body: &str,
        _ctx: &XmlContext,
    ) -> Result<()> {
        Ok(())
    }

    /// A directive such as `<!DOCTYPE ...>`.
    fn handle_directive(&mut self, _text: &str, _ctx: &XmlContext) -> Result<()> {
        Ok(())
    }
}

/// Streaming XML parser driving an [`XmlVisitor`].
///
/// Strictly forward, single pass; the stream is consumed to exhaustion by
/// [`XmlParser::parse`] unless the visitor aborts or the underlying decoder
/// reports a malformed token.
pub struct XmlParser<R: BufRead, V: XmlVisitor> {
    reader: Reader<R>,
    visitor: V,
    ctx: XmlContext,
    report_margin_chardata: bool,
    auto_trim_chardata: bool,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<R: BufRead, V: XmlVisitor> XmlParser<R, V> {
    /// Create a parser over `reader` dispatching to `visitor`.
    ///
    /// Margin character data is not reported and character data is
    /// auto-trimmed by default.
    pub fn new(reader: R, visitor: V) -> Self {
        Self {
            reader: Reader::from_reader(reader),
            visitor,
            ctx: XmlContext::default(),
            report_margin_chardata: false,
            auto_trim_chardata: true,
        }
    }

    /// Also deliver character data between markup through
    /// [`XmlVisitor::handle_chardata`] (default off).
    pub fn set_report_margin_chardata(&mut self, enabled: bool) {
        self.report_margin_chardata = enabled;
    }

    /// Strip leading and trailing whitespace from character data before
    /// capture and delivery (default on).
    pub fn set_auto_trim_chardata(&mut self, enabled: bool) {
        self.auto_trim_chardata = enabled;
    }

    /// The observable parser state (path stack and event history)
    #[inline]
    pub fn context(&self) -> &XmlContext {
        &self.ctx
    }

    /// Borrow the visitor
    #[inline]
    pub fn visitor(&self) -> &V {
        &self.visitor
    }

    /// Mutably borrow the visitor
    #[inline]
    pub fn visitor_mut(&mut self) -> &mut V {
        &mut self.visitor
    }

    /// Consume the parser, returning the visitor
    pub fn into_visitor(self) -> V {
        self.visitor
    }

    /// Drive the stream to exhaustion, dispatching every event.
    ///
    /// Returns at end of stream, on the first visitor-reported failure, or
    /// on a malformed token from the underlying decoder.
    pub fn parse(&mut self) -> Result<()> {
        let mut buf = Vec::new();
        loop {
            match self.reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    let (name, attrs) = element_parts(&e)?;
                    self.start_element(name, attrs)?;
                }
                Event::Empty(e) => {
                    // A self-closing element is an open/close pair.
                    let (name, attrs) = element_parts(&e)?;
                    let closing = name.clone();
                    self.start_element(name, attrs)?;
                    self.end_element(&closing)?;
                }
                Event::End(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    self.end_element(&name)?;
                }
                Event::Text(e) => {
                    let text = e.unescape()?.into_owned();
                    self.chardata(&text)?;
                }
                Event::CData(e) => {
                    let bytes = e.into_inner();
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    self.chardata(&text)?;
                }
                Event::Comment(e) => {
                    let text = String::from_utf8_lossy(&e);
                    self.visitor.handle_comment(&text, &self.ctx)?;
                }
                Event::PI(e) => {
                    let target = String::from_utf8_lossy(e.target()).into_owned();
                    let body = String::from_utf8_lossy(e.content()).into_owned();
                    self.visitor
                        .handle_processing_instruction(&target, &body, &self.ctx)?;
                }
                Event::Decl(e) => {
                    // Surface the declaration the way a processing
                    // instruction with target "xml" would look.
                    let mut body = String::new();
                    if let Ok(version) = e.version() {
                        body.push_str("version=\"");
                        body.push_str(&String::from_utf8_lossy(&version));
                        body.push('"');
                    }
                    if let Some(Ok(encoding)) = e.encoding() {
                        if !body.is_empty() {
                            body.push(' ');
                        }
                        body.push_str("encoding=\"");
                        body.push_str(&String::from_utf8_lossy(&encoding));
                        body.push('"');
                    }
                    self.visitor
                        .handle_processing_instruction("xml", &body, &self.ctx)?;
                }
                Event::DocType(e) => {
                    let text = String::from_utf8_lossy(&e);
                    self.visitor.handle_directive(text.trim(), &self.ctx)?;
                }
                Event::Eof => break,
            }
            buf.clear();
        }
        Ok(())
    }

    fn start_element(&mut self, name: String, attrs: HashMap<String, String>) -> Result<()> {
        self.ctx.stack.push(name.clone());
        self.visitor.handle_start(&name, &attrs, &self.ctx)?;
        self.ctx.record(XmlPart::StartTag);
        Ok(())
    }

    fn end_element(&mut self, name: &str) -> Result<()> {
        self.ctx.stack.pop();
        self.visitor.handle_end(name, &self.ctx)?;

        // Leaf-value shortcut: the element carried exactly one run of
        // character data and nothing else.
        if self.ctx.last == XmlPart::CharData && self.ctx.previous == XmlPart::StartTag {
            self.visitor
                .handle_value(name, &self.ctx.chardata, &self.ctx)?;
        }
        self.ctx.record(XmlPart::EndTag);
        Ok(())
    }

    fn chardata(&mut self, raw: &str) -> Result<()> {
        let text = if self.auto_trim_chardata {
            raw.trim()
        } else {
            raw
        };
        self.ctx.chardata.clear();
        self.ctx.chardata.push_str(text);
        if self.report_margin_chardata {
            self.visitor.handle_chardata(text, &self.ctx)?;
        }
        self.ctx.record(XmlPart::CharData);
        Ok(())
    }
}

/// Split a start tag into its local name and an attribute map keyed by local
/// attribute name.
fn element_parts(e: &BytesStart<'_>) -> Result<(String, HashMap<String, String>)> {
    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
    let mut attrs = HashMap::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        attrs.insert(key, value);
    }
    Ok((name, attrs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    /// Records every delivered event for later inspection.
    #[derive(Default)]
    struct RecordingVisitor {
        events: Vec<String>,
        fail_on_start_of: Option<String>,
    }

    impl XmlVisitor for RecordingVisitor {
        fn handle_start(
            &mut self,
            tag: &str,
            attrs: &HashMap<String, String>,
            _ctx: &XmlContext,
        ) -> Result<()> {
            if self.fail_on_start_of.as_deref() == Some(tag) {
                return Err(Error::Visitor(format!("refused {tag}")));
            }
            let mut keys: Vec<_> = attrs.keys().cloned().collect();
            keys.sort();
            self.events.push(format!("start:{tag}:{}", keys.join(",")));
            Ok(())
        }

        fn handle_end(&mut self, tag: &str, _ctx: &XmlContext) -> Result<()> {
            self.events.push(format!("end:{tag}"));
            Ok(())
        }

        fn handle_value(&mut self, tag: &str, text: &str, ctx: &XmlContext) -> Result<()> {
            let parent = ctx.node_stack().peek_from_end(0).unwrap_or("-").to_string();
            self.events.push(format!("value:{tag}={text}@{parent}"));
            Ok(())
        }

        fn handle_chardata(&mut self, text: &str, _ctx: &XmlContext) -> Result<()> {
            self.events.push(format!("chardata:{text}"));
            Ok(())
        }

        fn handle_comment(&mut self, text: &str, _ctx: &XmlContext) -> Result<()> {
            self.events.push(format!("comment:{text}"));
            Ok(())
        }

        fn handle_processing_instruction(
            &mut self,
            target: &str,
            _body: &str,
            _ctx: &XmlContext,
        ) -> Result<()> {
            self.events.push(format!("pi:{target}"));
            Ok(())
        }

        fn handle_directive(&mut self, text: &str, _ctx: &XmlContext) -> Result<()> {
            self.events.push(format!("directive:{text}"));
            Ok(())
        }
    }

    fn parse_recording(doc: &str) -> Vec<String> {
        let mut parser = XmlParser::new(doc.as_bytes(), RecordingVisitor::default());
        parser.parse().unwrap();
        parser.into_visitor().events
    }

    #[test]
    fn test_leaf_value_shortcut() {
        let events = parse_recording("<a><b>hello</b></a>");
        assert_eq!(
            events,
            vec![
                "start:a:",
                "start:b:",
                "end:b",
                "value:b=hello@a",
                "end:a",
            ]
        );
    }

    #[test]
    fn test_value_not_fired_for_empty_pair() {
        let events = parse_recording("<a><b></b></a>");
        assert!(events.iter().all(|e| !e.starts_with("value:")));
    }

    #[test]
    fn test_value_not_fired_for_container() {
        // The history at </a> is (end, chardata-less), never (start, chardata)
        let events = parse_recording("<a><b>x</b><c>y</c></a>");
        let values: Vec<_> = events.iter().filter(|e| e.starts_with("value:")).collect();
        assert_eq!(values, vec!["value:b=x@a", "value:c=y@a"]);
    }

    #[test]
    fn test_whitespace_only_leaf_fires_empty_value() {
        // Auto-trim reduces the text to "", which still counts as chardata
        let events = parse_recording("<a><b> </b></a>");
        assert!(events.contains(&"value:b=@a".to_string()));
    }

    #[test]
    fn test_self_closing_is_open_close_pair() {
        let events = parse_recording(r#"<a><b attr="1"/></a>"#);
        assert_eq!(events, vec!["start:a:", "start:b:attr", "end:b", "end:a"]);
    }

    #[test]
    fn test_attribute_namespace_prefix_stripped() {
        let events =
            parse_recording(r#"<gpx xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"/>"#);
        assert_eq!(events, vec!["start:gpx:xsi", "end:gpx"]);
    }

    #[test]
    fn test_attribute_value_unescaped() {
        struct Grab(String);
        impl XmlVisitor for Grab {
            fn handle_start(
                &mut self,
                _tag: &str,
                attrs: &HashMap<String, String>,
                _ctx: &XmlContext,
            ) -> Result<()> {
                if let Some(v) = attrs.get("creator") {
                    self.0 = v.clone();
                }
                Ok(())
            }
            fn handle_end(&mut self, _tag: &str, _ctx: &XmlContext) -> Result<()> {
                Ok(())
            }
            fn handle_value(&mut self, _tag: &str, _text: &str, _ctx: &XmlContext) -> Result<()> {
                Ok(())
            }
        }

        let mut parser = XmlParser::new(
            r#"<gpx creator="A &amp; B"/>"#.as_bytes(),
            Grab(String::new()),
        );
        parser.parse().unwrap();
        assert_eq!(parser.into_visitor().0, "A & B");
    }

    #[test]
    fn test_text_entities_unescaped() {
        let events = parse_recording("<a><b>x &lt; y</b></a>");
        assert!(events.contains(&"value:b=x < y@a".to_string()));
    }

    #[test]
    fn test_margin_chardata_off_by_default() {
        let events = parse_recording("<a>margin<b>x</b></a>");
        assert!(events.iter().all(|e| !e.starts_with("chardata:")));
    }

    #[test]
    fn test_margin_chardata_reported_when_enabled() {
        let mut parser = XmlParser::new("<a>margin<b>x</b></a>".as_bytes(), RecordingVisitor::default());
        parser.set_report_margin_chardata(true);
        parser.parse().unwrap();
        let events = parser.into_visitor().events;
        assert!(events.contains(&"chardata:margin".to_string()));
        assert!(events.contains(&"chardata:x".to_string()));
    }

    #[test]
    fn test_auto_trim_disabled_keeps_whitespace() {
        let mut parser = XmlParser::new("<a><b>  x  </b></a>".as_bytes(), RecordingVisitor::default());
        parser.set_auto_trim_chardata(false);
        parser.parse().unwrap();
        let events = parser.into_visitor().events;
        assert!(events.contains(&"value:b=  x  @a".to_string()));
    }

    #[test]
    fn test_comment_and_pi_delivered_without_state_change() {
        // The comment between the text and the close must not break the
        // leaf-value shortcut
        let events = parse_recording("<a><b>x<!-- note --></b></a>");
        assert!(events.contains(&"comment: note ".to_string()));
        assert!(events.contains(&"value:b=x@a".to_string()));
    }

    #[test]
    fn test_declaration_surfaces_as_xml_pi() {
        let events = parse_recording("<?xml version=\"1.0\" encoding=\"UTF-8\"?><a/>");
        assert_eq!(events[0], "pi:xml");
    }

    #[test]
    fn test_doctype_surfaces_as_directive() {
        let events = parse_recording("<!DOCTYPE gpx><a/>");
        assert!(events[0].starts_with("directive:"));
    }

    #[test]
    fn test_deep_nesting_stack() {
        struct DepthProbe {
            max_depth: usize,
            grandparent_of_d: Option<String>,
        }
        impl XmlVisitor for DepthProbe {
            fn handle_start(
                &mut self,
                tag: &str,
                _attrs: &HashMap<String, String>,
                ctx: &XmlContext,
            ) -> Result<()> {
                self.max_depth = self.max_depth.max(ctx.node_stack().depth());
                if tag == "d" {
                    self.grandparent_of_d =
                        ctx.node_stack().peek_from_end(2).map(str::to_string);
                }
                Ok(())
            }
            fn handle_end(&mut self, _tag: &str, _ctx: &XmlContext) -> Result<()> {
                Ok(())
            }
            fn handle_value(&mut self, _tag: &str, _text: &str, _ctx: &XmlContext) -> Result<()> {
                Ok(())
            }
        }

        let mut parser = XmlParser::new(
            "<a><b><c><d/></c></b></a>".as_bytes(),
            DepthProbe {
                max_depth: 0,
                grandparent_of_d: None,
            },
        );
        parser.parse().unwrap();
        assert!(parser.context().node_stack().is_empty());
        let probe = parser.into_visitor();
        assert_eq!(probe.max_depth, 4);
        assert_eq!(probe.grandparent_of_d.as_deref(), Some("b"));
    }

    #[test]
    fn test_peek_from_end_beyond_depth() {
        let stack = NodeStack::default();
        assert_eq!(stack.peek_from_end(0), None);
    }

    #[test]
    fn test_visitor_failure_aborts_parse() {
        let mut parser = XmlParser::new(
            "<a><bad/><never/></a>".as_bytes(),
            RecordingVisitor {
                events: Vec::new(),
                fail_on_start_of: Some("bad".to_string()),
            },
        );
        let result = parser.parse();
        assert!(matches!(result, Err(Error::Visitor(_))));
        let events = parser.into_visitor().events;
        assert!(!events.iter().any(|e| e.contains("never")));
    }

    #[test]
    fn test_mismatched_end_tag_errors() {
        let mut parser = XmlParser::new("<a></b>".as_bytes(), RecordingVisitor::default());
        assert!(matches!(parser.parse(), Err(Error::Xml(_))));
    }

    #[test]
    fn test_cdata_counts_as_chardata() {
        let events = parse_recording("<a><b><![CDATA[raw <text>]]></b></a>");
        assert!(events.contains(&"value:b=raw <text>@a".to_string()));
    }
}
