use std::sync::Arc;

use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{Error, XmlNode, FRAGMENT_ROOT};

/// Deepest element nesting accepted by [parse].
pub const MAX_DEPTH: usize = 256;

/// An element whose end tag has not been seen yet.
struct OpenElement {
    node: XmlNode,
    /// Offset of the `<` of the start tag.
    outer_start: usize,
    /// Offset just past the `>` of the start tag.
    inner_start: usize,
}

/// Parses a complete document and returns its root element.
///
/// Declarations, processing instructions and comments outside the root are skipped.
/// Anything that is not well-formed, or nested deeper than [MAX_DEPTH], is reported as
/// [Error::Malformed]; this function never panics on hostile input.
pub fn parse(xml: &str) -> Result<XmlNode, Error> {
    let source: Arc<str> = Arc::from(xml);
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<OpenElement> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        let before = position(&reader)?;
        let event = reader
            .read_event()
            .map_err(|e| Error::Malformed(format!("{e} at byte {}", reader.buffer_position())))?;
        let after = position(&reader)?;

        match event {
            Event::Start(start) => {
                check_open(&stack, &root)?;
                let node = open(&start, &source, before)?;
                stack.push(OpenElement {
                    node,
                    outer_start: before,
                    inner_start: after,
                });
            }
            Event::Empty(start) => {
                check_open(&stack, &root)?;
                let mut node = open(&start, &source, before)?;
                node.finish(after..after, before..after);
                attach(&mut stack, &mut root, node);
            }
            Event::End(end) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| Error::Malformed("end tag without a start tag".into()))?;
                if frame.node.name().as_bytes() != end.name().as_ref() {
                    return Err(Error::Malformed(format!(
                        "expected </{}>, found </{}>",
                        frame.node.name(),
                        String::from_utf8_lossy(end.name().as_ref())
                    )));
                }
                let mut node = frame.node;
                node.finish(frame.inner_start..before, frame.outer_start..after);
                attach(&mut stack, &mut root, node);
            }
            Event::Text(text) => {
                let raw = utf8(&text)?;
                match stack.last_mut() {
                    Some(top) => {
                        let value = unescape(raw).map_err(|e| Error::Malformed(e.to_string()))?;
                        top.node.push_text(&value);
                    }
                    None if raw.trim().is_empty() => continue,
                    None => return Err(Error::Malformed("text outside the root element".into())),
                }
            }
            Event::GeneralRef(reference) => {
                let name = utf8(&reference)?;
                let top = stack
                    .last_mut()
                    .ok_or_else(|| Error::Malformed("reference outside the root element".into()))?;
                let value = unescape(&format!("&{name};"))
                    .map_err(|e| Error::Malformed(e.to_string()))?
                    .into_owned();
                top.node.push_text(&value);
            }
            Event::CData(data) => {
                let value = utf8(&data)?.to_string();
                let top = stack
                    .last_mut()
                    .ok_or_else(|| Error::Malformed("cdata outside the root element".into()))?;
                top.node.push_text(&value);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(Error::Malformed(format!(
            "unexpected end of input inside <{}>",
            open.node.name()
        )));
    }
    root.ok_or(Error::Empty)
}

/// Parses a sequence of sibling elements (an info payload) under a synthetic
/// [FRAGMENT_ROOT] element.
pub fn parse_fragment(fragment: &str) -> Result<XmlNode, Error> {
    parse(&format!("<{FRAGMENT_ROOT}>{fragment}</{FRAGMENT_ROOT}>"))
}

/// Checks that a new element may open at the current depth.
fn check_open(stack: &[OpenElement], root: &Option<XmlNode>) -> Result<(), Error> {
    if stack.is_empty() && root.is_some() {
        return Err(Error::Malformed("more than one root element".into()));
    }
    if stack.len() >= MAX_DEPTH {
        return Err(Error::Malformed(format!(
            "elements nested deeper than {MAX_DEPTH} levels"
        )));
    }
    Ok(())
}

fn open(start: &BytesStart<'_>, source: &Arc<str>, offset: usize) -> Result<XmlNode, Error> {
    let name = utf8(start.name().as_ref())?.to_string();
    let mut node = XmlNode::new(name, Arc::clone(source), offset);
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| Error::Malformed(e.to_string()))?;
        let key = utf8(attribute.key.as_ref())?.to_string();
        let value = unescape(utf8(&attribute.value)?)
            .map_err(|e| Error::Malformed(e.to_string()))?
            .into_owned();
        node.set_attribute(key, value);
    }
    Ok(node)
}

fn attach(stack: &mut [OpenElement], root: &mut Option<XmlNode>, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.node.add_child(node),
        None => *root = Some(node),
    }
}

fn position(reader: &Reader<&[u8]>) -> Result<usize, Error> {
    usize::try_from(reader.buffer_position()).map_err(|e| Error::Malformed(e.to_string()))
}

fn utf8(bytes: &[u8]) -> Result<&str, Error> {
    std::str::from_utf8(bytes).map_err(|e| Error::Malformed(e.to_string()))
}
