//! Small quick-xml helpers shared by the ODS parts

use crate::error::SheetResult;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

pub(crate) type XmlWriter = Writer<Vec<u8>>;

pub(crate) const NS_OFFICE: (&str, &str) = (
    "xmlns:office",
    "urn:oasis:names:tc:opendocument:xmlns:office:1.0",
);
pub(crate) const NS_STYLE: (&str, &str) = (
    "xmlns:style",
    "urn:oasis:names:tc:opendocument:xmlns:style:1.0",
);
pub(crate) const NS_TEXT: (&str, &str) = (
    "xmlns:text",
    "urn:oasis:names:tc:opendocument:xmlns:text:1.0",
);
pub(crate) const NS_TABLE: (&str, &str) = (
    "xmlns:table",
    "urn:oasis:names:tc:opendocument:xmlns:table:1.0",
);
pub(crate) const NS_FO: (&str, &str) = (
    "xmlns:fo",
    "urn:oasis:names:tc:opendocument:xmlns:xsl-fo-compatible:1.0",
);
pub(crate) const NS_SVG: (&str, &str) = (
    "xmlns:svg",
    "urn:oasis:names:tc:opendocument:xmlns:svg-compatible:1.0",
);
pub(crate) const NS_NUMBER: (&str, &str) = (
    "xmlns:number",
    "urn:oasis:names:tc:opendocument:xmlns:datastyle:1.0",
);
pub(crate) const NS_META: (&str, &str) = (
    "xmlns:meta",
    "urn:oasis:names:tc:opendocument:xmlns:meta:1.0",
);
pub(crate) const NS_DC: (&str, &str) = ("xmlns:dc", "http://purl.org/dc/elements/1.1/");
pub(crate) const NS_CONFIG: (&str, &str) = (
    "xmlns:config",
    "urn:oasis:names:tc:opendocument:xmlns:config:1.0",
);
pub(crate) const NS_OF: (&str, &str) = (
    "xmlns:of",
    "urn:oasis:names:tc:opendocument:xmlns:of:1.2",
);
pub(crate) const NS_CALCEXT: (&str, &str) = (
    "xmlns:calcext",
    "urn:org:documentfoundation:names:experimental:calc:xmlns:calcext:1.0",
);
pub(crate) const NS_MANIFEST: (&str, &str) = (
    "xmlns:manifest",
    "urn:oasis:names:tc:opendocument:xmlns:manifest:1.0",
);

pub(crate) const ODF_VERSION: &str = "1.3";

pub(crate) fn new_writer() -> XmlWriter {
    Writer::new(Vec::new())
}

pub(crate) fn declaration(w: &mut XmlWriter) -> SheetResult<()> {
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    Ok(())
}

pub(crate) fn start(w: &mut XmlWriter, name: &str, attrs: &[(&str, &str)]) -> SheetResult<()> {
    let mut elem = BytesStart::new(name);
    for &attr in attrs {
        elem.push_attribute(attr);
    }
    w.write_event(Event::Start(elem))?;
    Ok(())
}

pub(crate) fn end(w: &mut XmlWriter, name: &str) -> SheetResult<()> {
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

pub(crate) fn empty(w: &mut XmlWriter, name: &str, attrs: &[(&str, &str)]) -> SheetResult<()> {
    let mut elem = BytesStart::new(name);
    for &attr in attrs {
        elem.push_attribute(attr);
    }
    w.write_event(Event::Empty(elem))?;
    Ok(())
}

pub(crate) fn text(w: &mut XmlWriter, content: &str) -> SheetResult<()> {
    w.write_event(Event::Text(BytesText::new(content)))?;
    Ok(())
}

/// `<name attrs>content</name>`
pub(crate) fn text_element(
    w: &mut XmlWriter,
    name: &str,
    attrs: &[(&str, &str)],
    content: &str,
) -> SheetResult<()> {
    start(w, name, attrs)?;
    text(w, content)?;
    end(w, name)
}

/// One `text:p` per line, so embedded newlines survive a round trip
pub(crate) fn paragraphs(w: &mut XmlWriter, content: &str) -> SheetResult<()> {
    for line in content.split('\n') {
        if line.is_empty() {
            empty(w, "text:p", &[])?;
        } else {
            text_element(w, "text:p", &[], line)?;
        }
    }
    Ok(())
}
