//! Quick-XML based XMLTV parser
//!
//! Streaming parser that extracts only the channel and programme fields the
//! index uses. Timestamps are returned as raw strings; validation happens in
//! the ingestor so a single bad programme never fails the document.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;

use crate::errors::{SourceError, SourceResult};

const SOURCE_TYPE: &str = "xmltv";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmltvChannel {
    pub id: String,
    pub display_names: Vec<String>,
    pub icon: Option<String>,
}

/// Programme fields as found in the document, unvalidated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmltvProgramme {
    pub channel: Option<String>,
    pub start: Option<String>,
    pub stop: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmltvDocument {
    pub channels: Vec<XmltvChannel>,
    pub programmes: Vec<XmltvProgramme>,
}

/// Parse XMLTV content using the streaming quick-xml reader.
///
/// Fails when the payload is not well-formed XML, has no `<tv>` root, or
/// ends with elements still open (a truncated download).
pub fn parse_xmltv(content: &str) -> SourceResult<XmltvDocument> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut document = XmltvDocument::default();
    let mut current_channel: Option<XmltvChannel> = None;
    let mut current_program: Option<XmltvProgramme> = None;
    let mut element_stack: Vec<Vec<u8>> = Vec::new();
    let mut current_text = String::new();
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = e.local_name().as_ref().to_vec();
                match name.as_slice() {
                    b"tv" => saw_root = true,
                    b"channel" => {
                        let attrs = parse_attributes(e);
                        current_channel = Some(XmltvChannel {
                            id: attrs.get("id").cloned().unwrap_or_default(),
                            ..Default::default()
                        });
                    }
                    b"programme" => current_program = Some(programme_from_attributes(e)),
                    b"icon" => apply_icon(e, &mut current_channel, &mut current_program),
                    _ => {}
                }
                element_stack.push(name);
                current_text.clear();
            }

            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"tv" => saw_root = true,
                b"icon" => apply_icon(e, &mut current_channel, &mut current_program),
                b"channel" => {
                    let attrs = parse_attributes(e);
                    document.channels.push(XmltvChannel {
                        id: attrs.get("id").cloned().unwrap_or_default(),
                        ..Default::default()
                    });
                }
                b"programme" => document.programmes.push(programme_from_attributes(e)),
                _ => {}
            },

            Ok(Event::End(ref e)) => {
                let text = current_text.trim();
                match e.local_name().as_ref() {
                    b"channel" => {
                        if let Some(channel) = current_channel.take() {
                            document.channels.push(channel);
                        }
                    }
                    b"programme" => {
                        if let Some(program) = current_program.take() {
                            document.programmes.push(program);
                        }
                    }
                    b"display-name" if !text.is_empty() => {
                        if let Some(channel) = current_channel.as_mut() {
                            channel.display_names.push(text.to_string());
                        }
                    }
                    b"title" => set_first(&mut current_program, text, |p| &mut p.title),
                    b"desc" => set_first(&mut current_program, text, |p| &mut p.description),
                    b"category" => set_first(&mut current_program, text, |p| &mut p.category),
                    _ => {}
                }
                element_stack.pop();
                current_text.clear();
            }

            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(|err| {
                    SourceError::parse_error(SOURCE_TYPE, format!("Invalid text content: {err}"))
                })?;
                current_text.push_str(&text);
            }

            Ok(Event::CData(e)) => {
                let text = std::str::from_utf8(&e).map_err(|err| {
                    SourceError::parse_error(SOURCE_TYPE, format!("Invalid UTF-8 in CDATA: {err}"))
                })?;
                current_text.push_str(text);
            }

            Ok(Event::Eof) => break,

            Err(e) => {
                return Err(SourceError::parse_error(
                    SOURCE_TYPE,
                    format!(
                        "XML parsing error at position {}: {e}",
                        reader.buffer_position()
                    ),
                ));
            }

            _ => {} // comments, doctype, processing instructions
        }
    }

    if !saw_root {
        return Err(SourceError::parse_error(
            SOURCE_TYPE,
            "document has no <tv> root element",
        ));
    }
    if !element_stack.is_empty() {
        return Err(SourceError::parse_error(
            SOURCE_TYPE,
            format!(
                "document ended with {} unclosed element(s)",
                element_stack.len()
            ),
        ));
    }

    Ok(document)
}

fn programme_from_attributes(element: &BytesStart) -> XmltvProgramme {
    let mut attrs = parse_attributes(element);
    XmltvProgramme {
        channel: attrs.remove("channel"),
        start: attrs.remove("start"),
        stop: attrs.remove("stop"),
        ..Default::default()
    }
}

fn apply_icon(
    element: &BytesStart,
    channel: &mut Option<XmltvChannel>,
    program: &mut Option<XmltvProgramme>,
) {
    let Some(src) = parse_attributes(element).remove("src") else {
        return;
    };
    if let Some(program) = program.as_mut() {
        program.icon.get_or_insert(src);
    } else if let Some(channel) = channel.as_mut() {
        channel.icon.get_or_insert(src);
    }
}

/// XMLTV allows repeated elements per language; the first one wins.
fn set_first<F>(program: &mut Option<XmltvProgramme>, text: &str, field: F)
where
    F: FnOnce(&mut XmltvProgramme) -> &mut Option<String>,
{
    if text.is_empty() {
        return;
    }
    if let Some(program) = program.as_mut() {
        let slot = field(program);
        if slot.is_none() {
            *slot = Some(text.to_string());
        }
    }
}

/// Parse XML attributes into a HashMap, unescaping entity references
fn parse_attributes(element: &BytesStart) -> HashMap<String, String> {
    let mut attrs = HashMap::new();

    for attr in element.attributes().flatten() {
        if let (Ok(key), Ok(value)) = (
            std::str::from_utf8(attr.key.local_name().as_ref()),
            attr.unescape_value(),
        ) {
            attrs.insert(key.to_string(), value.into_owned());
        }
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE tv SYSTEM "xmltv.dtd">
<tv generator-info-name="test">
  <channel id="Rai1.it">
    <display-name lang="it">Rai 1</display-name>
    <display-name>RAI 1 HD</display-name>
    <icon src="http://logo/rai1.png"/>
  </channel>
  <programme start="20240301060000 +0100" stop="20240301090000 +0100" channel="Rai1.it">
    <title lang="it">Uno Mattina &amp; News</title>
    <title lang="en">Morning</title>
    <desc><![CDATA[Morning <show>]]></desc>
    <category>Info</category>
    <icon src="http://img/um.jpg" />
  </programme>
  <programme start="20240301090000 +0100" channel="Rai1.it">
    <title>No stop</title>
  </programme>
</tv>"#;

    #[test]
    fn test_parse_channels_and_programmes() {
        let document = parse_xmltv(SAMPLE).unwrap();

        assert_eq!(
            document.channels,
            vec![XmltvChannel {
                id: "Rai1.it".to_string(),
                display_names: vec!["Rai 1".to_string(), "RAI 1 HD".to_string()],
                icon: Some("http://logo/rai1.png".to_string()),
            }]
        );

        assert_eq!(document.programmes.len(), 2);
        let first = &document.programmes[0];
        assert_eq!(first.channel.as_deref(), Some("Rai1.it"));
        assert_eq!(first.title.as_deref(), Some("Uno Mattina & News"));
        assert_eq!(first.description.as_deref(), Some("Morning <show>"));
        assert_eq!(first.category.as_deref(), Some("Info"));
        assert_eq!(first.icon.as_deref(), Some("http://img/um.jpg"));
        assert_eq!(document.programmes[1].stop, None);
    }

    #[test]
    fn test_rejects_non_xmltv_payloads() {
        assert!(parse_xmltv("Not Found").is_err());
        assert!(parse_xmltv("<html><body>502</body></html>").is_err());
        assert!(parse_xmltv("<tv><programme channel=\"a\"></channel></tv>").is_err());
    }

    #[test]
    fn test_rejects_truncated_document() {
        let truncated = &SAMPLE[..SAMPLE.len() / 2];
        assert!(parse_xmltv(truncated).is_err());
    }

    #[test]
    fn test_empty_tv_document() {
        let document = parse_xmltv("<tv/>").unwrap();
        assert!(document.channels.is_empty());
        assert!(document.programmes.is_empty());
    }
}
