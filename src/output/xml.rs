use std::io::Write;

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::data::Element;
use crate::engine::FinalResult;
use crate::output::{Formatter, maybe_compressed};

/// The pan XML profile format.
#[derive(Debug, Clone, Copy)]
pub struct XmlFormatter {
    pub gzip: bool,
}

impl Formatter for XmlFormatter {
    fn key(&self) -> &'static str {
        if self.gzip { "xml.gz" } else { "xml" }
    }

    fn suffix(&self) -> &'static str {
        self.key()
    }

    fn write(&self, result: &FinalResult, writer: &mut dyn Write) -> anyhow::Result<()> {
        maybe_compressed(self.gzip, writer, |w| {
            let mut xml = Writer::new_with_indent(w, b' ', 4);
            xml.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
            write_element(&mut xml, Some("profile"), &result.root, true)?;
            xml.get_mut().write_all(b"\n")?;
            Ok(())
        })
    }
}

fn tag(element: &Element) -> &'static str {
    match element {
        Element::Dict(_) => "nlist",
        other => other.type_name(),
    }
}

fn write_element<W: Write>(
    xml: &mut Writer<W>,
    name: Option<&str>,
    element: &Element,
    root: bool,
) -> anyhow::Result<()> {
    let tag = tag(element);
    let mut start = BytesStart::new(tag);
    if root {
        start.push_attribute(("format", "pan"));
    }
    if let Some(name) = name {
        start.push_attribute(("name", name));
    }

    match element {
        Element::Dict(items) if !items.is_empty() => {
            xml.write_event(Event::Start(start))?;
            for (key, item) in items.iter() {
                write_element(xml, Some(key), item, false)?;
            }
            xml.write_event(Event::End(BytesEnd::new(tag)))?;
        }
        Element::List(items) if !items.is_empty() => {
            xml.write_event(Event::Start(start))?;
            for item in items.iter() {
                write_element(xml, None, item, false)?;
            }
            xml.write_event(Event::End(BytesEnd::new(tag)))?;
        }
        Element::Dict(_) | Element::List(_) => xml.write_event(Event::Empty(start))?,
        property => {
            let text = property.to_string();
            xml.write_event(Event::Start(start))?;
            xml.write_event(Event::Text(BytesText::new(&text)))?;
            xml.write_event(Event::End(BytesEnd::new(tag)))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::UNIX_EPOCH;

    use super::*;
    use crate::ArcStr;

    fn render(root: Element) -> String {
        let result = FinalResult::new("node", root, UNIX_EPOCH, BTreeSet::new());
        let mut out = Vec::new();
        XmlFormatter { gzip: false }.write(&result, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_profile_layout() {
        let xml = render(Element::Dict(Arc::new(
            [
                (ArcStr::from("a"), Element::list(vec![Element::Boolean(true)])),
                (ArcStr::from("b"), Element::string("x<y")),
            ]
            .into_iter()
            .collect(),
        )));

        let lines: Vec<&str> = xml.lines().map(str::trim).collect();
        assert_eq!(
            lines,
            [
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                r#"<nlist format="pan" name="profile">"#,
                r#"<list name="a">"#,
                "<boolean>true</boolean>",
                "</list>",
                r#"<string name="b">x&lt;y</string>"#,
                "</nlist>",
            ]
        );
        assert!(xml.contains("\n    <list name=\"a\">"));
        assert!(xml.ends_with("</nlist>\n"));
    }

    #[test]
    fn test_empty_containers_and_attribute_escaping() {
        let xml = render(Element::Dict(Arc::new(
            [
                (ArcStr::from("a\"b"), Element::list(vec![])),
                (ArcStr::from("c"), Element::string("R&D")),
            ]
            .into_iter()
            .collect(),
        )));

        assert!(xml.contains(r#"<list name="a&quot;b"/>"#), "{xml}");
        assert!(xml.contains(r#"<string name="c">R&amp;D</string>"#), "{xml}");
    }
}
