//! Annotation files: the `#@` documentation of a template and of its
//! statements, as XML.

use std::io::Write;
use std::time::SystemTime;

use camino::Utf8Path;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::output::write_file;
use crate::template::Template;

pub fn write_annotation(template: &Template, file: &Utf8Path) -> anyhow::Result<()> {
    write_file(file, SystemTime::now(), |w| render(template, w))
}

fn render(template: &Template, w: &mut dyn Write) -> anyhow::Result<()> {
    let mut xml = Writer::new_with_indent(w, b' ', 4);
    xml.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let kind = template.template_type().to_string();
    let root = BytesStart::new("template").with_attributes([
        ("format", "pan-annotations"),
        ("name", template.name()),
        ("type", kind.as_str()),
    ]);
    xml.write_event(Event::Start(root))?;

    if let Some(doc) = template.doc() {
        write_desc(&mut xml, doc)?;
    }

    for statement in template.statements() {
        let Some(doc) = &statement.doc else {
            continue;
        };
        let keyword = statement.kind.keyword();
        let line = statement.range.begin_line.to_string();
        let mut start = BytesStart::new(keyword);
        start.push_attribute(("line", line.as_str()));
        if let Some(subject) = statement.kind.subject() {
            start.push_attribute(("name", subject.as_str()));
        }
        xml.write_event(Event::Start(start))?;
        write_desc(&mut xml, doc)?;
        xml.write_event(Event::End(BytesEnd::new(keyword)))?;
    }

    xml.write_event(Event::End(BytesEnd::new("template")))?;
    xml.get_mut().write_all(b"\n")?;
    Ok(())
}

fn write_desc<W: Write>(xml: &mut Writer<W>, doc: &str) -> anyhow::Result<()> {
    xml.write_event(Event::Start(BytesStart::new("desc")))?;
    xml.write_event(Event::Text(BytesText::new(doc)))?;
    xml.write_event(Event::End(BytesEnd::new("desc")))?;
    Ok(())
}
