pub mod framed;
pub mod http;

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

pub const CONTENT_TYPE: &str = "application/x-forgeci+xml";

/// copies a stored recipe document verbatim and annotates its root
/// element with `project`, `path`, and `revision`, the way the master
/// dispatches a recipe to a slave
pub fn annotate_recipe(recipe: &str, project: &str, path: &str, revision: &str) -> anyhow::Result<String> {
    let mut reader = Reader::from_str(recipe);
    reader.trim_text(false);
    let mut writer = Writer::new(Vec::new());
    let mut annotated = false;

    loop {
        let event = reader.read_event()?;
        if matches!(event, Event::Eof) {
            break;
        }

        let event = match event {
            Event::Start(tag) if !annotated => {
                annotated = true;
                Event::Start(annotate_tag(tag, project, path, revision))
            }
            Event::Empty(tag) if !annotated => {
                annotated = true;
                Event::Empty(annotate_tag(tag, project, path, revision))
            }
            other => other,
        };

        writer.write_event(event)?;
    }

    if !annotated {
        anyhow::bail!("recipe document has no root element to annotate");
    }

    Ok(String::from_utf8(writer.into_inner())?)
}

fn annotate_tag(tag: BytesStart<'_>, project: &str, path: &str, revision: &str) -> BytesStart<'static> {
    let mut tag = tag.into_owned();
    tag.push_attribute(("project", project));
    tag.push_attribute(("path", path));
    tag.push_attribute(("revision", revision));
    tag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotates_root_element() {
        let recipe = r#"<build><step id="compile"/></build>"#;
        let annotated = annotate_recipe(recipe, "demo", "trunk", "abc123").unwrap();

        assert!(annotated.starts_with("<build"));
        assert!(annotated.contains(r#"project="demo""#));
        assert!(annotated.contains(r#"path="trunk""#));
        assert!(annotated.contains(r#"revision="abc123""#));
        assert!(annotated.contains(r#"<step id="compile"/>"#));
    }

    #[test]
    fn rejects_document_without_root() {
        let recipe = "<!-- just a comment -->";
        assert!(annotate_recipe(recipe, "demo", "trunk", "abc123").is_err());
    }
}
