//! the five documents exchanged between slave and master (§4.4 of the
//! coordinator design), and the little bit of XML plumbing needed to tell
//! them apart on a transport that multiplexes all of them (the long-lived
//! binding; the HTTP binding instead routes by endpoint and only ever reads
//! one kind of document per request).

use serde::{Deserialize, Serialize};

use crate::build::StepResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@value")]
    pub value: String,
}

/// sent by the slave to introduce itself; the `os_*` and the free-form
/// properties are merged by the caller into one map before being handed to
/// the platform matcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename = "register")]
pub struct RegisterMessage {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@machine", default)]
    pub machine: String,
    #[serde(rename = "@processor", default)]
    pub processor: String,
    #[serde(rename = "@os-name", default)]
    pub os_name: String,
    #[serde(rename = "@os-family", default)]
    pub os_family: String,
    #[serde(rename = "@os-version", default)]
    pub os_version: String,
    #[serde(rename = "property", default)]
    pub properties: Vec<Property>,
}

impl RegisterMessage {
    /// flattens the fixed fields and the free-form properties into the
    /// single name -> value map the platform matcher operates on
    pub fn property_map(&self) -> std::collections::BTreeMap<String, String> {
        let mut map = std::collections::BTreeMap::new();
        map.insert("machine".to_string(), self.machine.clone());
        map.insert("processor".to_string(), self.processor.clone());
        map.insert("os".to_string(), self.os_name.clone());
        map.insert("family".to_string(), self.os_family.clone());
        map.insert("version".to_string(), self.os_version.clone());

        for property in &self.properties {
            map.insert(property.name.clone(), property.value.clone());
        }

        map
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename = "started")]
pub struct StartedMessage {
    /// ISO-8601, UTC, no timezone suffix
    #[serde(rename = "@time")]
    pub time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldElement {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "$text")]
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemElement {
    #[serde(rename = "field", default)]
    pub fields: Vec<FieldElement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportElement {
    #[serde(rename = "@category", default)]
    pub category: String,
    #[serde(rename = "item", default)]
    pub items: Vec<ItemElement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageElement {
    #[serde(rename = "$text", default)]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogElement {
    #[serde(rename = "@generator", default)]
    pub generator: String,
    #[serde(rename = "message", default)]
    pub messages: Vec<MessageElement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorElement {
    #[serde(rename = "@message")]
    pub message: String,
}

/// one completed build step, as reported by the slave while the recipe runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename = "step")]
pub struct StepMessage {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@description", default)]
    pub description: String,
    /// ISO-8601 start time of the step, UTC, no timezone suffix
    #[serde(rename = "@time")]
    pub time: String,
    /// duration of the step in seconds
    #[serde(rename = "@duration")]
    pub duration: f64,
    #[serde(rename = "@result")]
    pub result: StepResult,
    #[serde(rename = "log", default)]
    pub logs: Vec<LogElement>,
    #[serde(rename = "report", default)]
    pub reports: Vec<ReportElement>,
    #[serde(rename = "error", default)]
    pub errors: Vec<ErrorElement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename = "completed")]
pub struct CompletedMessage {
    #[serde(rename = "@time")]
    pub time: String,
    #[serde(rename = "@result")]
    pub result: StepResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename = "aborted")]
pub struct AbortedMessage {
    #[serde(rename = "@time")]
    pub time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename = "error")]
pub struct SessionErrorMessage {
    #[serde(rename = "@message")]
    pub message: String,
}

/// a document received from a slave on the long-lived binding, tagged by
/// which of the five root elements it carried
#[derive(Debug, Clone)]
pub enum SlaveMessage {
    Register(RegisterMessage),
    Started(StartedMessage),
    Step(Box<StepMessage>),
    Completed(CompletedMessage),
    Aborted(AbortedMessage),
    Error(SessionErrorMessage),
}

/// peeks at the root element's tag name to decide which concrete message
/// type to deserialize into; quick-xml's serde layer has no notion of an
/// externally tagged enum rooted at the document element, so we dispatch by
/// hand the same way a SAX-style reader would
pub fn parse_slave_message(xml: &str) -> anyhow::Result<SlaveMessage> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let tag = loop {
        match reader.read_event()? {
            Event::Start(tag) | Event::Empty(tag) => {
                break String::from_utf8_lossy(tag.name().as_ref()).into_owned();
            }
            Event::Eof => anyhow::bail!("empty slave message document"),
            _ => continue,
        }
    };

    Ok(match tag.as_str() {
        "register" => SlaveMessage::Register(quick_xml::de::from_str(xml)?),
        "started" => SlaveMessage::Started(quick_xml::de::from_str(xml)?),
        "step" => SlaveMessage::Step(Box::new(quick_xml::de::from_str(xml)?)),
        "completed" => SlaveMessage::Completed(quick_xml::de::from_str(xml)?),
        "aborted" => SlaveMessage::Aborted(quick_xml::de::from_str(xml)?),
        "error" => SlaveMessage::Error(quick_xml::de::from_str(xml)?),
        other => anyhow::bail!("unrecognized slave message element '{other}'"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_message_round_trips() {
        let xml = r#"<register name="slave1" machine="x86_64" processor="amd64" os-name="linux" os-family="posix" os-version="6.1">
            <property name="distro" value="arch"/>
        </register>"#;

        let msg = match parse_slave_message(xml).unwrap() {
            SlaveMessage::Register(m) => m,
            _ => panic!("expected register message"),
        };

        assert_eq!(msg.name, "slave1");
        let props = msg.property_map();
        assert_eq!(props.get("family").unwrap(), "posix");
        assert_eq!(props.get("distro").unwrap(), "arch");
    }

    #[test]
    fn step_message_parses_nested_elements() {
        let xml = r#"<step id="1" description="build" time="2024-01-01T00:00:00" duration="1.5" result="failure">
            <log generator="shell"><message>compiling...</message></log>
            <report category="tests"><item><field name="name">test_a</field></item></report>
            <error message="exit code 1"/>
        </step>"#;

        let msg = match parse_slave_message(xml).unwrap() {
            SlaveMessage::Step(m) => *m,
            _ => panic!("expected step message"),
        };

        assert_eq!(msg.result, StepResult::Failure);
        assert_eq!(msg.logs.len(), 1);
        assert_eq!(msg.reports[0].items[0].fields[0].value, "test_a");
        assert_eq!(msg.errors[0].message, "exit code 1");
    }

    #[test]
    fn unknown_element_is_rejected() {
        let xml = r#"<bogus/>"#;
        assert!(parse_slave_message(xml).is_err());
    }
}
