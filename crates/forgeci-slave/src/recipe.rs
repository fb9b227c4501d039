//! parses the recipe document dispatched by the master and executes its
//! steps. the spec narrows the slave to a minimal built-in step vocabulary
//! rather than a pluggable command registry: shell commands, and
//! declarative report emission built from those commands' output.

use serde::Deserialize;

use forgeci_data::message::ReportElement;

#[derive(Debug, Clone, Deserialize)]
pub struct ShellCommand {
    #[serde(rename = "@command")]
    pub command: String,
    #[serde(rename = "@dir", default)]
    pub dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecipeStep {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@description", default)]
    pub description: String,
    #[serde(rename = "shell", default)]
    pub shell: Vec<ShellCommand>,
    #[serde(rename = "report", default)]
    pub reports: Vec<ReportElement>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "build")]
pub struct Recipe {
    #[serde(rename = "@project", default)]
    pub project: String,
    #[serde(rename = "@path", default)]
    pub path: String,
    #[serde(rename = "@revision", default)]
    pub revision: String,
    #[serde(rename = "step", default)]
    pub steps: Vec<RecipeStep>,
}

pub fn parse(xml: &str) -> anyhow::Result<Recipe> {
    quick_xml::de::from_str(xml).map_err(|e| anyhow::anyhow!("invalid recipe document: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_steps_and_reports() {
        let xml = r#"<build project="demo" path="trunk" revision="abc">
            <step id="compile" description="compile sources">
                <shell command="make" dir="."/>
                <report category="tests"><item><field name="name">test_a</field></item></report>
            </step>
        </build>"#;

        let recipe = parse(xml).unwrap();
        assert_eq!(recipe.steps.len(), 1);
        assert_eq!(recipe.steps[0].shell[0].command, "make");
        assert_eq!(recipe.steps[0].reports[0].category, "tests");
    }

    #[test]
    fn rejects_malformed_document() {
        assert!(parse("<build><step id=\"x\"></build>").is_err());
    }
}
