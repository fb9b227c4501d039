use serde::{Deserialize, Serialize};

/// one rule of a [`TargetPlatformInfo`]; an empty `propname` is never stored,
/// an empty rule list matches every slave
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformRule {
    pub propname: String,
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetPlatformInfo {
    pub id: i64,
    pub name: String,
    pub rules: Vec<PlatformRule>,
}

/// request body to create or replace a platform's rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformRequest {
    pub name: String,
    pub rules: Vec<PlatformRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfigRequest {
    pub name: String,
    pub label: String,
    pub path: String,
    pub min_rev: Option<String>,
    pub max_rev: Option<String>,
    pub recipe: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfigInfo {
    pub name: String,
    pub label: String,
    pub path: String,
    pub min_rev: Option<String>,
    pub max_rev: Option<String>,
    pub active: bool,
    pub description: String,
    pub platforms: Vec<TargetPlatformInfo>,
}

/// settings an operator can toggle after creation, mirroring the shape of a
/// partial update
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "key", content = "value", rename_all = "lowercase")]
pub enum BuildConfigSettingsRequest {
    Active(bool),
    Description(String),
}
