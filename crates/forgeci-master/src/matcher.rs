//! matches a registering slave's property map against the platform rules
//! of every active build configuration.

use log::warn;
use regex::RegexBuilder;
use std::collections::BTreeMap;

use forgeci_data::config::PlatformRule;

/// a platform the slave qualifies for, identified by the owning
/// configuration and the platform id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformMatch {
    pub config: String,
    pub platform: i64,
}

/// one active (config, platform) pair considered for matching
pub struct PlatformCandidate<'a> {
    pub config: &'a str,
    pub platform: i64,
    pub rules: &'a [PlatformRule],
}

/// returns every platform whose rules all match the given property map
pub fn matching_platforms<'a>(
    properties: &BTreeMap<String, String>,
    candidates: impl IntoIterator<Item = PlatformCandidate<'a>>,
) -> Vec<PlatformMatch> {
    candidates
        .into_iter()
        .filter(|candidate| rules_match(candidate.rules, properties))
        .map(|candidate| PlatformMatch { config: candidate.config.to_string(), platform: candidate.platform })
        .collect()
}

fn rules_match(rules: &[PlatformRule], properties: &BTreeMap<String, String>) -> bool {
    rules.iter().all(|rule| rule_matches(rule, properties))
}

fn rule_matches(rule: &PlatformRule, properties: &BTreeMap<String, String>) -> bool {
    if rule.propname.is_empty() {
        return true;
    }

    let Some(value) = properties.get(&rule.propname) else {
        return false;
    };

    if value.is_empty() {
        return false;
    }

    let regex = match RegexBuilder::new(&rule.pattern).case_insensitive(true).build() {
        Ok(regex) => regex,
        Err(e) => {
            warn!("platform rule pattern '{}' for property '{}' does not compile: {e}", rule.pattern, rule.propname);
            return false;
        }
    };

    regex.is_match(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("os".to_string(), "linux".to_string());
        map.insert("processor".to_string(), "x86_64".to_string());
        map
    }

    #[test]
    fn matches_when_all_rules_pass() {
        let rules = vec![
            PlatformRule { propname: "os".into(), pattern: "^linux$".into() },
            PlatformRule { propname: "processor".into(), pattern: "x86.*".into() },
        ];

        assert!(rules_match(&rules, &props()));
    }

    #[test]
    fn fails_when_one_rule_misses() {
        let rules = vec![PlatformRule { propname: "os".into(), pattern: "^windows$".into() }];

        assert!(!rules_match(&rules, &props()));
    }

    #[test]
    fn missing_property_is_non_match() {
        let rules = vec![PlatformRule { propname: "distro".into(), pattern: ".*".into() }];

        assert!(!rules_match(&rules, &props()));
    }

    #[test]
    fn empty_propname_matches_unconditionally() {
        let rules = vec![PlatformRule { propname: String::new(), pattern: String::new() }];

        assert!(rules_match(&rules, &props()));
    }

    #[test]
    fn invalid_pattern_is_non_match() {
        let rules = vec![PlatformRule { propname: "os".into(), pattern: "(".into() }];

        assert!(!rules_match(&rules, &props()));
    }

    #[test]
    fn matching_platforms_filters_candidates() {
        let rules_a = vec![PlatformRule { propname: "os".into(), pattern: "linux".into() }];
        let rules_b = vec![PlatformRule { propname: "os".into(), pattern: "windows".into() }];

        let candidates = vec![
            PlatformCandidate { config: "a", platform: 1, rules: &rules_a },
            PlatformCandidate { config: "b", platform: 2, rules: &rules_b },
        ];

        let matched = matching_platforms(&props(), candidates);
        assert_eq!(matched, vec![PlatformMatch { config: "a".into(), platform: 1 }]);
    }
}
