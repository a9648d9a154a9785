//! Boost rule table for post-fusion score adjustment
//!
//! Rules are data, not code: each one pairs a passage regex with a
//! multiplier and is compiled once at startup. A rule may also carry a
//! `query_pattern`, in which case it only fires for queries matching it.

use crate::error::{RegsearchError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Boost rule as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostRuleConfig {
    pub name: String,
    /// Matched against chunk text
    pub pattern: String,
    pub multiplier: f32,
    #[serde(default)]
    pub description: String,
    /// Rule fires only when the query also matches this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_pattern: Option<String>,
}

impl BoostRuleConfig {
    /// Rules shipped for Spanish regulatory text
    pub fn defaults() -> Vec<Self> {
        vec![
            BoostRuleConfig {
                name: "monetary_amount".to_string(),
                pattern: r"S/\s*\d[\d,.]*".to_string(),
                multiplier: 1.25,
                description: "Passage states an amount in soles".to_string(),
                query_pattern: Some(
                    r"(?i)\b(monto|cu[aá]nto|importe|tope|m[aá]xim|vi[aá]tic|soles|costo|pago)"
                        .to_string(),
                ),
            },
            BoostRuleConfig {
                name: "regulatory_clause".to_string(),
                pattern: r"(?i)\b(art[ií]culo|numeral|inciso|literal)\s+\d+".to_string(),
                multiplier: 1.1,
                description: "Passage cites a numbered article or clause".to_string(),
                query_pattern: None,
            },
            BoostRuleConfig {
                name: "deadline".to_string(),
                pattern: r"(?i)\b\d+\s+d[ií]as\s+(h[aá]biles|calendario)".to_string(),
                multiplier: 1.15,
                description: "Passage states a deadline in days".to_string(),
                query_pattern: Some(r"(?i)\b(plazo|cu[aá]ndo|d[ií]as|fecha)".to_string()),
            },
        ]
    }
}

/// Rules file structure (`[[rule]]` entries)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostRulesFile {
    #[serde(default)]
    pub rule: Vec<BoostRuleConfig>,
}

/// Boost rule with pre-compiled regexes
#[derive(Debug, Clone)]
pub struct CompiledBoostRule {
    pub name: String,
    pub regex: Regex,
    pub query_regex: Option<Regex>,
    pub multiplier: f32,
    pub description: String,
}

impl CompiledBoostRule {
    /// Whether the rule applies to this query at all
    pub fn applies_to(&self, query: &str) -> bool {
        self.query_regex
            .as_ref()
            .map_or(true, |re| re.is_match(query))
    }

    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Compiled rule table
#[derive(Debug, Clone, Default)]
pub struct BoostRuleSet {
    pub rules: Vec<CompiledBoostRule>,
    /// Rule lookup by name
    pub rules_by_name: HashMap<String, usize>,
}

impl BoostRuleSet {
    /// Load a rule table from a TOML file
    pub fn from_config_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RegsearchError::io(e, format!("Failed to read boost rules: {:?}", path))
        })?;
        let file: BoostRulesFile = toml::from_str(&content)?;
        Self::from_configs(&file.rule)
    }

    /// Compile rules, rejecting bad regexes, duplicate names and
    /// non-positive multipliers
    pub fn from_configs(configs: &[BoostRuleConfig]) -> Result<Self> {
        let mut rules = Vec::with_capacity(configs.len());
        let mut rules_by_name = HashMap::new();

        for (idx, cfg) in configs.iter().enumerate() {
            if !(cfg.multiplier.is_finite() && cfg.multiplier > 0.0) {
                return Err(RegsearchError::Config(format!(
                    "Boost rule '{}' has invalid multiplier {}",
                    cfg.name, cfg.multiplier
                )));
            }

            let regex = Regex::new(&cfg.pattern).map_err(|e| {
                RegsearchError::Config(format!("Invalid regex for boost rule '{}': {}", cfg.name, e))
            })?;

            let query_regex = cfg
                .query_pattern
                .as_deref()
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        RegsearchError::Config(format!(
                            "Invalid query pattern for boost rule '{}': {}",
                            cfg.name, e
                        ))
                    })
                })
                .transpose()?;

            if rules_by_name.insert(cfg.name.clone(), idx).is_some() {
                return Err(RegsearchError::Config(format!(
                    "Duplicate boost rule name '{}'",
                    cfg.name
                )));
            }

            rules.push(CompiledBoostRule {
                name: cfg.name.clone(),
                regex,
                query_regex,
                multiplier: cfg.multiplier,
                description: cfg.description.clone(),
            });
        }

        Ok(Self {
            rules,
            rules_by_name,
        })
    }

    /// Rules that may fire for this query
    pub fn for_query<'a>(&'a self, query: &'a str) -> impl Iterator<Item = &'a CompiledBoostRule> {
        self.rules.iter().filter(move |r| r.applies_to(query))
    }

    pub fn get(&self, name: &str) -> Option<&CompiledBoostRule> {
        self.rules_by_name.get(name).map(|&idx| &self.rules[idx])
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_rules_compile() {
        let rules = BoostRuleSet::from_configs(&BoostRuleConfig::defaults()).unwrap();
        assert_eq!(rules.len(), 3);

        let monetary = rules.get("monetary_amount").unwrap();
        assert!(monetary.matches("S/ 320.00 soles para funcionarios"));
        assert!(monetary.matches("hasta S/1,200.50 por día"));
        assert!(!monetary.matches("sin montos en este pasaje"));
        assert!(monetary.applies_to("¿Cuál es el monto máximo para viáticos?"));
        assert!(!monetary.applies_to("¿Quién aprueba la comisión?"));

        let clause = rules.get("regulatory_clause").unwrap();
        assert!(clause.matches("conforme al Artículo 5 de la directiva"));
        assert!(clause.applies_to("cualquier consulta"));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let configs = vec![BoostRuleConfig {
            name: "broken".to_string(),
            pattern: "(unclosed".to_string(),
            multiplier: 1.2,
            description: String::new(),
            query_pattern: None,
        }];
        assert!(matches!(
            BoostRuleSet::from_configs(&configs),
            Err(RegsearchError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_multiplier_and_duplicates_rejected() {
        let mut rule = BoostRuleConfig::defaults().remove(0);
        rule.multiplier = 0.0;
        assert!(BoostRuleSet::from_configs(&[rule]).is_err());

        let rule = BoostRuleConfig::defaults().remove(1);
        assert!(BoostRuleSet::from_configs(&[rule.clone(), rule]).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("boost_rules.toml");
        std::fs::write(
            &path,
            r#"
            [[rule]]
            name = "percentage"
            pattern = '\d+\s*%'
            multiplier = 1.3
            description = "Percentages"
            "#,
        )
        .unwrap();

        let rules = BoostRuleSet::from_config_file(&path).unwrap();
        assert_eq!(rules.len(), 1);
        assert!(rules.get("percentage").unwrap().matches("el 15 % del total"));
    }
}
