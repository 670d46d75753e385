use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MrbenchError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuitePrompt {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub expected: Option<String>,
}

/// Ordered prompts with unique ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSuite {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub prompts: Vec<SuitePrompt>,
}

#[derive(Deserialize)]
struct RawSuite {
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    prompts: Vec<RawPrompt>,
}

#[derive(Deserialize)]
struct RawPrompt {
    id: Option<String>,
    text: String,
    #[serde(default)]
    tags: Vec<String>,
    expected: Option<String>,
}

impl BenchmarkSuite {
    /// Loads a YAML suite. The name defaults to the file stem.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MrbenchError::Config(format!("failed to read suite {}: {e}", path.display()))
        })?;
        let fallback = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("suite");
        Self::parse(&raw, fallback)
    }

    pub fn parse(yaml: &str, fallback_name: &str) -> Result<Self> {
        let raw: RawSuite = serde_yaml::from_str(yaml)?;
        let prompts: Vec<SuitePrompt> = raw
            .prompts
            .into_iter()
            .enumerate()
            .map(|(i, p)| SuitePrompt {
                id: p.id.unwrap_or_else(|| format!("prompt_{i}")),
                text: p.text,
                tags: p.tags,
                expected: p.expected,
            })
            .collect();

        let suite = Self {
            name: raw.name.unwrap_or_else(|| fallback_name.to_string()),
            description: raw.description,
            prompts,
        };
        suite.validate()?;
        Ok(suite)
    }

    /// Single-prompt suite used by one-off runs.
    pub fn single(prompt: &str) -> Self {
        Self {
            name: "single".to_string(),
            description: String::new(),
            prompts: vec![SuitePrompt {
                id: "prompt_0".to_string(),
                text: prompt.to_string(),
                tags: Vec::new(),
                expected: None,
            }],
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.prompts.is_empty() {
            return Err(MrbenchError::Config(format!(
                "suite '{}' has no prompts",
                self.name
            )));
        }
        let mut seen = BTreeSet::new();
        for p in &self.prompts {
            if !seen.insert(p.id.as_str()) {
                return Err(MrbenchError::Config(format!(
                    "duplicate prompt id '{}' in suite '{}'",
                    p.id, self.name
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_ids_get_positional_defaults() {
        let suite = BenchmarkSuite::parse(
            r#"
name: smoke
prompts:
  - text: "first"
  - id: named
    text: "second"
    tags: [math]
  - text: "third"
"#,
            "fallback",
        )
        .unwrap();
        let ids: Vec<_> = suite.prompts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["prompt_0", "named", "prompt_2"]);
        assert_eq!(suite.prompts[1].tags, vec!["math".to_string()]);
        assert_eq!(suite.name, "smoke");
    }

    #[test]
    fn duplicate_ids_rejected() {
        let err = BenchmarkSuite::parse(
            "prompts:\n  - id: a\n    text: x\n  - id: a\n    text: y\n",
            "s",
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate prompt id 'a'"));
    }

    #[test]
    fn empty_suite_rejected() {
        assert!(BenchmarkSuite::parse("name: empty\nprompts: []\n", "s").is_err());
        assert!(BenchmarkSuite::parse("name: empty\n", "s").is_err());
    }

    #[test]
    fn load_uses_file_stem_as_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nightly.yaml");
        std::fs::write(&path, "prompts:\n  - text: hi\n").unwrap();
        let suite = BenchmarkSuite::load(&path).unwrap();
        assert_eq!(suite.name, "nightly");
        assert_eq!(suite.len(), 1);
    }
}
