use regex::Regex;
use serde::{Deserialize, Serialize};

/// Include/exclude wildcard patterns (`*` any run, `?` one character).
/// Includes win when both are given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl RuleSet {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    pub fn compile(&self) -> Result<Rules, regex::Error> {
        Ok(Rules {
            include: self.include.iter().map(|p| wildcard(p)).collect::<Result<_, _>>()?,
            exclude: self.exclude.iter().map(|p| wildcard(p)).collect::<Result<_, _>>()?,
        })
    }
}

/// A compiled [`RuleSet`].
#[derive(Debug, Clone, Default)]
pub struct Rules {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl Rules {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    pub fn matches(&self, value: &str) -> bool {
        if !self.include.is_empty() {
            return self.include.iter().any(|r| r.is_match(value));
        }
        !self.exclude.iter().any(|r| r.is_match(value))
    }

    /// Empty rules let everything through.
    pub fn allows(&self, value: &str) -> bool {
        self.is_empty() || self.matches(value)
    }

    /// Cluster-scoped objects have no namespace and always pass.
    pub fn matches_namespace(&self, namespace: &str) -> bool {
        namespace.is_empty() || self.matches(namespace)
    }
}

fn wildcard(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
        }
    }
    re.push('$');
    Regex::new(&re)
}
