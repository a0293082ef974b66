//! Ordered script parameters.
//!
//! Parameters come from three places, concatenated in this order:
//! project configuration, a parameter file, then `-p NAME=VALUE` flags.
//! Order inside each group is kept and duplicate names are not merged;
//! the script engine decides what a repeated name means.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::Path;

use crate::{Error, Result};

/// A named value supplied to a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name.
    pub name: String,
    /// Parameter value, verbatim.
    #[serde(deserialize_with = "scalar_as_string")]
    pub value: String,
}

impl Parameter {
    /// Create a parameter.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Parse a `NAME=VALUE` assignment. The value may itself contain `=`.
    pub fn parse_assignment(s: &str) -> Result<Self> {
        let param = match s.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => Self::new(name.trim(), value),
            _ => {
                return Err(Error::configuration_with_help(
                    format!("Invalid parameter '{s}'"),
                    "Parameters must be given as NAME=VALUE",
                ));
            }
        };
        param.validate()?;
        Ok(param)
    }

    /// Reject line breaks, which would split one parameter into several
    /// lines of the engine's parameter file.
    pub fn validate(&self) -> Result<()> {
        if self.name.contains(['\n', '\r']) || self.value.contains(['\n', '\r']) {
            return Err(Error::configuration_with_help(
                format!("Parameter '{}' contains a line break", self.name.escape_debug()),
                "Parameter names and values must fit on a single line",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

impl std::str::FromStr for Parameter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_assignment(s)
    }
}

fn scalar_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Str(String),
        Int(i64),
        Float(f64),
        Bool(bool),
    }

    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Str(s) => s,
        Scalar::Int(i) => i.to_string(),
        Scalar::Float(f) => f.to_string(),
        Scalar::Bool(b) => b.to_string(),
    })
}

/// Ordered sequence of parameters. Duplicates are preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet(Vec<Parameter>);

impl ParameterSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenate configuration-sourced parameters before
    /// invocation-sourced ones, keeping each group's order.
    #[must_use]
    pub fn assemble(config: &Self, invocation: &Self) -> Self {
        let mut out = Vec::with_capacity(config.len() + invocation.len());
        out.extend(config.0.iter().cloned());
        out.extend(invocation.0.iter().cloned());
        Self(out)
    }

    /// Append a parameter.
    pub fn push(&mut self, param: Parameter) {
        self.0.push(param);
    }

    /// Append every parameter of `other`.
    pub fn extend(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    /// Iterate in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.0.iter()
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parameter names in order, for logging without values.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|p| p.name.as_str()).collect()
    }

    /// Check every parameter with [`Parameter::validate`].
    pub fn validate(&self) -> Result<()> {
        self.0.iter().try_for_each(Parameter::validate)
    }

    /// Parse `NAME=VALUE` flag values.
    pub fn from_assignments<I, S>(assignments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        assignments
            .into_iter()
            .map(|a| Parameter::parse_assignment(a.as_ref()))
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    /// Parse parameter file contents.
    ///
    /// One `NAME=VALUE` per line; blank lines and lines starting with `#`
    /// are skipped.
    pub fn parse_param_file(contents: &str) -> Result<Self> {
        let mut params = Vec::new();
        for (idx, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let param = Parameter::parse_assignment(line).map_err(|_| {
                Error::configuration(format!(
                    "Invalid parameter file line {}: '{line}' (expected NAME=VALUE)",
                    idx + 1
                ))
            })?;
            params.push(param);
        }
        Ok(Self(params))
    }

    /// Load a parameter file from disk.
    pub fn load_param_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read"))?;
        Self::parse_param_file(&contents)
    }

    /// Render as parameter file contents understood by the runtime engine.
    #[must_use]
    pub fn to_param_file(&self) -> String {
        let mut out = String::new();
        for param in &self.0 {
            out.push_str(&param.name);
            out.push('=');
            out.push_str(&param.value);
            out.push('\n');
        }
        out
    }

    /// Copy sorted by name; stable for equal names.
    #[must_use]
    pub fn sorted_by_name(&self) -> Self {
        let mut params = self.0.clone();
        params.sort_by(|a, b| a.name.cmp(&b.name));
        Self(params)
    }
}

impl From<Vec<Parameter>> for ParameterSet {
    fn from(params: Vec<Parameter>) -> Self {
        Self(params)
    }
}

impl FromIterator<Parameter> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = Parameter>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for ParameterSet {
    type Item = Parameter;
    type IntoIter = std::vec::IntoIter<Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ParameterSet {
    type Item = &'a Parameter;
    type IntoIter = std::slice::Iter<'a, Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(pairs: &[(&str, &str)]) -> ParameterSet {
        pairs.iter().map(|(n, v)| Parameter::new(*n, *v)).collect()
    }

    #[test]
    fn test_assemble_puts_config_first() {
        let config = set(&[("first", "1")]);
        let invocation = set(&[("second", "2")]);
        let assembled = ParameterSet::assemble(&config, &invocation);
        assert_eq!(assembled, set(&[("first", "1"), ("second", "2")]));
    }

    #[test]
    fn test_assemble_keeps_duplicates() {
        let config = set(&[("x", "config")]);
        let invocation = set(&[("x", "flag")]);
        let assembled = ParameterSet::assemble(&config, &invocation);
        assert_eq!(assembled.len(), 2);
        assert_eq!(assembled.names(), vec!["x", "x"]);
    }

    #[test]
    fn test_parse_assignment() {
        let p = Parameter::parse_assignment("DATE=2012-04").unwrap();
        assert_eq!(p, Parameter::new("DATE", "2012-04"));

        let p = Parameter::parse_assignment("QUERY=a=b").unwrap();
        assert_eq!(p.value, "a=b");

        let p = Parameter::parse_assignment("EMPTY=").unwrap();
        assert_eq!(p.value, "");

        assert!(Parameter::parse_assignment("novalue").is_err());
        assert!(Parameter::parse_assignment("=value").is_err());
    }

    #[test]
    fn test_line_breaks_are_rejected() {
        let err = Parameter::parse_assignment("A=x\nB=y").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(err.to_string().contains("line break"));
        assert!(Parameter::parse_assignment("A=x\r").is_err());

        let params = set(&[("A", "ok"), ("B", "two\nlines")]);
        assert!(params.validate().is_err());
        assert!(set(&[("A", "ok")]).validate().is_ok());
    }

    #[test]
    fn test_parse_param_file() {
        let contents = "\
# loader settings
LOADER=org.apache.pig.piggybank.storage.JsonLoader()

INPUT_SRC=s3n://bucket/example
INFER_TYPES=true
";
        let params = ParameterSet::parse_param_file(contents).unwrap();
        assert_eq!(params.names(), vec!["LOADER", "INPUT_SRC", "INFER_TYPES"]);
    }

    #[test]
    fn test_parse_param_file_reports_line() {
        let err = ParameterSet::parse_param_file("A=1\nbroken\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_to_param_file() {
        let params = set(&[("a", "1"), ("b", "two words")]);
        assert_eq!(params.to_param_file(), "a=1\nb=two words\n");
    }

    #[test]
    fn test_sorted_by_name_is_stable() {
        let params = set(&[("b", "1"), ("a", "2"), ("b", "0")]);
        let sorted = params.sorted_by_name();
        let values: Vec<_> = sorted.iter().map(|p| p.value.as_str()).collect();
        assert_eq!(values, vec!["2", "1", "0"]);
    }

    #[test]
    fn test_deserialize_scalar_values() {
        #[derive(Deserialize)]
        struct Doc {
            parameter: ParameterSet,
        }
        let doc: Doc = toml::from_str(
            r#"
[[parameter]]
name = "N"
value = 3

[[parameter]]
name = "FLAG"
value = true
"#,
        )
        .unwrap();
        assert_eq!(doc.parameter, set(&[("N", "3"), ("FLAG", "true")]));
    }

    proptest! {
        #[test]
        fn prop_assemble_preserves_both_groups(
            config in proptest::collection::vec(("[a-z]{1,4}", "[a-z0-9]{0,4}"), 0..8),
            invocation in proptest::collection::vec(("[a-z]{1,4}", "[a-z0-9]{0,4}"), 0..8),
        ) {
            let c: ParameterSet = config.iter().map(|(n, v)| Parameter::new(n.clone(), v.clone())).collect();
            let i: ParameterSet = invocation.iter().map(|(n, v)| Parameter::new(n.clone(), v.clone())).collect();
            let assembled = ParameterSet::assemble(&c, &i);

            prop_assert_eq!(assembled.len(), c.len() + i.len());
            let (head, tail) = assembled.0.split_at(c.len());
            prop_assert_eq!(head, &c.0[..]);
            prop_assert_eq!(tail, &i.0[..]);
        }
    }
}
