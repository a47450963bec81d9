//! Parsing of string dependency specifications.
//!
//! A specification names a parameter or method, optionally through a dotted
//! path of sub-objects, optionally followed by `:attribute`:
//!
//! ```text
//! spec      := ident ( "." ident )* ( ":" ident )?
//! ident     := ( alpha | "_" ) ( alnum | "_" )*
//! ```
//!
//! `"a"` depends on the value of `a`, `"sub.a"` on the value of `a` on the
//! object stored in `sub`, and `"a:constant"` on the `constant` facet of `a`.

use std::fmt;
use std::str::FromStr;

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, multispace0},
    combinator::{eof, opt, recognize},
    multi::many0,
    sequence::{pair, preceded},
    IResult, Parser,
};

use crate::error::{ParamError, Result};

/// A parsed dependency specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencySpec {
    raw: String,
    path: Vec<String>,
    name: String,
    what: String,
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))
    .parse(input)
}

type Parts<'a> = (&'a str, Vec<&'a str>, Option<&'a str>);

fn spec_parts(input: &str) -> IResult<&str, Parts<'_>> {
    let (input, _) = multispace0.parse(input)?;
    let (input, first) = identifier(input)?;
    let (input, rest) = many0(preceded(char('.'), identifier)).parse(input)?;
    let (input, what) = opt(preceded(char(':'), identifier)).parse(input)?;
    let (input, _) = multispace0.parse(input)?;
    let (input, _) = eof.parse(input)?;
    Ok((input, (first, rest, what)))
}

impl DependencySpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let (_, (first, rest, what)) = spec_parts(spec).map_err(|err| ParamError::InvalidSpec {
            spec: spec.to_string(),
            message: err.to_string(),
        })?;
        let mut segments: Vec<String> = std::iter::once(first)
            .chain(rest)
            .map(str::to_string)
            .collect();
        let name = segments.pop().unwrap_or_default();
        Ok(DependencySpec {
            raw: spec.trim().to_string(),
            path: segments,
            name,
            what: what.unwrap_or("value").to_string(),
        })
    }

    /// Sub-object path leading to the owner of [`name`](Self::name).
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// The sub-object path joined with dots, empty when the spec is local.
    ///
    /// This form has no leading dot, so it parses back into a spec naming the
    /// sub-object itself.
    pub fn path_string(&self) -> String {
        self.path.join(".")
    }

    /// The sub-object path as an attribute access from the declaring object,
    /// `".sub.inner"` for `"sub.inner.b"` and empty when the spec is local.
    pub fn dotted_path(&self) -> String {
        self.path.iter().map(|segment| format!(".{}", segment)).collect()
    }

    /// The parameter or method depended on.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The attribute depended on, `"value"` unless given after `:`.
    pub fn what(&self) -> &str {
        &self.what
    }

    /// Whether an explicit `:attribute` was given.
    pub fn has_explicit_what(&self) -> bool {
        self.raw.contains(':')
    }

    /// First segment of the spec: the attribute on the declaring object
    /// whose change may require re-resolution.
    pub fn root(&self) -> &str {
        self.path.first().map(String::as_str).unwrap_or(&self.name)
    }

    /// Whether the spec goes through a sub-object.
    pub fn is_nested(&self) -> bool {
        !self.path.is_empty()
    }

    /// The spec as written, whitespace trimmed.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl FromStr for DependencySpec {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self> {
        DependencySpec::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local() {
        let spec = DependencySpec::parse("a").unwrap();
        assert_eq!(spec.name(), "a");
        assert_eq!(spec.what(), "value");
        assert!(spec.path().is_empty());
        assert_eq!(spec.root(), "a");
        assert!(!spec.is_nested());
    }

    #[test]
    fn test_parse_nested_with_facet() {
        let spec: DependencySpec = " sub.inner.b:constant ".parse().unwrap();
        assert_eq!(spec.path(), &["sub".to_string(), "inner".to_string()]);
        assert_eq!(spec.path_string(), "sub.inner");
        assert_eq!(spec.dotted_path(), ".sub.inner");
        assert_eq!(spec.name(), "b");
        assert_eq!(spec.what(), "constant");
        assert_eq!(spec.root(), "sub");
        assert!(spec.has_explicit_what());
        assert_eq!(spec.to_string(), "sub.inner.b:constant");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "a..b", "a:b:c", "1a", "a.", ":value", "a b"] {
            let err = DependencySpec::parse(bad).unwrap_err();
            assert!(matches!(err, ParamError::InvalidSpec { .. }), "{bad}");
        }
    }
}
