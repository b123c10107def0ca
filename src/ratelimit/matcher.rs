//! Header matchers used by the `header_value_match` action.

use regex::Regex;

use super::context::RequestContext;
use super::rules::HeaderMatcherConfig;
use crate::error::{PolicyError, Result};

/// How a header value is tested.
#[derive(Debug, Clone)]
pub enum HeaderMatch {
    /// Equal to the value; an empty value matches any present header
    Exact(String),
    /// Whole-value regex match
    Regex(Regex),
    /// Parses as an integer in `[start, end)`
    Range { start: i64, end: i64 },
    /// Header is present (`true`) or not (`false`)
    Present(bool),
    Prefix(String),
    Suffix(String),
    Contains(String),
}

/// A single header condition.
#[derive(Debug, Clone)]
pub struct HeaderMatcher {
    name: String,
    matcher: HeaderMatch,
    invert: bool,
}

impl HeaderMatcher {
    pub fn new(name: impl Into<String>, matcher: HeaderMatch, invert: bool) -> Self {
        Self {
            name: name.into(),
            matcher,
            invert,
        }
    }

    /// Build a matcher from configuration. `field` names the matcher in errors.
    pub(crate) fn from_config(rule: usize, field: &str, config: &HeaderMatcherConfig) -> Result<Self> {
        if config.name.is_empty() {
            return Err(PolicyError::invalid(rule, format!("{field}.name"), "must not be empty"));
        }

        let mut specifiers = Vec::with_capacity(1);
        if let Some(value) = &config.exact_match {
            specifiers.push(HeaderMatch::Exact(value.clone()));
        }
        if let Some(regex) = &config.safe_regex_match {
            let anchored = format!("^(?:{})$", regex.regex);
            let compiled = Regex::new(&anchored).map_err(|e| {
                PolicyError::invalid(rule, format!("{field}.safe_regex_match"), e.to_string())
            })?;
            specifiers.push(HeaderMatch::Regex(compiled));
        }
        if let Some(range) = &config.range_match {
            if range.start >= range.end {
                return Err(PolicyError::invalid(
                    rule,
                    format!("{field}.range_match"),
                    "start must be less than end",
                ));
            }
            specifiers.push(HeaderMatch::Range {
                start: range.start,
                end: range.end,
            });
        }
        if let Some(present) = config.present_match {
            specifiers.push(HeaderMatch::Present(present));
        }
        if let Some(value) = &config.prefix_match {
            specifiers.push(HeaderMatch::Prefix(value.clone()));
        }
        if let Some(value) = &config.suffix_match {
            specifiers.push(HeaderMatch::Suffix(value.clone()));
        }
        if let Some(value) = &config.contains_match {
            specifiers.push(HeaderMatch::Contains(value.clone()));
        }

        if specifiers.len() != 1 {
            return Err(PolicyError::invalid(
                rule,
                field,
                format!("exactly one match specifier must be set, found {}", specifiers.len()),
            ));
        }
        let matcher = specifiers.remove(0);

        Ok(Self::new(config.name.clone(), matcher, config.invert_match))
    }

    /// Test this matcher against the request headers.
    pub fn matches<C: RequestContext + ?Sized>(&self, ctx: &C) -> bool {
        let Some(value) = ctx.header(&self.name) else {
            // Value matchers never match a missing header, inverted or not.
            return match self.matcher {
                HeaderMatch::Present(present) => present == self.invert,
                _ => false,
            };
        };

        let matched = match &self.matcher {
            HeaderMatch::Exact(expected) => expected.is_empty() || value == expected,
            HeaderMatch::Regex(regex) => regex.is_match(value),
            HeaderMatch::Range { start, end } => value
                .parse::<i64>()
                .map(|n| n >= *start && n < *end)
                .unwrap_or(false),
            HeaderMatch::Present(present) => *present,
            HeaderMatch::Prefix(prefix) => value.starts_with(prefix.as_str()),
            HeaderMatch::Suffix(suffix) => value.ends_with(suffix.as_str()),
            HeaderMatch::Contains(needle) => value.contains(needle.as_str()),
        };

        matched != self.invert
    }
}

/// True when every matcher matches. An empty list matches.
pub fn match_all<C: RequestContext + ?Sized>(matchers: &[HeaderMatcher], ctx: &C) -> bool {
    matchers.iter().all(|m| m.matches(ctx))
}
