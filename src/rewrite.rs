//! Textual color substitution on content-stream text.
//!
//! The matching is blind: operands are not tokenized and graphics state is not
//! tracked. Each rule is a separate [`RewriteRule`] so a tokenizing rewriter
//! can take the place of the regex rules without touching the resolver.

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};
use std::borrow::Cow;

use crate::recolor_params::RuleKind;

static CMYK_FILL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([\d.]+) ([\d.]+) ([\d.]+) ([\d.]+) K").expect("valid CMYK pattern"));
static RGB_FILL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([\d.]+) ([\d.]+) ([\d.]+) rg").expect("valid RGB pattern"));

pub const CMYK_WHITE: &str = "0.0 0.0 0.0 0.0 K";
pub const RGB_WHITE: &str = "1.0 1.0 1.0 rg";

pub trait RewriteRule {
    fn name(&self) -> &'static str;

    /// Returns the rewritten text and the number of substitutions made.
    fn apply<'t>(&self, text: &'t str) -> (Cow<'t, str>, usize);
}

/// Replaces every match of `pattern` with a constant.
pub struct PatternRule {
    name: &'static str,
    pattern: &'static Lazy<Regex>,
    replacement: &'static str,
}

impl PatternRule {
    pub fn cmyk() -> Self {
        Self { name: RuleKind::Cmyk.as_str(), pattern: &CMYK_FILL, replacement: CMYK_WHITE }
    }

    pub fn rgb() -> Self {
        Self { name: RuleKind::Rgb.as_str(), pattern: &RGB_FILL, replacement: RGB_WHITE }
    }
}

impl From<RuleKind> for PatternRule {
    fn from(kind: RuleKind) -> Self {
        match kind {
            RuleKind::Cmyk => PatternRule::cmyk(),
            RuleKind::Rgb => PatternRule::rgb(),
        }
    }
}

impl RewriteRule for PatternRule {
    fn name(&self) -> &'static str {
        self.name
    }

    fn apply<'t>(&self, text: &'t str) -> (Cow<'t, str>, usize) {
        let hits = self.pattern.find_iter(text).count();
        if hits == 0 {
            return (Cow::Borrowed(text), 0);
        }
        (self.pattern.replace_all(text, NoExpand(self.replacement)), hits)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub text: String,
    /// true iff `text` differs from the input
    pub changed: bool,
    /// substitutions per rule, in rule order
    pub matches: Vec<(&'static str, usize)>,
}

pub struct ColorRewriter {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl Default for ColorRewriter {
    fn default() -> Self {
        Self::new(vec![Box::new(PatternRule::cmyk()), Box::new(PatternRule::rgb())])
    }
}

impl ColorRewriter {
    pub fn new(rules: Vec<Box<dyn RewriteRule>>) -> Self {
        Self { rules }
    }

    pub fn from_kinds(kinds: &[RuleKind]) -> Self {
        Self::new(
            kinds
                .iter()
                .map(|&kind| Box::new(PatternRule::from(kind)) as Box<dyn RewriteRule>)
                .collect(),
        )
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    pub fn rewrite(&self, text: &str) -> Rewrite {
        let mut current = text.to_owned();
        let mut matches = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            let (next, hits) = rule.apply(&current);
            if let Cow::Owned(next) = next {
                current = next;
            }
            matches.push((rule.name(), hits));
        }
        let changed = current != text;
        Rewrite { text: current, changed, matches }
    }
}
