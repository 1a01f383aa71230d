use clap::ValueEnum;
use serde::Serialize;

use crate::content::DEFAULT_MAX_DEPTH;

/// Color rewrite rules, applied in the order given
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// `c m y k K` -> `0.0 0.0 0.0 0.0 K`
    Cmyk,
    /// `r g b rg` -> `1.0 1.0 1.0 rg`
    Rgb,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Cmyk => "cmyk",
            RuleKind::Rgb => "rgb",
        }
    }
}

/// What to do with a page whose content could only be partly resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UnresolvedPolicy {
    /// leave the page as it is
    Keep,
    /// treat unreadable parts as empty and rewrite the rest
    Blank,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecolorParams {
    pub rules: Vec<RuleKind>,
    /// indirection budget per /Contents entry
    pub max_depth: usize,
    pub unresolved: UnresolvedPolicy,
    /// drop objects no page refers to anymore
    pub prune: bool,
    /// flate-compress streams before saving
    pub compress: bool,
}

pub const DEFAULT_RULES: [RuleKind; 2] = [RuleKind::Cmyk, RuleKind::Rgb];

impl Default for RecolorParams {
    fn default() -> Self {
        Self {
            rules: DEFAULT_RULES.to_vec(),
            max_depth: DEFAULT_MAX_DEPTH,
            unresolved: UnresolvedPolicy::Keep,
            prune: true,
            compress: false,
        }
    }
}
