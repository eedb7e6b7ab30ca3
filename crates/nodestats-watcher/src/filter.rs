//! Allow/deny filtering of stat keys.
//!
//! Rules are resolved per stat context: rules scoped to the key's context
//! apply; otherwise the global rules do. Within a scope an allow rule wins
//! over a deny rule. Keys no rule speaks about follow the configured
//! [`FilterDefault`]. Only parsed [`StatKey`]s reach the filter.

use nodestats_metrics::StatKey;
use regex::Regex;
use std::collections::HashMap;

use crate::config::{FilterConfig, FilterDefault, FilterMode, FilterScope};
use crate::error::{WatcherError, WatcherResult};

/// A compiled stat pattern.
///
/// `"<ns-glob>/<stat-glob>"` matches namespace-scoped keys segment by
/// segment; a pattern without `/` matches the stat segment of any key.
#[derive(Debug)]
struct Pattern {
    namespace: Option<Regex>,
    stat: Regex,
}

impl Pattern {
    fn compile(source: &str) -> WatcherResult<Self> {
        let invalid = |reason: &str| WatcherError::InvalidPattern {
            pattern: source.to_string(),
            reason: reason.to_string(),
        };
        let source = source.trim();
        let (namespace, stat) = match source.split_once('/') {
            Some((ns, stat)) => (Some(ns), stat),
            None => (None, source),
        };
        if stat.is_empty() || namespace.is_some_and(str::is_empty) {
            return Err(invalid("empty segment"));
        }
        if stat.contains('/') {
            return Err(invalid("more than one `/`"));
        }
        let compile = |glob: &str| glob_to_regex(glob).map_err(|e| invalid(&e.to_string()));
        Ok(Self {
            namespace: namespace.map(compile).transpose()?,
            stat: compile(stat)?,
        })
    }

    fn matches(&self, key: &StatKey) -> bool {
        match (&self.namespace, &key.namespace) {
            (Some(ns_pattern), Some(ns)) => ns_pattern.is_match(ns) && self.stat.is_match(&key.stat),
            (Some(_), None) => false,
            (None, _) => self.stat.is_match(&key.stat),
        }
    }
}

fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let mut re = String::with_capacity(glob.len() + 8);
    re.push('^');
    let mut literal = String::new();
    for c in glob.chars() {
        match c {
            '*' | '?' => {
                re.push_str(&regex::escape(&literal));
                literal.clear();
                re.push_str(if c == '*' { ".*" } else { "." });
            }
            c => literal.push(c),
        }
    }
    re.push_str(&regex::escape(&literal));
    re.push('$');
    Regex::new(&re)
}

#[derive(Debug, Default)]
struct RuleSet {
    allow: Option<Vec<Pattern>>,
    deny: Option<Vec<Pattern>>,
}

impl RuleSet {
    fn add(&mut self, mode: FilterMode, patterns: Vec<Pattern>) {
        let slot = match mode {
            FilterMode::Allow => &mut self.allow,
            FilterMode::Deny => &mut self.deny,
        };
        slot.get_or_insert_with(Vec::new).extend(patterns);
    }

    fn decide(&self, key: &StatKey, default: FilterDefault) -> bool {
        if let Some(allow) = &self.allow {
            return allow.iter().any(|p| p.matches(key));
        }
        if let Some(deny) = &self.deny {
            return !deny.iter().any(|p| p.matches(key));
        }
        default == FilterDefault::Allow
    }
}

/// Decides whether a stat key may be published. Immutable once built.
#[derive(Debug)]
pub struct FilterEngine {
    global: Option<RuleSet>,
    scoped: HashMap<String, RuleSet>,
    default: FilterDefault,
}

impl FilterEngine {
    pub fn new(config: &FilterConfig) -> WatcherResult<Self> {
        let mut global: Option<RuleSet> = None;
        let mut scoped: HashMap<String, RuleSet> = HashMap::new();

        for rule in &config.rules {
            let patterns = rule
                .patterns
                .iter()
                .map(|p| Pattern::compile(p))
                .collect::<WatcherResult<Vec<_>>>()?;
            let set = match &rule.scope {
                FilterScope::Global => global.get_or_insert_with(RuleSet::default),
                FilterScope::Context(ctx) => scoped.entry(ctx.clone()).or_default(),
            };
            set.add(rule.mode, patterns);
        }

        tracing::debug!(
            global = global.is_some(),
            scoped = scoped.len(),
            default = ?config.default,
            "filter engine built"
        );

        Ok(Self {
            global,
            scoped,
            default: config.default,
        })
    }

    /// An engine with no rules that lets everything through.
    pub fn allow_all() -> Self {
        Self {
            global: None,
            scoped: HashMap::new(),
            default: FilterDefault::Allow,
        }
    }

    pub fn is_eligible(&self, context: &str, key: &StatKey) -> bool {
        match self.scoped.get(context).or(self.global.as_ref()) {
            Some(rules) => rules.decide(key, self.default),
            None => self.default == FilterDefault::Allow,
        }
    }
}
