//! Event filtering for call-tree queries and `-e` expressions
//!
//! Each filter is an independent strategy implementing [`EventFilter`]; a
//! query keeps an event only if every filter in its list accepts it.
//! Expressions:
//! - Include names: `-e name=Layout,Paint`
//! - Exclude names: `-e '!name=MinorGC'`
//! - Regex on names: `-e 'name=/^V8\./'`
//! - Categories: `-e cat=scripting,rendering`
//! - Drop top-level task wrappers: `-e '!toplevel'`

use crate::config::CategoryMap;
use crate::error::{ModelError, Result};
use crate::event::RawEvent;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;

/// Decides whether an event takes part in a query
pub trait EventFilter: fmt::Debug {
    fn accept(&self, event: &RawEvent) -> bool;
}

/// True if every filter accepts the event
pub fn is_visible(filters: &[Box<dyn EventFilter>], event: &RawEvent) -> bool {
    filters.iter().all(|filter| filter.accept(event))
}

/// Rejects events whose name is in the set
#[derive(Debug, Clone)]
pub struct ExclusiveNameFilter {
    excluded: HashSet<String>,
}

impl ExclusiveNameFilter {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(names: I) -> Self {
        Self {
            excluded: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl EventFilter for ExclusiveNameFilter {
    fn accept(&self, event: &RawEvent) -> bool {
        !self.excluded.contains(&event.name)
    }
}

/// Accepts only events whose name is in the set
#[derive(Debug, Clone)]
pub struct VisibleNamesFilter {
    visible: HashSet<String>,
}

impl VisibleNamesFilter {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(names: I) -> Self {
        Self {
            visible: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl EventFilter for VisibleNamesFilter {
    fn accept(&self, event: &RawEvent) -> bool {
        self.visible.contains(&event.name)
    }
}

#[derive(Debug, Clone)]
pub struct NamePatternFilter {
    pattern: Regex,
}

impl NamePatternFilter {
    pub fn new(pattern: Regex) -> Self {
        Self { pattern }
    }
}

impl EventFilter for NamePatternFilter {
    fn accept(&self, event: &RawEvent) -> bool {
        self.pattern.is_match(&event.name)
    }
}

/// Accepts events mapped to, or tagged with, one of the categories
#[derive(Debug, Clone)]
pub struct CategoryFilter {
    categories: HashSet<String>,
    map: CategoryMap,
}

impl CategoryFilter {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(categories: I, map: CategoryMap) -> Self {
        Self {
            categories: categories.into_iter().map(Into::into).collect(),
            map,
        }
    }
}

impl EventFilter for CategoryFilter {
    fn accept(&self, event: &RawEvent) -> bool {
        self.categories.contains(self.map.category_of(event))
            || event.categories.iter().any(|c| self.categories.contains(c))
    }
}

/// Rejects top-level task wrappers so their children surface
#[derive(Debug, Clone)]
pub struct ExcludeTopLevelFilter {
    map: CategoryMap,
}

impl ExcludeTopLevelFilter {
    pub fn new(map: CategoryMap) -> Self {
        Self { map }
    }
}

impl EventFilter for ExcludeTopLevelFilter {
    fn accept(&self, event: &RawEvent) -> bool {
        !self.map.is_top_level(event)
    }
}

/// A parsed `-e` expression
#[derive(Debug, Clone)]
pub enum FilterExpr {
    Names(Vec<String>),
    ExcludeNames(Vec<String>),
    NamePattern(Regex),
    Categories(Vec<String>),
    ExcludeTopLevel,
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

impl FilterExpr {
    /// Parse one expression such as `name=A,B` or `!toplevel`
    pub fn from_expr(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        if expr == "!toplevel" {
            return Ok(FilterExpr::ExcludeTopLevel);
        }
        if let Some(list) = expr.strip_prefix("!name=") {
            return Ok(FilterExpr::ExcludeNames(split_list(list)));
        }
        if let Some(list) = expr.strip_prefix("name=") {
            if let Some(pattern) = list.strip_prefix('/').and_then(|s| s.strip_suffix('/')) {
                let regex = Regex::new(pattern)
                    .map_err(|e| ModelError::Filter(format!("{expr}: {e}")))?;
                return Ok(FilterExpr::NamePattern(regex));
            }
            return Ok(FilterExpr::Names(split_list(list)));
        }
        if let Some(list) = expr.strip_prefix("cat=") {
            return Ok(FilterExpr::Categories(split_list(list)));
        }
        Err(ModelError::Filter(format!(
            "{expr}. Expected name=LIST, !name=LIST, name=/REGEX/, cat=LIST or !toplevel"
        )))
    }

    pub fn into_filter(self, categories: &CategoryMap) -> Box<dyn EventFilter> {
        match self {
            FilterExpr::Names(names) => Box::new(VisibleNamesFilter::new(names)),
            FilterExpr::ExcludeNames(names) => Box::new(ExclusiveNameFilter::new(names)),
            FilterExpr::NamePattern(regex) => Box::new(NamePatternFilter::new(regex)),
            FilterExpr::Categories(list) => Box::new(CategoryFilter::new(list, categories.clone())),
            FilterExpr::ExcludeTopLevel => Box::new(ExcludeTopLevelFilter::new(categories.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;

    fn categories() -> CategoryMap {
        ModelConfig::default().category_map()
    }

    fn filter(expr: &str) -> Box<dyn EventFilter> {
        FilterExpr::from_expr(expr).unwrap().into_filter(&categories())
    }

    fn ev(name: &str) -> RawEvent {
        RawEvent::complete(name, 0.0, 1.0)
    }

    #[test]
    fn test_include_names() {
        let f = filter("name=Layout, Paint");
        assert!(f.accept(&ev("Layout")));
        assert!(f.accept(&ev("Paint")));
        assert!(!f.accept(&ev("FunctionCall")));
    }

    #[test]
    fn test_exclude_names() {
        let f = filter("!name=MinorGC");
        assert!(!f.accept(&ev("MinorGC")));
        assert!(f.accept(&ev("Layout")));
    }

    #[test]
    fn test_name_pattern() {
        let f = filter(r"name=/^V8\./");
        assert!(f.accept(&ev("V8.Execute")));
        assert!(!f.accept(&ev("Layout")));
    }

    #[test]
    fn test_bad_regex_rejected() {
        let err = FilterExpr::from_expr("name=/(/").unwrap_err();
        assert!(matches!(err, ModelError::Filter(_)));
    }

    #[test]
    fn test_category_filter_uses_map_and_trace_categories() {
        let f = filter("cat=scripting,devtools.timeline");
        assert!(f.accept(&ev("FunctionCall")));
        assert!(f.accept(&ev("Custom").with_categories(&["devtools.timeline"])));
        assert!(!f.accept(&ev("Layout")));
    }

    #[test]
    fn test_exclude_top_level() {
        let f = filter("!toplevel");
        assert!(!f.accept(&ev("RunTask")));
        assert!(!f.accept(&ev("Task").with_categories(&["toplevel"])));
        assert!(f.accept(&ev("Layout")));
    }

    #[test]
    fn test_is_visible_requires_all() {
        let filters = vec![filter("!name=Paint"), filter("cat=painting")];
        assert!(is_visible(&filters, &ev("CompositeLayers")));
        assert!(!is_visible(&filters, &ev("Paint")));
        assert!(!is_visible(&filters, &ev("Layout")));
        assert!(is_visible(&[], &ev("Anything")));
    }

    #[test]
    fn test_invalid_expression() {
        assert!(FilterExpr::from_expr("trace=open").is_err());
    }

    #[test]
    fn test_empty_list_matches_nothing() {
        let f = filter("name=");
        assert!(!f.accept(&ev("Layout")));
    }
}
