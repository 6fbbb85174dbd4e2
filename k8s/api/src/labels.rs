use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};
use tracing::debug;

#[derive(Clone, Debug, Eq, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

pub type Expressions = Vec<Expression>;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Expression {
    key: String,
    operator: Operator,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    values: BTreeSet<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// Selects a set of resources by their labels.
///
/// A selector holds either exact-match labels or set-based expressions. When both are
/// present, a non-empty `matchLabels` takes precedence and `matchExpressions` is ignored.
/// A selector with neither selects everything.
#[derive(Clone, Debug, Eq, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    match_labels: Option<Map>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    match_expressions: Option<Expressions>,
}

/// The requirements a selector actually evaluates.
enum Requirements<'s> {
    Labels(&'s Map),
    Expressions(&'s [Expression]),
    Everything,
}

// === Selector ===

impl Selector {
    pub fn from_expressions(exprs: Expressions) -> Self {
        Self {
            match_labels: None,
            match_expressions: Some(exprs),
        }
    }

    pub fn from_map(map: Map) -> Self {
        Self {
            match_labels: Some(map),
            match_expressions: None,
        }
    }

    /// Builds a selector from an untyped `{matchLabels, matchExpressions}` map.
    ///
    /// Entries that cannot be decoded are dropped. If nothing usable remains, the
    /// resulting selector selects everything.
    pub fn from_unstructured(spec: &serde_json::Value) -> Self {
        let labels = spec
            .get("matchLabels")
            .and_then(|v| v.as_object())
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| match v.as_str() {
                        Some(v) => Some((k.clone(), v.to_string())),
                        None => {
                            debug!(key = %k, value = %v, "Ignoring non-string label value");
                            None
                        }
                    })
                    .collect::<Map>()
            })
            .unwrap_or_default();
        if !labels.is_empty() {
            return Self::from_map(labels);
        }

        let exprs = spec
            .get("matchExpressions")
            .and_then(|v| v.as_array())
            .map(|exprs| {
                exprs
                    .iter()
                    .filter_map(|expr| {
                        serde_json::from_value::<Expression>(expr.clone())
                            .map_err(|error| debug!(%error, %expr, "Ignoring invalid expression"))
                            .ok()
                    })
                    .collect::<Expressions>()
            })
            .unwrap_or_default();
        if !exprs.is_empty() {
            return Self::from_expressions(exprs);
        }

        Self::default()
    }

    /// Indicates whether this selector selects every label set.
    pub fn selects_all(&self) -> bool {
        matches!(self.requirements(), Requirements::Everything)
    }

    /// Indicates whether no label set can satisfy this selector, i.e. it requires a
    /// value from an empty `In` set.
    pub fn matches_nothing(&self) -> bool {
        match self.requirements() {
            Requirements::Expressions(exprs) => exprs
                .iter()
                .any(|e| e.operator == Operator::In && e.values.is_empty()),
            _ => false,
        }
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        match self.requirements() {
            Requirements::Labels(match_labels) => match_labels
                .iter()
                .all(|(k, v)| labels.0.get(k) == Some(v)),
            Requirements::Expressions(exprs) => {
                exprs.iter().all(|expr| expr.matches(labels.as_ref()))
            }
            Requirements::Everything => true,
        }
    }

    fn requirements(&self) -> Requirements<'_> {
        if let Some(labels) = self.match_labels.as_ref().filter(|l| !l.is_empty()) {
            return Requirements::Labels(labels);
        }
        if let Some(exprs) = self.match_expressions.as_deref().filter(|e| !e.is_empty()) {
            return Requirements::Expressions(exprs);
        }
        Requirements::Everything
    }
}

/// Formats the selector with the Kubernetes label selector syntax, e.g.
/// `app=web,tier in (backend,cache),!canary`.
impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.requirements() {
            Requirements::Labels(labels) => {
                for (i, (k, v)) in labels.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{k}={v}")?;
                }
            }
            Requirements::Expressions(exprs) => {
                // An empty `notin` set excludes nothing and has no textual form.
                let mut exprs = exprs
                    .iter()
                    .filter(|e| !(e.operator == Operator::NotIn && e.values.is_empty()))
                    .collect::<Vec<_>>();
                exprs.sort_by(|a, b| a.key.cmp(&b.key));
                for (i, expr) in exprs.into_iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    fmt::Display::fmt(expr, f)?;
                }
            }
            Requirements::Everything => {}
        }
        Ok(())
    }
}

impl From<&LabelSelector> for Selector {
    fn from(selector: &LabelSelector) -> Self {
        let labels = selector.match_labels.clone().unwrap_or_default();
        if !labels.is_empty() {
            return Self::from_map(labels);
        }

        let exprs = selector
            .match_expressions
            .iter()
            .flatten()
            .filter_map(|req| {
                let operator = match req.operator.as_str() {
                    "In" => Operator::In,
                    "NotIn" => Operator::NotIn,
                    "Exists" => Operator::Exists,
                    "DoesNotExist" => Operator::DoesNotExist,
                    op => {
                        debug!(key = %req.key, operator = %op, "Ignoring unknown operator");
                        return None;
                    }
                };
                Some(Expression {
                    key: req.key.clone(),
                    operator,
                    values: req.values.iter().flatten().cloned().collect(),
                })
            })
            .collect::<Expressions>();
        if !exprs.is_empty() {
            return Self::from_expressions(exprs);
        }

        Self::default()
    }
}

impl std::iter::FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl std::iter::FromIterator<Expression> for Selector {
    fn from_iter<T: IntoIterator<Item = Expression>>(iter: T) -> Self {
        Self::from_expressions(iter.into_iter().collect())
    }
}

// === Labels ===

impl Labels {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl From<Option<Map>> for Labels {
    #[inline]
    fn from(labels: Option<Map>) -> Self {
        labels.unwrap_or_default().into()
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl<T: AsRef<Map>> std::cmp::PartialEq<T> for Labels {
    #[inline]
    fn eq(&self, t: &T) -> bool {
        self.0.as_ref().eq(t.as_ref())
    }
}

impl std::iter::FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

// === Expression ===

impl Expression {
    pub fn new<V>(key: impl Into<String>, operator: Operator, values: V) -> Self
    where
        V: IntoIterator,
        V::Item: Into<String>,
    {
        Self {
            key: key.into(),
            operator,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    fn matches(&self, labels: &Map) -> bool {
        match self.operator {
            Operator::In => labels
                .get(&self.key)
                .map(|v| self.values.contains(v))
                .unwrap_or(false),
            Operator::NotIn => labels
                .get(&self.key)
                .map(|v| !self.values.contains(v))
                .unwrap_or(true),
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = || self.values.iter().cloned().collect::<Vec<_>>().join(",");
        match self.operator {
            Operator::In => write!(f, "{} in ({})", self.key, values()),
            Operator::NotIn => write!(f, "{} notin ({})", self.key, values()),
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;
    use std::iter::FromIterator;

    #[test]
    fn test_matches() {
        for (selector, labels, matches, msg) in &[
            (Selector::default(), Labels::default(), true, "empty match"),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(Some(("foo", "bar"))),
                true,
                "exact label match",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                true,
                "sufficient label match",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(Some(("foo", "baz"))),
                false,
                "label value mismatch",
            ),
            (
                Selector::from_iter(Some(Expression::new("foo", Operator::In, ["bar"]))),
                Labels::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                true,
                "expression match",
            ),
            (
                Selector::from_iter(Some(Expression::new("foo", Operator::NotIn, ["bar"]))),
                Labels::from_iter(Some(("foo", "bar"))),
                false,
                "notin excludes listed value",
            ),
            (
                Selector::from_iter(Some(Expression::new("foo", Operator::NotIn, ["bar"]))),
                Labels::from_iter(Some(("bah", "baz"))),
                true,
                "notin includes missing key",
            ),
            (
                Selector::from_iter(Some(Expression::new(
                    "foo",
                    Operator::Exists,
                    None::<String>,
                ))),
                Labels::from_iter(Some(("foo", "anything"))),
                true,
                "exists",
            ),
            (
                Selector::from_iter(Some(Expression::new(
                    "foo",
                    Operator::DoesNotExist,
                    None::<String>,
                ))),
                Labels::from_iter(Some(("foo", "anything"))),
                false,
                "does not exist",
            ),
        ] {
            assert_eq!(selector.matches(labels), *matches, "{}", msg);
        }
    }

    #[test]
    fn match_labels_take_precedence() {
        let selector = Selector {
            match_labels: Some(Some(("app".to_string(), "foo".to_string())).into_iter().collect()),
            match_expressions: Some(vec![Expression::new(
                "app",
                Operator::NotIn,
                ["foo"],
            )]),
        };
        assert!(selector.matches(&Labels::from_iter(Some(("app", "foo")))));
        assert_eq!(selector.to_string(), "app=foo");
    }

    #[test]
    fn equivalent_representations_match_alike() {
        let by_labels = Selector::from_iter(Some(("app", "foo")));
        let by_exprs = Selector::from_iter(Some(Expression::new("app", Operator::In, ["foo"])));
        for labels in [
            Labels::from_iter(Some(("app", "foo"))),
            Labels::from_iter(Some(("app", "bar"))),
            Labels::from_iter(vec![("app", "foo"), ("tier", "web")]),
            Labels::default(),
        ] {
            assert_eq!(by_labels.matches(&labels), by_exprs.matches(&labels));
        }
    }

    #[test]
    fn displays_match_labels() {
        let selector = Selector::from_unstructured(&serde_json::json!({
            "matchLabels": {
                "part-of": "viz",
                "app": "metrics-api",
            },
        }));
        assert_eq!(selector.to_string(), "app=metrics-api,part-of=viz");
    }

    #[test]
    fn displays_match_expressions() {
        let selector = Selector::from_unstructured(&serde_json::json!({
            "matchExpressions": [
                { "key": "part-of", "operator": "NotIn", "values": ["viz-2"] },
                { "key": "app", "operator": "In", "values": ["prometheus", "metrics-api"] },
            ],
        }));
        assert_eq!(
            selector.to_string(),
            "app in (metrics-api,prometheus),part-of notin (viz-2)"
        );
    }

    #[test]
    fn displays_existence_expressions() {
        let selector = Selector::from_iter(vec![
            Expression::new("canary", Operator::DoesNotExist, None::<String>),
            Expression::new("app", Operator::Exists, None::<String>),
        ]);
        assert_eq!(selector.to_string(), "app,!canary");
    }

    #[test]
    fn empty_value_sets() {
        let none = Selector::from_iter(vec![
            Expression::new("app", Operator::Exists, None::<String>),
            Expression::new("tier", Operator::In, None::<String>),
        ]);
        assert!(none.matches_nothing());
        assert!(!none.matches(&Labels::from_iter(vec![("app", "foo"), ("tier", "web")])));

        let any = Selector::from_iter(vec![
            Expression::new("app", Operator::In, ["foo"]),
            Expression::new("tier", Operator::NotIn, None::<String>),
        ]);
        assert!(!any.matches_nothing());
        assert!(any.matches(&Labels::from_iter(vec![("app", "foo"), ("tier", "web")])));
        assert_eq!(any.to_string(), "app in (foo)");

        assert!(!Selector::from_iter(Some(("app", "foo"))).matches_nothing());
        assert!(!Selector::default().matches_nothing());
    }

    #[test]
    fn unstructured_without_requirements_selects_all() {
        for spec in [
            serde_json::json!({}),
            serde_json::json!({ "matchLabels": {} }),
            serde_json::json!({ "matchExpressions": [] }),
            serde_json::json!({ "matchExpressions": [{ "key": "app", "operator": "Near" }] }),
            serde_json::json!({ "matchLabels": "app=foo" }),
        ] {
            let selector = Selector::from_unstructured(&spec);
            assert!(selector.selects_all(), "{spec}");
            assert!(selector.matches(&Labels::from_iter(Some(("app", "foo")))));
            assert_eq!(selector.to_string(), "");
        }
    }

    #[test]
    fn from_label_selector() {
        let selector = Selector::from(&LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "app".to_string(),
                operator: "In".to_string(),
                values: Some(vec!["foo".to_string(), "bar".to_string()]),
            }]),
        });
        assert_eq!(selector.to_string(), "app in (bar,foo)");
        assert!(selector.matches(&Labels::from_iter(Some(("app", "bar")))));
        assert!(Selector::from(&LabelSelector::default()).selects_all());
    }
}
