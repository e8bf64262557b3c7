use std::fmt;

use bson::Bson;

use crate::{
    error::{OdmError, OdmResult},
    query::{
        operator::FilterOperator,
        value::{IntoQueryValue, QueryValue},
    },
};

/// An unvalidated criterion, as written by the caller.
///
/// Paths use declared field names. Nothing is resolved until the owning
/// query is frozen.
#[derive(Debug, Clone)]
pub enum Criteria {
    Field {
        path: String,
        operator: FilterOperator,
        value: QueryValue,
        negated: bool,
        options: Option<String>,
    },
    /// Nested criteria applied to the elements of an array field, with paths
    /// relative to the element type.
    ElemMatch {
        path: String,
        criteria: Vec<Criteria>,
        negated: bool,
    },
    Text {
        search: String,
        language: Option<String>,
    },
    And(Vec<Criteria>),
    Or(Vec<Criteria>),
}

impl Criteria {
    /// Starts a detached criterion on `path`, for use in [`Criteria::and`]
    /// and [`Criteria::or`] groups.
    pub fn field(path: impl Into<String>) -> FieldEnd<Detached> {
        FieldEnd::new(Detached, path.into())
    }

    /// A detached criterion from a condition string such as `"total >="`.
    pub fn condition(condition: &str, value: impl IntoQueryValue) -> OdmResult<Criteria> {
        let (path, operator) = parse_condition(condition)?;
        Ok(Criteria::Field {
            path,
            operator,
            value: value.into_query_value(),
            negated: false,
            options: None,
        })
    }

    pub fn and(criteria: impl IntoIterator<Item = Criteria>) -> Criteria {
        Criteria::And(criteria.into_iter().collect())
    }

    pub fn or(criteria: impl IntoIterator<Item = Criteria>) -> Criteria {
        Criteria::Or(criteria.into_iter().collect())
    }
}

/// Splits `"path op"` into its path and operator. A bare path means equality.
pub(crate) fn parse_condition(condition: &str) -> OdmResult<(String, FilterOperator)> {
    let mut parts = condition.split_whitespace();
    let path = parts
        .next()
        .ok_or_else(|| OdmError::build("condition is empty"))?;
    let operator = match parts.next() {
        Some(token) => FilterOperator::from_condition(token)?,
        None => FilterOperator::Equal,
    };
    if let Some(extra) = parts.next() {
        return Err(OdmError::build(format!(
            "unexpected '{extra}' in condition '{condition}'"
        )));
    }
    Ok((path.to_string(), operator))
}

/// Receives the criterion produced by a [`FieldEnd`].
pub trait CriteriaSink {
    type Output;

    fn accept(self, criteria: Criteria) -> Self::Output;
}

/// Sink for criteria built outside a query.
#[derive(Debug, Clone, Copy)]
pub struct Detached;

impl CriteriaSink for Detached {
    type Output = Criteria;

    fn accept(self, criteria: Criteria) -> Criteria {
        criteria
    }
}

/// The operator half of a fluent criterion: `field("total").greater_than(100)`.
#[must_use]
pub struct FieldEnd<S: CriteriaSink> {
    sink: S,
    path: String,
    negated: bool,
}

impl<S: CriteriaSink> FieldEnd<S> {
    pub(crate) fn new(sink: S, path: String) -> Self {
        Self {
            sink,
            path,
            negated: false,
        }
    }

    /// Negates the operator that follows.
    pub fn not(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    fn finish(self, operator: FilterOperator, value: QueryValue, options: Option<String>) -> S::Output {
        let criteria = Criteria::Field {
            path: self.path,
            operator,
            value,
            negated: self.negated,
            options,
        };
        self.sink.accept(criteria)
    }

    fn op(self, operator: FilterOperator, value: impl IntoQueryValue) -> S::Output {
        self.finish(operator, value.into_query_value(), None)
    }

    pub fn equal(self, value: impl IntoQueryValue) -> S::Output {
        self.op(FilterOperator::Equal, value)
    }

    pub fn not_equal(self, value: impl IntoQueryValue) -> S::Output {
        self.op(FilterOperator::NotEqual, value)
    }

    pub fn greater_than(self, value: impl IntoQueryValue) -> S::Output {
        self.op(FilterOperator::GreaterThan, value)
    }

    pub fn greater_than_or_eq(self, value: impl IntoQueryValue) -> S::Output {
        self.op(FilterOperator::GreaterThanOrEqual, value)
    }

    pub fn less_than(self, value: impl IntoQueryValue) -> S::Output {
        self.op(FilterOperator::LessThan, value)
    }

    pub fn less_than_or_eq(self, value: impl IntoQueryValue) -> S::Output {
        self.op(FilterOperator::LessThanOrEqual, value)
    }

    /// The field equals any of `values`.
    pub fn has_any_of(self, values: impl IntoQueryValue) -> S::Output {
        self.op(FilterOperator::In, values)
    }

    pub fn has_none_of(self, values: impl IntoQueryValue) -> S::Output {
        self.op(FilterOperator::NotIn, values)
    }

    /// The array field contains every one of `values`.
    pub fn has_all_of(self, values: impl IntoQueryValue) -> S::Output {
        self.op(FilterOperator::All, values)
    }

    pub fn exists(self) -> S::Output {
        self.op(FilterOperator::Exists, true)
    }

    pub fn does_not_exist(self) -> S::Output {
        self.op(FilterOperator::Exists, false)
    }

    pub fn size_eq(self, size: i32) -> S::Output {
        self.op(FilterOperator::Size, size)
    }

    pub fn modulo(self, divisor: i64, remainder: i64) -> S::Output {
        self.op(FilterOperator::Mod, vec![divisor, remainder])
    }

    /// The stored value has the given BSON type alias, such as `"string"`.
    pub fn type_is(self, alias: &str) -> S::Output {
        self.op(FilterOperator::Type, alias)
    }

    pub fn starts_with(self, prefix: &str) -> S::Output {
        self.regex(format!("^{}", regex_lite::escape(prefix)), None)
    }

    pub fn ends_with(self, suffix: &str) -> S::Output {
        self.regex(format!("{}$", regex_lite::escape(suffix)), None)
    }

    pub fn contains(self, text: &str) -> S::Output {
        self.regex(regex_lite::escape(text), None)
    }

    pub fn contains_ignore_case(self, text: &str) -> S::Output {
        self.regex(regex_lite::escape(text), Some("i"))
    }

    pub fn regex(self, pattern: String, options: Option<&str>) -> S::Output {
        self.finish(
            FilterOperator::Regex,
            QueryValue::of(pattern),
            options.map(str::to_string),
        )
    }

    /// Applies `criteria` to the elements of an array field. Paths inside
    /// `criteria` are relative to the element type.
    pub fn elem_match(self, criteria: impl IntoIterator<Item = Criteria>) -> S::Output {
        let criteria = Criteria::ElemMatch {
            path: self.path,
            criteria: criteria.into_iter().collect(),
            negated: self.negated,
        };
        self.sink.accept(criteria)
    }
}

/// A validated criterion with a resolved storage path and an encoded value.
///
/// Leaves are only produced by freezing a query, after their path resolved
/// and their operator accepted the value.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    Leaf(Leaf),
    ElemMatch {
        path: String,
        children: Vec<Criterion>,
        negated: bool,
    },
    Text {
        search: String,
        language: Option<String>,
    },
    And(Vec<Criterion>),
    Or(Vec<Criterion>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    path: String,
    operator: FilterOperator,
    value: Bson,
    negated: bool,
    options: Option<String>,
}

impl Leaf {
    pub(crate) fn new(path: String, operator: FilterOperator, value: Bson, negated: bool, options: Option<String>) -> Self {
        Self {
            path,
            operator,
            value,
            negated,
            options,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    pub fn value(&self) -> &Bson {
        &self.value
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Regex options, for [`FilterOperator::Regex`] leaves.
    pub fn options(&self) -> Option<&str> {
        self.options.as_deref()
    }
}

/// Walks a frozen criteria tree.
pub trait CriteriaVisitor {
    type Output;

    fn visit_and(&mut self, children: &[Criterion]) -> OdmResult<Self::Output>;
    fn visit_or(&mut self, children: &[Criterion]) -> OdmResult<Self::Output>;
    fn visit_leaf(&mut self, leaf: &Leaf) -> OdmResult<Self::Output>;
    fn visit_elem_match(&mut self, path: &str, children: &[Criterion], negated: bool) -> OdmResult<Self::Output>;
    fn visit_text(&mut self, search: &str, language: Option<&str>) -> OdmResult<Self::Output>;

    fn visit(&mut self, criterion: &Criterion) -> OdmResult<Self::Output> {
        match criterion {
            Criterion::And(children) => self.visit_and(children),
            Criterion::Or(children) => self.visit_or(children),
            Criterion::Leaf(leaf) => self.visit_leaf(leaf),
            Criterion::ElemMatch {
                path,
                children,
                negated,
            } => self.visit_elem_match(path, children, *negated),
            Criterion::Text { search, language } => self.visit_text(search, language.as_deref()),
        }
    }
}

/// Renders a tree as `(a $gt 1 AND b $eq "x")` for logs and messages.
struct DisplayVisitor;

impl CriteriaVisitor for DisplayVisitor {
    type Output = String;

    fn visit_and(&mut self, children: &[Criterion]) -> OdmResult<String> {
        self.join(children, " AND ")
    }

    fn visit_or(&mut self, children: &[Criterion]) -> OdmResult<String> {
        self.join(children, " OR ")
    }

    fn visit_leaf(&mut self, leaf: &Leaf) -> OdmResult<String> {
        let not = if leaf.negated { "NOT " } else { "" };
        Ok(format!("{not}{} {} {}", leaf.path, leaf.operator, leaf.value))
    }

    fn visit_elem_match(&mut self, path: &str, children: &[Criterion], negated: bool) -> OdmResult<String> {
        let not = if negated { "NOT " } else { "" };
        Ok(format!("{not}{path} $elemMatch {}", self.join(children, " AND ")?))
    }

    fn visit_text(&mut self, search: &str, _language: Option<&str>) -> OdmResult<String> {
        Ok(format!("$text {search:?}"))
    }
}

impl DisplayVisitor {
    fn join(&mut self, children: &[Criterion], separator: &str) -> OdmResult<String> {
        let parts = children
            .iter()
            .map(|child| self.visit(child))
            .collect::<OdmResult<Vec<_>>>()?;
        Ok(format!("({})", parts.join(separator)))
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = DisplayVisitor.visit(self).map_err(|_| fmt::Error)?;
        f.write_str(&rendered)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::value::ValueDescriptor;

    #[test]
    fn test_condition_parsing() {
        assert_eq!(
            parse_condition("total >").unwrap(),
            ("total".to_string(), FilterOperator::GreaterThan)
        );
        assert_eq!(parse_condition("name").unwrap().1, FilterOperator::Equal);
        assert!(parse_condition("").unwrap_err().is_build());
        assert!(parse_condition("total > 5").unwrap_err().is_build());
        assert!(parse_condition("total ~").is_err());
    }

    #[test]
    fn test_fluent_ends_build_detached_criteria() {
        let criteria = Criteria::field("name").not().starts_with("A.b");
        match criteria {
            Criteria::Field {
                path,
                operator,
                negated,
                value,
                ..
            } => {
                assert_eq!(path, "name");
                assert_eq!(operator, FilterOperator::Regex);
                assert!(negated);
                assert!(matches!(value.descriptor(), ValueDescriptor::Scalar(scalar) if scalar.is::<String>()));
            }
            other => panic!("unexpected criteria {other:?}"),
        }

        let modulo = Criteria::field("total").modulo(4, 0);
        let Criteria::Field { value, .. } = modulo else {
            panic!("expected a field criterion");
        };
        assert_eq!(value.len(), Some(2));
    }

    #[test]
    fn test_display_renders_tree() {
        let tree = Criterion::Or(vec![
            Criterion::Leaf(Leaf::new("total".into(), FilterOperator::GreaterThan, Bson::Int32(5), false, None)),
            Criterion::Leaf(Leaf::new("status".into(), FilterOperator::Equal, Bson::from("open"), true, None)),
        ]);
        assert_eq!(tree.to_string(), "(total $gt 5 OR NOT status $eq \"open\")");
    }
}
