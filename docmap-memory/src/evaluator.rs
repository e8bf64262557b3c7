//! Filter document evaluation for in-memory document filtering.
//!
//! Filters are the documents produced by frozen queries: a conjunction of
//! field conditions and the logical operators `$and`, `$or`, `$nor` and
//! `$text`. Field paths are dotted and traverse embedded documents and
//! arrays; a condition on an array field matches when the array itself or
//! any of its elements satisfies it.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};
use docmap_core::{
    codec::decimal::decimal_from_bson,
    error::{OdmError, OdmResult},
};
use regex_lite::{Regex, RegexBuilder};
use rust_decimal::{Decimal, prelude::ToPrimitive};

/// Comparable representation of BSON values.
///
/// Numbers of every BSON width compare by value: integers and decimals
/// exactly, doubles that have no decimal form as floats.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(Decimal),
    Float(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(_) | Bson::Int64(_) | Bson::Decimal128(_) => match decimal_from_bson(bson) {
                Ok(number) => Comparable::Number(number),
                Err(_) => Comparable::Float(f64::NAN),
            },
            Bson::Double(value) => match Decimal::try_from(*value) {
                Ok(number) => Comparable::Number(number),
                Err(_) => Comparable::Float(*value),
            },
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(items) => Comparable::Array(items.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(key, value)| (key.as_str(), Comparable::from(value)))
                    .collect(),
            ),
            other => Comparable::Other(other),
        }
    }
}

impl Comparable<'_> {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Comparable::Number(number) => number.to_f64(),
            Comparable::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Position of the value's type in the cross-type sort order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 1,
            Comparable::Number(_) | Comparable::Float(_) => 2,
            Comparable::String(_) => 3,
            Comparable::Map(_) => 4,
            Comparable::Array(_) => 5,
            Comparable::Other(_) => 6,
            Comparable::ObjectId(_) => 7,
            Comparable::Bool(_) => 8,
            Comparable::DateTime(_) => 9,
        }
    }

    /// Total order used for sorting; values of different types order by type.
    pub(crate) fn sort_cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::Float(_), _) | (_, Comparable::Float(_)) => {
                matches!((self.as_f64(), other.as_f64()), (Some(a), Some(b)) if a == b)
            }
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::Float(_), _) | (_, Comparable::Float(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Evaluates one filter document against stored documents.
pub(crate) struct FilterEvaluator<'f> {
    filter: &'f Document,
}

impl<'f> FilterEvaluator<'f> {
    pub fn new(filter: &'f Document) -> Self {
        Self { filter }
    }

    pub fn matches(&self, document: &Document) -> OdmResult<bool> {
        matches_filter(document, self.filter)
    }

    /// Indices of the matching documents, in storage order.
    pub fn select(&self, documents: &[Document]) -> OdmResult<Vec<usize>> {
        let mut selected = Vec::new();
        for (index, document) in documents.iter().enumerate() {
            if self.matches(document)? {
                selected.push(index);
            }
        }
        Ok(selected)
    }
}

fn matches_filter(document: &Document, filter: &Document) -> OdmResult<bool> {
    for (key, condition) in filter {
        let matched = if key.starts_with('$') {
            matches_logical(document, key, condition)?
        } else {
            matches_field(document, key, condition)?
        };
        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn matches_logical(document: &Document, operator: &str, operand: &Bson) -> OdmResult<bool> {
    match operator {
        "$and" => {
            for clause in clauses(operator, operand)? {
                if !matches_filter(document, clause)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        "$or" => {
            for clause in clauses(operator, operand)? {
                if matches_filter(document, clause)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        "$nor" => {
            for clause in clauses(operator, operand)? {
                if matches_filter(document, clause)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        "$text" => matches_text(document, operand),
        other => Err(OdmError::driver(format!("unsupported top-level operator {other}"))),
    }
}

fn clauses<'b>(operator: &str, operand: &'b Bson) -> OdmResult<Vec<&'b Document>> {
    match operand {
        Bson::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| match item {
                Bson::Document(clause) => Ok(clause),
                other => Err(OdmError::driver(format!("{operator} clause must be a document, got {other}"))),
            })
            .collect(),
        _ => Err(OdmError::driver(format!("{operator} requires a non-empty array of documents"))),
    }
}

/// Case-insensitive word search over every string in the document.
fn matches_text(document: &Document, operand: &Bson) -> OdmResult<bool> {
    let search = match operand {
        Bson::Document(spec) => spec.get_str("$search").map_err(|err| OdmError::driver(err.to_string()))?,
        other => return Err(OdmError::driver(format!("$text requires a document, got {other}"))),
    };
    let terms: Vec<String> = search.split_whitespace().map(str::to_lowercase).collect();
    if terms.is_empty() {
        return Ok(false);
    }

    let mut words = Vec::new();
    collect_words(&Bson::Document(document.clone()), &mut words);
    Ok(terms.iter().any(|term| words.contains(term)))
}

fn collect_words(value: &Bson, words: &mut Vec<String>) {
    match value {
        Bson::String(text) => words.extend(
            text.split(|c: char| !c.is_alphanumeric())
                .filter(|word| !word.is_empty())
                .map(str::to_lowercase),
        ),
        Bson::Array(items) => items.iter().for_each(|item| collect_words(item, words)),
        Bson::Document(doc) => doc.values().for_each(|item| collect_words(item, words)),
        _ => {}
    }
}

fn matches_field(document: &Document, path: &str, condition: &Bson) -> OdmResult<bool> {
    let values = resolve(document, path);
    match condition {
        Bson::Document(operators) if is_operator_document(operators) => matches_operators(&values, operators),
        _ => matches_equal(&values, condition),
    }
}

fn is_operator_document(document: &Document) -> bool {
    !document.is_empty() && document.keys().all(|key| key.starts_with('$'))
}

/// Every value reachable through `path`, descending into arrays.
pub(crate) fn resolve<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut values = Vec::new();
    collect_in_document(document, &segments, &mut values);
    values
}

fn collect_in_document<'a>(document: &'a Document, segments: &[&str], out: &mut Vec<&'a Bson>) {
    if let Some((first, rest)) = segments.split_first() {
        if let Some(value) = document.get(*first) {
            collect_in_value(value, rest, out);
        }
    }
}

fn collect_in_value<'a>(value: &'a Bson, segments: &[&str], out: &mut Vec<&'a Bson>) {
    let Some(first) = segments.first() else {
        out.push(value);
        return;
    };

    match value {
        Bson::Document(document) => collect_in_document(document, segments, out),
        Bson::Array(items) => {
            if let Some(item) = first.parse::<usize>().ok().and_then(|index| items.get(index)) {
                collect_in_value(item, &segments[1..], out);
            }
            for item in items {
                if let Bson::Document(document) = item {
                    collect_in_document(document, segments, out);
                }
            }
        }
        _ => {}
    }
}

/// The resolved values plus the elements of any resolved array.
fn expand<'a>(values: &[&'a Bson]) -> Vec<&'a Bson> {
    let mut expanded = Vec::with_capacity(values.len());
    for value in values {
        expanded.push(*value);
        if let Bson::Array(items) = value {
            expanded.extend(items.iter());
        }
    }
    expanded
}

fn matches_equal(values: &[&Bson], operand: &Bson) -> OdmResult<bool> {
    match operand {
        Bson::Null => Ok(values.is_empty() || expand(values).iter().any(|value| matches!(value, Bson::Null))),
        Bson::RegularExpression(regex) => {
            let regex = compile(regex.pattern.as_str(), regex.options.as_str())?;
            Ok(matches_regex(values, &regex))
        }
        _ => {
            let operand = Comparable::from(operand);
            Ok(expand(values).into_iter().any(|value| Comparable::from(value) == operand))
        }
    }
}

fn matches_operators(values: &[&Bson], operators: &Document) -> OdmResult<bool> {
    for (operator, operand) in operators {
        let matched = match operator.as_str() {
            "$eq" => matches_equal(values, operand)?,
            "$ne" => !matches_equal(values, operand)?,
            "$gt" => matches_ordering(values, operand, |ordering| ordering == Ordering::Greater),
            "$gte" => matches_ordering(values, operand, |ordering| ordering != Ordering::Less),
            "$lt" => matches_ordering(values, operand, |ordering| ordering == Ordering::Less),
            "$lte" => matches_ordering(values, operand, |ordering| ordering != Ordering::Greater),
            "$in" => matches_any(values, candidates(operator, operand)?)?,
            "$nin" => !matches_any(values, candidates(operator, operand)?)?,
            "$all" => {
                let required = candidates(operator, operand)?;
                let mut all = !required.is_empty();
                for candidate in required {
                    all = all && matches_equal(values, candidate)?;
                }
                all
            }
            "$exists" => truthy(operand) != values.is_empty(),
            "$size" => {
                let size = integer(operator, operand)?;
                values
                    .iter()
                    .any(|value| matches!(value, Bson::Array(items) if items.len() as i64 == size))
            }
            "$mod" => matches_modulo(values, operand)?,
            "$regex" => {
                let regex = regex_operand(operand, operators.get("$options"))?;
                matches_regex(values, &regex)
            }
            "$options" if operators.contains_key("$regex") => true,
            "$not" => match operand {
                Bson::Document(inner) if is_operator_document(inner) => !matches_operators(values, inner)?,
                Bson::RegularExpression(regex) => {
                    !matches_regex(values, &compile(regex.pattern.as_str(), regex.options.as_str())?)
                }
                other => return Err(OdmError::driver(format!("$not requires an operator document, got {other}"))),
            },
            "$elemMatch" => matches_element(values, operand)?,
            "$type" => matches_type(values, operand)?,
            other => return Err(OdmError::driver(format!("unsupported filter operator {other}"))),
        };
        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn matches_ordering(values: &[&Bson], operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let operand = Comparable::from(operand);
    expand(values)
        .into_iter()
        .filter_map(|value| Comparable::from(value).partial_cmp(&operand))
        .any(accept)
}

fn matches_any(values: &[&Bson], candidates: &[Bson]) -> OdmResult<bool> {
    for candidate in candidates {
        if matches_equal(values, candidate)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn candidates<'b>(operator: &str, operand: &'b Bson) -> OdmResult<&'b [Bson]> {
    match operand {
        Bson::Array(items) => Ok(items),
        other => Err(OdmError::driver(format!("{operator} requires an array, got {other}"))),
    }
}

fn integer(operator: &str, operand: &Bson) -> OdmResult<i64> {
    match operand {
        Bson::Int32(value) => Ok(i64::from(*value)),
        Bson::Int64(value) => Ok(*value),
        Bson::Double(value) if value.fract() == 0.0 => Ok(*value as i64),
        other => Err(OdmError::driver(format!("{operator} requires an integer, got {other}"))),
    }
}

fn truthy(operand: &Bson) -> bool {
    match operand {
        Bson::Boolean(value) => *value,
        Bson::Int32(value) => *value != 0,
        Bson::Int64(value) => *value != 0,
        Bson::Double(value) => *value != 0.0,
        Bson::Null | Bson::Undefined => false,
        _ => true,
    }
}

fn matches_modulo(values: &[&Bson], operand: &Bson) -> OdmResult<bool> {
    let (divisor, remainder) = match operand {
        Bson::Array(pair) if pair.len() == 2 => (integer("$mod", &pair[0])?, integer("$mod", &pair[1])?),
        other => return Err(OdmError::driver(format!("$mod requires [divisor, remainder], got {other}"))),
    };
    if divisor == 0 {
        return Err(OdmError::driver("$mod divisor cannot be zero"));
    }

    Ok(expand(values).into_iter().any(|value| {
        let number = match value {
            Bson::Int32(number) => i64::from(*number),
            Bson::Int64(number) => *number,
            Bson::Double(number) if number.is_finite() => number.trunc() as i64,
            _ => return false,
        };
        // i64::MIN % -1 overflows; every integer is divisible by -1.
        number.checked_rem(divisor).unwrap_or(0) == remainder
    }))
}

fn regex_operand(operand: &Bson, options: Option<&Bson>) -> OdmResult<Regex> {
    let options = match options {
        Some(Bson::String(options)) => options.as_str(),
        Some(other) => return Err(OdmError::driver(format!("$options must be a string, got {other}"))),
        None => "",
    };
    match operand {
        Bson::String(pattern) => compile(pattern, options),
        Bson::RegularExpression(regex) => compile(regex.pattern.as_str(), &format!("{}{options}", regex.options.as_str())),
        other => Err(OdmError::driver(format!("$regex requires a pattern, got {other}"))),
    }
}

fn compile(pattern: &str, options: &str) -> OdmResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|err| OdmError::driver(format!("invalid regex /{pattern}/: {err}")))
}

fn matches_regex(values: &[&Bson], regex: &Regex) -> bool {
    expand(values)
        .into_iter()
        .any(|value| matches!(value, Bson::String(text) if regex.is_match(text)))
}

fn matches_element(values: &[&Bson], operand: &Bson) -> OdmResult<bool> {
    let filter = match operand {
        Bson::Document(filter) => filter,
        other => return Err(OdmError::driver(format!("$elemMatch requires a document, got {other}"))),
    };

    for value in values {
        let Bson::Array(items) = value else {
            continue;
        };
        for item in items {
            let matched = if is_operator_document(filter) {
                matches_operators(&[item], filter)?
            } else {
                match item {
                    Bson::Document(element) => matches_filter(element, filter)?,
                    _ => false,
                }
            };
            if matched {
                return Ok(true);
            }
        }
    }

    Ok(false)
}

fn matches_type(values: &[&Bson], operand: &Bson) -> OdmResult<bool> {
    let aliases: Vec<&Bson> = match operand {
        Bson::Array(items) => items.iter().collect(),
        single => vec![single],
    };

    for alias in aliases {
        let alias = type_alias(alias)?;
        if values.iter().any(|value| has_type(value, alias))
            || expand(values).into_iter().any(|value| has_type(value, alias) && alias != "array")
        {
            return Ok(true);
        }
    }
    Ok(false)
}

fn type_alias(alias: &Bson) -> OdmResult<&str> {
    let code = match alias {
        Bson::String(name) => return Ok(name.as_str()),
        other => integer("$type", other)?,
    };
    Ok(match code {
        1 => "double",
        2 => "string",
        3 => "object",
        4 => "array",
        5 => "binData",
        7 => "objectId",
        8 => "bool",
        9 => "date",
        10 => "null",
        11 => "regex",
        16 => "int",
        17 => "timestamp",
        18 => "long",
        19 => "decimal",
        other => return Err(OdmError::driver(format!("unknown $type code {other}"))),
    })
}

fn has_type(value: &Bson, alias: &str) -> bool {
    match alias {
        "double" => matches!(value, Bson::Double(_)),
        "string" => matches!(value, Bson::String(_)),
        "object" => matches!(value, Bson::Document(_)),
        "array" => matches!(value, Bson::Array(_)),
        "binData" => matches!(value, Bson::Binary(_)),
        "objectId" => matches!(value, Bson::ObjectId(_)),
        "bool" => matches!(value, Bson::Boolean(_)),
        "date" => matches!(value, Bson::DateTime(_)),
        "null" => matches!(value, Bson::Null),
        "regex" => matches!(value, Bson::RegularExpression(_)),
        "int" => matches!(value, Bson::Int32(_)),
        "timestamp" => matches!(value, Bson::Timestamp(_)),
        "long" => matches!(value, Bson::Int64(_)),
        "decimal" => matches!(value, Bson::Decimal128(_)),
        "number" => matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)),
        _ => false,
    }
}
