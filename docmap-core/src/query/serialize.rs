use std::collections::HashSet;

use bson::{Bson, Document, doc};

use crate::{
    error::OdmResult,
    query::{
        criteria::{CriteriaVisitor, Criterion, Leaf},
        operator::FilterOperator,
    },
};

const AND: &str = "$and";

/// Serializes sibling criteria into one filter document.
///
/// Siblings keep their insertion order. Constraints that land on the same
/// path are combined rather than overwritten: operator documents with
/// distinct operators are merged under the one key, anything else moves into
/// a single `$and` entry.
pub fn to_filter_document(criteria: &[Criterion]) -> OdmResult<Document> {
    let mut serializer = FilterSerializer;
    let mut merger = FilterMerger::default();
    for criterion in criteria {
        merger.merge(serializer.visit(criterion)?);
    }
    Ok(merger.finish())
}

/// Renders a criterion as a filter document.
pub struct FilterSerializer;

impl CriteriaVisitor for FilterSerializer {
    type Output = Document;

    fn visit_and(&mut self, children: &[Criterion]) -> OdmResult<Document> {
        Ok(doc! { AND: self.render_all(children)? })
    }

    fn visit_or(&mut self, children: &[Criterion]) -> OdmResult<Document> {
        Ok(doc! { "$or": self.render_all(children)? })
    }

    fn visit_leaf(&mut self, leaf: &Leaf) -> OdmResult<Document> {
        let value = leaf.value().clone();
        let condition = match (leaf.operator(), leaf.is_negated()) {
            (FilterOperator::Equal, false) | (FilterOperator::NotEqual, true) => value,
            (FilterOperator::Equal, true) => Bson::Document(doc! { "$ne": value }),
            (FilterOperator::In, true) => Bson::Document(doc! { "$nin": value }),
            (FilterOperator::NotIn, true) => Bson::Document(doc! { "$in": value }),
            (FilterOperator::Regex, negated) => {
                let mut regex = doc! { "$regex": value };
                if let Some(options) = leaf.options() {
                    regex.insert("$options", options);
                }
                if negated {
                    Bson::Document(doc! { "$not": regex })
                } else {
                    Bson::Document(regex)
                }
            }
            (operator, false) => Bson::Document(doc! { operator.as_str(): value }),
            (operator, true) => Bson::Document(doc! { "$not": { operator.as_str(): value } }),
        };
        Ok(doc! { leaf.path(): condition })
    }

    fn visit_elem_match(&mut self, path: &str, children: &[Criterion], negated: bool) -> OdmResult<Document> {
        let nested = to_filter_document(children)?;
        let elem_match = doc! { "$elemMatch": nested };
        Ok(if negated {
            doc! { path: { "$not": elem_match } }
        } else {
            doc! { path: elem_match }
        })
    }

    fn visit_text(&mut self, search: &str, language: Option<&str>) -> OdmResult<Document> {
        let mut text = doc! { "$search": search };
        if let Some(language) = language {
            text.insert("$language", language);
        }
        Ok(doc! { "$text": text })
    }
}

impl FilterSerializer {
    fn render_all(&mut self, children: &[Criterion]) -> OdmResult<Vec<Bson>> {
        children
            .iter()
            .map(|child| self.visit(child).map(Bson::Document))
            .collect()
    }
}

#[derive(Default)]
struct FilterMerger {
    document: Document,
    /// Keys whose constraints were moved into the `$and` entry.
    moved: HashSet<String>,
}

impl FilterMerger {
    fn merge(&mut self, addition: Document) {
        for (key, value) in addition {
            self.merge_entry(key, value);
        }
    }

    fn merge_entry(&mut self, key: String, value: Bson) {
        if key == AND {
            if let Bson::Array(clauses) = value {
                for clause in clauses {
                    self.push_and(clause);
                }
            }
            return;
        }
        if self.moved.contains(&key) {
            self.push_and(Bson::Document(doc! { key: value }));
            return;
        }

        let mergeable = match (self.document.get(&key), &value) {
            (None, _) => {
                self.document.insert(key, value);
                return;
            }
            (Some(Bson::Document(existing)), Bson::Document(added)) => {
                is_operator_document(existing)
                    && is_operator_document(added)
                    && added.keys().all(|operator| !existing.contains_key(operator))
            }
            (Some(_), _) => false,
        };

        if mergeable {
            if let (Some(Bson::Document(existing)), Bson::Document(added)) = (self.document.get_mut(&key), value) {
                for (operator, operand) in added {
                    existing.insert(operator, operand);
                }
            }
            return;
        }

        if let Some(previous) = self.document.remove(&key) {
            self.push_and(Bson::Document(doc! { key.clone(): previous }));
        }
        self.push_and(Bson::Document(doc! { key.clone(): value }));
        self.moved.insert(key);
    }

    fn push_and(&mut self, clause: Bson) {
        match self.document.get_mut(AND) {
            Some(Bson::Array(clauses)) => clauses.push(clause),
            _ => {
                self.document.insert(AND, vec![clause]);
            }
        }
    }

    fn finish(self) -> Document {
        self.document
    }
}

fn is_operator_document(document: &Document) -> bool {
    !document.is_empty() && document.keys().all(|key| key.starts_with('$'))
}
