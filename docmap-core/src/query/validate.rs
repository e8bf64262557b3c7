//! Operator and value compatibility rules.

use std::sync::Arc;

use bson::Bson;

use crate::{
    error::ValidationFailure,
    metadata::{FieldKind, MappedType, MetadataRegistry},
    path::{PathResolver, ResolvedPath},
    query::{operator::FilterOperator, value::QueryValue},
    value::{ScalarFamily, ValueDescriptor, short_type_name},
};

/// Whether `operator` may compare `value` against a field of `field` kind.
pub fn is_compatible(metadata: &MetadataRegistry, operator: FilterOperator, value: &QueryValue, field: &FieldKind) -> bool {
    check(metadata, operator, value, field).is_ok()
}

/// Resolves `path` against `root` and checks the operator and value against
/// the resolved field. Every problem found is returned, not only the first.
pub fn validate_criterion(
    metadata: &MetadataRegistry,
    root: &Arc<MappedType>,
    path: &str,
    operator: FilterOperator,
    value: &QueryValue,
) -> Result<ResolvedPath, Vec<ValidationFailure>> {
    let resolved = PathResolver::new(metadata)
        .resolve(root, path)
        .map_err(|err| vec![ValidationFailure::new(path, Some(operator), err.to_string())])?;

    let mut failures = Vec::new();
    if let Some(kind) = resolved.kind() {
        if let Err(message) = check(metadata, operator, value, kind) {
            failures.push(ValidationFailure::new(path, Some(operator), message));
        }
    }
    if failures.is_empty() { Ok(resolved) } else { Err(failures) }
}

pub(crate) fn check(metadata: &MetadataRegistry, operator: FilterOperator, value: &QueryValue, field: &FieldKind) -> Result<(), String> {
    let (descriptor, _) = value.descriptor().unwrap_optional();
    let dynamic_field = is_dynamic_kind(field);
    match operator {
        FilterOperator::Exists => {
            if is_bool(descriptor, value.as_bson()) {
                Ok(())
            } else {
                Err(format!("$exists requires a boolean value, got {}", describe(descriptor)))
            }
        }
        FilterOperator::Size => {
            if !is_integer(descriptor, value.as_bson()) {
                return Err(format!("$size requires an integer value, got {}", describe(descriptor)));
            }
            if !field.is_collection() && !dynamic_field {
                return Err(format!("field of type {} is not a collection", field.describe()));
            }
            Ok(())
        }
        FilterOperator::Mod => {
            if value.len() == Some(0) {
                return Err("$mod requires [divisor, remainder]; the array is empty".to_string());
            }
            let pair = value.len() == Some(2) && is_integer_list(descriptor, value.as_bson());
            if !pair {
                return Err(format!(
                    "$mod requires a two-element integer array, got {}",
                    describe(descriptor)
                ));
            }
            if !dynamic_field && !is_numeric_kind(field.element()) {
                return Err(format!("field of type {} is not numeric", field.describe()));
            }
            Ok(())
        }
        FilterOperator::In | FilterOperator::NotIn | FilterOperator::All => {
            let element = match (descriptor, value.as_bson()) {
                (_, Some(Bson::Array(_) | Bson::Document(_))) => return Ok(()),
                (ValueDescriptor::Collection(element) | ValueDescriptor::Map(element), _) => element,
                _ => {
                    return Err(format!(
                        "{operator} requires several candidate values, not a single {}",
                        describe(descriptor)
                    ));
                }
            };
            let (element, _) = element.unwrap_optional();
            compare(metadata, element, field)
        }
        FilterOperator::Type => {
            if is_integer(descriptor, value.as_bson()) || is_text(descriptor, value.as_bson()) {
                Ok(())
            } else {
                Err("$type requires a type alias or a numeric type code".to_string())
            }
        }
        FilterOperator::Regex => {
            if !is_text(descriptor, value.as_bson()) {
                return Err("$regex requires a pattern string".to_string());
            }
            if dynamic_field || is_text_kind(field.element()) {
                Ok(())
            } else {
                Err(format!("field of type {} does not hold text", field.describe()))
            }
        }
        FilterOperator::ElemMatch => {
            if !field.is_collection() && !dynamic_field {
                return Err(format!("field of type {} is not a collection", field.describe()));
            }
            match (descriptor, value.as_bson()) {
                (_, Some(Bson::Document(_))) | (ValueDescriptor::Embedded(_), _) => Ok(()),
                _ => Err("$elemMatch requires a document".to_string()),
            }
        }
        FilterOperator::Equal
        | FilterOperator::NotEqual
        | FilterOperator::GreaterThan
        | FilterOperator::GreaterThanOrEqual
        | FilterOperator::LessThan
        | FilterOperator::LessThanOrEqual => {
            if matches!(value.as_bson(), Some(Bson::Null)) {
                return Ok(());
            }
            compare(metadata, descriptor, field)
        }
    }
}

/// Whether a single value of `value`'s type can be compared with a field.
fn compare(metadata: &MetadataRegistry, value: &ValueDescriptor, field: &FieldKind) -> Result<(), String> {
    if is_dynamic_kind(field) || is_dynamic_value(value) {
        return Ok(());
    }
    let mismatch = || {
        format!(
            "a {} value cannot be compared with a field of type {}",
            describe(value),
            field.describe()
        )
    };
    match (value, field) {
        (ValueDescriptor::Optional(inner), _) => compare(metadata, inner, field),
        (ValueDescriptor::Scalar(value_type), FieldKind::Scalar(field_type)) => {
            let same_family = value_type.family() == field_type.family()
                && !matches!(value_type.family(), ScalarFamily::Enum | ScalarFamily::Other);
            let numeric = value_type.family().is_numeric() && field_type.family().is_numeric();
            if value_type == field_type || same_family || numeric {
                Ok(())
            } else {
                Err(mismatch())
            }
        }
        // An array field matches a single element or a whole array.
        (ValueDescriptor::Collection(element), FieldKind::Collection(field_element)) => {
            compare(metadata, element.unwrap_optional().0, field_element)
        }
        (_, FieldKind::Collection(field_element)) => compare(metadata, value, field_element),
        (ValueDescriptor::Map(element), FieldKind::Map(field_element)) => {
            compare(metadata, element.unwrap_optional().0, field_element)
        }
        (ValueDescriptor::Embedded(value_type), FieldKind::Embedded(field_type)) => {
            if value_type == field_type {
                return Ok(());
            }
            let declared = metadata.describe_key(field_type).map_err(|err| err.to_string())?;
            if declared.subtypes().contains(value_type) {
                Ok(())
            } else {
                Err(mismatch())
            }
        }
        (
            ValueDescriptor::Key(value_type) | ValueDescriptor::Reference(value_type),
            FieldKind::Reference(field_type) | FieldKind::Key(field_type),
        ) => {
            if value_type != field_type {
                return Err(mismatch());
            }
            let target = metadata.describe_key(field_type).map_err(|err| err.to_string())?;
            if target.id_field().is_none() {
                return Err(format!("{} declares no identifier to compare keys against", target.name()));
            }
            Ok(())
        }
        _ => Err(mismatch()),
    }
}

fn describe(descriptor: &ValueDescriptor) -> String {
    short_type_name(&descriptor.describe())
}

fn is_dynamic_kind(kind: &FieldKind) -> bool {
    matches!(kind, FieldKind::Scalar(scalar) if scalar.family() == ScalarFamily::Dynamic)
}

fn is_dynamic_value(descriptor: &ValueDescriptor) -> bool {
    matches!(descriptor, ValueDescriptor::Scalar(scalar) if scalar.family() == ScalarFamily::Dynamic)
}

fn is_numeric_kind(kind: &FieldKind) -> bool {
    matches!(kind, FieldKind::Scalar(scalar) if scalar.family().is_numeric())
}

fn is_text_kind(kind: &FieldKind) -> bool {
    matches!(kind, FieldKind::Scalar(scalar) if scalar.family() == ScalarFamily::Text)
}

fn scalar_family(descriptor: &ValueDescriptor) -> Option<ScalarFamily> {
    match descriptor {
        ValueDescriptor::Scalar(scalar) => Some(scalar.family()),
        _ => None,
    }
}

fn is_bool(descriptor: &ValueDescriptor, raw: Option<&Bson>) -> bool {
    match raw {
        Some(raw) => matches!(raw, Bson::Boolean(_)),
        None => scalar_family(descriptor) == Some(ScalarFamily::Bool),
    }
}

fn is_integer(descriptor: &ValueDescriptor, raw: Option<&Bson>) -> bool {
    match raw {
        Some(raw) => matches!(raw, Bson::Int32(_) | Bson::Int64(_)),
        None => scalar_family(descriptor) == Some(ScalarFamily::Integer),
    }
}

fn is_text(descriptor: &ValueDescriptor, raw: Option<&Bson>) -> bool {
    match raw {
        Some(raw) => matches!(raw, Bson::String(_)),
        None => scalar_family(descriptor) == Some(ScalarFamily::Text),
    }
}

fn is_integer_list(descriptor: &ValueDescriptor, raw: Option<&Bson>) -> bool {
    match (raw, descriptor) {
        (Some(Bson::Array(items)), _) => items.iter().all(|item| matches!(item, Bson::Int32(_) | Bson::Int64(_))),
        (None, ValueDescriptor::Collection(element)) => is_integer(element.unwrap_optional().0, None),
        _ => false,
    }
}
