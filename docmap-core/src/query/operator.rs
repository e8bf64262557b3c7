use std::fmt;

use crate::error::{OdmError, OdmResult};

/// Field comparison operators understood by the criteria engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    /// The field equals one of several candidates.
    In,
    NotIn,
    /// An array field contains every candidate.
    All,
    Exists,
    /// An array field has exactly this many elements.
    Size,
    /// `[divisor, remainder]`.
    Mod,
    /// Some element of an array field matches a nested filter.
    ElemMatch,
    /// The stored value has this BSON type.
    Type,
    Regex,
}

impl FilterOperator {
    /// The filter-document key of this operator.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "$eq",
            Self::NotEqual => "$ne",
            Self::GreaterThan => "$gt",
            Self::GreaterThanOrEqual => "$gte",
            Self::LessThan => "$lt",
            Self::LessThanOrEqual => "$lte",
            Self::In => "$in",
            Self::NotIn => "$nin",
            Self::All => "$all",
            Self::Exists => "$exists",
            Self::Size => "$size",
            Self::Mod => "$mod",
            Self::ElemMatch => "$elemMatch",
            Self::Type => "$type",
            Self::Regex => "$regex",
        }
    }

    /// Parses the operator token of a condition string such as `"total >="`.
    pub fn from_condition(token: &str) -> OdmResult<Self> {
        Ok(match token.to_ascii_lowercase().as_str() {
            "=" | "==" => Self::Equal,
            "!=" | "<>" => Self::NotEqual,
            ">" => Self::GreaterThan,
            ">=" => Self::GreaterThanOrEqual,
            "<" => Self::LessThan,
            "<=" => Self::LessThanOrEqual,
            "in" => Self::In,
            "nin" => Self::NotIn,
            "all" => Self::All,
            "exists" => Self::Exists,
            "size" => Self::Size,
            "mod" => Self::Mod,
            "elem" => Self::ElemMatch,
            "type" => Self::Type,
            other => return Err(OdmError::build(format!("unknown condition operator '{other}'"))),
        })
    }

    /// Operators compared against a single value of the field's type.
    pub fn is_equality_family(self) -> bool {
        matches!(
            self,
            Self::Equal
                | Self::NotEqual
                | Self::GreaterThan
                | Self::GreaterThanOrEqual
                | Self::LessThan
                | Self::LessThanOrEqual
        )
    }

    /// Operators whose value lists several candidates.
    pub fn takes_candidates(self) -> bool {
        matches!(self, Self::In | Self::NotIn | Self::All)
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Asc => 1,
            Self::Desc => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_condition_tokens() {
        assert_eq!(FilterOperator::from_condition("==").unwrap(), FilterOperator::Equal);
        assert_eq!(FilterOperator::from_condition("<>").unwrap(), FilterOperator::NotEqual);
        assert_eq!(FilterOperator::from_condition("IN").unwrap(), FilterOperator::In);
        assert_eq!(FilterOperator::from_condition("elem").unwrap(), FilterOperator::ElemMatch);
        assert!(FilterOperator::from_condition("~").unwrap_err().is_build());
    }

    #[test]
    fn test_display_uses_document_key() {
        assert_eq!(FilterOperator::GreaterThanOrEqual.to_string(), "$gte");
        assert_eq!(FilterOperator::ElemMatch.to_string(), "$elemMatch");
    }
}
