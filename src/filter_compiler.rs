use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::{attributes::AttributeType, filter_values::NotionFilter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyPredicate {
    Select { equals: String },
    MultiSelect { contains: String },
    Status { equals: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyCondition {
    pub property: String,
    #[serde(flatten)]
    pub predicate: PropertyPredicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FilterCondition {
    Property(PropertyCondition),
    Or { or: Vec<FilterCondition> },
    And { and: Vec<FilterCondition> },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error(
        "filter for attribute {attribute_id} has {values} values but {names} names"
    )]
    MisalignedValues {
        attribute_id: String,
        values: usize,
        names: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFilter {
    pub attribute_id: String,
    pub reason: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompiledFilter {
    pub condition: Option<FilterCondition>,
    pub skipped: Vec<SkippedFilter>,
}

fn predicate_for(attribute_type: &AttributeType, value: &str) -> PropertyPredicate {
    let value = value.to_string();
    match attribute_type {
        AttributeType::MultiSelect => PropertyPredicate::MultiSelect { contains: value },
        AttributeType::Status => PropertyPredicate::Status { equals: value },
        _ => PropertyPredicate::Select { equals: value },
    }
}

fn condition_for(filter: &NotionFilter) -> FilterCondition {
    let mut conditions: Vec<FilterCondition> = filter
        .selected_values
        .iter()
        .map(|value| {
            FilterCondition::Property(PropertyCondition {
                property: filter.attribute_name.clone(),
                predicate: predicate_for(&filter.attribute_type, value),
            })
        })
        .collect();

    if conditions.len() == 1 {
        conditions.remove(0)
    } else {
        FilterCondition::Or { or: conditions }
    }
}

// Values of one attribute are OR-ed, attributes are AND-ed. A single
// condition is never wrapped.
pub fn compile(filters: &[NotionFilter]) -> Result<CompiledFilter, CompileError> {
    let mut compiled = CompiledFilter::default();
    let mut conditions = Vec::new();

    for filter in filters {
        if filter.selected_values.len() != filter.selected_names.len() {
            return Err(CompileError::MisalignedValues {
                attribute_id: filter.attribute_id.clone(),
                values: filter.selected_values.len(),
                names: filter.selected_names.len(),
            });
        }

        let reason = if filter.attribute_name.trim().is_empty() {
            Some("missing attribute name")
        } else if filter.selected_values.is_empty() {
            Some("no selected values")
        } else {
            None
        };

        if let Some(reason) = reason {
            compiled.skipped.push(SkippedFilter {
                attribute_id: filter.attribute_id.clone(),
                reason,
            });
            continue;
        }

        conditions.push(condition_for(filter));
    }

    compiled.condition = match conditions.len() {
        0 => None,
        1 => conditions.pop(),
        _ => Some(FilterCondition::And { and: conditions }),
    };
    Ok(compiled)
}

pub fn compile_logged(
    filters: &[NotionFilter],
) -> Result<Option<FilterCondition>, CompileError> {
    let compiled = compile(filters)?;
    for skipped in &compiled.skipped {
        warn!(
            attribute_id = %skipped.attribute_id,
            reason = skipped.reason,
            "Skipping malformed filter entry"
        );
    }
    Ok(compiled.condition)
}
