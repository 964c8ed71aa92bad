use serde::{Deserialize, Serialize};

use crate::selection::{DataAttribute, SelectionStore};

pub const NO_FILTERS_SUMMARY: &str = "No filters";
pub const ALL_ATTRIBUTES_SUMMARY: &str = "All attributes";
pub const DEFAULT_THREAD_TITLE: &str = "New chat";

pub fn has_selection(selection: &SelectionStore) -> bool {
    !selection.selected_database_id().is_empty()
}

pub fn has_filters(selection: &SelectionStore) -> bool {
    !selection.filters().is_empty()
}

pub fn has_data_selection(selection: &SelectionStore) -> bool {
    selection.data_attributes().iter().any(|a| a.selected)
}

pub fn selected_data_attributes(selection: &SelectionStore) -> Vec<&DataAttribute> {
    selection
        .data_attributes()
        .iter()
        .filter(|a| a.selected)
        .collect()
}

pub fn filter_summary(selection: &SelectionStore) -> String {
    if !has_filters(selection) {
        return NO_FILTERS_SUMMARY.to_string();
    }

    selection
        .filters()
        .iter()
        .map(|f| format!("{}: {}", f.attribute_name, f.selected_names.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn data_attributes_summary(selection: &SelectionStore) -> String {
    let selected = selected_data_attributes(selection);
    if selected.is_empty() {
        return ALL_ATTRIBUTES_SUMMARY.to_string();
    }

    selected
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn thread_title(selection: &SelectionStore) -> String {
    let mut parts = Vec::new();
    if has_selection(selection) {
        parts.push("DB".to_string());
    }
    if has_filters(selection) {
        parts.push(format!("Filters({})", selection.filters().len()));
    }
    if has_data_selection(selection) {
        parts.push(format!(
            "Data({})",
            selected_data_attributes(selection).len()
        ));
    }

    if parts.is_empty() {
        DEFAULT_THREAD_TITLE.to_string()
    } else {
        parts.join(" | ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionSummary {
    pub has_selection: bool,
    pub has_filters: bool,
    pub has_data_selection: bool,
    pub filter_summary: String,
    pub data_attributes_summary: String,
    pub thread_title: String,
}

impl SelectionSummary {
    pub fn project(selection: &SelectionStore) -> Self {
        Self {
            has_selection: has_selection(selection),
            has_filters: has_filters(selection),
            has_data_selection: has_data_selection(selection),
            filter_summary: filter_summary(selection),
            data_attributes_summary: data_attributes_summary(selection),
            thread_title: thread_title(selection),
        }
    }
}
