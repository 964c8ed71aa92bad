use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attributes::AttributeType;

// `selected_values` and `selected_names` are index-aligned and never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotionFilter {
    pub attribute_id: String,
    pub attribute_name: String,
    pub attribute_type: AttributeType,
    pub selected_values: Vec<String>,
    pub selected_names: Vec<String>,
}

impl NotionFilter {
    pub fn contains(&self, value_id: &str) -> bool {
        self.selected_values.iter().any(|v| v == value_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterValueIndex {
    filters: Vec<NotionFilter>,
}

impl FilterValueIndex {
    pub fn filters(&self) -> &[NotionFilter] {
        &self.filters
    }

    pub fn get(&self, attribute_id: &str) -> Option<&NotionFilter> {
        self.filters.iter().find(|f| f.attribute_id == attribute_id)
    }

    pub fn contains_value(&self, attribute_id: &str, value_id: &str) -> bool {
        self.get(attribute_id)
            .map(|f| f.contains(value_id))
            .unwrap_or(false)
    }

    pub fn add_value(
        &mut self,
        attribute_id: &str,
        attribute_name: &str,
        value_id: &str,
        value_name: &str,
        attribute_type: &AttributeType,
    ) {
        let Some(filter) = self
            .filters
            .iter_mut()
            .find(|f| f.attribute_id == attribute_id)
        else {
            self.filters.push(NotionFilter {
                attribute_id: attribute_id.to_string(),
                attribute_name: attribute_name.to_string(),
                attribute_type: attribute_type.clone(),
                selected_values: vec![value_id.to_string()],
                selected_names: vec![value_name.to_string()],
            });
            return;
        };

        if attribute_type != &filter.attribute_type {
            debug!(
                attribute_id,
                stored = %filter.attribute_type,
                requested = %attribute_type,
                "Keeping stored attribute type for existing filter"
            );
        }

        if filter.attribute_type.is_single_choice() {
            filter.selected_values.clear();
            filter.selected_names.clear();
        } else if filter.contains(value_id) {
            debug!(attribute_id, value_id, "Ignoring duplicate filter value");
            return;
        }

        filter.selected_values.push(value_id.to_string());
        filter.selected_names.push(value_name.to_string());
    }

    pub fn remove_value(&mut self, attribute_id: &str, value_id: &str) -> bool {
        let Some(pos) = self
            .filters
            .iter()
            .position(|f| f.attribute_id == attribute_id)
        else {
            return false;
        };

        let filter = &mut self.filters[pos];
        let Some(idx) = filter.selected_values.iter().position(|v| v == value_id) else {
            return false;
        };

        filter.selected_values.remove(idx);
        if idx < filter.selected_names.len() {
            filter.selected_names.remove(idx);
        }

        if filter.selected_values.is_empty() {
            self.filters.remove(pos);
        }
        true
    }

    pub fn toggle_value(
        &mut self,
        attribute_id: &str,
        attribute_name: &str,
        value_id: &str,
        value_name: &str,
        attribute_type: &AttributeType,
    ) {
        if self.contains_value(attribute_id, value_id) {
            self.remove_value(attribute_id, value_id);
        } else {
            self.add_value(
                attribute_id,
                attribute_name,
                value_id,
                value_name,
                attribute_type,
            );
        }
    }

    pub fn remove_attribute(&mut self, attribute_id: &str) -> bool {
        let before = self.filters.len();
        self.filters.retain(|f| f.attribute_id != attribute_id);
        before != self.filters.len()
    }

    pub fn clear(&mut self) {
        self.filters.clear();
    }
}
