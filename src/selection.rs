use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    attributes::{AttributeMeta, AttributeType},
    filter_values::{FilterValueIndex, NotionFilter},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilteringAttribute {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub attribute_type: AttributeType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataAttribute {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub attribute_type: AttributeType,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterValueChoice {
    pub attribute_id: String,
    pub attribute_name: String,
    pub value_id: String,
    pub value_name: String,
    pub attribute_type: AttributeType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionStore {
    selected_database_id: String,
    selected_page_id: String,
    filtering_attributes: Vec<FilteringAttribute>,
    data_attributes: Vec<DataAttribute>,
    filters: FilterValueIndex,
}

impl SelectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected_database_id(&self) -> &str {
        &self.selected_database_id
    }

    pub fn selected_page_id(&self) -> &str {
        &self.selected_page_id
    }

    pub fn filtering_attributes(&self) -> &[FilteringAttribute] {
        &self.filtering_attributes
    }

    pub fn data_attributes(&self) -> &[DataAttribute] {
        &self.data_attributes
    }

    pub fn filters(&self) -> &[NotionFilter] {
        self.filters.filters()
    }

    pub fn is_filtering(&self, attribute_id: &str) -> bool {
        self.filtering_attributes.iter().any(|a| a.id == attribute_id)
    }

    pub fn set_database(&mut self, id: &str) {
        if self.selected_database_id != id {
            debug!(
                from = %self.selected_database_id,
                to = %id,
                "Database changed, resetting dependent selection"
            );
        }
        self.selected_database_id = id.trim().to_string();
        self.selected_page_id.clear();
        self.filtering_attributes.clear();
        self.data_attributes.clear();
        self.filters.clear();
    }

    pub fn set_page(&mut self, id: Option<&str>) {
        self.selected_page_id = id.map(str::trim).unwrap_or_default().to_string();
    }

    pub fn toggle_filtering_attribute(&mut self, attribute_id: &str, meta: &AttributeMeta) {
        if let Some(pos) = self
            .filtering_attributes
            .iter()
            .position(|a| a.id == attribute_id)
        {
            self.filtering_attributes.remove(pos);
            self.filters.remove_attribute(attribute_id);
            return;
        }

        self.filtering_attributes.push(FilteringAttribute {
            id: attribute_id.to_string(),
            name: meta.name.clone(),
            attribute_type: meta.attribute_type.clone(),
        });
    }

    // First touch records the attribute as excluded; later touches flip it.
    pub fn toggle_data_attribute(&mut self, attribute_id: &str, meta: &AttributeMeta) {
        if let Some(entry) = self
            .data_attributes
            .iter_mut()
            .find(|a| a.id == attribute_id)
        {
            entry.selected = !entry.selected;
            return;
        }

        self.data_attributes.push(DataAttribute {
            id: attribute_id.to_string(),
            name: meta.name.clone(),
            attribute_type: meta.attribute_type.clone(),
            selected: false,
        });
    }

    pub fn toggle_filter_value(&mut self, choice: &FilterValueChoice) {
        if !self.is_filtering(&choice.attribute_id) {
            self.filtering_attributes.push(FilteringAttribute {
                id: choice.attribute_id.clone(),
                name: choice.attribute_name.clone(),
                attribute_type: choice.attribute_type.clone(),
            });
        }

        self.filters.toggle_value(
            &choice.attribute_id,
            &choice.attribute_name,
            &choice.value_id,
            &choice.value_name,
            &choice.attribute_type,
        );
    }

    pub fn remove_filter_value(&mut self, attribute_id: &str, value_id: &str) -> bool {
        self.filters.remove_value(attribute_id, value_id)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
