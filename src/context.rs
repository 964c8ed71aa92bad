use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    filter_compiler::{compile_logged, CompileError},
    filter_values::NotionFilter,
    notion::{PageQuery, QueryPagesRequest, QueryPagesResponse},
    selection::{DataAttribute, SelectionStore},
    summary::{selected_data_attributes, SelectionSummary},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedDatabaseContext {
    pub id: String,
    pub name: String,
    pub has_filters: bool,
    pub has_data_selection: bool,
    pub filter_summary: String,
    pub data_attributes_summary: String,
    pub filtered_data: Option<QueryPagesResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatContext {
    pub selected_database: SelectedDatabaseContext,
    pub selected_page: Option<String>,
    pub filters: Vec<NotionFilter>,
    pub data_attributes: Vec<DataAttribute>,
    pub summary: SelectionSummary,
}

pub struct ContextAssembler<'a> {
    pages: &'a dyn PageQuery,
    page_size: u32,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(pages: &'a dyn PageQuery, page_size: u32) -> Self {
        Self { pages, page_size }
    }

    // A failed page query degrades to `filtered_data: None`.
    pub async fn assemble(
        &self,
        selection: &SelectionStore,
        database_name: Option<&str>,
    ) -> Result<Option<ChatContext>, CompileError> {
        let summary = SelectionSummary::project(selection);
        if !summary.has_selection {
            return Ok(None);
        }

        let data_attributes: Vec<DataAttribute> = if summary.has_data_selection {
            selected_data_attributes(selection)
                .into_iter()
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        let filtered_data = if summary.has_filters {
            let request = QueryPagesRequest {
                database_id: selection.selected_database_id().to_string(),
                filter: compile_logged(selection.filters())?,
                data_attribute_names: data_attributes.iter().map(|a| a.name.clone()).collect(),
                page_size: self.page_size,
            };
            match self.pages.query_pages(&request).await {
                Ok(response) => {
                    debug!(
                        database_id = %request.database_id,
                        pages = response.pages.len(),
                        "Filtered pages attached to context"
                    );
                    Some(response)
                }
                Err(err) => {
                    warn!(
                        database_id = %request.database_id,
                        "Filtered page query failed, sending context without data: {err}"
                    );
                    None
                }
            }
        } else {
            None
        };

        let database_id = selection.selected_database_id().to_string();
        let name = database_name
            .filter(|n| !n.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| database_id.clone());
        let selected_page = Some(selection.selected_page_id())
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        Ok(Some(ChatContext {
            selected_database: SelectedDatabaseContext {
                id: database_id,
                name,
                has_filters: summary.has_filters,
                has_data_selection: summary.has_data_selection,
                filter_summary: summary.filter_summary.clone(),
                data_attributes_summary: summary.data_attributes_summary.clone(),
                filtered_data,
            },
            selected_page,
            filters: selection.filters().to_vec(),
            data_attributes,
            summary,
        }))
    }
}
