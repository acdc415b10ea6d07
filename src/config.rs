// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of edit plans so they can be written by hand and
//! applied to a view in one go through [`View::apply_edit`]. File I/O is left
//! to the caller to figure out.
//!
//! [`View::apply_edit`]: crate::view::View::apply_edit

use crate::{
    caml::{serialize::FilterFragment, GroupBy, OrderedField, RowLimit},
    view::SortOptions,
};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Edit plan layout.
///
/// # General Layout
///
/// Plain switches and listings come first. Filters, sorts, and single field
/// edits are arrays of tables, while grouping and row limit are plain tables:
///
/// ```toml
/// clear_filters = false
/// remove_filters = ["b"]
/// replace_fields = ["Title", "Modified"]
///
/// [[filter]]
/// field_name = "Status"
/// operator = "Eq"
/// type = "Text"
/// values = ["Open", "Active"]
///
/// [[filter]]
/// caml = '<IsNotNull><FieldRef Name="Owner"/></IsNotNull>'
///
/// [[sort]]
/// field_name = "Modified"
/// is_ascending = false
/// prepend = true
///
/// [group_by]
/// is_collapsed = true
/// group1 = { field_name = "Status" }
///
/// [[field]]
/// name = "Priority"
/// index = 1
///
/// [row_limit]
/// row_limit = 30
/// is_per_page = true
/// ```
///
/// A structured filter with an `id` updates the smart filter carrying that
/// id. Every other filter gets ANDed onto the existing ones. A field edit
/// without `index` hides the field.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ViewEdit {
    /// Remove every filter before anything else happens.
    #[serde(default, skip_serializing_if = "is_false")]
    pub clear_filters: bool,

    /// Smart filter ids to remove.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_filters: Vec<String>,

    /// Replacement listing of shown fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_fields: Option<Vec<String>>,

    /// Remove grouping. Takes precedence over `group_by`.
    #[serde(default, skip_serializing_if = "is_false")]
    pub clear_group_by: bool,

    /// Remove row limit. Takes precedence over `row_limit`.
    #[serde(default, skip_serializing_if = "is_false")]
    pub clear_row_limit: bool,

    /// Filters to add or update.
    #[serde(rename = "filter", default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterFragment>,

    /// Sorts to apply in order.
    #[serde(rename = "sort", default, skip_serializing_if = "Vec::is_empty")]
    pub sorts: Vec<SortEdit>,

    /// New grouping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<GroupBy>,

    /// Single field moves.
    #[serde(rename = "field", default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldEdit>,

    /// New row limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_limit: Option<RowLimit>,
}

impl ViewEdit {
    /// Check if plan would not touch anything.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl FromStr for ViewEdit {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        toml::de::from_str(data).map_err(ConfigError::Deserialize)
    }
}

impl Display for ViewEdit {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Single sort edit.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SortEdit {
    /// Field to sort on, and its direction.
    #[serde(flatten)]
    pub field: OrderedField,

    /// How sort gets merged with existing ones.
    #[serde(flatten)]
    pub options: SortOptions,
}

/// Single field edit.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct FieldEdit {
    /// Internal name of the field.
    pub name: String,

    /// Position to show field at. Hide field if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}
