// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! CAML filter serialization.
//!
//! Turns [`Filter`] values back into CAML markup. This is the inverse of
//! [`parse_filter`](crate::caml::parse::parse_filter), but not a perfect
//! mirror. A few encodings are chosen on purpose because the server evaluates
//! them differently:
//!
//! - A single value `In` filter is written as `Eq`.
//! - A multi value `Eq` filter on dates is written as a balanced tree of
//!   `Or`/`Eq` nodes, because `In` does not compare dates the way users
//!   expect. Other multi value `Eq` filters are written as `In`/`Values`.
//! - A multi value filter for any other comparison is written as a balanced
//!   tree of `Or` nodes.
//! - A lone empty `Eq` value is written as `IsNull`.
//!
//! Every form produced here is accepted by the parser again.

use crate::{
    caml::{
        attrs, tags,
        util::{get_today_offset, is_today_string},
        Filter, FilterOperator, LogicalOperator,
    },
    xml::{Document, NodeId},
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// ISO 8601 date with optional time portion, in ASCII digits.
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^[0-9]{4}-[0-9]{2}-[0-9]{2}",
        r"([T ][0-9]{2}:[0-9]{2}(:[0-9]{2}(\.[0-9]+)?)?(Z|[+-][0-9]{2}:[0-9]{2})?)?$",
    ))
    .unwrap()
});

const DATE_TIME: &str = "DateTime";

/// Filter given either structurally or as hand authored CAML.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FilterFragment {
    /// Structured filter to serialize.
    Filter(Filter),

    /// Raw CAML passed through unchanged.
    Raw { caml: String },
}

impl From<Filter> for FilterFragment {
    fn from(filter: Filter) -> Self {
        Self::Filter(filter)
    }
}

/// Serialize filter into CAML markup.
///
/// # Errors
///
/// - Return [`SerializeError`] if filter lacks what its operator needs.
pub fn filter_to_caml(filter: &Filter) -> Result<String> {
    let mut doc = Document::new();
    let node = build_filter(&mut doc, filter)?;
    Ok(doc.outer_xml(node))
}

/// Serialize listing of filters, passing raw fragments through.
///
/// # Errors
///
/// - Return [`SerializeError`] if any structured filter cannot be
///   serialized.
pub fn filters_to_caml_strings(filters: &[FilterFragment]) -> Result<Vec<String>> {
    filters
        .iter()
        .map(|fragment| match fragment {
            FilterFragment::Filter(filter) => filter_to_caml(filter),
            FilterFragment::Raw { caml } => Ok(caml.clone()),
        })
        .collect()
}

/// Build detached filter node inside target document.
///
/// The smart filter `id`, if any, lands on the outermost node.
///
/// # Errors
///
/// - Return [`SerializeError::MissingFieldName`] if field name is empty.
/// - Return [`SerializeError::MissingValues`] if operator needs a value but
///   filter has none.
/// - Return [`SerializeError::MissingMembershipType`] for membership filter
///   without a membership type.
pub fn build_filter(doc: &mut Document, filter: &Filter) -> Result<NodeId> {
    if filter.field_name.is_empty() {
        return Err(SerializeError::MissingFieldName);
    }

    let values = filter.values.as_slice();
    let node = match (filter.operator, values) {
        (op @ (FilterOperator::IsNull | FilterOperator::IsNotNull), _) => {
            let node = doc.create_element(op.tag());
            let field = field_ref(doc, filter);
            doc.append_child(node, field);
            node
        }
        (FilterOperator::Membership, values) => {
            let membership = values
                .first()
                .filter(|value| !value.is_empty())
                .ok_or_else(|| SerializeError::MissingMembershipType {
                    field_name: filter.field_name.clone(),
                })?;
            let node = doc.create_element(FilterOperator::Membership.tag());
            doc.set_attribute(node, attrs::TYPE, membership.as_str());
            let field = field_ref(doc, filter);
            doc.append_child(node, field);
            node
        }
        (op, []) => {
            return Err(SerializeError::MissingValues {
                field_name: filter.field_name.clone(),
                operator: op,
            })
        }
        (FilterOperator::In, [value]) => single(doc, filter, FilterOperator::Eq, value),
        (FilterOperator::In, values) => in_values(doc, filter, values),
        (FilterOperator::Eq, values) if values.len() > 1 && !looks_like_dates(filter) => {
            in_values(doc, filter, values)
        }
        (op, values) => or_tree(doc, filter, op, values),
    };

    if let Some(id) = &filter.id {
        doc.set_attribute(node, attrs::ID, id.as_str());
    }

    Ok(node)
}

/// Check if multi value filter compares dates.
///
/// Either the value type says so, or every non-empty value looks like a date
/// or a `[Today]` token.
fn looks_like_dates(filter: &Filter) -> bool {
    if filter.field_type.as_deref() == Some(DATE_TIME) {
        return true;
    }

    let mut values = filter.values.iter().filter(|value| !value.is_empty()).peekable();
    values.peek().is_some()
        && values.all(|value| is_today_string(value) || DATE_RE.is_match(value))
}

fn or_tree(doc: &mut Document, filter: &Filter, op: FilterOperator, values: &[String]) -> NodeId {
    if let [value] = values {
        return single(doc, filter, op, value);
    }

    let (left, right) = values.split_at(values.len() / 2);
    let node = doc.create_element(LogicalOperator::Or.tag());
    let left = or_tree(doc, filter, op, left);
    let right = or_tree(doc, filter, op, right);
    doc.append_child(node, left);
    doc.append_child(node, right);
    node
}

fn single(doc: &mut Document, filter: &Filter, op: FilterOperator, value: &str) -> NodeId {
    // INVARIANT: Equality against nothing means the field is empty.
    if op == FilterOperator::Eq && value.is_empty() {
        let node = doc.create_element(FilterOperator::IsNull.tag());
        let field = field_ref(doc, filter);
        doc.append_child(node, field);
        return node;
    }

    let node = doc.create_element(op.tag());
    let field = field_ref(doc, filter);
    let value = value_node(doc, filter, value);
    doc.append_child(node, field);
    doc.append_child(node, value);
    node
}

fn in_values(doc: &mut Document, filter: &Filter, values: &[String]) -> NodeId {
    let node = doc.create_element(FilterOperator::In.tag());
    let field = field_ref(doc, filter);
    let list = doc.create_element(tags::VALUES);
    for value in values {
        let value = value_node(doc, filter, value);
        doc.append_child(list, value);
    }
    doc.append_child(node, field);
    doc.append_child(node, list);
    node
}

fn field_ref(doc: &mut Document, filter: &Filter) -> NodeId {
    let node = doc.create_element(tags::FIELD_REF);
    doc.set_attribute(node, attrs::NAME, filter.field_name.as_str());
    if filter.lookup_id {
        doc.set_attribute(node, attrs::LOOKUP_ID, "TRUE");
    }
    node
}

fn value_node(doc: &mut Document, filter: &Filter, value: &str) -> NodeId {
    let node = doc.create_element(tags::VALUE);
    if let Some(field_type) = &filter.field_type {
        doc.set_attribute(node, attrs::TYPE, field_type.as_str());
    }
    if filter.include_time_value {
        doc.set_attribute(node, attrs::INCLUDE_TIME_VALUE, "TRUE");
    }

    let is_date = filter.field_type.as_deref() == Some(DATE_TIME);
    if is_date && is_today_string(value) {
        let today = doc.create_element(tags::TODAY);
        let offset = get_today_offset(value);
        if offset != 0 {
            doc.set_attribute(today, attrs::OFFSET_DAYS, offset.to_string());
        }
        doc.append_child(node, today);
    } else if !value.is_empty() {
        let text = doc.create_text(value);
        doc.append_child(node, text);
    }

    node
}

/// Filter serialization error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SerializeError {
    /// Filter does not name a field.
    #[error("filter has no field name")]
    MissingFieldName,

    /// Operator needs at least one value.
    #[error("filter on {field_name:?} has no value for operator {operator}")]
    MissingValues {
        field_name: String,
        operator: FilterOperator,
    },

    /// Membership filter needs a membership type as its value.
    #[error("membership filter on {field_name:?} has no membership type")]
    MissingMembershipType { field_name: String },
}

/// Friendly result alias :3
type Result<T, E = SerializeError> = std::result::Result<T, E>;
