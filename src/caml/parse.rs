// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! CAML view parsing.
//!
//! Walks a parsed view document and extracts its [`ViewArrangeInfo`]. The
//! parser is tolerant by design: constructs it does not understand simply
//! come out as `None` instead of an error. Hand edited and legacy views are
//! common, and rendering code must be able to treat "not understood" as a
//! perfectly normal outcome.
//!
//! # Filter Grammar
//!
//! A filter node is one of the following:
//!
//! - __Comparison__: `Eq`, `Neq`, `Gt`, `Geq`, `Lt`, `Leq`, `BeginsWith`,
//!   `Contains`, `Includes`, or `NotIncludes` holding one `FieldRef` and one
//!   `Value`, in any order.
//! - __Null check__: `IsNull` or `IsNotNull` holding one `FieldRef`.
//! - __Membership__: `Membership Type="..."` holding one `FieldRef`.
//! - __In__: `In` holding one `FieldRef` and a `Values` list.
//! - __Or__: two filter nodes that must collapse into one multi-value filter.
//! - __And__: two filter nodes whose filters are concatenated.
//!
//! Both `Or` and `And` only look at their first two element children. Anything
//! after that is ignored.

use crate::{
    caml::{
        attrs, tags,
        util::{get_attr, get_bool_attr, get_today_string, xml_to_dom},
        DomParts, Filter, FilterNodeKind, FilterOperator, GroupBy, OrderedField, RowLimit,
        ViewArrangeInfo,
    },
    xml::{Document, NodeId, XmlError},
};

use tracing::debug;

/// Extract arrangement of the view held by document.
///
/// Yields an empty arrangement if the root element is not a `View`.
pub fn parse_view(doc: &Document) -> ViewArrangeInfo {
    parse_parts(doc, &DomParts::locate(doc))
}

/// Extract arrangement from already located view parts.
pub fn parse_parts(doc: &Document, parts: &DomParts) -> ViewArrangeInfo {
    ViewArrangeInfo {
        field_names: parts.view_fields.map(|node| parse_field_names(doc, node)),
        row_limit: parts.row_limit.and_then(|node| parse_row_limit(doc, node)),
        group_by: parts.group_by.and_then(|node| parse_group_by(doc, node)),
        sorts: parts.order_by.map(|node| parse_sorts(doc, node)),
        filters: parts.where_.and_then(|node| parse_where(doc, node)),
    }
}

/// Field names of `ViewFields` element in document order.
///
/// Only direct `FieldRef` children with a `Name` count.
pub fn parse_field_names(doc: &Document, view_fields: NodeId) -> Vec<String> {
    doc.children_named(view_fields, tags::FIELD_REF)
        .filter_map(|field| get_attr(doc, field, attrs::NAME).map(str::to_owned))
        .collect()
}

/// Sorts of `OrderBy` element in document order.
pub fn parse_sorts(doc: &Document, order_by: NodeId) -> Vec<OrderedField> {
    ordered_fields(doc, order_by).collect()
}

/// Grouping of `GroupBy` element.
///
/// Yields `None` if no usable `FieldRef` exists. A third grouping level is
/// dropped.
pub fn parse_group_by(doc: &Document, group_by: NodeId) -> Option<GroupBy> {
    let mut fields = ordered_fields(doc, group_by);
    let group1 = fields.next()?;
    let group2 = fields.next();

    Some(GroupBy {
        is_collapsed: Some(get_bool_attr(doc, group_by, attrs::COLLAPSE).unwrap_or(true)),
        group1,
        group2,
    })
}

/// Row limit of `RowLimit` element.
///
/// Yields `None` if text content is not a whole number from 0 through
/// [`u32::MAX`]. Negative limits are rejected, not clamped.
pub fn parse_row_limit(doc: &Document, row_limit: NodeId) -> Option<RowLimit> {
    let limit = doc.text_content(row_limit).trim().parse().ok()?;
    let paged = get_attr(doc, row_limit, attrs::PAGED)
        .is_some_and(|value| value.eq_ignore_ascii_case("TRUE"));

    Some(RowLimit {
        row_limit: limit,
        is_per_page: Some(paged),
    })
}

/// Filters of `Where` element.
pub fn parse_where(doc: &Document, where_: NodeId) -> Option<Vec<Filter>> {
    let filter = doc.child_elements(where_).next()?;
    parse_filter(doc, filter)
}

/// Parse filter node into its flattened filters.
///
/// A comparison, or a fully collapsible `Or` tree, yields one filter. An
/// `And` tree yields one filter per supported leaf. Anything unsupported or
/// malformed yields `None`.
pub fn parse_filter(doc: &Document, node: NodeId) -> Option<Vec<Filter>> {
    let name = doc.name(node)?;
    match FilterNodeKind::of(name) {
        FilterNodeKind::Compare(op) => parse_comparison(doc, node, op).map(|filter| vec![filter]),
        FilterNodeKind::NullCheck(op) => parse_null_check(doc, node, op).map(|filter| vec![filter]),
        FilterNodeKind::Membership => parse_membership(doc, node).map(|filter| vec![filter]),
        FilterNodeKind::In => parse_in(doc, node).map(|filter| vec![filter]),
        FilterNodeKind::Or => parse_or(doc, node).map(|filter| vec![filter]),
        FilterNodeKind::And => parse_and(doc, node),
        FilterNodeKind::Unrecognized => {
            debug!("unsupported filter node <{name}>");
            None
        }
    }
}

/// Parse standalone filter markup.
///
/// # Errors
///
/// - Return [`XmlError`] if markup cannot be parsed.
pub fn parse_filter_xml(xml: &str) -> Result<Option<Vec<Filter>>, XmlError> {
    let doc = xml_to_dom(xml)?;
    Ok(doc.root().and_then(|root| parse_filter(&doc, root)))
}

fn ordered_fields<'a>(
    doc: &'a Document,
    parent: NodeId,
) -> impl Iterator<Item = OrderedField> + 'a {
    doc.children_named(parent, tags::FIELD_REF)
        .filter_map(move |field| {
            let name = get_attr(doc, field, attrs::NAME)?;
            Some(OrderedField {
                field_name: name.to_owned(),
                is_ascending: Some(get_bool_attr(doc, field, attrs::ASCENDING).unwrap_or(true)),
            })
        })
}

/// Leaf filter skeleton built from the first `FieldRef` child.
fn leaf(doc: &Document, node: NodeId, operator: FilterOperator) -> Option<Filter> {
    let field = doc.first_child_named(node, tags::FIELD_REF)?;
    let field_name = get_attr(doc, field, attrs::NAME)?;

    Some(Filter {
        field_name: field_name.to_owned(),
        operator,
        lookup_id: get_bool_attr(doc, field, attrs::LOOKUP_ID) == Some(true),
        id: get_attr(doc, node, attrs::ID).map(str::to_owned),
        ..Default::default()
    })
}

fn parse_comparison(doc: &Document, node: NodeId, op: FilterOperator) -> Option<Filter> {
    let mut filter = leaf(doc, node, op)?;
    let value = doc.first_child_named(node, tags::VALUE)?;

    filter.field_type = get_attr(doc, value, attrs::TYPE).map(str::to_owned);
    filter.include_time_value = get_bool_attr(doc, value, attrs::INCLUDE_TIME_VALUE) == Some(true);
    filter.values = vec![value_text(doc, value)];

    Some(filter)
}

fn parse_null_check(doc: &Document, node: NodeId, op: FilterOperator) -> Option<Filter> {
    let mut filter = leaf(doc, node, op)?;
    if op == FilterOperator::IsNull {
        filter.values = vec![String::new()];
    }

    Some(filter)
}

fn parse_membership(doc: &Document, node: NodeId) -> Option<Filter> {
    let membership = get_attr(doc, node, attrs::TYPE)?;
    let mut filter = leaf(doc, node, FilterOperator::Membership)?;
    filter.values = vec![membership.to_owned()];

    Some(filter)
}

fn parse_in(doc: &Document, node: NodeId) -> Option<Filter> {
    let mut filter = leaf(doc, node, FilterOperator::In)?;
    let values = doc.first_child_named(node, tags::VALUES)?;

    for value in doc.children_named(values, tags::VALUE) {
        if filter.field_type.is_none() {
            filter.field_type = get_attr(doc, value, attrs::TYPE).map(str::to_owned);
        }
        if get_bool_attr(doc, value, attrs::INCLUDE_TIME_VALUE) == Some(true) {
            filter.include_time_value = true;
        }

        // INVARIANT: Empty values inside In carry no meaning, drop them.
        let text = value_text(doc, value);
        if !text.is_empty() {
            filter.values.push(text);
        }
    }

    Some(filter)
}

fn parse_or(doc: &Document, node: NodeId) -> Option<Filter> {
    let mut children = doc.child_elements(node);
    let left = single(parse_filter(doc, children.next()?)?)?;
    let right = single(parse_filter(doc, children.next()?)?)?;

    let mut merged = merge_or(left, right)?;
    if let Some(id) = get_attr(doc, node, attrs::ID) {
        merged.id = Some(id.to_owned());
    }

    Some(merged)
}

fn parse_and(doc: &Document, node: NodeId) -> Option<Vec<Filter>> {
    // INVARIANT: Unsupported children contribute nothing instead of failing.
    let filters: Vec<Filter> = doc
        .child_elements(node)
        .take(2)
        .filter_map(|child| parse_filter(doc, child))
        .flatten()
        .collect();

    if filters.is_empty() {
        None
    } else {
        Some(filters)
    }
}

fn single(mut filters: Vec<Filter>) -> Option<Filter> {
    if filters.len() == 1 {
        filters.pop()
    } else {
        None
    }
}

/// Collapse two sides of an `Or` into one filter.
///
/// Both sides must target the same field with the same lookup mode and the
/// same operator, where `IsNull` counts as `Eq` on an empty value. The first
/// value type found wins.
fn merge_or(left: Filter, right: Filter) -> Option<Filter> {
    if left.field_name != right.field_name || left.lookup_id != right.lookup_id {
        return None;
    }

    let mut left = normalize_null(left);
    let right = normalize_null(right);
    if left.operator != right.operator || left.operator == FilterOperator::Membership {
        return None;
    }

    left.values.extend(right.values);
    left.field_type = left.field_type.or(right.field_type);
    left.include_time_value |= right.include_time_value;
    left.id = left.id.or(right.id);

    Some(left)
}

fn normalize_null(mut filter: Filter) -> Filter {
    if filter.operator == FilterOperator::IsNull {
        filter.operator = FilterOperator::Eq;
        filter.values = vec![String::new()];
    }

    filter
}

/// Text of a `Value` element, with a `Today` child turned into a token.
fn value_text(doc: &Document, value: NodeId) -> String {
    let Some(today) = doc.first_child_named(value, tags::TODAY) else {
        return doc.text_content(value);
    };

    let offset = get_attr(doc, today, attrs::OFFSET_DAYS)
        .or_else(|| get_attr(doc, today, attrs::OFFSET))
        .and_then(|offset| offset.trim().parse().ok())
        .unwrap_or(0);

    get_today_string(offset)
}
