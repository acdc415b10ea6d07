// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Low-level CAML tree helpers.
//!
//! Shared by the parser, the serializer, and the view mutators.

use crate::{
    caml::{attrs, tags, LogicalOperator, OrderedField},
    xml::{Document, NodeId, XmlError},
};

use regex::Regex;
use std::sync::LazyLock;

/// `[Today]`, `[Today]+N`, or `[Today]-N`, tag matched case-insensitively.
///
/// Offset digits are ASCII only.
static TODAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\[today\]([+-][0-9]+)?$").unwrap());

/// Read attribute whose name matches exactly.
///
/// A differently cased attribute of the same name does not count.
pub fn get_attr<'a>(doc: &'a Document, elem: NodeId, name: &str) -> Option<&'a str> {
    doc.attribute(elem, name)
}

/// Read attribute as `TRUE`/`FALSE` boolean.
///
/// Value is compared case-insensitively. Missing or unrecognized values
/// yield `None`.
pub fn get_bool_attr(doc: &Document, elem: NodeId, name: &str) -> Option<bool> {
    let value = get_attr(doc, elem, name)?;
    if value.eq_ignore_ascii_case("TRUE") {
        Some(true)
    } else if value.eq_ignore_ascii_case("FALSE") {
        Some(false)
    } else {
        None
    }
}

/// Build detached `<FieldRef Name="..." [Ascending="TRUE|FALSE"]/>`.
pub fn field_ref_dom(doc: &mut Document, field: &OrderedField) -> NodeId {
    let elem = doc.create_element(tags::FIELD_REF);
    doc.set_attribute(elem, attrs::NAME, field.field_name.as_str());
    update_boolean_attr(doc, elem, attrs::ASCENDING, field.is_ascending);
    elem
}

/// Set boolean attribute to `TRUE`/`FALSE`, or remove it for `None`.
pub fn update_boolean_attr(doc: &mut Document, elem: NodeId, name: &str, value: Option<bool>) {
    match value {
        Some(true) => doc.set_attribute(elem, name, "TRUE"),
        Some(false) => doc.set_attribute(elem, name, "FALSE"),
        None => {
            doc.remove_attribute(elem, name);
        }
    }
}

/// Replace old field reference, or update it in place.
///
/// If `old` refers to the same field name, only its `Ascending` attribute is
/// touched so any other attribute survives. Otherwise a fresh `FieldRef`
/// takes the old one's slot, or gets appended to `parent` when there is no
/// old element. Returns the element now standing for the field.
pub fn replace_field(
    doc: &mut Document,
    field: &OrderedField,
    old: Option<NodeId>,
    parent: NodeId,
) -> NodeId {
    if let Some(old) = old {
        if get_attr(doc, old, attrs::NAME) == Some(field.field_name.as_str()) {
            update_boolean_attr(doc, old, attrs::ASCENDING, field.is_ascending);
            return old;
        }
    }

    let fresh = field_ref_dom(doc, field);
    match old {
        Some(old) => doc.replace(old, fresh),
        None => doc.append_child(parent, fresh),
    }

    fresh
}

/// Join filter fragments with nested logical operators.
///
/// N fragments are wrapped N-1 times, left to right. An empty listing yields
/// an empty string, and a single fragment is returned as is.
pub fn combine_filters(filters: &[impl AsRef<str>], op: LogicalOperator) -> String {
    let mut filters = filters.iter().map(AsRef::as_ref);
    let Some(first) = filters.next() else {
        return String::new();
    };

    let tag = op.tag();
    filters.fold(first.to_owned(), |combined, next| {
        format!("<{tag}>{combined}{next}</{tag}>")
    })
}

/// Parse view markup into a document.
///
/// # Errors
///
/// Checked in order of precedence:
///
/// - Return [`XmlError`] if the markup itself cannot be parsed.
/// - Return [`XmlError::NoRootElement`] if no root element exists.
/// - Return [`XmlError::ParserErrorNode`] if any element is named
///   `parsererror`.
pub fn xml_to_dom(xml: &str) -> Result<Document, XmlError> {
    let doc = Document::parse(xml)?;
    let Some(root) = doc.root() else {
        return Err(XmlError::NoRootElement);
    };

    if doc.is_element_named(root, tags::PARSER_ERROR)
        || doc.first_descendant_named(root, tags::PARSER_ERROR).is_some()
    {
        return Err(XmlError::ParserErrorNode);
    }

    Ok(doc)
}

/// Check if value is a `[Today]` token.
///
/// Offsets that do not fit a 64-bit day count do not make a token.
pub fn is_today_string(value: &str) -> bool {
    parse_today(value).is_some()
}

/// Day offset of a `[Today]` token.
///
/// Yields 0 for a bare `[Today]`, and for anything that is not a token.
pub fn get_today_offset(value: &str) -> i64 {
    parse_today(value).unwrap_or(0)
}

fn parse_today(value: &str) -> Option<i64> {
    let caps = TODAY_RE.captures(value)?;
    match caps.get(1) {
        Some(offset) => offset.as_str().parse().ok(),
        None => Some(0),
    }
}

/// Format day offset as `[Today]` token.
pub fn get_today_string(offset: i64) -> String {
    match offset {
        0 => "[Today]".into(),
        offset if offset > 0 => format!("[Today]+{offset}"),
        offset => format!("[Today]{offset}"),
    }
}
