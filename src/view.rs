// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Editable list view.
//!
//! A [`View`] wraps the raw view markup handed out by the server. The markup
//! is parsed lazily on first use. From then on the parsed tree is the single
//! source of truth, and the raw string is never consulted again unless the
//! caller throws every edit away through [`View::clear_xml_overrides`].
//!
//! # Dirty Tracking
//!
//! Each arrangement aspect (filters, sorts, grouping, field listing, and row
//! limit) has its own dirty flag. Any mutator call touching an aspect marks
//! it dirty, even if the call ended up changing nothing. Flags never clear on
//! their own. Only [`View::clear_xml_overrides`] and [`View::set_is_dirty`]
//! reset them.
//!
//! # Parse Errors
//!
//! Invalid markup does not crash anything. It puts the view into a parse
//! error state observable through [`View::has_parse_error`]. Accessors that
//! need the tree return [`ViewError::InvalidXml`], and mutators leave the
//! view untouched.
//!
//! # See Also
//!
//! 1. [`smart`] for smart filter management.
//! 2. [`crate::caml`] for the vocabulary itself.

pub mod smart;

use crate::{
    caml::{
        attrs,
        parse::{parse_field_names, parse_parts},
        serialize::{filters_to_caml_strings, FilterFragment, SerializeError},
        tags,
        util::{
            field_ref_dom, get_attr, replace_field, update_boolean_attr,
            xml_to_dom,
        },
        DomParts, GroupBy, OrderedField, RowLimit, ViewArrangeInfo,
    },
    config::ViewEdit,
    xml::{Document, NodeId, NodeKind, XmlError},
};

use serde::{Deserialize, Serialize};
use std::{cell::OnceCell, cmp::Ordering, collections::HashMap};
use tracing::{debug, instrument, warn};

/// Kind of view as reported by the server.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ViewKind {
    #[default]
    Html,
    Grid,
    Calendar,
    Gantt,
    PowerApp,
}

/// Server side description of a view.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ViewDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub title: String,

    pub view_xml: String,

    #[serde(default)]
    pub kind: ViewKind,
}

/// Arrangement aspect with its own dirty flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aspect {
    Filters,
    Sorts,
    GroupBy,
    FieldNames,
    RowLimit,
}

/// Dirty state of every arrangement aspect.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DirtyFlags {
    pub filters: bool,
    pub sorts: bool,
    pub group_by: bool,
    pub field_names: bool,
    pub row_limit: bool,
}

impl DirtyFlags {
    /// Flags with every aspect set to the same state.
    pub fn all(dirty: bool) -> Self {
        Self {
            filters: dirty,
            sorts: dirty,
            group_by: dirty,
            field_names: dirty,
            row_limit: dirty,
        }
    }

    pub fn get(&self, aspect: Aspect) -> bool {
        match aspect {
            Aspect::Filters => self.filters,
            Aspect::Sorts => self.sorts,
            Aspect::GroupBy => self.group_by,
            Aspect::FieldNames => self.field_names,
            Aspect::RowLimit => self.row_limit,
        }
    }

    pub fn mark(&mut self, aspect: Aspect) {
        match aspect {
            Aspect::Filters => self.filters = true,
            Aspect::Sorts => self.sorts = true,
            Aspect::GroupBy => self.group_by = true,
            Aspect::FieldNames => self.field_names = true,
            Aspect::RowLimit => self.row_limit = true,
        }
    }

    /// Check if any aspect is dirty.
    pub fn any(&self) -> bool {
        *self != Self::all(false)
    }
}

/// Options for [`View::update_sort`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct SortOptions {
    /// Remove the sort on the given field instead of adding it.
    #[serde(default, rename = "remove")]
    pub remove_sort: bool,

    /// Replace all existing sorts.
    #[serde(default)]
    pub overwrite_all: bool,

    /// Insert a new sort before existing ones instead of after them.
    #[serde(default)]
    pub prepend: bool,
}

/// Editable list view.
#[derive(Debug, Default)]
pub struct View {
    id: Option<String>,
    title: String,
    kind: ViewKind,
    view_xml: String,
    dom: OnceCell<Result<Document, XmlError>>,
    dirty: DirtyFlags,
    modified: bool,
}

impl View {
    /// Construct new view from raw view markup.
    pub fn new(view_xml: impl Into<String>) -> Self {
        Self {
            view_xml: view_xml.into(),
            ..Default::default()
        }
    }

    /// Construct new view from server side descriptor.
    pub fn from_descriptor(descriptor: ViewDescriptor) -> Self {
        Self {
            id: descriptor.id,
            title: descriptor.title,
            kind: descriptor.kind,
            view_xml: descriptor.view_xml,
            ..Default::default()
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    /// Raw markup the view was created from.
    pub fn view_xml(&self) -> &str {
        &self.view_xml
    }

    /// Check if view markup failed to parse.
    ///
    /// Forces the lazy parse if it did not happen yet.
    pub fn has_parse_error(&self) -> bool {
        self.parsed().is_err()
    }

    /// Check if any aspect has been edited.
    pub fn is_dirty(&self) -> bool {
        self.dirty.any()
    }

    /// Check if given aspect has been edited.
    pub fn is_aspect_dirty(&self, aspect: Aspect) -> bool {
        self.dirty.get(aspect)
    }

    pub fn dirty_flags(&self) -> DirtyFlags {
        self.dirty
    }

    /// Force every dirty flag into given state.
    ///
    /// Edits already applied to the tree stay in place.
    pub fn set_is_dirty(&mut self, dirty: bool) {
        self.dirty = DirtyFlags::all(dirty);
    }

    /// Throw away every edit and go back to the original markup.
    pub fn clear_xml_overrides(&mut self) {
        debug!("clear xml overrides of view {:?}", self.title);
        self.dom = OnceCell::new();
        self.dirty = DirtyFlags::default();
        self.modified = false;
    }

    /// Parsed view document.
    ///
    /// # Errors
    ///
    /// - Return [`ViewError::InvalidXml`] if view markup is invalid.
    pub fn document(&self) -> Result<&Document> {
        self.parsed().map_err(|err| ViewError::InvalidXml {
            reason: err.to_string(),
        })
    }

    /// Structural parts of the view document.
    ///
    /// # Errors
    ///
    /// - Return [`ViewError::InvalidXml`] if view markup is invalid.
    pub fn dom_parts(&self) -> Result<DomParts> {
        Ok(DomParts::locate(self.document()?))
    }

    /// Arrangement of the view as it currently stands.
    ///
    /// Recomputed from the tree on every call.
    ///
    /// # Errors
    ///
    /// - Return [`ViewError::InvalidXml`] if view markup is invalid.
    pub fn effective_arrangement(&self) -> Result<ViewArrangeInfo> {
        let doc = self.document()?;
        Ok(parse_parts(doc, &DomParts::locate(doc)))
    }

    /// Field names currently shown by the view.
    ///
    /// # Errors
    ///
    /// - Return [`ViewError::InvalidXml`] if view markup is invalid.
    pub fn effective_field_names(&self) -> Result<Vec<String>> {
        let doc = self.document()?;
        Ok(DomParts::locate(doc)
            .view_fields
            .map(|view_fields| parse_field_names(doc, view_fields))
            .unwrap_or_default())
    }

    /// Markup of the view as it currently stands.
    ///
    /// Views whose tree was never changed, and views that failed to parse,
    /// hand back their original markup. Clearing dirty flags through
    /// [`View::set_is_dirty`] does not undo edits, so the edited tree is
    /// still what gets handed back.
    pub fn effective_view_xml(&self) -> String {
        match self.parsed() {
            Ok(doc) if self.modified => doc.to_string(),
            _ => self.view_xml.clone(),
        }
    }

    /// Markup of the view's `Query` element.
    ///
    /// Yields an empty string if there is no query.
    pub fn effective_query_xml(&self, include_query_tag: bool) -> String {
        let Ok(doc) = self.parsed() else {
            return String::new();
        };

        match DomParts::locate(doc).query {
            Some(query) if include_query_tag => doc.outer_xml(query),
            Some(query) => doc.inner_xml(query),
            None => String::new(),
        }
    }

    /// Update sorting of the view.
    ///
    /// - `overwrite_all` without a sort clears every sort.
    /// - `remove_sort` removes the sort on the given field.
    /// - `overwrite_all` makes the given sort the only one.
    /// - Otherwise, an existing sort on the field changes direction in place,
    ///   and a new one lands at the start (`prepend`) or the end.
    ///
    /// Removing a sort from a view that has no `OrderBy` at all does not mark
    /// sorts dirty.
    ///
    /// # Errors
    ///
    /// - Return [`ViewError::InvalidXml`] if view markup is invalid.
    /// - Return [`ViewError::MissingView`] if root element is not `View`.
    #[instrument(skip(self), level = "debug")]
    pub fn update_sort(&mut self, sort: Option<&OrderedField>, options: SortOptions) -> Result<()> {
        self.edit(Aspect::Sorts, |doc, parts| {
            if options.overwrite_all && sort.is_none() {
                if let Some(order_by) = parts.order_by {
                    doc.detach(order_by);
                }
                return Ok(true);
            }

            let Some(sort) = sort else {
                return Ok(true);
            };

            if options.remove_sort {
                let Some(order_by) = parts.order_by else {
                    debug!("no sorts to remove {:?} from", sort.field_name);
                    return Ok(false);
                };

                if let Some(field) = find_field_ref(doc, order_by, &sort.field_name) {
                    doc.detach(field);
                }
                return Ok(true);
            }

            let order_by = match parts.order_by {
                Some(order_by) => order_by,
                None => ensure_query_child(doc, &parts, tags::ORDER_BY),
            };
            let existing = find_field_ref(doc, order_by, &sort.field_name);

            if options.overwrite_all {
                let stale: Vec<NodeId> = doc
                    .children_named(order_by, tags::FIELD_REF)
                    .filter(|field| Some(*field) != existing)
                    .collect();
                for field in stale {
                    doc.detach(field);
                }
                replace_field(doc, sort, existing, order_by);
                return Ok(true);
            }

            match existing {
                Some(existing) => {
                    replace_field(doc, sort, Some(existing), order_by);
                }
                None => {
                    let field = field_ref_dom(doc, sort);
                    if options.prepend {
                        doc.prepend_child(order_by, field);
                    } else {
                        doc.append_child(order_by, field);
                    }
                }
            }

            Ok(true)
        })
    }

    /// Update grouping of the view.
    ///
    /// `None`, or a first group without field name, clears grouping. A field
    /// that keeps its level is updated in place. A second group on the same
    /// field as the first one is dropped.
    ///
    /// # Errors
    ///
    /// - Return [`ViewError::InvalidXml`] if view markup is invalid.
    /// - Return [`ViewError::MissingView`] if root element is not `View`.
    #[instrument(skip(self), level = "debug")]
    pub fn update_group_by(&mut self, group_by: Option<&GroupBy>) -> Result<()> {
        self.edit(Aspect::GroupBy, |doc, parts| {
            let group_by = match group_by {
                Some(group_by) if !group_by.group1.field_name.is_empty() => group_by,
                _ => {
                    if let Some(old) = parts.group_by {
                        doc.detach(old);
                    }
                    return Ok(true);
                }
            };

            let parent = match parts.group_by {
                Some(parent) => parent,
                None => ensure_query_child(doc, &parts, tags::GROUP_BY),
            };
            update_boolean_attr(doc, parent, attrs::COLLAPSE, group_by.is_collapsed);

            let old: Vec<NodeId> = doc
                .children_named(parent, tags::FIELD_REF)
                .filter(|field| get_attr(doc, *field, attrs::NAME).is_some())
                .take(2)
                .collect();
            replace_field(doc, &group_by.group1, old.first().copied(), parent);

            let group2 = group_by
                .group2
                .as_ref()
                .filter(|group2| !group2.field_name.is_empty())
                .filter(|group2| group2.field_name != group_by.group1.field_name);
            match (group2, old.get(1).copied()) {
                (Some(group2), old2) => {
                    replace_field(doc, group2, old2, parent);
                }
                (None, Some(old2)) => doc.detach(old2),
                (None, None) => {}
            }

            Ok(true)
        })
    }

    /// Show, move, or hide a field.
    ///
    /// `None` hides the field. An index past the end appends the field.
    /// Otherwise the field is moved to, or inserted at, the given position.
    ///
    /// # Errors
    ///
    /// - Return [`ViewError::InvalidXml`] if view markup is invalid.
    /// - Return [`ViewError::MissingView`] if root element is not `View`.
    #[instrument(skip(self), level = "debug")]
    pub fn update_field(&mut self, name: &str, index: Option<usize>) -> Result<()> {
        self.edit(Aspect::FieldNames, |doc, parts| {
            let existing = parts
                .view_fields
                .and_then(|view_fields| find_field_ref(doc, view_fields, name));

            let Some(index) = index else {
                if let Some(existing) = existing {
                    doc.detach(existing);
                }
                return Ok(true);
            };

            let view_fields = ensure_view_fields(doc, &parts);
            let field = match existing {
                Some(existing) => {
                    doc.detach(existing);
                    existing
                }
                None => field_ref_dom(doc, &named(name)),
            };

            let remaining: Vec<NodeId> = named_field_refs(doc, view_fields).collect();
            match remaining.get(index) {
                Some(reference) => doc.insert_before(view_fields, field, *reference),
                None => doc.append_child(view_fields, field),
            }

            Ok(true)
        })
    }

    /// Replace the whole field listing.
    ///
    /// Fields kept from the old listing keep their element and attributes.
    /// An empty listing is ignored.
    ///
    /// # Errors
    ///
    /// - Return [`ViewError::InvalidXml`] if view markup is invalid.
    /// - Return [`ViewError::MissingView`] if root element is not `View`.
    #[instrument(skip(self), level = "debug")]
    pub fn replace_fields(&mut self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }

        self.edit(Aspect::FieldNames, |doc, parts| {
            let view_fields = ensure_view_fields(doc, &parts);

            let current: Vec<NodeId> = named_field_refs(doc, view_fields).collect();
            let mut old: HashMap<String, NodeId> = HashMap::new();
            for field in current {
                if let Some(name) = get_attr(doc, field, attrs::NAME) {
                    old.entry(name.to_owned()).or_insert(field);
                }
                doc.detach(field);
            }

            for name in names {
                let field = match old.remove(name) {
                    Some(field) => field,
                    None => field_ref_dom(doc, &named(name)),
                };
                doc.append_child(view_fields, field);
            }

            Ok(true)
        })
    }

    /// Remove every filter of the view.
    ///
    /// # Errors
    ///
    /// - Return [`ViewError::InvalidXml`] if view markup is invalid.
    /// - Return [`ViewError::MissingView`] if root element is not `View`.
    #[instrument(skip(self), level = "debug")]
    pub fn clear_filters(&mut self) -> Result<()> {
        self.edit(Aspect::Filters, |doc, parts| {
            if let Some(where_) = parts.where_ {
                doc.detach(where_);
            }
            Ok(true)
        })
    }

    /// AND new filter fragments onto the existing filters.
    ///
    /// # Errors
    ///
    /// - Return [`ViewError::InvalidXml`] if view markup is invalid.
    /// - Return [`ViewError::MissingView`] if root element is not `View`.
    /// - Return [`ViewError::InvalidFilter`] if a fragment is malformed, holds
    ///   stray text, or does not hold exactly one filter element. The view is
    ///   left untouched in that case.
    #[instrument(skip(self, filters), level = "debug")]
    pub fn add_filters(&mut self, filters: &[impl AsRef<str>]) -> Result<()> {
        if filters.is_empty() {
            return Ok(());
        }

        self.edit(Aspect::Filters, |doc, parts| {
            let mut added = None;
            for filter in filters {
                let node = parse_filter_fragment(doc, filter.as_ref())?;
                added = Some(match added {
                    Some(left) => {
                        let and = doc.create_element(tags::AND);
                        doc.append_child(and, left);
                        doc.append_child(and, node);
                        and
                    }
                    None => node,
                });
            }
            let Some(added) = added else {
                return Ok(false);
            };

            let where_ = match parts.where_ {
                Some(where_) => where_,
                None => {
                    let query = ensure_query(doc, &parts);
                    let where_ = doc.create_element(tags::WHERE);
                    doc.prepend_child(query, where_);
                    where_
                }
            };

            let existing = doc.child_elements(where_).next();
            match existing {
                Some(existing) => {
                    let and = doc.create_element(tags::AND);
                    doc.replace(existing, and);
                    doc.append_child(and, existing);
                    doc.append_child(and, added);
                }
                None => doc.append_child(where_, added),
            }

            Ok(true)
        })
    }

    /// Serialize filters and AND them onto the existing filters.
    ///
    /// # Errors
    ///
    /// - Return [`ViewError::Serialize`] if a filter cannot be serialized.
    /// - Return any error of [`View::add_filters`].
    pub fn add_filter_fragments(&mut self, filters: &[FilterFragment]) -> Result<()> {
        let camls = filters_to_caml_strings(filters)?;
        self.add_filters(&camls)
    }

    /// Update or create the row limit, or remove it with `None`.
    ///
    /// # Errors
    ///
    /// - Return [`ViewError::InvalidXml`] if view markup is invalid.
    /// - Return [`ViewError::MissingView`] if root element is not `View`.
    #[instrument(skip(self), level = "debug")]
    pub fn update_row_limit(&mut self, row_limit: Option<&RowLimit>) -> Result<()> {
        self.edit(Aspect::RowLimit, |doc, parts| {
            let Some(row_limit) = row_limit else {
                if let Some(old) = parts.row_limit {
                    doc.detach(old);
                }
                return Ok(true);
            };

            let node = match (parts.row_limit, parts.view) {
                (Some(node), _) => node,
                (None, Some(view)) => {
                    let node = doc.create_element(tags::ROW_LIMIT);
                    doc.append_child(view, node);
                    node
                }
                (None, None) => return Err(ViewError::MissingView),
            };

            update_boolean_attr(doc, node, attrs::PAGED, row_limit.is_per_page);
            doc.set_text_content(node, row_limit.row_limit.to_string());

            Ok(true)
        })
    }

    /// Strip client-side `id` attributes before handing markup to the server.
    ///
    /// Never fails. Views that do not parse are left alone.
    #[instrument(skip(self), level = "debug")]
    pub fn prepare_for_saving(&mut self) {
        let Some(Ok(doc)) = self.parsed_mut() else {
            return;
        };
        let Some(root) = doc.root() else {
            return;
        };

        let mut stripped = 0;
        for node in std::iter::once(root).chain(doc.descendants(root)) {
            if doc.remove_attribute(node, attrs::ID) {
                stripped += 1;
            }
        }

        if stripped > 0 {
            debug!("stripped {stripped} smart filter ids");
            self.dirty.mark(Aspect::Filters);
            self.modified = true;
        }
    }

    /// Order views by title, case-insensitively, with PowerApp views last.
    pub fn compare_to(&self, other: &View) -> Ordering {
        let power_app = |view: &View| view.kind == ViewKind::PowerApp;
        power_app(self)
            .cmp(&power_app(other))
            .then_with(|| self.title.to_lowercase().cmp(&other.title.to_lowercase()))
    }

    /// Apply a batch of edits.
    ///
    /// Order: clear filters, remove filters, add or update filters, sorts,
    /// grouping, single fields, field listing, and row limit.
    ///
    /// # Errors
    ///
    /// - Return [`ViewError`] of the first edit that fails. Edits applied
    ///   before it stay applied.
    #[instrument(skip(self, edit), level = "debug")]
    pub fn apply_edit(&mut self, edit: &ViewEdit) -> Result<()> {
        if edit.clear_filters {
            self.clear_filters()?;
        }

        for id in &edit.remove_filters {
            smart::remove_filter(self, id)?;
        }

        let mut added = Vec::new();
        for fragment in &edit.filters {
            match fragment {
                FilterFragment::Filter(filter) if filter.id.is_some() => {
                    smart::update_filter(self, filter)?;
                }
                fragment => added.push(fragment.clone()),
            }
        }
        self.add_filter_fragments(&added)?;

        for sort in &edit.sorts {
            self.update_sort(Some(&sort.field), sort.options)?;
        }

        if edit.clear_group_by {
            self.update_group_by(None)?;
        } else if let Some(group_by) = &edit.group_by {
            self.update_group_by(Some(group_by))?;
        }

        for field in &edit.fields {
            self.update_field(&field.name, field.index)?;
        }

        if let Some(names) = &edit.replace_fields {
            self.replace_fields(names)?;
        }

        if edit.clear_row_limit {
            self.update_row_limit(None)?;
        } else if let Some(row_limit) = &edit.row_limit {
            self.update_row_limit(Some(row_limit))?;
        }

        Ok(())
    }

    /// Run mutation against parsed tree, marking aspect dirty if it says so.
    pub(crate) fn edit<F>(&mut self, aspect: Aspect, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Document, DomParts) -> Result<bool>,
    {
        let doc = match self.parsed_mut() {
            Some(Ok(doc)) => doc,
            _ => {
                return Err(ViewError::InvalidXml {
                    reason: "view markup failed to parse".into(),
                })
            }
        };

        let parts = DomParts::locate(doc);
        if parts.view.is_none() {
            return Err(ViewError::MissingView);
        }

        if mutate(doc, parts)? {
            self.dirty.mark(aspect);
            self.modified = true;
        }

        Ok(())
    }

    fn parsed(&self) -> Result<&Document, &XmlError> {
        self.dom
            .get_or_init(|| parse_view_xml(&self.view_xml))
            .as_ref()
    }

    fn parsed_mut(&mut self) -> Option<Result<&mut Document, &mut XmlError>> {
        self.dom.get_or_init(|| parse_view_xml(&self.view_xml));
        self.dom.get_mut().map(Result::as_mut)
    }
}

fn parse_view_xml(xml: &str) -> Result<Document, XmlError> {
    xml_to_dom(xml).inspect_err(|err| warn!("view markup does not parse: {err}"))
}

/// Parse filter fragment holding exactly one filter element.
///
/// Comments and whitespace around the element are fine. The parsed node is
/// left detached.
fn parse_filter_fragment(doc: &mut Document, fragment: &str) -> Result<NodeId> {
    let nodes = doc
        .parse_fragment(fragment)
        .map_err(|err| ViewError::InvalidFilter {
            reason: err.to_string(),
        })?;

    let mut elements = Vec::new();
    for node in nodes {
        match doc.kind(node) {
            NodeKind::Element(_) => elements.push(node),
            NodeKind::Text(text) | NodeKind::CData(text) if !text.trim().is_empty() => {
                return Err(ViewError::InvalidFilter {
                    reason: format!("stray text {:?} in filter {fragment:?}", text.trim()),
                });
            }
            _ => {}
        }
    }

    match elements.as_slice() {
        [node] => Ok(*node),
        _ => Err(ViewError::InvalidFilter {
            reason: format!(
                "expected one filter element in {fragment:?}, found {}",
                elements.len()
            ),
        }),
    }
}

fn named(name: &str) -> OrderedField {
    OrderedField {
        field_name: name.to_owned(),
        is_ascending: None,
    }
}

/// Direct `FieldRef` children carrying a `Name`.
fn named_field_refs(doc: &Document, parent: NodeId) -> impl Iterator<Item = NodeId> + '_ {
    doc.children_named(parent, tags::FIELD_REF)
        .filter(move |field| get_attr(doc, *field, attrs::NAME).is_some())
}

fn find_field_ref(doc: &Document, parent: NodeId, name: &str) -> Option<NodeId> {
    doc.children_named(parent, tags::FIELD_REF)
        .find(|field| get_attr(doc, *field, attrs::NAME) == Some(name))
}

fn ensure_query(doc: &mut Document, parts: &DomParts) -> NodeId {
    if let Some(query) = parts.query {
        return query;
    }

    // INVARIANT: Callers checked that a View root exists.
    let query = doc.create_element(tags::QUERY);
    if let Some(view) = parts.view {
        doc.prepend_child(view, query);
    }
    query
}

fn ensure_query_child(doc: &mut Document, parts: &DomParts, name: &str) -> NodeId {
    let query = ensure_query(doc, parts);
    let child = doc.create_element(name);
    doc.append_child(query, child);
    child
}

fn ensure_view_fields(doc: &mut Document, parts: &DomParts) -> NodeId {
    if let Some(view_fields) = parts.view_fields {
        return view_fields;
    }

    let view_fields = doc.create_element(tags::VIEW_FIELDS);
    if let Some(view) = parts.view {
        doc.append_child(view, view_fields);
    }
    view_fields
}

/// View error types.
#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    /// View markup cannot be parsed.
    #[error("invalid view markup: {reason}")]
    InvalidXml { reason: String },

    /// Root element of view markup is not `View`.
    #[error("view markup has no <View> root element")]
    MissingView,

    /// Filter fragment cannot be parsed.
    #[error("invalid filter markup: {reason}")]
    InvalidFilter { reason: String },

    /// More than one element carries the same smart filter id.
    #[error("{count} filters share the id {id:?}")]
    AmbiguousFilterId { id: String, count: usize },

    /// Smart filter update needs an id.
    #[error("filter on {field_name:?} has no id")]
    MissingFilterId { field_name: String },

    /// Filter cannot be serialized.
    #[error(transparent)]
    Serialize(#[from] SerializeError),
}

/// Friendly result alias :3
type Result<T, E = ViewError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caml::{Filter, FilterOperator};
    use indoc::indoc;
    use simple_test_case::test_case;

    fn ordered(name: &str, is_ascending: bool) -> OrderedField {
        OrderedField::new(name, is_ascending)
    }

    fn sorts(view: &View) -> Option<Vec<OrderedField>> {
        view.effective_arrangement().unwrap().sorts
    }

    fn group_by(view: &View) -> Option<GroupBy> {
        view.effective_arrangement().unwrap().group_by
    }

    #[test]
    fn untouched_view_hands_back_original_markup() {
        let xml = r#"<View><Query><OrderBy><FieldRef Name="aaa" /></OrderBy></Query></View>"#;
        let view = View::new(xml);

        assert!(!view.has_parse_error());
        assert!(!view.is_dirty());
        assert_eq!(view.effective_view_xml(), xml);
    }

    #[test_case(""; "empty")]
    #[test_case("<View><Query></View>"; "mismatched")]
    #[test_case("not xml at all"; "plain text")]
    #[test]
    fn invalid_markup_sets_parse_error(xml: &str) {
        let mut view = View::new(xml);

        assert!(view.has_parse_error());
        assert!(view.effective_arrangement().is_err());
        assert!(view.effective_field_names().is_err());
        assert!(view.update_field("aaa", Some(0)).is_err());
        view.prepare_for_saving();
        assert_eq!(view.effective_view_xml(), xml);
        assert_eq!(view.effective_query_xml(true), "");
        assert!(!view.is_dirty());
    }

    #[test]
    fn mutating_non_view_root_fails() {
        let mut view = View::new("<List/>");
        assert!(matches!(
            view.update_row_limit(Some(&RowLimit::default())),
            Err(ViewError::MissingView)
        ));
    }

    #[test]
    fn update_sort_sequence() -> anyhow::Result<()> {
        let mut view = View::new(
            r#"<View><Query><OrderBy Override="TRUE"><FieldRef Name="aaa" Custom="x"/></OrderBy></Query></View>"#,
        );

        view.update_sort(Some(&ordered("aaa", false)), SortOptions::default())?;
        assert!(view.is_aspect_dirty(Aspect::Sorts));
        assert_eq!(sorts(&view), Some(vec![ordered("aaa", false)]));
        assert!(view.effective_view_xml().contains(r#"<FieldRef Name="aaa" Custom="x" Ascending="FALSE"/>"#));

        view.update_sort(Some(&ordered("bbb", true)), SortOptions::default())?;
        view.update_sort(
            Some(&ordered("ccc", true)),
            SortOptions {
                prepend: true,
                ..Default::default()
            },
        )?;
        assert_eq!(
            sorts(&view),
            Some(vec![ordered("ccc", true), ordered("aaa", false), ordered("bbb", true)])
        );

        view.update_sort(
            Some(&ordered("aaa", true)),
            SortOptions {
                remove_sort: true,
                ..Default::default()
            },
        )?;
        view.update_sort(
            Some(&ordered("zzz", true)),
            SortOptions {
                remove_sort: true,
                ..Default::default()
            },
        )?;
        assert_eq!(sorts(&view), Some(vec![ordered("ccc", true), ordered("bbb", true)]));

        view.update_sort(
            Some(&ordered("bbb", false)),
            SortOptions {
                overwrite_all: true,
                ..Default::default()
            },
        )?;
        assert_eq!(sorts(&view), Some(vec![ordered("bbb", false)]));
        assert!(view.effective_view_xml().contains(r#"<OrderBy Override="TRUE">"#));

        view.update_sort(
            None,
            SortOptions {
                overwrite_all: true,
                ..Default::default()
            },
        )?;
        assert_eq!(sorts(&view), None);

        Ok(())
    }

    #[test]
    fn removing_sort_without_order_by_stays_clean() -> anyhow::Result<()> {
        let mut view = View::new("<View><Query/></View>");
        view.update_sort(
            Some(&ordered("aaa", true)),
            SortOptions {
                remove_sort: true,
                ..Default::default()
            },
        )?;

        assert!(!view.is_dirty());
        Ok(())
    }

    #[test]
    fn update_sort_creates_query() -> anyhow::Result<()> {
        let mut view = View::new(r#"<View><ViewFields/></View>"#);
        view.update_sort(Some(&ordered("aaa", false)), SortOptions::default())?;

        assert_eq!(
            view.effective_view_xml(),
            r#"<View><Query><OrderBy><FieldRef Name="aaa" Ascending="FALSE"/></OrderBy></Query><ViewFields/></View>"#
        );
        Ok(())
    }

    #[test]
    fn update_group_by_sequence() -> anyhow::Result<()> {
        let mut view = View::new(indoc! {r#"
            <View><Query><GroupBy Collapse="TRUE"><FieldRef Name="aaa" Custom="1"/><FieldRef Name="bbb"/></GroupBy></Query></View>
        "#});

        let grouping = GroupBy {
            is_collapsed: Some(false),
            group1: ordered("aaa", false),
            group2: Some(ordered("bbb", true)),
        };
        view.update_group_by(Some(&grouping))?;
        assert_eq!(group_by(&view), Some(grouping));
        assert!(view.effective_view_xml().contains(r#"<FieldRef Name="aaa" Custom="1" Ascending="FALSE"/>"#));

        // Switching group2 also to bbb descending removes it.
        let grouping = GroupBy {
            is_collapsed: Some(true),
            group1: ordered("bbb", false),
            group2: Some(ordered("bbb", false)),
        };
        view.update_group_by(Some(&grouping))?;
        assert_eq!(
            group_by(&view),
            Some(GroupBy {
                is_collapsed: Some(true),
                group1: ordered("bbb", false),
                group2: None,
            })
        );

        let grouping = GroupBy {
            is_collapsed: Some(true),
            group1: ordered("", true),
            group2: None,
        };
        view.update_group_by(Some(&grouping))?;
        assert_eq!(group_by(&view), None);
        assert!(view.is_aspect_dirty(Aspect::GroupBy));
        assert!(!view.is_aspect_dirty(Aspect::Sorts));

        Ok(())
    }

    #[test]
    fn update_group_by_creates_and_clears() -> anyhow::Result<()> {
        let mut view = View::new("<View/>");
        let grouping = GroupBy {
            is_collapsed: Some(true),
            group1: ordered("aaa", true),
            group2: Some(ordered("bbb", false)),
        };

        view.update_group_by(Some(&grouping))?;
        assert_eq!(group_by(&view), Some(grouping));

        view.update_group_by(None)?;
        assert_eq!(view.effective_view_xml(), "<View><Query/></View>");

        Ok(())
    }

    #[test]
    fn update_field_inserts_in_order() -> anyhow::Result<()> {
        let mut view = View::new("<View><ViewFields/></View>");

        view.update_field("abc", Some(1))?;
        view.update_field("def", Some(0))?;
        assert_eq!(view.effective_field_names()?, vec!["def", "abc"]);

        view.update_field("def", Some(5))?;
        assert_eq!(view.effective_field_names()?, vec!["abc", "def"]);

        view.update_field("abc", None)?;
        view.update_field("nothing", None)?;
        assert_eq!(view.effective_field_names()?, vec!["def"]);

        Ok(())
    }

    #[test]
    fn update_field_is_idempotent() -> anyhow::Result<()> {
        let mut view = View::new(
            r#"<View><ViewFields><FieldRef Name="aaa"/><FieldRef Name="bbb" Custom="1"/><FieldRef Name="ccc"/></ViewFields></View>"#,
        );

        view.update_field("bbb", Some(0))?;
        let once = view.effective_view_xml();
        view.update_field("bbb", Some(0))?;

        assert_eq!(view.effective_view_xml(), once);
        assert!(view.is_aspect_dirty(Aspect::FieldNames));
        assert_eq!(
            once,
            r#"<View><ViewFields><FieldRef Name="bbb" Custom="1"/><FieldRef Name="aaa"/><FieldRef Name="ccc"/></ViewFields></View>"#
        );

        Ok(())
    }

    #[test]
    fn update_field_creates_view_fields() -> anyhow::Result<()> {
        let mut view = View::new("<View><Query/></View>");
        view.update_field("aaa", Some(0))?;

        assert_eq!(
            view.effective_view_xml(),
            r#"<View><Query/><ViewFields><FieldRef Name="aaa"/></ViewFields></View>"#
        );
        Ok(())
    }

    #[test]
    fn replace_fields_reuses_elements() -> anyhow::Result<()> {
        let mut view = View::new(
            r#"<View><ViewFields><FieldRef Name="aaa" Explicit="TRUE"/><FieldRef Name="bbb"/></ViewFields></View>"#,
        );

        view.replace_fields(&[])?;
        assert!(!view.is_dirty());

        view.replace_fields(&["ccc".into(), "aaa".into()])?;
        assert_eq!(
            view.effective_view_xml(),
            r#"<View><ViewFields><FieldRef Name="ccc"/><FieldRef Name="aaa" Explicit="TRUE"/></ViewFields></View>"#
        );

        Ok(())
    }

    #[test]
    fn add_filters_ands_onto_existing() -> anyhow::Result<()> {
        let mut view = View::new(
            r#"<View><Query><Where><Eq><FieldRef Name="aaa"/><Value Type="Text">1</Value></Eq></Where></Query></View>"#,
        );

        view.add_filters(&[
            r#"<IsNull><FieldRef Name="bbb"/></IsNull>"#,
            r#"<Neq><FieldRef Name="ccc"/><Value Type="Number">2</Value></Neq>"#,
        ])?;

        assert_eq!(
            view.effective_arrangement()?.filters,
            Some(vec![
                Filter::new("aaa", FilterOperator::Eq, ["1"]).with_type("Text"),
                Filter::new("bbb", FilterOperator::IsNull, [""]),
                Filter::new("ccc", FilterOperator::Neq, ["2"]).with_type("Number"),
            ])
        );
        assert_eq!(
            view.effective_query_xml(false),
            concat!(
                r#"<Where><And><Eq><FieldRef Name="aaa"/><Value Type="Text">1</Value></Eq>"#,
                r#"<And><IsNull><FieldRef Name="bbb"/></IsNull><Neq><FieldRef Name="ccc"/><Value Type="Number">2</Value></Neq></And>"#,
                r#"</And></Where>"#,
            )
        );

        Ok(())
    }

    #[test]
    fn add_filters_creates_where_first_in_query() -> anyhow::Result<()> {
        let mut view = View::new(r#"<View><Query><OrderBy/></Query></View>"#);
        view.add_filter_fragments(&[Filter::new("aaa", FilterOperator::Eq, ["x"]).into()])?;

        assert_eq!(
            view.effective_query_xml(true),
            r#"<Query><Where><Eq><FieldRef Name="aaa"/><Value>x</Value></Eq></Where><OrderBy/></Query>"#
        );
        Ok(())
    }

    #[test]
    fn add_malformed_filter_leaves_view_untouched() {
        let mut view = View::new("<View/>");
        assert!(matches!(
            view.add_filters(&["<Eq>"]),
            Err(ViewError::InvalidFilter { .. })
        ));
        assert!(!view.is_dirty());
        assert_eq!(view.effective_query_xml(true), "");
    }

    #[test]
    fn add_filters_into_bare_view_nests_under_and() -> anyhow::Result<()> {
        let mut view = View::new("<View/>");
        view.add_filters(&[
            r#"<IsNull><FieldRef Name="a"/></IsNull>"#,
            r#"<IsNotNull><FieldRef Name="b"/></IsNotNull>"#,
        ])?;

        assert_eq!(
            view.effective_query_xml(false),
            concat!(
                r#"<Where><And><IsNull><FieldRef Name="a"/></IsNull>"#,
                r#"<IsNotNull><FieldRef Name="b"/></IsNotNull></And></Where>"#,
            )
        );
        Ok(())
    }

    #[test_case(r#"<IsNull><FieldRef Name="a"/></IsNull><IsNull><FieldRef Name="b"/></IsNull>"#; "two elements")]
    #[test_case("just text"; "text only")]
    #[test_case(r#"<IsNull><FieldRef Name="a"/></IsNull>tail"#; "trailing text")]
    #[test_case("<!-- nothing -->"; "comment only")]
    #[test]
    fn add_filter_without_single_element_fails(fragment: &str) {
        let xml = r#"<View><Query><Where><Eq><FieldRef Name="x"/><Value>1</Value></Eq></Where></Query></View>"#;
        let mut view = View::new(xml);

        assert!(matches!(
            view.add_filters(&[r#"<IsNull><FieldRef Name="c"/></IsNull>"#, fragment]),
            Err(ViewError::InvalidFilter { .. })
        ));
        assert!(!view.is_dirty());
        assert_eq!(view.effective_view_xml(), xml);
    }

    #[test]
    fn edits_survive_clearing_dirty_flags() -> anyhow::Result<()> {
        let mut view = View::new(r#"<View><RowLimit>30</RowLimit></View>"#);
        view.update_field("aaa", Some(0))?;
        view.set_is_dirty(false);

        assert!(!view.is_dirty());
        let reloaded = View::new(view.effective_view_xml());
        assert_eq!(reloaded.effective_field_names()?, vec!["aaa"]);
        Ok(())
    }

    #[test]
    fn clear_filters_removes_where() -> anyhow::Result<()> {
        let mut view = View::new(r#"<View><Query><Where><IsNull><FieldRef Name="a"/></IsNull></Where></Query></View>"#);
        view.clear_filters()?;

        assert_eq!(view.effective_view_xml(), "<View><Query/></View>");
        assert!(view.is_aspect_dirty(Aspect::Filters));
        Ok(())
    }

    #[test]
    fn update_row_limit_updates_or_creates() -> anyhow::Result<()> {
        let mut view = View::new(r#"<View><RowLimit Paged="TRUE">30</RowLimit></View>"#);
        view.update_row_limit(Some(&RowLimit {
            row_limit: 100,
            is_per_page: Some(false),
        }))?;
        assert_eq!(view.effective_view_xml(), r#"<View><RowLimit Paged="FALSE">100</RowLimit></View>"#);

        let mut view = View::new("<View/>");
        view.update_row_limit(Some(&RowLimit {
            row_limit: 5,
            is_per_page: Some(true),
        }))?;
        assert_eq!(view.effective_view_xml(), r#"<View><RowLimit Paged="TRUE">5</RowLimit></View>"#);

        view.update_row_limit(None)?;
        assert_eq!(view.effective_view_xml(), "<View/>");
        Ok(())
    }

    #[test]
    fn prepare_for_saving_strips_ids() {
        let mut view = View::new(indoc! {r#"
            <View id="v"><Query><Where><Or id="a"><Eq id="b"><FieldRef Name="x"/><Value>1</Value></Eq><IsNull><FieldRef Name="x" id="c"/></IsNull></Or></Where></Query></View>
        "#});

        view.prepare_for_saving();
        assert_eq!(
            view.effective_view_xml(),
            r#"<View><Query><Where><Or><Eq><FieldRef Name="x"/><Value>1</Value></Eq><IsNull><FieldRef Name="x"/></IsNull></Or></Where></Query></View>"#
        );
    }

    #[test]
    fn clear_xml_overrides_restores_original() -> anyhow::Result<()> {
        let xml = r#"<View><ViewFields><FieldRef Name="aaa"/></ViewFields></View>"#;
        let mut view = View::new(xml);

        view.update_field("bbb", Some(0))?;
        assert!(view.is_dirty());

        view.clear_xml_overrides();
        assert!(!view.is_dirty());
        assert_eq!(view.effective_field_names()?, vec!["aaa"]);

        view.update_field("ccc", Some(9))?;
        view.set_is_dirty(false);
        assert_eq!(
            view.effective_view_xml(),
            r#"<View><ViewFields><FieldRef Name="aaa"/><FieldRef Name="ccc"/></ViewFields></View>"#
        );
        assert_eq!(view.effective_field_names()?, vec!["aaa", "ccc"]);

        view.clear_xml_overrides();
        assert_eq!(view.effective_view_xml(), xml);

        Ok(())
    }

    #[test]
    fn compare_views_by_title_then_kind() {
        let view = |title: &str, kind: ViewKind| {
            View::from_descriptor(ViewDescriptor {
                title: title.into(),
                kind,
                view_xml: "<View/>".into(),
                ..Default::default()
            })
        };

        assert_eq!(view("abc", ViewKind::Html).compare_to(&view("ABD", ViewKind::Grid)), Ordering::Less);
        assert_eq!(view("Same", ViewKind::Html).compare_to(&view("sAME", ViewKind::Html)), Ordering::Equal);
        assert_eq!(view("aaa", ViewKind::PowerApp).compare_to(&view("zzz", ViewKind::Html)), Ordering::Greater);
        assert_eq!(view("zzz", ViewKind::Html).compare_to(&view("aaa", ViewKind::PowerApp)), Ordering::Less);
        assert_eq!(view("b", ViewKind::PowerApp).compare_to(&view("a", ViewKind::PowerApp)), Ordering::Greater);
    }
}
