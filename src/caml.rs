// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! CAML view vocabulary.
//!
//! __CAML__ (Collaborative Application Markup Language) is the XML dialect
//! SharePoint uses to define list views. A view definition says which fields
//! are shown, how items are sorted, grouped, and filtered, and how many rows
//! make up a page:
//!
//! ```xml
//! <View>
//!   <Query>
//!     <Where><Eq><FieldRef Name="Status"/><Value Type="Text">Open</Value></Eq></Where>
//!     <OrderBy><FieldRef Name="Modified" Ascending="FALSE"/></OrderBy>
//!     <GroupBy Collapse="TRUE"><FieldRef Name="Owner"/></GroupBy>
//!   </Query>
//!   <ViewFields><FieldRef Name="Title"/></ViewFields>
//!   <RowLimit Paged="TRUE">30</RowLimit>
//! </View>
//! ```
//!
//! This module holds the semantic types extracted from that markup. See
//! [`parse`] for how markup turns into these types, [`serialize`] for the way
//! back, and [`util`] for the low-level tree helpers both of them share.
//!
//! # Case Sensitivity
//!
//! Tag names and key attribute names are case-sensitive. Legacy servers
//! produce views with `<fieldref>` or `collapse=` every now and then, and
//! those are treated as if they were not there at all.

pub mod parse;
pub mod serialize;
pub mod util;

use crate::xml::{Document, NodeId};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Tag names of the CAML vocabulary.
pub mod tags {
    pub const VIEW: &str = "View";
    pub const QUERY: &str = "Query";
    pub const WHERE: &str = "Where";
    pub const ORDER_BY: &str = "OrderBy";
    pub const GROUP_BY: &str = "GroupBy";
    pub const VIEW_FIELDS: &str = "ViewFields";
    pub const ROW_LIMIT: &str = "RowLimit";
    pub const AND: &str = "And";
    pub const OR: &str = "Or";
    pub const FIELD_REF: &str = "FieldRef";
    pub const VALUE: &str = "Value";
    pub const VALUES: &str = "Values";
    pub const TODAY: &str = "Today";
    pub const PARSER_ERROR: &str = "parsererror";
}

/// Attribute names of the CAML vocabulary.
pub mod attrs {
    pub const NAME: &str = "Name";
    pub const ASCENDING: &str = "Ascending";
    pub const COLLAPSE: &str = "Collapse";
    pub const TYPE: &str = "Type";
    pub const INCLUDE_TIME_VALUE: &str = "IncludeTimeValue";
    pub const PAGED: &str = "Paged";
    pub const OFFSET: &str = "Offset";
    pub const OFFSET_DAYS: &str = "OffsetDays";
    pub const LOOKUP_ID: &str = "LookupId";
    pub const ID: &str = "id";
}

/// Comparison operator of a single filter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum FilterOperator {
    #[default]
    Eq,
    Neq,
    Gt,
    Geq,
    Lt,
    Leq,
    BeginsWith,
    Contains,
    Includes,
    NotIncludes,
    IsNull,
    IsNotNull,
    Membership,
    In,
}

impl FilterOperator {
    /// Every operator a filter can carry.
    pub const ALL: [FilterOperator; 14] = [
        FilterOperator::Eq,
        FilterOperator::Neq,
        FilterOperator::Gt,
        FilterOperator::Geq,
        FilterOperator::Lt,
        FilterOperator::Leq,
        FilterOperator::BeginsWith,
        FilterOperator::Contains,
        FilterOperator::Includes,
        FilterOperator::NotIncludes,
        FilterOperator::IsNull,
        FilterOperator::IsNotNull,
        FilterOperator::Membership,
        FilterOperator::In,
    ];

    /// CAML tag name of operator.
    pub fn tag(self) -> &'static str {
        match self {
            FilterOperator::Eq => "Eq",
            FilterOperator::Neq => "Neq",
            FilterOperator::Gt => "Gt",
            FilterOperator::Geq => "Geq",
            FilterOperator::Lt => "Lt",
            FilterOperator::Leq => "Leq",
            FilterOperator::BeginsWith => "BeginsWith",
            FilterOperator::Contains => "Contains",
            FilterOperator::Includes => "Includes",
            FilterOperator::NotIncludes => "NotIncludes",
            FilterOperator::IsNull => "IsNull",
            FilterOperator::IsNotNull => "IsNotNull",
            FilterOperator::Membership => "Membership",
            FilterOperator::In => "In",
        }
    }

    /// Look up operator by exact CAML tag name.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.tag() == tag)
    }

    /// Operator compares a `FieldRef` against exactly one `Value`.
    pub fn is_binary(self) -> bool {
        !matches!(
            self,
            FilterOperator::IsNull
                | FilterOperator::IsNotNull
                | FilterOperator::Membership
                | FilterOperator::In
        )
    }
}

impl Display for FilterOperator {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.tag())
    }
}

impl FromStr for FilterOperator {
    type Err = UnknownOperator;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        Self::from_tag(tag).ok_or_else(|| UnknownOperator(tag.to_owned()))
    }
}

/// Tag name is not a filter operator.
#[derive(Clone, Debug, thiserror::Error)]
#[error("unknown filter operator {0:?}")]
pub struct UnknownOperator(pub String);

/// Logical operator joining filters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

impl LogicalOperator {
    pub fn tag(self) -> &'static str {
        match self {
            LogicalOperator::And => tags::AND,
            LogicalOperator::Or => tags::OR,
        }
    }
}

/// Kind of node the filter grammar can meet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterNodeKind {
    /// `Eq`, `Neq`, `Gt`, `Geq`, `Lt`, `Leq`, `BeginsWith`, `Contains`,
    /// `Includes`, or `NotIncludes`.
    Compare(FilterOperator),
    /// `IsNull` or `IsNotNull`.
    NullCheck(FilterOperator),
    Membership,
    In,
    Or,
    And,
    Unrecognized,
}

impl FilterNodeKind {
    /// Classify tag name of a filter node.
    pub fn of(tag: &str) -> Self {
        match tag {
            tags::AND => FilterNodeKind::And,
            tags::OR => FilterNodeKind::Or,
            _ => match FilterOperator::from_tag(tag) {
                Some(FilterOperator::In) => FilterNodeKind::In,
                Some(FilterOperator::Membership) => FilterNodeKind::Membership,
                Some(op @ (FilterOperator::IsNull | FilterOperator::IsNotNull)) => {
                    FilterNodeKind::NullCheck(op)
                }
                Some(op) => FilterNodeKind::Compare(op),
                None => FilterNodeKind::Unrecognized,
            },
        }
    }
}

/// One flattened comparison predicate.
///
/// An `In` filter, or one built by flattening a chain of `Or` nodes, holds
/// several values for the same field. A filter coming from `IsNotNull` holds
/// no values. A filter coming from `IsNull` holds one empty value.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Filter {
    /// Internal name of the field being compared.
    pub field_name: String,

    /// Value type, e.g., "Text", "DateTime", "Lookup".
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,

    /// Comparison operator.
    pub operator: FilterOperator,

    /// Values to compare against.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,

    /// Compare lookup values by their internal identifier.
    #[serde(default, skip_serializing_if = "is_false")]
    pub lookup_id: bool,

    /// Compare date values including their time portion.
    #[serde(default, skip_serializing_if = "is_false")]
    pub include_time_value: bool,

    /// Client-side smart filter identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Filter {
    /// Construct new filter.
    pub fn new(
        field_name: impl Into<String>,
        operator: FilterOperator,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            operator,
            values: values.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Set value type.
    pub fn with_type(mut self, field_type: impl Into<String>) -> Self {
        self.field_type = Some(field_type.into());
        self
    }

    /// Set smart filter identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Mark filter as comparing lookup identifiers.
    pub fn with_lookup_id(mut self) -> Self {
        self.lookup_id = true;
        self
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Field reference with sort direction.
///
/// Used for both sorting and grouping.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OrderedField {
    pub field_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_ascending: Option<bool>,
}

impl OrderedField {
    /// Construct new ordered field with explicit direction.
    pub fn new(field_name: impl Into<String>, is_ascending: bool) -> Self {
        Self {
            field_name: field_name.into(),
            is_ascending: Some(is_ascending),
        }
    }
}

/// Grouping of a view.
///
/// CAML supports exactly two grouping levels.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GroupBy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_collapsed: Option<bool>,

    pub group1: OrderedField,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group2: Option<OrderedField>,
}

/// Row limit of a view.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RowLimit {
    pub row_limit: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_per_page: Option<bool>,
}

/// Semantic arrangement of a view.
///
/// Recomputed from the tree each time it is requested.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ViewArrangeInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_names: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_limit: Option<RowLimit>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<GroupBy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sorts: Option<Vec<OrderedField>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<Filter>>,
}

/// Located structural parts of a view document.
///
/// # Invariant
///
/// - `query` is a direct child of `view`.
/// - `where_`, `order_by`, and `group_by` are direct children of `query`.
/// - `row_limit` is a direct child of `view`.
/// - `view_fields` is the first `ViewFields` anywhere under `view`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DomParts {
    pub view: Option<NodeId>,
    pub query: Option<NodeId>,
    pub where_: Option<NodeId>,
    pub order_by: Option<NodeId>,
    pub group_by: Option<NodeId>,
    pub view_fields: Option<NodeId>,
    pub row_limit: Option<NodeId>,
}

impl DomParts {
    /// Locate view parts in document.
    ///
    /// Root element must be named `View`, otherwise nothing is located.
    pub fn locate(doc: &Document) -> Self {
        let Some(view) = doc.root().filter(|root| doc.is_element_named(*root, tags::VIEW))
        else {
            return Self::default();
        };

        let query = doc.first_child_named(view, tags::QUERY);
        let in_query = |name: &str| query.and_then(|query| doc.first_child_named(query, name));

        Self {
            view: Some(view),
            query,
            where_: in_query(tags::WHERE),
            order_by: in_query(tags::ORDER_BY),
            group_by: in_query(tags::GROUP_BY),
            view_fields: doc.first_descendant_named(view, tags::VIEW_FIELDS),
            row_limit: doc.first_child_named(view, tags::ROW_LIMIT),
        }
    }
}
