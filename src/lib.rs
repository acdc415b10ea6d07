// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Read and edit SharePoint list views.
//!
//! List views are defined through CAML markup. Camlview turns that markup
//! into a semantic arrangement of sorts, grouping, filters, shown fields, and
//! row limit, and lets callers edit a view in place while every attribute
//! and element it does not understand survives untouched.
//!
//! # Layers
//!
//! 1. [`xml`] is a small owned XML tree that keeps attribute order.
//! 2. [`caml`] holds the vocabulary, its parser, and its serializer.
//! 3. [`view`] is the editable view with per-aspect dirty tracking.
//! 4. [`config`] is the TOML layout of batched view edits.
//!
//! ```no_run
//! use camlview::{OrderedField, SortOptions, View};
//!
//! let mut view = View::new(r#"<View><Query/><ViewFields/></View>"#);
//! view.update_sort(Some(&OrderedField::new("Modified", false)), SortOptions::default())?;
//! view.update_field("Title", Some(0))?;
//! println!("{}", view.effective_view_xml());
//! # Ok::<(), camlview::ViewError>(())
//! ```

pub mod caml;
pub mod config;
pub mod view;
pub mod xml;

#[doc(inline)]
pub use caml::{
    Filter, FilterOperator, GroupBy, LogicalOperator, OrderedField, RowLimit, ViewArrangeInfo,
};

#[doc(inline)]
pub use config::{ConfigError, ViewEdit};

#[doc(inline)]
pub use view::{Aspect, SortOptions, View, ViewDescriptor, ViewError, ViewKind};

#[doc(inline)]
pub use xml::{Document, XmlError};
