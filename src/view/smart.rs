// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Smart filter management.
//!
//! A __smart filter__ is a filter element under `Where` that carries a
//! client-side `id` attribute. The id lets callers look up, replace, or
//! remove that one filter without knowing where it sits in the `And`/`Or`
//! tree. Ids are not part of CAML, so [`View::prepare_for_saving`] strips
//! them before markup goes back to the server.
//!
//! Two elements sharing an id make every lookup fail with
//! [`ViewError::AmbiguousFilterId`].

use crate::{
    caml::{
        attrs,
        parse::parse_filter,
        serialize::{build_filter, filter_to_caml},
        DomParts, Filter, FilterNodeKind,
    },
    view::{Aspect, Result, View, ViewError},
    xml::{Document, NodeId},
};

use std::collections::HashMap;
use tracing::{debug, instrument};

/// Look up smart filter by id.
///
/// Yields `None` if no element carries the id, or if the element does not
/// flatten into exactly one filter, e.g., an `And` wrapping two leaves.
///
/// # Errors
///
/// - Return [`ViewError::InvalidXml`] if view markup is invalid.
/// - Return [`ViewError::AmbiguousFilterId`] if id is not unique.
pub fn get_filter(view: &View, id: &str) -> Result<Option<Filter>> {
    let doc = view.document()?;
    let Some(node) = find_by_id(doc, &DomParts::locate(doc), id)? else {
        return Ok(None);
    };

    Ok(parse_filter(doc, node)
        .filter(|filters| filters.len() == 1)
        .and_then(|mut filters| filters.pop()))
}

/// Replace smart filter in place, or AND it onto the existing filters.
///
/// # Errors
///
/// - Return [`ViewError::MissingFilterId`] if filter has no id.
/// - Return [`ViewError::AmbiguousFilterId`] if id is not unique.
/// - Return [`ViewError::Serialize`] if filter cannot be serialized.
/// - Return [`ViewError::InvalidXml`] if view markup is invalid.
#[instrument(skip(view), level = "debug")]
pub fn update_filter(view: &mut View, filter: &Filter) -> Result<()> {
    let Some(id) = filter.id.as_deref() else {
        return Err(ViewError::MissingFilterId {
            field_name: filter.field_name.clone(),
        });
    };

    let existing = {
        let doc = view.document()?;
        find_by_id(doc, &DomParts::locate(doc), id)?
    };

    match existing {
        Some(old) => view.edit(Aspect::Filters, |doc, _| {
            let fresh = build_filter(doc, filter)?;
            doc.replace(old, fresh);
            Ok(true)
        }),
        None => {
            debug!("no smart filter {id:?} yet, adding it");
            view.add_filters(&[filter_to_caml(filter)?])
        }
    }
}

/// Remove smart filter by id.
///
/// An `And` or `Or` left with a single child is replaced by that child. One
/// left with no children at all is removed as well, all the way up to
/// `Where`. Unknown ids are ignored.
///
/// # Errors
///
/// - Return [`ViewError::AmbiguousFilterId`] if id is not unique.
/// - Return [`ViewError::InvalidXml`] if view markup is invalid.
#[instrument(skip(view), level = "debug")]
pub fn remove_filter(view: &mut View, id: &str) -> Result<()> {
    let existing = {
        let doc = view.document()?;
        find_by_id(doc, &DomParts::locate(doc), id)?
    };

    let Some(node) = existing else {
        debug!("no smart filter {id:?} to remove");
        return Ok(());
    };

    view.edit(Aspect::Filters, |doc, _| {
        remove_and_collapse(doc, node);
        Ok(true)
    })
}

/// Flatten every smart filter of the view.
///
/// Nested smart filters are listed on their own as well as through their
/// enclosing one. Yields `None` if the view has no `Where` element.
///
/// # Errors
///
/// - Return [`ViewError::AmbiguousFilterId`] if any id is not unique.
/// - Return [`ViewError::InvalidXml`] if view markup is invalid.
pub fn get_all_smart_filters(view: &View) -> Result<Option<Vec<Filter>>> {
    let doc = view.document()?;
    let Some(where_) = DomParts::locate(doc).where_ else {
        return Ok(None);
    };

    let smart = with_ids(doc, where_);
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for (_, id) in &smart {
        *counts.entry(*id).or_default() += 1;
    }
    if let Some((id, count)) = counts.into_iter().find(|(_, count)| *count > 1) {
        return Err(ViewError::AmbiguousFilterId {
            id: id.to_owned(),
            count,
        });
    }

    Ok(Some(
        smart
            .into_iter()
            .filter_map(|(node, _)| parse_filter(doc, node))
            .flatten()
            .collect(),
    ))
}

/// Elements under `Where` carrying an id, in document order.
fn with_ids(doc: &Document, where_: NodeId) -> Vec<(NodeId, &str)> {
    doc.descendants(where_)
        .into_iter()
        .filter_map(|node| doc.attribute(node, attrs::ID).map(|id| (node, id)))
        .collect()
}

fn find_by_id(doc: &Document, parts: &DomParts, id: &str) -> Result<Option<NodeId>> {
    let Some(where_) = parts.where_ else {
        return Ok(None);
    };

    let matches: Vec<NodeId> = with_ids(doc, where_)
        .into_iter()
        .filter_map(|(node, found)| (found == id).then_some(node))
        .collect();

    match matches.as_slice() {
        [] => Ok(None),
        [node] => Ok(Some(*node)),
        _ => Err(ViewError::AmbiguousFilterId {
            id: id.to_owned(),
            count: matches.len(),
        }),
    }
}

fn remove_and_collapse(doc: &mut Document, node: NodeId) {
    let parent = doc.parent(node);
    doc.detach(node);

    let Some(parent) = parent else {
        return;
    };
    if !matches!(
        doc.name(parent).map(FilterNodeKind::of),
        Some(FilterNodeKind::And | FilterNodeKind::Or)
    ) {
        return;
    }

    let remaining: Vec<NodeId> = doc.child_elements(parent).collect();
    match remaining.as_slice() {
        [] => remove_and_collapse(doc, parent),
        [only] => doc.replace(parent, *only),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caml::FilterOperator;
    use simple_test_case::test_case;

    const SMART: &str = concat!(
        r#"<View><Query><Where><And>"#,
        r#"<Eq id="a"><FieldRef Name="aaa"/><Value Type="Text">1</Value></Eq>"#,
        r#"<Or><Eq id="b"><FieldRef Name="bbb"/><Value Type="Text">2</Value></Eq>"#,
        r#"<Contains id="c"><FieldRef Name="ccc"/><Value Type="Text">3</Value></Contains></Or>"#,
        r#"</And></Where></Query></View>"#,
    );

    fn where_xml(view: &View) -> String {
        view.effective_query_xml(false)
    }

    #[test_case("a", Some(Filter::new("aaa", FilterOperator::Eq, ["1"]).with_type("Text").with_id("a")); "leaf")]
    #[test_case("c", Some(Filter::new("ccc", FilterOperator::Contains, ["3"]).with_type("Text").with_id("c")); "nested leaf")]
    #[test_case("zzz", None; "unknown id")]
    #[test]
    fn get_filter_by_id(id: &str, expect: Option<Filter>) -> anyhow::Result<()> {
        let view = View::new(SMART);
        assert_eq!(get_filter(&view, id)?, expect);

        Ok(())
    }

    #[test]
    fn get_filter_of_multi_filter_element() -> anyhow::Result<()> {
        let view = View::new(concat!(
            r#"<View><Query><Where><And id="x">"#,
            r#"<IsNull><FieldRef Name="aaa"/></IsNull><IsNull><FieldRef Name="bbb"/></IsNull>"#,
            r#"</And></Where></Query></View>"#,
        ));

        assert_eq!(get_filter(&view, "x")?, None);
        Ok(())
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut view = View::new(concat!(
            r#"<View><Query><Where><Or>"#,
            r#"<IsNull id="d"><FieldRef Name="aaa"/></IsNull><IsNotNull id="d"><FieldRef Name="aaa"/></IsNotNull>"#,
            r#"</Or></Where></Query></View>"#,
        ));

        assert!(matches!(
            get_filter(&view, "d"),
            Err(ViewError::AmbiguousFilterId { count: 2, .. })
        ));
        assert!(matches!(
            get_all_smart_filters(&view),
            Err(ViewError::AmbiguousFilterId { .. })
        ));
        assert!(matches!(
            remove_filter(&mut view, "d"),
            Err(ViewError::AmbiguousFilterId { .. })
        ));
        let filter = Filter::new("aaa", FilterOperator::IsNull, [""]).with_id("d");
        assert!(matches!(
            update_filter(&mut view, &filter),
            Err(ViewError::AmbiguousFilterId { .. })
        ));
        assert!(!view.is_dirty());
    }

    #[test]
    fn remove_filter_collapses_or() -> anyhow::Result<()> {
        let mut view = View::new(SMART);
        remove_filter(&mut view, "b")?;

        assert_eq!(
            where_xml(&view),
            concat!(
                r#"<Where><And>"#,
                r#"<Eq id="a"><FieldRef Name="aaa"/><Value Type="Text">1</Value></Eq>"#,
                r#"<Contains id="c"><FieldRef Name="ccc"/><Value Type="Text">3</Value></Contains>"#,
                r#"</And></Where>"#,
            )
        );
        assert!(view.is_aspect_dirty(Aspect::Filters));

        Ok(())
    }

    #[test]
    fn remove_filters_down_to_nothing() -> anyhow::Result<()> {
        let mut view = View::new(SMART);
        remove_filter(&mut view, "b")?;
        remove_filter(&mut view, "a")?;
        assert_eq!(
            where_xml(&view),
            r#"<Where><Contains id="c"><FieldRef Name="ccc"/><Value Type="Text">3</Value></Contains></Where>"#
        );

        remove_filter(&mut view, "c")?;
        assert_eq!(where_xml(&view), "<Where/>");
        assert_eq!(view.effective_arrangement()?.filters, None);

        Ok(())
    }

    #[test]
    fn remove_unknown_filter_is_ignored() -> anyhow::Result<()> {
        let mut view = View::new(SMART);
        remove_filter(&mut view, "zzz")?;

        assert!(!view.is_dirty());
        Ok(())
    }

    #[test]
    fn update_filter_replaces_in_place() -> anyhow::Result<()> {
        let mut view = View::new(SMART);
        let filter = Filter::new("bbb", FilterOperator::Eq, ["x", "y"])
            .with_type("Text")
            .with_id("b");
        update_filter(&mut view, &filter)?;

        assert_eq!(
            where_xml(&view),
            concat!(
                r#"<Where><And>"#,
                r#"<Eq id="a"><FieldRef Name="aaa"/><Value Type="Text">1</Value></Eq>"#,
                r#"<Or><In id="b"><FieldRef Name="bbb"/><Values><Value Type="Text">x</Value><Value Type="Text">y</Value></Values></In>"#,
                r#"<Contains id="c"><FieldRef Name="ccc"/><Value Type="Text">3</Value></Contains></Or>"#,
                r#"</And></Where>"#,
            )
        );
        assert_eq!(
            get_filter(&view, "b")?,
            Some(
                Filter::new("bbb", FilterOperator::In, ["x", "y"])
                    .with_type("Text")
                    .with_id("b")
            )
        );

        Ok(())
    }

    #[test]
    fn update_unknown_filter_adds_it() -> anyhow::Result<()> {
        let mut view = View::new("<View><Query/></View>");
        let filter = Filter::new("aaa", FilterOperator::Geq, ["[Today]-2"])
            .with_type("DateTime")
            .with_id("n");
        update_filter(&mut view, &filter)?;

        assert_eq!(
            where_xml(&view),
            r#"<Where><Geq id="n"><FieldRef Name="aaa"/><Value Type="DateTime"><Today OffsetDays="-2"/></Value></Geq></Where>"#
        );
        assert_eq!(get_filter(&view, "n")?, Some(filter));

        Ok(())
    }

    #[test]
    fn update_filter_needs_id() {
        let mut view = View::new(SMART);
        let filter = Filter::new("aaa", FilterOperator::Eq, ["1"]);

        assert!(matches!(
            update_filter(&mut view, &filter),
            Err(ViewError::MissingFilterId { .. })
        ));
    }

    #[test]
    fn update_filter_rejects_unserializable() {
        let mut view = View::new(SMART);
        let filter = Filter::new("aaa", FilterOperator::Eq, Vec::<String>::new()).with_id("a");

        assert!(matches!(
            update_filter(&mut view, &filter),
            Err(ViewError::Serialize(_))
        ));
        assert!(!view.is_dirty());
    }

    #[test]
    fn list_all_smart_filters() -> anyhow::Result<()> {
        let view = View::new(SMART);

        assert_eq!(
            get_all_smart_filters(&view)?,
            Some(vec![
                Filter::new("aaa", FilterOperator::Eq, ["1"]).with_type("Text").with_id("a"),
                Filter::new("bbb", FilterOperator::Eq, ["2"]).with_type("Text").with_id("b"),
                Filter::new("ccc", FilterOperator::Contains, ["3"]).with_type("Text").with_id("c"),
            ])
        );
        assert_eq!(get_all_smart_filters(&View::new("<View/>"))?, None);

        Ok(())
    }
}
