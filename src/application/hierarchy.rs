//! Hierarchy resolution: flat overview/family/detail collections in, one
//! consistent `Maps` snapshot out. Pure computation, no I/O.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::domain::items::{RawItem, fields};
use crate::domain::maps::{Entry, Maps};

/// Raw collections fetched for a single rebuild.
#[derive(Debug, Clone, Default)]
pub struct Collections {
    pub overview: Vec<RawItem>,
    pub family: Vec<RawItem>,
    pub detail: Vec<RawItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FamilyNode {
    slug: String,
    /// Preferred ancestor first; never holds duplicates.
    parent_ids: Vec<String>,
}

impl FamilyNode {
    fn push_parent(&mut self, id: &str) {
        if !self.parent_ids.iter().any(|p| p == id) {
            self.parent_ids.push(id.to_string());
        }
    }

    fn prefer_parent(&mut self, id: &str) {
        if self.parent_ids.first().is_some_and(|p| p == id) {
            return;
        }
        self.parent_ids.retain(|p| p != id);
        self.parent_ids.insert(0, id.to_string());
    }
}

/// Lookup tables built once per rebuild.
#[derive(Debug, Default)]
pub struct Hierarchy {
    overview_slugs: HashMap<String, String>,
    families: HashMap<String, FamilyNode>,
    /// detail id → overview id listing it under `extra-products`.
    extra_of: HashMap<String, String>,
}

impl Hierarchy {
    pub fn build(collections: &Collections) -> Self {
        let overview_slugs = collections
            .overview
            .iter()
            .filter_map(|o| o.resolved_slug().map(|s| (o.id.clone(), s.to_string())))
            .collect();

        let mut families: HashMap<String, FamilyNode> = HashMap::new();
        for family in &collections.family {
            let Some(slug) = family.resolved_slug() else {
                continue;
            };
            let mut node = FamilyNode {
                slug: slug.to_string(),
                parent_ids: Vec::new(),
            };
            for id in family.reference(fields::BELONGS_TO).ids() {
                node.push_parent(id);
            }
            families.insert(family.id.clone(), node);
        }

        for family in &collections.family {
            for kid in family.reference(fields::SUB_FAMILIES).ids() {
                if let Some(node) = families.get_mut(kid) {
                    node.prefer_parent(&family.id);
                }
            }
        }

        let mut extra_of = HashMap::new();
        for overview in &collections.overview {
            for family_id in overview.reference(fields::PRODUCT_FAMILIES).ids() {
                if let Some(node) = families.get_mut(family_id) {
                    node.push_parent(&overview.id);
                }
            }
            for detail_id in overview.reference(fields::EXTRA_PRODUCTS).ids() {
                extra_of.insert(detail_id.to_string(), overview.id.clone());
            }
        }

        Self {
            overview_slugs,
            families,
            extra_of,
        }
    }

    /// Path segments from the root down to `family_id`, inclusive.
    ///
    /// Walks the preferred family parent when one exists, otherwise stops at
    /// an overview parent (which becomes the first segment) or at the node
    /// itself. A parent already on the walk marks a cycle: the current node
    /// is then treated as the root. Unknown ids yield an empty path.
    pub fn chain(&self, family_id: &str) -> Vec<String> {
        let mut segments = Vec::new();
        let mut visited = HashSet::new();
        let mut current = family_id;

        while let Some(node) = self.families.get(current) {
            visited.insert(current);
            segments.push(node.slug.clone());

            let family_parent = node
                .parent_ids
                .iter()
                .find(|p| self.families.contains_key(p.as_str()));
            match family_parent {
                Some(parent) if visited.contains(parent.as_str()) => {
                    warn!(
                        target = "canopy::hierarchy",
                        family_id,
                        cycle_at = %node.slug,
                        "cyclic family parents; treating node as root"
                    );
                    break;
                }
                Some(parent) => current = parent.as_str(),
                None => {
                    if let Some(root) = node
                        .parent_ids
                        .iter()
                        .find_map(|p| self.overview_slugs.get(p))
                    {
                        segments.push(root.clone());
                    }
                    break;
                }
            }
        }

        segments.reverse();
        segments
    }

    fn detail_path(&self, detail: &RawItem) -> Vec<String> {
        let path = detail
            .reference(fields::PRODUCT_FAMILY)
            .first()
            .map(|family_id| self.chain(family_id))
            .unwrap_or_default();
        if !path.is_empty() {
            return path;
        }

        if let Some(slug) = self
            .extra_of
            .get(&detail.id)
            .and_then(|overview_id| self.overview_slugs.get(overview_id))
        {
            return vec![slug.clone()];
        }

        fields::BUSINESS_UNIT
            .iter()
            .find_map(|name| detail.reference(name).first())
            .map(|unit_id| {
                let segment = self
                    .overview_slugs
                    .get(unit_id)
                    .map_or(unit_id, String::as_str);
                vec![segment.to_string()]
            })
            .unwrap_or_default()
    }

    pub fn resolve(&self, collections: &Collections, base_path: &str) -> Maps {
        let mut maps = Maps::default();

        for family in &collections.family {
            let Some(slug) = family.resolved_slug() else {
                continue;
            };
            let pretty = join_path(base_path, &self.chain(&family.id), None);
            maps.family.insert(slug.to_string(), Entry::family(slug, pretty));
        }

        for detail in &collections.detail {
            let Some(slug) = detail.resolved_slug() else {
                continue;
            };
            let pretty = join_path(base_path, &self.detail_path(detail), Some(slug));
            maps.detail.insert(slug.to_string(), Entry::detail(slug, pretty));
        }

        maps
    }
}

/// Build a complete snapshot from one rebuild's collections.
pub fn resolve_maps(collections: &Collections, base_path: &str) -> Maps {
    Hierarchy::build(collections).resolve(collections, base_path)
}

fn join_path(base_path: &str, segments: &[String], leaf: Option<&str>) -> String {
    let mut path = base_path.trim_end_matches('/').to_string();
    for segment in segments.iter().map(String::as_str).chain(leaf) {
        path.push('/');
        path.push_str(segment);
    }
    path
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const BASE: &str = "/products";

    fn family(id: &str, slug: &str) -> RawItem {
        RawItem::new(id, slug)
    }

    #[test]
    fn belongs_to_overview_yields_rooted_paths() {
        let collections = Collections {
            overview: vec![RawItem::new("ov1", "electronics")],
            family: vec![family("f1", "cables").with_field("belongs-to", json!("ov1"))],
            detail: vec![RawItem::new("d1", "usb-c").with_field("product-family", json!("f1"))],
        };

        let maps = resolve_maps(&collections, BASE);

        assert_eq!(
            maps.family["cables"].pretty_path,
            "/products/electronics/cables"
        );
        assert_eq!(maps.family["cables"].real_path, "/products/family/cables");
        assert_eq!(
            maps.detail["usb-c"].pretty_path,
            "/products/electronics/cables/usb-c"
        );
        assert_eq!(maps.detail["usb-c"].real_path, "/products/detail/usb-c");
    }

    #[test]
    fn chain_length_matches_depth() {
        let collections = Collections {
            overview: vec![RawItem::new("ov", "root")],
            family: vec![
                family("a", "a").with_field("belongs-to", json!("ov")),
                family("b", "b").with_field("belongs-to", json!({ "id": "a" })),
                family("c", "c").with_field("belongs-to", json!(["b"])),
            ],
            detail: vec![],
        };
        let hierarchy = Hierarchy::build(&collections);

        assert_eq!(hierarchy.chain("a"), vec!["root", "a"]);
        assert_eq!(hierarchy.chain("c"), vec!["root", "a", "b", "c"]);
        assert!(hierarchy.chain("unknown").is_empty());
    }

    #[test]
    fn cyclic_parents_terminate() {
        let collections = Collections {
            family: vec![
                family("a", "alpha").with_field("belongs-to", json!("b")),
                family("b", "beta").with_field("belongs-to", json!("a")),
                family("s", "self").with_field("belongs-to", json!("s")),
            ],
            ..Default::default()
        };
        let hierarchy = Hierarchy::build(&collections);

        assert_eq!(hierarchy.chain("a"), vec!["beta", "alpha"]);
        assert_eq!(hierarchy.chain("b"), vec!["alpha", "beta"]);
        assert_eq!(hierarchy.chain("s"), vec!["self"]);

        let maps = hierarchy.resolve(&collections, BASE);
        assert_eq!(maps.family["alpha"].pretty_path, "/products/beta/alpha");
    }

    #[test]
    fn sub_families_take_precedence_over_belongs_to() {
        let collections = Collections {
            overview: vec![RawItem::new("ov", "root")],
            family: vec![
                family("parent", "parent").with_field("sub-families", json!(["kid"])),
                family("other", "other").with_field("belongs-to", json!("ov")),
                family("kid", "kid").with_field("belongs-to", json!(["other", "parent"])),
            ],
            detail: vec![],
        };
        let hierarchy = Hierarchy::build(&collections);

        assert_eq!(
            hierarchy.families["kid"].parent_ids,
            vec!["parent".to_string(), "other".to_string()]
        );
        assert_eq!(hierarchy.chain("kid"), vec!["parent", "kid"]);
    }

    #[test]
    fn overview_product_families_only_append_missing_parents() {
        let collections = Collections {
            overview: vec![
                RawItem::new("ov1", "one").with_field("product-families", json!(["f"])),
                RawItem::new("ov2", "two").with_field("product-families", json!(["f"])),
            ],
            family: vec![family("f", "fam").with_field("belongs-to", json!("ov2"))],
            detail: vec![],
        };
        let hierarchy = Hierarchy::build(&collections);

        assert_eq!(
            hierarchy.families["f"].parent_ids,
            vec!["ov2".to_string(), "ov1".to_string()]
        );
        assert_eq!(hierarchy.chain("f"), vec!["two", "fam"]);
    }

    #[test]
    fn detail_falls_back_to_extra_products() {
        let collections = Collections {
            overview: vec![
                RawItem::new("ov", "tools").with_field("extra-products", json!(["d"])),
            ],
            family: vec![],
            detail: vec![
                RawItem::new("d", "wrench").with_field("product-family", json!("gone")),
            ],
        };

        let maps = resolve_maps(&collections, BASE);
        assert_eq!(maps.detail["wrench"].pretty_path, "/products/tools/wrench");
    }

    #[test]
    fn detail_falls_back_to_business_unit_spellings() {
        let collections = Collections {
            overview: vec![RawItem::new("ov", "industrial")],
            family: vec![],
            detail: vec![
                RawItem::new("d1", "pump").with_field("business_unit", json!({ "id": "ov" })),
                RawItem::new("d2", "valve").with_field("businessUnit", json!("raw-unit")),
            ],
        };

        let maps = resolve_maps(&collections, BASE);
        assert_eq!(maps.detail["pump"].pretty_path, "/products/industrial/pump");
        assert_eq!(maps.detail["valve"].pretty_path, "/products/raw-unit/valve");
    }

    #[test]
    fn extra_products_outrank_business_unit() {
        let collections = Collections {
            overview: vec![
                RawItem::new("ov-extra", "tools").with_field("extra-products", json!(["d"])),
                RawItem::new("ov-unit", "industrial"),
            ],
            family: vec![],
            detail: vec![RawItem::new("d", "wrench").with_field("business-unit", json!("ov-unit"))],
        };

        let maps = resolve_maps(&collections, BASE);
        assert_eq!(maps.detail["wrench"].pretty_path, "/products/tools/wrench");
    }

    #[test]
    fn business_unit_is_ignored_when_family_resolves() {
        let collections = Collections {
            overview: vec![
                RawItem::new("ov", "electronics"),
                RawItem::new("ov-unit", "industrial"),
            ],
            family: vec![family("f", "cables").with_field("belongs-to", json!("ov"))],
            detail: vec![
                RawItem::new("d", "usb-c")
                    .with_field("product-family", json!("f"))
                    .with_field("business-unit", json!("ov-unit")),
            ],
        };

        let maps = resolve_maps(&collections, BASE);
        assert_eq!(
            maps.detail["usb-c"].pretty_path,
            "/products/electronics/cables/usb-c"
        );
    }

    #[test]
    fn unlinked_detail_degrades_to_base_path() {
        let collections = Collections {
            detail: vec![RawItem::new("d", "orphan")],
            ..Default::default()
        };

        let maps = resolve_maps(&collections, BASE);
        assert_eq!(maps.detail["orphan"].pretty_path, "/products/orphan");
    }

    #[test]
    fn items_without_slug_are_omitted() {
        let collections = Collections {
            overview: vec![],
            family: vec![RawItem {
                id: "f".to_string(),
                slug: None,
                field_data: Default::default(),
            }],
            detail: vec![RawItem {
                id: "d".to_string(),
                slug: Some("   ".to_string()),
                field_data: Default::default(),
            }],
        };

        let maps = resolve_maps(&collections, BASE);
        assert!(maps.is_empty());
    }

    #[test]
    fn resolution_is_deterministic() {
        let collections = Collections {
            overview: vec![RawItem::new("ov", "root")],
            family: vec![family("f", "fam").with_field("belongs-to", json!("ov"))],
            detail: vec![RawItem::new("d", "leaf").with_field("product-family", json!(["f"]))],
        };

        assert_eq!(
            resolve_maps(&collections, BASE),
            resolve_maps(&collections, BASE)
        );
    }
}
