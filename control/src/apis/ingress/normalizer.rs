//! Ingress normalizer
//!
//! Pure transform from Ingress snapshots to the routing facts the
//! synchronizer consumes. Nothing here touches shared state.
//!
//! ## Event mapping
//!
//! | Watch event            | Opt-out marker          | RouteChange          |
//! |------------------------|-------------------------|----------------------|
//! | Added(r)               | present                 | Remove(id)           |
//! | Added(r)               | absent                  | Add(id, hosts)       |
//! | Updated { old, new }   | on new                  | Remove(id)           |
//! | Updated { old, new }   | on old only             | Add(id, hosts)       |
//! | Updated { old, new }   | on neither              | Update(id, hosts)    |
//! | Deleted(r)             | any                     | Remove(id)           |
//!
//! An excluded Add maps to Remove so that a resource which gained the marker
//! while the watch was disconnected is withdrawn by the resync replay.

use crate::error::NormalizeError;
use k8s_openapi::api::networking::v1::Ingress;
use std::collections::HashSet;
use std::fmt;

/// Stable identity of an Ingress: (namespace, name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    #[inline]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Routing-relevant facts extracted from one Ingress snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressFacts {
    /// Carries the opt-out marker; contributes nothing
    Excluded,
    /// Declared hostnames, deduplicated, in declaration order
    Hosts(Vec<String>),
}

/// Raw event as delivered by a watch transport
#[derive(Debug, Clone)]
pub enum ResourceEvent<K> {
    Added(K),
    Updated { old: K, new: K },
    Deleted(K),
}

impl<K> ResourceEvent<K> {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceEvent::Added(_) => "add",
            ResourceEvent::Updated { .. } => "update",
            ResourceEvent::Deleted(_) => "delete",
        }
    }
}

/// Normalized command for the synchronizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteChange {
    Add {
        id: ResourceId,
        hostnames: Vec<String>,
    },
    Update {
        id: ResourceId,
        hostnames: Vec<String>,
    },
    Remove {
        id: ResourceId,
    },
}

impl RouteChange {
    pub fn id(&self) -> &ResourceId {
        match self {
            RouteChange::Add { id, .. }
            | RouteChange::Update { id, .. }
            | RouteChange::Remove { id } => id,
        }
    }
}

/// Extracts routing facts using a configured opt-out annotation key
#[derive(Debug, Clone)]
pub struct Normalizer {
    opt_out_annotation: String,
}

impl Normalizer {
    pub fn new(opt_out_annotation: impl Into<String>) -> Self {
        Self {
            opt_out_annotation: opt_out_annotation.into(),
        }
    }

    /// True when the opt-out annotation key is present (value ignored)
    pub fn is_excluded(&self, ingress: &Ingress) -> bool {
        ingress
            .metadata
            .annotations
            .as_ref()
            .is_some_and(|annotations| annotations.contains_key(&self.opt_out_annotation))
    }

    pub fn facts(&self, ingress: &Ingress) -> IngressFacts {
        if self.is_excluded(ingress) {
            IngressFacts::Excluded
        } else {
            IngressFacts::Hosts(declared_hostnames(ingress))
        }
    }

    /// Map a watch event to the synchronizer command it implies
    pub fn normalize(&self, event: &ResourceEvent<Ingress>) -> Result<RouteChange, NormalizeError> {
        match event {
            ResourceEvent::Added(ingress) => {
                let id = resource_id(ingress)?;
                Ok(match self.facts(ingress) {
                    IngressFacts::Excluded => RouteChange::Remove { id },
                    IngressFacts::Hosts(hostnames) => RouteChange::Add { id, hostnames },
                })
            }
            ResourceEvent::Updated { old, new } => {
                let id = resource_id(new)?;
                Ok(match self.facts(new) {
                    IngressFacts::Excluded => RouteChange::Remove { id },
                    IngressFacts::Hosts(hostnames) if self.is_excluded(old) => {
                        RouteChange::Add { id, hostnames }
                    }
                    IngressFacts::Hosts(hostnames) => RouteChange::Update { id, hostnames },
                })
            }
            ResourceEvent::Deleted(ingress) => Ok(RouteChange::Remove {
                id: resource_id(ingress)?,
            }),
        }
    }
}

/// Identity of an Ingress; namespace defaults to "default"
pub fn resource_id(ingress: &Ingress) -> Result<ResourceId, NormalizeError> {
    let name = ingress
        .metadata
        .name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or(NormalizeError::MissingName)?;
    let namespace = ingress.metadata.namespace.as_deref().unwrap_or("default");
    Ok(ResourceId::new(namespace, name))
}

/// Hostnames from `spec.rules[].host`, skipping host-less rules
pub fn declared_hostnames(ingress: &Ingress) -> Vec<String> {
    let mut seen = HashSet::new();
    ingress
        .spec
        .iter()
        .flat_map(|spec| spec.rules.iter().flatten())
        .filter_map(|rule| rule.host.as_deref())
        .filter(|host| !host.is_empty())
        .filter(|host| seen.insert(*host))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::networking::v1::{IngressRule, IngressSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    const MARKER: &str = "ingress-control.io/disable";

    fn ingress(name: &str, hosts: &[Option<&str>], opt_out: bool) -> Ingress {
        let annotations = opt_out.then(|| {
            let mut annotations = BTreeMap::new();
            annotations.insert(MARKER.to_string(), String::new());
            annotations
        });
        Ingress {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("web".to_string()),
                annotations,
                ..Default::default()
            },
            spec: Some(IngressSpec {
                rules: Some(
                    hosts
                        .iter()
                        .map(|host| IngressRule {
                            host: host.map(str::to_string),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_declared_hostnames_in_order() {
        let ing = ingress("app", &[Some("b.test"), Some("a.test")], false);
        assert_eq!(declared_hostnames(&ing), vec!["b.test", "a.test"]);
    }

    #[test]
    fn test_hostless_rules_and_duplicates_are_dropped() {
        let ing = ingress(
            "app",
            &[Some("a.test"), None, Some(""), Some("a.test"), Some("b.test")],
            false,
        );
        assert_eq!(declared_hostnames(&ing), vec!["a.test", "b.test"]);
    }

    #[test]
    fn test_no_rules_yields_no_hosts() {
        let mut ing = ingress("app", &[], false);
        assert_eq!(
            Normalizer::new(MARKER).facts(&ing),
            IngressFacts::Hosts(vec![])
        );

        ing.spec = None;
        assert!(declared_hostnames(&ing).is_empty());
    }

    #[test]
    fn test_opt_out_marker_value_is_ignored() {
        let normalizer = Normalizer::new(MARKER);
        let mut ing = ingress("app", &[Some("a.test")], true);
        assert_eq!(normalizer.facts(&ing), IngressFacts::Excluded);

        ing.metadata
            .annotations
            .as_mut()
            .unwrap()
            .insert(MARKER.to_string(), "false".to_string());
        assert_eq!(normalizer.facts(&ing), IngressFacts::Excluded);
    }

    #[test]
    fn test_other_annotations_do_not_exclude() {
        let normalizer = Normalizer::new(MARKER);
        let mut ing = ingress("app", &[Some("a.test")], false);
        let mut annotations = BTreeMap::new();
        annotations.insert("kubernetes.io/ingress.class".to_string(), "x".to_string());
        ing.metadata.annotations = Some(annotations);
        assert!(!normalizer.is_excluded(&ing));
    }

    #[test]
    fn test_resource_id_defaults_namespace() {
        let mut ing = ingress("app", &[], false);
        ing.metadata.namespace = None;
        let id = resource_id(&ing).unwrap();
        assert_eq!(id, ResourceId::new("default", "app"));
        assert_eq!(id.to_string(), "default/app");
    }

    #[test]
    fn test_missing_name_is_malformed() {
        let normalizer = Normalizer::new(MARKER);
        let mut ing = ingress("app", &[Some("a.test")], false);
        ing.metadata.name = None;
        assert_eq!(
            normalizer.normalize(&ResourceEvent::Added(ing)),
            Err(NormalizeError::MissingName)
        );
    }

    #[test]
    fn test_added_maps_to_add_or_remove() {
        let normalizer = Normalizer::new(MARKER);
        let id = ResourceId::new("web", "app");

        let change = normalizer
            .normalize(&ResourceEvent::Added(ingress("app", &[Some("a.test")], false)))
            .unwrap();
        assert_eq!(
            change,
            RouteChange::Add {
                id: id.clone(),
                hostnames: vec!["a.test".to_string()]
            }
        );

        let change = normalizer
            .normalize(&ResourceEvent::Added(ingress("app", &[Some("a.test")], true)))
            .unwrap();
        assert_eq!(change, RouteChange::Remove { id });
    }

    #[test]
    fn test_updated_marker_transitions() {
        let normalizer = Normalizer::new(MARKER);
        let id = ResourceId::new("web", "app");
        let plain = ingress("app", &[Some("a.test")], false);
        let marked = ingress("app", &[Some("a.test")], true);

        // Marker flipped off: behaves as a fresh add
        let change = normalizer
            .normalize(&ResourceEvent::Updated {
                old: marked.clone(),
                new: plain.clone(),
            })
            .unwrap();
        assert!(matches!(change, RouteChange::Add { .. }));

        // Marker flipped on: withdraw
        let change = normalizer
            .normalize(&ResourceEvent::Updated {
                old: plain.clone(),
                new: marked.clone(),
            })
            .unwrap();
        assert_eq!(change, RouteChange::Remove { id: id.clone() });

        // Neither marked: plain update
        let change = normalizer
            .normalize(&ResourceEvent::Updated {
                old: plain.clone(),
                new: ingress("app", &[Some("b.test")], false),
            })
            .unwrap();
        assert_eq!(
            change,
            RouteChange::Update {
                id,
                hostnames: vec!["b.test".to_string()]
            }
        );
    }

    #[test]
    fn test_deleted_always_removes() {
        let normalizer = Normalizer::new(MARKER);
        for opt_out in [false, true] {
            let change = normalizer
                .normalize(&ResourceEvent::Deleted(ingress("app", &[Some("a.test")], opt_out)))
                .unwrap();
            assert_eq!(
                change,
                RouteChange::Remove {
                    id: ResourceId::new("web", "app")
                }
            );
        }
    }
}
