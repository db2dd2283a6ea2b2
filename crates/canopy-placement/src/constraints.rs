//! Hard constraint filtering.
//!
//! A candidate survives iff it satisfies every constraint in the request.
//! An empty result is a normal outcome; deciding that nothing can be placed
//! is the caller's job.

use std::ops::Deref;

use crate::request::Constraint;
use crate::snapshot::ResourceSnapshot;

/// Anything that can be matched against hard constraints: a host snapshot,
/// a host agent, or a whole scheduler subtree.
pub trait Constrained {
    fn satisfies(&self, constraint: &Constraint) -> bool;

    fn satisfies_all(&self, constraints: &[Constraint]) -> bool {
        constraints.iter().all(|c| self.satisfies(c))
    }
}

impl Constrained for ResourceSnapshot {
    fn satisfies(&self, constraint: &Constraint) -> bool {
        match constraint {
            Constraint::Datastore { id } => self.datastores.contains(id),
            Constraint::Network { id } => self.networks.contains(id),
            Constraint::HostType { name } => self.host_type.as_ref() == Some(name),
            Constraint::Tag { key, value } => self.tags.get(key) == Some(value),
        }
    }
}

/// Keep the candidates that satisfy all `constraints`, in their original order.
pub fn filter<C>(candidates: impl IntoIterator<Item = C>, constraints: &[Constraint]) -> Vec<C>
where
    C: Deref,
    C::Target: Constrained,
{
    candidates
        .into_iter()
        .filter(|c| c.satisfies_all(constraints))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn hosts() -> Vec<Arc<ResourceSnapshot>> {
        vec![
            Arc::new(
                ResourceSnapshot::new("a", 8, 16384)
                    .with_datastore("ds-1")
                    .with_network("vm-net")
                    .with_host_type("esx")
                    .with_tag("rack", "r1"),
            ),
            Arc::new(
                ResourceSnapshot::new("b", 8, 16384)
                    .with_datastore("ds-1")
                    .with_datastore("ds-2")
                    .with_tag("rack", "r2"),
            ),
            Arc::new(ResourceSnapshot::new("c", 8, 16384)),
        ]
    }

    fn ids(survivors: &[Arc<ResourceSnapshot>]) -> Vec<&str> {
        survivors.iter().map(|s| s.host_id.as_str()).collect()
    }

    #[test]
    fn no_constraints_keeps_everything() {
        let survivors = filter(hosts(), &[]);
        assert_eq!(ids(&survivors), vec!["a", "b", "c"]);
    }

    #[test]
    fn datastore_is_matched_by_membership() {
        let survivors = filter(
            hosts(),
            &[Constraint::Datastore {
                id: "ds-2".to_string(),
            }],
        );
        assert_eq!(ids(&survivors), vec!["b"]);
    }

    #[test]
    fn all_constraints_must_hold() {
        let constraints = vec![
            Constraint::Datastore {
                id: "ds-1".to_string(),
            },
            Constraint::Tag {
                key: "rack".to_string(),
                value: "r1".to_string(),
            },
            Constraint::Network {
                id: "vm-net".to_string(),
            },
            Constraint::HostType {
                name: "esx".to_string(),
            },
        ];
        let survivors = filter(hosts(), &constraints);
        assert_eq!(ids(&survivors), vec!["a"]);
    }

    #[test]
    fn tag_value_must_be_equal() {
        let survivors = filter(
            hosts(),
            &[Constraint::Tag {
                key: "rack".to_string(),
                value: "r3".to_string(),
            }],
        );
        assert!(survivors.is_empty());
    }

    #[test]
    fn missing_attribute_fails() {
        let host = ResourceSnapshot::new("c", 1, 1);
        assert!(!host.satisfies(&Constraint::HostType {
            name: "esx".to_string()
        }));
    }
}
