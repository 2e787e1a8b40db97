//! Family-tree model for Arbor OGM: people, their children, and marriages.

pub mod married;
pub mod person;
pub mod queries;
pub mod sample;

pub use married::Married;
pub use person::Person;
pub use sample::FamilyDataset;

use arbor_ogm::EntityNamespace;

/// The namespaces the family model registers with a session factory.
pub fn namespaces() -> Vec<EntityNamespace> {
    vec![
        EntityNamespace::new("family.node").node::<Person>(),
        EntityNamespace::new("family.relationship").relationship::<Married>(),
    ]
}
