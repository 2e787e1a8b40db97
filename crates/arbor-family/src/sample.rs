//! The sample family: twelve people, their children, and three marriages.

use arbor_core::Result;
use arbor_ogm::{EntityGraph, NodeRef, RelationshipRef, SaveSummary, Session};

use crate::married::Married;
use crate::person::Person;

/// An object graph ready to be saved, plus handles to its roots.
#[derive(Debug)]
pub struct FamilyDataset {
    pub graph: EntityGraph,
    /// In save order.
    pub people: Vec<NodeRef<Person>>,
    pub marriages: Vec<RelationshipRef<Married>>,
}

impl FamilyDataset {
    pub fn build() -> Self {
        let mut graph = EntityGraph::new();
        let mut person = |name: &str, year: i64| graph.insert(Person::new(name, year));

        let carol = person("Carol Maureen", 1945);
        let courtney = person("Courtney Janice", 1945);
        let esme = person("Esme Alexis", 1981);
        let gabe = person("Gabriel Josiah", 1979);
        let gail = person("Gail Ann", 1942);
        let jeremy = person("Jeremy Douglas", 1969);
        let jesse = person("Jesse Lucas", 1977);
        let kelly = person("Kelly Leigh", 1977);
        let mike = person("Michael Blevins", 1945);
        let scott = person("Scott Christoper", 1965);
        let steve = person("Steven Lester", 1950);
        let zane = person("Michael Zane", 1973);

        let families = [
            (carol, vec![scott, courtney, jeremy, jesse, gabe, esme]),
            (mike, vec![scott, courtney, jeremy, zane, kelly]),
            (gail, vec![zane, kelly]),
            (steve, vec![jesse, gabe, esme]),
        ];
        for (parent, children) in families {
            if let Some(p) = graph.get_mut(parent) {
                p.children = children;
            }
        }

        let marriages = vec![
            graph.relate(Married::new(carol, mike, 1964, Some(1973))),
            graph.relate(Married::new(gail, mike, 1973, Some(1992))),
            graph.relate(Married::new(carol, steve, 1976, None)),
        ];

        Self {
            graph,
            people: vec![
                carol, courtney, esme, gabe, gail, jeremy, jesse, kelly, mike, scott, steve, zane,
            ],
            marriages,
        }
    }

    pub fn person(&self, name: &str) -> Option<&Person> {
        self.people
            .iter()
            .filter_map(|r| self.graph.get(*r))
            .find(|p| p.name == name)
    }

    pub fn persons(&self) -> impl Iterator<Item = &Person> + '_ {
        self.people.iter().filter_map(|r| self.graph.get(*r))
    }
}

/// Save every person, then every marriage, in one transaction.
///
/// On failure the transaction is rolled back and the identity changes made
/// during it are reverted in the dataset, so it can be saved again.
pub async fn load(session: &mut Session, dataset: &mut FamilyDataset) -> Result<SaveSummary> {
    session.begin_transaction().await?;

    let outcome = match save_all(session, dataset).await {
        Ok(summary) => session.commit().await.map(|()| summary),
        Err(e) => {
            if let Err(rollback) = session.rollback().await {
                tracing::warn!(error = %rollback, "Rollback after failed load also failed");
            }
            Err(e)
        }
    };

    if outcome.is_err() {
        let discarded = session.take_discarded_identities();
        dataset.graph.revert(&discarded);
    }
    outcome
}

async fn save_all(session: &mut Session, dataset: &mut FamilyDataset) -> Result<SaveSummary> {
    let mut summary = SaveSummary::default();
    for person in dataset.people.clone() {
        summary += session.save(&mut dataset.graph, person).await?;
    }
    for married in dataset.marriages.clone() {
        summary += session.save(&mut dataset.graph, married).await?;
    }
    tracing::info!(
        created = summary.nodes_created,
        edges = summary.edges_merged,
        marriages = summary.relationships_written,
        "Sample family saved"
    );
    Ok(summary)
}
