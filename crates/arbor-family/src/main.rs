//! CLI entry point: load the sample family and run the demo lookups.

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use arbor_core::StoreConfig;
use arbor_ogm::{EntityGraph, SessionFactory};

use arbor_family::{namespaces, queries, sample, FamilyDataset, Person};

#[derive(Parser)]
#[command(name = "family-loader")]
#[command(about = "Load a sample family tree into Neo4j and query it back")]
struct Cli {
    /// Config file prefix (default: arbor).
    #[arg(short, long, default_value = "arbor")]
    config: String,

    /// Purge the database before loading. Requires store.allow_purge.
    #[arg(long)]
    purge: bool,

    /// Birth year used by both filter queries.
    #[arg(long, default_value_t = 1977)]
    birth_year: i64,

    /// Names sorting after this are included by the OR query.
    #[arg(long, default_value = "M")]
    letter: String,

    /// Husband whose wives the Cypher query looks up.
    #[arg(long, default_value = "Michael Blevins")]
    spouse_of: String,

    /// Marriages that began before this year are loaded back.
    #[arg(long, default_value_t = 1975)]
    married_before: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let config = StoreConfig::load(&cli.config)?;
    let factory = SessionFactory::new(config, &namespaces())?;
    let mut session = factory.open_session();

    if cli.purge {
        session.purge_database().await?;
    }

    let mut dataset = FamilyDataset::build();
    let summary = sample::load(&mut session, &mut dataset).await?;
    tracing::info!(
        created = summary.nodes_created,
        updated = summary.nodes_updated,
        "Sample family committed"
    );

    println!("Querying nodes by single filter");
    for person in session
        .load_all::<Person>(queries::born_in(cli.birth_year))
        .await?
    {
        print_birth(&person?);
    }

    println!("Querying nodes by multiple filters");
    for person in session
        .load_all::<Person>(queries::born_in_or_named_after(cli.birth_year, &cli.letter))
        .await?
    {
        print_birth(&person?);
    }

    println!("Querying nodes using a Cypher statement");
    for wife in queries::spouses_of(&mut session, &cli.spouse_of).await? {
        println!("{} at some point was married to {}", wife.name, cli.spouse_of);
    }

    println!("Querying relationships by filter");
    let mut loaded = EntityGraph::new();
    let marriages = queries::marriages_before(&mut session, &mut loaded, cli.married_before).await?;
    for marriage in marriages {
        let Some(married) = loaded.relationship(marriage) else {
            continue;
        };
        if let (Some(wife), Some(husband)) =
            (loaded.get(married.wife), loaded.get(married.husband))
        {
            println!("{} married {} in {}", wife.name, husband.name, married.year_married);
        }
    }

    Ok(())
}

fn print_birth(person: &Person) {
    println!("{} was born in {}", person.name, person.birth_year);
}
