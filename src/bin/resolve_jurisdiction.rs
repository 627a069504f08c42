use anyhow::Result;
use std::{env, process::exit};
use taxmatrix::{
    config::Config,
    lookup::{parent_geocode, DirLookupSource, LookupTables, ResolvedLevel},
};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!(
            "Usage: {} [--tax-cat <CODE>] <DOCUMENT_NAME>...",
            args[0]
        );
        exit(1);
    }

    fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let mut tax_cat = "01".to_string();
    let mut names = Vec::new();
    let mut rest = args[1..].iter();
    while let Some(arg) = rest.next() {
        if arg == "--tax-cat" {
            match rest.next() {
                Some(code) => tax_cat = code.clone(),
                None => {
                    eprintln!("--tax-cat needs a value");
                    exit(1);
                }
            }
        } else {
            names.push(arg.clone());
        }
    }

    let config = Config::load()?;
    let tables = LookupTables::load(&DirLookupSource::new(&config.lookup_dir)).await?;

    for name in &names {
        println!("=== {} ===", name);
        let Some(jurisdiction) = tables
            .geocodes
            .resolve_document(name, &config.document_suffix)
        else {
            println!("  unresolved");
            continue;
        };
        println!("  jurisdiction: {} ({:?})", jurisdiction.name, jurisdiction.kind);
        for geocode in &jurisdiction.geocodes {
            match tables.tax_types.resolve(geocode, &tax_cat) {
                Some(r) => {
                    let from = match r.level {
                        ResolvedLevel::Direct => geocode.clone(),
                        ResolvedLevel::Parent => parent_geocode(geocode),
                    };
                    println!(
                        "  {} tax_cat {} -> {:?} (from {})",
                        geocode, tax_cat, r.tax_types, from
                    );
                }
                None => println!("  {} tax_cat {} -> no tax types", geocode, tax_cat),
            }
        }
    }
    Ok(())
}
