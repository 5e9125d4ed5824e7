use std::path::PathBuf;

use clap::{Parser, Subcommand};

use catalog::{load_snapshot, write_snapshot};
use seed::{attach_media, build_snapshot, models::ENDPOINT};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a catalog snapshot from fixture files
    Build {
        #[arg(long, num_args = 1.., required = true)]
        categories: Vec<PathBuf>,

        #[arg(long)]
        products: PathBuf,

        #[arg(long)]
        users: Option<PathBuf>,

        #[arg(long, default_value = "catalog.json")]
        out: PathBuf,
    },
    /// Attach stock photos to the products of a snapshot
    Media {
        #[arg(long, default_value = "catalog.json")]
        snapshot: PathBuf,

        #[arg(long, default_value_t = 2)]
        per_product: usize,

        #[arg(long, env = "UNSPLASH_ACCESS_KEY", hide_env_values = true)]
        access_key: String,

        #[arg(long)]
        replace: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Build {
            categories,
            products,
            users,
            out,
        } => {
            let (snapshot, summary) = build_snapshot(&categories, &products, users.as_deref())?;
            write_snapshot(&out, &snapshot)?;

            println!("Categories: {}", summary.categories);
            println!("Products: {}", summary.products);
            println!("Sellers: {} ({} placeholders)\n", summary.sellers, summary.placeholder_sellers);
            println!("Wrote {}", out.display());
        }
        Command::Media {
            snapshot: path,
            per_product,
            access_key,
            replace,
        } => {
            let mut snapshot = load_snapshot(&path)?;

            let summary = attach_media(&mut snapshot, ENDPOINT, &access_key, per_product.max(1), replace).await;
            write_snapshot(&path, &snapshot)?;

            println!("\nImages created: {}", summary.created);
            println!("Skipped: {}", summary.skipped);
            println!("No results: {}", summary.no_results);
            println!("Errors: {}", summary.errors);
            println!("Finished adding product media.");
        }
    }

    Ok(())
}
