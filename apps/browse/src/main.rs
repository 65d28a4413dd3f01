use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{
    load_settings, load_settings_from, FilterSet, ListController, LoadOutcome, MarketplaceClient,
    MutationOutcome,
};
use serde::Serialize;
use shared::domain::{GeoPoint, PostId, ReactionKind};
use tracing::info;

#[derive(Parser, Debug)]
struct Args {
    /// Settings file; defaults to ./client.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    api_base_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the post feed.
    Feed {
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Print houses matching `key=value` filters.
    Houses {
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Print map markers around a point.
    Lookup {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
    },
    /// React to a post of the first feed page.
    React {
        #[arg(long)]
        post: i64,
        #[arg(long, value_enum, default_value_t = ReactionArg::Like)]
        kind: ReactionArg,
    },
    /// Comment on a post.
    Comment {
        #[arg(long)]
        post: i64,
        #[arg(long)]
        text: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReactionArg {
    Like,
    Dislike,
}

impl From<ReactionArg> for ReactionKind {
    fn from(value: ReactionArg) -> Self {
        match value {
            ReactionArg::Like => ReactionKind::Like,
            ReactionArg::Dislike => ReactionKind::Dislike,
        }
    }
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => load_settings_from(path)?,
        None => load_settings(),
    };
    if let Some(url) = args.api_base_url {
        settings.api_base_url = url;
    }
    info!(api = %settings.api_base_url, "browse starting");
    let client = MarketplaceClient::new(settings)?;

    match args.command {
        Command::Feed { pages } => {
            let feed = client.feed();
            load_pages(&feed, pages).await?;
            print_items(&feed.snapshot().items)?;
        }
        Command::Houses { filters, pages } => {
            let houses = client.houses(filters.into_iter().collect());
            load_pages(&houses, pages).await?;
            print_items(&houses.snapshot().items)?;
        }
        Command::Lookup { lat, lng, filters } => {
            let lookup = client.lookup();
            lookup.on_viewport_changed(GeoPoint::new(lat, lng), filters.into_iter().collect::<FilterSet>());
            if let LoadOutcome::Failed(err) = lookup.flush().await {
                bail!("lookup failed: {err}");
            }
            print_items(&lookup.snapshot().markers)?;
        }
        Command::React { post, kind } => {
            let feed = client.feed();
            load_pages(&feed, 1).await?;
            let reactions = client.post_reactions(Arc::clone(&feed));
            let caller = client.post_reaction_caller();
            match reactions.apply_with(PostId(post), kind.into(), &caller).await {
                MutationOutcome::Committed(reaction) => println!("{}", serde_json::to_string(&reaction)?),
                MutationOutcome::RolledBack(err) => bail!("reaction rolled back: {err}"),
                MutationOutcome::NotFound => bail!("post {post} is not on the first feed page"),
                MutationOutcome::Superseded => {}
            }
        }
        Command::Comment { post, text } => {
            let thread = client.comments(PostId(post));
            let comment = client.add_comment(&thread, PostId(post), &text).await?;
            println!("{}", serde_json::to_string(&comment)?);
        }
    }

    Ok(())
}

async fn load_pages<T>(list: &ListController<T>, pages: usize) -> Result<()>
where
    T: client_core::Identified + Clone + Send + Sync + 'static,
{
    if let LoadOutcome::Failed(err) = list.initial_load().await {
        bail!("{} failed to load: {err}", list.label());
    }
    for _ in 1..pages {
        if !list.snapshot().has_more() {
            break;
        }
        if let LoadOutcome::Failed(err) = list.load_more().await {
            bail!("{} failed to load more: {err}", list.label());
        }
    }
    Ok(())
}

fn print_items<T: Serialize>(items: &[T]) -> Result<()> {
    for item in items {
        println!("{}", serde_json::to_string(item)?);
    }
    Ok(())
}
