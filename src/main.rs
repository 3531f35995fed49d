use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feedsync::api::types::{
  ClusterPost, ClusterSummary, FeedVariant, ListQuery, MediaType, Page, Prompt, SortOrder,
  ViralChat,
};
use feedsync::api::{ContentApi, RemoteDataClient};
use feedsync::cache::{CacheStorage, LocalCache, MemoryStorage, SqliteStorage};
use feedsync::config::Config;
use feedsync::query::QueryState;
use feedsync::store::{GlobalStore, JsonFilePersistence, StatePersistence};
use feedsync::sync::{Fetch, FetchOrchestrator, SyncSettings};

#[derive(Parser, Debug)]
#[command(name = "feedsync")]
#[command(about = "Offline-first sync of prompts, viral chats and topic clusters")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/feedsync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Skip the connectivity probe and serve from the cache
  #[arg(long, global = true)]
  offline: bool,

  /// Log to stderr instead of the log file
  #[arg(long, global = true)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List prompts, optionally following several pages
  Prompts {
    #[arg(long, default_value_t = 1)]
    pages: u32,
    #[arg(long)]
    platform: Option<String>,
    #[arg(long, value_enum)]
    media_type: Option<MediaArg>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long, value_enum)]
    sort: Option<SortArg>,
  },
  /// Trending or viral prompts
  PromptFeed {
    #[arg(value_enum)]
    variant: FeedArg,
  },
  /// A single prompt
  Prompt { id: String },
  /// List viral chats
  Chats {
    #[arg(long, default_value_t = 1)]
    pages: u32,
  },
  /// List clusters
  Clusters {
    #[arg(long, default_value_t = 1)]
    pages: u32,
  },
  /// Trending or emerging clusters
  ClusterFeed {
    #[arg(value_enum)]
    variant: FeedArg,
  },
  /// A single cluster and the first page of its posts
  Cluster {
    id: String,
    #[arg(long, default_value_t = 1)]
    pages: u32,
  },
  /// Prompts saved in the current session
  Saved,
  /// Search prompts (requires connectivity)
  Search { text: String },
  /// Fetch the first page of every list and feed into the cache
  Refresh,
  /// Check backend reachability
  Probe,
  /// Print the persisted session state
  State,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MediaArg {
  Text,
  Image,
  Video,
  Audio,
}

impl From<MediaArg> for MediaType {
  fn from(arg: MediaArg) -> Self {
    match arg {
      MediaArg::Text => MediaType::Text,
      MediaArg::Image => MediaType::Image,
      MediaArg::Video => MediaType::Video,
      MediaArg::Audio => MediaType::Audio,
    }
  }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SortArg {
  Newest,
  Popular,
  Trending,
}

impl From<SortArg> for SortOrder {
  fn from(arg: SortArg) -> Self {
    match arg {
      SortArg::Newest => SortOrder::Newest,
      SortArg::Popular => SortOrder::Popular,
      SortArg::Trending => SortOrder::Trending,
    }
  }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FeedArg {
  Trending,
  Viral,
  Emerging,
}

impl From<FeedArg> for FeedVariant {
  fn from(arg: FeedArg) -> Self {
    match arg {
      FeedArg::Trending => FeedVariant::Trending,
      FeedArg::Viral => FeedVariant::Viral,
      FeedArg::Emerging => FeedVariant::Emerging,
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.log_stderr)?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  if config.cache.enabled {
    let storage = match &config.cache.path {
      Some(path) => SqliteStorage::open_at(path)?,
      None => SqliteStorage::open()?,
    };
    run(args, config, storage).await
  } else {
    run(args, config, MemoryStorage::new()).await
  }
}

/// File logging in the data directory, or stderr when asked.
fn init_logging(to_stderr: bool) -> Result<WorkerGuard> {
  let filter = EnvFilter::try_from_env("FEEDSYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  let (writer, guard) = if to_stderr {
    tracing_appender::non_blocking(std::io::stderr())
  } else {
    let dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?
      .join("feedsync");
    std::fs::create_dir_all(&dir).map_err(|e| eyre!("Failed to create log directory: {}", e))?;
    tracing_appender::non_blocking(tracing_appender::rolling::never(dir, "feedsync.log"))
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(to_stderr))
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

async fn run<S: CacheStorage>(args: Args, config: Config, storage: S) -> Result<()> {
  let api = RemoteDataClient::new(&config)?;
  if let Some(token) = Config::get_api_token() {
    api.set_token(Some(token));
  }

  let store = GlobalStore::hydrate(JsonFilePersistence::open_default()?);
  let cache = LocalCache::new(storage).with_max_entries(config.cache.max_entries_per_family);
  let orch = FetchOrchestrator::new(
    Arc::new(api),
    cache,
    Arc::new(store),
    SyncSettings::from(&config),
  );

  if args.offline {
    orch.set_online(false);
  } else if !matches!(args.command, Command::State) {
    let online = orch.probe_connectivity().await;
    info!(online, base_url = %config.api.base_url, "Connectivity probed");
  }

  match args.command {
    Command::Prompts {
      pages,
      platform,
      media_type,
      category,
      sort,
    } => {
      let query = ListQuery {
        kind: platform,
        media_type: media_type.map(Into::into),
        category,
        sort: sort.map(Into::into),
        ..orch.first_page()
      };
      report(orch.fetch_list::<Prompt>(&query).await, prompt_line)?;
      for _ in 1..pages {
        if !report(orch.load_more::<Prompt>(&query).await, prompt_line)? {
          break;
        }
      }
    }
    Command::PromptFeed { variant } => {
      report(orch.fetch_prompt_feed(variant.into()).await, prompt_line)?;
    }
    Command::Prompt { id } => match into_result(orch.fetch_prompt(&id).await)? {
      Some(Some(prompt)) => println!("{}\n\n{}", prompt_line(&prompt), prompt.content),
      Some(None) => println!("Prompt {} is not cached", id),
      None => {}
    },
    Command::Chats { pages } => {
      let query = orch.first_page();
      report(orch.fetch_list::<ViralChat>(&query).await, chat_line)?;
      for _ in 1..pages {
        if !report(orch.load_more::<ViralChat>(&query).await, chat_line)? {
          break;
        }
      }
    }
    Command::Clusters { pages } => {
      let query = orch.first_page();
      report(orch.fetch_list::<ClusterSummary>(&query).await, cluster_line)?;
      for _ in 1..pages {
        if !report(orch.load_more::<ClusterSummary>(&query).await, cluster_line)? {
          break;
        }
      }
    }
    Command::ClusterFeed { variant } => {
      report(orch.fetch_cluster_feed(variant.into()).await, cluster_line)?;
    }
    Command::Cluster { id, pages } => {
      match into_result(orch.fetch_cluster(&id).await)? {
        Some(Some(cluster)) => println!("{}", cluster_line(&cluster)),
        Some(None) => println!("Cluster {} is not cached", id),
        None => {}
      }
      report(orch.fetch_cluster_posts(&id).await, post_line)?;
      for _ in 1..pages {
        if !report(orch.load_more_cluster_posts(&id).await, post_line)? {
          break;
        }
      }
    }
    Command::Saved => {
      if let Some(prompts) = into_result(orch.fetch_saved_prompts().await)? {
        for prompt in &prompts {
          println!("{}", prompt_line(prompt));
        }
      }
    }
    Command::Search { text } => {
      report(orch.search(&text).await, prompt_line)?;
    }
    Command::Refresh => {
      let failed = orch.refresh_all().await;
      if failed > 0 {
        return Err(eyre!("{} of 7 queries failed with nothing cached", failed));
      }
      println!("Refreshed");
    }
    Command::Probe => {
      let online = orch.store().is_online();
      println!("{}", if online { "online" } else { "offline" });
    }
    Command::State => print_state(orch.store())?,
  }

  Ok(())
}

/// Print a fetched page. Returns whether anything was fetched.
fn report<T>(fetch: Fetch<Page<T>>, line: fn(&T) -> String) -> Result<bool> {
  let Some(page) = into_result(fetch)? else {
    return Ok(false);
  };
  for item in &page.items {
    println!("{}", line(item));
  }
  Ok(!page.items.is_empty())
}

/// Unwrap a fetch, reporting the data source; `None` when nothing ran.
fn into_result<T>(fetch: Fetch<T>) -> Result<Option<T>> {
  match fetch {
    QueryState::Success(result) => {
      info!(source = ?result.source, cached_at = ?result.cached_at, "Fetched");
      Ok(Some(result.data))
    }
    QueryState::Error(e) => Err(eyre!(e)),
    QueryState::Idle | QueryState::Loading | QueryState::Superseded => Ok(None),
  }
}

fn print_state<P: StatePersistence>(store: &GlobalStore<P>) -> Result<()> {
  let state = store.snapshot();
  let json = serde_json::to_string_pretty(&state.persisted)
    .map_err(|e| eyre!("Failed to serialize state: {}", e))?;
  println!("{}", json);
  Ok(())
}

fn prompt_line(prompt: &Prompt) -> String {
  format!(
    "{:<24} {:<10} {:<6} {}",
    prompt.id,
    prompt.platform,
    prompt.media_type.as_str(),
    prompt.title
  )
}

fn chat_line(chat: &ViralChat) -> String {
  format!("{:<24} {:<10} {}", chat.id, chat.platform, chat.title)
}

fn cluster_line(cluster: &ClusterSummary) -> String {
  format!(
    "{:<24} {:>6.1} {:>4} posts  {}",
    cluster.id, cluster.heat_score, cluster.post_count, cluster.title
  )
}

fn post_line(post: &ClusterPost) -> String {
  let author = post.author.as_deref().unwrap_or("-");
  format!("{:<24} {:<10} {:<16} {}", post.id, post.platform, author, post.content)
}
