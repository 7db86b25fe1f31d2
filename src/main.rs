use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use eyre::{Context, Result, eyre};
use lifetrack::books::{SearchFilters, SearchOrder};
use lifetrack::trackers::{
    self, BOOKS_PATH, FILMS_PATH, Film, SavedBook, TODO_PATH, TRAVEL_PATH, TodoItem, TravelMarker, WaterDay,
};
use lifetrack::{Backend, CollectionSync, Config, LiveDocument, Record, StorePath, SubscriptionState};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

#[derive(Parser)]
#[command(name = "lifetrack")]
#[command(about = "lifetrack CLI - to-do, books, films, water and travel trackers on a live document store")]
#[command(version)]
struct Cli {
    /// Config file (default: <config_dir>/lifetrack/config.yml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured backend
    #[arg(short, long, value_enum)]
    backend: Option<Backend>,

    /// More log output on stderr (-v, -vv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// To-do list
    Todo {
        #[command(subcommand)]
        action: TodoCommand,
    },

    /// Book search and saved books
    Books {
        #[command(subcommand)]
        action: BooksCommand,
    },

    /// Film diary
    Films {
        #[command(subcommand)]
        action: FilmsCommand,
    },

    /// Daily water intake
    Water {
        #[command(subcommand)]
        action: WaterCommand,
    },

    /// Travel journal markers
    Travel {
        #[command(subcommand)]
        action: TravelCommand,
    },

    /// Print the raw value at a path
    Get { path: String },

    /// Print every snapshot delivered for a path until the subscription ends
    Watch {
        path: String,

        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
}

#[derive(Subcommand)]
enum TodoCommand {
    Add { name: String, category: String },
    List,
    /// Remove a finished item by id
    Done { id: String },
}

#[derive(Subcommand)]
enum BooksCommand {
    Search {
        query: String,
        #[arg(long)]
        lang: Option<String>,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        author: Option<String>,
        /// Newest first instead of relevance
        #[arg(long)]
        newest: bool,
        #[arg(long, default_value_t = 20)]
        max: u8,
    },
    Save {
        title: String,
        author: String,
        #[arg(long, default_value = "")]
        language: String,
        #[arg(long)]
        category: Vec<String>,
        #[arg(long)]
        image: Option<String>,
    },
    List,
    Remove { id: String },
}

#[derive(Subcommand)]
enum FilmsCommand {
    Add {
        name: String,
        /// 0-10
        rating: u8,
        #[arg(long, default_value = "")]
        comments: String,
        #[arg(long)]
        image: Option<String>,
    },
    List,
}

#[derive(Subcommand)]
enum WaterCommand {
    Add {
        /// Millilitres (quick amounts: 250, 500)
        ml: u32,
        /// YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<String>,
    },
    Show {
        #[arg(long)]
        date: Option<String>,
    },
}

#[derive(Subcommand)]
enum TravelCommand {
    Add {
        title: String,
        #[arg(allow_hyphen_values = true)]
        latitude: f64,
        #[arg(allow_hyphen_values = true)]
        longitude: f64,
        #[arg(long, default_value = "")]
        description: String,
        /// YYYY-MM-DD
        #[arg(long)]
        visited: Option<String>,
    },
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }

    let store = config.open_store()?;
    let sync = CollectionSync::new(store);

    match cli.command {
        Commands::Todo { action } => run_todo(&sync, action),
        Commands::Books { action } => run_books(&sync, &config, action),
        Commands::Films { action } => run_films(&sync, action),
        Commands::Water { action } => run_water(&sync, &config, action),
        Commands::Travel { action } => run_travel(&sync, action),
        Commands::Get { path } => {
            let path: StorePath = path.parse()?;
            let value = sync.store().get(&path)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Commands::Watch { path, interval_ms } => watch(&sync, &path, Duration::from_millis(interval_ms)),
    }
}

fn run_todo(sync: &CollectionSync, action: TodoCommand) -> Result<()> {
    match action {
        TodoCommand::Add { name, category } => {
            let item = TodoItem::new(name, category);
            if !item.has_known_category() {
                println!(
                    "{} '{}' is not one of: {}",
                    "note:".yellow(),
                    item.category,
                    trackers::TODO_CATEGORIES.join(", ")
                );
            }
            let id = sync.append(TODO_PATH, &item)?;
            println!("{} {}", "Added".green(), id.dimmed());
        }
        TodoCommand::List => {
            let items = sync.read::<TodoItem>(TODO_PATH)?;
            if items.is_empty() {
                println!("Nothing to do");
            }
            for Record { id, fields } in trackers::newest_first(&items) {
                println!("{}  {}  {}", id.dimmed(), fields.name.bold(), fields.category.cyan());
            }
        }
        TodoCommand::Done { id } => {
            sync.remove_at(&format!("{}/{}", TODO_PATH, id))?;
            println!("{} {}", "Done".green(), id.dimmed());
        }
    }
    Ok(())
}

fn run_books(sync: &CollectionSync, config: &Config, action: BooksCommand) -> Result<()> {
    match action {
        BooksCommand::Search {
            query,
            lang,
            subject,
            author,
            newest,
            max,
        } => {
            let filters = SearchFilters {
                language: lang,
                subject,
                author,
                order: if newest { SearchOrder::Newest } else { SearchOrder::Relevance },
                max_results: max,
            };
            let saved = sync.read::<SavedBook>(BOOKS_PATH)?;
            let results = config.book_search()?.search(&query, &filters);
            if results.is_empty() {
                println!("No results");
            }
            for book in results {
                let mark = if saved.iter().any(|r| trackers::same_book(&r.fields, &book)) {
                    "saved".green()
                } else {
                    "     ".normal()
                };
                println!("{}  {}  {}", mark, book.title.bold(), book.authors.join(", "));
            }
        }
        BooksCommand::Save {
            title,
            author,
            language,
            category,
            image,
        } => {
            let book = SavedBook {
                title,
                authors: vec![author],
                language,
                categories: category,
                image,
            };
            let saved = sync.read::<SavedBook>(BOOKS_PATH)?;
            match saved.iter().find(|r| trackers::same_book(&r.fields, &book)) {
                Some(existing) => println!("{} {}", "Already saved".yellow(), existing.id.dimmed()),
                None => {
                    let id = sync.append(BOOKS_PATH, &book)?;
                    println!("{} {}", "Saved".green(), id.dimmed());
                }
            }
        }
        BooksCommand::List => {
            for Record { id, fields } in trackers::newest_first(&sync.read::<SavedBook>(BOOKS_PATH)?) {
                println!(
                    "{}  {}  {}  {}",
                    id.dimmed(),
                    fields.title.bold(),
                    fields.authors.join(", "),
                    fields.language.cyan()
                );
            }
        }
        BooksCommand::Remove { id } => {
            sync.remove_at(&format!("{}/{}", BOOKS_PATH, id))?;
            println!("{} {}", "Removed".green(), id.dimmed());
        }
    }
    Ok(())
}

fn run_films(sync: &CollectionSync, action: FilmsCommand) -> Result<()> {
    match action {
        FilmsCommand::Add {
            name,
            rating,
            comments,
            image,
        } => {
            let mut film = Film::new(name, rating).with_comments(comments);
            if let Some(image) = image {
                film = film.with_image(image);
            }
            let id = sync.append(FILMS_PATH, &film)?;
            println!("{} {}", "Added".green(), id.dimmed());
        }
        FilmsCommand::List => {
            for Record { id, fields } in trackers::newest_first(&sync.read::<Film>(FILMS_PATH)?) {
                println!(
                    "{}  {}  {}/{}  {}",
                    id.dimmed(),
                    fields.name.bold(),
                    fields.rating.to_string().yellow(),
                    trackers::MAX_FILM_RATING,
                    fields.comments
                );
            }
        }
    }
    Ok(())
}

fn run_water(sync: &CollectionSync, config: &Config, action: WaterCommand) -> Result<()> {
    match action {
        WaterCommand::Add { ml, date } => {
            let date = date_or_today(date.as_deref())?;
            let day = trackers::add_water(sync, date, ml, config.water_goal_ml)?;
            print_water(&date.to_string(), &day);
        }
        WaterCommand::Show { date } => {
            let date = date_or_today(date.as_deref())?;
            let day = sync
                .read_document::<WaterDay>(&trackers::water_path(date))?
                .unwrap_or(WaterDay::empty(config.water_goal_ml));
            print_water(&date.to_string(), &day);
        }
    }
    Ok(())
}

fn run_travel(sync: &CollectionSync, action: TravelCommand) -> Result<()> {
    match action {
        TravelCommand::Add {
            title,
            latitude,
            longitude,
            description,
            visited,
        } => {
            let mut marker = TravelMarker::new(title, latitude, longitude);
            marker.description = description;
            if let Some(visited) = visited {
                marker = marker.visited(parse_date(&visited)?);
            }
            let id = sync.append(TRAVEL_PATH, &marker)?;
            println!("{} {}", "Added".green(), id.dimmed());
        }
        TravelCommand::List => {
            for Record { id, fields } in sync.read::<TravelMarker>(TRAVEL_PATH)? {
                println!(
                    "{}  {}  ({:.4}, {:.4})  {}",
                    id.dimmed(),
                    fields.title.bold(),
                    fields.latitude,
                    fields.longitude,
                    fields.visited_on.unwrap_or_default().cyan()
                );
            }
        }
    }
    Ok(())
}

fn watch(sync: &CollectionSync, path: &str, interval: Duration) -> Result<()> {
    let mut live: LiveDocument<Value> = sync.subscribe_document(path)?;
    println!("Watching {} (Ctrl-C to stop)", live.path().to_string().bold());

    live.on_change(|value| {
        let text = match value {
            Some(value) => serde_json::to_string_pretty(value).unwrap_or_else(|e| e.to_string()),
            None => "null".to_string(),
        };
        println!("{} {}", chrono::Local::now().format("%H:%M:%S").to_string().dimmed(), text);
    });

    while live.is_active() {
        // Picks up writes made by other processes to a file store
        sync.refresh()?;
        live.wait(interval);
    }

    match live.state() {
        SubscriptionState::Terminated(err) => Err(eyre!(
            "Subscription ended after {} snapshots: {}",
            live.snapshots_applied(),
            err
        )),
        _ => Ok(()),
    }
}

fn print_water(date: &str, day: &WaterDay) {
    const WIDTH: usize = 20;
    let filled = (day.progress() * WIDTH as f64).round() as usize;
    let bar = format!("{}{}", "#".repeat(filled), ".".repeat(WIDTH - filled));
    let bar = if day.reached_goal() { bar.green() } else { bar.blue() };
    println!("{}  [{}]  {} / {} ml", date.dimmed(), bar, day.water, day.goal);
}

fn date_or_today(raw: Option<&str>) -> Result<chrono::NaiveDate> {
    match raw {
        Some(raw) => parse_date(raw),
        None => Ok(trackers::today()),
    }
}

fn parse_date(raw: &str) -> Result<chrono::NaiveDate> {
    trackers::parse_date(raw).context(format!("Invalid date '{}' (expected YYYY-MM-DD)", raw))
}
