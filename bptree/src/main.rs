use std::path::Path;
use std::process::ExitCode;

use bptree::{Tree, TreeConfig, TreeError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: bptree <file> <command>

commands:
  get <key>            print the value stored under <key>
  put <key> <value>    insert or overwrite <key>
  delete <key>         remove <key>
  scan                 print every entry in key order
  stats                print tree and file statistics
  compact              return trailing free pages to the filesystem
  check                verify the tree structure

environment:
  BPTREE_ORDER, BPTREE_PAGE_SIZE, BPTREE_CACHE_CAPACITY, RUST_LOG";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Get(String),
    Put(String, String),
    Delete(String),
    Scan,
    Stats,
    Compact,
    Check,
}

impl Command {
    fn parse(args: &[String]) -> Option<Self> {
        match args {
            [cmd, key] if cmd == "get" => Some(Self::Get(key.clone())),
            [cmd, key, value] if cmd == "put" => Some(Self::Put(key.clone(), value.clone())),
            [cmd, key] if cmd == "delete" => Some(Self::Delete(key.clone())),
            [cmd] if cmd == "scan" => Some(Self::Scan),
            [cmd] if cmd == "stats" => Some(Self::Stats),
            [cmd] if cmd == "compact" => Some(Self::Compact),
            [cmd] if cmd == "check" => Some(Self::Check),
            _ => None,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bptree=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((path, rest)) = args.split_first() else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };
    let Some(command) = Command::parse(rest) else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };

    let config = match TreeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(Path::new(path), config, command) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(path: &Path, config: TreeConfig, command: Command) -> Result<ExitCode, TreeError> {
    let mut tree = Tree::open(path, config)?;
    let mut code = ExitCode::SUCCESS;

    match command {
        Command::Get(key) => match tree.get(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => {
                eprintln!("key not found: {key}");
                code = ExitCode::FAILURE;
            }
        },
        Command::Put(key, value) => {
            if let Some(old) = tree.put(key.as_bytes(), value.as_bytes())? {
                println!("replaced {}", String::from_utf8_lossy(&old));
            }
        }
        Command::Delete(key) => match tree.delete(key.as_bytes())? {
            Some(old) => println!("deleted {}", String::from_utf8_lossy(&old)),
            None => {
                eprintln!("key not found: {key}");
                code = ExitCode::FAILURE;
            }
        },
        Command::Scan => tree.for_each(|key, value| {
            println!(
                "{}\t{}",
                String::from_utf8_lossy(key),
                String::from_utf8_lossy(value)
            );
        })?,
        Command::Stats => {
            let stats = tree.stats()?;
            println!("entries     {}", stats.size);
            println!("order       {}", stats.order);
            println!("height      {}", stats.height);
            println!("page size   {}", stats.page_size);
            println!("pages       {}", stats.page_count);
            println!("free pages  {}", stats.free_pages);
        }
        Command::Compact => {
            let reclaimed = tree.compact()?;
            println!("reclaimed {reclaimed} pages");
        }
        Command::Check => {
            tree.check_invariants()?;
            println!("ok");
        }
    }

    tree.close()?;
    Ok(code)
}
