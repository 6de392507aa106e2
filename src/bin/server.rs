use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use bluetetris::codec::DEFAULT_PORT;
use bluetetris::logger::Logger;
use bluetetris::score::{LocalFileStore, ScoreDatabase, ScoreStore, SqliteScoreDatabase};
use bluetetris::server::Server;
use clap::{ArgAction, Parser};
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(
    name = "server",
    version,
    about = "Blue Tetris — authoritative multiplayer dedicated server",
    long_about = "Accepts up to four TCP clients into one shared room and runs \
                  the authoritative falling-block game and high-score service."
)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value_t = format!("0.0.0.0:{DEFAULT_PORT}"))]
    bind: String,

    /// Increase output verbosity (-v verbose, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Persist high scores to a SQLite database at this path instead of a
    /// local flat file
    #[arg(long)]
    db: Option<PathBuf>,

    /// Path to the local flat-file high-score table (used unless --db is given)
    #[arg(long, default_value = "scores.dat")]
    score_file: PathBuf,
}

fn build_score_backend(args: &Args, logger: &Logger) -> Result<Arc<dyn ScoreDatabase>, Box<dyn std::error::Error>> {
    if let Some(path) = &args.db {
        logger.info(format!("server: using sqlite score database at {}", path.display()));
        return Ok(Arc::new(SqliteScoreDatabase::open(path)?));
    }

    // Neither flag was given explicitly on the command line: clap leaves
    // `db` as None and `score_file` at its default either way, so fall
    // back to an interactive prompt the way the original took a single
    // startup keypress to choose between score storage modes.
    if std::env::args().count() <= 1 {
        print!("Use a score database? [s = sqlite, any other key = local file]: ");
        std::io::stdout().flush().ok();
        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_ok() && answer.trim().eq_ignore_ascii_case("s") {
            logger.info("server: using sqlite score database at scores.sqlite");
            return Ok(Arc::new(SqliteScoreDatabase::open("scores.sqlite")?));
        }
    }

    logger.info(format!("server: using local score file at {}", args.score_file.display()));
    Ok(Arc::new(LocalFileStore::new(&args.score_file)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let logger = Arc::new(Logger::new(args.verbose));

    let backend = build_score_backend(&args, &logger)?;
    let scores = Arc::new(ScoreStore::new(backend));

    let listener = TcpListener::bind(&args.bind).await?;
    logger.info(format!("server: listening on {}", args.bind));

    let server = Server::new(listener, logger.clone(), scores);
    server
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    logger.info("server: shut down");
    Ok(())
}
