use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use csv_importer::importer::structure_cache::load_structure;
use csv_importer::importer::{
    CsvBatchReader, ImportEngine, ImportLock, Model, ProcessingState, batch::DEFAULT_BATCH_SIZE,
};

#[derive(Parser, Debug)]
#[command(
    name = "import_csv",
    about = "Import, preview or purge one data model described in the structure file"
)]
struct Args {
    /// Model name as declared in the structure file.
    model: String,

    /// YAML structure file.
    #[arg(long, env = "IMPORTER_STRUCTURE_PATH", default_value = "./structure.yml")]
    structure: PathBuf,

    /// Directory holding `<csv_file_name>.csv` files.
    #[arg(long, env = "IMPORTER_CSV_BASE_PATH", default_value = "./csv")]
    csv_base_path: PathBuf,

    /// Rows per INSERT statement.
    #[arg(long, env = "IMPORTER_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Read rows from this file instead of the configured one.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Delete every row of the model's table instead of importing.
    #[arg(long, conflicts_with = "preview")]
    purge: bool,

    /// Print the first rows of the CSV file and its line count, then exit.
    #[arg(long, value_name = "ROWS", num_args = 0..=1, default_missing_value = "20")]
    preview: Option<usize>,

    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();

    let structure = load_structure(&args.structure)?;
    let mut model = match args.file.clone() {
        Some(path) => Model::with_csv_file(&structure, &args.model, path),
        None => Model::new(&structure, &args.model),
    };

    if !model.is_valid() {
        writeln!(
            io::stderr(),
            "error: {}",
            model.message().unwrap_or("invalid data model")
        )?;
        return Ok(ExitCode::FAILURE);
    }

    if let Some(limit) = args.preview {
        let path = model.csv_path(&args.csv_base_path);
        let mut reader = CsvBatchReader::open(&path)?;
        let rows = reader.preview(limit)?;
        let lines = reader.count_lines()?;

        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", model.labels().join("\t"))?;
        for row in rows {
            writeln!(stdout, "{}", row.join("\t"))?;
        }
        writeln!(stdout, "-- {} line(s) in {}", lines, path.display())?;
        return Ok(ExitCode::SUCCESS);
    }

    let Some(database_url) = args.database_url else {
        writeln!(io::stderr(), "error: DATABASE_URL is not set")?;
        return Ok(ExitCode::FAILURE);
    };
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await?;

    let engine =
        ImportEngine::with_settings(pool, ImportLock::new(), args.csv_base_path, args.batch_size);

    let state = if args.purge {
        model.purge(&engine).await
    } else {
        model.import(&engine).await
    };

    let message = model.message().unwrap_or_default();
    match state {
        ProcessingState::Success => {
            writeln!(io::stdout(), "{message}")?;
            Ok(ExitCode::SUCCESS)
        }
        ProcessingState::Warning => {
            writeln!(io::stderr(), "warning: {message}")?;
            Ok(ExitCode::from(2))
        }
        ProcessingState::Error | ProcessingState::Unprocessed => {
            writeln!(io::stderr(), "error: {message}")?;
            Ok(ExitCode::FAILURE)
        }
    }
}
