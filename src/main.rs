use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use gridfill::{generate_grid_config_from_template, render_grid, solve};

#[derive(Parser)]
#[command(
    name = "gridfill",
    about = "Fill a crossword grid from a word list, or report that no fill exists",
    version
)]
struct Cli {
    /// Grid structure template: `.` for open cells, `#` for blocks
    structure: PathBuf,

    /// Word list, one word per line
    words: PathBuf,

    /// Write the rendered grid to this file as well as stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print solver statistics after the grid
    #[arg(short, long)]
    stats: bool,
}

fn load_word_list(path: &PathBuf) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read word list {}", path.display()))?;

    Ok(contents
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let template = fs::read_to_string(&cli.structure)
        .with_context(|| format!("failed to read structure {}", cli.structure.display()))?;
    let words = load_word_list(&cli.words)?;

    let config = generate_grid_config_from_template(&words, &template)?;

    match solve(&config) {
        Some(solution) => {
            let rendered = render_grid(&config, &solution.choices);
            println!("{rendered}");

            if cli.stats {
                println!("{:?}", solution.statistics);
            }

            if let Some(path) = &cli.output {
                fs::write(path, &rendered)
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }
        }
        None => println!("No solution."),
    }

    Ok(())
}
