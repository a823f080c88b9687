use clap::Parser;
use env_logger::Env;
use hp4195_dump::extract_font_file;
use hp4195_dump::rom::GLYPH_COUNT;
use log::info;
use std::path::PathBuf;

/// Extract the character font table from an HP 4195A ROM dump
#[derive(Parser, Debug)]
#[command(name = "hp4195-font")]
#[command(about = "Extract the character font from an HP 4195A ROM dump", long_about = None)]
struct Args {
    /// Binary ROM dump
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Output file for the raw font table
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Print every glyph as ASCII art
    #[arg(long)]
    show: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();
    let table = extract_font_file(&args.input)?;

    std::fs::write(&args.output, table.as_bytes())?;
    info!(
        "Wrote {} bytes of font data to {}",
        table.as_bytes().len(),
        args.output.display()
    );

    if args.show {
        for index in 0..GLYPH_COUNT {
            if let Some(glyph) = table.render(index) {
                println!("0x{index:02x}\n{glyph}");
            }
        }
    }

    Ok(())
}
