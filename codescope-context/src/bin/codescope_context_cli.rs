use clap::Parser;
use codescope_context::{ExtractorRegistry, Language};
use std::fs;
use std::io::{self, Read};
use std::path::Path;

/// Split one source file into chunks and print them as JSON.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input source file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Workspace-relative path recorded on the chunks.
    /// Defaults to the input path, or `stdin` when reading from stdin.
    #[arg(short, long)]
    path: Option<String>,

    /// Language id or extension. Detected from the path when omitted.
    #[arg(short, long)]
    language: Option<String>,

    /// Print only the structural chunks, without the whole-file chunk.
    #[arg(long)]
    no_whole_file: bool,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let content = if let Some(input_path) = &args.input {
        fs::read_to_string(input_path)?
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let path = args
        .path
        .or(args.input)
        .unwrap_or_else(|| "stdin".to_string())
        .replace('\\', "/");
    let language = match args.language.as_deref() {
        Some(name) => name.parse().unwrap_or(Language::Unknown),
        None => Language::from_path(Path::new(&path)),
    };

    let registry = ExtractorRegistry::default();
    let mut chunks = registry.extract(&content, language, &path);
    if args.no_whole_file {
        chunks.remove(0);
    }
    for chunk in &mut chunks {
        chunk.ensure_id();
    }

    let json_output = serde_json::to_string_pretty(&chunks)?;
    println!("{}", json_output);

    Ok(())
}
