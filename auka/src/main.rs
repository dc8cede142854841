//! Blank glyph insertion tool.
//!
//! Takes a font file plus text, variation sequence and substitution rule
//! files, and writes a new font in which everything they mention is a valid
//! lookup. The input font is never modified.

use std::path::{Path, PathBuf};

use auka::{augment, output_path, Additions, AugmentError, LogSink};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about = "Adds blank glyphs to a TrueType font file.", long_about = None)]
struct Args {
    /// The font file to add glyphs to.
    #[arg(short, long)]
    font: Option<PathBuf>,

    /// Text files that contain characters to add.
    #[arg(short, long)]
    text: Vec<PathBuf>,

    /// Variation sequence data files.
    #[arg(short, long)]
    vs: Vec<PathBuf>,

    /// Alternate substitution rule files.
    #[arg(short, long)]
    gsub: Vec<PathBuf>,

    /// Where to write the output font (defaults to <font>_new.<ext>).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Only report errors.
    #[arg(short, long)]
    quiet: bool,

    /// Additional input files, classified by name: *.ttf and *.otf are font
    /// files, vs* are variation sequence files, gsub* are substitution rule
    /// files, anything else is a text file.
    files: Vec<PathBuf>,
}

enum FileKind {
    Font,
    Text,
    Sequences,
    Rules,
}

fn classify(path: &Path) -> FileKind {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    if matches!(extension.as_deref(), Some("ttf" | "otf")) {
        return FileKind::Font;
    }
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if name.starts_with("vs") {
        FileKind::Sequences
    } else if name.starts_with("gsub") {
        FileKind::Rules
    } else {
        FileKind::Text
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.quiet);
    match run(args) {
        Ok(path) => log::info!("saved successfully: {}", path.display()),
        Err(err) => {
            log::error!("{err}");
            std::process::exit(err.exit_code());
        }
    }
}

fn init_logging(quiet: bool) {
    let default = if quiet { "error" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn run(args: Args) -> Result<PathBuf, AugmentError> {
    let mut fonts: Vec<PathBuf> = args.font.into_iter().collect();
    let mut text = args.text;
    let mut sequences = args.vs;
    let mut rules = args.gsub;
    for file in args.files {
        match classify(&file) {
            FileKind::Font => fonts.push(file),
            FileKind::Text => text.push(file),
            FileKind::Sequences => sequences.push(file),
            FileKind::Rules => rules.push(file),
        }
    }

    if fonts.is_empty() {
        return Err(AugmentError::Usage("no font file specified".into()));
    }
    if fonts.len() > 1 {
        return Err(AugmentError::Usage("multiple font files specified".into()));
    }
    if text.is_empty() && sequences.is_empty() && rules.is_empty() {
        return Err(AugmentError::Usage(
            "no text, variation sequence or substitution rule files specified".into(),
        ));
    }
    let font_path = fonts.remove(0);

    log::debug!("font file = {}", font_path.display());
    for (label, files) in [("text", &text), ("VS", &sequences), ("GSUB", &rules)] {
        if !files.is_empty() {
            let names: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();
            log::debug!("{label} file(s) = {}", names.join(", "));
        }
    }

    let additions = Additions {
        characters: auka::load_characters(&text)?,
        sequences: auka::load_sequences(&sequences)?,
        rules: auka::load_rules(&rules)?,
    };

    let font_bytes = std::fs::read(&font_path)
        .map_err(|source| AugmentError::Io { path: font_path.clone(), source })?;
    let output = augment(&font_bytes, &additions, &mut LogSink)?;

    let out_path = args.output.unwrap_or_else(|| output_path(&font_path));
    log::info!("saving...");
    std::fs::write(&out_path, output)
        .map_err(|source| AugmentError::Io { path: out_path.clone(), source })?;
    Ok(out_path)
}
