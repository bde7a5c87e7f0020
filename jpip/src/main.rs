use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use std::error;
use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use jpc::{
    decode_main_header, relevant_precincts, CodestreamError, CodestreamIndex, CommentMetadata,
    DecodeOptions, HeaderDialect, MainHeader, Round, Tile, ViewWindow,
};

#[derive(Debug)]
enum JpipError {
    DecodingHeader { path: String, error: CodestreamError },
    DecodingCodestream { path: String, error: CodestreamError },
    InvalidPair { value: String },
}

impl error::Error for JpipError {}
impl fmt::Display for JpipError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::DecodingHeader { path, error } => {
                write!(f, "error decoding main header of {}: {}", path, error.root())
            }
            Self::DecodingCodestream { path, error } => {
                write!(f, "error indexing codestream {}: {}", path, error.root())
            }
            Self::InvalidPair { value } => {
                write!(f, "expected two comma separated integers, found {:?}", value)
            }
        }
    }
}

#[derive(Parser)]
#[command(about = "JPEG2000 codestream inspection for JPIP")]
struct Opts {
    #[command(subcommand)]
    subcommand: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    /// Decode the main header of a .jpc / .j2c / .jpk codestream and print
    /// its parameters
    Header(HeaderArgs),

    /// Index the packets of a codestream, one line per precinct
    Index(IndexArgs),

    /// Print the in-class identifiers of the precincts a view window needs
    Window(WindowArgs),
}

#[derive(Args)]
struct Source {
    /// Path to the codestream
    path: String,

    /// Only try this header dialect (jpc or jpk)
    #[arg(long, value_parser = parse_dialect)]
    dialect: Option<HeaderDialect>,

    /// Do not check SOP sequence numbers
    #[arg(long)]
    no_sop_check: bool,
}

impl Source {
    fn options(&self) -> DecodeOptions {
        let mut options = DecodeOptions {
            check_sop_sequence: !self.no_sop_check,
            ..Default::default()
        };
        if let Some(dialect) = self.dialect {
            options.dialects = vec![dialect];
        }
        options
    }

    fn open(&self) -> Result<BufReader<File>, Box<dyn Error>> {
        Ok(BufReader::new(File::open(Path::new(&self.path))?))
    }

    fn main_header(&self) -> Result<MainHeader, Box<dyn Error>> {
        let mut reader = self.open()?;
        decode_main_header(&mut reader, &self.options()).map_err(|error| {
            JpipError::DecodingHeader {
                path: self.path.clone(),
                error,
            }
            .into()
        })
    }
}

#[derive(Args)]
struct HeaderArgs {
    #[command(flatten)]
    source: Source,
}

#[derive(Args)]
struct IndexArgs {
    #[command(flatten)]
    source: Source,
}

#[derive(Args)]
struct WindowArgs {
    #[command(flatten)]
    source: Source,

    /// Requested frame size, fsiz
    #[arg(long, value_parser = parse_pair)]
    fsiz: (u32, u32),

    /// Region offset within the frame, roff
    #[arg(long, value_parser = parse_pair)]
    roff: Option<(u32, u32)>,

    /// Region size within the frame, rsiz
    #[arg(long, value_parser = parse_pair)]
    rsiz: Option<(u32, u32)>,

    /// Components, comma separated
    #[arg(long, value_delimiter = ',')]
    comps: Option<Vec<u16>>,

    /// Number of quality layers
    #[arg(long)]
    layers: Option<u16>,

    /// Pick the smallest frame covering fsiz instead of the largest fitting
    /// within it
    #[arg(long)]
    round_up: bool,
}

fn parse_pair(value: &str) -> Result<(u32, u32), JpipError> {
    let invalid = || JpipError::InvalidPair {
        value: value.to_owned(),
    };
    let (x, y) = value.split_once(',').ok_or_else(invalid)?;
    let x = x.trim().parse().map_err(|_| invalid())?;
    let y = y.trim().parse().map_err(|_| invalid())?;
    Ok((x, y))
}

fn parse_dialect(value: &str) -> Result<HeaderDialect, String> {
    match value {
        "jpc" | "j2c" => Ok(HeaderDialect::Jpc),
        "jpk" => Ok(HeaderDialect::Jpk),
        _ => Err(format!("unknown header dialect {:?}", value)),
    }
}

fn print_header(header: &MainHeader) {
    let sizing = header.sizing();
    let coding = header.coding();

    println!("dialect: {}", header.dialect());
    println!("header: {} bytes at byte offset {}", header.length(), header.offset());
    println!(
        "reference grid: {}x{}, image offset ({}, {})",
        sizing.reference_grid_width(),
        sizing.reference_grid_height(),
        sizing.image_horizontal_offset(),
        sizing.image_vertical_offset()
    );
    println!(
        "progression: {}, layers: {}, SOP: {}, EPH: {}",
        coding.progression_order(),
        coding.no_layers(),
        coding.sop_allowed(),
        coding.eph_used()
    );

    for (c, (component, parameters)) in sizing
        .components()
        .iter()
        .zip(header.components())
        .enumerate()
    {
        let coding = parameters.coding();
        let precincts: Vec<String> = coding
            .precinct_sizes()
            .iter()
            .map(|size| format!("{}x{}", 1u32 << size.width_exponent(), 1u32 << size.height_exponent()))
            .collect();
        println!(
            "component {}: {} bits{}, separation {}x{}, {} levels, codeblocks {}x{}, precincts [{}]",
            c,
            component.precision(),
            if component.values_are_signed() { " signed" } else { "" },
            component.horizontal_separation(),
            component.vertical_separation(),
            coding.no_decomposition_levels(),
            coding.code_block_width(),
            coding.code_block_height(),
            precincts.join(", ")
        );
    }

    for comment in header.comments() {
        match comment {
            CommentMetadata::Text(text) => println!("comment: {}", text),
            CommentMetadata::LayerInfo(layers) => println!("layer info: {} layers", layers.len()),
            CommentMetadata::RateDistortionSlopes(slopes) => {
                println!("rate-distortion slopes: {:?}", slopes)
            }
            CommentMetadata::PredictiveModel { values, .. } => {
                println!("predictive model: {} values", values.len())
            }
        }
    }
}

fn index(source: &Source) -> Result<(), Box<dyn Error>> {
    let mut reader = source.open()?;
    let mut index = CodestreamIndex::new(source.options());
    if let Err(error) = index.index(&mut reader) {
        return Err(JpipError::DecodingCodestream {
            path: source.path.clone(),
            error,
        }
        .into());
    }
    if index.is_truncated() {
        warn!("{} is truncated", source.path);
    }

    let Some(tile) = index.tile() else {
        return Ok(());
    };
    for id in index.precinct_ids() {
        let tcrp = tile.find_tcrp(id)?;
        let packets = index.packets(id);
        let bytes: u64 = packets.iter().map(|packet| packet.len()).sum();
        println!("{}\t{}\t{}\t{}", id, tcrp, packets.len(), bytes);
    }
    info!("{} packets", index.packet_count());
    Ok(())
}

fn window(args: &WindowArgs) -> Result<(), Box<dyn Error>> {
    let header = args.source.main_header()?;
    let tile = Tile::new(&header)?;

    let mut window = ViewWindow::new(args.fsiz.0, args.fsiz.1);
    window.offset = args.roff.unwrap_or((0, 0));
    window.size = args.rsiz;
    window.components = args.comps.clone();
    window.layers = args.layers;
    if args.round_up {
        window.round = Round::Up;
    }

    let discard_levels = window.discard_levels(&tile);
    let (width, height) = jpc::window::frame_size(&tile, discard_levels);
    info!(
        "frame {}x{} at {} discarded levels, region {}",
        width,
        height,
        discard_levels,
        window.region(&tile)
    );
    for id in relevant_precincts(&tile, &window) {
        println!("{}", id);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let opts: Opts = Opts::parse();

    match opts.subcommand {
        SubCommand::Header(c) => {
            let header = c.source.main_header()?;
            print_header(&header);
        }
        SubCommand::Index(c) => index(&c.source)?,
        SubCommand::Window(c) => window(&c)?,
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    match run() {
        Err(e) => Err(e.to_string().into()),
        Ok(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pair() {
        assert_eq!(parse_pair("640,480").unwrap(), (640, 480));
        assert_eq!(parse_pair(" 1, 2").unwrap(), (1, 2));
        assert!(parse_pair("640").is_err());
        assert!(parse_pair("a,b").is_err());
    }

    #[test]
    fn test_parse_dialect() {
        assert_eq!(parse_dialect("jpk").unwrap(), HeaderDialect::Jpk);
        assert!(parse_dialect("jp2").is_err());
    }

    #[test]
    fn test_command_line() {
        let opts = Opts::try_parse_from([
            "jpip", "window", "image.jpc", "--fsiz", "320,240", "--comps", "0,2", "--round-up",
        ])
        .unwrap();
        match opts.subcommand {
            SubCommand::Window(args) => {
                assert_eq!(args.fsiz, (320, 240));
                assert_eq!(args.comps, Some(vec![0, 2]));
                assert!(args.round_up);
                assert_eq!(args.source.path, "image.jpc");
            }
            _ => panic!("expected the window subcommand"),
        }
    }
}
