mod logging;

use std::fs::File;
use std::path::{Path, PathBuf};

use libmpo::{MpoFile, MpoError};

use log::{error, info, LevelFilter};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The MPO file to process.
    #[arg(short='i', long="input")]
    input_file_path: String,
    /// The directory to write the individual JPEG streams to, as `<stem>_<index>.jpg`.
    /// If not specified, nothing is written.
    #[arg(short='o', long="output-dir")]
    output_dir_path: Option<String>,
    /// Decode every individual image and report its dimensions.
    #[arg(long)]
    decode: bool,
    /// Also write the log to this file.
    #[arg(long="log-file")]
    log_file_path: Option<String>,
    /// Raise the log level; repeat for more.
    #[arg(short='v', long="verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut logging_config = logging::LoggingConfig::default().with_level(level);
    if let Some(log_file_path) = &args.log_file_path {
        logging_config = logging_config.output_to_file(log_file_path);
    }
    if let Err(e) = logging_config.apply() {
        eprintln!("Failed to set up logging: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(&args) {
        error!("Error processing {}: {}", args.input_file_path, e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), MpoError> {
    let input = File::open(&args.input_file_path)?;
    let mut mpo_file = MpoFile::open(input)?;

    let Some(mpf_info) = mpo_file.mpf_info() else {
        info!(
            "{} carries no usable MPF information; treating it as a plain JPEG",
            args.input_file_path
        );
        if args.decode {
            let jpeg = mpo_file.decode_primary()?;
            let (width, height) = jpeg.extent();
            info!("image #0 is: {}x{}", width, height);
        }
        return Ok(());
    };

    let index_ifd = mpf_info.index_ifd();
    info!("MPF version: {}", String::from_utf8_lossy(&index_ifd.version));
    info!("Number of images: {}", index_ifd.number_of_images);

    let image_ranges = mpo_file.image_ranges()?;
    for (index, (offset, size)) in image_ranges.iter().enumerate() {
        info!("image #{}: {} bytes at offset {}", index, size, offset);
    }

    for index in 0..image_ranges.len() {
        if let Some(output_dir_path) = &args.output_dir_path {
            let bytes = mpo_file.read_image_bytes(index)?;
            let output_file_path =
                output_file_path(Path::new(output_dir_path), &args.input_file_path, index);
            std::fs::write(&output_file_path, &bytes)?;
            info!("Wrote {}", output_file_path.display());
        }

        if args.decode {
            let jpeg = mpo_file.decode_image(index)?;
            let (width, height) = jpeg.extent();
            info!("image #{} is: {}x{}", index, width, height);
        }
    }

    Ok(())
}

fn output_file_path(output_dir_path: &Path, input_file_path: &str, index: usize) -> PathBuf {
    let stem = Path::new(input_file_path)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("image");
    output_dir_path.join(format!("{}_{}.jpg", stem, index))
}
