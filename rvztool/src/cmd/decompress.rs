use std::{
    ffi::OsStr,
    fs::File,
    io::{BufReader, Write},
    path::{Path, PathBuf},
};

use argp::FromArgs;
use indicatif::{ProgressBar, ProgressStyle};
use rvz::{read::RvzReader, util::buf_copy, Error, Result, ResultContext};
use tracing::debug;

#[derive(FromArgs, Debug)]
/// Decompresses an RVZ image to ISO.
#[argp(subcommand, name = "decompress")]
pub struct Args {
    #[argp(positional)]
    /// path to RVZ file
    source: PathBuf,
    #[argp(positional)]
    /// output ISO file (default: SOURCE with the .rvz suffix replaced by .iso)
    target: Option<PathBuf>,
    #[argp(switch, short = 'v')]
    /// display progress
    verbose: bool,
}

const RVZ_EXTENSION: &str = "rvz";
const ISO_EXTENSION: &str = "iso";

fn default_target(source: &Path) -> Result<PathBuf> {
    if source.extension() == Some(OsStr::new(ISO_EXTENSION)) {
        return Err(Error::Other(format!(
            "source file {} already has .{} extension",
            source.display(),
            ISO_EXTENSION
        )));
    }
    if source.extension() == Some(OsStr::new(RVZ_EXTENSION)) {
        Ok(source.with_extension(ISO_EXTENSION))
    } else {
        let mut target = source.as_os_str().to_owned();
        target.push(".");
        target.push(ISO_EXTENSION);
        Ok(PathBuf::from(target))
    }
}

pub fn run(args: Args) -> Result<()> {
    let target = match args.target {
        Some(target) => target,
        None => default_target(&args.source)?,
    };
    let file = File::open(&args.source)
        .map_err(|e| Error::Io(format!("Failed to open {}", args.source.display()), e))?;
    let mut reader = RvzReader::new(Box::new(BufReader::new(file)))?;
    debug!(
        "{}: {} disc, {} compression, {} byte chunks",
        args.source.display(),
        reader.kind(),
        reader.compression(),
        reader.chunk_size()
    );

    let mut out = File::create(&target)
        .map_err(|e| Error::Io(format!("Failed to create {}", target.display()), e))?;
    let copied = if args.verbose {
        let pb = ProgressBar::new(reader.size());
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
            )
            .unwrap()
            .progress_chars("#>-"),
        );
        let mut writer = pb.wrap_write(&mut out);
        let copied = buf_copy(&mut reader, &mut writer).context("Writing ISO data")?;
        pb.finish();
        copied
    } else {
        buf_copy(&mut reader, &mut out).context("Writing ISO data")?
    };
    out.flush().context("Flushing output file")?;
    println!("Wrote {} bytes to {}", copied, target.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_target() {
        assert_eq!(default_target(Path::new("disc.rvz")).unwrap(), PathBuf::from("disc.iso"));
        assert_eq!(default_target(Path::new("disc")).unwrap(), PathBuf::from("disc.iso"));
        assert_eq!(
            default_target(Path::new("dir/disc.v1.rvz")).unwrap(),
            PathBuf::from("dir/disc.v1.iso")
        );
        assert!(default_target(Path::new("disc.iso")).is_err());
    }
}
