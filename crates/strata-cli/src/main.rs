//! The `strata` command: mount vintage disk and tape images and operate
//! on their files. Every command is one driver operation; diagnostics
//! print in the classic `?CMD-F-Message` form and the exit code is 0 on
//! success, 1 on failure.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use strata::{ByteFile, DirOptions, ExamineOptions, FileMode, Filesystem, FsError};

#[derive(Debug, Parser)]
#[command(name = "strata", version, about = "Vintage disk and tape image tool")]
struct Arguments {
    /// Filesystem type (rt11, dos11, os8, ...)
    #[arg(short = 't', long = "fstype", global = true, default_value = "rt11")]
    fstype: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the directory of an image
    Dir {
        image: PathBuf,
        pattern: Option<String>,
        /// Names only
        #[arg(long)]
        brief: bool,
        /// Extended listing
        #[arg(long)]
        full: bool,
        /// List directories / UICs
        #[arg(long)]
        uic: bool,
    },
    /// Print a file as text
    Type { image: PathBuf, path: String },
    /// Copy a file out of the image to the host
    Read {
        image: PathBuf,
        path: String,
        destination: PathBuf,
        /// Transfer in ASCII mode
        #[arg(long)]
        ascii: bool,
    },
    /// Copy a host file into the image
    Write {
        image: PathBuf,
        source: PathBuf,
        path: String,
        /// Transfer in ASCII mode
        #[arg(long)]
        ascii: bool,
        /// File type tag for formats that carry one
        #[arg(long = "type")]
        file_type: Option<String>,
    },
    /// Copy a file within the image
    Copy {
        image: PathBuf,
        source: String,
        destination: String,
    },
    /// Delete a file
    Del { image: PathBuf, path: String },
    /// Create an empty file of the given block count
    Create {
        image: PathBuf,
        path: String,
        blocks: u64,
    },
    /// Write an empty filesystem onto the image
    Init {
        image: PathBuf,
        /// Create the image file with this size in blocks
        #[arg(long)]
        blocks: Option<u64>,
    },
    /// Examine filesystem metadata or one file's internals
    Examine {
        image: PathBuf,
        arg: Option<String>,
        #[arg(long)]
        full: bool,
        /// Show the free map
        #[arg(long)]
        bitmap: bool,
    },
    /// Hex dump of a file or block range
    Dump {
        image: PathBuf,
        path: Option<String>,
        #[arg(long)]
        start: Option<u64>,
        #[arg(long)]
        end: Option<u64>,
    },
    /// List the file types the filesystem understands
    Types { image: PathBuf },
    /// List the supported filesystem tags
    Show,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Dir { .. } => "DIR",
            Command::Type { .. } => "TYPE",
            Command::Read { .. } => "READ",
            Command::Write { .. } => "WRITE",
            Command::Copy { .. } => "COPY",
            Command::Del { .. } => "DEL",
            Command::Create { .. } => "CREATE",
            Command::Init { .. } => "INIT",
            Command::Examine { .. } => "EXAMINE",
            Command::Dump { .. } => "DUMP",
            Command::Types { .. } => "TYPES",
            Command::Show => "SHOW",
        }
    }
}

fn open_image(path: &PathBuf, writable: bool) -> Result<ByteFile, FsError> {
    if writable {
        ByteFile::open(path).map_err(FsError::from)
    } else {
        ByteFile::open_read_only(path).map_err(FsError::from)
    }
}

fn mount(fstype: &str, path: &PathBuf, writable: bool) -> Result<Box<dyn Filesystem>, FsError> {
    strata::mount(fstype, open_image(path, writable)?)
}

fn run(fstype: &str, command: &Command) -> Result<(), FsError> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match command {
        Command::Dir {
            image,
            pattern,
            brief,
            full,
            uic,
        } => {
            let mut fs = mount(fstype, image, false)?;
            let options = DirOptions {
                brief: *brief,
                full: *full,
                uic: *uic,
            };
            fs.dir("DK", pattern.as_deref(), &options, &mut out)?;
        }
        Command::Type { image, path } => {
            let mut fs = mount(fstype, image, false)?;
            let data = fs.read_bytes(path, Some(FileMode::Ascii))?;
            out.write_all(&data).map_err(FsError::Io)?;
        }
        Command::Read {
            image,
            path,
            destination,
            ascii,
        } => {
            let mut fs = mount(fstype, image, false)?;
            let mode = if *ascii { FileMode::Ascii } else { FileMode::Image };
            let data = fs.read_bytes(path, Some(mode))?;
            std::fs::write(destination, data).map_err(FsError::Io)?;
        }
        Command::Write {
            image,
            source,
            path,
            ascii,
            file_type,
        } => {
            let data = std::fs::read(source).map_err(FsError::Io)?;
            let mode = if *ascii { FileMode::Ascii } else { FileMode::Image };
            let mut fs = mount(fstype, image, true)?;
            fs.write_bytes(path, &data, None, file_type.as_deref(), Some(mode))?;
            fs.close()?;
        }
        Command::Copy {
            image,
            source,
            destination,
        } => {
            let mut fs = mount(fstype, image, true)?;
            let data = fs.read_bytes(source, Some(FileMode::Image))?;
            let entry = fs.entry(source)?;
            fs.write_bytes(
                destination,
                &data,
                entry.creation_date,
                entry.file_type.as_deref(),
                Some(FileMode::Image),
            )?;
            fs.close()?;
        }
        Command::Del { image, path } => {
            let mut fs = mount(fstype, image, true)?;
            fs.delete(path)?;
            fs.close()?;
        }
        Command::Create {
            image,
            path,
            blocks,
        } => {
            let mut fs = mount(fstype, image, true)?;
            fs.create_file(path, *blocks, None, None)?;
            fs.close()?;
        }
        Command::Init { image, blocks } => {
            let file = match blocks {
                Some(blocks) => {
                    ByteFile::create(image, blocks * strata::BLOCK_SIZE as u64)
                        .map_err(FsError::Io)?
                }
                None => open_image(image, true)?,
            };
            let mut fs = strata::initialize(fstype, file)?;
            fs.close()?;
        }
        Command::Examine {
            image,
            arg,
            full,
            bitmap,
        } => {
            let mut fs = mount(fstype, image, false)?;
            let options = ExamineOptions {
                full: *full,
                bitmap: *bitmap,
                free: false,
            };
            fs.examine(arg.as_deref(), &options, &mut out)?;
        }
        Command::Dump {
            image,
            path,
            start,
            end,
        } => {
            let mut fs = mount(fstype, image, false)?;
            fs.dump(path.as_deref(), *start, *end, &mut out)?;
        }
        Command::Types { image } => {
            let fs = mount(fstype, image, false)?;
            let types = fs.file_types();
            if types.is_empty() {
                writeln!(out, "{}: no file type tags", fstype).map_err(FsError::Io)?;
            } else {
                for t in types {
                    writeln!(out, "{}", t).map_err(FsError::Io)?;
                }
            }
        }
        Command::Show => {
            for fstype in strata::fs_types() {
                writeln!(out, "{}", fstype).map_err(FsError::Io)?;
            }
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Arguments::parse();
    if let Err(error) = run(&args.fstype, &args.command) {
        eprintln!("?{}-F-{}", args.command.name(), error);
        std::process::exit(1);
    }
}
