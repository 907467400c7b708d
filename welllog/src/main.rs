use std::path::PathBuf;

use structopt::clap::AppSettings::*;
use structopt::StructOpt;

mod commands;
mod error;

use commands::ReadArgs;

#[derive(Debug, StructOpt)]
struct ReadFlags {
    #[structopt(
        short,
        long,
        help = "Record recoverable faults and carry on with the next record"
    )]
    keep_going: bool,

    #[structopt(long, help = "Do not validate checksums")]
    no_checksum: bool,

    #[structopt(
        long,
        help = "LIS: null padding after each physical record to this modulo [default: none]"
    )]
    padding: Option<u64>,

    #[structopt(long, help = "LIS: detect the padding from the first physical records")]
    probe_padding: bool,

    #[structopt(long, help = "Reject frames or visible records longer than this")]
    max_frame_length: Option<u64>,
}

impl From<ReadFlags> for ReadArgs {
    fn from(flags: ReadFlags) -> ReadArgs {
        ReadArgs {
            keep_going: flags.keep_going,
            no_checksum: flags.no_checksum,
            padding: flags.padding,
            probe_padding: flags.probe_padding,
            max_frame_length: flags.max_frame_length,
        }
    }
}

#[derive(Debug, StructOpt)]
enum Commands {
    #[structopt(name = "l", visible_alias = "list", about = "List the logical records of a file")]
    List {
        #[structopt(name = "logfile", parse(from_os_str), help = "Path to the LIS or RP66V1 file")]
        path: PathBuf,

        #[structopt(flatten)]
        flags: ReadFlags,
    },

    #[structopt(name = "i", visible_alias = "index", about = "Build the offset index of a file")]
    Index {
        #[structopt(name = "logfile", parse(from_os_str), help = "Path to the LIS or RP66V1 file")]
        path: PathBuf,

        #[structopt(
            short,
            long,
            parse(from_os_str),
            help = "Save the index as JSON to this path"
        )]
        output: Option<PathBuf>,

        #[structopt(flatten)]
        flags: ReadFlags,
    },

    #[structopt(
        name = "v",
        visible_alias = "verify",
        about = "Read every record with checksums and check a saved index"
    )]
    Verify {
        #[structopt(name = "logfile", parse(from_os_str), help = "Path to the LIS or RP66V1 file")]
        path: PathBuf,

        #[structopt(long, parse(from_os_str), help = "Saved index to check against the file")]
        index: Option<PathBuf>,

        #[structopt(flatten)]
        flags: ReadFlags,
    },

    #[structopt(
        name = "t",
        visible_alias = "detif",
        about = "Strip TIF tape markers from a file"
    )]
    Detif {
        #[structopt(name = "input", parse(from_os_str), help = "TIF wrapped file")]
        input: PathBuf,

        #[structopt(
            name = "output",
            parse(from_os_str),
            help = "Where to write the stripped file; omit for a dry run"
        )]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "welllog",
    about = "Inspect the record framing of LIS and RP66V1 well-log files.",
    settings = &[SubcommandRequiredElseHelp, DisableHelpSubcommand, VersionlessSubcommands],
    usage = "welllog (l|i|v|t) [FLAGS|OPTIONS] <logfile>"
)]
struct CliOpts {
    #[structopt(short, long, help = "Show verbose output", global = true)]
    verbose: bool,

    #[structopt(subcommand)]
    cmd: Commands,
}

fn main() {
    let opts = CliOpts::from_args();

    let level = if opts.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let result = match opts.cmd {
        Commands::List { path, flags } => commands::list(path, opts.verbose, flags.into()),
        Commands::Index {
            path,
            output,
            flags,
        } => commands::index(path, output, flags.into()),
        Commands::Verify { path, index, flags } => commands::verify(path, index, flags.into()),
        Commands::Detif { input, output } => commands::detif(input, output),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        let mut source = std::error::Error::source(&e);
        while let Some(cause) = source {
            eprintln!("  caused by: {}", cause);
            source = std::error::Error::source(cause);
        }
        std::process::exit(1);
    }
}
