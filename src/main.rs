use anyhow::{Context, Result as AnyhowResult};
use clap::{Parser, Subcommand};
use pathfuse::fuse::{FileSystemInterface, FuseWrapper, Stat, NO_HANDLE};
use pathfuse::vfs::{S_IFDIR, S_IFLNK, S_IFMT};
use pathfuse::PassthroughFs;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const READ_CHUNK: usize = 64 * 1024;

#[derive(Parser, Debug)]
#[command(name = "pathfuse")]
#[command(
    about = "Drive userspace filesystem callbacks against a host directory",
    long_about = None
)]
struct Args {
    /// Host directory exposed as the filesystem root
    #[arg(long, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Display file contents
    Cat { path: String },
    /// Replace file contents
    Write { path: String, content: String },
    /// Create a directory and its parents
    Mkdir {
        path: String,

        /// Permission bits, in octal
        #[arg(long, default_value = "755", value_parser = parse_mode)]
        mode: u32,
    },
    /// Remove a file or an empty directory
    Rm { path: String },
    /// Rename a file or directory
    Mv { from: String, to: String },
    /// Show file attributes
    Stat {
        /// Print the attributes as JSON
        #[arg(long)]
        json: bool,

        path: String,
    },
    /// Change the size of a file
    Truncate { path: String, size: i64 },
    /// Create a link
    Ln {
        /// Create a symbolic link instead of a hard link
        #[arg(short = 's', long = "symbolic")]
        symbolic: bool,

        target: String,
        path: String,
    },
    /// Print the target of a symbolic link
    Readlink { path: String },
}

fn parse_mode(s: &str) -> Result<u32, String> {
    u32::from_str_radix(s, 8).map_err(|e| format!("invalid octal mode '{}': {}", s, e))
}

/// Turn a negated errno into an error naming the failed operation.
fn check(code: i32, op: &str, path: &str) -> AnyhowResult<i32> {
    if code < 0 {
        anyhow::bail!("{} {}: {}", op, path, io::Error::from_raw_os_error(-code));
    }
    Ok(code)
}

fn type_char(mode: u32) -> char {
    match mode & S_IFMT {
        S_IFDIR => 'd',
        S_IFLNK => 'l',
        _ => 'f',
    }
}

fn ls(fs: &FuseWrapper, path: &str) -> AnyhowResult<()> {
    let (rc, dh) = fs.opendir(path);
    check(rc, "opendir", path)?;

    let mut entries = Vec::new();
    let rc = fs.readdir(
        path,
        &mut |name, stat, _| {
            let (mode, size) = stat.map(|s| (s.mode, s.size)).unwrap_or_default();
            entries.push((name.to_string(), mode, size));
            true
        },
        0,
        dh,
    );
    fs.releasedir(path, dh);
    check(rc, "readdir", path)?;

    for (name, mode, size) in entries {
        println!("{} {:>10} {}", type_char(mode), size, name);
    }
    Ok(())
}

fn cat(fs: &FuseWrapper, path: &str) -> AnyhowResult<()> {
    let (rc, fh) = fs.open(path, libc::O_RDONLY);
    check(rc, "open", path)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut offset = 0i64;
    let result = loop {
        let n = fs.read(path, &mut buf, offset, fh);
        match check(n, "read", path) {
            Ok(0) => break Ok(()),
            Ok(n) => {
                if let Err(e) = out.write_all(&buf[..n as usize]) {
                    break Err(anyhow::Error::new(e).context("Failed to write to stdout"));
                }
                offset += i64::from(n);
            }
            Err(e) => break Err(e),
        }
    };
    check(fs.release(path, fh), "release", path)?;
    result
}

fn write(fs: &FuseWrapper, path: &str, content: &[u8]) -> AnyhowResult<()> {
    let (rc, fh) = fs.create(path, libc::O_TRUNC, 0o644);
    check(rc, "create", path)?;

    let mut written = 0usize;
    let result = loop {
        if written == content.len() {
            break Ok(());
        }
        let n = fs.write(path, &content[written..], written as i64, fh);
        match check(n, "write", path) {
            Ok(0) => break Err(anyhow::anyhow!("write {}: no progress", path)),
            Ok(n) => written += n as usize,
            Err(e) => break Err(e),
        }
    };
    check(fs.release(path, fh), "release", path)?;
    result
}

fn stat(fs: &FuseWrapper, path: &str, json: bool) -> AnyhowResult<()> {
    let mut st = Stat::default();
    check(fs.getattr(path, &mut st, NO_HANDLE), "getattr", path)?;
    if json {
        let text = serde_json::to_string_pretty(&st).context("Failed to encode attributes")?;
        println!("{}", text);
    } else {
        println!("type: {}", type_char(st.mode));
        println!("mode: {:o}", st.mode & 0o7777);
        println!("size: {}", st.size);
        println!("mtime: {}.{:09}", st.mtim.sec, st.mtim.nsec);
    }
    Ok(())
}

fn rm(fs: &FuseWrapper, path: &str) -> AnyhowResult<()> {
    let mut st = Stat::default();
    check(fs.getattr(path, &mut st, NO_HANDLE), "getattr", path)?;
    if st.mode & S_IFMT == S_IFDIR {
        check(fs.rmdir(path), "rmdir", path)?;
    } else {
        check(fs.unlink(path), "unlink", path)?;
    }
    Ok(())
}

fn run(args: Args) -> AnyhowResult<()> {
    let root = args
        .root
        .canonicalize()
        .with_context(|| format!("Invalid root directory '{}'", args.root.display()))?;
    let fs = FuseWrapper::from_fs(PassthroughFs::new(root));
    fs.init();

    let result = match args.command {
        Commands::Ls { path } => ls(&fs, &path),
        Commands::Cat { path } => cat(&fs, &path),
        Commands::Write { path, content } => write(&fs, &path, content.as_bytes()),
        Commands::Mkdir { path, mode } => check(fs.mkdir(&path, mode), "mkdir", &path).map(drop),
        Commands::Rm { path } => rm(&fs, &path),
        Commands::Mv { from, to } => check(fs.rename(&from, &to), "rename", &from).map(drop),
        Commands::Stat { json, path } => stat(&fs, &path, json),
        Commands::Truncate { path, size } => {
            check(fs.truncate(&path, size, NO_HANDLE), "truncate", &path).map(drop)
        }
        Commands::Ln {
            symbolic,
            target,
            path,
        } => {
            let rc = if symbolic {
                fs.symlink(&target, &path)
            } else {
                fs.link(&target, &path)
            };
            check(rc, "ln", &path).map(drop)
        }
        Commands::Readlink { path } => {
            let (rc, target) = fs.readlink(&path);
            check(rc, "readlink", &path)?;
            println!("{}", target);
            Ok(())
        }
    };

    fs.destroy();
    result
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
