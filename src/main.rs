use clap::{Parser, Subcommand};
use std::path::PathBuf;
use strongbox::crypto::identity::Identity;
use strongbox::file_manager::{ModeOption, OpenOptions};
use strongbox::{recovery, Handle};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sbx", version = "1.0.0", about = "The strongbox container format CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack one or more files into a container
    Pack {
        #[arg(short, long)]
        output: PathBuf,
        /// Compress entries with the generic deflate codec
        #[arg(short, long)]
        compress: bool,
        /// Encrypt entries with a passphrase (AES-256-GCM)
        #[arg(short, long)]
        password: Option<String>,
        /// Sign the finished container with this PKCS#8 private key (PEM)
        #[arg(long, requires = "cert")]
        key: Option<PathBuf>,
        /// X.509 certificate (DER) to embed alongside the signature
        #[arg(long, requires = "key")]
        cert: Option<PathBuf>,
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
    },
    /// Unpack a container
    Unpack {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
        #[arg(short, long)]
        password: Option<String>,
    },
    /// List container contents, optionally filtered by a glob pattern
    List {
        input: PathBuf,
        #[arg(default_value = "*")]
        pattern: String,
    },
    /// Show container metadata
    Info { input: PathBuf },
    /// Verify the container's embedded signature
    Verify { input: PathBuf },
    /// Full directory-bypass recovery: scan, assess, and extract all recoverable entries
    Recover {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Print a per-entry health log
        #[arg(long)]
        verbose: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    match Cli::parse().command {
        // ── Pack ─────────────────────────────────────────────────────────
        Commands::Pack { output, compress, password, key, cert, input } => {
            let handle = strongbox::file_manager::open(
                &output,
                OpenOptions { mode: ModeOption::Write, passphrase: None },
            )?;
            for path in &input {
                let data = std::fs::read(path)?;
                let name = path.file_name().unwrap().to_string_lossy().into_owned();
                let written = match &password {
                    Some(pwd) => handle.write_encrypted(&name, &data, compress, pwd)?,
                    None => handle.write(&name, &data, compress)?,
                };
                println!("  packed  {} ({} B -> {} B)", path.display(), data.len(), written);
            }
            if let (Some(key_path), Some(cert_path)) = (&key, &cert) {
                let identity = Identity::open(key_path, cert_path, None)?;
                handle.set_identity(identity)?;
            }
            strongbox::file_manager::close(handle)?;
            let size = std::fs::metadata(&output)?.len();
            println!("Created: {}  ({} B on disk)", output.display(), size);
        }

        // ── Unpack ───────────────────────────────────────────────────────
        Commands::Unpack { input, output_dir, password } => {
            let handle = open_read(&input)?;
            std::fs::create_dir_all(&output_dir)?;
            for name in handle.list("*")? {
                let data = match &password {
                    Some(pwd) => handle.read_encrypted(&name, pwd)?,
                    None => handle.read(&name)?,
                };
                std::fs::write(output_dir.join(&name), &data)?;
            }
            println!("Unpacked to: {}", output_dir.display());
        }

        // ── List ─────────────────────────────────────────────────────────
        Commands::List { input, pattern } => {
            let data = std::fs::read(&input)?;
            let container = strongbox::Container::open_owned(data)?;
            let matcher = glob::Pattern::new(&pattern)?;

            println!("Container: {}", input.display());
            println!("{:<28} {:>12} {:>12}  flags", "Name", "Stored", "Raw");
            let mut matched = 0usize;
            for entry in container.entries() {
                if !matcher.matches(&entry.name) {
                    continue;
                }
                matched += 1;
                let flags = format!(
                    "{}{}{}",
                    if entry.is_compressed() { "c" } else { "-" },
                    if entry.is_ciphered() { "e" } else { "-" },
                    if entry.is_alias() { "a" } else { "-" },
                );
                println!("{:<28} {:>12} {:>12}  {flags}", entry.name, entry.stored_size, entry.decompressed_size);
            }
            println!("{matched} of {} entries matched", container.num_entries());
        }

        // ── Info ─────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let file_size = std::fs::metadata(&input)?.len();
            let data = std::fs::read(&input)?;
            let container = strongbox::Container::open_owned(data)?;

            println!("── strongbox container ──────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  File size      {} B ({:.2} MiB)", file_size, file_size as f64 / 1048576.0);
            println!("  Entries        {}", container.num_entries());
            println!("  Dictionary     {} string(s)", container.dictionary().len());
            println!("  SHA-1          {}", hex::encode(container.sha1()));
            match container.signature_trailer() {
                Some(trailer) => {
                    println!("  Signed         yes ({} B signature)", trailer.signature.len());
                    match strongbox::crypto::identity::describe_certificate(&trailer.x509_der) {
                        Ok(desc) => println!("  Certificate\n{desc}"),
                        Err(e) => println!("  Certificate    <unreadable: {e}>"),
                    }
                }
                None => println!("  Signed         no"),
            }
            for entry in container.entries() {
                println!(
                    "    {:<28} {:>10} B stored, {:>10} B raw  compress={} cipher={} alias={}",
                    entry.name,
                    entry.stored_size,
                    entry.decompressed_size,
                    entry.is_compressed(),
                    entry.is_ciphered(),
                    entry.is_alias(),
                );
            }
        }

        // ── Verify ───────────────────────────────────────────────────────
        Commands::Verify { input } => {
            let data = std::fs::read(&input)?;
            let container = strongbox::Container::open_owned(data)?;
            match container.verify_signature() {
                Ok(()) => println!("Signature OK"),
                Err(e) => {
                    println!("Signature INVALID: {e}");
                    std::process::exit(1);
                }
            }
        }

        // ── Recover ──────────────────────────────────────────────────────
        Commands::Recover { input, output, verbose } => {
            println!("── Directory-bypass recovery ────────────────────────────");
            println!("  Source: {}", input.display());
            println!("  Output: {}", output.display());

            let data = std::fs::read(&input)?;
            let (builder, report) = recovery::extract_recoverable(&data);
            let bytes = builder.finish(None)?;
            std::fs::write(&output, &bytes)?;

            println!();
            println!("  {}", report.summary());
            println!("  Entries scanned:     {}", report.total_entries);
            println!("  Healthy entries:     {}", report.healthy_entries);
            println!("  Truncated entries:   {}", report.truncated_entries);
            println!("  Corrupt entries:     {}", report.corrupt_entries);
            println!("  Recoverable:         {:.2} KiB", report.recoverable_bytes as f64 / 1024.0);
            println!("  Quality:             {:?}", report.quality);

            if verbose {
                println!();
                println!("  ── Entry log ────────────────────────────────────────");
                for entry in &report.entry_log {
                    let status = match &entry.health {
                        strongbox::recovery::EntryHealth::Healthy => "\u{2713} healthy".into(),
                        strongbox::recovery::EntryHealth::Truncated { declared_end, file_len } => {
                            format!("\u{26a0} truncated ({declared_end} declared, {file_len} available)")
                        }
                        strongbox::recovery::EntryHealth::DirectoryOverlap => "\u{2717} directory overlap".into(),
                        strongbox::recovery::EntryHealth::DecodeFailed(msg) => format!("\u{2717} decode failed: {msg}"),
                    };
                    println!("  [{:>4}]  {:<28} {status}", entry.offset, entry.name);
                }
            }

            println!();
            println!("Recovery complete -> {}", output.display());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────

fn open_read(path: &PathBuf) -> Result<Handle, Box<dyn std::error::Error>> {
    Ok(strongbox::file_manager::open(
        path,
        OpenOptions { mode: ModeOption::Read, passphrase: None },
    )?)
}
