// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use hull_capability::Caps;
use hull_capability::db::Db;
use hull_cli::commands::{self, VerifySession, VerifyTarget};
use hull_manifest::derive_promises;
use hull_runtime::{RuntimeConfig, RuntimeKind, select};
use hull_sandbox::Sandbox;
use hull_server::ServeOptions;
use hull_server::session::SessionStore;
use hull_signature::{SignatureError, verify_manifest};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hull", version, about = "Hull: local-first application platform")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Scripting backend.
    #[arg(long, global = true, value_parser = parse_runtime)]
    runtime: Option<RuntimeKind>,

    /// Database file (default: data.db next to the app).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Listen port (default: HULL_PORT or 8080).
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Platform publisher key override for self-hosted platforms.
    #[arg(long, global = true)]
    platform_key: Option<PathBuf>,

    /// Development mode: error detail in responses and on stderr.
    #[arg(long, global = true)]
    dev: bool,
}

fn parse_runtime(s: &str) -> Result<RuntimeKind, String> {
    s.parse()
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server (implicit when the first argument looks
    /// like an app path).
    Serve {
        /// App directory or entry file.
        app: Option<PathBuf>,

        /// Verify signatures at startup with this developer key; any
        /// failure, including a missing package.sig, refuses to bind.
        #[arg(long)]
        verify_sig: Option<PathBuf>,
    },

    /// Build a signed binary from an app source directory.
    Build {
        /// App source directory.
        src_dir: PathBuf,

        /// Output binary path (default: src dir name in the src dir).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Developer key (default: SRC_DIR/dev.key).
        #[arg(long)]
        sign: Option<PathBuf>,

        /// Platform archive to link (its .sig sidecar must exist).
        #[arg(long)]
        platform_lib: Option<PathBuf>,
    },

    /// Verify a built app's signatures and file hashes.
    Verify {
        /// App directory or stamped binary (default: current dir).
        target: Option<PathBuf>,

        /// Developer public key.
        #[arg(long)]
        developer_key: Option<PathBuf>,

        /// Platform archive whose bytes should match the attestation.
        #[arg(long)]
        platform_lib: Option<PathBuf>,
    },

    /// Print manifest, signatures, and the embedded file inventory.
    Inspect {
        /// App directory, entry file, or stamped binary.
        app: Option<PathBuf>,
    },

    /// Extract and print the declared manifest as canonical JSON.
    Manifest {
        /// App directory or entry file.
        app: Option<PathBuf>,
    },

    /// Generate an Ed25519 keypair: PREFIX.key and PREFIX.pub.
    Keygen {
        /// Output path prefix.
        prefix: PathBuf,
    },

    /// Produce a platform attestation for a built platform archive.
    SignPlatform {
        /// The platform archive to attest.
        lib: PathBuf,

        /// Publisher signing key.
        #[arg(long)]
        key: PathBuf,
    },
}

fn main() {
    let args = preprocess_args();
    let cli = Cli::parse_from(args);

    let filter = std::env::var("HULL_LOG_LEVEL")
        .ok()
        .and_then(|l| l.parse::<EnvFilter>().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

// `hull app.js` serves implicitly: when the first free argument is not a
// known subcommand or flag, insert `serve` in front of it.
fn preprocess_args() -> Vec<String> {
    const SUBCOMMANDS: [&str; 8] = [
        "serve",
        "build",
        "verify",
        "inspect",
        "manifest",
        "keygen",
        "sign-platform",
        "help",
    ];
    let mut args: Vec<String> = std::env::args().collect();
    if let Some(first) = args.get(1) {
        let looks_like_subcommand =
            SUBCOMMANDS.contains(&first.as_str()) || first.starts_with('-');
        if !looks_like_subcommand {
            args.insert(1, "serve".to_string());
        }
    }
    args
}

fn run(cli: Cli) -> Result<i32> {
    let Cli {
        command,
        runtime,
        db,
        port,
        platform_key,
        dev,
    } = cli;
    let globals = Globals {
        runtime,
        db,
        port,
        platform_key,
        dev,
    };

    match command {
        Commands::Serve { app, verify_sig } => {
            let app_path = app.unwrap_or_else(|| PathBuf::from("."));
            run_serve(&globals, &app_path, verify_sig.as_deref())
        }
        Commands::Build {
            src_dir,
            out,
            sign,
            platform_lib,
        } => run_build(
            &globals,
            &src_dir,
            out.as_deref(),
            sign.as_deref(),
            platform_lib.as_deref(),
        ),
        Commands::Verify {
            target,
            developer_key,
            platform_lib,
        } => {
            let developer_key =
                developer_key.ok_or_else(|| anyhow!("--developer-key is required"))?;
            run_verify(&VerifyTarget {
                target: target.unwrap_or_else(|| PathBuf::from(".")),
                developer_key,
                platform_key: globals.platform_key.clone(),
                platform_lib,
            })
        }
        Commands::Inspect { app } => {
            let target = app.unwrap_or_else(|| PathBuf::from("."));
            print!("{}", commands::inspect(&target)?);
            Ok(hull_core::exit::OK)
        }
        Commands::Manifest { app } => {
            let target = app.unwrap_or_else(|| PathBuf::from("."));
            println!("{}", commands::manifest_json(&target, globals.runtime)?);
            Ok(hull_core::exit::OK)
        }
        Commands::Keygen { prefix } => {
            let (key, public) = commands::keygen(&prefix)?;
            println!("wrote {}", key.display());
            println!("wrote {}", public.display());
            Ok(hull_core::exit::OK)
        }
        Commands::SignPlatform { lib, key } => {
            let sig = commands::sign_platform_archive(&lib, &key)?;
            println!("wrote {}", sig.display());
            Ok(hull_core::exit::OK)
        }
    }
}

/// The global flags, separated so subcommand handlers cannot reach the
/// subcommand enum again.
struct Globals {
    runtime: Option<RuntimeKind>,
    db: Option<PathBuf>,
    port: Option<u16>,
    platform_key: Option<PathBuf>,
    dev: bool,
}

fn run_serve(globals: &Globals, app_path: &Path, verify_sig: Option<&Path>) -> Result<i32> {
    let app = commands::resolve_app(app_path, globals.runtime)?;

    // Host env whitelist only, read before manifest extraction.
    let port = globals
        .port
        .or_else(|| std::env::var("HULL_PORT").ok().and_then(|p| p.parse().ok()))
        .unwrap_or(8080);
    let db_path = globals
        .db
        .clone()
        .or_else(|| std::env::var("HULL_DB").ok().map(PathBuf::from))
        .unwrap_or_else(|| app.base_dir.join("data.db"));

    let config = RuntimeConfig::default();
    let mut runtime = select(app.kind, &config);
    runtime
        .load_app(&app.source)
        .map_err(|e| anyhow!("load app: {e}"))?;
    let manifest = runtime
        .extract_manifest()
        .map_err(|e| anyhow!("extract manifest: {e}"))?;

    // Explicitly requested verification is all-or-nothing: any failure,
    // including a missing bundle, and the socket never opens.
    if let Some(key) = verify_sig {
        let input = VerifyTarget {
            target: app.base_dir.clone(),
            developer_key: key.to_path_buf(),
            platform_key: globals.platform_key.clone(),
            platform_lib: None,
        };
        let mut session = VerifySession::open(&input).context("startup verify")?;
        session.check_platform(&input).context("startup verify")?;
        session.check_app(&input).context("startup verify")?;
        verify_manifest(&session.bundle, manifest.as_ref()).context("startup verify")?;
        println!("startup verification passed");
    }

    let db = Db::open(&db_path).map_err(|e| anyhow!("open {}: {e}", db_path.display()))?;
    let caps = Rc::new(RefCell::new(Caps::for_serve(
        &app.base_dir,
        manifest.as_ref(),
        db,
    )));
    SessionStore::default()
        .ensure_schema(&mut caps.borrow_mut().db)
        .map_err(|e| anyhow!("session schema: {e}"))?;
    runtime.install_caps(caps.clone());

    // Bind before the sandbox line: socket creation is not pledged.
    let listener = hull_server::bind(port)?;

    // The irreversible line. An absent manifest declares no promises, so
    // there is nothing to apply and capability checks stand alone.
    if let Some(m) = &manifest {
        let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("hull"));
        let promises = derive_promises(m, &app.base_dir, &db_path, &exe);
        Sandbox::new()
            .apply(&promises)
            .map_err(|e| anyhow!("sandbox: {e}"))?;
    }

    hull_server::serve(listener, runtime, caps, &ServeOptions {
        dev_mode: globals.dev,
    })?;
    Ok(hull_core::exit::OK)
}

fn run_build(
    globals: &Globals,
    src_dir: &Path,
    out: Option<&Path>,
    sign: Option<&Path>,
    platform_lib: Option<&Path>,
) -> Result<i32> {
    let app = commands::resolve_app(src_dir, globals.runtime)?;
    let manifest = commands::extract_manifest(&app)?;

    let signing_key = sign
        .map(Path::to_path_buf)
        .unwrap_or_else(|| src_dir.join("dev.key"));
    if !signing_key.exists() {
        bail!(
            "developer key not found at {} (pass --sign or run keygen)",
            signing_key.display()
        );
    }

    let platform_lib = platform_lib
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("--platform-lib is required for source builds"))?;
    let platform_block = commands::load_platform_block(&platform_lib)?;

    let app_name = src_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("app")
        .to_string();
    let out_path = out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| src_dir.join(&app_name));

    let options = hull_build::pipeline::BuildOptions {
        src_dir: src_dir.to_path_buf(),
        out_path,
        app_name,
        signing_key,
        platform_archive: Some(platform_lib),
        platform_block,
        manifest,
        compiler: "cc".to_string(),
    };
    // Tool mode assembles the tool capability table; serve never does.
    let tool_caps = Caps::for_tool(
        src_dir,
        Db::open_in_memory().map_err(|e| anyhow!("scratch db: {e}"))?,
    );
    let tool = tool_caps
        .tool
        .as_ref()
        .ok_or_else(|| anyhow!("tool capability unavailable"))?;
    let artifacts = hull_build::pipeline::run(&options, tool).context("build pipeline")?;
    println!(
        "built {} ({} assets), bundle {}",
        artifacts.binary.display(),
        artifacts.asset_count,
        artifacts.bundle_path.display()
    );
    Ok(hull_core::exit::OK)
}

fn run_verify(input: &VerifyTarget) -> Result<i32> {
    let mut session = match VerifySession::open(input) {
        Ok(s) => s,
        Err(err) => {
            report_signature_error(&err);
            return Ok(hull_core::exit::VERIFY_FAILED);
        }
    };

    match session.check_platform(input) {
        Ok(arch) => println!("platform signature valid ({arch})"),
        Err(err) => {
            report_signature_error(&err);
            return Ok(hull_core::exit::VERIFY_FAILED);
        }
    }

    match session.check_app(input) {
        Ok(files) => {
            println!("app signature valid ({files} files checked)");
            Ok(hull_core::exit::OK)
        }
        Err(err) => {
            report_signature_error(&err);
            Ok(hull_core::exit::VERIFY_FAILED)
        }
    }
}

fn report_signature_error(err: &SignatureError) {
    match err {
        SignatureError::HashMismatch { path } => {
            eprintln!("error: HashMismatch{{path={path}}}");
        }
        other => eprintln!("error: {other}"),
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    // An explicitly requested startup verification failing is a
    // verification failure even when the proximate cause is a missing
    // bundle file.
    if err.to_string().contains("startup verify") {
        return hull_core::exit::VERIFY_FAILED;
    }
    for cause in err.chain() {
        if let Some(sig) = cause.downcast_ref::<SignatureError>() {
            return match sig {
                SignatureError::Io(_) => hull_core::exit::IO,
                _ => hull_core::exit::VERIFY_FAILED,
            };
        }
        if cause.downcast_ref::<hull_server::ServerError>().is_some() {
            return hull_core::exit::IO;
        }
        if let Some(build) = cause.downcast_ref::<hull_build::BuildError>() {
            return match build {
                hull_build::BuildError::Io(_) => hull_core::exit::IO,
                _ => hull_core::exit::INTERNAL,
            };
        }
        if cause.downcast_ref::<std::io::Error>().is_some() {
            return hull_core::exit::IO;
        }
    }
    let text = err.to_string();
    if text.contains("required") || text.contains("not found") {
        return hull_core::exit::USAGE;
    }
    hull_core::exit::INTERNAL
}
