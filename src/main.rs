//! cvbatch CLI - Batch Computer-Vision Operations
//!
//! This is a demonstration CLI for the cvbatch library. It loads an image,
//! runs a JSON request file through the engine and prints the JSON response.

use anyhow::{bail, Context, Result};
use cvbatch::api::{BatchRequest, ChainRequest, MatchRequest, MixedRequest, RequestHandler, SessionStore};
use cvbatch::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        return;
    }

    let outcome = match args[1].as_str() {
        "ops" => {
            list_operations(args.get(2).map(String::as_str));
            Ok(())
        }
        "batch" | "chain" | "mixed" => run_request(&args[1], &args[2..]),
        "match" => run_match(&args[2..]),
        "help" | "--help" | "-h" => {
            print_usage(&args[0]);
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage(&args[0]);
            Ok(())
        }
    };

    if let Err(e) = outcome {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}

fn print_usage(program: &str) {
    println!("🔬 cvbatch - Batch Computer-Vision Operations v{}", cvbatch::VERSION);
    println!();
    println!("Usage: {} <command> [options]", program);
    println!();
    println!("Commands:");
    println!("  ops [family]                      List operations and their parameters");
    println!("  batch <image> <request.json>      Run a single-family batch");
    println!("  chain <image> <request.json>      Run a sequential chain");
    println!("  mixed <image> <request.json>      Run a mixed-family request");
    println!("  match <image1> <image2>           Match ORB features between two images");
    println!("  help                              Show this help message");
    println!();
    println!("Options:");
    println!("  --config <file>   Engine settings (TOML); CVBATCH_* variables override it");
    println!("  --out <file>      Write the JSON response to a file instead of stdout");
    println!("  --save <file>     chain/match: save the resulting image");
    println!("  --ransac <px>     match only: estimate a homography with this threshold");
}

fn list_operations(family: Option<&str>) {
    let families: Vec<Family> = match family.map(str::parse::<Family>) {
        Some(Ok(family)) => vec![family],
        Some(Err(e)) => {
            eprintln!("Error: {}", e);
            return;
        }
        None => Family::ALL.to_vec(),
    };

    for family in families {
        println!("📁 {}", family);
        for spec in catalog(family) {
            println!("    • {} - {}", spec.kind, spec.description);
            for param in spec.params {
                println!("        {}", param);
            }
        }
        println!();
    }
}

struct Options {
    config: Option<PathBuf>,
    out: Option<PathBuf>,
    save: Option<PathBuf>,
    ransac: Option<f32>,
}

fn parse_options(args: &[String]) -> Result<Options> {
    let mut options = Options {
        config: None,
        out: None,
        save: None,
        ransac: None,
    };
    let mut i = 0;
    while i < args.len() {
        match (args[i].as_str(), args.get(i + 1)) {
            ("--config", Some(path)) => options.config = Some(PathBuf::from(path)),
            ("--out", Some(path)) => options.out = Some(PathBuf::from(path)),
            ("--save", Some(path)) => options.save = Some(PathBuf::from(path)),
            ("--ransac", Some(value)) => {
                options.ransac = Some(value.parse().with_context(|| format!("Invalid --ransac value: {}", value))?)
            }
            (flag, _) => bail!("Unknown or incomplete option: {}", flag),
        }
        i += 2;
    }
    Ok(options)
}

fn read_request<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid request in {}", path.display()))
}

fn emit<T: Serialize>(response: &T, out: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(response)?;
    match out {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("🎉 Response written to: {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn run_request(command: &str, args: &[String]) -> Result<()> {
    if args.len() < 2 {
        bail!("Usage: cvbatch {} <image> <request.json> [options]", command);
    }
    let image_path = Path::new(&args[0]);
    let request_path = Path::new(&args[1]);
    let options = parse_options(&args[2..])?;

    let config = EngineConfig::load(options.config.as_deref()).context("Failed to load engine settings")?;
    let engine = Engine::builtin(config)?;
    let handler = RequestHandler::new(engine, SessionStore::new());

    let session = handler.upload(load_image(image_path)?);
    let out = options.out.as_deref();

    match command {
        "batch" => {
            let request: BatchRequest = read_request(request_path)?;
            let response = report_validation(handler.batch(session.session_id, request))?;
            eprintln!("✅ {} succeeded, {} failed", response.succeeded, response.failed);
            emit(&response, out)
        }
        "chain" => {
            let request: ChainRequest = read_request(request_path)?;
            let response = report_validation(handler.chain(session.session_id, request))?;
            eprintln!("✅ {} step(s) applied, output {}", response.applied.len(), response.shape);
            if let Some(path) = &options.save {
                let shared = handler.sessions().get(session.session_id)?;
                let image = if response.committed {
                    shared.lock().current().clone()
                } else {
                    cvbatch::api::decode_data_url(&response.image)?
                };
                image
                    .image()
                    .save(path)
                    .with_context(|| format!("Failed to save {}", path.display()))?;
                eprintln!("🎉 Image saved to: {}", path.display());
            }
            emit(&response, out)
        }
        _ => {
            let request: MixedRequest = read_request(request_path)?;
            let response = report_validation(handler.mixed(session.session_id, request))?;
            if response.dropped > 0 {
                eprintln!("⚠️  {} task(s) with unknown family dropped", response.dropped);
            }
            emit(&response, out)
        }
    }
}

fn load_image(path: &Path) -> Result<ImageValue> {
    let image = ImageValue::from_path(path).with_context(|| format!("Failed to load image {}", path.display()))?;
    eprintln!("🖼️  Loaded {} ({})", path.display(), image.shape());
    Ok(image)
}

fn run_match(args: &[String]) -> Result<()> {
    if args.len() < 2 {
        bail!("Usage: cvbatch match <image1> <image2> [options]");
    }
    let options = parse_options(&args[2..])?;
    let config = EngineConfig::load(options.config.as_deref()).context("Failed to load engine settings")?;
    let handler = RequestHandler::new(Engine::builtin(config)?, SessionStore::new());

    let first = handler.upload(load_image(Path::new(&args[0]))?);
    let second = handler.upload(load_image(Path::new(&args[1]))?);
    let request = MatchRequest {
        other_session_id: second.session_id,
        source: ImageSource::Current,
        detector: None,
        ratio_threshold: 0.75,
        ransac_threshold: options.ransac,
        draw: options.save.is_some(),
    };
    let response = report_validation(handler.match_features(first.session_id, request))?;
    eprintln!(
        "✅ {} match(es) between {} and {} keypoints",
        response.matches.len(),
        response.keypoints1.len(),
        response.keypoints2.len()
    );
    if let (Some(path), Some(image)) = (&options.save, &response.image) {
        cvbatch::api::decode_data_url(image)?
            .image()
            .save(path)
            .with_context(|| format!("Failed to save {}", path.display()))?;
        eprintln!("🎉 Image saved to: {}", path.display());
    }
    emit(&response, options.out.as_deref())
}

/// Print validation details before handing the error on.
fn report_validation<T>(result: EngineResult<T>) -> Result<T> {
    if let Err(EngineError::Validation(report)) = &result {
        eprintln!("❌ {}", report.summary());
        for line in report.detailed_errors() {
            eprintln!("   {}", line);
        }
    }
    Ok(result?)
}
