use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use headshot_studio::config::{Config, CONFIG};
use headshot_studio::llm::media::{decode_data_url, extension_for_mime};
use headshot_studio::llm::GeminiHeadshotGenerator;
use headshot_studio::session::{
    Completion, SessionEvent, SessionHandle, SessionRuntime, FALLBACK_ERROR_MESSAGE,
};
use headshot_studio::state::SessionSnapshot;
use headshot_studio::styles::{all_styles, find_style};
use headshot_studio::upload::load_image_file;
use headshot_studio::utils::logging::init_logging;

#[derive(Debug, PartialEq, Eq)]
enum CliCommand {
    Help,
    Styles,
    Generate(GenerateArgs),
    Interactive,
}

#[derive(Debug, PartialEq, Eq)]
struct GenerateArgs {
    image: PathBuf,
    style_id: String,
    output: Option<PathBuf>,
}

fn usage() -> &'static str {
    "Usage:
  headshot-studio styles
  headshot-studio generate --image <path> --style <style-id> [--output <path>]
  headshot-studio interactive"
}

fn interactive_help() -> &'static str {
    "Commands:
  upload <path>        upload a PNG, JPEG or WEBP selfie
  generate <style-id>  generate a headshot in the given style
  styles               list available styles
  state                show the current session
  save [path]          write the generated headshot to disk
  reset                start over
  quit                 exit"
}

fn parse_args(args: &[String]) -> Result<CliCommand> {
    match args.get(1).map(|value| value.as_str()) {
        None | Some("--help") | Some("-h") | Some("help") => Ok(CliCommand::Help),
        Some("styles") => Ok(CliCommand::Styles),
        Some("interactive") => Ok(CliCommand::Interactive),
        Some("generate") => parse_generate_args(&args[2..]).map(CliCommand::Generate),
        Some(other) => Err(anyhow!("Unknown command: {other}\n{}", usage())),
    }
}

fn parse_generate_args(args: &[String]) -> Result<GenerateArgs> {
    let mut image: Option<PathBuf> = None;
    let mut style_id: Option<String> = None;
    let mut output: Option<PathBuf> = None;

    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--image" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --image"))?;
                image = Some(PathBuf::from(value));
            }
            "--style" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --style"))?;
                style_id = Some(value.trim().to_string());
            }
            "--output" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --output"))?;
                output = Some(PathBuf::from(value));
            }
            other => {
                return Err(anyhow!(
                    "Unknown generate argument: {other}\n{}",
                    usage()
                ));
            }
        }
        index += 1;
    }

    Ok(GenerateArgs {
        image: image.ok_or_else(|| anyhow!("--image is required"))?,
        style_id: style_id.ok_or_else(|| anyhow!("--style is required"))?,
        output,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let config: &Config = &CONFIG;
    let _guards = init_logging(config);

    let args: Vec<String> = std::env::args().collect();
    match parse_args(&args)? {
        CliCommand::Help => println!("{}", usage()),
        CliCommand::Styles => print_styles(),
        CliCommand::Generate(generate_args) => run_generate(config, generate_args).await?,
        CliCommand::Interactive => run_interactive(config).await?,
    }
    Ok(())
}

fn print_styles() {
    for style in all_styles() {
        println!("{:<16} {:<20} {}", style.id, style.name, style.thumbnail_url);
    }
}

fn spawn_session(config: &Config) -> Result<SessionHandle> {
    let generator = GeminiHeadshotGenerator::from_config(config)?;
    info!("Using Gemini image model {}", config.gemini_image_model);
    Ok(SessionRuntime::spawn(Arc::new(generator)))
}

async fn run_generate(config: &Config, args: GenerateArgs) -> Result<()> {
    let style = find_style(&args.style_id).ok_or_else(|| {
        anyhow!(
            "Unknown style '{}'. Run `headshot-studio styles` to list them.",
            args.style_id
        )
    })?;
    let image = load_image_file(&args.image).await?;
    let handle = spawn_session(config)?;

    handle.upload(image).await?;
    handle.generate(style.id).await?;
    println!("Generating with {}... This can take a moment.", style.name);

    let snapshot = tokio::select! {
        snapshot = handle.wait_until_idle() => snapshot?,
        _ = tokio::signal::ctrl_c() => {
            handle.reset().await?;
            handle.shutdown().await;
            return Err(anyhow!("Interrupted"));
        }
    };
    handle.shutdown().await;

    if let Some(message) = snapshot.error_message {
        return Err(anyhow!(message));
    }
    let image_ref = snapshot
        .result_image_ref
        .ok_or_else(|| anyhow!(FALLBACK_ERROR_MESSAGE))?;
    let path = save_image_ref(
        &image_ref,
        args.output.as_deref(),
        &config.output_dir,
        style.id,
    )
    .await?;
    println!("Saved headshot to {}", path.display());
    Ok(())
}

async fn run_interactive(config: &Config) -> Result<()> {
    let handle = spawn_session(config)?;
    let reporter = tokio::spawn(report_completions(handle.clone()));

    println!("{}", interactive_help());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, rest) = line
            .split_once(char::is_whitespace)
            .map(|(command, rest)| (command, rest.trim()))
            .unwrap_or((line, ""));

        match command {
            "upload" => match load_image_file(Path::new(rest)).await {
                Ok(image) => {
                    handle.upload(image).await?;
                    println!("Photo uploaded. Choose a style with `generate <style-id>`.");
                }
                Err(err) => println!("Error: {err}"),
            },
            "generate" => match handle.generate(rest).await {
                Ok(token) => {
                    let name = find_style(rest).map(|style| style.name).unwrap_or(rest);
                    println!("Generating with {name}... (request #{token})");
                }
                Err(err) => println!("Error: {err}"),
            },
            "styles" => print_styles(),
            "state" => println!("{}", describe_snapshot(&handle.snapshot())),
            "save" => {
                let snapshot = handle.snapshot();
                let Some(image_ref) = snapshot.result_image_ref else {
                    println!("Nothing to save yet.");
                    continue;
                };
                let target = (!rest.is_empty()).then(|| Path::new(rest));
                match save_image_ref(&image_ref, target, &config.output_dir, "headshot").await {
                    Ok(path) => println!("Saved headshot to {}", path.display()),
                    Err(err) => println!("Error: {err:#}"),
                }
            }
            "reset" | "start-over" => {
                handle.reset().await?;
                println!("Session cleared.");
            }
            "help" => println!("{}", interactive_help()),
            "quit" | "exit" => break,
            other => println!("Unknown command '{other}'. Type `help` for the list."),
        }
    }

    reporter.abort();
    handle.shutdown().await;
    Ok(())
}

async fn report_completions(handle: SessionHandle) {
    let mut events = handle.events();
    loop {
        match events.recv().await {
            Ok(SessionEvent::Completed {
                completion: Completion::Applied,
                ..
            }) => println!("{}", describe_snapshot(&handle.snapshot())),
            Ok(SessionEvent::Completed {
                token,
                completion: Completion::Stale,
            }) => println!("(discarded late result for request #{token})"),
            Ok(SessionEvent::Dispatched { .. }) => {}
            Err(RecvError::Lagged(skipped)) => warn!("Missed {} session events", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

fn describe_snapshot(snapshot: &SessionSnapshot) -> String {
    let mut lines = vec![format!("Phase: {}", snapshot.phase.as_str())];
    match &snapshot.uploaded_image {
        Some(image) => lines.push(format!(
            "Photo: {} ({}, {} bytes)",
            image.display_name.as_deref().unwrap_or("unnamed"),
            image.mime_type,
            image.size_bytes
        )),
        None => lines.push("Photo: none".to_string()),
    }
    if snapshot.is_generating {
        let name = snapshot
            .selected_style_id
            .as_deref()
            .map(|id| find_style(id).map(|style| style.name).unwrap_or(id))
            .unwrap_or("unknown style");
        lines.push(format!("Generating with {name}..."));
    }
    if let Some(image_ref) = &snapshot.result_image_ref {
        match decode_data_url(image_ref) {
            Some((mime_type, bytes)) => lines.push(format!(
                "Headshot ready: {} bytes of {} (use `save` to write it)",
                bytes.len(),
                mime_type
            )),
            None => lines.push(format!("Headshot ready: {image_ref}")),
        }
    }
    if let Some(message) = &snapshot.error_message {
        lines.push(format!("Error: {message}"));
    }
    lines.join("\n")
}

fn default_output_path(output_dir: &Path, label: &str, mime_type: &str) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    output_dir.join(format!(
        "headshot-{}-{}.{}",
        label,
        stamp,
        extension_for_mime(mime_type)
    ))
}

async fn save_image_ref(
    image_ref: &str,
    target: Option<&Path>,
    output_dir: &Path,
    label: &str,
) -> Result<PathBuf> {
    let (mime_type, bytes) = decode_data_url(image_ref)
        .ok_or_else(|| anyhow!("Generated image is not an inline data URL"))?;
    let path = match target {
        Some(path) => path.to_path_buf(),
        None => default_output_path(output_dir, label, &mime_type),
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(&path, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use headshot_studio::state::{SessionPhase, SessionState, UploadedImage};

    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        std::iter::once("headshot-studio")
            .chain(values.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn parses_generate_arguments() {
        let command = parse_args(&args(&[
            "generate",
            "--image",
            "me.jpg",
            "--style",
            "studio-light",
            "--output",
            "out/headshot.png",
        ]))
        .unwrap();
        assert_eq!(
            command,
            CliCommand::Generate(GenerateArgs {
                image: PathBuf::from("me.jpg"),
                style_id: "studio-light".to_string(),
                output: Some(PathBuf::from("out/headshot.png")),
            })
        );
    }

    #[test]
    fn generate_requires_image_and_style() {
        assert!(parse_args(&args(&["generate", "--style", "studio-light"])).is_err());
        assert!(parse_args(&args(&["generate", "--image", "me.jpg"])).is_err());
        assert!(parse_args(&args(&["generate", "--image"])).is_err());
        assert!(parse_args(&args(&["generate", "--bogus"])).is_err());
    }

    #[test]
    fn parses_simple_commands() {
        assert_eq!(parse_args(&args(&[])).unwrap(), CliCommand::Help);
        assert_eq!(parse_args(&args(&["styles"])).unwrap(), CliCommand::Styles);
        assert_eq!(
            parse_args(&args(&["interactive"])).unwrap(),
            CliCommand::Interactive
        );
        assert!(parse_args(&args(&["paint"])).is_err());
    }

    #[test]
    fn describes_generating_and_error_states() {
        let state = SessionState {
            uploaded_image: Some(UploadedImage::new(
                vec![0; 10],
                "image/png".to_string(),
                Some("me.png".to_string()),
            )),
            selected_style_id: Some("black-and-white".to_string()),
            is_generating: true,
            ..SessionState::default()
        };
        let text = describe_snapshot(&state.snapshot());
        assert!(text.contains("Phase: generating"));
        assert!(text.contains("Photo: me.png (image/png, 10 bytes)"));
        assert!(text.contains("Generating with Classic B&W..."));

        let mut idle = SessionState::default().snapshot();
        idle.error_message = Some("Please upload an image first.".to_string());
        assert_eq!(idle.phase, SessionPhase::Idle);
        let text = describe_snapshot(&idle);
        assert!(text.contains("Photo: none"));
        assert!(text.contains("Error: Please upload an image first."));
    }

    #[tokio::test]
    async fn saves_data_url_into_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_image_ref(
            "data:image/jpeg;base64,AQID",
            None,
            &dir.path().join("renders"),
            "corporate-grey",
        )
        .await
        .unwrap();
        assert!(path.starts_with(dir.path().join("renders")));
        assert_eq!(path.extension().and_then(|ext| ext.to_str()), Some("jpg"));
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn refuses_to_save_remote_references() {
        let dir = tempfile::tempdir().unwrap();
        let err = save_image_ref("https://example.com/x.png", None, dir.path(), "x")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not an inline data URL"));
    }
}
