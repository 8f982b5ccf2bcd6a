use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use retouch_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use retouch_contracts::credentials::CredentialStore;
use retouch_contracts::errors::SessionError;
use retouch_contracts::events::EventWriter;
use retouch_contracts::models::{ModelSelector, CAPABILITY_IMAGE_EDIT, CAPABILITY_VIDEO};
use retouch_contracts::presets::{
    custom_filter, find_preset, straighten, Adjustment, Adjustments, CUSTOM_FILTER_LABEL,
    EDIT_PRESETS,
};
use retouch_engine::{build_client, new_session_id, EngineConfig, Mode, SessionController};
use serde_json::{json, Map, Value};

#[derive(Debug, Parser)]
#[command(
    name = "retouch",
    version,
    about = "Iterative image editing and animation through a generative model"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat(ChatArgs),
    Edit(EditArgs),
    Animate(AnimateArgs),
}

#[derive(Debug, Args)]
struct ModelArgs {
    #[arg(long)]
    edit_model: Option<String>,
    #[arg(long)]
    video_model: Option<String>,
    /// Serve every request from the offline dry-run models.
    #[arg(long)]
    dryrun: bool,
    #[arg(long)]
    poll_interval: Option<f64>,
    #[arg(long)]
    max_polls: Option<u32>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    models: ModelArgs,
}

#[derive(Debug, Parser)]
struct EditArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = CUSTOM_FILTER_LABEL)]
    label: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    models: ModelArgs,
}

#[derive(Debug, Parser)]
struct AnimateArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    models: ModelArgs,
}

const WAIT_STEP: Duration = Duration::from_secs(1);

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("retouch error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Edit(args) => run_edit(args),
        Command::Animate(args) => run_animate(args),
    }
}

fn apply_overrides(mut config: EngineConfig, models: &ModelArgs) -> EngineConfig {
    if let Some(seconds) = models.poll_interval.filter(|value| value.is_finite()) {
        config.poll_interval = Duration::from_secs_f64(seconds.clamp(0.0, 60.0));
    }
    if let Some(max_polls) = models.max_polls {
        config.max_poll_attempts = max_polls.clamp(1, 720);
    }
    config
}

fn open_session(models: &ModelArgs, events_path: Option<PathBuf>) -> Result<SessionController> {
    let config = apply_overrides(EngineConfig::from_env(), models);
    let selector = ModelSelector::new(None);
    let edit = selector
        .select(models.edit_model.as_deref(), CAPABILITY_IMAGE_EDIT, models.dryrun)
        .map_err(anyhow::Error::msg)?;
    let video = selector
        .select(models.video_model.as_deref(), CAPABILITY_VIDEO, models.dryrun)
        .map_err(anyhow::Error::msg)?;
    for selection in [&edit, &video] {
        if let (Some(requested), Some(reason)) =
            (selection.requested.as_deref(), selection.fallback_reason.as_deref())
        {
            eprintln!("{reason} Using {} instead of {requested}.", selection.model.name);
        }
    }

    let credentials = CredentialStore::new();
    if edit.model.is_dryrun() && video.model.is_dryrun() {
        // Offline models need no key; keep the gate open.
        credentials.set("dryrun");
    }
    let client = build_client(&edit.model, &video.model, credentials.clone(), &config)?;

    let session_id = new_session_id();
    let events = match events_path {
        Some(path) => EventWriter::new(path, session_id),
        None => EventWriter::disabled(session_id),
    };
    events.record(
        "models_selected",
        json_object(json!({
            "edit_model": edit.model.name,
            "video_model": video.model.name,
            "edit_fallback_reason": edit.fallback_reason,
            "video_fallback_reason": video.fallback_reason,
        })),
    );
    let mut controller =
        SessionController::with_env_credentials(client, credentials, config, events);
    controller.start();
    Ok(controller)
}

fn require_credential(controller: &SessionController) -> Result<()> {
    if controller.needs_credential() {
        bail!("no API key found; set GEMINI_API_KEY (or GOOGLE_API_KEY, API_KEY)");
    }
    Ok(())
}

fn run_edit(args: EditArgs) -> Result<i32> {
    let mut controller = open_session(&args.models, args.events.clone())?;
    require_credential(&controller)?;
    controller.load_image_path(&args.image)?;
    controller
        .submit_edit(&args.prompt, &args.label)
        .context("edit failed")?;
    let written = controller.export_current(&args.out)?;
    println!("Saved {} ({written} bytes)", args.out.display());
    Ok(0)
}

fn run_animate(args: AnimateArgs) -> Result<i32> {
    let mut controller = open_session(&args.models, args.events.clone())?;
    require_credential(&controller)?;
    controller.load_image_path(&args.image)?;
    controller
        .generate_animation(&args.prompt)
        .context("animation failed to start")?;
    if !wait_for_animation(&mut controller) {
        bail!(
            "animation failed: {}",
            controller
                .last_error()
                .map(ToString::to_string)
                .unwrap_or_else(|| "no video produced".to_string())
        );
    }
    let written = controller.export_video(&args.out)?;
    println!("Saved {} ({written} bytes)", args.out.display());
    Ok(0)
}

/// Blocks until the animation settles, echoing progress tips. True when a
/// video is ready.
fn wait_for_animation(controller: &mut SessionController) -> bool {
    let mut last_progress: Option<String> = None;
    loop {
        let progress = controller.snapshot().progress;
        if progress.is_some() && progress != last_progress {
            if let Some(message) = progress.as_deref() {
                println!("{message}");
            }
            last_progress = progress;
        }
        match controller.wait_animation(Some(WAIT_STEP)) {
            Ok(true) => return true,
            Ok(false) => {
                if !controller.animation().is_active() {
                    return false;
                }
            }
            Err(err) => {
                report_failure(&err);
                return false;
            }
        }
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let out_dir = args.out.clone();
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed creating {}", out_dir.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| out_dir.join("events.jsonl"));
    let mut controller = open_session(&args.models, Some(events_path))?;

    if controller.needs_credential() {
        println!("No API key found. Use /key <value> or set GEMINI_API_KEY.");
    }
    if let Some(path) = args.image.as_deref() {
        controller.load_image_path(path)?;
        println!("Loaded {}", path.display());
    }

    let stdin = io::stdin();
    let mut line = String::new();

    println!("Retouch chat started. Type /help for commands.");

    loop {
        report_pumped(&mut controller);
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        if intent.action == "noop" {
            continue;
        }
        report_pumped(&mut controller);

        match intent.action.as_str() {
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
            }
            "quit" => break,
            "edit" => {
                let Some(request) = intent.prompt.as_deref().and_then(custom_filter) else {
                    println!("/filter requires an instruction");
                    continue;
                };
                report_edit(&mut controller, |session| session.apply_request(&request));
            }
            "apply_preset" => {
                let Some(id) = value_as_non_empty_string(intent.command_args.get("text")) else {
                    println!("/preset requires a preset id (see /presets)");
                    continue;
                };
                let Some(preset) = find_preset(&id) else {
                    println!("Unknown preset: {id}");
                    continue;
                };
                let request = preset.request();
                report_edit(&mut controller, |session| session.apply_request(&request));
            }
            "list_presets" => {
                for preset in EDIT_PRESETS {
                    println!("  {:<14} {}", preset.id, preset.label);
                }
            }
            "adjust" => {
                let (adjustments, invalid) = adjustments_from_args(&intent.command_args);
                if !invalid.is_empty() {
                    println!("Ignored: {}", invalid.join(", "));
                }
                let Some(request) = adjustments.to_request() else {
                    println!("Nothing to adjust; use /adjust exposure=20 contrast=-10");
                    continue;
                };
                report_edit(&mut controller, |session| session.apply_request(&request));
            }
            "straighten" => {
                let angle = intent
                    .command_args
                    .get("angle")
                    .and_then(Value::as_i64)
                    .map(|value| value.clamp(-45, 45) as i32);
                let Some(request) = angle.and_then(straighten) else {
                    println!("/straighten requires a non-zero angle in degrees");
                    continue;
                };
                report_edit(&mut controller, |session| session.apply_request(&request));
            }
            "revert" => {
                let Some(index) = intent
                    .command_args
                    .get("index")
                    .and_then(Value::as_u64)
                    .and_then(|value| usize::try_from(value).ok())
                else {
                    println!("/revert requires a history index (see /history)");
                    continue;
                };
                match controller.revert(index) {
                    Ok(entry) => println!("Reverted to [{index}] {}", entry.label),
                    Err(err) => report_failure(&err),
                }
            }
            "history" => {
                print_history(&controller);
            }
            "reset" => {
                controller.reset();
                print_history(&controller);
            }
            "new_image" => {
                controller.new_image();
                println!("Session cleared. Use /open <path> to load an image.");
            }
            "open_image" => {
                let Some(path) = value_as_non_empty_string(intent.command_args.get("path")) else {
                    println!("/open requires a path");
                    continue;
                };
                match controller.load_image_path(Path::new(&path)) {
                    Ok(()) => println!("Loaded {path}"),
                    Err(err) => println!("Open failed: {err:#}"),
                }
            }
            "set_mode" => {
                let requested = value_as_non_empty_string(intent.command_args.get("text"));
                let Some(mode) = requested.as_deref().and_then(Mode::parse) else {
                    println!("Mode: {} (use /mode photo|video)", controller.mode().as_str());
                    continue;
                };
                match controller.set_mode(mode) {
                    Ok(()) => println!("Mode set to {}", mode.as_str()),
                    Err(err) => report_failure(&err),
                }
            }
            "animate" => {
                let Some(prompt) = intent.prompt.as_deref() else {
                    println!("/animate requires a prompt, e.g. /animate gentle zoom in");
                    continue;
                };
                match controller.generate_animation(prompt) {
                    Ok(epoch) => {
                        println!("Animation {epoch} started. Use /wait to follow it.");
                        if let Some(message) = controller.snapshot().progress {
                            println!("{message}");
                        }
                    }
                    Err(err) => report_failure(&err),
                }
            }
            "wait_animation" => {
                if !controller.animation().is_active() {
                    println!("No animation is running.");
                    continue;
                }
                if wait_for_animation(&mut controller) {
                    print_video_ready(&controller);
                }
            }
            "status" => {
                let snapshot = controller.snapshot().to_json();
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            }
            "select_credential" => {
                let key = value_as_non_empty_string(intent.command_args.get("text"))
                    .unwrap_or_default();
                match controller.select_credential(&key) {
                    Ok(()) => println!("Credential selected."),
                    Err(err) => report_failure(&err),
                }
            }
            "save_image" => {
                let path = value_as_non_empty_string(intent.command_args.get("path"))
                    .map(PathBuf::from)
                    .unwrap_or_else(|| default_image_path(&out_dir, &controller));
                match controller.export_current(&path) {
                    Ok(bytes) => println!("Saved {} ({bytes} bytes)", path.display()),
                    Err(err) => println!("Save failed: {err:#}"),
                }
            }
            "save_video" => {
                let path = value_as_non_empty_string(intent.command_args.get("path"))
                    .map(PathBuf::from)
                    .unwrap_or_else(|| out_dir.join("retouch-video.mp4"));
                match controller.export_video(&path) {
                    Ok(bytes) => println!("Saved {} ({bytes} bytes)", path.display()),
                    Err(err) => println!("Save failed: {err:#}"),
                }
            }
            "unknown" => {
                let command = value_as_non_empty_string(intent.command_args.get("command"))
                    .unwrap_or_default();
                println!("Unknown command: /{command}. Type /help for commands.");
            }
            other => {
                println!("Unsupported action: {other}");
            }
        }
    }

    controller.new_image();
    Ok(())
}

fn report_edit(
    controller: &mut SessionController,
    edit: impl FnOnce(&mut SessionController) -> Result<usize, SessionError>,
) {
    match edit(controller) {
        Ok(cursor) => {
            let label = controller
                .history()
                .entries()
                .get(cursor)
                .map(|entry| entry.label.clone())
                .unwrap_or_default();
            println!("[{cursor}] {label}");
        }
        Err(err) => report_failure(&err),
    }
}

fn report_pumped(controller: &mut SessionController) {
    match controller.pump() {
        Some(Ok(())) => print_video_ready(controller),
        Some(Err(err)) => report_failure(&err),
        None => {}
    }
}

fn report_failure(err: &SessionError) {
    match err {
        SessionError::Credential(_) | SessionError::GateClosed => {
            println!("{err}. Select an API key with /key <value>.");
        }
        SessionError::EmptyHistory | SessionError::NoImage => {
            println!("{err}. Use /open <path> first.");
        }
        _ => println!("Error: {err}"),
    }
}

fn print_video_ready(controller: &SessionController) {
    if let Some(video) = controller.video() {
        println!(
            "Video ready ({} bytes, {}). Use /save_video <path> to keep it.",
            video.bytes.len(),
            video.media_type
        );
    }
}

fn print_history(controller: &SessionController) {
    let history = controller.history();
    if history.is_empty() {
        println!("History is empty.");
        return;
    }
    for (index, entry) in history.entries().iter().enumerate() {
        let marker = if index == history.cursor() { "*" } else { " " };
        println!("{marker} [{index}] {}", entry.label);
    }
}

fn adjustments_from_args(args: &std::collections::BTreeMap<String, Value>) -> (Adjustments, Vec<String>) {
    let mut adjustments = Adjustments::default();
    if let Some(values) = args.get("adjustments").and_then(Value::as_object) {
        for (key, value) in values {
            let (Some(adjustment), Some(number)) = (Adjustment::parse(key), value.as_i64()) else {
                continue;
            };
            adjustments.set(adjustment, number.clamp(-100, 100) as i32);
        }
    }
    let invalid = args
        .get("invalid")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    (adjustments, invalid)
}

fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/heic" => "heic",
        "image/heif" => "heif",
        _ => "img",
    }
}

fn default_image_path(out_dir: &Path, controller: &SessionController) -> PathBuf {
    let extension = controller
        .current_image()
        .map(|image| extension_for(&image.media_type))
        .unwrap_or("img");
    out_dir.join(format!(
        "retouch-{}.{extension}",
        controller.history().cursor()
    ))
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    let raw = value
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

fn json_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use retouch_contracts::chat::parse_intent;

    use super::*;

    fn model_args() -> ModelArgs {
        ModelArgs {
            edit_model: None,
            video_model: None,
            dryrun: true,
            poll_interval: None,
            max_polls: None,
        }
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "retouch",
            "edit",
            "--image",
            "in.png",
            "--prompt",
            "sharpen",
            "--out",
            "out.png",
            "--dryrun",
        ])
        .expect("edit args parse");
        let Command::Edit(args) = cli.command else {
            panic!("expected edit command");
        };
        assert_eq!(args.label, CUSTOM_FILTER_LABEL);
        assert!(args.models.dryrun);

        let cli = Cli::try_parse_from([
            "retouch",
            "animate",
            "--image",
            "in.png",
            "--prompt",
            "zoom",
            "--out",
            "clip.mp4",
            "--poll-interval",
            "2.5",
        ])
        .expect("animate args parse");
        assert!(matches!(cli.command, Command::Animate(_)));
    }

    #[test]
    fn overrides_are_clamped() {
        let mut args = model_args();
        args.poll_interval = Some(500.0);
        args.max_polls = Some(0);
        let config = apply_overrides(EngineConfig::default(), &args);
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.max_poll_attempts, 1);
    }

    #[test]
    fn adjust_intent_becomes_request() {
        let intent = parse_intent("/adjust exposure=20 contrast=-10 glow=5");
        let (adjustments, invalid) = adjustments_from_args(&intent.command_args);
        assert_eq!(invalid, vec!["glow=5".to_string()]);
        let request = adjustments.to_request().expect("non-zero sliders");
        assert_eq!(
            request.label,
            "Custom Adjustments: Exposure: +20, Contrast: -10"
        );
    }

    #[test]
    fn dryrun_session_edits_and_exports() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image_path = temp.path().join("in.png");
        std::fs::write(
            &image_path,
            [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13],
        )?;
        let events_path = temp.path().join("events.jsonl");

        let mut controller = open_session(&model_args(), Some(events_path.clone()))?;
        assert!(!controller.needs_credential());
        controller.load_image_path(&image_path)?;
        controller.apply_preset("invert")?;
        let out = default_image_path(temp.path(), &controller);
        assert!(out.ends_with("retouch-1.png"));
        controller.export_current(&out)?;
        assert!(out.exists());

        let log = std::fs::read_to_string(&events_path)?;
        assert!(log.contains("\"models_selected\""));
        assert!(log.contains("\"edit_succeeded\""));
        Ok(())
    }

    #[test]
    fn extension_falls_back_for_unknown_types() {
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("application/octet-stream"), "img");
    }
}
