use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use posterkit::{
    Anchor, AssetRef, CanvasSize, Container, Engine, EngineConfig, OutputKind, PosterFormat,
    RenderJob, Template, VideoCodec, WatermarkSpec,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "posterkit", version, about)]
struct Cli {
    /// Engine config JSON. `POSTERKIT_*` env vars override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a template to a PNG, JPEG or WebP poster.
    Poster(PosterArgs),
    /// Overlay a template onto every frame of a video (requires `ffmpeg` and `ffprobe`).
    Video(VideoArgs),
    /// Print what ffprobe reports about a source video.
    Probe {
        #[arg(long = "in")]
        in_path: PathBuf,
    },
}

#[derive(Args, Debug)]
struct ContentArgs {
    /// Template JSON.
    #[arg(long)]
    template: PathBuf,

    /// Bind an image layer to a file: `layer_id=path`. Repeatable.
    #[arg(long = "bind", value_parser = parse_pair)]
    bindings: Vec<(String, String)>,

    /// Bind a font key to a font file: `key=path`. Repeatable.
    #[arg(long = "font", value_parser = parse_pair)]
    fonts: Vec<(String, String)>,

    /// Text content for a `contentKey`: `key=value`. Repeatable.
    #[arg(long = "text", value_parser = parse_pair)]
    text: Vec<(String, String)>,

    /// Watermark image.
    #[arg(long)]
    watermark: Option<PathBuf>,

    #[arg(long, value_parser = parse_serde::<Anchor>, default_value = "bottom-right")]
    anchor: Anchor,

    #[arg(long, default_value_t = 24.0)]
    margin: f64,

    #[arg(long, default_value_t = 1.0)]
    opacity: f64,

    /// Watermark width as a fraction of the canvas width.
    #[arg(long)]
    width_fraction: Option<f64>,

    /// Output size `WIDTHxHEIGHT`.
    #[arg(long, value_parser = parse_size)]
    size: Option<CanvasSize>,
}

#[derive(Args, Debug)]
struct PosterArgs {
    #[command(flatten)]
    content: ContentArgs,

    #[arg(long)]
    out: PathBuf,

    /// Output format. Inferred from `--out` when omitted.
    #[arg(long, value_parser = parse_serde::<PosterFormat>)]
    format: Option<PosterFormat>,
}

#[derive(Args, Debug)]
struct VideoArgs {
    #[command(flatten)]
    content: ContentArgs,

    /// Source video.
    #[arg(long)]
    source: PathBuf,

    #[arg(long)]
    out: PathBuf,

    #[arg(long, value_parser = parse_serde::<Container>)]
    container: Option<Container>,

    #[arg(long, value_parser = parse_serde::<VideoCodec>, default_value = "h264")]
    codec: VideoCodec,

    /// Drop the source audio instead of copying it.
    #[arg(long)]
    no_audio: bool,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::from_env(),
    };
    match cli.cmd {
        Command::Poster(args) => cmd_poster(config, args),
        Command::Video(args) => cmd_video(config, args),
        Command::Probe { in_path } => cmd_probe(config, &in_path),
    }
}

fn cmd_poster(config: EngineConfig, args: PosterArgs) -> anyhow::Result<()> {
    let mut job = build_job(&args.content, RenderJob::poster, &args.out)?;
    if let OutputKind::Poster(p) = &mut job.output {
        p.format = args.format;
        p.size = args.content.size;
    }

    let engine = Engine::new(config)?;
    let out = engine.render(&job, None)?;
    eprintln!(
        "wrote {} ({}x{}, {} bytes)",
        out.path.display(),
        out.width,
        out.height,
        out.byte_size
    );
    Ok(())
}

fn cmd_video(config: EngineConfig, args: VideoArgs) -> anyhow::Result<()> {
    let source = args.source.clone();
    let mut job = build_job(&args.content, |t, dest| RenderJob::video(t, source, dest), &args.out)?;
    if let OutputKind::Video(v) = &mut job.output {
        v.container = args.container;
        v.codec = args.codec;
        v.size = args.content.size;
        v.audio_passthrough = !args.no_audio;
    }

    let engine = Engine::new(config)?;
    let progress = |done: u64, total: Option<u64>| match total {
        Some(t) => eprint!("\rframes {done}/{t}"),
        None => eprint!("\rframes {done}"),
    };
    let out = engine.render_with_progress(&job, None, Some(&progress))?;
    eprintln!();
    eprintln!(
        "wrote {} ({}x{}, {} bytes, {:.2}s)",
        out.path.display(),
        out.width,
        out.height,
        out.byte_size,
        out.duration_micros.unwrap_or(0) as f64 / 1_000_000.0
    );
    Ok(())
}

fn cmd_probe(config: EngineConfig, path: &Path) -> anyhow::Result<()> {
    let engine = Engine::new(config)?;
    let info = engine.loader().probe_video(&AssetRef::new(path))?;
    println!("path:      {}", info.source_path.display());
    println!("size:      {}x{}", info.width, info.height);
    println!("fps:       {}/{}", info.fps.num, info.fps.den);
    println!("codec:     {}", info.codec);
    println!("container: {}", info.container);
    if let Some(n) = info.frame_count {
        println!("frames:    {n}");
    }
    if let Some(us) = info.duration_micros {
        println!("duration:  {:.3}s", us as f64 / 1_000_000.0);
    }
    println!("audio:     {}", info.audio_codec.as_deref().unwrap_or("none"));
    Ok(())
}

fn build_job(
    content: &ContentArgs,
    make: impl FnOnce(Template, PathBuf) -> RenderJob,
    out: &Path,
) -> anyhow::Result<RenderJob> {
    let text = std::fs::read_to_string(&content.template)
        .with_context(|| format!("read template '{}'", content.template.display()))?;
    let template = Template::from_json(&text)
        .with_context(|| format!("parse template '{}'", content.template.display()))?;

    let mut job = make(template, out.to_path_buf());
    for (id, path) in &content.bindings {
        job = job.bind_asset(id.clone(), path);
    }
    for (key, path) in &content.fonts {
        job = job.bind_font(key.clone(), path);
    }
    for (key, value) in &content.text {
        job = job.with_text(key.clone(), value.clone());
    }
    if let Some(path) = &content.watermark {
        let mut spec = WatermarkSpec::new(
            AssetRef::new(path),
            content.anchor,
            content.margin,
            content.opacity,
        );
        spec.width_fraction = content.width_fraction;
        job = job.with_watermark(spec);
    }
    Ok(job)
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if k.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((k.to_string(), v.to_string()))
}

fn parse_size(s: &str) -> Result<CanvasSize, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let w = w.trim().parse::<u32>().map_err(|e| format!("width: {e}"))?;
    let h = h.trim().parse::<u32>().map_err(|e| format!("height: {e}"))?;
    CanvasSize::new(w, h).map_err(|e| e.to_string())
}

/// Parse a value the way it is spelled in job JSON (`bottom-right`, `h264`, `webp`, ...).
fn parse_serde<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).map_err(|e| e.to_string())
}
