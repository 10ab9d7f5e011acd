//! attention_replay - offline replay of a landmark recording
//!
//! Runs a JSON-lines recording (or a `stub://` pattern) through the
//! classifier and session aggregator without pacing, then prints the session
//! summary.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::time::Instant;

use attention_tracker::config::MAX_ERROR_MARGIN;
use attention_tracker::source::{frame_interval, SyntheticSource};
use attention_tracker::sync::format_hms;
use attention_tracker::{
    open_source, AttentionClassifier, LandmarkSource, SessionAggregator, StatsView,
    DEFAULT_ERROR_MARGIN,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Recording path, `-` for stdin, or `stub://<pattern>`.
    input: String,
    /// Slack added to every geometry threshold.
    #[arg(long, default_value_t = DEFAULT_ERROR_MARGIN)]
    margin: f32,
    /// Frame rate used to timestamp frames that carry no `t_ms`.
    #[arg(long, default_value_t = 30)]
    fps: u32,
    /// Number of frames to replay from a stub source.
    #[arg(long, default_value_t = 300)]
    frames: u64,
    /// Print the final stats as JSON instead of a summary.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }
    if !(0.0..=MAX_ERROR_MARGIN).contains(&args.margin) {
        return Err(anyhow!("margin must be within 0.0..={}", MAX_ERROR_MARGIN));
    }

    let started = Instant::now();
    let interval = frame_interval(args.fps);
    // Synthetic frames get the nominal frame clock instead of wall time.
    let mut source: Box<dyn LandmarkSource> = match args.input.strip_prefix("stub://") {
        Some(spec) => Box::new(
            SyntheticSource::from_spec(spec)?
                .with_limit(args.frames)
                .with_frame_clock(started, interval),
        ),
        None => open_source(&args.input, args.fps)?,
    };

    let classifier = AttentionClassifier::with_margin(args.margin);
    let mut aggregator = SessionAggregator::new();
    aggregator.start(started);

    while let Some(frame) = source.next_frame()? {
        let verdict = classifier.classify(frame.landmarks.as_ref(), frame.timestamp);
        aggregator.record(&verdict);
    }
    aggregator.stop();

    let state = aggregator.state();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&StatsView::from(state))?);
        return Ok(());
    }

    println!("source:           {}", source.name());
    println!("frames:           {}", state.total_frames);
    println!("attentive frames: {}", state.attentive_frames);
    println!("attentiveness:    {:.1}%", state.attentiveness);
    println!("focus cycles:     {}", state.focus_cycles);
    println!("elapsed:          {}", format_hms(state.elapsed_time));
    println!("attentive time:   {}", format_hms(state.attentive_time));
    println!("distracted time:  {}", format_hms(state.distracted_time));
    Ok(())
}
