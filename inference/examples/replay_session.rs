/// Replay a recorded detection stream through the full tracking pipeline
///
/// Reads still frames from a directory, replays detections recorded per frame
/// number, and prints the stabilized, threat-scored tracks as the display
/// timer consumes them.
///
/// Usage:
///   cargo run --release --example replay_session -- [options] <frames_dir> <detections.json>
///
/// Options:
///   --config <file.json>          pipeline/threat configuration
///   --friendly x1,y1,x2,y2        add a friendly zone (display pixels)
///   --enemy x1,y1,x2,y2           add an enemy zone (display pixels)
///   --foe <app_id>                mark an identity as foe
///   --tick-ms <ms>                display timer period (default 33)
use military_threat_tracker::{
    Allegiance, BoundingBox, FramePipeline, ImageSequenceSource, ReplayDetector, SystemConfig,
    ZoneKind,
};
use std::env;
use std::thread;
use std::time::{Duration, Instant};

fn parse_rect(text: &str) -> Result<BoundingBox, Box<dyn std::error::Error>> {
    let values: Vec<f32> = text
        .split(',')
        .map(|v| v.trim().parse::<f32>())
        .collect::<Result<_, _>>()?;
    if values.len() != 4 {
        return Err(format!("expected x1,y1,x2,y2, got '{}'", text).into());
    }
    Ok(BoundingBox::new(values[0], values[1], values[2], values[3]))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    military_threat_tracker::init()?;

    let mut config_path = None;
    let mut zones = Vec::new();
    let mut foes = Vec::new();
    let mut tick_ms = 33_u64;
    let mut positional = Vec::new();

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = args.next(),
            "--friendly" => zones.push((ZoneKind::Friendly, parse_rect(&args.next().unwrap_or_default())?)),
            "--enemy" => zones.push((ZoneKind::Enemy, parse_rect(&args.next().unwrap_or_default())?)),
            "--foe" => foes.push(args.next().unwrap_or_default().parse::<u32>()?),
            "--tick-ms" => tick_ms = args.next().unwrap_or_default().parse()?,
            _ => positional.push(arg),
        }
    }

    if positional.len() != 2 {
        eprintln!("Usage: replay_session [options] <frames_dir> <detections.json>");
        std::process::exit(1);
    }

    let config = match config_path {
        Some(path) => SystemConfig::from_file(path)?,
        None => SystemConfig::default(),
    };
    let (width, height) = (config.pipeline.display_width, config.pipeline.display_height);

    let source = ImageSequenceSource::from_dir(&positional[0])?;
    let detector = ReplayDetector::from_file(&positional[1])?;
    let mut pipeline = FramePipeline::with_iou_tracker(config, Box::new(detector))?;

    pipeline.start_session(Box::new(source), width, height)?;
    for (kind, rect) in zones {
        pipeline.add_zone(kind, rect);
    }
    for app_id in foes {
        pipeline.set_allegiance(app_id, Allegiance::Foe);
    }

    let tick = Duration::from_millis(tick_ms);
    let start = Instant::now();
    let mut shown = 0_u64;

    loop {
        let tick_start = Instant::now();
        let exhausted = pipeline.is_exhausted();
        if let Some(frame) = pipeline.display_step() {
            shown += 1;
            println!("frame {:>5}: {} objects", frame.frame_number, frame.objects.len());
            for obj in &frame.objects {
                println!(
                    "    #{:<4} {:<28} threat {:>6.2}  conf {:.2}{}",
                    obj.app_id,
                    obj.class_name,
                    obj.threat_level,
                    obj.confidence,
                    if obj.ghost { "  (ghost)" } else { "" }
                );
            }
        } else if exhausted {
            break;
        }
        if let Some(rest) = tick.checked_sub(tick_start.elapsed()) {
            thread::sleep(rest);
        }
    }

    let stats = pipeline.stats();
    if let Err(e) = pipeline.stop_session() {
        log::warn!("{}", e);
    }

    println!("\n=== Session summary ===");
    println!("Frames shown:     {}", shown);
    println!("Frames read:      {}", stats.frames_read);
    println!("Batches:          {} ({} failed)", stats.batches_run, stats.batches_failed);
    println!("Frames dropped:   {}", stats.frames_dropped);
    println!("Queue stalls:     {}", stats.queue_stalls);
    println!("Elapsed:          {:.1}s", start.elapsed().as_secs_f32());

    println!("\nOperator records:");
    for record in pipeline.operator().records() {
        println!(
            "    #{:<4} {:<8} threat {:>6.2}{}",
            record.app_id,
            record.status.to_string(),
            record.threat_level,
            if record.selected { "  [selected]" } else { "" }
        );
    }

    Ok(())
}
