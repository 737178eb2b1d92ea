//! mcast-output - 组播 PCM 输出
//!
//! 把本地音频按固定节拍切成带可听时间戳的 UDP 包，
//! 多个接收端据此同步播放。

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use mcast_output::audio::pacer::default_due_time_slot;
use mcast_output::audio::AudioFormat;
use mcast_output::config::{ConfigBlock, MulticastConfig};
use mcast_output::decode::{DecodedSource, PcmSource, RawPcmSource};
use mcast_output::engine::Engine;
use mcast_output::net::packet::HEADER_LEN;
use mcast_output::output::{OutputRegistry, MULTICAST_PLUGIN};

/// mcast-output - Multicast PCM output with drift-free pacing
#[derive(Parser)]
#[command(name = "mcast-output")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    output: OutputArgs,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the derived stream parameters and exit
    Info,

    /// Stream a file (or raw S16LE from stdin with "-")
    Play {
        /// Audio file to play, "-" for stdin
        #[arg(value_name = "PATH|-")]
        file: PathBuf,

        /// Treat the input as raw interleaved S16LE
        #[arg(long)]
        raw: bool,
    },
}

/// 输出块参数，未给出的使用默认值
#[derive(Args)]
struct OutputArgs {
    /// Output plugin name
    #[arg(long, default_value = MULTICAST_PLUGIN, global = true)]
    plugin: String,

    /// Destination address (multicast group or unicast host)
    #[arg(short, long, global = true)]
    address: Option<String>,

    /// Destination UDP port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Stream identifier carried in every packet [default: port]
    #[arg(long, global = true)]
    stream_id: Option<u32>,

    /// Transmission gap in milliseconds (audible time = send time + gap)
    #[arg(short, long, value_name = "MS", global = true)]
    gap_ms: Option<u64>,

    /// Frames per packet
    #[arg(short, long, global = true)]
    block_size: Option<u32>,

    /// Channel count [default: from file, else 2]
    #[arg(short, long, global = true)]
    channels: Option<u16>,

    /// Sample rate in Hz [default: from file, else 48000]
    #[arg(short = 'r', long, global = true)]
    sample_rate: Option<u32>,

    /// Due-time slot in nanoseconds [default: min(1ms, period/2)]
    #[arg(long, value_name = "NS", global = true)]
    due_time_slot: Option<u64>,

    /// Multicast TTL
    #[arg(long, global = true)]
    ttl: Option<u32>,

    /// Clock source: monotonic or realtime
    #[arg(long, global = true)]
    clock: Option<String>,

    /// Pace only, send nothing
    #[arg(long, global = true)]
    sync: bool,
}

impl OutputArgs {
    /// 转成输出配置块
    ///
    /// `source_format` 给出时，未显式指定的声道数和采样率跟随源
    fn to_block(&self, source_format: Option<AudioFormat>) -> ConfigBlock {
        let mut block = ConfigBlock::new();
        if let Some(ref address) = self.address {
            block = block.with("address", address.as_str());
        }
        if let Some(port) = self.port {
            block = block.with("port", port.to_string());
        }
        if let Some(stream_id) = self.stream_id {
            block = block.with("stream_id", stream_id.to_string());
        }
        if let Some(gap_ms) = self.gap_ms {
            block = block.with("transmission_gap", gap_ms.saturating_mul(1_000_000).to_string());
        }
        if let Some(block_size) = self.block_size {
            block = block.with("block_size", block_size.to_string());
        }
        if let Some(channels) = self.channels.or(source_format.map(|f| f.channels)) {
            block = block.with("channels", channels.to_string());
        }
        if let Some(rate) = self.sample_rate.or(source_format.map(|f| f.sample_rate)) {
            block = block.with("sample_rate", rate.to_string());
        }
        if let Some(slot) = self.due_time_slot {
            block = block.with("due_time_slot", slot.to_string());
        }
        if let Some(ttl) = self.ttl {
            block = block.with("ttl", ttl.to_string());
        }
        if let Some(ref clock) = self.clock {
            block = block.with("clock", clock.as_str());
        }
        if self.sync {
            block = block.with("sync", "yes");
        }
        block
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    match cli.command {
        Commands::Info => show_stream_info(&cli.output)?,
        Commands::Play { ref file, raw } => play(file, raw, &cli.output)?,
    }

    Ok(())
}

/// 显示派生参数
fn show_stream_info(args: &OutputArgs) -> anyhow::Result<()> {
    let config = MulticastConfig::from_block(&args.to_block(None))?;
    let period = config.period();
    let slot = config
        .due_time_slot
        .unwrap_or_else(|| default_due_time_slot(period));

    println!("=== Multicast Output ===\n");
    if config.sync_only {
        println!("Target:         (sync only, nothing sent)");
    } else {
        println!("Target:         {} (ttl {})", config.target(), config.ttl);
    }
    println!("Stream ID:      {}", config.stream_id);
    println!("Format:         {}", config.stream.supported_format());
    println!("Block size:     {} frames", config.stream.block_size);
    println!("Period:         {} ns ({:.3} ms)", period, period as f64 / 1e6);
    println!("Due-time slot:  {} ns", slot);
    println!(
        "Gap:            {} ns ({:.1} ms)",
        config.transmission_gap,
        config.transmission_gap as f64 / 1e6
    );
    println!("Frame size:     {} bytes", config.stream.frame_bytes());
    println!(
        "Packet size:    {} bytes ({} header)",
        config.packet_bytes(),
        HEADER_LEN
    );
    println!("Clock:          {:?}", config.clock);

    Ok(())
}

/// 打开输入源
fn open_source(path: &Path, raw: bool, args: &OutputArgs) -> anyhow::Result<Box<dyn PcmSource>> {
    let is_stdin = path.as_os_str() == "-";
    if !raw && !is_stdin {
        let source = DecodedSource::open(path)?;
        let info = source.info();
        log::info!(
            "Format: {} | Codec: {} | {}Hz {}ch {}bit | Duration: {:.1}s",
            info.format,
            info.codec,
            info.sample_rate,
            info.channels,
            info.bit_depth.unwrap_or(0),
            info.duration_secs.unwrap_or(0.0)
        );
        return Ok(Box::new(source));
    }

    // 裸 PCM 的格式只能来自参数
    let defaults = MulticastConfig::default();
    let format = AudioFormat::s16(
        args.channels.unwrap_or(defaults.stream.channels),
        args.sample_rate.unwrap_or(defaults.stream.sample_rate),
    );
    if is_stdin {
        Ok(Box::new(RawPcmSource::new(io::stdin(), format)))
    } else {
        Ok(Box::new(RawPcmSource::new(File::open(path)?, format)))
    }
}

/// 播放直到结束或 Ctrl+C
fn play(path: &Path, raw: bool, args: &OutputArgs) -> anyhow::Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let source = open_source(path, raw, args)?;
    let block = args.to_block(Some(source.format()));
    let output = OutputRegistry::with_builtin().create(&args.plugin, &block)?;

    let mut engine = Engine::new(output);

    println!("mcast-output - Streaming: {}", path.display());
    engine.play(source)?;
    println!("Playing. Press Ctrl+C to stop.\n");

    let total_secs = engine.duration_secs().unwrap_or(0.0);
    let total_mins = (total_secs / 60.0) as u32;
    let total_secs_rem = total_secs % 60.0;

    while running.load(Ordering::SeqCst) && !engine.has_ended() {
        let stats = engine.stats();
        let pos_mins = (stats.position_secs / 60.0) as u32;
        let pos_secs = stats.position_secs % 60.0;

        print!(
            "\r  {:02}:{:05.2} / {:02}:{:05.2}  ",
            pos_mins, pos_secs, total_mins, total_secs_rem
        );
        io::stdout().flush()?;

        std::thread::sleep(Duration::from_millis(100));
    }

    if !running.load(Ordering::SeqCst) {
        println!("\nPlayback interrupted.");
    }
    println!();
    engine.stop()?;

    if let Some(report) = engine.last_report() {
        println!("{}", report);
    }

    if engine.is_failed() {
        anyhow::bail!("playback of {} ended with an error", path.display());
    }

    Ok(())
}
