use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use tick_cache::message::MessageKind;
use tick_cache::reader::CacheReader;

#[derive(Debug, Parser)]
#[command(version, about = "Dump messages from a compressed market-data cache file")]
struct Args {
    /// Input cache file to read
    #[arg(long, short = 'i', env = "CACHE_FILE")]
    input: PathBuf,

    /// Stop after printing this many messages
    #[arg(long)]
    limit: Option<u64>,

    /// Count messages without printing them
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

fn main() -> Result<()> {
    let _ = dotenv();
    let args = Args::parse();
    let mut reader =
        CacheReader::open(&args.input).with_context(|| format!("open {:?}", args.input))?;
    if !args.quiet {
        eprintln!("block capacity: {} bytes", reader.capacity());
    }

    let mut total = 0u64;
    let mut depths = 0u64;
    let mut ticks = 0u64;
    let mut symbols = 0u64;
    let mut candles = 0u64;
    let mut candle_ends = 0u64;

    while let Some(msg) = reader.next()? {
        total += 1;
        match msg.kind() {
            Some(MessageKind::Depth) => {
                depths += 1;
                if !args.quiet {
                    if let Some(d) = msg.as_depth() {
                        println!(
                            "DEPTH ts={} flags={:#06b} {}@{}",
                            msg.timestamp(),
                            d.flags().0,
                            d.volume(),
                            d.price()
                        );
                    }
                }
            }
            Some(MessageKind::Tick) => {
                ticks += 1;
                if !args.quiet {
                    if let Some(t) = msg.as_tick() {
                        println!(
                            "TICK ts={} id={} price={} vol={} side={:?}",
                            msg.timestamp(),
                            t.id(),
                            t.price(),
                            t.volume(),
                            t.side()
                        );
                    }
                }
            }
            Some(MessageKind::Symbol) => {
                symbols += 1;
                if !args.quiet {
                    println!(
                        "SYMBOL ts={} payload={}B",
                        msg.timestamp(),
                        msg.payload().len()
                    );
                }
            }
            Some(MessageKind::Candle) => {
                candles += 1;
                if !args.quiet {
                    if let Some(c) = msg.as_candle() {
                        println!(
                            "CANDLE ts={} o={} h={} l={} c={} vol={} period={}s",
                            msg.timestamp(),
                            c.open(),
                            c.high(),
                            c.low(),
                            c.close(),
                            c.volume(),
                            c.period_seconds()
                        );
                    }
                }
            }
            Some(MessageKind::CandleEnd) => {
                candle_ends += 1;
                if !args.quiet {
                    println!("CANDLE_END ts={}", msg.timestamp());
                }
            }
            None => {
                if !args.quiet {
                    println!(
                        "UNKNOWN kind={} size={} ts={}",
                        msg.kind_raw(),
                        msg.size(),
                        msg.timestamp()
                    );
                }
            }
        }
        if let Some(limit) = args.limit {
            if total >= limit {
                break;
            }
        }
    }

    eprintln!(
        "Read {} messages: {} depth, {} ticks, {} symbols, {} candles, {} candle-ends.",
        total, depths, ticks, symbols, candles, candle_ends
    );
    Ok(())
}
