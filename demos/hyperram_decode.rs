//! Example: HyperRAM read decoding
//!
//! Synthesizes the bus lines of one HyperRAM read burst, feeds them through a
//! filter graph (capture source → HyperRAM decoder) and prints the decoded
//! symbols.
//!
//! Usage:
//!   cargo run --release --example hyperram_decode -- \
//!       --address 0x1000 --data 12,34,56,78 --latency 3
//!
//! With CSV output:
//!   cargo run --release --example hyperram_decode -- \
//!       --data de,ad,be,ef --csv-output symbols.csv

use clap::Parser;
use scopegraph::nodes::capture::CaptureSource;
use scopegraph::runtime::graph::FilterGraph;
use scopegraph::runtime::registry::create_filter;
use scopegraph::runtime::waveform::{DigitalWaveform, WaveformData};
use std::fs::File;
use std::io::{BufWriter, Write};
use tracing::info;

const LINES: [&str; 11] = [
    "CLK", "CS#", "RWDS", "DQ0", "DQ1", "DQ2", "DQ3", "DQ4", "DQ5", "DQ6", "DQ7",
];
const DECODER_PORTS: [&str; 11] = [
    "clk", "cs#", "rwds", "dq0", "dq1", "dq2", "dq3", "dq4", "dq5", "dq6", "dq7",
];
const CLK: usize = 0;
const CS: usize = 1;
const RWDS: usize = 2;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Word address of the read (hex accepted with 0x prefix)
    #[arg(long, default_value = "0x1000", value_parser = parse_hex)]
    address: u64,

    /// Bytes returned by the memory, comma separated hex
    #[arg(long, default_value = "12,34,56,78", value_delimiter = ',')]
    data: Vec<String>,

    /// Initial latency in clock cycles
    #[arg(short, long, default_value = "3")]
    latency: i64,

    /// Half clock period in picoseconds
    #[arg(long, default_value = "5000")]
    half_period_ps: i64,

    /// CSV output file path (optional)
    #[arg(long)]
    csv_output: Option<String>,
}

fn parse_hex(text: &str) -> Result<u64, String> {
    let digits = text.trim_start_matches("0x");
    u64::from_str_radix(digits, 16).map_err(|e| format!("{}: {}", text, e))
}

/// Timed level changes for the eleven bus lines
struct BusBuilder {
    lines: Vec<Vec<(i64, bool)>>,
}

impl BusBuilder {
    fn new() -> Self {
        let mut lines = vec![vec![(0, false)]; LINES.len()];
        lines[CS] = vec![(0, true)];
        Self { lines }
    }

    fn set(&mut self, line: usize, t: i64, value: bool) {
        if self.lines[line].last().map(|p| p.1) != Some(value) {
            self.lines[line].push((t, value));
        }
    }

    fn toggle(&mut self, line: usize, t: i64) {
        let level = self.lines[line].last().map(|p| p.1).unwrap_or(false);
        self.set(line, t, !level);
    }

    fn byte(&mut self, t: i64, value: u8) {
        for bit in 0..8 {
            self.set(3 + bit, t, value & (1 << bit) != 0);
        }
    }

    fn build(self, end: i64) -> Vec<DigitalWaveform> {
        self.lines
            .into_iter()
            .map(|points| {
                let mut w = DigitalWaveform::new(1);
                for (n, &(t, v)) in points.iter().enumerate() {
                    let next = points.get(n + 1).map(|p| p.0).unwrap_or(end);
                    w.append_sample(t, next - t, v);
                }
                w
            })
            .collect()
    }
}

/// One read burst: CA phase, latency, then data with RWDS edges centered
/// between clock edges
fn read_burst(address: u64, data: &[u8], latency: i64, half: i64) -> (Vec<DigitalWaveform>, i64) {
    // Read, memory space, linear burst
    let ca = (1u64 << 47) | (1 << 45) | ((address >> 3) << 16) | (address & 7);

    let mut bus = BusBuilder::new();
    let start = 2 * half;
    bus.set(CS, start, false);
    let mut edge = start;
    for n in 0..6 {
        edge += half;
        bus.byte(edge - half / 2, (ca >> (8 * (5 - n))) as u8);
        bus.toggle(CLK, edge);
    }

    for _ in 0..(latency * 2 - 2).max(0) {
        edge += half;
        bus.toggle(CLK, edge);
    }

    for &value in data {
        edge += half;
        bus.toggle(CLK, edge);
        let strobe = edge + half / 2;
        bus.byte(strobe, value);
        bus.toggle(RWDS, strobe);
    }
    edge += half;
    bus.toggle(CLK, edge);

    let end = edge + 2 * half;
    bus.set(CS, end, true);
    (bus.build(end + 2 * half), end + 2 * half)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let data = args
        .data
        .iter()
        .map(|b| parse_hex(b).map(|v| v as u8))
        .collect::<Result<Vec<u8>, String>>()?;
    let half = args.half_period_ps * 1000;

    info!("=== HyperRAM Decode Example ===");
    info!(
        "Address: 0x{:x}, {} bytes, latency {}",
        args.address,
        data.len(),
        args.latency
    );

    let (lines, end) = read_burst(args.address, &data, args.latency, half);
    info!("Synthesized {:.3} ns of bus activity", end as f64 / 1e6);

    info!("Building graph...");
    let mut graph = FilterGraph::new();
    graph.add_filter("bus", CaptureSource::digital(&LINES))?;
    let decoder = create_filter("HyperRAM", "hyperram").ok_or("HyperRAM decoder not registered")?;
    graph.add_boxed("hyperram", decoder)?;
    for (line, port) in LINES.iter().zip(DECODER_PORTS) {
        graph.connect("bus", line, "hyperram", port)?;
    }
    graph.set_parameter_str("hyperram", "Initial Latency", &args.latency.to_string())?;

    for (stream, wave) in lines.into_iter().enumerate() {
        graph.load_source("bus", stream, Some(WaveformData::Digital(wave)))?;
    }

    info!("Running...");
    graph.refresh_all();

    let output = graph
        .output("hyperram", 0)
        .ok_or("decoder produced no output")?;
    let symbols = output.as_protocol().ok_or("decoder output is not a protocol stream")?;
    info!(
        "{}: {} symbols",
        graph.default_output_name("hyperram").unwrap_or_default(),
        symbols.len()
    );

    for i in 0..symbols.len() {
        info!(
            "{:>10.3} ns +{:>8.3} ns  {}",
            symbols.time_of(i) as f64 / 1e6,
            (symbols.durations[i] * symbols.timescale) as f64 / 1e6,
            symbols.samples[i]
        );
    }

    if let Some(csv_path) = &args.csv_output {
        info!("CSV output: {}", csv_path);
        let mut writer = BufWriter::new(File::create(csv_path)?);
        writeln!(writer, "Id,Time[ns],Duration[ns],Symbol")?;
        for i in 0..symbols.len() {
            writeln!(
                writer,
                "{},{:.3},{:.3},{}",
                i,
                symbols.time_of(i) as f64 / 1e6,
                (symbols.durations[i] * symbols.timescale) as f64 / 1e6,
                symbols.samples[i]
            )?;
        }
        writer.flush()?;
    }

    info!("Done!");
    Ok(())
}
