//! HyperRAM bus decoder
//!
//! Merges the clock, chip select, read/write data strobe and eight data lines
//! into one event timeline and runs the transaction state machine over it.
//!
//! Flow per transaction:
//!   1. Wait for CS# to be high once, so a capture that starts mid-transfer
//!      is not decoded
//!   2. CS# falls: start of the command/address phase
//!   3. Six clock edges shift in the 48-bit CA word (SELECT on the first,
//!      CA on the last)
//!   4. Count the initial latency in clock edges (doubled when RWDS was high
//!      during CA), then emit WAIT
//!   5. Reads: one DATA symbol per RWDS edge. Writes: one per clock edge.
//!   6. CS# rises at any point: DESELECT and back to 2
//!
//! Simultaneous edges are resolved CS# first, then CLK, then RWDS.

use std::sync::Arc;

use tracing::debug;

use super::cursor::{next_event, BusCursor, EdgeCursor, SymbolWriter};
use super::types::{CommandAddress, SymbolKind};
use crate::runtime::errors::{RefreshError, RefreshResult};
use crate::runtime::filter::Filter;
use crate::runtime::parameter::{Parameter, ParameterSet, Unit};
use crate::runtime::ports::{InputSet, OutputStreams, PortSchema};
use crate::runtime::waveform::{DigitalWaveform, StreamKind, WaveformData};

pub const INITIAL_LATENCY: &str = "Initial Latency";

const CA_BYTES: u32 = 6;
const DATA_LINES: usize = 8;
const INPUT_COUNT: usize = 3 + DATA_LINES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Deselected,
    CommandAddress,
    ReadWait,
    Read,
    WriteWait,
    Write,
}

/// Event channels, in tie-break priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    ChipSelect,
    Clock,
    Strobe,
}

const EVENTS: [Event; 3] = [Event::ChipSelect, Event::Clock, Event::Strobe];

/// HyperRAM protocol decoder
///
/// Inputs: clk, cs#, rwds, dq0..dq7 (digital)
/// Output: protocol symbols
pub struct HyperRamDecoder {
    name: String,
    params: ParameterSet,
    outputs: OutputStreams,
}

impl HyperRamDecoder {
    pub fn new() -> Self {
        let mut params = ParameterSet::new();
        params.insert(INITIAL_LATENCY, Parameter::int(Unit::Counts, 3));
        Self {
            name: "hyperram".to_string(),
            params,
            outputs: OutputStreams::new(1),
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn decode(&self, inputs: &InputSet) -> RefreshResult<WaveformData> {
        inputs.verify_all(INPUT_COUNT)?;
        let clk = inputs.digital(0)?;
        let csn = inputs.digital(1)?;
        let rwds = inputs.digital(2)?;
        let dq = (0..DATA_LINES)
            .map(|i| inputs.digital(3 + i))
            .collect::<RefreshResult<Vec<&DigitalWaveform>>>()?;
        let initial_latency = self.params.int_val(INITIAL_LATENCY)?;
        // Worst case is four edges per cycle when RWDS requests double latency
        if initial_latency.checked_mul(4).is_none() {
            return Err(RefreshError::InvalidParameter {
                name: INITIAL_LATENCY.to_string(),
                reason: format!("latency {} is out of range", initial_latency),
            });
        }

        let mut cs = EdgeCursor::new(csn);
        let mut sclk = EdgeCursor::new(clk);
        let mut strobe = EdgeCursor::new(rwds);
        let mut bus = BusCursor::new(&dq);
        let mut out = SymbolWriter::new(&self.name, clk);

        let mut state = State::Idle;
        let mut event: Option<Event> = None;
        let mut timestamp = clk.time_of(0).min(csn.time_of(0)).min(rwds.time_of(0));

        let mut sym_start = timestamp;
        let mut first_clock = false;
        let mut latency: i64 = 0;
        let mut ca_word: u64 = 0;
        let mut ca_bytes = 0u32;
        let mut clk_time: i64 = 0;
        let mut last_clk = timestamp;

        loop {
            let cur_cs = cs.value();
            let cur_rwds = strobe.value();
            let cur_data = bus.value();

            match state {
                State::Idle => {
                    if cur_cs {
                        state = State::Deselected;
                    }
                }

                State::Deselected => {
                    if !cur_cs {
                        state = State::CommandAddress;
                        ca_word = 0;
                        ca_bytes = 0;
                        sym_start = timestamp;
                        first_clock = true;
                    }
                }

                // CS# high ends the transaction from any active state
                _ if cur_cs => {
                    out.clip_last_to(timestamp);
                    out.emit(sym_start.min(timestamp), timestamp, SymbolKind::Deselect, 0);
                    sym_start = timestamp;
                    state = State::Deselected;
                }

                State::CommandAddress => {
                    if event == Some(Event::Clock) {
                        if first_clock {
                            first_clock = false;
                            out.emit(sym_start, timestamp, SymbolKind::Select, 0);
                        }
                        ca_word = (ca_word << 8) | cur_data;
                        ca_bytes += 1;

                        if ca_bytes == CA_BYTES {
                            out.emit(sym_start, timestamp, SymbolKind::CommandAddress, ca_word);
                            sym_start = timestamp;

                            // Latency is counted in clock edges; one cycle
                            // already elapsed during CA
                            latency = initial_latency * 2;
                            if cur_rwds {
                                latency *= 2;
                            }
                            latency -= 2;

                            let ca = CommandAddress::decode(ca_word);
                            state = match (ca.read, ca.register_space) {
                                (true, _) if latency > 0 => State::ReadWait,
                                (true, _) => State::Read,
                                (false, true) => State::Write,
                                (false, false) if latency > 0 => State::WriteWait,
                                (false, false) => State::Write,
                            };
                        } else if ca_bytes == 1 {
                            sym_start = timestamp;
                        }
                    }
                }

                State::ReadWait | State::WriteWait => {
                    if event == Some(Event::Clock) {
                        latency -= 1;
                        if latency <= 0 {
                            out.emit(sym_start, timestamp, SymbolKind::Wait, 0);
                            state = if state == State::ReadWait {
                                State::Read
                            } else {
                                State::Write
                            };
                            sym_start = timestamp;
                        }
                    }
                }

                State::Read => {
                    if event == Some(Event::Strobe) {
                        // Runs to the next strobe edge of this transaction
                        let duration = match (strobe.next_change(), cs.next_change()) {
                            (Some(next), end) if end.map_or(true, |e| next <= e) => next - timestamp,
                            _ => clk_time,
                        };
                        out.emit(timestamp, timestamp + duration, SymbolKind::Data, cur_data);
                        sym_start = timestamp + duration;
                    }
                }

                State::Write => {
                    if event == Some(Event::Clock) {
                        // Ends halfway to the next clock edge of this transaction
                        let sym_end = match (sclk.next_change(), cs.next_change()) {
                            (Some(next), end) if end.map_or(true, |e| next <= e) => {
                                timestamp + (next - timestamp) / 2
                            }
                            _ => timestamp + clk_time / 2,
                        };
                        out.emit(sym_start, sym_end, SymbolKind::Data, cur_data);
                        sym_start = sym_end;
                    }
                }
            }

            let Some((channel, next)) = next_event(&[&cs, &sclk, &strobe], timestamp) else {
                break;
            };
            let next_type = EVENTS[channel];

            if next_type == Event::Clock {
                clk_time = next - last_clk;
                last_clk = next;
            }

            timestamp = next;
            event = Some(next_type);
            cs.advance_to(timestamp);
            sclk.advance_to(timestamp);
            strobe.advance_to(timestamp);

            // RWDS edges are aligned with the data transitions on reads, so
            // sample the data half a clock later
            let data_timestamp = if state == State::Read && next_type == Event::Strobe {
                timestamp + clk_time / 2
            } else {
                timestamp
            };
            bus.advance_to(data_timestamp);
        }

        debug!("[{}] decoded {} symbols", self.name, out.len());
        Ok(WaveformData::Protocol(out.finish()))
    }
}

impl Default for HyperRamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for HyperRamDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol_name(&self) -> &str {
        "HyperRAM"
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        let mut schemas = vec![
            PortSchema::input("clk", StreamKind::Digital, 0),
            PortSchema::input("cs#", StreamKind::Digital, 1),
            PortSchema::input("rwds", StreamKind::Digital, 2),
        ];
        schemas.extend(
            (0..DATA_LINES).map(|i| PortSchema::input(format!("dq{}", i), StreamKind::Digital, 3 + i)),
        );
        schemas
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::output("data", StreamKind::Protocol, 0)]
    }

    fn refresh(&mut self, inputs: &InputSet) {
        let result = self.decode(inputs);
        self.outputs.publish(&self.name, 0, result);
    }

    fn output(&self, stream: usize) -> Option<Arc<WaveformData>> {
        self.outputs.get(stream)
    }

    fn needs_explicit_configuration(&self) -> bool {
        true
    }

    fn default_output_name(&self, input_names: &[String]) -> String {
        let dq0 = input_names.get(3).map(String::as_str).unwrap_or("NULL");
        format!("HyperRAM({})", dq0)
    }

    fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::decoders::types::Symbol;
    use crate::runtime::filter::FilterExt;
    use crate::runtime::waveform::ProtocolWaveform;

    const CLK: usize = 0;
    const CS: usize = 1;
    const RWDS: usize = 2;

    /// Builds the eleven bus lines from timed level changes
    struct Stimulus {
        lines: Vec<Vec<(i64, bool)>>,
    }

    impl Stimulus {
        fn new() -> Self {
            let mut lines = vec![vec![(0, false)]; INPUT_COUNT];
            lines[CS] = vec![(0, true)];
            Self { lines }
        }

        fn set(&mut self, line: usize, t: i64, value: bool) {
            let last = self.lines[line].last().map(|p| p.1);
            if last != Some(value) {
                self.lines[line].push((t, value));
            }
        }

        fn byte(&mut self, t: i64, value: u8) {
            for bit in 0..DATA_LINES {
                self.set(3 + bit, t, value & (1 << bit) != 0);
            }
        }

        /// Toggle the clock at every time in `edges`
        fn clock(&mut self, edges: impl IntoIterator<Item = i64>) {
            for t in edges {
                let level = self.lines[CLK].last().map(|p| p.1).unwrap_or(false);
                self.set(CLK, t, !level);
            }
        }

        /// CS# low at `t`, then one CA byte before each of six clock edges
        fn command(&mut self, t: i64, word: u64) -> i64 {
            self.set(CS, t, false);
            for n in 0..6 {
                let edge = t + 10 * (n + 1);
                self.byte(edge - 5, (word >> (8 * (5 - n))) as u8);
                self.clock([edge]);
            }
            t + 60
        }

        fn build(&self, end: i64) -> InputSet {
            let waves = self
                .lines
                .iter()
                .map(|points| {
                    let mut w = DigitalWaveform::new(1);
                    for (n, &(t, v)) in points.iter().enumerate() {
                        let next = points.get(n + 1).map(|p| p.0).unwrap_or(end);
                        w.append_sample(t, next - t, v);
                    }
                    WaveformData::Digital(w)
                })
                .collect();
            InputSet::from_waveforms(waves)
        }
    }

    fn decode(decoder: &mut HyperRamDecoder, inputs: &InputSet) -> ProtocolWaveform {
        decoder.refresh(inputs);
        decoder
            .output(0)
            .and_then(|w| w.as_protocol().cloned())
            .expect("decoder produced no output")
    }

    fn kinds(w: &ProtocolWaveform) -> Vec<SymbolKind> {
        w.samples.iter().map(|s| s.kind).collect()
    }

    const READ_MEM: u64 = (1 << 47) | (1 << 45) | (0x200 << 16);
    const WRITE_REG: u64 = 1 << 46;

    #[test]
    fn test_command_then_deselect() {
        let mut stim = Stimulus::new();
        let ca_end = stim.command(100, READ_MEM);
        stim.set(CS, ca_end + 40, true);

        let out = decode(&mut HyperRamDecoder::new(), &stim.build(300));
        assert_eq!(
            kinds(&out),
            vec![SymbolKind::Select, SymbolKind::CommandAddress, SymbolKind::Deselect]
        );
        assert_eq!(out.offsets, vec![100, 110, 160]);
        assert_eq!(out.durations, vec![10, 50, 40]);
        assert_eq!(out.samples[1], Symbol::new(SymbolKind::CommandAddress, READ_MEM));
        assert_eq!(out.samples[1].to_string(), "Read mem 00001000 linear");
    }

    #[test]
    fn test_read_transaction() {
        let mut stim = Stimulus::new();
        let ca_end = stim.command(100, READ_MEM);
        stim.clock((1..=6).map(|n| ca_end + 10 * n));
        stim.byte(195, 0x12);
        stim.set(RWDS, 195, true);
        stim.byte(205, 0x34);
        stim.set(RWDS, 205, false);
        stim.set(CS, 230, true);

        let mut decoder = HyperRamDecoder::new();
        decoder.set_parameter_str(INITIAL_LATENCY, "2").unwrap();
        let out = decode(&mut decoder, &stim.build(300));

        assert_eq!(
            kinds(&out),
            vec![
                SymbolKind::Select,
                SymbolKind::CommandAddress,
                SymbolKind::Wait,
                SymbolKind::Data,
                SymbolKind::Data,
                SymbolKind::Deselect,
            ]
        );
        assert_eq!(out.samples[3].data, 0x12);
        assert_eq!(out.samples[4].data, 0x34);
        // WAIT spans the two latency edges after CA
        assert_eq!((out.offsets[2], out.durations[2]), (160, 20));
        // First byte lasts until the next RWDS edge, the last one a clock period
        assert_eq!((out.offsets[3], out.durations[3]), (195, 10));
        assert_eq!((out.offsets[4], out.durations[4]), (205, 10));
        assert_eq!((out.offsets[5], out.durations[5]), (215, 15));
    }

    #[test]
    fn test_register_write_skips_latency() {
        let mut stim = Stimulus::new();
        let ca_end = stim.command(100, WRITE_REG);
        stim.byte(165, 0x12);
        stim.clock([170]);
        stim.byte(175, 0x34);
        stim.clock([180]);
        stim.set(CS, 200, true);

        let out = decode(&mut HyperRamDecoder::new(), &stim.build(300));
        assert_eq!(ca_end, 160);
        assert_eq!(
            kinds(&out),
            vec![
                SymbolKind::Select,
                SymbolKind::CommandAddress,
                SymbolKind::Data,
                SymbolKind::Data,
                SymbolKind::Deselect,
            ]
        );
        assert_eq!(out.samples[2].data, 0x12);
        assert_eq!(out.samples[3].data, 0x34);
        // Halfway to the next edge, then half the last clock period
        assert_eq!((out.offsets[2], out.durations[2]), (160, 15));
        assert_eq!((out.offsets[3], out.durations[3]), (175, 10));
        assert_eq!((out.offsets[4], out.durations[4]), (185, 15));
    }

    #[test]
    fn test_exhausted_latency_skips_wait() {
        let mut stim = Stimulus::new();
        let ca_end = stim.command(100, READ_MEM);
        stim.byte(ca_end + 15, 0x55);
        stim.set(RWDS, ca_end + 15, true);
        stim.set(CS, ca_end + 50, true);

        let mut decoder = HyperRamDecoder::new();
        decoder.set_parameter_str(INITIAL_LATENCY, "1").unwrap();
        let out = decode(&mut decoder, &stim.build(300));
        assert!(!kinds(&out).contains(&SymbolKind::Wait));
        assert!(kinds(&out).contains(&SymbolKind::Data));
    }

    #[test]
    fn test_chip_select_wins_tie_with_clock() {
        let mut stim = Stimulus::new();
        stim.set(CS, 100, false);
        for n in 0..5 {
            stim.byte(105 + 10 * n, 0xAA);
            stim.clock([110 + 10 * n]);
        }
        // Sixth edge coincides with CS# rising
        stim.clock([160]);
        stim.set(CS, 160, true);

        let inputs = stim.build(300);
        let first = decode(&mut HyperRamDecoder::new(), &inputs);
        assert_eq!(kinds(&first), vec![SymbolKind::Select, SymbolKind::Deselect]);

        let second = decode(&mut HyperRamDecoder::new(), &inputs);
        assert_eq!(first, second);
    }

    #[test]
    fn test_capture_starting_mid_transfer_is_skipped() {
        let mut stim = Stimulus::new();
        stim.lines[CS] = vec![(0, false)];
        stim.clock([10, 20, 30]);
        stim.set(CS, 40, true);

        let out = decode(&mut HyperRamDecoder::new(), &stim.build(100));
        assert!(out.is_empty());
    }

    #[test]
    fn test_refresh_is_idempotent_and_monotonic() {
        let mut stim = Stimulus::new();
        let ca_end = stim.command(100, WRITE_REG);
        stim.clock([ca_end + 10, ca_end + 20]);
        stim.set(CS, ca_end + 25, true);
        let next = stim.command(300, READ_MEM);
        stim.set(CS, next + 10, true);
        let inputs = stim.build(500);

        let mut decoder = HyperRamDecoder::new();
        let a = decode(&mut decoder, &inputs);
        let b = decode(&mut decoder, &inputs);
        assert_eq!(a, b);
        assert!(a.is_consistent());
        assert_eq!(a.samples.iter().filter(|s| s.kind == SymbolKind::Deselect).count(), 2);
    }

    #[test]
    fn test_out_of_range_latency_gives_null_output() {
        let mut stim = Stimulus::new();
        let ca_end = stim.command(100, READ_MEM);
        stim.set(CS, ca_end + 40, true);

        let mut decoder = HyperRamDecoder::new();
        decoder.set_parameter_str(INITIAL_LATENCY, "1e19").unwrap();
        decoder.refresh(&stim.build(300));
        assert!(decoder.output(0).is_none());

        // A sane value recovers on the next refresh
        decoder.set_parameter_str(INITIAL_LATENCY, "3").unwrap();
        decoder.refresh(&stim.build(300));
        assert!(decoder.output(0).is_some());
    }

    #[test]
    fn test_missing_input_gives_null_output() {
        let mut decoder = HyperRamDecoder::new();
        decoder.refresh(&InputSet::new(vec![None; INPUT_COUNT]));
        assert!(decoder.output(0).is_none());
    }

    #[test]
    fn test_default_name_uses_dq0() {
        let decoder = HyperRamDecoder::new();
        let names: Vec<String> = ["clk", "cs", "rwds", "D0"].iter().map(|s| s.to_string()).collect();
        assert_eq!(decoder.default_output_name(&names), "HyperRAM(D0)");
        assert!(decoder.needs_explicit_configuration());
    }
}
