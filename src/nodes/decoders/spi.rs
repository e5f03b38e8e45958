//! SPI decoder built on the event-merge cursors
//!
//! Events come from CS# and SCLK only; MOSI is read through a cursor that
//! trails the clock by one femtosecond, so a data transition landing on the
//! exact sampling edge is attributed to the next bit.
//!
//! Flow per transaction:
//!   1. Wait for CS# to be high once
//!   2. CS# falls: SELECT runs until the first sampling edge
//!   3. Shift in MOSI, MSB first, on each sampling edge
//!   4. After `Bits per Word` bits emit DATA
//!   5. CS# rises: ERROR for a partial word, then DESELECT
//!
//! Simultaneous edges are resolved CS# first, then SCLK.

use std::sync::Arc;

use tracing::debug;

use super::cursor::{next_event, EdgeCursor, SymbolWriter};
use super::types::{SpiMode, SymbolKind};
use crate::runtime::errors::{RefreshError, RefreshResult};
use crate::runtime::filter::Filter;
use crate::runtime::parameter::{Parameter, ParameterSet, ParameterType, Unit};
use crate::runtime::ports::{InputSet, OutputStreams, PortSchema};
use crate::runtime::waveform::{StreamKind, WaveformData};

pub const BITS_PER_WORD: &str = "Bits per Word";
pub const CLOCK_MODE: &str = "Clock Mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Deselected,
    Selected,
}

/// SPI protocol decoder
///
/// Inputs: cs#, sclk, mosi (digital)
/// Output: protocol symbols, one DATA per word
pub struct SpiDecoder {
    name: String,
    params: ParameterSet,
    outputs: OutputStreams,
}

impl SpiDecoder {
    pub fn new() -> Self {
        let mut params = ParameterSet::new();
        params.insert(BITS_PER_WORD, Parameter::int(Unit::Counts, 8));
        let mut mode = Parameter::new(ParameterType::Enum, Unit::Counts);
        for m in SpiMode::ALL {
            mode.add_enum_value(m.to_string(), m.code());
        }
        mode.set_int_val(SpiMode::Mode0.code());
        params.insert(CLOCK_MODE, mode);
        Self {
            name: "spi".to_string(),
            params,
            outputs: OutputStreams::new(1),
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn mode(&self) -> RefreshResult<SpiMode> {
        let code = self.params.int_val(CLOCK_MODE)?;
        SpiMode::from_code(code).ok_or_else(|| RefreshError::InvalidParameter {
            name: CLOCK_MODE.to_string(),
            reason: format!("no SPI mode {}", code),
        })
    }

    fn bits_per_word(&self) -> RefreshResult<u32> {
        let bits = self.params.int_val(BITS_PER_WORD)?;
        match u32::try_from(bits) {
            Ok(b @ 1..=64) => Ok(b),
            _ => Err(RefreshError::InvalidParameter {
                name: BITS_PER_WORD.to_string(),
                reason: format!("{} is outside 1..=64", bits),
            }),
        }
    }

    fn decode(&self, inputs: &InputSet) -> RefreshResult<WaveformData> {
        inputs.verify_all(3)?;
        let csn = inputs.digital(0)?;
        let clk = inputs.digital(1)?;
        let data = inputs.digital(2)?;
        let bits_per_word = self.bits_per_word()?;
        let sample_on_rising = self.mode()?.samples_on_rising();

        let mut cs = EdgeCursor::new(csn);
        let mut sclk = EdgeCursor::new(clk);
        let mut mosi = EdgeCursor::new(data);
        let mut out = SymbolWriter::new(&self.name, clk);

        let mut state = State::Idle;
        let mut clock_event = false;
        let mut timestamp = csn.time_of(0).min(clk.time_of(0));

        let mut sym_start = timestamp;
        let mut first_edge = false;
        let mut word: u64 = 0;
        let mut bits = 0u32;
        let mut last_edge = timestamp;
        let mut bit_period: i64 = 0;

        loop {
            let cur_cs = cs.value();

            match state {
                State::Idle => {
                    if cur_cs {
                        state = State::Deselected;
                    }
                }

                State::Deselected => {
                    if !cur_cs {
                        state = State::Selected;
                        sym_start = timestamp;
                        first_edge = true;
                        word = 0;
                        bits = 0;
                    }
                }

                State::Selected if cur_cs => {
                    if bits > 0 {
                        let end = (last_edge + bit_period).min(timestamp);
                        out.emit(sym_start, end, SymbolKind::Error, word);
                        sym_start = end;
                    }
                    out.clip_last_to(timestamp);
                    out.emit(sym_start.min(timestamp), timestamp, SymbolKind::Deselect, 0);
                    sym_start = timestamp;
                    state = State::Deselected;
                }

                State::Selected => {
                    if clock_event && sclk.value() == sample_on_rising {
                        if first_edge {
                            first_edge = false;
                            out.emit(sym_start, timestamp, SymbolKind::Select, 0);
                            sym_start = timestamp;
                        } else {
                            bit_period = timestamp - last_edge;
                        }
                        if bits == 0 {
                            sym_start = sym_start.max(timestamp);
                        }
                        last_edge = timestamp;

                        word = (word << 1) | u64::from(mosi.value());
                        bits += 1;
                        if bits == bits_per_word {
                            let end = timestamp + bit_period;
                            out.emit(sym_start, end, SymbolKind::Data, word);
                            sym_start = end;
                            word = 0;
                            bits = 0;
                        }
                    }
                }
            }

            let Some((channel, next)) = next_event(&[&cs, &sclk], timestamp) else {
                break;
            };

            timestamp = next;
            clock_event = channel == 1;
            cs.advance_to(timestamp);
            sclk.advance_to(timestamp);
            if clock_event {
                mosi.advance_to(timestamp - 1);
            }
        }

        debug!("[{}] decoded {} symbols", self.name, out.len());
        Ok(WaveformData::Protocol(out.finish()))
    }
}

impl Default for SpiDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for SpiDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol_name(&self) -> &str {
        "SPI"
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        vec![
            PortSchema::input("cs#", StreamKind::Digital, 0),
            PortSchema::input("sclk", StreamKind::Digital, 1),
            PortSchema::input("mosi", StreamKind::Digital, 2),
        ]
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

    fn default_output_name(&self, input_names: &[String]) -> String {
        let mosi = input_names.get(2).map(String::as_str).unwrap_or("NULL");
        format!("SPI({})", mosi)
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
    use crate::runtime::filter::FilterExt;
    use crate::runtime::waveform::{DigitalWaveform, ProtocolWaveform};

    fn wave(points: &[(i64, bool)], end: i64) -> WaveformData {
        let mut w = DigitalWaveform::new(1);
        for (n, &(t, v)) in points.iter().enumerate() {
            let next = points.get(n + 1).map(|p| p.0).unwrap_or(end);
            w.append_sample(t, next - t, v);
        }
        WaveformData::Digital(w)
    }

    /// Mode 0 transfer of `bits` (MSB first) starting at t=100, bit period 10.
    /// MOSI changes on falling edges, SCLK rises at 105, 115, ...
    fn transfer(bits: &[bool], cs_high_at: i64) -> InputSet {
        let cs = vec![(0, true), (100, false), (cs_high_at, true)];
        let mut clk = vec![(0, false)];
        let mut mosi = vec![(0, false)];
        for (n, &bit) in bits.iter().enumerate() {
            let t = 100 + 10 * n as i64;
            if mosi.last().map(|p| p.1) != Some(bit) {
                mosi.push((t, bit));
            }
            clk.push((t + 5, true));
            clk.push((t + 10, false));
        }
        InputSet::from_waveforms(vec![wave(&cs, 1000), wave(&clk, 1000), wave(&mosi, 1000)])
    }

    fn bits_of(byte: u8) -> Vec<bool> {
        (0..8).rev().map(|i| byte & (1 << i) != 0).collect()
    }

    fn decode(decoder: &mut SpiDecoder, inputs: &InputSet) -> ProtocolWaveform {
        decoder.refresh(inputs);
        decoder
            .output(0)
            .and_then(|w| w.as_protocol().cloned())
            .expect("decoder produced no output")
    }

    #[test]
    fn test_two_words() {
        let mut bits = bits_of(0xA5);
        bits.extend(bits_of(0x3C));
        let out = decode(&mut SpiDecoder::new(), &transfer(&bits, 300));

        let kinds: Vec<SymbolKind> = out.samples.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![SymbolKind::Select, SymbolKind::Data, SymbolKind::Data, SymbolKind::Deselect]
        );
        assert_eq!(out.samples[1].data, 0xA5);
        assert_eq!(out.samples[2].data, 0x3C);
        assert_eq!((out.offsets[0], out.durations[0]), (100, 5));
        assert_eq!((out.offsets[1], out.durations[1]), (105, 80));
        assert_eq!((out.offsets[2], out.durations[2]), (185, 80));
        assert_eq!((out.offsets[3], out.durations[3]), (265, 35));
        assert!(out.is_consistent());
    }

    #[test]
    fn test_partial_word_is_error() {
        let out = decode(&mut SpiDecoder::new(), &transfer(&[true, false, true], 200));
        let kinds: Vec<SymbolKind> = out.samples.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![SymbolKind::Select, SymbolKind::Error, SymbolKind::Deselect]
        );
        assert_eq!(out.samples[1].data, 0b101);
    }

    #[test]
    fn test_word_size_parameter() {
        let mut decoder = SpiDecoder::new();
        decoder.set_parameter_str(BITS_PER_WORD, "4").unwrap();
        let out = decode(&mut decoder, &transfer(&bits_of(0xA5), 300));
        let data: Vec<u64> = out
            .samples
            .iter()
            .filter(|s| s.kind == SymbolKind::Data)
            .map(|s| s.data)
            .collect();
        assert_eq!(data, vec![0xA, 0x5]);
    }

    #[test]
    fn test_falling_edge_mode() {
        // Mode 1 samples on the falling edges at 110, 120, ... where MOSI
        // changes too; the one-tick lookback reads the bit that was set up
        let mut decoder = SpiDecoder::new();
        decoder.set_parameter_str(CLOCK_MODE, "Mode 1").unwrap();
        let out = decode(&mut decoder, &transfer(&bits_of(0xA5), 300));
        let data: Vec<u64> = out
            .samples
            .iter()
            .filter(|s| s.kind == SymbolKind::Data)
            .map(|s| s.data)
            .collect();
        assert_eq!(data, vec![0xA5]);
    }

    #[test]
    fn test_invalid_word_size_gives_null_output() {
        let mut decoder = SpiDecoder::new();
        decoder.set_parameter_str(BITS_PER_WORD, "0").unwrap();
        decoder.refresh(&transfer(&bits_of(0xA5), 300));
        assert!(decoder.output(0).is_none());
    }

    #[test]
    fn test_refresh_is_idempotent() {
        let inputs = transfer(&bits_of(0x5A), 300);
        let mut decoder = SpiDecoder::new();
        let a = decode(&mut decoder, &inputs);
        let b = decode(&mut decoder, &inputs);
        assert_eq!(a, b);
    }
}
