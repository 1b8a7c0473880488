//! Waveform recording for simulation output.
//!
//! The [`WaveformRecorder`] trait abstracts waveform output. [`VcdRecorder`]
//! implements the IEEE 1364 Value Change Dump (VCD) format, producing text
//! files that can be viewed in GTKWave, Surfer, or other waveform viewers.

use std::io::Write;

use kiln_common::BitVector;

use crate::error::{SimError, SimResult};

/// Trait for recording simulation waveforms.
///
/// Signals are identified by a recorder-independent index chosen by the caller.
pub trait WaveformRecorder {
    /// Registers a signal for recording under the current scope.
    fn register_signal(&mut self, id: u32, name: &str, width: u32) -> SimResult<()>;

    /// Opens a new scope (hierarchy level) in the waveform.
    fn begin_scope(&mut self, name: &str) -> SimResult<()>;

    /// Closes the current scope.
    fn end_scope(&mut self) -> SimResult<()>;

    /// Records a value change at the given simulation time.
    fn record_change(&mut self, time: u64, id: u32, value: &BitVector) -> SimResult<()>;

    /// Finalizes the waveform output (flush, write trailer, etc.).
    fn finalize(&mut self) -> SimResult<()>;
}

/// VCD (Value Change Dump) format recorder following IEEE 1364.
///
/// Produces human-readable text output with timestamps and signal value changes.
/// Signal identifiers use printable ASCII characters starting from `!` (0x21).
pub struct VcdRecorder<W: Write> {
    writer: W,
    timescale: String,
    id_map: Vec<(u32, String, u32)>, // (signal id, id code, width)
    next_id: u32,
    header_written: bool,
    current_time: Option<u64>,
}

impl<W: Write> VcdRecorder<W> {
    /// Creates a new VCD recorder with a `1 ns` timescale.
    pub fn new(writer: W) -> Self {
        Self::with_timescale(writer, "1 ns")
    }

    /// Creates a new VCD recorder with the given timescale (e.g. `"10 ps"`).
    pub fn with_timescale(writer: W, timescale: &str) -> Self {
        Self {
            writer,
            timescale: timescale.split_whitespace().collect(),
            id_map: Vec::new(),
            next_id: 0,
            header_written: false,
            current_time: None,
        }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn ensure_header(&mut self) -> SimResult<()> {
        if self.header_written {
            return Ok(());
        }
        writeln!(self.writer, "$date")?;
        writeln!(self.writer, "  Simulation date")?;
        writeln!(self.writer, "$end")?;
        writeln!(self.writer, "$version")?;
        writeln!(self.writer, "  Kiln simulator")?;
        writeln!(self.writer, "$end")?;
        writeln!(self.writer, "$timescale")?;
        writeln!(self.writer, "  {}", self.timescale)?;
        writeln!(self.writer, "$end")?;
        self.header_written = true;
        Ok(())
    }

    /// Generates a VCD identifier code from a sequential index.
    ///
    /// Multi-character codes are generated for indices >= 94.
    fn make_id_code(index: u32) -> String {
        let mut result = String::new();
        let mut idx = index;
        loop {
            let c = (b'!' + (idx % 94) as u8) as char;
            result.push(c);
            idx /= 94;
            if idx == 0 {
                break;
            }
            idx -= 1;
        }
        result
    }
}

impl<W: Write> WaveformRecorder for VcdRecorder<W> {
    fn register_signal(&mut self, id: u32, name: &str, width: u32) -> SimResult<()> {
        self.ensure_header()?;
        let id_code = Self::make_id_code(self.next_id);
        self.next_id += 1;
        writeln!(self.writer, "$var wire {width} {id_code} {name} $end")?;
        self.id_map.push((id, id_code, width));
        Ok(())
    }

    fn begin_scope(&mut self, name: &str) -> SimResult<()> {
        self.ensure_header()?;
        writeln!(self.writer, "$scope module {name} $end")?;
        Ok(())
    }

    fn end_scope(&mut self) -> SimResult<()> {
        writeln!(self.writer, "$upscope $end")?;
        Ok(())
    }

    fn record_change(&mut self, time: u64, id: u32, value: &BitVector) -> SimResult<()> {
        self.ensure_header()?;
        if self.current_time != Some(time) {
            if self.current_time.is_none() {
                writeln!(self.writer, "$enddefinitions $end")?;
            }
            writeln!(self.writer, "#{time}")?;
            self.current_time = Some(time);
        }

        let (_, id_code, width) = self
            .id_map
            .iter()
            .find(|(sid, _, _)| *sid == id)
            .ok_or(SimError::UnregisteredSignal(id))?;

        if *width == 1 {
            let bit = if value.bit(0) { '1' } else { '0' };
            writeln!(self.writer, "{bit}{id_code}")?;
        } else {
            writeln!(self.writer, "b{value:b} {id_code}")?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> SimResult<()> {
        if self.current_time.is_none() {
            self.ensure_header()?;
            writeln!(self.writer, "$enddefinitions $end")?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(rec: VcdRecorder<Vec<u8>>) -> String {
        String::from_utf8(rec.into_inner()).unwrap()
    }

    #[test]
    fn vcd_id_codes() {
        assert_eq!(VcdRecorder::<Vec<u8>>::make_id_code(0), "!");
        assert_eq!(VcdRecorder::<Vec<u8>>::make_id_code(1), "\"");
        assert_eq!(VcdRecorder::<Vec<u8>>::make_id_code(93), "~");
        assert_eq!(VcdRecorder::<Vec<u8>>::make_id_code(94).len(), 2);
    }

    #[test]
    fn vcd_header_and_vars() {
        let mut rec = VcdRecorder::with_timescale(Vec::new(), "10 ps");
        rec.begin_scope("top").unwrap();
        rec.register_signal(0, "clk", 1).unwrap();
        rec.register_signal(1, "data", 8).unwrap();
        rec.end_scope().unwrap();
        rec.finalize().unwrap();
        let text = output(rec);
        assert!(text.contains("$timescale\n  10ps\n$end"));
        assert!(text.contains("$scope module top $end"));
        assert!(text.contains("$var wire 1 ! clk $end"));
        assert!(text.contains("$var wire 8 \" data $end"));
        assert!(text.contains("$upscope $end"));
        assert!(text.ends_with("$enddefinitions $end\n"));
    }

    #[test]
    fn vcd_value_changes() {
        let mut rec = VcdRecorder::new(Vec::new());
        rec.begin_scope("top").unwrap();
        rec.register_signal(0, "clk", 1).unwrap();
        rec.register_signal(1, "data", 4).unwrap();
        rec.end_scope().unwrap();
        rec.record_change(0, 0, &BitVector::from_bool(false)).unwrap();
        rec.record_change(0, 1, &BitVector::from_u64(0b1010, 4)).unwrap();
        rec.record_change(1, 0, &BitVector::from_bool(true)).unwrap();
        rec.finalize().unwrap();
        let text = output(rec);
        let body = text.split("$enddefinitions $end\n").nth(1).unwrap();
        assert_eq!(body, "#0\n0!\nb1010 \"\n#1\n1!\n");
    }

    #[test]
    fn vcd_unregistered_signal() {
        let mut rec = VcdRecorder::new(Vec::new());
        let err = rec
            .record_change(0, 7, &BitVector::from_bool(true))
            .unwrap_err();
        assert!(matches!(err, SimError::UnregisteredSignal(7)));
    }
}
