//! # Measurement Reports
//!
//! Comma-separated serialization of the per-flow measurement logs, one file
//! per automaton, with both traffic directions appended to the same file.
//! Column layouts follow the evaluation tooling that consumes them.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use tracing::info;

use crate::driver::DirectionReport;

/// Write the loss-event rows: `flow,timestamp,true|false`.
pub fn write_loss_csv<W: Write>(w: &mut W, reports: &[&DirectionReport]) -> io::Result<()> {
    for report in reports {
        for (flow, records) in &report.loss {
            for r in records {
                writeln!(w, "{flow},{},{}", r.timestamp, r.loss_event)?;
            }
        }
    }
    Ok(())
}

/// Write the round-trip rows: `flow,start,end,Generation: g,Reflection: r`.
pub fn write_round_trip_csv<W: Write>(w: &mut W, reports: &[&DirectionReport]) -> io::Result<()> {
    for report in reports {
        for (flow, records) in &report.round_trip {
            for r in records {
                writeln!(
                    w,
                    "{flow},{},{},Generation: {},Reflection: {}",
                    r.start, r.end, r.generation, r.reflection
                )?;
            }
        }
    }
    Ok(())
}

/// Write the square-wave rows:
/// `flow,start,end,Phase: v,Count: c,Nominal Period: n,Threshold: t`.
pub fn write_square_csv<W: Write>(w: &mut W, reports: &[&DirectionReport]) -> io::Result<()> {
    for report in reports {
        for (flow, records) in &report.square {
            for r in records {
                writeln!(
                    w,
                    "{flow},{},{},Phase: {},Count: {},Nominal Period: {},Threshold: {}",
                    r.start, r.end, r.phase_value, r.phase_count, r.nominal_period, r.nominal_threshold
                )?;
            }
        }
    }
    Ok(())
}

/// Write the reflected-square-wave rows; the phase is a name, not a raw bit.
pub fn write_reflected_csv<W: Write>(w: &mut W, reports: &[&DirectionReport]) -> io::Result<()> {
    for report in reports {
        for (flow, records) in &report.reflected {
            for r in records {
                writeln!(
                    w,
                    "{flow},{},{},Phase: {},Count: {},Nominal Period: {},Threshold: {}",
                    r.start, r.end, r.phase, r.phase_count, r.nominal_period, r.nominal_threshold
                )?;
            }
        }
    }
    Ok(())
}

/// Write all four per-automaton CSV files under `<base>{lbit,tbit,qbit,rbit}.csv`.
pub fn write_all(base: &str, reports: &[&DirectionReport]) -> io::Result<()> {
    let outputs: [(&str, fn(&mut BufWriter<File>, &[&DirectionReport]) -> io::Result<()>); 4] = [
        ("lbit.csv", write_loss_csv),
        ("tbit.csv", write_round_trip_csv),
        ("qbit.csv", write_square_csv),
        ("rbit.csv", write_reflected_csv),
    ];
    for (suffix, write) in outputs {
        let path = PathBuf::from(format!("{base}{suffix}"));
        let mut w = BufWriter::new(File::create(&path)?);
        write(&mut w, reports)?;
        w.flush()?;
        info!(path = %path.display(), "report written");
    }
    Ok(())
}
