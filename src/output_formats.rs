use crate::cli::OutputFormat;
use crate::occurrence::Occurrence;
use crate::plugin_system::ListedMiner;
use colored::Colorize;
use std::io::{self, Write};

/// Streams occurrences to `out` batch by batch.
///
/// `json` produces one array for the whole run, so [`OccurrenceWriter::finish`]
/// must be called once the last batch is written.
pub struct OccurrenceWriter<W: Write> {
    out: W,
    format: OutputFormat,
    color: bool,
    written: usize,
}

impl<W: Write> OccurrenceWriter<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self {
            out,
            format,
            color: false,
            written: 0,
        }
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn write_batch(&mut self, batch: &[Occurrence]) -> io::Result<()> {
        for occurrence in batch {
            match self.format {
                OutputFormat::Text => self.write_text(occurrence)?,
                OutputFormat::Json => {
                    let sep = if self.written == 0 { "[\n  " } else { ",\n  " };
                    self.out.write_all(sep.as_bytes())?;
                    serde_json::to_writer(&mut self.out, occurrence)?;
                }
                OutputFormat::Ndjson => {
                    serde_json::to_writer(&mut self.out, occurrence)?;
                    self.out.write_all(b"\n")?;
                }
            }
            self.written += 1;
        }
        Ok(())
    }

    fn write_text(&mut self, occurrence: &Occurrence) -> io::Result<()> {
        let position = format!("{:>10}", occurrence.position);
        let label = occurrence.label.as_str();
        let value = format!("{:?}", occurrence.value_str());
        if self.color {
            writeln!(
                self.out,
                "{} {:>5} {} {} {}",
                position.cyan(),
                occurrence.length,
                label.green().bold(),
                value.yellow(),
                format!("{:.2}", occurrence.confidence).dimmed()
            )
        } else {
            writeln!(
                self.out,
                "{} {:>5} {} {} {:.2}",
                position, occurrence.length, label, value, occurrence.confidence
            )
        }
    }

    pub fn finish(mut self) -> io::Result<W> {
        if self.format == OutputFormat::Json {
            let tail: &[u8] = if self.written == 0 { b"[]\n" } else { b"\n]\n" };
            self.out.write_all(tail)?;
        }
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Render an introspection listing
pub fn format_listing(listed: &[ListedMiner], format: OutputFormat, color: bool) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(listed).unwrap_or_else(|_| "[]".to_string()) + "\n"
        }
        OutputFormat::Ndjson => listed
            .iter()
            .filter_map(|l| serde_json::to_string(l).ok())
            .map(|line| line + "\n")
            .collect(),
        OutputFormat::Text => {
            let width = listed.iter().map(|l| l.miner.len()).max().unwrap_or(0);
            let mut output = String::new();
            for l in listed {
                let miner = format!("{:<width$}", l.miner);
                if color {
                    output.push_str(&format!("{}  {}\n", miner.bold(), l.label.green()));
                } else {
                    output.push_str(&format!("{}  {}\n", miner, l.label));
                }
            }
            output
        }
    }
}
