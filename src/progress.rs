use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct ScanStats {
    pub bytes_scanned: u64,
    pub occurrences: usize,
    pub batches: usize,
    pub elapsed: Duration,
}

impl ScanStats {
    /// Bytes per second over the whole scan
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes_scanned as f64 / secs
        } else {
            0.0
        }
    }
}

/// Tracks a scan and, when enabled, draws a bar over the stream bytes
pub struct ProgressReporter {
    bar: ProgressBar,
    bytes_scanned: u64,
    occurrences: usize,
    batches: usize,
    start_time: Instant,
}

impl ProgressReporter {
    /// `total` is the stream size when known; unknown sizes get a spinner
    pub fn new(total: Option<u64>, visible: bool) -> Self {
        let bar = if !visible {
            ProgressBar::hidden()
        } else if let Some(total) = total {
            let bar = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})\n{msg}")
            {
                bar.set_style(style.progress_chars("=>-"));
            }
            bar
        } else {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {bytes} {msg}")
            {
                bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
            }
            bar
        };

        Self {
            bar,
            bytes_scanned: 0,
            occurrences: 0,
            batches: 0,
            start_time: Instant::now(),
        }
    }

    /// Record one batch; `position` is the stream cursor after it
    pub fn update(&mut self, position: u64, occurrences: usize) {
        self.bytes_scanned = position;
        self.occurrences += occurrences;
        self.batches += 1;

        self.bar.set_position(position);
        self.bar.set_message(format!(
            "Speed: {:.2} MB/s | Occurrences: {}",
            self.stats().throughput() / (1024.0 * 1024.0),
            self.occurrences
        ));
    }

    pub fn stats(&self) -> ScanStats {
        ScanStats {
            bytes_scanned: self.bytes_scanned,
            occurrences: self.occurrences,
            batches: self.batches,
            elapsed: self.start_time.elapsed(),
        }
    }

    pub fn finish(self) -> ScanStats {
        let stats = self.stats();
        self.bar.finish_and_clear();
        stats
    }
}
