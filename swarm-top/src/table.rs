//! Plain-text rendering of fleet telemetry rows.

use swarm_common::ssh::probe::FitnessSample;

const RULE: &str = "+----------------------+------------+------------+------------+\n";

/// The column header, bracketed by rules.
pub fn header() -> String {
    format!(
        "{RULE}| {:>20} | {:>10} | {:>10} | {:>10} |\n{RULE}",
        "Hostname", "Lat. [ms]", "CPU [%]", "Fitness"
    )
}

/// One host row. An unavailable CPU sample renders as `n/a`.
pub fn row(host: &str, sample: &FitnessSample) -> String {
    let cpu = match sample.cpu_percent {
        Some(cpu) => cpu.to_string(),
        None => "n/a".to_string(),
    };
    format!(
        "| {:>20} | {:>10} | {:>10} | {:>10.2} |\n",
        host, sample.latency_ms, cpu, sample.fitness
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_has_three_lines() {
        assert_eq!(header().lines().count(), 3);
    }

    #[test]
    fn row_renders_sample_fields() {
        let sample = FitnessSample::new(Some(42), 3);
        let line = row("h1", &sample);
        assert!(line.contains("h1"));
        assert!(line.contains("42"));
        assert!(line.contains(" 3 "));
        // fitness = (100 - 42) / (1 + 3)
        assert!(line.contains("14.50"));
    }

    #[test]
    fn unavailable_cpu_renders_na() {
        let sample = FitnessSample::unavailable(7);
        let line = row("h2", &sample);
        assert!(line.contains("n/a"));
        assert!(line.contains("0.00"));
    }

    #[test]
    fn rows_and_header_are_same_width() {
        let sample = FitnessSample::new(Some(5), 1);
        let header_width = header().lines().next().unwrap().len();
        let row_width = row("averagehostname", &sample).trim_end().len();
        assert_eq!(header_width, row_width);
    }
}
