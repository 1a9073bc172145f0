//! End-of-run summary.

use std::fmt;

/// Final report printed when the host signals simulation completion.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Violation percentage per SLA class, SLA0 first.
    pub sla_violations: [f64; 4],
    /// Aggregate cluster energy in kWh.
    pub energy_kwh: f64,
    /// Simulated wall time in seconds.
    pub elapsed_secs: f64,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SLA violation report:")?;
        for (i, v) in self.sla_violations.iter().enumerate() {
            writeln!(f, "  SLA{i}: {v:.2}%")?;
        }
        writeln!(f, "Total energy: {:.4} kWh", self.energy_kwh)?;
        write!(f, "Finished in {:.2} seconds", self.elapsed_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_all_lines() {
        let report = RunReport {
            sla_violations: [0.0, 1.5, 12.25, 40.0],
            energy_kwh: 3.1415,
            elapsed_secs: 120.0,
        };
        let text = report.to_string();
        assert!(text.contains("SLA0: 0.00%"));
        assert!(text.contains("SLA2: 12.25%"));
        assert!(text.contains("Total energy: 3.1415 kWh"));
        assert!(text.contains("Finished in 120.00 seconds"));
    }
}
