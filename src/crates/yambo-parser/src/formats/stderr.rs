//! Scheduler stderr

/// Kill signals a batch scheduler leaves in the job stderr
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerSignals {
    pub out_of_memory: bool,
    pub time_limit: bool,
    pub lines: Vec<String>,
}

pub fn scan_scheduler_stderr(text: &str) -> SchedulerSignals {
    let mut signals = SchedulerSignals::default();
    for line in text.lines() {
        let lower = line.to_ascii_lowercase();
        let mut matched = false;
        if lower.contains("oom-kill") || lower.contains("out of memory") || lower.contains("out-of-memory") {
            signals.out_of_memory = true;
            matched = true;
        }
        if line.contains("DUE TO TIME LIMIT") {
            signals.time_limit = true;
            matched = true;
        }
        if matched {
            signals.lines.push(line.trim().to_string());
        }
    }
    signals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slurm_messages() {
        let signals = scan_scheduler_stderr(
            "slurmstepd: error: *** JOB 1234 ON nid0001 CANCELLED AT 2024-01-01T00:00:00 DUE TO TIME LIMIT ***\n",
        );
        assert!(signals.time_limit);
        assert!(!signals.out_of_memory);

        let signals = scan_scheduler_stderr("slurmstepd: error: Detected 1 oom-kill event(s) in step 1234.0\n");
        assert!(signals.out_of_memory);
        assert_eq!(signals.lines.len(), 1);
    }
}
