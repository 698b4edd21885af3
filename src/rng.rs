/// Supplies the sampling seed for each turn.
pub trait SeedSource: Send + Sync {
    fn next_seed(&self) -> u64;
}

/// Seeds from the wall clock so identical prompts produce different
/// completions.
pub struct ClockSeed;

impl SeedSource for ClockSeed {
    fn next_seed(&self) -> u64 {
        let now = chrono::Utc::now();
        now.timestamp_nanos_opt()
            .map(|n| n as u64)
            .unwrap_or_else(|| now.timestamp_millis() as u64)
    }
}

/// The same seed every turn, for reproducible output.
pub struct FixedSeed(pub u64);

impl SeedSource for FixedSeed {
    fn next_seed(&self) -> u64 {
        self.0
    }
}
