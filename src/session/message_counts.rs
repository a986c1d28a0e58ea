#[derive(Debug, Default)]
pub struct MessageCounts {
    received: u64,
    sent: u64,
    prefixes_received: u64,
}

impl MessageCounts {
    pub fn new() -> Self {
        MessageCounts::default()
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn increment_received(&mut self) {
        self.received += 1;
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn increment_sent(&mut self) {
        self.sent += 1;
    }

    pub fn prefixes_received(&self) -> u64 {
        self.prefixes_received
    }

    pub fn add_prefixes_received(&mut self, count: u64) {
        self.prefixes_received += count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts() {
        let mut counts = MessageCounts::new();
        counts.increment_received();
        counts.increment_sent();
        counts.increment_sent();
        counts.add_prefixes_received(5);
        assert_eq!(counts.received(), 1);
        assert_eq!(counts.sent(), 2);
        assert_eq!(counts.prefixes_received(), 5);
    }
}
