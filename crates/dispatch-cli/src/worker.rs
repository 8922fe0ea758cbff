use dispatch::{ConfigMap, Worker};

/// Demo worker: doubles its input. Mirrors the `SimpleWorker` fixture from
/// the original Python test suite.
#[derive(Default)]
pub struct DoublingWorker {
    multiplier: i64,
}

impl Worker for DoublingWorker {
    type Payload = i64;
    type Output = i64;

    fn setup(&mut self, _device_id: usize, _seed: u64, config: &ConfigMap) -> anyhow::Result<()> {
        self.multiplier = config.get_as("multiplier").unwrap_or(2);
        Ok(())
    }

    fn process(&mut self, payload: i64) -> anyhow::Result<i64> {
        Ok(payload * self.multiplier)
    }
}
